//! Event system for segue
//!
//! Hybrid communication in the same shape as the rest of the playback stack:
//! - **Engine events** (`tokio::mpsc`, unbounded): completion notifications
//!   from asynchronous external work (resolver jobs, player processes) into
//!   the engine's single dispatch loop.
//! - **Player events** (`tokio::broadcast`): one-to-many notifications for
//!   observers (the CLI front end, tests).
//!
//! Engine events carry generation tokens so that completions from superseded
//! processes or jobs can be recognized as stale and discarded.

use crate::track::TrackDescriptor;
use chrono::{DateTime, Utc};

/// Monotonic identifier for one resolver job.
pub type JobId = u64;

/// Monotonic identifier for one launched player process.
///
/// A fresh token is minted per launch; events from a terminated process no
/// longer match any live record and fall through as stale.
pub type ProcessToken = u64;

/// Internal engine events, consumed by the single dispatch loop.
#[derive(Debug)]
pub enum EngineEvent {
    /// A resolver job finished (speculative prefetch or cold path).
    ResolveFinished {
        job: JobId,
        link: String,
        result: std::result::Result<String, String>,
    },

    /// A buffered player's control channel became reachable.
    PlayerStarted { slot: usize, token: ProcessToken },

    /// A buffered player's control channel never became reachable.
    PlayerStartFailed { slot: usize, token: ProcessToken },

    /// First progress line observed from a player process.
    PlaybackBegan { token: ProcessToken },

    /// Progress line from a player process.
    Progress {
        token: ProcessToken,
        position_secs: u64,
        duration_secs: u64,
    },

    /// A player process exited (natural end, abnormal termination; deliberate
    /// stops are detached before termination and never reach here).
    ProcessExited { token: ProcessToken },
}

/// Observer-facing playback events.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// A track was promoted to current playback (resume or fresh launch).
    TrackStarted {
        track: TrackDescriptor,
        timestamp: DateTime<Utc>,
    },

    /// The player began producing audio for the current track.
    PlaybackBegan { track: TrackDescriptor },

    /// Progress update for the current track.
    Progress {
        track: TrackDescriptor,
        position_secs: u64,
        duration_secs: u64,
    },

    /// Current playback ended (natural or abnormal; both advance the queue).
    TrackFinished {
        track: TrackDescriptor,
        timestamp: DateTime<Utc>,
    },

    /// A track is being resolved or buffered before playback can begin.
    Loading { track: TrackDescriptor },

    /// The pending-track list changed.
    QueueChanged { remaining: usize },

    /// A user-visible failure; the scheduler stays ready for requests.
    PlaybackError {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Queue drained and nothing is playing.
    Idle,
}
