//! Double-buffer playback slots
//!
//! A fixed pool of two slots. While one slot's player is audible, the other
//! speculatively resolves and pre-buffers the next queue head, so a track
//! transition is an unpause rather than a launch.
//!
//! Slot lifecycle:
//!
//! ```text
//! Free -> Prefetching -> Buffering -> Ready -> Playing -> Free
//! ```
//!
//! A slot is `Free` exactly when it holds no track and no process. Releasing
//! a slot aborts any in-flight resolve job and hands back the process (if
//! any) so the caller can shut it down outside the state mutation.

use crate::error::{Error, Result};
use crate::events::{JobId, ProcessToken};
use crate::player::PlayerProcess;
use crate::track::TrackDescriptor;
use tokio::task::JoinHandle;
use tracing::debug;

/// Number of playback slots. One audible, one pre-buffering.
pub const SLOT_COUNT: usize = 2;

/// Lifecycle state of one playback slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No track assigned, no process running.
    Free,
    /// Resolver job in flight for this slot's track.
    Prefetching,
    /// Paused player launched; control socket not yet reachable.
    Buffering,
    /// Paused player reachable over its control socket; resumable.
    Ready,
    /// This slot's player is the audible one.
    Playing,
}

/// In-flight speculative resolve bound to a slot.
pub struct ResolveJob {
    pub id: JobId,
    handle: JoinHandle<()>,
}

impl ResolveJob {
    pub fn new(id: JobId, handle: JoinHandle<()>) -> Self {
        Self { id, handle }
    }

    fn abort(self) {
        self.handle.abort();
    }
}

/// One playback slot.
pub struct PlaybackSlot {
    state: SlotState,
    track: Option<TrackDescriptor>,
    process: Option<Box<dyn PlayerProcess>>,
    job: Option<ResolveJob>,
    token: Option<ProcessToken>,
}

impl PlaybackSlot {
    fn new() -> Self {
        Self {
            state: SlotState::Free,
            track: None,
            process: None,
            job: None,
            token: None,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn track(&self) -> Option<&TrackDescriptor> {
        self.track.as_ref()
    }

    pub fn token(&self) -> Option<ProcessToken> {
        self.token
    }

    /// Active resolve job id, if the slot is `Prefetching`.
    pub fn job_id(&self) -> Option<JobId> {
        self.job.as_ref().map(|j| j.id)
    }

    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    /// Free -> Prefetching: bind a track and its resolve job.
    pub fn begin_prefetch(&mut self, track: TrackDescriptor, job: ResolveJob) -> Result<()> {
        if self.state != SlotState::Free {
            return Err(Error::InvalidState(format!(
                "begin_prefetch on {:?} slot",
                self.state
            )));
        }
        self.state = SlotState::Prefetching;
        self.track = Some(track);
        self.job = Some(job);
        Ok(())
    }

    /// Prefetching -> Buffering: the resolve finished and a paused player was
    /// launched. The finished job record is discarded.
    pub fn begin_buffering(&mut self, process: Box<dyn PlayerProcess>) -> Result<()> {
        if self.state != SlotState::Prefetching {
            return Err(Error::InvalidState(format!(
                "begin_buffering on {:?} slot",
                self.state
            )));
        }
        self.token = Some(process.token());
        self.process = Some(process);
        self.job = None;
        self.state = SlotState::Buffering;
        Ok(())
    }

    /// Buffering -> Ready: the control socket became reachable.
    pub fn mark_ready(&mut self) -> Result<()> {
        if self.state != SlotState::Buffering {
            return Err(Error::InvalidState(format!(
                "mark_ready on {:?} slot",
                self.state
            )));
        }
        self.state = SlotState::Ready;
        Ok(())
    }

    /// Ready -> Playing: this slot's player becomes the audible one.
    pub fn promote(&mut self) -> Result<()> {
        if self.state != SlotState::Ready {
            return Err(Error::InvalidState(format!(
                "promote on {:?} slot",
                self.state
            )));
        }
        self.state = SlotState::Playing;
        Ok(())
    }

    /// Mutable access to the slot's process (for resume dispatch).
    pub fn process_mut(&mut self) -> Option<&mut Box<dyn PlayerProcess>> {
        self.process.as_mut()
    }

    /// Return to `Free`, aborting any in-flight resolve job. The process, if
    /// one was running, is returned for the caller to shut down.
    pub fn release(&mut self) -> Option<Box<dyn PlayerProcess>> {
        if let Some(job) = self.job.take() {
            debug!("Aborting resolve job {} on slot release", job.id);
            job.abort();
        }
        self.state = SlotState::Free;
        self.track = None;
        self.token = None;
        self.process.take()
    }

}

/// The fixed pool of playback slots.
pub struct SlotPool {
    slots: Vec<PlaybackSlot>,
}

impl SlotPool {
    pub fn new() -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| PlaybackSlot::new()).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&PlaybackSlot> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PlaybackSlot> {
        self.slots.get_mut(index)
    }

    /// Index of a `Free` slot, if any.
    pub fn acquire_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_free())
    }

    /// Index of a slot holding `link` in one of the given states, if any.
    pub fn find(&self, states: &[SlotState], link: &str) -> Option<usize> {
        self.slots.iter().position(|s| {
            states.contains(&s.state()) && s.track().is_some_and(|t| t.link == link)
        })
    }

    /// Index of the slot whose live process carries `token`, if any.
    pub fn find_by_token(&self, token: ProcessToken) -> Option<usize> {
        self.slots.iter().position(|s| s.token() == Some(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PlaybackSlot)> {
        self.slots.iter().enumerate()
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        Self::new()
    }
}
