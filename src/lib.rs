//! # segue
//!
//! Speculative prefetch and instant-switch playback scheduler.
//!
//! **Purpose:** Make sequential playback of network-resolved media feel
//! gapless. While one track plays, the next queued track is speculatively
//! resolved and pre-buffered in a paused, IPC-addressable player process, so
//! the transition is a sub-second "unpause" instead of a multi-second
//! "resolve-then-buffer."
//!
//! **Architecture:** A double-buffer slot pool driven by a single
//! event-dispatch loop, shelling out to a yt-dlp style resolver and mpv style
//! player.

pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod player;
pub mod resolver;
pub mod status;
pub mod track;

pub use error::{Error, Result};
pub use events::PlayerEvent;
pub use playback::PlaybackEngine;
pub use track::TrackDescriptor;
