//! Playback scheduling
//!
//! The scheduler proper: pending tracks (`queue`), resolved URL reuse
//! (`cache`), the double-buffer slot pool (`slot`), and the event-driven
//! engine that ties them to the resolver and player (`engine`).

pub mod cache;
pub mod engine;
pub mod queue;
pub mod slot;

pub use engine::PlaybackEngine;
pub use queue::TrackQueue;
pub use slot::{PlaybackSlot, SlotState};
