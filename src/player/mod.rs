//! Player process management
//!
//! Launching and controlling the external audio player: process lifecycle
//! (`process`), and the per-slot local control channel used to unpause a
//! pre-buffered player (`ipc`).

pub mod ipc;
pub mod process;

pub use ipc::ControlChannel;
pub use process::{MpvLauncher, PlayerLauncher, PlayerProcess};
