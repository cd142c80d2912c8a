//! retrocast: headless playback appliance core.
//! - One mpv at a time on a fixed display, driven through its JSON IPC socket.
//! - Remote URLs resolved by yt-dlp with a hard timeout.
//! - Watchdog falls back to a placeholder image when the player dies.

#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::perf)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::must_use_candidate
)]

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod idle;
pub mod ipc;
pub mod logging;
pub mod player;
pub mod resolver;
pub mod session;
pub mod supervisor;
pub mod watchdog;

pub use controller::Controller;
pub use error::{ChannelError, ResolveError, SessionError, SpawnError};
