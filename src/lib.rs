//! ytmdl: download YouTube playlists and tracks as tagged audio files
//!
//! The queue engine lives in [`ytmdl_core`], the yt-dlp adapters in
//! [`ytmdl_ytdlp`] and persisted preferences in [`ytmdl_config`]. This crate
//! adds the terminal front end on top.

pub mod commands;
pub mod logging;
pub mod render;
pub mod session;

pub use ytmdl_config as settings;
pub use ytmdl_core as queue;
pub use ytmdl_ytdlp as ytdlp;

pub use commands::Command;
pub use session::{Flow, Overrides, Session, Submitted};
