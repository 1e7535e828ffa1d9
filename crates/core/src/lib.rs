//! Domain model shared by every deadman crate.
//!
//! Checks, pings, flips, channels and the notification ledger rows, plus the
//! environment-driven [`Config`] and the configuration-time error type.

pub mod channel;
pub mod check;
pub mod config;
pub mod duration;
pub mod error;
pub mod flip;
pub mod notification;
pub mod ping;
pub mod status;

pub use channel::*;
pub use check::*;
pub use config::Config;
pub use error::*;
pub use flip::*;
pub use notification::*;
pub use ping::*;
pub use status::*;
