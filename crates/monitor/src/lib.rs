//! Check status derivation and the status engine.
//!
//! - [`schedule`]: pure deadline and status computation for simple and cron checks
//! - [`keywords`]: classification of email pings by keyword lists
//! - [`StatusEngine`]: applies pings, clock ticks, pause/resume and
//!   configuration changes, and appends a [`Flip`](deadman_core::Flip) for
//!   every alert-level transition

pub mod engine;
pub mod keywords;
pub mod locks;
pub mod schedule;

pub use engine::{CheckUpdate, EngineError, Ingested, StatusEngine, Transition};
pub use schedule::{derive_status, is_late, next_deadline, Evaluation};
