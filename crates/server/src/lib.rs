//! Deadman server: monitor pipeline, deadline sweeper and admin API.

pub mod api;
pub mod pipeline;
pub mod reporting;
pub mod router;
pub mod seed;
pub mod startup;
pub mod state;
pub mod sweeper;

pub use pipeline::{Monitor, MonitorError, SweepReport};
pub use router::build_router;
pub use state::AppState;
