//! Deadline computation and status derivation.
//!
//! Everything here is pure: the same check and instant always give the same
//! [`Evaluation`]. The [`StatusEngine`](crate::StatusEngine) is the only
//! caller that writes the result back onto a check.

pub mod cron;
mod evaluator;


pub use self::cron::{next_occurrence, parse_schedule, parse_tz};
pub use self::evaluator::{anchor, derive_status, is_late, next_deadline, validate, Evaluation};
