//! Alert delivery for status flips.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification channels
//! - Webhook, email, and Telegram notifier implementations
//! - Minijinja template rendering for alert messages
//! - Channel health labels and a consecutive-failure circuit breaker
//! - `AlertDispatcher`, which fans a flip out to its channels and records
//!   the outcome in the notification ledger

pub mod dispatcher;
pub mod email;
pub mod health;
pub mod registry;
pub mod telegram;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::{AlertDispatcher, ChannelOutcome, DispatchError, DispatchPolicy, DispatchResult};
pub use health::{status_label, CircuitPolicy, HealthLabel};
pub use registry::{ConfigRegistry, TransportRegistry};
pub use templating::{AlertContext, TemplateRenderer};
pub use traits::{Alert, Notifier, TransportError};
