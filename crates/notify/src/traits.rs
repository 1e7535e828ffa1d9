//! Notifier trait definition and shared error types.

use std::time::Duration;

use crate::templating::AlertContext;

/// Errors from a single delivery attempt.
///
/// These never escape the dispatcher: they end up as ledger error text and
/// on the channel's health fields.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Received status code {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl TransportError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(_)
            | TransportError::Smtp(_)
            | TransportError::RateLimited { .. }
            | TransportError::Timeout(_) => true,
            TransportError::Rejected { status, .. } => *status >= 500,
            TransportError::Template(_) | TransportError::Config(_) => false,
        }
    }

    /// Delay requested by the remote side, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

/// A rendered alert ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Alert {
    /// The rendered subject/title.
    pub subject: String,
    /// The rendered body content.
    pub body: String,
    /// The data the alert was rendered from, for transports with their own templates.
    pub context: AlertContext,
}

/// Trait for notification channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an alert through this channel.
    async fn send(&self, alert: &Alert) -> Result<(), TransportError>;

    /// Human-readable name for this channel (e.g., "webhook", "email").
    fn channel_name(&self) -> &str;
}
