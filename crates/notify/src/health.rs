//! Channel health: the reporting label and the circuit-breaker guard.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use deadman_core::duration::to_chrono;
use deadman_core::{Channel, ChannelKind};

/// Reporting label derived from a channel's health fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthLabel {
    Disabled,
    Error,
    #[serde(rename = "OK")]
    Ok,
    /// Never notified.
    #[serde(rename = "-")]
    Never,
}

impl HealthLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLabel::Disabled => "Disabled",
            HealthLabel::Error => "Error",
            HealthLabel::Ok => "OK",
            HealthLabel::Never => "-",
        }
    }
}

impl fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Disabled` over `Error` over `OK`; `-` when never notified.
pub fn status_label(channel: &Channel) -> HealthLabel {
    if channel.disabled {
        HealthLabel::Disabled
    } else if !channel.last_error.is_empty() {
        HealthLabel::Error
    } else if channel.last_notify.is_some() {
        HealthLabel::Ok
    } else {
        HealthLabel::Never
    }
}

/// Reason a channel cannot be sent to at all, checked before any attempt.
pub fn preflight(channel: &Channel) -> Option<&'static str> {
    (channel.kind == ChannelKind::Email && !channel.email_verified).then_some("Email not verified")
}

/// Decision for one channel before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Send,
    /// Too many consecutive failures; skip until `retry_at`.
    CircuitOpen { failures: u32, retry_at: DateTime<Utc> },
}

/// Consecutive-failure circuit breaker.
///
/// A channel with at least `failure_threshold` consecutive failures is not
/// sent to until `cooldown` has passed since its last attempt. The next
/// attempt after that is a probe: success closes the circuit, failure
/// starts another cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    /// `None` disables the breaker.
    pub failure_threshold: Option<u32>,
    pub cooldown: Duration,
}

impl CircuitPolicy {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: None,
            cooldown: Duration::ZERO,
        }
    }

    pub fn guard(&self, channel: &Channel, now: DateTime<Utc>) -> Guard {
        let Some(threshold) = self.failure_threshold else {
            return Guard::Send;
        };
        if channel.consecutive_failures < threshold {
            return Guard::Send;
        }
        match channel.last_notify {
            Some(last) if last + to_chrono(self.cooldown) > now => Guard::CircuitOpen {
                failures: channel.consecutive_failures,
                retry_at: last + to_chrono(self.cooldown),
            },
            _ => Guard::Send,
        }
    }
}
