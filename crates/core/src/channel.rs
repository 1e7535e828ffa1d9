use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;

/// Transport used by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Webhook,
    Telegram,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Telegram => "telegram",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelKind::Email),
            "webhook" => Ok(ChannelKind::Webhook),
            "telegram" => Ok(ChannelKind::Telegram),
            other => Err(ConfigurationError::UnknownVariant {
                kind: "channel kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A notification destination and its delivery health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub kind: ChannelKind,
    /// Kind-specific target: an address, a URL or a JSON config object.
    pub value: String,
    #[serde(default = "default_true")]
    pub email_verified: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub last_error: String,
    pub last_notify: Option<DateTime<Utc>>,
    pub last_notify_duration: Option<Duration>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub created: DateTime<Utc>,
    /// Subscribed checks.
    #[serde(default)]
    pub checks: BTreeSet<Uuid>,
}

fn default_true() -> bool {
    true
}

impl Channel {
    pub fn new(kind: ChannelKind, value: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            kind,
            value: value.into(),
            email_verified: true,
            disabled: false,
            last_error: String::new(),
            last_notify: None,
            last_notify_duration: None,
            consecutive_failures: 0,
            created,
            checks: BTreeSet::new(),
        }
    }

    pub fn subscribe(&mut self, check_id: Uuid) {
        self.checks.insert(check_id);
    }

    pub fn is_subscribed(&self, check_id: Uuid) -> bool {
        self.checks.contains(&check_id)
    }

    /// Apply the outcome of a delivery attempt, last writer wins.
    ///
    /// An update whose attempt started before the currently recorded
    /// `last_notify` is stale and is dropped. Returns whether it was applied.
    pub fn apply_health(&mut self, update: &HealthUpdate) -> bool {
        if self.last_notify.is_some_and(|last| update.at < last) {
            return false;
        }
        self.last_notify = Some(update.at);
        self.last_notify_duration = Some(update.duration);
        self.last_error = update.error.clone();
        if update.error.is_empty() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        true
    }
}

/// Outcome of one delivery attempt, to be folded into a channel's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub channel_id: Uuid,
    /// When the attempt started.
    pub at: DateTime<Utc>,
    pub duration: Duration,
    /// Empty on success.
    pub error: String,
}
