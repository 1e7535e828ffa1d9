use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::status::Status;

/// Shortest accepted timeout or grace period.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Longest accepted timeout or grace period (365 days).
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 86_400);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(86_400);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3_600);

/// How a check's deadline is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Fixed interval: deadline = last ping + timeout.
    Simple,
    /// Cron expression: deadline = next occurrence after the last ping.
    Cron,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Simple => "simple",
            CheckKind::Cron => "cron",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(CheckKind::Simple),
            "cron" => Ok(CheckKind::Cron),
            other => Err(ConfigurationError::UnknownVariant {
                kind: "check kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Keyword rules for classifying email pings by their subject or body.
///
/// Keyword lists are comma separated. Matching is case-insensitive substring
/// search. Filtering is off unless `filter_subject` or `filter_body` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordFilter {
    pub filter_subject: bool,
    pub filter_body: bool,
    pub success_kw: String,
    pub failure_kw: String,
    pub start_kw: String,
}

impl KeywordFilter {
    pub fn is_enabled(&self) -> bool {
        self.filter_subject || self.filter_body
    }
}

/// A monitored unit expected to ping on a schedule.
///
/// `status` is a cached projection: it is only ever written by the status
/// engine, from the derivation over the ping-history fields below, and
/// `status_computed_at` records the instant it was derived for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub kind: CheckKind,
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_tz")]
    pub tz: String,
    #[serde(default = "default_grace")]
    pub grace: Duration,
    /// When set, pings do not unpause a paused check.
    #[serde(default)]
    pub manual_resume: bool,
    #[serde(default)]
    pub filter: KeywordFilter,

    pub status: Status,
    pub status_computed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused: bool,
    pub last_ping: Option<DateTime<Utc>>,
    /// Whether the most recent success/fail ping was a failure.
    #[serde(default)]
    pub last_ping_failed: bool,
    pub last_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub n_pings: u64,
    pub created: DateTime<Utc>,
    /// Bumped on every write; used for compare-and-swap updates.
    #[serde(default)]
    pub version: u64,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_grace() -> Duration {
    DEFAULT_GRACE
}

fn default_schedule() -> String {
    "* * * * *".to_string()
}

fn default_tz() -> String {
    "UTC".to_string()
}

impl Check {
    /// A new simple check with the default timeout and grace period.
    pub fn new(name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tags: Vec::new(),
            kind: CheckKind::Simple,
            timeout: DEFAULT_TIMEOUT,
            schedule: default_schedule(),
            tz: default_tz(),
            grace: DEFAULT_GRACE,
            manual_resume: false,
            filter: KeywordFilter::default(),
            status: Status::New,
            status_computed_at: None,
            paused: false,
            last_ping: None,
            last_ping_failed: false,
            last_start: None,
            n_pings: 0,
            created,
            version: 0,
        }
    }

    /// Simple check pinging every `timeout`, tolerating `grace` of lateness.
    pub fn simple(
        name: impl Into<String>,
        timeout: Duration,
        grace: Duration,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            timeout,
            grace,
            ..Self::new(name, created)
        }
    }

    /// Cron check following `schedule` in time zone `tz`.
    pub fn cron(
        name: impl Into<String>,
        schedule: impl Into<String>,
        tz: impl Into<String>,
        grace: Duration,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: CheckKind::Cron,
            schedule: schedule.into(),
            tz: tz.into(),
            grace,
            ..Self::new(name, created)
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Human-readable schedule: the period for simple checks, the cron
    /// expression for cron checks.
    pub fn schedule_label(&self) -> String {
        match self.kind {
            CheckKind::Simple => crate::duration::format_duration(self.timeout),
            CheckKind::Cron => self.schedule.clone(),
        }
    }

    /// Validate the timeout and grace period ranges.
    pub fn validate_intervals(&self) -> Result<(), ConfigurationError> {
        check_range("timeout", self.timeout)?;
        check_range("grace", self.grace)
    }
}

fn check_range(field: &'static str, value: Duration) -> Result<(), ConfigurationError> {
    if value < MIN_INTERVAL || value > MAX_INTERVAL {
        return Err(ConfigurationError::OutOfRange {
            field,
            value: value.as_secs(),
            min: MIN_INTERVAL.as_secs(),
            max: MAX_INTERVAL.as_secs(),
        });
    }
    Ok(())
}
