//! YAML seed file: checks, channels and their subscriptions.
//!
//! ```yaml
//! checks:
//!   - name: nightly-backup
//!     timeout: 1d
//!     grace: 1h
//!     tags: [prod, db]
//!   - name: report
//!     kind: cron
//!     schedule: "0 3 * * *"
//!     tz: Europe/Berlin
//!     grace: 30m
//! channels:
//!   - kind: email
//!     value: ops@example.com
//!     checks: [nightly-backup, report]
//! ```
//!
//! Channels refer to checks by name. Durations use the compact form
//! accepted by [`parse_duration`].

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use deadman_core::duration::parse_duration;
use deadman_core::{Channel, ChannelKind, Check, CheckKind, KeywordFilter};
use deadman_store::{Store, StoreError};

use crate::pipeline::{Monitor, MonitorError};

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid seed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("check '{check}': invalid {field} '{value}'")]
    InvalidDuration {
        check: String,
        field: &'static str,
        value: String,
    },

    #[error("duplicate check name '{0}'")]
    DuplicateCheck(String),

    #[error("channel '{channel}' subscribes to unknown check '{check}'")]
    UnknownCheck { channel: String, check: String },

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub checks: Vec<SeedCheck>,
    pub channels: Vec<SeedChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCheck {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_kind")]
    pub kind: CheckKind,
    pub timeout: Option<String>,
    pub schedule: Option<String>,
    pub tz: Option<String>,
    pub grace: Option<String>,
    #[serde(default)]
    pub manual_resume: bool,
    #[serde(default)]
    pub filter: KeywordFilter,
}

fn default_kind() -> CheckKind {
    CheckKind::Simple
}

#[derive(Debug, Deserialize)]
pub struct SeedChannel {
    #[serde(default)]
    pub name: String,
    pub kind: ChannelKind,
    pub value: String,
    #[serde(default = "default_true")]
    pub email_verified: bool,
    #[serde(default)]
    pub disabled: bool,
    /// Names of the checks this channel is subscribed to.
    #[serde(default)]
    pub checks: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// What a seed run created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub checks: usize,
    pub channels: usize,
    pub subscriptions: usize,
}

impl SeedFile {
    pub fn parse(yaml: &str) -> Result<Self, SeedError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Register every check and channel.
    ///
    /// Channel references are resolved before anything is written, so a
    /// dangling check name leaves the store untouched.
    pub async fn apply(self, monitor: &Monitor, now: DateTime<Utc>) -> Result<SeedSummary, SeedError> {
        let mut checks = Vec::with_capacity(self.checks.len());
        let mut ids: HashMap<String, Uuid> = HashMap::new();
        for seed in self.checks {
            let check = seed.into_check(now)?;
            if ids.insert(check.name.clone(), check.id).is_some() {
                return Err(SeedError::DuplicateCheck(check.name));
            }
            checks.push(check);
        }

        let mut channels = Vec::with_capacity(self.channels.len());
        let mut subscriptions = 0;
        for seed in self.channels {
            let mut channel = Channel::new(seed.kind, seed.value, now);
            channel.name = seed.name;
            channel.email_verified = seed.email_verified;
            channel.disabled = seed.disabled;
            for name in &seed.checks {
                let id = ids.get(name).ok_or_else(|| SeedError::UnknownCheck {
                    channel: if channel.name.is_empty() { channel.value.clone() } else { channel.name.clone() },
                    check: name.clone(),
                })?;
                channel.subscribe(*id);
                subscriptions += 1;
            }
            channels.push(channel);
        }

        let summary = SeedSummary {
            checks: checks.len(),
            channels: channels.len(),
            subscriptions,
        };
        for check in checks {
            monitor.register(check, now).await?;
        }
        for channel in &channels {
            monitor.store().insert_channel(channel).await?;
        }

        info!(
            checks = summary.checks,
            channels = summary.channels,
            subscriptions = summary.subscriptions,
            "Seed applied"
        );
        Ok(summary)
    }
}

impl SeedCheck {
    fn into_check(self, now: DateTime<Utc>) -> Result<Check, SeedError> {
        let duration = |field: &'static str, value: &str| {
            parse_duration(value).ok_or_else(|| SeedError::InvalidDuration {
                check: self.name.clone(),
                field,
                value: value.to_string(),
            })
        };

        let mut check = Check::new(self.name.clone(), now);
        check.kind = self.kind;
        if let Some(v) = &self.timeout {
            check.timeout = duration("timeout", v)?;
        }
        if let Some(v) = &self.grace {
            check.grace = duration("grace", v)?;
        }
        if let Some(v) = &self.schedule {
            check.schedule = v.clone();
        }
        if let Some(v) = &self.tz {
            check.tz = v.clone();
        }
        check.tags = self.tags.clone();
        check.manual_resume = self.manual_resume;
        check.filter = self.filter.clone();
        Ok(check)
    }
}
