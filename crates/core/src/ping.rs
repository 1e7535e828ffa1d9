use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;

/// What a ping reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingKind {
    Start,
    Success,
    Fail,
    /// Recorded for the audit trail; no effect on status.
    Log,
    /// Recorded but deliberately ignored (e.g. an email matching no keyword).
    Ignore,
}

impl PingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingKind::Start => "start",
            PingKind::Success => "success",
            PingKind::Fail => "fail",
            PingKind::Log => "log",
            PingKind::Ignore => "ignore",
        }
    }

    /// Success and fail pings end a run and move `last_ping`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PingKind::Success | PingKind::Fail)
    }
}

impl fmt::Display for PingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PingKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(PingKind::Start),
            "success" => Ok(PingKind::Success),
            "fail" => Ok(PingKind::Fail),
            "log" => Ok(PingKind::Log),
            "ignore" => Ok(PingKind::Ignore),
            other => Err(ConfigurationError::UnknownVariant {
                kind: "ping kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A ping as handed over by the ingestion layer, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingInput {
    pub kind: PingKind,
    /// `http`, `https` or `email`.
    pub scheme: String,
    pub method: String,
    /// Email subject, for email pings.
    pub subject: Option<String>,
    pub body: Option<String>,
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
}

impl Default for PingInput {
    fn default() -> Self {
        Self {
            kind: PingKind::Success,
            scheme: "http".to_string(),
            method: "GET".to_string(),
            subject: None,
            body: None,
            user_agent: None,
            remote_addr: None,
        }
    }
}

impl PingInput {
    pub fn of_kind(kind: PingKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// An inbound email ping with the given subject and body.
    pub fn email(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            scheme: "email".to_string(),
            method: "email".to_string(),
            subject: Some(subject.into()),
            body: Some(body.into()),
            ..Self::default()
        }
    }
}

/// An immutable ping event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub id: Uuid,
    pub check_id: Uuid,
    pub created: DateTime<Utc>,
    /// Kind after keyword classification.
    pub kind: PingKind,
    pub scheme: String,
    pub method: String,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
}

impl Ping {
    pub fn from_input(check_id: Uuid, kind: PingKind, input: PingInput, created: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            check_id,
            created,
            kind,
            scheme: input.scheme,
            method: input.method,
            subject: input.subject,
            body: input.body,
            user_agent: input.user_agent,
            remote_addr: input.remote_addr,
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.is_empty())
    }

    /// Body size in bytes.
    pub fn object_size(&self) -> usize {
        self.body.as_ref().map_or(0, String::len)
    }
}
