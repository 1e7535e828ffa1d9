use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::status::Status;

/// What caused a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipReason {
    /// A success ping arrived.
    Success,
    /// A fail ping arrived.
    Fail,
    /// A start ping arrived and restarted the deadline.
    Start,
    /// The deadline plus grace elapsed without a ping.
    Timeout,
    /// A start ping was not followed by a terminal ping in time.
    LongRunning,
    Pause,
    Resume,
}

impl FlipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlipReason::Success => "success",
            FlipReason::Fail => "fail",
            FlipReason::Start => "start",
            FlipReason::Timeout => "timeout",
            FlipReason::LongRunning => "long_running",
            FlipReason::Pause => "pause",
            FlipReason::Resume => "resume",
        }
    }

    /// Long-form description for alert messages.
    pub fn describe(&self) -> &'static str {
        match self {
            FlipReason::Success => "success signal received",
            FlipReason::Fail => "failure signal received",
            FlipReason::Start => "job started",
            FlipReason::Timeout => "no ping received in time",
            FlipReason::LongRunning => "started but did not finish in time",
            FlipReason::Pause => "paused by operator",
            FlipReason::Resume => "resumed by operator",
        }
    }
}

impl fmt::Display for FlipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlipReason {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(FlipReason::Success),
            "fail" => Ok(FlipReason::Fail),
            "start" => Ok(FlipReason::Start),
            "timeout" => Ok(FlipReason::Timeout),
            "long_running" => Ok(FlipReason::LongRunning),
            "pause" => Ok(FlipReason::Pause),
            "resume" => Ok(FlipReason::Resume),
            other => Err(ConfigurationError::UnknownVariant {
                kind: "flip reason",
                value: other.to_string(),
            }),
        }
    }
}

/// An immutable record of a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flip {
    pub id: Uuid,
    pub check_id: Uuid,
    pub created: DateTime<Utc>,
    pub old_status: Status,
    pub new_status: Status,
    pub reason: FlipReason,
    /// Set once dispatch has finished fanning out.
    pub processed: Option<DateTime<Utc>>,
    /// Lease held by the dispatch currently working on this flip.
    pub claimed_until: Option<DateTime<Utc>>,
}

impl Flip {
    /// Build a flip between two alert-level statuses.
    ///
    /// Returns `None` when both sides are the same after folding `Grace`
    /// into `Up`: that is not a transition.
    pub fn between(
        check_id: Uuid,
        created: DateTime<Utc>,
        old_status: Status,
        new_status: Status,
        reason: FlipReason,
    ) -> Option<Self> {
        let old_status = old_status.alert_level();
        let new_status = new_status.alert_level();
        if old_status == new_status {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            check_id,
            created,
            old_status,
            new_status,
            reason,
            processed: None,
            claimed_until: None,
        })
    }

    pub fn is_processed(&self) -> bool {
        self.processed.is_some()
    }

    /// Whether this transition should notify channels.
    ///
    /// Only up/down transitions alert, and coming up from `new` or `paused`
    /// is not news.
    pub fn should_alert(&self) -> bool {
        match self.new_status {
            Status::Down => true,
            Status::Up => !matches!(self.old_status, Status::New | Status::Paused),
            _ => false,
        }
    }

    /// Whether a dispatch lease is currently held at `now`.
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip(old: Status, new: Status) -> Option<Flip> {
        Flip::between(Uuid::new_v4(), Utc::now(), old, new, FlipReason::Timeout)
    }

    #[test]
    fn same_status_is_not_a_flip() {
        assert!(flip(Status::Up, Status::Up).is_none());
        assert!(flip(Status::Up, Status::Grace).is_none());
        assert!(flip(Status::Grace, Status::Up).is_none());
    }

    #[test]
    fn grace_is_recorded_as_up() {
        let f = flip(Status::Grace, Status::Down).unwrap();
        assert_eq!(f.old_status, Status::Up);
        assert_eq!(f.new_status, Status::Down);
        assert!(!f.is_processed());
    }

    #[test]
    fn alerting_transitions() {
        assert!(flip(Status::Up, Status::Down).unwrap().should_alert());
        assert!(flip(Status::Down, Status::Up).unwrap().should_alert());
        assert!(flip(Status::New, Status::Down).unwrap().should_alert());
        assert!(!flip(Status::New, Status::Up).unwrap().should_alert());
        assert!(!flip(Status::Paused, Status::Up).unwrap().should_alert());
        assert!(!flip(Status::Up, Status::Paused).unwrap().should_alert());
        assert!(!flip(Status::Paused, Status::New).unwrap().should_alert());
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let mut f = flip(Status::Up, Status::Down).unwrap();
        assert!(!f.is_claimed(now));
        f.claimed_until = Some(now + chrono::Duration::seconds(30));
        assert!(f.is_claimed(now));
        assert!(!f.is_claimed(now + chrono::Duration::seconds(31)));
    }
}
