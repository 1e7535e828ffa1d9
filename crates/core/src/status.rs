use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Liveness status of a check.
///
/// `Grace` is a sub-state of `Up`: the deadline has passed but the grace
/// window has not. Flips are recorded on [`Status::alert_level`], so moving
/// between `Up` and `Grace` never produces one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    New,
    Up,
    Grace,
    Down,
    Paused,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Up => "up",
            Status::Grace => "grace",
            Status::Down => "down",
            Status::Paused => "paused",
        }
    }

    /// The status as seen by alerting: `Grace` counts as `Up`.
    pub fn alert_level(self) -> Status {
        match self {
            Status::Grace => Status::Up,
            other => other,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Status::New),
            "up" => Ok(Status::Up),
            "grace" => Ok(Status::Grace),
            "down" => Ok(Status::Down),
            "paused" => Ok(Status::Paused),
            other => Err(ConfigurationError::UnknownVariant {
                kind: "status",
                value: other.to_string(),
            }),
        }
    }
}
