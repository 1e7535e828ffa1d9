use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::Status;

/// Ledger row: one delivery attempt of one flip to one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub check_id: Uuid,
    pub flip_id: Uuid,
    pub channel_id: Uuid,
    pub created: DateTime<Utc>,
    /// Status being reported by this delivery.
    pub check_status: Status,
    /// Empty on success.
    pub error: String,
    pub duration: Duration,
    pub attempts: u32,
}

impl Notification {
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}
