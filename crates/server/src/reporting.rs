//! Read model for the admin API.
//!
//! Flattens stored checks, channels, ledger rows, flips and pings into
//! display rows. Nothing here writes; the one admin action (resend) goes
//! through [`crate::pipeline::Monitor`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use deadman_core::{Channel, ChannelKind, Check, CheckKind, Flip, FlipReason, Notification, Ping, PingKind, Status};
use deadman_notify::health::{self, HealthLabel};
use deadman_store::{NotificationQuery, PingQuery, Store, StoreError, DEFAULT_LIMIT};

/// Channel values longer than this are cut short in listings.
const VALUE_DISPLAY_CHARS: usize = 100;

// ── Checks ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CheckRow {
    pub id: Uuid,
    pub name: String,
    pub tags: Vec<String>,
    pub kind: CheckKind,
    pub created: DateTime<Utc>,
    pub n_pings: u64,
    /// Timeout in words for simple checks, the cron expression for cron.
    pub schedule: String,
    pub status: Status,
    pub last_start: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
}

impl From<&Check> for CheckRow {
    fn from(c: &Check) -> Self {
        Self {
            id: c.id,
            name: if c.name.is_empty() { "unnamed".to_string() } else { c.name.clone() },
            tags: c.tags.clone(),
            kind: c.kind,
            created: c.created,
            n_pings: c.n_pings,
            schedule: c.schedule_label(),
            status: c.status,
            last_start: c.last_start,
            last_ping: c.last_ping,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckFilter {
    pub status: Option<Status>,
    pub kind: Option<CheckKind>,
    /// Case-insensitive match on name or tags.
    pub q: Option<String>,
}

impl CheckFilter {
    fn matches(&self, c: &Check) -> bool {
        if self.status.is_some_and(|s| s != c.status) || self.kind.is_some_and(|k| k != c.kind) {
            return false;
        }
        match self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            None => true,
            Some(q) => {
                let q = q.to_lowercase();
                c.name.to_lowercase().contains(&q) || c.tags.iter().any(|t| t.to_lowercase().contains(&q))
            }
        }
    }
}

// ── Channels ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChannelRow {
    pub id: Uuid,
    pub kind: ChannelKind,
    /// Kind, noting unverified email addresses.
    pub transport: String,
    pub name: String,
    pub created: NaiveDate,
    pub value: String,
    pub last_notify: Option<NaiveDate>,
    pub status: HealthLabel,
    /// Duration of the last delivery in seconds, one decimal.
    pub time: Option<String>,
    pub last_error: String,
    pub disabled: bool,
    pub checks: usize,
}

impl From<&Channel> for ChannelRow {
    fn from(ch: &Channel) -> Self {
        let transport = if ch.kind == ChannelKind::Email && !ch.email_verified {
            format!("{} (not verified)", ch.kind)
        } else {
            ch.kind.to_string()
        };
        Self {
            id: ch.id,
            kind: ch.kind,
            transport,
            name: ch.name.clone(),
            created: ch.created.date_naive(),
            value: chop(&ch.value, VALUE_DISPLAY_CHARS),
            last_notify: ch.last_notify.map(|t| t.date_naive()),
            status: health::status_label(ch),
            time: ch
                .last_notify_duration
                .filter(|d| !d.is_zero())
                .map(|d| format!("{:.1}", d.as_secs_f64())),
            last_error: ch.last_error.clone(),
            disabled: ch.disabled,
            checks: ch.checks.len(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelFilter {
    pub kind: Option<ChannelKind>,
    pub disabled: Option<bool>,
    /// Only channels whose last delivery took longer than this.
    pub min_duration_secs: Option<f64>,
}

impl ChannelFilter {
    fn matches(&self, ch: &Channel) -> bool {
        if self.kind.is_some_and(|k| k != ch.kind) || self.disabled.is_some_and(|d| d != ch.disabled) {
            return false;
        }
        match self.min_duration_secs {
            None => true,
            Some(min) => ch.last_notify_duration.is_some_and(|d| d.as_secs_f64() > min),
        }
    }
}

fn chop(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &value[..cut]),
        None => value.to_string(),
    }
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRow {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub check_id: Uuid,
    pub flip_id: Uuid,
    pub channel_id: Uuid,
    pub channel_kind: Option<ChannelKind>,
    pub channel_value: Option<String>,
    pub check_status: Status,
    pub error: String,
    pub attempts: u32,
    pub duration_secs: f64,
}

impl NotificationRow {
    fn new(n: &Notification, channel: Option<&Channel>) -> Self {
        Self {
            id: n.id,
            created: n.created,
            check_id: n.check_id,
            flip_id: n.flip_id,
            channel_id: n.channel_id,
            channel_kind: channel.map(|c| c.kind),
            channel_value: channel.map(|c| c.value.clone()),
            check_status: n.check_status,
            error: n.error.clone(),
            attempts: n.attempts,
            duration_secs: n.duration.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFilter {
    pub check_id: Option<Uuid>,
    pub check_status: Option<Status>,
    pub channel_kind: Option<ChannelKind>,
    pub limit: Option<usize>,
}

// ── Flips ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct FlipRow {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub processed: Option<DateTime<Utc>>,
    pub check_id: Uuid,
    pub old_status: Status,
    pub new_status: Status,
    pub reason: FlipReason,
}

impl From<&Flip> for FlipRow {
    fn from(f: &Flip) -> Self {
        Self {
            id: f.id,
            created: f.created,
            processed: f.processed,
            check_id: f.check_id,
            old_status: f.old_status,
            new_status: f.new_status,
            reason: f.reason,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlipFilter {
    pub check_id: Option<Uuid>,
    pub limit: Option<usize>,
}

// ── Pings ─────────────────────────────────────────────────────

/// A ping without its body.
#[derive(Debug, Clone, Serialize)]
pub struct PingRow {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub check_id: Uuid,
    pub kind: PingKind,
    pub scheme: String,
    pub method: String,
    pub object_size: usize,
    pub has_body: bool,
    pub ua: Option<String>,
}

impl From<&Ping> for PingRow {
    fn from(p: &Ping) -> Self {
        Self {
            id: p.id,
            created: p.created,
            check_id: p.check_id,
            kind: p.kind,
            scheme: p.scheme.clone(),
            method: p.method.clone(),
            object_size: p.object_size(),
            has_body: p.has_body(),
            ua: p.user_agent.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PingFilter {
    pub check_id: Option<Uuid>,
    pub scheme: Option<String>,
    pub method: Option<String>,
    pub kind: Option<PingKind>,
    pub limit: Option<usize>,
}

// ── Queries ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct Reporting {
    store: Arc<dyn Store>,
}

impl Reporting {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn checks(&self, filter: &CheckFilter) -> Result<Vec<CheckRow>, StoreError> {
        let mut checks = self.store.list_checks().await?;
        checks.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(checks.iter().filter(|c| filter.matches(c)).map(CheckRow::from).collect())
    }

    pub async fn check(&self, id: Uuid) -> Result<CheckRow, StoreError> {
        Ok(CheckRow::from(&self.store.get_check(id).await?))
    }

    pub async fn channels(&self, filter: &ChannelFilter) -> Result<Vec<ChannelRow>, StoreError> {
        let mut channels = self.store.list_channels().await?;
        channels.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(channels.iter().filter(|c| filter.matches(c)).map(ChannelRow::from).collect())
    }

    pub async fn notifications(&self, filter: &NotificationFilter) -> Result<Vec<NotificationRow>, StoreError> {
        let query = NotificationQuery {
            check_id: filter.check_id,
            flip_id: None,
            check_status: filter.check_status,
            channel_kind: filter.channel_kind,
            limit: filter.limit,
        };
        let rows = self.store.list_notifications(&query).await?;
        let channels: HashMap<Uuid, Channel> = self
            .store
            .list_channels()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        Ok(rows
            .iter()
            .map(|n| NotificationRow::new(n, channels.get(&n.channel_id)))
            .collect())
    }

    pub async fn flips(&self, filter: &FlipFilter) -> Result<Vec<FlipRow>, StoreError> {
        let flips = self
            .store
            .list_flips(filter.check_id, filter.limit.unwrap_or(DEFAULT_LIMIT))
            .await?;
        Ok(flips.iter().map(FlipRow::from).collect())
    }

    pub async fn pings(&self, filter: &PingFilter) -> Result<Vec<PingRow>, StoreError> {
        let query = PingQuery {
            check_id: filter.check_id,
            scheme: filter.scheme.clone(),
            method: filter.method.clone(),
            kind: filter.kind,
            limit: filter.limit,
        };
        Ok(self.store.list_pings(&query).await?.iter().map(PingRow::from).collect())
    }
}
