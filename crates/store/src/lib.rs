//! Persistence for checks, pings, the flip log, channels and the
//! notification ledger.
//!
//! This crate provides:
//! - [`Store`], the async trait the engine and dispatcher write through
//! - [`MemoryStore`], an in-process implementation behind a `RwLock`
//! - [`PgStore`], a PostgreSQL implementation on `sqlx`
//!
//! Both implementations enforce the same invariants: compare-and-swap check
//! updates, strictly increasing flip timestamps per check, exclusive flip
//! leases, and an all-or-nothing dispatch commit.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use deadman_core::{
    Channel, ChannelKind, Check, Flip, HealthUpdate, Notification, Ping, PingKind, Status,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: Uuid },

    #[error("version conflict on check {check_id}: expected {expected}, found {found}")]
    Conflict {
        check_id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("flip for check {check_id} at {created} is not after the latest flip at {latest}")]
    Ordering {
        check_id: Uuid,
        created: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Whether retrying after reloading state may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Ordering { .. })
    }
}

/// Filters for listing pings, newest first.
#[derive(Debug, Clone, Default)]
pub struct PingQuery {
    pub check_id: Option<Uuid>,
    pub scheme: Option<String>,
    pub method: Option<String>,
    pub kind: Option<PingKind>,
    pub limit: Option<usize>,
}

/// Filters for listing ledger rows, newest first.
#[derive(Debug, Clone, Default)]
pub struct NotificationQuery {
    pub check_id: Option<Uuid>,
    pub flip_id: Option<Uuid>,
    pub check_status: Option<Status>,
    pub channel_kind: Option<ChannelKind>,
    pub limit: Option<usize>,
}

/// Everything a finished dispatch writes, applied atomically.
#[derive(Debug, Clone)]
pub struct DispatchCommit {
    pub flip_id: Uuid,
    pub notifications: Vec<Notification>,
    pub health: Vec<HealthUpdate>,
    pub processed_at: DateTime<Utc>,
    /// Expiry of the lease this dispatch took. The flip's lease is released
    /// only while it still carries this value; a lease taken over by another
    /// dispatch is left in place.
    pub lease: Option<DateTime<Utc>>,
}

/// Default page size when a query carries no limit.
pub const DEFAULT_LIMIT: usize = 100;

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ── Checks ───────────────────────────────────────────────

    async fn insert_check(&self, check: &Check) -> Result<(), StoreError>;

    async fn get_check(&self, id: Uuid) -> Result<Check, StoreError>;

    async fn list_checks(&self) -> Result<Vec<Check>, StoreError>;

    /// Compare-and-swap write of a check, optionally appending a flip and
    /// the ping that caused it. All of it is written or none of it.
    ///
    /// Succeeds only when the stored version equals `check.version`; the
    /// stored copy gets `version + 1`, which is returned. A flip must be
    /// strictly later than the check's latest flip.
    async fn update_check(&self, check: &Check, flip: Option<&Flip>, ping: Option<&Ping>)
        -> Result<Check, StoreError>;

    // ── Pings ────────────────────────────────────────────────

    async fn append_ping(&self, ping: &Ping) -> Result<(), StoreError>;

    async fn list_pings(&self, query: &PingQuery) -> Result<Vec<Ping>, StoreError>;

    // ── Flip log ─────────────────────────────────────────────

    async fn get_flip(&self, id: Uuid) -> Result<Flip, StoreError>;

    async fn latest_flip(&self, check_id: Uuid) -> Result<Option<Flip>, StoreError>;

    /// Flips newest first, optionally for one check.
    async fn list_flips(&self, check_id: Option<Uuid>, limit: usize) -> Result<Vec<Flip>, StoreError>;

    /// Unprocessed flips created before `created_before`, oldest first.
    async fn unprocessed_flips(&self, created_before: DateTime<Utc>) -> Result<Vec<Flip>, StoreError>;

    /// Take the dispatch lease on a flip until `until`.
    ///
    /// Returns `false` when another dispatch holds an unexpired lease.
    async fn claim_flip(&self, id: Uuid, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool, StoreError>;

    // ── Channels ─────────────────────────────────────────────

    async fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError>;

    async fn get_channel(&self, id: Uuid) -> Result<Channel, StoreError>;

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError>;

    /// Every channel subscribed to the check, disabled ones included.
    async fn channels_for_check(&self, check_id: Uuid) -> Result<Vec<Channel>, StoreError>;

    async fn subscribe(&self, channel_id: Uuid, check_id: Uuid) -> Result<(), StoreError>;

    async fn set_channel_disabled(&self, channel_id: Uuid, disabled: bool) -> Result<(), StoreError>;

    // ── Notification ledger ──────────────────────────────────

    /// Write ledger rows, fold health updates into channels (last writer
    /// wins), mark the flip processed and release its lease if still held,
    /// atomically.
    async fn commit_dispatch(&self, commit: &DispatchCommit) -> Result<(), StoreError>;

    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>, StoreError>;
}
