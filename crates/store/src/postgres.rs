//! PostgreSQL [`Store`] on `sqlx`.
//!
//! Multi-row writes run in a transaction. Check writes are compare-and-swap
//! on the `version` column, flip leases are a conditional `UPDATE`, so
//! several worker processes can share one database.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use deadman_core::config::PostgresConfig;
use deadman_core::{Channel, Check, Flip, KeywordFilter, Notification, Ping};

use crate::{DispatchCommit, NotificationQuery, PingQuery, Store, StoreError, DEFAULT_LIMIT};

const CHECK_COLUMNS: &str = "id, name, tags, kind, timeout_ms, schedule, tz, grace_ms, manual_resume, \
     filter_subject, filter_body, success_kw, failure_kw, start_kw, status, status_computed_at, \
     paused, last_ping, last_ping_failed, last_start, n_pings, created, version";

const FLIP_COLUMNS: &str = "id, check_id, created, old_status, new_status, reason, processed, claimed_until";

const CHANNEL_COLUMNS: &str = "c.id, c.name, c.kind, c.value, c.email_verified, c.disabled, c.last_error, \
     c.last_notify, c.last_notify_duration_ms, c.consecutive_failures, c.created, \
     COALESCE(ARRAY(SELECT cc.check_id FROM channel_checks cc WHERE cc.channel_id = c.id), '{}') AS checks";

// ── Row types ────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct CheckRow {
    id: Uuid,
    name: String,
    tags: Vec<String>,
    kind: String,
    timeout_ms: i64,
    schedule: String,
    tz: String,
    grace_ms: i64,
    manual_resume: bool,
    filter_subject: bool,
    filter_body: bool,
    success_kw: String,
    failure_kw: String,
    start_kw: String,
    status: String,
    status_computed_at: Option<DateTime<Utc>>,
    paused: bool,
    last_ping: Option<DateTime<Utc>>,
    last_ping_failed: bool,
    last_start: Option<DateTime<Utc>>,
    n_pings: i64,
    created: DateTime<Utc>,
    version: i64,
}

impl TryFrom<CheckRow> for Check {
    type Error = StoreError;

    fn try_from(r: CheckRow) -> Result<Self, Self::Error> {
        Ok(Check {
            id: r.id,
            name: r.name,
            tags: r.tags,
            kind: r.kind.parse().map_err(corrupt)?,
            timeout: millis_to_duration(r.timeout_ms),
            schedule: r.schedule,
            tz: r.tz,
            grace: millis_to_duration(r.grace_ms),
            manual_resume: r.manual_resume,
            filter: KeywordFilter {
                filter_subject: r.filter_subject,
                filter_body: r.filter_body,
                success_kw: r.success_kw,
                failure_kw: r.failure_kw,
                start_kw: r.start_kw,
            },
            status: r.status.parse().map_err(corrupt)?,
            status_computed_at: r.status_computed_at,
            paused: r.paused,
            last_ping: r.last_ping,
            last_ping_failed: r.last_ping_failed,
            last_start: r.last_start,
            n_pings: r.n_pings.max(0) as u64,
            created: r.created,
            version: r.version.max(0) as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PingRow {
    id: Uuid,
    check_id: Uuid,
    created: DateTime<Utc>,
    kind: String,
    scheme: String,
    method: String,
    subject: Option<String>,
    body: Option<String>,
    user_agent: Option<String>,
    remote_addr: Option<String>,
}

impl TryFrom<PingRow> for Ping {
    type Error = StoreError;

    fn try_from(r: PingRow) -> Result<Self, Self::Error> {
        Ok(Ping {
            id: r.id,
            check_id: r.check_id,
            created: r.created,
            kind: r.kind.parse().map_err(corrupt)?,
            scheme: r.scheme,
            method: r.method,
            subject: r.subject,
            body: r.body,
            user_agent: r.user_agent,
            remote_addr: r.remote_addr,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FlipRow {
    id: Uuid,
    check_id: Uuid,
    created: DateTime<Utc>,
    old_status: String,
    new_status: String,
    reason: String,
    processed: Option<DateTime<Utc>>,
    claimed_until: Option<DateTime<Utc>>,
}

impl TryFrom<FlipRow> for Flip {
    type Error = StoreError;

    fn try_from(r: FlipRow) -> Result<Self, Self::Error> {
        Ok(Flip {
            id: r.id,
            check_id: r.check_id,
            created: r.created,
            old_status: r.old_status.parse().map_err(corrupt)?,
            new_status: r.new_status.parse().map_err(corrupt)?,
            reason: r.reason.parse().map_err(corrupt)?,
            processed: r.processed,
            claimed_until: r.claimed_until,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: Uuid,
    name: String,
    kind: String,
    value: String,
    email_verified: bool,
    disabled: bool,
    last_error: String,
    last_notify: Option<DateTime<Utc>>,
    last_notify_duration_ms: Option<i64>,
    consecutive_failures: i32,
    created: DateTime<Utc>,
    checks: Vec<Uuid>,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = StoreError;

    fn try_from(r: ChannelRow) -> Result<Self, Self::Error> {
        Ok(Channel {
            id: r.id,
            name: r.name,
            kind: r.kind.parse().map_err(corrupt)?,
            value: r.value,
            email_verified: r.email_verified,
            disabled: r.disabled,
            last_error: r.last_error,
            last_notify: r.last_notify,
            last_notify_duration: r.last_notify_duration_ms.map(millis_to_duration),
            consecutive_failures: r.consecutive_failures.max(0) as u32,
            created: r.created,
            checks: r.checks.into_iter().collect(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    check_id: Uuid,
    flip_id: Uuid,
    channel_id: Uuid,
    created: DateTime<Utc>,
    check_status: String,
    error: String,
    duration_ms: i64,
    attempts: i32,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(r: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: r.id,
            check_id: r.check_id,
            flip_id: r.flip_id,
            channel_id: r.channel_id,
            created: r.created,
            check_status: r.check_status.parse().map_err(corrupt)?,
            error: r.error,
            duration: millis_to_duration(r.duration_ms),
            attempts: r.attempts.max(0) as u32,
        })
    }
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn millis_to_duration(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

fn duration_to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn limit_of(limit: Option<usize>) -> i64 {
    i64::try_from(limit.unwrap_or(DEFAULT_LIMIT)).unwrap_or(i64::MAX)
}

/// Insert a ping, guarded on its check existing.
fn insert_ping(ping: &Ping) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        "INSERT INTO pings (id, check_id, created, kind, scheme, method, subject, body, user_agent, remote_addr) \
         SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10 \
         WHERE EXISTS (SELECT 1 FROM checks WHERE id = $2)",
    )
    .bind(ping.id)
    .bind(ping.check_id)
    .bind(ping.created)
    .bind(ping.kind.as_str())
    .bind(&ping.scheme)
    .bind(&ping.method)
    .bind(&ping.subject)
    .bind(&ping.body)
    .bind(&ping.user_agent)
    .bind(&ping.remote_addr)
}

// ── Store ────────────────────────────────────────────────────────────

/// PostgreSQL-backed store sharing a connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply the bundled migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!(host = %config.host, db = %config.database, "PostgreSQL connected, migrations applied");
        Ok(Self { pool })
    }

    async fn fetch_flip(&self, id: Uuid) -> Result<Flip, StoreError> {
        let sql = format!("SELECT {FLIP_COLUMNS} FROM flips WHERE id = $1");
        sqlx::query_as::<_, FlipRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("flip", id))?
            .try_into()
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn insert_check(&self, check: &Check) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO checks (id, name, tags, kind, timeout_ms, schedule, tz, grace_ms, manual_resume, \
                filter_subject, filter_body, success_kw, failure_kw, start_kw, status, status_computed_at, \
                paused, last_ping, last_ping_failed, last_start, n_pings, created, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                $17, $18, $19, $20, $21, $22, $23) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(check.id)
        .bind(&check.name)
        .bind(&check.tags)
        .bind(check.kind.as_str())
        .bind(duration_to_millis(check.timeout))
        .bind(&check.schedule)
        .bind(&check.tz)
        .bind(duration_to_millis(check.grace))
        .bind(check.manual_resume)
        .bind(check.filter.filter_subject)
        .bind(check.filter.filter_body)
        .bind(&check.filter.success_kw)
        .bind(&check.filter.failure_kw)
        .bind(&check.filter.start_kw)
        .bind(check.status.as_str())
        .bind(check.status_computed_at)
        .bind(check.paused)
        .bind(check.last_ping)
        .bind(check.last_ping_failed)
        .bind(check.last_start)
        .bind(check.n_pings as i64)
        .bind(check.created)
        .bind(check.version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate { entity: "check", id: check.id });
        }
        Ok(())
    }

    async fn get_check(&self, id: Uuid) -> Result<Check, StoreError> {
        let sql = format!("SELECT {CHECK_COLUMNS} FROM checks WHERE id = $1");
        sqlx::query_as::<_, CheckRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("check", id))?
            .try_into()
    }

    async fn list_checks(&self) -> Result<Vec<Check>, StoreError> {
        let sql = format!("SELECT {CHECK_COLUMNS} FROM checks ORDER BY created");
        let rows = sqlx::query_as::<_, CheckRow>(&sql).fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn update_check(
        &self,
        check: &Check,
        flip: Option<&Flip>,
        ping: Option<&Ping>,
    ) -> Result<Check, StoreError> {
        let mut tx = self.pool.begin().await?;

        let found: Option<i64> = sqlx::query_scalar("SELECT version FROM checks WHERE id = $1 FOR UPDATE")
            .bind(check.id)
            .fetch_optional(&mut *tx)
            .await?;
        let found = found.ok_or_else(|| StoreError::not_found("check", check.id))?;
        if found as u64 != check.version {
            return Err(StoreError::Conflict {
                check_id: check.id,
                expected: check.version,
                found: found as u64,
            });
        }

        if let Some(flip) = flip {
            let latest: Option<DateTime<Utc>> =
                sqlx::query_scalar("SELECT MAX(created) FROM flips WHERE check_id = $1")
                    .bind(check.id)
                    .fetch_one(&mut *tx)
                    .await?;
            if let Some(latest) = latest {
                if flip.created <= latest {
                    return Err(StoreError::Ordering {
                        check_id: check.id,
                        created: flip.created,
                        latest,
                    });
                }
            }
        }

        sqlx::query(
            "UPDATE checks SET name = $2, tags = $3, kind = $4, timeout_ms = $5, schedule = $6, tz = $7, \
                grace_ms = $8, manual_resume = $9, filter_subject = $10, filter_body = $11, \
                success_kw = $12, failure_kw = $13, start_kw = $14, status = $15, \
                status_computed_at = $16, paused = $17, last_ping = $18, last_ping_failed = $19, \
                last_start = $20, n_pings = $21, version = version + 1 \
             WHERE id = $1",
        )
        .bind(check.id)
        .bind(&check.name)
        .bind(&check.tags)
        .bind(check.kind.as_str())
        .bind(duration_to_millis(check.timeout))
        .bind(&check.schedule)
        .bind(&check.tz)
        .bind(duration_to_millis(check.grace))
        .bind(check.manual_resume)
        .bind(check.filter.filter_subject)
        .bind(check.filter.filter_body)
        .bind(&check.filter.success_kw)
        .bind(&check.filter.failure_kw)
        .bind(&check.filter.start_kw)
        .bind(check.status.as_str())
        .bind(check.status_computed_at)
        .bind(check.paused)
        .bind(check.last_ping)
        .bind(check.last_ping_failed)
        .bind(check.last_start)
        .bind(check.n_pings as i64)
        .execute(&mut *tx)
        .await?;

        if let Some(flip) = flip {
            sqlx::query(
                "INSERT INTO flips (id, check_id, created, old_status, new_status, reason, processed, claimed_until) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(flip.id)
            .bind(flip.check_id)
            .bind(flip.created)
            .bind(flip.old_status.as_str())
            .bind(flip.new_status.as_str())
            .bind(flip.reason.as_str())
            .bind(flip.processed)
            .bind(flip.claimed_until)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(ping) = ping {
            insert_ping(ping).execute(&mut *tx).await?;
        }

        tx.commit().await?;

        let mut updated = check.clone();
        updated.version += 1;
        Ok(updated)
    }

    async fn append_ping(&self, ping: &Ping) -> Result<(), StoreError> {
        let result = insert_ping(ping).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("check", ping.check_id));
        }
        Ok(())
    }

    async fn list_pings(&self, query: &PingQuery) -> Result<Vec<Ping>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, check_id, created, kind, scheme, method, subject, body, user_agent, remote_addr \
             FROM pings WHERE TRUE",
        );
        if let Some(id) = query.check_id {
            qb.push(" AND check_id = ").push_bind(id);
        }
        if let Some(scheme) = &query.scheme {
            qb.push(" AND scheme = ").push_bind(scheme.clone());
        }
        if let Some(method) = &query.method {
            qb.push(" AND method = ").push_bind(method.clone());
        }
        if let Some(kind) = query.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        qb.push(" ORDER BY created DESC LIMIT ").push_bind(limit_of(query.limit));

        let rows = qb.build_query_as::<PingRow>().fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn get_flip(&self, id: Uuid) -> Result<Flip, StoreError> {
        self.fetch_flip(id).await
    }

    async fn latest_flip(&self, check_id: Uuid) -> Result<Option<Flip>, StoreError> {
        let sql = format!("SELECT {FLIP_COLUMNS} FROM flips WHERE check_id = $1 ORDER BY created DESC LIMIT 1");
        sqlx::query_as::<_, FlipRow>(&sql)
            .bind(check_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Flip::try_from)
            .transpose()
    }

    async fn list_flips(&self, check_id: Option<Uuid>, limit: usize) -> Result<Vec<Flip>, StoreError> {
        let sql = format!(
            "SELECT {FLIP_COLUMNS} FROM flips WHERE ($1::uuid IS NULL OR check_id = $1) \
             ORDER BY created DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, FlipRow>(&sql)
            .bind(check_id)
            .bind(limit_of(Some(limit)))
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn unprocessed_flips(&self, created_before: DateTime<Utc>) -> Result<Vec<Flip>, StoreError> {
        let sql = format!(
            "SELECT {FLIP_COLUMNS} FROM flips WHERE processed IS NULL AND created < $1 ORDER BY created"
        );
        let rows = sqlx::query_as::<_, FlipRow>(&sql)
            .bind(created_before)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn claim_flip(&self, id: Uuid, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE flips SET claimed_until = $3 \
             WHERE id = $1 AND (claimed_until IS NULL OR claimed_until <= $2)",
        )
        .bind(id)
        .bind(now)
        .bind(until)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "held by someone else" from "no such flip".
        self.fetch_flip(id).await?;
        Ok(false)
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO channels (id, name, kind, value, email_verified, disabled, last_error, last_notify, \
                last_notify_duration_ms, consecutive_failures, created) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(channel.id)
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .bind(&channel.value)
        .bind(channel.email_verified)
        .bind(channel.disabled)
        .bind(&channel.last_error)
        .bind(channel.last_notify)
        .bind(channel.last_notify_duration.map(duration_to_millis))
        .bind(channel.consecutive_failures as i32)
        .bind(channel.created)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate { entity: "channel", id: channel.id });
        }

        for check_id in &channel.checks {
            sqlx::query("INSERT INTO channel_checks (channel_id, check_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(channel.id)
                .bind(check_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_channel(&self, id: Uuid) -> Result<Channel, StoreError> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels c WHERE c.id = $1");
        sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("channel", id))?
            .try_into()
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels c ORDER BY c.created");
        let rows = sqlx::query_as::<_, ChannelRow>(&sql).fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn channels_for_check(&self, check_id: Uuid) -> Result<Vec<Channel>, StoreError> {
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels c \
             JOIN channel_checks s ON s.channel_id = c.id \
             WHERE s.check_id = $1 ORDER BY c.created"
        );
        let rows = sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(check_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn subscribe(&self, channel_id: Uuid, check_id: Uuid) -> Result<(), StoreError> {
        self.get_channel(channel_id).await?;
        self.get_check(check_id).await?;
        sqlx::query("INSERT INTO channel_checks (channel_id, check_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(channel_id)
            .bind(check_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_channel_disabled(&self, channel_id: Uuid, disabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE channels SET disabled = $2 WHERE id = $1")
            .bind(channel_id)
            .bind(disabled)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("channel", channel_id));
        }
        Ok(())
    }

    async fn commit_dispatch(&self, commit: &DispatchCommit) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for row in &commit.notifications {
            sqlx::query(
                "INSERT INTO notifications (id, check_id, flip_id, channel_id, created, check_status, error, \
                    duration_ms, attempts) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(row.id)
            .bind(row.check_id)
            .bind(row.flip_id)
            .bind(row.channel_id)
            .bind(row.created)
            .bind(row.check_status.as_str())
            .bind(&row.error)
            .bind(duration_to_millis(row.duration))
            .bind(row.attempts as i32)
            .execute(&mut *tx)
            .await?;
        }

        for update in &commit.health {
            // Last writer wins: an attempt older than the recorded one is dropped.
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM channels WHERE id = $1")
                .bind(update.channel_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(StoreError::not_found("channel", update.channel_id));
            }
            sqlx::query(
                "UPDATE channels SET last_notify = $2, last_notify_duration_ms = $3, last_error = $4, \
                    consecutive_failures = CASE WHEN $4 = '' THEN 0 ELSE consecutive_failures + 1 END \
                 WHERE id = $1 AND (last_notify IS NULL OR last_notify <= $2)",
            )
            .bind(update.channel_id)
            .bind(update.at)
            .bind(duration_to_millis(update.duration))
            .bind(&update.error)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            "UPDATE flips SET processed = COALESCE(processed, $2), \
                claimed_until = CASE WHEN claimed_until IS NOT DISTINCT FROM $3 THEN NULL ELSE claimed_until END \
             WHERE id = $1",
        )
        .bind(commit.flip_id)
        .bind(commit.processed_at)
        .bind(commit.lease)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("flip", commit.flip_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT n.id, n.check_id, n.flip_id, n.channel_id, n.created, n.check_status, n.error, \
                n.duration_ms, n.attempts \
             FROM notifications n JOIN channels c ON c.id = n.channel_id WHERE TRUE",
        );
        if let Some(id) = query.check_id {
            qb.push(" AND n.check_id = ").push_bind(id);
        }
        if let Some(id) = query.flip_id {
            qb.push(" AND n.flip_id = ").push_bind(id);
        }
        if let Some(status) = query.check_status {
            qb.push(" AND n.check_status = ").push_bind(status.as_str());
        }
        if let Some(kind) = query.channel_kind {
            qb.push(" AND c.kind = ").push_bind(kind.as_str());
        }
        qb.push(" ORDER BY n.created DESC LIMIT ").push_bind(limit_of(query.limit));

        let rows = qb.build_query_as::<NotificationRow>().fetch_all(&self.pool).await?;
        collect(rows)
    }
}
