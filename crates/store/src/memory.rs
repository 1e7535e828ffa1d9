//! In-memory [`Store`] backed by a single `std::sync::RwLock`.
//!
//! Every trait method takes the lock once and never holds it across an
//! `.await`, so each operation is atomic with respect to the others.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use deadman_core::{Channel, Check, Flip, Notification, Ping};

use crate::{DispatchCommit, NotificationQuery, PingQuery, Store, StoreError, DEFAULT_LIMIT};

#[derive(Default)]
struct Inner {
    checks: HashMap<Uuid, Check>,
    pings: Vec<Ping>,
    /// Append order; per-check order is enforced on insert.
    flips: Vec<Flip>,
    channels: HashMap<Uuid, Channel>,
    notifications: Vec<Notification>,
}

impl Inner {
    fn flip_mut(&mut self, id: Uuid) -> Result<&mut Flip, StoreError> {
        self.flips
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::not_found("flip", id))
    }

    fn latest_flip(&self, check_id: Uuid) -> Option<&Flip> {
        self.flips
            .iter()
            .filter(|f| f.check_id == check_id)
            .max_by_key(|f| f.created)
    }
}

/// Process-local store, used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn insert_check(&self, check: &Check) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if inner.checks.contains_key(&check.id) {
            return Err(StoreError::Duplicate { entity: "check", id: check.id });
        }
        inner.checks.insert(check.id, check.clone());
        Ok(())
    }

    async fn get_check(&self, id: Uuid) -> Result<Check, StoreError> {
        self.read()?
            .checks
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("check", id))
    }

    async fn list_checks(&self) -> Result<Vec<Check>, StoreError> {
        let inner = self.read()?;
        let mut checks: Vec<Check> = inner.checks.values().cloned().collect();
        checks.sort_by_key(|c| c.created);
        Ok(checks)
    }

    async fn update_check(
        &self,
        check: &Check,
        flip: Option<&Flip>,
        ping: Option<&Ping>,
    ) -> Result<Check, StoreError> {
        let mut inner = self.write()?;

        let stored = inner
            .checks
            .get(&check.id)
            .ok_or_else(|| StoreError::not_found("check", check.id))?;
        if stored.version != check.version {
            return Err(StoreError::Conflict {
                check_id: check.id,
                expected: check.version,
                found: stored.version,
            });
        }

        if let Some(flip) = flip {
            if let Some(latest) = inner.latest_flip(check.id) {
                if flip.created <= latest.created {
                    return Err(StoreError::Ordering {
                        check_id: check.id,
                        created: flip.created,
                        latest: latest.created,
                    });
                }
            }
        }

        let mut updated = check.clone();
        updated.version += 1;
        inner.checks.insert(updated.id, updated.clone());
        if let Some(flip) = flip {
            inner.flips.push(flip.clone());
        }
        if let Some(ping) = ping {
            inner.pings.push(ping.clone());
        }
        Ok(updated)
    }

    async fn append_ping(&self, ping: &Ping) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if !inner.checks.contains_key(&ping.check_id) {
            return Err(StoreError::not_found("check", ping.check_id));
        }
        inner.pings.push(ping.clone());
        Ok(())
    }

    async fn list_pings(&self, query: &PingQuery) -> Result<Vec<Ping>, StoreError> {
        let inner = self.read()?;
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        let mut pings: Vec<Ping> = inner
            .pings
            .iter()
            .filter(|p| query.check_id.map_or(true, |id| p.check_id == id))
            .filter(|p| query.scheme.as_ref().map_or(true, |s| &p.scheme == s))
            .filter(|p| query.method.as_ref().map_or(true, |m| &p.method == m))
            .filter(|p| query.kind.map_or(true, |k| p.kind == k))
            .cloned()
            .collect();
        pings.sort_by(|a, b| b.created.cmp(&a.created));
        pings.truncate(limit);
        Ok(pings)
    }

    async fn get_flip(&self, id: Uuid) -> Result<Flip, StoreError> {
        self.read()?
            .flips
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("flip", id))
    }

    async fn latest_flip(&self, check_id: Uuid) -> Result<Option<Flip>, StoreError> {
        Ok(self.read()?.latest_flip(check_id).cloned())
    }

    async fn list_flips(&self, check_id: Option<Uuid>, limit: usize) -> Result<Vec<Flip>, StoreError> {
        let inner = self.read()?;
        let mut flips: Vec<Flip> = inner
            .flips
            .iter()
            .filter(|f| check_id.map_or(true, |id| f.check_id == id))
            .cloned()
            .collect();
        flips.sort_by(|a, b| b.created.cmp(&a.created));
        flips.truncate(limit);
        Ok(flips)
    }

    async fn unprocessed_flips(&self, created_before: DateTime<Utc>) -> Result<Vec<Flip>, StoreError> {
        let inner = self.read()?;
        let mut flips: Vec<Flip> = inner
            .flips
            .iter()
            .filter(|f| !f.is_processed() && f.created < created_before)
            .cloned()
            .collect();
        flips.sort_by_key(|f| f.created);
        Ok(flips)
    }

    async fn claim_flip(&self, id: Uuid, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let flip = inner.flip_mut(id)?;
        if flip.is_claimed(now) {
            return Ok(false);
        }
        flip.claimed_until = Some(until);
        Ok(true)
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if inner.channels.contains_key(&channel.id) {
            return Err(StoreError::Duplicate { entity: "channel", id: channel.id });
        }
        inner.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn get_channel(&self, id: Uuid) -> Result<Channel, StoreError> {
        self.read()?
            .channels
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("channel", id))
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let inner = self.read()?;
        let mut channels: Vec<Channel> = inner.channels.values().cloned().collect();
        channels.sort_by_key(|c| c.created);
        Ok(channels)
    }

    async fn channels_for_check(&self, check_id: Uuid) -> Result<Vec<Channel>, StoreError> {
        let inner = self.read()?;
        let mut channels: Vec<Channel> = inner
            .channels
            .values()
            .filter(|c| c.is_subscribed(check_id))
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.created);
        Ok(channels)
    }

    async fn subscribe(&self, channel_id: Uuid, check_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if !inner.checks.contains_key(&check_id) {
            return Err(StoreError::not_found("check", check_id));
        }
        inner
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| StoreError::not_found("channel", channel_id))?
            .subscribe(check_id);
        Ok(())
    }

    async fn set_channel_disabled(&self, channel_id: Uuid, disabled: bool) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| StoreError::not_found("channel", channel_id))?
            .disabled = disabled;
        Ok(())
    }

    async fn commit_dispatch(&self, commit: &DispatchCommit) -> Result<(), StoreError> {
        let mut inner = self.write()?;

        // Validate everything before touching anything.
        inner.flip_mut(commit.flip_id)?;
        for update in &commit.health {
            if !inner.channels.contains_key(&update.channel_id) {
                return Err(StoreError::not_found("channel", update.channel_id));
            }
        }

        for update in &commit.health {
            if let Some(channel) = inner.channels.get_mut(&update.channel_id) {
                channel.apply_health(update);
            }
        }
        inner.notifications.extend(commit.notifications.iter().cloned());

        let flip = inner.flip_mut(commit.flip_id)?;
        if flip.processed.is_none() {
            flip.processed = Some(commit.processed_at);
        }
        if flip.claimed_until == commit.lease {
            flip.claimed_until = None;
        }
        Ok(())
    }

    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>, StoreError> {
        let inner = self.read()?;
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        let mut rows: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| query.check_id.map_or(true, |id| n.check_id == id))
            .filter(|n| query.flip_id.map_or(true, |id| n.flip_id == id))
            .filter(|n| query.check_status.map_or(true, |s| n.check_status == s))
            .filter(|n| {
                query.channel_kind.map_or(true, |kind| {
                    inner.channels.get(&n.channel_id).is_some_and(|c| c.kind == kind)
                })
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created.cmp(&a.created));
        rows.truncate(limit);
        Ok(rows)
    }
}
