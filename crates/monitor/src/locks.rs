//! Per-check mutual exclusion within one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Entries are pruned once the map grows past this many idle locks.
const PRUNE_THRESHOLD: usize = 1024;

/// Async mutex per check id, created on first use.
///
/// Different checks never contend; writes to one check are serialized.
#[derive(Default)]
pub struct CheckLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl CheckLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `check_id`.
    pub async fn acquire(&self, check_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(check_id).or_default())
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
