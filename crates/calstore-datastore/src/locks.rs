//! Row lock manager.
//!
//! Every write takes a lock on the logical key of the row it touches and
//! holds it until its transaction commits or aborts. Locks are per key, so
//! transactions touching different rows never wait on each other, and reads
//! take no locks at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calstore_types::{PropertyKey, ResourceId};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

use crate::error::{DataStoreError, DataStoreResult};

/// Entries above this count trigger a sweep of idle locks.
const PRUNE_THRESHOLD: usize = 1024;

/// Logical key a row lock is taken on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum LockKey {
    Home(String),
    Notifications(String),
    Calendar(ResourceId, String),
    Object(ResourceId, String),
    /// A component UID within one calendar.
    ObjectUid(ResourceId, String),
    Notification(ResourceId, String),
    Attachment(ResourceId, String),
    Share(ResourceId, String),
    Property(ResourceId, PropertyKey),
    /// Existence of a resource. Shared by writers of its children and
    /// properties, exclusive for its removal.
    Resource(ResourceId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home(uid) => write!(f, "home {uid}"),
            Self::Notifications(uid) => write!(f, "notifications {uid}"),
            Self::Calendar(home, name) => write!(f, "calendar {home}/{name}"),
            Self::Object(cal, name) => write!(f, "calendar object {cal}/{name}"),
            Self::ObjectUid(cal, uid) => write!(f, "component UID {cal}/{uid}"),
            Self::Notification(coll, name) => write!(f, "notification {coll}/{name}"),
            Self::Attachment(obj, name) => write!(f, "attachment {obj}/{name}"),
            Self::Share(home, uid) => write!(f, "share {home}/{uid}"),
            Self::Property(id, key) => write!(f, "property {id}/{}", key.name),
            Self::Resource(id) => write!(f, "resource {id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

/// A lock held by a transaction.
pub(crate) enum HeldLock {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

impl HeldLock {
    pub fn mode(&self) -> LockMode {
        match self {
            Self::Shared(_) => LockMode::Shared,
            Self::Exclusive(_) => LockMode::Exclusive,
        }
    }

    /// Whether holding this lock satisfies a request for `mode`.
    pub fn covers(&self, mode: LockMode) -> bool {
        self.mode() == LockMode::Exclusive || mode == LockMode::Shared
    }
}

/// Table of per-key locks shared by every transaction of a store.
#[derive(Default)]
pub(crate) struct LockManager {
    locks: Mutex<HashMap<LockKey, Arc<RwLock<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &LockKey) -> DataStoreResult<Arc<RwLock<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| DataStoreError::StorageUnavailable(format!("lock table poisoned: {e}")))?;
        if locks.len() > PRUNE_THRESHOLD {
            // Guards and waiters hold their own clone of the slot.
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        Ok(locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone())
    }

    /// Wait up to `timeout` for `key` in `mode`.
    pub async fn acquire(
        &self,
        key: &LockKey,
        mode: LockMode,
        timeout: Duration,
    ) -> DataStoreResult<HeldLock> {
        let slot = self.slot(key)?;
        let held = match mode {
            LockMode::Shared => tokio::time::timeout(timeout, slot.read_owned())
                .await
                .map(HeldLock::Shared),
            LockMode::Exclusive => tokio::time::timeout(timeout, slot.write_owned())
                .await
                .map(HeldLock::Exclusive),
        };
        held.map_err(|_| {
            debug!(%key, ?mode, "row lock wait timed out");
            DataStoreError::Conflict {
                resource: key.to_string(),
                reason: format!("lock wait exceeded {}ms", timeout.as_millis()),
            }
        })
    }

    /// Number of tracked keys, held or idle.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn exclusive_blocks_same_key_only() {
        let locks = LockManager::new();
        let home = LockKey::Home("uid1".into());
        let _held = locks.acquire(&home, LockMode::Exclusive, WAIT).await.unwrap();

        let other = LockKey::Home("uid2".into());
        assert!(locks.acquire(&other, LockMode::Exclusive, WAIT).await.is_ok());

        let err = locks.acquire(&home, LockMode::Shared, WAIT).await.err().unwrap();
        assert!(matches!(err, DataStoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn shared_locks_coexist() {
        let locks = LockManager::new();
        let key = LockKey::Resource(ResourceId::new(9));
        let _a = locks.acquire(&key, LockMode::Shared, WAIT).await.unwrap();
        let _b = locks.acquire(&key, LockMode::Shared, WAIT).await.unwrap();
        assert!(locks.acquire(&key, LockMode::Exclusive, WAIT).await.is_err());
    }

    #[tokio::test]
    async fn released_lock_can_be_retaken() {
        let locks = LockManager::new();
        let key = LockKey::Calendar(ResourceId::new(1), "work".into());
        let held = locks.acquire(&key, LockMode::Exclusive, WAIT).await.unwrap();
        drop(held);
        assert!(locks.acquire(&key, LockMode::Exclusive, WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let locks = Arc::new(LockManager::new());
        let key = LockKey::Home("uid1".into());
        let held = locks.acquire(&key, LockMode::Exclusive, WAIT).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                locks
                    .acquire(&key, LockMode::Exclusive, Duration::from_secs(5))
                    .await
                    .is_ok()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn idle_slots_are_pruned() {
        let locks = LockManager::new();
        for i in 0..(PRUNE_THRESHOLD + 10) {
            let key = LockKey::Home(format!("uid{i}"));
            drop(locks.acquire(&key, LockMode::Exclusive, WAIT).await.unwrap());
        }
        let _ = locks
            .acquire(&LockKey::Home("last".into()), LockMode::Shared, WAIT)
            .await
            .unwrap();
        assert!(locks.tracked() < PRUNE_THRESHOLD);
    }

    #[test]
    fn exclusive_covers_shared() {
        let slot = Arc::new(RwLock::new(()));
        let held = HeldLock::Exclusive(slot.clone().try_write_owned().unwrap());
        assert!(held.covers(LockMode::Shared));
        assert!(held.covers(LockMode::Exclusive));
        drop(held);
        let held = HeldLock::Shared(slot.try_read_owned().unwrap());
        assert!(held.covers(LockMode::Shared));
        assert!(!held.covers(LockMode::Exclusive));
    }
}
