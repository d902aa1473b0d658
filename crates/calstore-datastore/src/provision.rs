//! Insert-or-fetch for logically unique entities.
//!
//! Provisioning first looks the key up without locking. On a miss it takes
//! the exclusive row lock of the key and looks again: a concurrent
//! transaction that inserted the same key held that lock until it committed,
//! so the second lookup sees its row, and the lock is released at once.
//! Otherwise the row is inserted and the lock stays with the uncommitted row
//! until commit or abort. Transactions working on other keys never wait.

use calstore_types::ResourceId;
use tracing::{debug, warn};

use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{LockKey, LockMode};
use crate::tables::{ChangeSet, Tables};
use crate::transaction::Transaction;

/// Parent whose existence a new row depends on.
pub(crate) struct Parent {
    pub id: ResourceId,
    pub kind: &'static str,
}

pub(crate) async fn provision<T, L, I>(
    txn: &mut Transaction,
    key: LockKey,
    parent: Option<Parent>,
    lookup: L,
    insert: I,
) -> DataStoreResult<T>
where
    L: Fn(&Tables<'_>, &ChangeSet) -> Option<T>,
    I: FnOnce(&Tables<'_>, &mut ChangeSet, ResourceId) -> DataStoreResult<T>,
{
    if let Some(found) = txn.read(&lookup)? {
        return Ok(found);
    }

    let newly_locked = txn.lock(key.clone(), LockMode::Exclusive).await?;
    if let Some(found) = txn.read(&lookup)? {
        if newly_locked {
            txn.release(&key);
        }
        debug!(txn = txn.id(), %key, "found row provisioned concurrently");
        return Ok(found);
    }

    if let Some(parent) = parent {
        txn.lock(LockKey::Resource(parent.id), LockMode::Shared).await?;
        let live = txn.read(|t, c| c.resources.get(&t.resources, &parent.id).is_some())?;
        if !live {
            return Err(DataStoreError::not_found(parent.kind, parent.id.to_string()));
        }
    }

    let id = txn.allocate_id();
    match txn.write(|t, c| insert(t, c, id)) {
        Ok(row) => {
            debug!(txn = txn.id(), %key, resource_id = %id, "provisioned");
            Ok(row)
        }
        Err(DataStoreError::ConstraintRace { key: raced }) => {
            warn!(txn = txn.id(), key = %raced, "uniqueness race during provisioning; re-reading");
            match txn.read(&lookup)? {
                Some(found) => Ok(found),
                None => txn.fail(DataStoreError::Conflict {
                    resource: key.to_string(),
                    reason: "row vanished after uniqueness race".into(),
                }),
            }
        }
        Err(e) => Err(e),
    }
}
