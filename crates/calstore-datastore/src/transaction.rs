//! Units of work.
//!
//! A [`Transaction`] reads committed rows overlaid with its own pending
//! writes, takes a row lock for every write, and publishes all of its writes
//! at once on [`Transaction::commit`]. Locks are released only after the
//! commit is applied, so a transaction waiting on a lock observes the
//! holder's committed rows once it proceeds.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use calstore_attach::{AttachmentStore, StagedAttachment};
use calstore_types::ResourceId;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};

use crate::component::ComponentParser;
use crate::directory::DirectoryService;
use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{HeldLock, LockKey, LockMode};
use crate::store::StoreInner;
use crate::tables::{ChangeSet, Tables};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxnState {
    Open,
    Committed,
    Aborted,
}

/// An attachment file scheduled for removal, by dropbox id and filename.
pub(crate) type AttachmentFile = (String, String);

pub struct Transaction {
    id: u64,
    store: Arc<StoreInner>,
    changes: ChangeSet,
    locks: HashMap<LockKey, HeldLock>,
    state: TxnState,
    /// Files of removed attachments, unlinked once the removal commits.
    unlink_after_commit: Vec<AttachmentFile>,
    /// Attachment content written by this transaction, moved into place
    /// once it commits and discarded otherwise.
    staged_attachments: HashMap<AttachmentFile, StagedAttachment>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Transaction {
    pub(crate) fn new(id: u64, store: Arc<StoreInner>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            id,
            store,
            changes: ChangeSet::default(),
            locks: HashMap::new(),
            state: TxnState::Open,
            unlink_after_commit: Vec::new(),
            staged_attachments: HashMap::new(),
            permit: Some(permit),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.state == TxnState::Open
    }

    /// Number of row locks currently held.
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    pub fn directory_service(&self) -> Arc<dyn DirectoryService> {
        self.store.directory.clone()
    }

    pub(crate) fn parser(&self) -> &dyn ComponentParser {
        self.store.parser.as_ref()
    }

    pub(crate) fn attachment_store(&self) -> &AttachmentStore {
        &self.store.attachments
    }

    pub(crate) fn provisions_default_calendars(&self) -> bool {
        self.store.config.provision_default_calendars
    }

    pub(crate) fn allocate_id(&self) -> ResourceId {
        self.store.allocate_id()
    }

    fn ensure_open(&self) -> DataStoreResult<()> {
        if self.state != TxnState::Open {
            return Err(DataStoreError::TransactionClosed(self.id));
        }
        Ok(())
    }

    /// Roll back on errors that end the transaction, then return `err`.
    pub(crate) fn fail<T>(&mut self, err: DataStoreError) -> DataStoreResult<T> {
        if err.aborts_transaction() && self.state == TxnState::Open {
            warn!(txn = self.id, error = %err, "transaction rolled back");
            self.rollback();
        }
        Err(err)
    }

    /// Run `f` against committed rows overlaid with this transaction's writes.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Tables<'_>, &ChangeSet) -> R) -> DataStoreResult<R> {
        self.ensure_open()?;
        let conn = self.store.connection()?;
        let tables = Tables::new(&conn);
        let out = f(&tables, &self.changes);
        tables.finish()?;
        Ok(out)
    }

    /// Record writes. `f` sees committed rows and may add to the change set.
    pub(crate) fn write<R>(
        &mut self,
        f: impl FnOnce(&Tables<'_>, &mut ChangeSet) -> DataStoreResult<R>,
    ) -> DataStoreResult<R> {
        self.ensure_open()?;
        let result = {
            let store = self.store.clone();
            let res = match store.connection() {
                Ok(conn) => {
                    let tables = Tables::new(&conn);
                    let out = f(&tables, &mut self.changes);
                    tables.finish().and(out)
                }
                Err(e) => Err(e),
            };
            res
        };
        match result {
            Err(e) if e.aborts_transaction() => self.fail(e),
            other => other,
        }
    }

    /// Take the row lock for `key`, waiting up to the configured timeout.
    /// Returns `true` if the lock was not held by this transaction before.
    pub(crate) async fn lock(&mut self, key: LockKey, mode: LockMode) -> DataStoreResult<bool> {
        self.ensure_open()?;
        if self.store.is_closed() {
            return self.fail(DataStoreError::StorageUnavailable("store is closed".into()));
        }
        let was_held = match self.locks.get(&key) {
            Some(held) if held.covers(mode) => return Ok(false),
            Some(_) => {
                // Upgrade: a shared guard would block our own exclusive request.
                self.locks.remove(&key);
                true
            }
            None => false,
        };
        let timeout = self.store.config.lock_timeout();
        match self.store.locks.acquire(&key, mode, timeout).await {
            Ok(held) => {
                self.locks.insert(key, held);
                Ok(!was_held)
            }
            Err(e) => self.fail(e),
        }
    }

    pub(crate) async fn lock_all(
        &mut self,
        keys: impl IntoIterator<Item = (LockKey, LockMode)>,
    ) -> DataStoreResult<()> {
        for (key, mode) in keys {
            self.lock(key, mode).await?;
        }
        Ok(())
    }

    pub(crate) fn release(&mut self, key: &LockKey) {
        self.locks.remove(key);
    }

    /// Schedule files for removal. Content this transaction staged for the
    /// same files is discarded.
    pub(crate) fn unlink_after_commit(&mut self, files: impl IntoIterator<Item = AttachmentFile>) {
        for file in files {
            self.staged_attachments.remove(&file);
            self.unlink_after_commit.push(file);
        }
    }

    /// Hold `staged` until commit, replacing earlier content staged for
    /// the same file.
    pub(crate) fn stage_attachment(&mut self, file: AttachmentFile, staged: StagedAttachment) {
        self.staged_attachments.insert(file, staged);
    }

    pub(crate) fn staged_attachment(&self, dropbox_id: &str, name: &str) -> Option<&StagedAttachment> {
        self.staged_attachments
            .get(&(dropbox_id.to_string(), name.to_string()))
    }

    /// Publish every write of this transaction atomically.
    pub fn commit(mut self) -> DataStoreResult<()> {
        self.ensure_open()?;
        let changes = mem::take(&mut self.changes);
        let rows = changes.row_count();
        let store = self.store.clone();

        let applied = store.connection().and_then(|mut conn| {
            if changes.is_empty() {
                return Ok(());
            }
            changes.commit(&mut conn).map_err(|e| match e {
                DataStoreError::ConstraintRace { key } => DataStoreError::Conflict {
                    resource: format!("transaction {}", self.id),
                    reason: format!("concurrent commit won: {key}"),
                },
                other => other,
            })
        });
        if let Err(e) = applied {
            warn!(txn = self.id, error = %e, "commit failed; rolling back");
            self.rollback();
            return Err(e);
        }

        self.state = TxnState::Committed;
        for (dropbox_id, name) in mem::take(&mut self.unlink_after_commit) {
            if let Err(e) = store.attachments.remove(&dropbox_id, &name) {
                warn!(txn = self.id, dropbox_id, name, error = %e, "attachment unlink failed");
            }
        }
        for ((dropbox_id, name), staged) in mem::take(&mut self.staged_attachments) {
            if let Err(e) = staged.persist() {
                warn!(txn = self.id, dropbox_id, name, error = %e, "attachment persist failed");
            }
        }
        // Attachment files are in place before their rows unlock.
        self.locks.clear();
        self.permit = None;
        debug!(txn = self.id, rows, "transaction committed");
        Ok(())
    }

    /// Discard every write of this transaction and release its locks.
    pub fn abort(mut self) {
        if self.state == TxnState::Open {
            self.rollback();
            debug!(txn = self.id, "transaction aborted");
        }
    }

    fn rollback(&mut self) {
        self.changes = ChangeSet::default();
        self.locks.clear();
        self.unlink_after_commit.clear();
        let discarded = mem::take(&mut self.staged_attachments).len();
        if discarded > 0 {
            debug!(txn = self.id, discarded, "staged attachments discarded");
        }
        self.state = TxnState::Aborted;
        self.permit = None;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxnState::Open {
            warn!(txn = self.id, "transaction dropped while open; rolling back");
            self.rollback();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending_rows", &self.changes.row_count())
            .field("locks", &self.locks.len())
            .finish()
    }
}
