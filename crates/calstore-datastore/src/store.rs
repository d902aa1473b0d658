//! Store handle and shared state.
//!
//! A [`Store`] owns the SQLite connection holding committed rows, the row
//! lock manager, the attachment tree and the connection pool bounding open
//! transactions. Every clone shares the same state.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use calstore_attach::AttachmentStore;
use calstore_types::ResourceId;
use rusqlite::Connection;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::component::{ComponentParser, ICalendarParser};
use crate::config::StoreConfig;
use crate::directory::{DirectoryService, StaticDirectory};
use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::LockManager;
use crate::schema;
#[cfg(test)]
use crate::tables::Tables;
use crate::transaction::Transaction;

/// Handle on an open datastore. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub config: StoreConfig,
    db: Mutex<Connection>,
    pub locks: LockManager,
    pub attachments: AttachmentStore,
    pub parser: Arc<dyn ComponentParser>,
    pub directory: Arc<dyn DirectoryService>,
    pool: Arc<Semaphore>,
    next_resource_id: AtomicI64,
    next_txn_id: AtomicU64,
    closed: AtomicBool,
    /// Attachment root when none was configured; removed with the store.
    _scratch: Option<TempDir>,
}

impl Store {
    /// Open a store with the `icalendar` parser and an empty directory.
    pub fn open(config: StoreConfig) -> DataStoreResult<Self> {
        Self::open_with(
            config,
            Arc::new(ICalendarParser),
            Arc::new(StaticDirectory::new()),
        )
    }

    /// Open a store with explicit collaborators.
    pub fn open_with(
        config: StoreConfig,
        parser: Arc<dyn ComponentParser>,
        directory: Arc<dyn DirectoryService>,
    ) -> DataStoreResult<Self> {
        config.validate()?;

        let (attachments, scratch) = match config.resolved_attachments_dir() {
            Some(dir) => (AttachmentStore::open(dir)?, None),
            None => {
                let scratch = tempfile::tempdir()?;
                debug!(path = %scratch.path().display(), "using scratch attachment root");
                (AttachmentStore::open(scratch.path())?, Some(scratch))
            }
        };

        let path = config.database_path();
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }
        let db = schema::open(path.as_deref(), config.journal_sync)?;
        let high_water = schema::high_water(&db)?;
        match &path {
            Some(path) => info!(path = %path.display(), high_water, "database opened"),
            None => debug!("using in-memory database"),
        }

        let pool = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                db: Mutex::new(db),
                locks: LockManager::new(),
                attachments,
                parser,
                directory,
                pool,
                next_resource_id: AtomicI64::new(high_water + 1),
                next_txn_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                _scratch: scratch,
            }),
        })
    }

    /// Open a unit of work. Waits for a free connection when the pool is
    /// exhausted.
    pub async fn new_transaction(&self) -> DataStoreResult<Transaction> {
        if self.inner.is_closed() {
            return Err(DataStoreError::StorageUnavailable("store is closed".into()));
        }
        let permit = self
            .inner
            .pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DataStoreError::StorageUnavailable("store is closed".into()))?;
        let id = self.inner.next_txn_id.fetch_add(1, Ordering::SeqCst);
        debug!(txn = id, "transaction opened");
        Ok(Transaction::new(id, self.inner.clone(), permit))
    }

    /// Principal lookup used for sharing records.
    pub fn directory_service(&self) -> Arc<dyn DirectoryService> {
        self.inner.directory.clone()
    }

    pub fn component_parser(&self) -> Arc<dyn ComponentParser> {
        self.inner.parser.clone()
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.inner.attachments
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Refuse new work. Open transactions fail on their next call.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.pool.close();
            info!("store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Inspect committed rows directly.
    #[cfg(test)]
    pub(crate) fn committed<R>(&self, f: impl FnOnce(&Tables<'_>) -> R) -> R {
        let conn = self.inner.connection().unwrap();
        let tables = Tables::new(&conn);
        let out = f(&tables);
        tables.finish().unwrap();
        out
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("data_dir", &self.inner.config.data_dir)
            .field("attachments", &self.inner.attachments.root())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl StoreInner {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn allocate_id(&self) -> ResourceId {
        ResourceId::new(self.next_resource_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The database connection. Held only for the duration of one read or
    /// one commit.
    pub fn connection(&self) -> DataStoreResult<MutexGuard<'_, Connection>> {
        if self.is_closed() {
            return Err(DataStoreError::StorageUnavailable("store is closed".into()));
        }
        self.db
            .lock()
            .map_err(|e| DataStoreError::StorageUnavailable(format!("connection latch poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::tests::event;
    use calstore_types::{ObjectMetadata, PropertyKey, PropertyName, PropertyValue};
    use std::time::Duration;

    fn memory_store() -> Store {
        Store::open(StoreConfig::default()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Transaction lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = memory_store();
        let mut txn = store.new_transaction().await.unwrap();
        txn.home_with_uid("uid1", true).await.unwrap().unwrap();

        let other = store.new_transaction().await.unwrap();
        assert!(other.home_uids().unwrap().is_empty());
        txn.commit().unwrap();
        assert_eq!(other.home_uids().unwrap(), vec!["uid1".to_string()]);
    }

    #[tokio::test]
    async fn abort_discards_writes() {
        let store = memory_store();
        let mut txn = store.new_transaction().await.unwrap();
        txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        txn.abort();

        let txn = store.new_transaction().await.unwrap();
        assert!(txn.home("uid1").unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_open_transaction_rolls_back_and_releases_locks() {
        let config = StoreConfig {
            lock_timeout_ms: 200,
            ..StoreConfig::default()
        };
        let store = Store::open(config).unwrap();
        {
            let mut txn = store.new_transaction().await.unwrap();
            txn.home_with_uid("uid1", true).await.unwrap().unwrap();
            assert!(txn.held_locks() > 0);
        }
        let mut txn = store.new_transaction().await.unwrap();
        assert!(txn.home_with_uid("uid1", false).await.unwrap().is_none());
        txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        txn.commit().unwrap();
    }

    #[tokio::test]
    async fn pool_bounds_open_transactions() {
        let config = StoreConfig {
            max_connections: 1,
            ..StoreConfig::default()
        };
        let store = Store::open(config).unwrap();
        let first = store.new_transaction().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(50), store.new_transaction()).await;
        assert!(waiting.is_err());
        first.abort();
        let second = tokio::time::timeout(Duration::from_secs(1), store.new_transaction()).await;
        assert!(second.unwrap().is_ok());
    }

    #[tokio::test]
    async fn lock_timeout_is_a_conflict_that_closes_the_transaction() {
        let config = StoreConfig {
            lock_timeout_ms: 50,
            ..StoreConfig::default()
        };
        let store = Store::open(config).unwrap();
        let mut setup = store.new_transaction().await.unwrap();
        let home = setup.home_with_uid("uid1", true).await.unwrap().unwrap();
        setup.commit().unwrap();

        let key = PropertyKey::global(PropertyName::content_language());
        let mut holder = store.new_transaction().await.unwrap();
        holder
            .set_property(home.resource_id(), key.clone(), PropertyValue::from("en"))
            .await
            .unwrap();

        let mut loser = store.new_transaction().await.unwrap();
        let err = loser
            .set_property(home.resource_id(), key.clone(), PropertyValue::from("fr"))
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::Conflict { .. }));
        assert!(!loser.is_open());
        assert!(matches!(
            loser.home_uids(),
            Err(DataStoreError::TransactionClosed(_))
        ));
        assert!(matches!(loser.commit(), Err(DataStoreError::TransactionClosed(_))));

        holder.commit().unwrap();
        let check = store.new_transaction().await.unwrap();
        assert_eq!(
            check.property(home.resource_id(), &key).unwrap(),
            Some(PropertyValue::from("en"))
        );
    }

    #[tokio::test]
    async fn closed_store_refuses_work() {
        let store = memory_store();
        let mut open = store.new_transaction().await.unwrap();
        store.close();
        assert!(store.is_closed());
        assert!(matches!(
            store.new_transaction().await,
            Err(DataStoreError::StorageUnavailable(_))
        ));
        let err = open.home_with_uid("uid1", true).await.unwrap_err();
        assert!(matches!(err, DataStoreError::StorageUnavailable(_)));
        assert!(matches!(open.commit(), Err(DataStoreError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn directory_service_is_exposed() {
        let directory = Arc::new(StaticDirectory::new().with_record("uid2", "Second User"));
        let store = Store::open_with(StoreConfig::default(), Arc::new(ICalendarParser), directory).unwrap();
        let record = store.directory_service().record_with_uid("uid2").await.unwrap();
        assert_eq!(record.display_name, "Second User");
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn reopen_restores_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let key = PropertyKey::global(PropertyName::calendar_description());
        let (calendar_id, object_id) = {
            let store = Store::open(StoreConfig::persistent(dir.path())).unwrap();
            let mut txn = store.new_transaction().await.unwrap();
            let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
            let cal = home.create_calendar_with_name(&mut txn, "work").await.unwrap();
            let obj = cal
                .create_calendar_object_with_name(&mut txn, "1.ics", &event("u1"), ObjectMetadata::default())
                .await
                .unwrap();
            txn.set_property(cal.resource_id(), key.clone(), PropertyValue::from("Work"))
                .await
                .unwrap();
            txn.commit().unwrap();

            // Uncommitted work must not survive.
            let mut txn = store.new_transaction().await.unwrap();
            txn.home_with_uid("uid2", true).await.unwrap().unwrap();
            txn.abort();
            (cal.resource_id(), obj.resource_id())
        };

        let store = Store::open(StoreConfig::persistent(dir.path())).unwrap();
        let mut txn = store.new_transaction().await.unwrap();
        assert_eq!(txn.home_uids().unwrap(), vec!["uid1".to_string()]);
        let home = txn.home_with_uid("uid1", false).await.unwrap().unwrap();
        let cal = home.calendar_with_name(&txn, "work").unwrap().unwrap();
        assert_eq!(cal.resource_id(), calendar_id);
        let obj = cal.calendar_object_with_name(&txn, "1.ics").unwrap().unwrap();
        assert_eq!(obj.resource_id(), object_id);
        assert_eq!(obj.component(), event("u1"));
        assert_eq!(
            txn.property(calendar_id, &key).unwrap(),
            Some(PropertyValue::from("Work"))
        );

        // Ids allocated after reopening never reuse recovered ones.
        let new_cal = home.create_calendar_with_name(&mut txn, "later").await.unwrap();
        assert!(new_cal.resource_id() > object_id);
    }

    #[tokio::test]
    async fn attachments_default_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(StoreConfig::persistent(dir.path())).unwrap();
        assert_eq!(store.attachments().root(), dir.path().join("attachments"));
    }
}
