//! Sharing registry of a home.
//!
//! Records are stored one row per `(home, share uid)`, so concurrent writers
//! adding different shares never touch each other's rows.

use calstore_types::{ResourceId, ShareType, SharedCollectionRecord};
use tracing::debug;

use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{LockKey, LockMode};
use crate::transaction::Transaction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharingRegistry {
    home_id: ResourceId,
    owner_uid: String,
}

impl SharingRegistry {
    pub(crate) fn new(home_id: ResourceId, owner_uid: String) -> Self {
        Self { home_id, owner_uid }
    }

    pub fn home_id(&self) -> ResourceId {
        self.home_id
    }

    /// Every record, ordered by share uid.
    pub fn records(&self, txn: &Transaction) -> DataStoreResult<Vec<SharedCollectionRecord>> {
        txn.read(|t, c| {
            c.shares
                .children(&t.shares, self.home_id)
                .into_iter()
                .map(|(_, record)| record)
                .collect()
        })
    }

    pub fn record_for_share_uid(
        &self,
        txn: &Transaction,
        share_uid: &str,
    ) -> DataStoreResult<Option<SharedCollectionRecord>> {
        let key = (self.home_id, share_uid.to_string());
        txn.read(|t, c| c.shares.get(&t.shares, &key))
    }

    pub fn records_for_host_url(
        &self,
        txn: &Transaction,
        host_url: &str,
    ) -> DataStoreResult<Vec<SharedCollectionRecord>> {
        Ok(self
            .records(txn)?
            .into_iter()
            .filter(|record| record.host_url == host_url)
            .collect())
    }

    /// Insert or replace the record with `record.share_uid`. Other records
    /// are left untouched.
    pub async fn add_or_update(&self, txn: &mut Transaction, record: SharedCollectionRecord) -> DataStoreResult<()> {
        let home_id = self.home_id;
        txn.lock_all([
            (LockKey::Resource(home_id), LockMode::Shared),
            (LockKey::Share(home_id, record.share_uid.clone()), LockMode::Exclusive),
        ])
        .await?;
        txn.write(|t, c| {
            if c.resources.get(&t.resources, &home_id).is_none() {
                return Err(DataStoreError::not_found("home", self.owner_uid.clone()));
            }
            debug!(home = %home_id, share = %record.share_uid, "sharing record written");
            c.shares.put((home_id, record.share_uid.clone()), record);
            Ok(())
        })
    }

    /// Record a collection shared into this home by `sharer_uid`. The display
    /// name comes from the directory, falling back to the sharer's uid.
    pub async fn share_from(
        &self,
        txn: &mut Transaction,
        sharer_uid: &str,
        share_uid: &str,
        share_type: ShareType,
        host_url: &str,
        token: &str,
    ) -> DataStoreResult<SharedCollectionRecord> {
        let directory = txn.directory_service();
        let display_name = directory
            .record_with_uid(sharer_uid)
            .await
            .map(|record| record.display_name)
            .unwrap_or_else(|| sharer_uid.to_string());
        let record = SharedCollectionRecord::new(share_uid, share_type, host_url, token, display_name);
        self.add_or_update(txn, record.clone()).await?;
        Ok(record)
    }

    pub async fn remove(&self, txn: &mut Transaction, share_uid: &str) -> DataStoreResult<()> {
        let home_id = self.home_id;
        txn.lock_all([
            (LockKey::Resource(home_id), LockMode::Shared),
            (LockKey::Share(home_id, share_uid.to_string()), LockMode::Exclusive),
        ])
        .await?;
        txn.write(|t, c| {
            let key = (home_id, share_uid.to_string());
            if c.shares.get(&t.shares, &key).is_none() {
                return Err(DataStoreError::not_found("sharing record", share_uid));
            }
            c.shares.delete(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::directory::StaticDirectory;
    use crate::component::ICalendarParser;
    use crate::store::Store;
    use std::sync::Arc;

    fn wiki_record() -> SharedCollectionRecord {
        SharedCollectionRecord::new(
            "abcd",
            ShareType::Direct,
            "/calendars/__uids__/uid2/calendar/",
            "XYZ",
            "Shared Wiki Calendar",
        )
    }

    async fn committed_home(store: &Store, uid: &str) {
        let mut txn = store.new_transaction().await.unwrap();
        txn.home_with_uid(uid, true).await.unwrap().unwrap();
        txn.commit().unwrap();
    }

    #[tokio::test]
    async fn add_update_and_remove() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let registry = home.sharing_registry();

        registry.add_or_update(&mut txn, wiki_record()).await.unwrap();
        let mut updated = wiki_record();
        updated.display_name = "Renamed".into();
        registry.add_or_update(&mut txn, updated.clone()).await.unwrap();
        assert_eq!(registry.records(&txn).unwrap(), vec![updated.clone()]);
        assert_eq!(registry.record_for_share_uid(&txn, "abcd").unwrap(), Some(updated));
        assert_eq!(
            registry
                .records_for_host_url(&txn, "/calendars/__uids__/uid2/calendar/")
                .unwrap()
                .len(),
            1
        );

        registry.remove(&mut txn, "abcd").await.unwrap();
        assert!(registry.records(&txn).unwrap().is_empty());
        assert!(matches!(
            registry.remove(&mut txn, "abcd").await,
            Err(DataStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_writers_keep_both_records() {
        let store = Store::open(StoreConfig::default()).unwrap();
        committed_home(&store, "uid1").await;

        let mut first = store.new_transaction().await.unwrap();
        let mut second = store.new_transaction().await.unwrap();
        let home_a = first.home_with_uid("uid1", false).await.unwrap().unwrap();
        let home_b = second.home_with_uid("uid1", false).await.unwrap().unwrap();

        home_a.sharing_registry().add_or_update(&mut first, wiki_record()).await.unwrap();
        let other = SharedCollectionRecord::new("efgh", ShareType::Invite, "/calendars/__uids__/uid3/work/", "TOK", "Work");
        home_b.sharing_registry().add_or_update(&mut second, other.clone()).await.unwrap();
        first.commit().unwrap();
        second.commit().unwrap();

        let txn = store.new_transaction().await.unwrap();
        let home = txn.home("uid1").unwrap().unwrap();
        let records = home.sharing_registry().records(&txn).unwrap();
        assert_eq!(records, vec![wiki_record(), other]);
    }

    #[tokio::test]
    async fn concurrent_direct_share_creation() {
        let store = Store::open(StoreConfig::default()).unwrap();
        committed_home(&store, "uid1").await;

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut txn = store.new_transaction().await?;
                    let home = txn.home_with_uid("uid1", true).await?.expect("home exists");
                    let record = SharedCollectionRecord::new(
                        format!("share-{i}"),
                        ShareType::Direct,
                        format!("/calendars/__uids__/user{i}/calendar/"),
                        "XYZ",
                        "Shared Wiki Calendar",
                    );
                    home.sharing_registry().add_or_update(&mut txn, record).await?;
                    tokio::task::yield_now().await;
                    txn.commit()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let txn = store.new_transaction().await.unwrap();
        let home = txn.home("uid1").unwrap().unwrap();
        assert_eq!(home.sharing_registry().records(&txn).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn share_from_uses_directory_display_name() {
        let directory = StaticDirectory::new().with_record("uid2", "Wiki Owner");
        let store = Store::open_with(StoreConfig::default(), Arc::new(ICalendarParser), Arc::new(directory)).unwrap();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let registry = home.sharing_registry();

        let known = registry
            .share_from(&mut txn, "uid2", "s1", ShareType::Direct, "/calendars/__uids__/uid2/calendar/", "T1")
            .await
            .unwrap();
        assert_eq!(known.display_name, "Wiki Owner");
        let unknown = registry
            .share_from(&mut txn, "uid9", "s2", ShareType::Invite, "/calendars/__uids__/uid9/calendar/", "T2")
            .await
            .unwrap();
        assert_eq!(unknown.display_name, "uid9");
        assert_eq!(registry.records(&txn).unwrap().len(), 2);
    }
}
