//! Calendar homes.

use calstore_types::{epoch_seconds, now_timestamp, PropertyMap, ResourceId, TypeError};
use tracing::info;

use crate::calendar::{validate_calendar_name, Calendar};
use crate::cascade;
use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{LockKey, LockMode};
use crate::provision::{provision, Parent};
use crate::sharing::SharingRegistry;
use crate::tables::{CalendarRow, ChangeSet, HomeRow, ResourceKind, Tables};
use crate::transaction::Transaction;

/// Name of the default collection of every home.
pub const DEFAULT_CALENDAR: &str = "calendar";
/// Name of the scheduling inbox.
pub const INBOX: &str = "inbox";

/// Snapshot of one home row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Home {
    row: HomeRow,
}

impl Transaction {
    /// Look up the home of `uid`, provisioning it when `create` is set.
    pub async fn home_with_uid(&mut self, uid: &str, create: bool) -> DataStoreResult<Option<Home>> {
        let lookup = |t: &Tables<'_>, c: &ChangeSet| {
            c.homes.get(&t.homes, &uid.to_string()).map(|row| Home { row })
        };
        if let Some(home) = self.read(lookup)? {
            return Ok(Some(home));
        }
        if !create {
            return Ok(None);
        }
        if uid.is_empty() {
            return Err(DataStoreError::validation("home uid", "must not be empty"));
        }

        let with_defaults = self.provisions_default_calendars();
        let default_ids = if with_defaults {
            Some((self.allocate_id(), self.allocate_id()))
        } else {
            None
        };
        let home = provision(self, LockKey::Home(uid.to_string()), None, &lookup, |t, c, id| {
            if c.homes.get(&t.homes, &uid.to_string()).is_some() {
                return Err(DataStoreError::ConstraintRace {
                    key: format!("home {uid}"),
                });
            }
            let now = now_timestamp();
            let row = HomeRow {
                resource_id: id,
                owner_uid: uid.to_string(),
                created: now.clone(),
                modified: now.clone(),
            };
            c.homes.put(uid.to_string(), row.clone());
            c.resources.put(id, ResourceKind::Home);
            if let Some((calendar_id, inbox_id)) = default_ids {
                for (cal_id, name) in [(calendar_id, DEFAULT_CALENDAR), (inbox_id, INBOX)] {
                    c.calendars.put(
                        (id, name.to_string()),
                        CalendarRow {
                            resource_id: cal_id,
                            home_id: id,
                            name: name.to_string(),
                            created: now.clone(),
                            modified: now.clone(),
                        },
                    );
                    c.resources.put(cal_id, ResourceKind::Calendar);
                }
            }
            Ok(Home { row })
        })
        .await?;
        Ok(Some(home))
    }

    /// Look up the home of `uid` without provisioning it.
    pub fn home(&self, uid: &str) -> DataStoreResult<Option<Home>> {
        self.read(|t, c| c.homes.get(&t.homes, &uid.to_string()).map(Home::from_row))
    }

    /// UIDs of every home, sorted.
    pub fn home_uids(&self) -> DataStoreResult<Vec<String>> {
        self.read(|t, c| c.homes.all(&t.homes).into_iter().map(|(uid, _)| uid).collect())
    }

    /// Delete a home with all of its calendars, sharing records,
    /// notifications and properties.
    pub async fn remove_home(&mut self, uid: &str) -> DataStoreResult<()> {
        self.lock(LockKey::Home(uid.to_string()), LockMode::Exclusive).await?;
        let row = self
            .read(|t, c| c.homes.get(&t.homes, &uid.to_string()))?
            .ok_or_else(|| DataStoreError::not_found("home", uid))?;
        self.lock(LockKey::Resource(row.resource_id), LockMode::Exclusive).await?;

        let calendar_ids = self.read(|t, c| {
            c.calendars
                .children(&t.calendars, row.resource_id)
                .into_iter()
                .map(|(_, cal)| cal.resource_id)
                .collect::<Vec<_>>()
        })?;
        for calendar_id in calendar_ids {
            self.lock_children_of_calendar(calendar_id).await?;
        }
        self.lock(LockKey::Notifications(uid.to_string()), LockMode::Exclusive).await?;
        let collection_id = self.read(|t, c| {
            c.notification_homes
                .get(&t.notification_homes, &uid.to_string())
                .map(|n| n.resource_id)
        })?;
        if let Some(collection_id) = collection_id {
            self.lock_children_of_notifications(collection_id).await?;
        }

        let files = self.write(|t, c| Ok(cascade::remove_home(t, c, &row)))?;
        self.unlink_after_commit(files);
        info!(txn = self.id(), uid, "home removed");
        Ok(())
    }

    /// Exclusive existence locks on a calendar and every object in it.
    pub(crate) async fn lock_children_of_calendar(&mut self, calendar_id: ResourceId) -> DataStoreResult<()> {
        self.lock(LockKey::Resource(calendar_id), LockMode::Exclusive).await?;
        let object_ids = self.read(|t, c| {
            c.objects
                .children(&t.objects, calendar_id)
                .into_iter()
                .map(|(_, obj)| obj.resource_id)
                .collect::<Vec<_>>()
        })?;
        for object_id in object_ids {
            self.lock(LockKey::Resource(object_id), LockMode::Exclusive).await?;
        }
        Ok(())
    }

    /// Exclusive existence locks on a notification collection and every
    /// notification in it.
    async fn lock_children_of_notifications(&mut self, collection_id: ResourceId) -> DataStoreResult<()> {
        self.lock(LockKey::Resource(collection_id), LockMode::Exclusive).await?;
        let notification_ids = self.read(|t, c| {
            c.notifications
                .children(&t.notifications, collection_id)
                .into_iter()
                .map(|(_, n)| n.resource_id)
                .collect::<Vec<_>>()
        })?;
        for notification_id in notification_ids {
            self.lock(LockKey::Resource(notification_id), LockMode::Exclusive).await?;
        }
        Ok(())
    }
}

impl Home {
    pub(crate) fn from_row(row: HomeRow) -> Self {
        Self { row }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.row.resource_id
    }

    pub fn uid(&self) -> &str {
        &self.row.owner_uid
    }

    pub fn created(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.created)
    }

    pub fn modified(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.modified)
    }

    pub fn calendar_with_name(&self, txn: &Transaction, name: &str) -> DataStoreResult<Option<Calendar>> {
        let key = (self.row.resource_id, name.to_string());
        txn.read(|t, c| c.calendars.get(&t.calendars, &key).map(Calendar::from_row))
    }

    /// Every calendar of this home in name order.
    pub fn calendars(&self, txn: &Transaction) -> DataStoreResult<Vec<Calendar>> {
        txn.read(|t, c| {
            c.calendars
                .children(&t.calendars, self.row.resource_id)
                .into_iter()
                .map(|(_, row)| Calendar::from_row(row))
                .collect()
        })
    }

    pub fn calendar_names(&self, txn: &Transaction) -> DataStoreResult<Vec<String>> {
        Ok(self
            .calendars(txn)?
            .into_iter()
            .map(|cal| cal.name().to_string())
            .collect())
    }

    /// Look up a calendar, provisioning it when `create` is set.
    pub async fn lookup_or_create_calendar(
        &self,
        txn: &mut Transaction,
        name: &str,
        create: bool,
    ) -> DataStoreResult<Option<Calendar>> {
        if !create {
            return self.calendar_with_name(txn, name);
        }
        validate_calendar_name(name)?;
        let home_id = self.row.resource_id;
        let key = (home_id, name.to_string());
        let lookup = |t: &Tables<'_>, c: &ChangeSet| {
            c.calendars.get(&t.calendars, &key).map(Calendar::from_row)
        };
        let parent = Parent {
            id: home_id,
            kind: "home",
        };
        let calendar = provision(
            txn,
            LockKey::Calendar(home_id, name.to_string()),
            Some(parent),
            lookup,
            |t, c, id| {
                if c.calendars.get(&t.calendars, &key).is_some() {
                    return Err(DataStoreError::ConstraintRace {
                        key: format!("calendar {home_id}/{name}"),
                    });
                }
                Ok(Calendar::from_row(insert_calendar(c, home_id, name, id)))
            },
        )
        .await?;
        Ok(Some(calendar))
    }

    /// Create a calendar, failing if the name is taken.
    pub async fn create_calendar_with_name(&self, txn: &mut Transaction, name: &str) -> DataStoreResult<Calendar> {
        validate_calendar_name(name)?;
        let home_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(home_id), LockMode::Shared),
            (LockKey::Calendar(home_id, name.to_string()), LockMode::Exclusive),
        ])
        .await?;
        let id = txn.allocate_id();
        txn.write(|t, c| {
            if c.resources.get(&t.resources, &home_id).is_none() {
                return Err(DataStoreError::not_found("home", home_id.to_string()));
            }
            if c.calendars.get(&t.calendars, &(home_id, name.to_string())).is_some() {
                return Err(DataStoreError::already_exists("calendar", name));
            }
            Ok(Calendar::from_row(insert_calendar(c, home_id, name, id)))
        })
    }

    /// Delete a calendar with its objects, attachments and properties.
    pub async fn remove_calendar_with_name(&self, txn: &mut Transaction, name: &str) -> DataStoreResult<()> {
        let home_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(home_id), LockMode::Shared),
            (LockKey::Calendar(home_id, name.to_string()), LockMode::Exclusive),
        ])
        .await?;
        let row = txn
            .read(|t, c| c.calendars.get(&t.calendars, &(home_id, name.to_string())))?
            .ok_or_else(|| DataStoreError::not_found("calendar", name))?;
        txn.lock_children_of_calendar(row.resource_id).await?;
        let files = txn.write(|t, c| Ok(cascade::remove_calendar(t, c, &row)))?;
        txn.unlink_after_commit(files);
        info!(txn = txn.id(), home = self.uid(), name, "calendar removed");
        Ok(())
    }

    /// Rename a calendar. Its objects and properties follow it.
    pub async fn rename_calendar(&self, txn: &mut Transaction, from: &str, to: &str) -> DataStoreResult<Calendar> {
        validate_calendar_name(to)?;
        let home_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(home_id), LockMode::Shared),
            (LockKey::Calendar(home_id, from.to_string()), LockMode::Exclusive),
            (LockKey::Calendar(home_id, to.to_string()), LockMode::Exclusive),
        ])
        .await?;
        txn.write(|t, c| {
            let mut row = c
                .calendars
                .get(&t.calendars, &(home_id, from.to_string()))
                .ok_or_else(|| DataStoreError::not_found("calendar", from))?;
            if c.calendars.get(&t.calendars, &(home_id, to.to_string())).is_some() {
                return Err(DataStoreError::already_exists("calendar", to));
            }
            c.calendars.delete((home_id, from.to_string()));
            row.name = to.to_string();
            row.modified = now_timestamp();
            c.calendars.put((home_id, to.to_string()), row.clone());
            Ok(Calendar::from_row(row))
        })
    }

    pub fn properties(&self, txn: &Transaction) -> DataStoreResult<PropertyMap> {
        txn.properties(self.row.resource_id)
    }

    /// Sharing records anchored on this home.
    pub fn sharing_registry(&self) -> SharingRegistry {
        SharingRegistry::new(self.row.resource_id, self.row.owner_uid.clone())
    }
}

fn insert_calendar(
    c: &mut ChangeSet,
    home_id: ResourceId,
    name: &str,
    id: ResourceId,
) -> CalendarRow {
    let now = now_timestamp();
    let row = CalendarRow {
        resource_id: id,
        home_id,
        name: name.to_string(),
        created: now.clone(),
        modified: now,
    };
    c.calendars.put((home_id, name.to_string()), row.clone());
    c.resources.put(id, ResourceKind::Calendar);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::Store;
    use calstore_types::{PropertyKey, PropertyName, PropertyValue, ShareType, SharedCollectionRecord};
    use std::time::Duration;

    fn store() -> Store {
        Store::open(StoreConfig::default()).unwrap()
    }

    fn homes_with_uid(store: &Store, uid: &str) -> usize {
        store.committed(|t| t.homes.all().into_iter().filter(|(_, h)| h.owner_uid == uid).count())
    }

    // -----------------------------------------------------------------------
    // Provisioning
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn lookup_without_create_returns_none() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        assert!(txn.home_with_uid("nobody", false).await.unwrap().is_none());
        assert_eq!(txn.held_locks(), 0);
    }

    #[tokio::test]
    async fn provisioned_home_gets_default_collections() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        assert_eq!(home.uid(), "uid1");
        assert_eq!(
            home.calendar_names(&txn).unwrap(),
            vec![DEFAULT_CALENDAR.to_string(), INBOX.to_string()]
        );
        assert!(home.calendar_with_name(&txn, INBOX).unwrap().unwrap().is_inbox());
        txn.commit().unwrap();
    }

    #[tokio::test]
    async fn default_collections_can_be_disabled() {
        let store = Store::open(StoreConfig {
            provision_default_calendars: false,
            ..StoreConfig::default()
        })
        .unwrap();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        assert!(home.calendars(&txn).unwrap().is_empty());
    }

    #[tokio::test]
    async fn home_timestamps_are_current() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let now = now_epoch();
        let created = home.created().unwrap();
        assert!((now - created).abs() <= 5);
        assert_eq!(home.modified().unwrap(), created);
    }

    fn now_epoch() -> i64 {
        calstore_types::epoch_seconds(&now_timestamp()).unwrap()
    }

    #[tokio::test]
    async fn same_transaction_sees_its_own_home() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let first = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let second = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        assert_eq!(first.resource_id(), second.resource_id());
        assert_eq!(txn.home("uid1").unwrap(), Some(first));
    }

    #[tokio::test]
    async fn concurrent_home_provisioning_inserts_once() {
        let store = store();
        let mut winner = store.new_transaction().await.unwrap();
        let home = winner.home_with_uid("uid1", true).await.unwrap().unwrap();

        let racer = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut txn = store.new_transaction().await?;
                let home = txn.home_with_uid("uid1", true).await?;
                txn.commit()?;
                Ok::<_, DataStoreError>(home.map(|h| h.resource_id()))
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!racer.is_finished(), "racer must wait for the winner's commit");

        winner.commit().unwrap();
        let raced_id = racer.await.unwrap().unwrap();
        assert_eq!(raced_id, Some(home.resource_id()));
        assert_eq!(homes_with_uid(&store, "uid1"), 1);
    }

    #[tokio::test]
    async fn many_racers_agree_on_one_home() {
        let store = store();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut txn = store.new_transaction().await?;
                    let home = txn.home_with_uid("uid1", true).await?;
                    tokio::task::yield_now().await;
                    txn.commit()?;
                    Ok::<_, DataStoreError>(home.map(|h| h.resource_id()))
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(homes_with_uid(&store, "uid1"), 1);
    }

    #[tokio::test]
    async fn waiter_inserts_after_winner_aborts() {
        let store = store();
        let mut first = store.new_transaction().await.unwrap();
        let abandoned = first.home_with_uid("uid1", true).await.unwrap().unwrap();

        let racer = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut txn = store.new_transaction().await?;
                let home = txn.home_with_uid("uid1", true).await?;
                txn.commit()?;
                Ok::<_, DataStoreError>(home.map(|h| h.resource_id()))
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.abort();

        let id = racer.await.unwrap().unwrap().unwrap();
        assert_ne!(id, abandoned.resource_id());
        assert_eq!(homes_with_uid(&store, "uid1"), 1);
    }

    #[tokio::test]
    async fn provisioning_does_not_block_unrelated_work() {
        let store = store();
        let mut setup = store.new_transaction().await.unwrap();
        setup.home_with_uid("existing", true).await.unwrap().unwrap();
        setup.commit().unwrap();

        let mut provisioning = store.new_transaction().await.unwrap();
        provisioning.home_with_uid("uid1", true).await.unwrap().unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut txn = store.new_transaction().await?;
                let found = txn.home_with_uid("existing", false).await?.is_some();
                let other = txn.home_with_uid("uid2", true).await?.is_some();
                txn.commit()?;
                Ok::<_, DataStoreError>(found && other)
            })
        };
        let finished = tokio::time::timeout(Duration::from_secs(1), reader).await;
        assert!(finished.unwrap().unwrap().unwrap());
        assert!(provisioning.is_open());
        provisioning.commit().unwrap();
    }

    #[tokio::test]
    async fn concurrent_calendar_provisioning_inserts_once() {
        let store = store();
        let mut setup = store.new_transaction().await.unwrap();
        setup.home_with_uid("uid1", true).await.unwrap().unwrap();
        setup.commit().unwrap();

        let mut winner = store.new_transaction().await.unwrap();
        let home = winner.home_with_uid("uid1", false).await.unwrap().unwrap();
        let cal = home
            .lookup_or_create_calendar(&mut winner, "shared", true)
            .await
            .unwrap()
            .unwrap();

        let racer = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut txn = store.new_transaction().await?;
                let home = txn.home_with_uid("uid1", false).await?.expect("home committed");
                let cal = home.lookup_or_create_calendar(&mut txn, "shared", true).await?;
                txn.commit()?;
                Ok::<_, DataStoreError>(cal.map(|c| c.resource_id()))
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!racer.is_finished());
        winner.commit().unwrap();

        assert_eq!(racer.await.unwrap().unwrap(), Some(cal.resource_id()));
        let count = store.committed(|t| t.calendars.all().into_iter().filter(|(_, c)| c.name == "shared").count());
        assert_eq!(count, 1);
    }

    // -----------------------------------------------------------------------
    // Calendars
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_calendar_rejects_duplicates_and_keeps_transaction() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        home.create_calendar_with_name(&mut txn, "work").await.unwrap();
        let err = home.create_calendar_with_name(&mut txn, "work").await.unwrap_err();
        assert!(matches!(err, DataStoreError::AlreadyExists { .. }));
        assert!(txn.is_open());
        assert!(home.calendar_with_name(&txn, "work").unwrap().is_some());
        txn.commit().unwrap();
    }

    #[tokio::test]
    async fn reserved_and_malformed_names_are_rejected() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        for bad in ["outbox", "notifications", "", "a/b", ".."] {
            let err = home.create_calendar_with_name(&mut txn, bad).await.unwrap_err();
            assert!(matches!(err, DataStoreError::Validation { .. }), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn rename_moves_calendar_with_its_objects() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let cal = home.create_calendar_with_name(&mut txn, "old").await.unwrap();
        cal.create_calendar_object_with_name(
            &mut txn,
            "1.ics",
            &crate::component::tests::event("u1"),
            Default::default(),
        )
        .await
        .unwrap();

        let renamed = home.rename_calendar(&mut txn, "old", "new").await.unwrap();
        assert_eq!(renamed.resource_id(), cal.resource_id());
        assert!(home.calendar_with_name(&txn, "old").unwrap().is_none());
        assert_eq!(renamed.object_names(&txn).unwrap(), vec!["1.ics".to_string()]);

        assert!(matches!(
            home.rename_calendar(&mut txn, "missing", "x").await,
            Err(DataStoreError::NotFound { .. })
        ));
        assert!(matches!(
            home.rename_calendar(&mut txn, "new", DEFAULT_CALENDAR).await,
            Err(DataStoreError::AlreadyExists { .. })
        ));
        txn.commit().unwrap();
    }

    #[tokio::test]
    async fn remove_missing_calendar_is_not_found() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        assert!(matches!(
            home.remove_calendar_with_name(&mut txn, "nothing").await,
            Err(DataStoreError::NotFound { .. })
        ));
        assert!(txn.is_open());
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn remove_home_cascades_everything() {
        let store = store();
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let cal = home.calendar_with_name(&txn, DEFAULT_CALENDAR).unwrap().unwrap();
        cal.create_calendar_object_with_name(
            &mut txn,
            "1.ics",
            &crate::component::tests::event("u1"),
            Default::default(),
        )
        .await
        .unwrap();
        let key = PropertyKey::global(PropertyName::content_language());
        txn.set_property(home.resource_id(), key.clone(), PropertyValue::from("en"))
            .await
            .unwrap();
        txn.set_property(cal.resource_id(), key.clone(), PropertyValue::from("en"))
            .await
            .unwrap();
        home.sharing_registry()
            .add_or_update(
                &mut txn,
                SharedCollectionRecord::new("s1", ShareType::Invite, "/x/", "t", "X"),
            )
            .await
            .unwrap();
        txn.notifications_with_uid("uid1", true).await.unwrap().unwrap();
        txn.commit().unwrap();

        let mut txn = store.new_transaction().await.unwrap();
        txn.remove_home("uid1").await.unwrap();
        txn.commit().unwrap();

        store.committed(|t| {
            assert!(t.homes.all().is_empty());
            assert!(t.calendars.all().is_empty());
            assert!(t.objects.all().is_empty());
            assert!(t.properties.all().is_empty());
            assert!(t.shares.all().is_empty());
            assert!(t.notification_homes.all().is_empty());
            assert!(t.resources.all().is_empty());
        });

        let mut txn = store.new_transaction().await.unwrap();
        assert!(matches!(
            txn.remove_home("uid1").await,
            Err(DataStoreError::NotFound { .. })
        ));
    }

    fn quick_timeout_store() -> Store {
        Store::open(StoreConfig {
            lock_timeout_ms: 100,
            ..StoreConfig::default()
        })
        .unwrap()
    }

    const INVITE: &str = "{http://calendarserver.org/ns/}invite-notification";

    async fn home_with_notifications(store: &Store) -> ResourceId {
        let mut txn = store.new_transaction().await.unwrap();
        txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let coll = txn.notifications_with_uid("uid1", true).await.unwrap().unwrap();
        coll.write_notification(&mut txn, "old.xml", INVITE, "<a/>").await.unwrap();
        txn.commit().unwrap();
        coll.resource_id()
    }

    fn assert_no_rows_left(store: &Store) {
        store.committed(|t| {
            assert!(t.notification_homes.all().is_empty());
            assert!(t.notifications.all().is_empty());
            assert!(t.properties.all().is_empty());
            assert!(t.resources.all().is_empty());
        });
    }

    #[tokio::test]
    async fn remove_home_waits_for_open_notification_writers() {
        let store = quick_timeout_store();
        let collection_id = home_with_notifications(&store).await;

        let mut writer = store.new_transaction().await.unwrap();
        let coll = writer.notifications_with_uid("uid1", false).await.unwrap().unwrap();
        writer
            .set_property(
                collection_id,
                PropertyKey::global(PropertyName::content_language()),
                PropertyValue::from("en"),
            )
            .await
            .unwrap();
        coll.write_notification(&mut writer, "new.xml", INVITE, "<b/>").await.unwrap();

        let mut remover = store.new_transaction().await.unwrap();
        let err = remover.remove_home("uid1").await.unwrap_err();
        assert!(matches!(err, DataStoreError::Conflict { .. }));
        writer.commit().unwrap();

        let mut remover = store.new_transaction().await.unwrap();
        remover.remove_home("uid1").await.unwrap();
        remover.commit().unwrap();
        assert_no_rows_left(&store);
    }

    #[tokio::test]
    async fn notification_writes_wait_for_home_removal() {
        let store = quick_timeout_store();
        let collection_id = home_with_notifications(&store).await;

        let mut writer = store.new_transaction().await.unwrap();
        let coll = writer.notifications_with_uid("uid1", false).await.unwrap().unwrap();
        let old = coll.notification_with_name(&writer, "old.xml").unwrap().unwrap();

        let mut remover = store.new_transaction().await.unwrap();
        remover.remove_home("uid1").await.unwrap();

        let err = writer
            .set_property(
                collection_id,
                PropertyKey::global(PropertyName::content_language()),
                PropertyValue::from("en"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::Conflict { .. }));

        let mut writer = store.new_transaction().await.unwrap();
        let err = writer
            .set_property(
                old.resource_id(),
                PropertyKey::global(PropertyName::content_language()),
                PropertyValue::from("en"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::Conflict { .. }));

        remover.commit().unwrap();
        assert_no_rows_left(&store);
    }
}
