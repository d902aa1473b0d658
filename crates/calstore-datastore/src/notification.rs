//! Per-user notification collections.

use calstore_types::{epoch_seconds, now_timestamp, ResourceId, TypeError};

use crate::calendar::validate_resource_name;
use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{LockKey, LockMode};
use crate::property::purge_properties;
use crate::provision::provision;
use crate::tables::{ChangeSet, NotificationHomeRow, NotificationRow, ResourceKind, Tables};
use crate::transaction::Transaction;

/// Snapshot of a user's notification collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationCollection {
    row: NotificationHomeRow,
}

/// Snapshot of one notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    row: NotificationRow,
}

impl Transaction {
    /// Look up the notification collection of `uid`, provisioning it when
    /// `create` is set.
    pub async fn notifications_with_uid(
        &mut self,
        uid: &str,
        create: bool,
    ) -> DataStoreResult<Option<NotificationCollection>> {
        let lookup = |t: &Tables<'_>, c: &ChangeSet| {
            c.notification_homes
                .get(&t.notification_homes, &uid.to_string())
                .map(|row| NotificationCollection { row })
        };
        if !create {
            return self.read(lookup);
        }
        if uid.is_empty() {
            return Err(DataStoreError::validation("notification uid", "must not be empty"));
        }
        let collection = provision(self, LockKey::Notifications(uid.to_string()), None, lookup, |t, c, id| {
            if c.notification_homes.get(&t.notification_homes, &uid.to_string()).is_some() {
                return Err(DataStoreError::ConstraintRace {
                    key: format!("notifications {uid}"),
                });
            }
            let row = NotificationHomeRow {
                resource_id: id,
                owner_uid: uid.to_string(),
                created: now_timestamp(),
            };
            c.notification_homes.put(uid.to_string(), row.clone());
            c.resources.put(id, ResourceKind::NotificationCollection);
            Ok(NotificationCollection { row })
        })
        .await?;
        Ok(Some(collection))
    }
}

impl NotificationCollection {
    pub fn resource_id(&self) -> ResourceId {
        self.row.resource_id
    }

    pub fn owner_uid(&self) -> &str {
        &self.row.owner_uid
    }

    pub fn notification_with_name(&self, txn: &Transaction, name: &str) -> DataStoreResult<Option<Notification>> {
        let key = (self.row.resource_id, name.to_string());
        txn.read(|t, c| c.notifications.get(&t.notifications, &key).map(|row| Notification { row }))
    }

    pub fn notifications(&self, txn: &Transaction) -> DataStoreResult<Vec<Notification>> {
        txn.read(|t, c| {
            c.notifications
                .children(&t.notifications, self.row.resource_id)
                .into_iter()
                .map(|(_, row)| Notification { row })
                .collect()
        })
    }

    /// Create or replace a notification. A replaced notification keeps its
    /// resource id and creation time.
    pub async fn write_notification(
        &self,
        txn: &mut Transaction,
        name: &str,
        xml_type: &str,
        data: &str,
    ) -> DataStoreResult<Notification> {
        validate_resource_name("notification name", name)?;
        let collection_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(collection_id), LockMode::Shared),
            (LockKey::Notification(collection_id, name.to_string()), LockMode::Exclusive),
        ])
        .await?;
        let fresh_id = txn.allocate_id();
        txn.write(|t, c| {
            if c.resources.get(&t.resources, &collection_id).is_none() {
                return Err(DataStoreError::not_found("notification collection", self.row.owner_uid.clone()));
            }
            let key = (collection_id, name.to_string());
            let now = now_timestamp();
            let row = match c.notifications.get(&t.notifications, &key) {
                Some(existing) => NotificationRow {
                    xml_type: xml_type.to_string(),
                    data: data.to_string(),
                    modified: now,
                    ..existing
                },
                None => {
                    c.resources.put(fresh_id, ResourceKind::Notification);
                    NotificationRow {
                        resource_id: fresh_id,
                        collection_id,
                        name: name.to_string(),
                        xml_type: xml_type.to_string(),
                        data: data.to_string(),
                        created: now.clone(),
                        modified: now,
                    }
                }
            };
            c.notifications.put(key, row.clone());
            Ok(Notification { row })
        })
    }

    /// Delete a notification and its properties.
    pub async fn remove_notification_with_name(&self, txn: &mut Transaction, name: &str) -> DataStoreResult<()> {
        let collection_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(collection_id), LockMode::Shared),
            (LockKey::Notification(collection_id, name.to_string()), LockMode::Exclusive),
        ])
        .await?;
        let key = (collection_id, name.to_string());
        let row = txn
            .read(|t, c| c.notifications.get(&t.notifications, &key))?
            .ok_or_else(|| DataStoreError::not_found("notification", name))?;
        txn.lock(LockKey::Resource(row.resource_id), LockMode::Exclusive).await?;
        txn.write(|t, c| {
            purge_properties(t, c, row.resource_id);
            c.resources.delete(row.resource_id);
            c.notifications.delete(key);
            Ok(())
        })
    }
}

impl Notification {
    pub fn resource_id(&self) -> ResourceId {
        self.row.resource_id
    }

    pub fn name(&self) -> &str {
        &self.row.name
    }

    pub fn xml_type(&self) -> &str {
        &self.row.xml_type
    }

    pub fn data(&self) -> &str {
        &self.row.data
    }

    pub fn created(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.created)
    }

    pub fn modified(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.modified)
    }
}
