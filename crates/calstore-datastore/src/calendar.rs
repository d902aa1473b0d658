//! Calendars and the objects inside them.

use calstore_types::{epoch_seconds, now_timestamp, ObjectMetadata, PropertyMap, ResourceId, TypeError};
use tracing::debug;

use crate::cascade;
use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{LockKey, LockMode};
use crate::object::CalendarObject;
use crate::tables::{CalendarRow, ObjectRow, ResourceKind};
use crate::transaction::Transaction;

/// Collection names that may never be used for a calendar.
const RESERVED_NAMES: [&str; 2] = ["outbox", "notifications"];

pub(crate) fn validate_calendar_name(name: &str) -> DataStoreResult<()> {
    validate_resource_name("calendar name", name)?;
    if RESERVED_NAMES.contains(&name) {
        return Err(DataStoreError::validation(
            "calendar name",
            format!("{name:?} is reserved"),
        ));
    }
    Ok(())
}

pub(crate) fn validate_resource_name(what: &str, name: &str) -> DataStoreResult<()> {
    if name.is_empty() {
        return Err(DataStoreError::validation(what, "must not be empty"));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(DataStoreError::validation(what, format!("{name:?} is not a valid path segment")));
    }
    Ok(())
}

/// Snapshot of one calendar row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Calendar {
    row: CalendarRow,
}

impl Calendar {
    pub(crate) fn from_row(row: CalendarRow) -> Self {
        Self { row }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.row.resource_id
    }

    pub fn home_id(&self) -> ResourceId {
        self.row.home_id
    }

    pub fn name(&self) -> &str {
        &self.row.name
    }

    pub fn is_inbox(&self) -> bool {
        self.row.name == crate::home::INBOX
    }

    /// Creation time in epoch seconds.
    pub fn created(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.created)
    }

    /// Last modification time in epoch seconds.
    pub fn modified(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.modified)
    }

    pub fn calendar_object_with_name(
        &self,
        txn: &Transaction,
        name: &str,
    ) -> DataStoreResult<Option<CalendarObject>> {
        let key = (self.row.resource_id, name.to_string());
        txn.read(|t, c| c.objects.get(&t.objects, &key).map(CalendarObject::from_row))
    }

    pub fn calendar_object_with_uid(
        &self,
        txn: &Transaction,
        uid: &str,
    ) -> DataStoreResult<Option<CalendarObject>> {
        Ok(self
            .calendar_objects(txn)?
            .into_iter()
            .find(|obj| obj.uid() == uid))
    }

    /// Every object of this calendar in name order.
    pub fn calendar_objects(&self, txn: &Transaction) -> DataStoreResult<Vec<CalendarObject>> {
        txn.read(|t, c| {
            c.objects
                .children(&t.objects, self.row.resource_id)
                .into_iter()
                .map(|(_, row)| CalendarObject::from_row(row))
                .collect()
        })
    }

    pub fn object_names(&self, txn: &Transaction) -> DataStoreResult<Vec<String>> {
        Ok(self
            .calendar_objects(txn)?
            .into_iter()
            .map(|obj| obj.name().to_string())
            .collect())
    }

    /// Store a new object. The body is validated by the store's component
    /// parser and kept verbatim together with `metadata`.
    pub async fn create_calendar_object_with_name(
        &self,
        txn: &mut Transaction,
        name: &str,
        component: &str,
        metadata: ObjectMetadata,
    ) -> DataStoreResult<CalendarObject> {
        validate_resource_name("calendar object name", name)?;
        let parsed = txn
            .parser()
            .parse(component)
            .map_err(|reason| DataStoreError::validation(format!("component {name}"), reason))?;

        let calendar_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(calendar_id), LockMode::Shared),
            (LockKey::Object(calendar_id, name.to_string()), LockMode::Exclusive),
            (LockKey::ObjectUid(calendar_id, parsed.uid.clone()), LockMode::Exclusive),
        ])
        .await?;
        let id = txn.allocate_id();
        let object = txn.write(|t, c| {
            if c.resources.get(&t.resources, &calendar_id).is_none() {
                return Err(DataStoreError::not_found("calendar", self.row.name.clone()));
            }
            let siblings = c.objects.children(&t.objects, calendar_id);
            if siblings.iter().any(|((_, n), _)| n == name) {
                return Err(DataStoreError::already_exists("calendar object", name));
            }
            if let Some((_, other)) = siblings.iter().find(|(_, row)| row.uid == parsed.uid) {
                return Err(DataStoreError::validation(
                    format!("component {name}"),
                    format!("UID {} already used by {}", parsed.uid, other.name),
                ));
            }
            let now = now_timestamp();
            let row = ObjectRow {
                resource_id: id,
                calendar_id,
                name: name.to_string(),
                component: component.to_string(),
                component_type: parsed.component_type,
                uid: parsed.uid.clone(),
                metadata,
                dropbox_id: None,
                created: now.clone(),
                modified: now,
            };
            c.objects.put((calendar_id, name.to_string()), row.clone());
            c.resources.put(id, ResourceKind::CalendarObject);
            Ok(CalendarObject::from_row(row))
        })?;
        debug!(txn = txn.id(), calendar = %calendar_id, name, "calendar object created");
        Ok(object)
    }

    /// Delete an object with its attachments and properties.
    pub async fn remove_calendar_object_with_name(
        &self,
        txn: &mut Transaction,
        name: &str,
    ) -> DataStoreResult<()> {
        let calendar_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(calendar_id), LockMode::Shared),
            (LockKey::Object(calendar_id, name.to_string()), LockMode::Exclusive),
        ])
        .await?;
        let row = txn
            .read(|t, c| c.objects.get(&t.objects, &(calendar_id, name.to_string())))?
            .ok_or_else(|| DataStoreError::not_found("calendar object", name))?;
        txn.lock(LockKey::Resource(row.resource_id), LockMode::Exclusive).await?;
        let files = txn.write(|t, c| Ok(cascade::remove_object(t, c, &row)))?;
        txn.unlink_after_commit(files);
        debug!(txn = txn.id(), calendar = %calendar_id, name, "calendar object removed");
        Ok(())
    }

    pub fn properties(&self, txn: &Transaction) -> DataStoreResult<PropertyMap> {
        txn.properties(self.row.resource_id)
    }
}
