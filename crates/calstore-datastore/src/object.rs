//! Calendar objects and their attachments.

use std::io::{self, Read};

use calstore_attach::{validate_filename, AttachError, AttachmentSource};
use calstore_types::{epoch_seconds, now_timestamp, ObjectMetadata, PropertyMap, ResourceId, TypeError};
use tracing::debug;

use crate::component::ComponentType;
use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{LockKey, LockMode};
use crate::tables::{AttachmentRow, ObjectRow};
use crate::transaction::Transaction;

/// Snapshot of one calendar object row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarObject {
    row: ObjectRow,
}

/// Snapshot of one attachment row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    row: AttachmentRow,
}

impl CalendarObject {
    pub(crate) fn from_row(row: ObjectRow) -> Self {
        Self { row }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.row.resource_id
    }

    pub fn calendar_id(&self) -> ResourceId {
        self.row.calendar_id
    }

    pub fn name(&self) -> &str {
        &self.row.name
    }

    /// The component body exactly as it was written.
    pub fn component(&self) -> &str {
        &self.row.component
    }

    pub fn component_type(&self) -> ComponentType {
        self.row.component_type
    }

    pub fn uid(&self) -> &str {
        &self.row.uid
    }

    pub fn metadata(&self) -> &ObjectMetadata {
        &self.row.metadata
    }

    /// Namespace of this object's attachments, assigned with the first one.
    pub fn dropbox_id(&self) -> Option<&str> {
        self.row.dropbox_id.as_deref()
    }

    pub fn created(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.created)
    }

    pub fn modified(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.modified)
    }

    pub fn properties(&self, txn: &Transaction) -> DataStoreResult<PropertyMap> {
        txn.properties(self.row.resource_id)
    }

    fn key(&self) -> (ResourceId, String) {
        (self.row.calendar_id, self.row.name.clone())
    }

    /// Lock this object's row and re-read it.
    async fn lock_current(&self, txn: &mut Transaction) -> DataStoreResult<ObjectRow> {
        txn.lock_all([
            (LockKey::Resource(self.row.calendar_id), LockMode::Shared),
            (LockKey::Object(self.row.calendar_id, self.row.name.clone()), LockMode::Exclusive),
        ])
        .await?;
        let key = self.key();
        txn.read(|t, c| c.objects.get(&t.objects, &key))?
            .ok_or_else(|| DataStoreError::not_found("calendar object", self.row.name.clone()))
    }

    /// Replace the body and metadata. The component UID may not change.
    pub async fn set_component(
        &self,
        txn: &mut Transaction,
        component: &str,
        metadata: ObjectMetadata,
    ) -> DataStoreResult<CalendarObject> {
        let parsed = txn
            .parser()
            .parse(component)
            .map_err(|reason| DataStoreError::validation(format!("component {}", self.row.name), reason))?;
        let mut row = self.lock_current(txn).await?;
        if parsed.uid != row.uid {
            return Err(DataStoreError::validation(
                format!("component {}", row.name),
                format!("UID may not change from {} to {}", row.uid, parsed.uid),
            ));
        }
        row.component = component.to_string();
        row.component_type = parsed.component_type;
        row.metadata = metadata;
        row.modified = now_timestamp();
        let key = self.key();
        txn.write(|_, c| {
            c.objects.put(key, row.clone());
            Ok(CalendarObject::from_row(row))
        })
    }

    pub fn attachment_with_name(&self, txn: &Transaction, name: &str) -> DataStoreResult<Option<Attachment>> {
        let key = (self.row.resource_id, name.to_string());
        txn.read(|t, c| c.attachments.get(&t.attachments, &key).map(|row| Attachment { row }))
    }

    pub fn attachments(&self, txn: &Transaction) -> DataStoreResult<Vec<Attachment>> {
        txn.read(|t, c| {
            c.attachments
                .children(&t.attachments, self.row.resource_id)
                .into_iter()
                .map(|(_, row)| Attachment { row })
                .collect()
        })
    }

    /// Write an attachment from `content`, replacing one with the same name.
    ///
    /// The bytes are staged beside the final path and moved into place when
    /// the transaction commits. Until then other transactions keep reading
    /// the previous content; a rollback discards the staged bytes.
    pub async fn store_attachment(
        &self,
        txn: &mut Transaction,
        name: &str,
        content_type: &str,
        mut content: impl Read,
    ) -> DataStoreResult<Attachment> {
        validate_filename(name)?;
        let mut row = self.lock_current(txn).await?;
        let object_id = row.resource_id;
        txn.lock_all([
            (LockKey::Resource(object_id), LockMode::Shared),
            (LockKey::Attachment(object_id, name.to_string()), LockMode::Exclusive),
        ])
        .await?;

        let dropbox_id = row
            .dropbox_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}.dropbox", row.uid, object_id));
        let existing = self.attachment_with_name(txn, name)?;

        let mut sink = txn.attachment_store().store(&dropbox_id, name)?;
        io::copy(&mut content, &mut sink).map_err(AttachError::Io)?;
        let staged = sink.stage()?;
        let size = staged.size();
        let content_hash = staged.content_hash().to_string();
        txn.stage_attachment((dropbox_id.clone(), name.to_string()), staged);

        let now = now_timestamp();
        let attachment = AttachmentRow {
            object_id,
            name: name.to_string(),
            content_type: content_type.to_string(),
            size,
            content_hash,
            created: existing.map(|a| a.row.created).unwrap_or_else(|| now.clone()),
            modified: now,
        };
        let assign_dropbox = row.dropbox_id.is_none();
        row.dropbox_id = Some(dropbox_id);
        let key = self.key();
        txn.write(|_, c| {
            if assign_dropbox {
                c.objects.put(key, row);
            }
            c.attachments.put((object_id, name.to_string()), attachment.clone());
            Ok(())
        })?;
        debug!(txn = txn.id(), object = %object_id, name, size = attachment.size, "attachment stored");
        Ok(Attachment { row: attachment })
    }

    /// Open an attachment for reading.
    pub fn retrieve_attachment(&self, txn: &Transaction, name: &str) -> DataStoreResult<AttachmentSource> {
        let key = self.key();
        let row = txn
            .read(|t, c| c.objects.get(&t.objects, &key))?
            .ok_or_else(|| DataStoreError::not_found("calendar object", self.row.name.clone()))?;
        let missing = || DataStoreError::not_found("attachment", name);
        let dropbox_id = row.dropbox_id.ok_or_else(missing)?;
        self.attachment_with_name(txn, name)?.ok_or_else(missing)?;
        if let Some(staged) = txn.staged_attachment(&dropbox_id, name) {
            return Ok(staged.open()?);
        }
        Ok(txn.attachment_store().retrieve(&dropbox_id, name)?)
    }

    /// Delete an attachment row; its file is unlinked once this commits.
    pub async fn remove_attachment_with_name(&self, txn: &mut Transaction, name: &str) -> DataStoreResult<()> {
        let object_id = self.row.resource_id;
        txn.lock_all([
            (LockKey::Resource(object_id), LockMode::Shared),
            (LockKey::Attachment(object_id, name.to_string()), LockMode::Exclusive),
        ])
        .await?;
        let key = self.key();
        let dropbox_id = txn
            .read(|t, c| c.objects.get(&t.objects, &key))?
            .and_then(|row| row.dropbox_id)
            .ok_or_else(|| DataStoreError::not_found("attachment", name))?;
        txn.write(|t, c| {
            let key = (object_id, name.to_string());
            if c.attachments.get(&t.attachments, &key).is_none() {
                return Err(DataStoreError::not_found("attachment", name));
            }
            c.attachments.delete(key);
            Ok(())
        })?;
        txn.unlink_after_commit([(dropbox_id, name.to_string())]);
        Ok(())
    }
}

impl Attachment {
    pub fn name(&self) -> &str {
        &self.row.name
    }

    pub fn content_type(&self) -> &str {
        &self.row.content_type
    }

    pub fn size(&self) -> u64 {
        self.row.size
    }

    /// Hex BLAKE3 digest of the content.
    pub fn content_hash(&self) -> &str {
        &self.row.content_hash
    }

    pub fn created(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.created)
    }

    pub fn modified(&self) -> Result<i64, TypeError> {
        epoch_seconds(&self.row.modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::tests::event;
    use crate::config::StoreConfig;
    use crate::home::DEFAULT_CALENDAR;
    use crate::store::Store;

    async fn object(store: &Store, name: &str) -> (Transaction, CalendarObject) {
        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", true).await.unwrap().unwrap();
        let cal = home.calendar_with_name(&txn, DEFAULT_CALENDAR).unwrap().unwrap();
        let obj = cal
            .create_calendar_object_with_name(&mut txn, name, &event(name), ObjectMetadata::default())
            .await
            .unwrap();
        (txn, obj)
    }

    fn reload(txn: &Transaction, obj: &CalendarObject) -> CalendarObject {
        let key = obj.key();
        txn.read(|t, c| c.objects.get(&t.objects, &key))
            .unwrap()
            .map(CalendarObject::from_row)
            .unwrap()
    }

    #[tokio::test]
    async fn first_attachment_assigns_dropbox_id() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        let attachment = obj
            .store_attachment(&mut txn, "agenda.txt", "text/plain", &b"item one\nitem two\n"[..])
            .await
            .unwrap();
        assert_eq!(attachment.size(), 18);
        assert_eq!(attachment.content_type(), "text/plain");

        let reloaded = reload(&txn, &obj);
        let expected = format!("1.ics-{}.dropbox", obj.resource_id());
        assert_eq!(reloaded.dropbox_id(), Some(expected.as_str()));
        txn.commit().unwrap();

        let txn = store.new_transaction().await.unwrap();
        let data = obj.retrieve_attachment(&txn, "agenda.txt").unwrap().read_to_vec().unwrap();
        assert_eq!(data, b"item one\nitem two\n");
        assert_eq!(obj.attachments(&txn).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn objects_with_same_filename_do_not_collide() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, first) = object(&store, "1.ics").await;
        let home = txn.home("uid1").unwrap().unwrap();
        let cal = home.calendar_with_name(&txn, DEFAULT_CALENDAR).unwrap().unwrap();
        let second = cal
            .create_calendar_object_with_name(&mut txn, "2.ics", &event("2.ics"), ObjectMetadata::default())
            .await
            .unwrap();
        first.store_attachment(&mut txn, "same.bin", "application/octet-stream", &b"first"[..]).await.unwrap();
        second.store_attachment(&mut txn, "same.bin", "application/octet-stream", &b"second"[..]).await.unwrap();

        assert_eq!(first.retrieve_attachment(&txn, "same.bin").unwrap().read_to_vec().unwrap(), b"first");
        assert_eq!(second.retrieve_attachment(&txn, "same.bin").unwrap().read_to_vec().unwrap(), b"second");
    }

    fn dropbox_entries(store: &Store, dropbox_id: &str) -> usize {
        let path = store.attachments().path_for(dropbox_id, "x").unwrap();
        match std::fs::read_dir(path.parent().unwrap()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[tokio::test]
    async fn aborted_attachment_file_is_removed() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        txn.commit().unwrap();

        let mut txn = store.new_transaction().await.unwrap();
        obj.store_attachment(&mut txn, "draft.txt", "text/plain", &b"draft"[..]).await.unwrap();
        let dropbox_id = reload(&txn, &obj).dropbox_id().unwrap().to_string();
        assert!(!store.attachments().exists(&dropbox_id, "draft.txt").unwrap());
        assert_eq!(obj.retrieve_attachment(&txn, "draft.txt").unwrap().read_to_vec().unwrap(), b"draft");
        txn.abort();
        assert!(!store.attachments().exists(&dropbox_id, "draft.txt").unwrap());
        assert_eq!(dropbox_entries(&store, &dropbox_id), 0);
    }

    #[tokio::test]
    async fn aborted_overwrite_keeps_committed_content() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        obj.store_attachment(&mut txn, "a.txt", "text/plain", &b"old"[..]).await.unwrap();
        txn.commit().unwrap();

        let mut writer = store.new_transaction().await.unwrap();
        let dropbox_id = reload(&writer, &obj).dropbox_id().unwrap().to_string();
        let attachment = obj
            .store_attachment(&mut writer, "a.txt", "text/plain", &b"UNCOMMITTED-NEW"[..])
            .await
            .unwrap();
        assert_eq!(attachment.size(), 15);
        assert_eq!(
            obj.retrieve_attachment(&writer, "a.txt").unwrap().read_to_vec().unwrap(),
            b"UNCOMMITTED-NEW"
        );

        let reader = store.new_transaction().await.unwrap();
        assert_eq!(obj.retrieve_attachment(&reader, "a.txt").unwrap().read_to_vec().unwrap(), b"old");
        assert_eq!(obj.attachment_with_name(&reader, "a.txt").unwrap().unwrap().size(), 3);

        writer.abort();
        assert_eq!(obj.retrieve_attachment(&reader, "a.txt").unwrap().read_to_vec().unwrap(), b"old");
        assert_eq!(dropbox_entries(&store, &dropbox_id), 1);
    }

    #[tokio::test]
    async fn committed_overwrite_replaces_content() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        obj.store_attachment(&mut txn, "a.txt", "text/plain", &b"old"[..]).await.unwrap();
        txn.commit().unwrap();

        let mut writer = store.new_transaction().await.unwrap();
        obj.store_attachment(&mut writer, "a.txt", "text/plain", &b"first draft"[..]).await.unwrap();
        obj.store_attachment(&mut writer, "a.txt", "text/plain", &b"new"[..]).await.unwrap();
        writer.commit().unwrap();

        let reader = store.new_transaction().await.unwrap();
        assert_eq!(obj.retrieve_attachment(&reader, "a.txt").unwrap().read_to_vec().unwrap(), b"new");
        let dropbox_id = reload(&reader, &obj).dropbox_id().unwrap().to_string();
        assert_eq!(dropbox_entries(&store, &dropbox_id), 1);
    }

    #[tokio::test]
    async fn attachment_stored_then_removed_in_one_transaction_leaves_no_file() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        obj.store_attachment(&mut txn, "tmp.txt", "text/plain", &b"tmp"[..]).await.unwrap();
        let dropbox_id = reload(&txn, &obj).dropbox_id().unwrap().to_string();
        obj.remove_attachment_with_name(&mut txn, "tmp.txt").await.unwrap();
        txn.commit().unwrap();
        assert!(!store.attachments().exists(&dropbox_id, "tmp.txt").unwrap());
        assert_eq!(dropbox_entries(&store, &dropbox_id), 0);
    }

    #[tokio::test]
    async fn removed_attachment_file_disappears_after_commit() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        obj.store_attachment(&mut txn, "a.txt", "text/plain", &b"a"[..]).await.unwrap();
        txn.commit().unwrap();

        let mut txn = store.new_transaction().await.unwrap();
        let dropbox_id = reload(&txn, &obj).dropbox_id().unwrap().to_string();
        obj.remove_attachment_with_name(&mut txn, "a.txt").await.unwrap();
        assert!(store.attachments().exists(&dropbox_id, "a.txt").unwrap());
        assert!(obj.attachment_with_name(&txn, "a.txt").unwrap().is_none());
        txn.commit().unwrap();
        assert!(!store.attachments().exists(&dropbox_id, "a.txt").unwrap());

        let mut txn = store.new_transaction().await.unwrap();
        assert!(matches!(
            obj.remove_attachment_with_name(&mut txn, "a.txt").await,
            Err(DataStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn removing_object_unlinks_its_attachments() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        obj.store_attachment(&mut txn, "a.txt", "text/plain", &b"a"[..]).await.unwrap();
        obj.store_attachment(&mut txn, "b.txt", "text/plain", &b"b"[..]).await.unwrap();
        let dropbox_id = reload(&txn, &obj).dropbox_id().unwrap().to_string();
        txn.commit().unwrap();

        let mut txn = store.new_transaction().await.unwrap();
        let home = txn.home_with_uid("uid1", false).await.unwrap().unwrap();
        let cal = home.calendar_with_name(&txn, DEFAULT_CALENDAR).unwrap().unwrap();
        cal.remove_calendar_object_with_name(&mut txn, "1.ics").await.unwrap();
        txn.commit().unwrap();

        assert!(!store.attachments().exists(&dropbox_id, "a.txt").unwrap());
        assert!(!store.attachments().exists(&dropbox_id, "b.txt").unwrap());
        assert!(store.committed(|t| t.attachments.all().is_empty()));
    }

    #[tokio::test]
    async fn bad_attachment_names_are_rejected() {
        let store = Store::open(StoreConfig::default()).unwrap();
        let (mut txn, obj) = object(&store, "1.ics").await;
        let err = obj
            .store_attachment(&mut txn, "../etc/passwd", "text/plain", &b"x"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::Attachment(AttachError::InvalidName { .. })));
        assert!(txn.is_open());
        assert!(matches!(
            obj.retrieve_attachment(&txn, "missing.txt"),
            Err(DataStoreError::NotFound { .. })
        ));
    }
}
