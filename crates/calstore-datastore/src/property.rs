//! Dead property store.
//!
//! One shared table holds the property rows of every resource, keyed by
//! `(resource id, property key)`. Rows may only be written against a live
//! resource, and every removal path purges the rows of the removed resource
//! in the same change set.

use std::collections::BTreeMap;

use calstore_types::{PropertyKey, PropertyMap, PropertyName, PropertyValue, ResourceId};
use tracing::debug;

use crate::error::{DataStoreError, DataStoreResult};
use crate::locks::{LockKey, LockMode};
use crate::tables::{ChangeSet, Tables};
use crate::transaction::Transaction;

/// Delete every property row of `id`. Returns the number of rows removed.
pub(crate) fn purge_properties(t: &Tables<'_>, c: &mut ChangeSet, id: ResourceId) -> usize {
    let rows = c.properties.children(&t.properties, id);
    for (key, _) in &rows {
        c.properties.delete(key.clone());
    }
    rows.len()
}

fn is_live(t: &Tables<'_>, c: &ChangeSet, id: ResourceId) -> bool {
    c.resources.get(&t.resources, &id).is_some()
}

impl Transaction {
    /// Every property row of `id`, including per-viewer rows.
    pub fn properties(&self, id: ResourceId) -> DataStoreResult<PropertyMap> {
        self.read(|t, c| {
            c.properties
                .children(&t.properties, id)
                .into_iter()
                .map(|((_, key), value)| (key, value))
                .collect()
        })
    }

    /// Properties as seen by `viewer`: global rows overridden by the viewer's
    /// own rows.
    pub fn properties_for_viewer(
        &self,
        id: ResourceId,
        viewer: &str,
    ) -> DataStoreResult<BTreeMap<PropertyName, PropertyValue>> {
        let rows = self.properties(id)?;
        let mut view = BTreeMap::new();
        for (key, value) in &rows {
            if key.viewer.is_none() {
                view.insert(key.name.clone(), value.clone());
            }
        }
        for (key, value) in rows {
            if key.viewer.as_deref() == Some(viewer) {
                view.insert(key.name, value);
            }
        }
        Ok(view)
    }

    pub fn property(&self, id: ResourceId, key: &PropertyKey) -> DataStoreResult<Option<PropertyValue>> {
        self.read(|t, c| c.properties.get(&t.properties, &(id, key.clone())))
    }

    /// Create or overwrite one property row.
    pub async fn set_property(
        &mut self,
        id: ResourceId,
        key: PropertyKey,
        value: PropertyValue,
    ) -> DataStoreResult<()> {
        self.lock_all([
            (LockKey::Resource(id), LockMode::Shared),
            (LockKey::Property(id, key.clone()), LockMode::Exclusive),
        ])
        .await?;
        if key.viewer.as_deref() == Some("") {
            return Err(DataStoreError::validation(
                format!("property {}", key.name.to_clark()),
                "viewer UID may not be empty",
            ));
        }
        self.write(|t, c| {
            if !is_live(t, c, id) {
                return Err(DataStoreError::not_found("resource", id.to_string()));
            }
            c.properties.put((id, key), value);
            Ok(())
        })
    }

    /// Delete one property row.
    pub async fn remove_property(&mut self, id: ResourceId, key: &PropertyKey) -> DataStoreResult<()> {
        self.lock_all([
            (LockKey::Resource(id), LockMode::Shared),
            (LockKey::Property(id, key.clone()), LockMode::Exclusive),
        ])
        .await?;
        self.write(|t, c| {
            let row_key = (id, key.clone());
            if c.properties.get(&t.properties, &row_key).is_none() {
                return Err(DataStoreError::not_found("property", key.name.to_clark()));
            }
            c.properties.delete(row_key);
            Ok(())
        })
    }

    /// Delete every property row of `id`.
    pub async fn remove_all_properties(&mut self, id: ResourceId) -> DataStoreResult<usize> {
        self.lock(LockKey::Resource(id), LockMode::Exclusive).await?;
        let removed = self.write(|t, c| Ok(purge_properties(t, c, id)))?;
        debug!(txn = self.id(), resource_id = %id, removed, "properties purged");
        Ok(removed)
    }
}
