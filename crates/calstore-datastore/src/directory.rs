//! Principal lookup capability.
//!
//! The store only needs to turn a UID into something displayable when it
//! writes sharing records; authorization stays with the caller.

use std::collections::HashMap;

use async_trait::async_trait;

/// A principal as known to the directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub uid: String,
    pub display_name: String,
}

#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn record_with_uid(&self, uid: &str) -> Option<DirectoryRecord>;
}

/// Fixed in-memory directory.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    records: HashMap<String, DirectoryRecord>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        let uid = uid.into();
        self.records.insert(
            uid.clone(),
            DirectoryRecord {
                uid,
                display_name: display_name.into(),
            },
        );
        self
    }
}

#[async_trait]
impl DirectoryService for StaticDirectory {
    async fn record_with_uid(&self, uid: &str) -> Option<DirectoryRecord> {
        self.records.get(uid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_lookup() {
        let dir = StaticDirectory::new().with_record("uid2", "Wiki Owner");
        let record = dir.record_with_uid("uid2").await.unwrap();
        assert_eq!(record.display_name, "Wiki Owner");
        assert!(dir.record_with_uid("nobody").await.is_none());
    }
}
