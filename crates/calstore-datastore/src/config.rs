use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DataStoreError, DataStoreResult};

/// How hard a commit is forced to disk. Maps onto SQLite's
/// `synchronous` pragma.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalSync {
    /// `FULL`: the write-ahead log is synced on every commit.
    #[default]
    EveryCommit,
    /// `NORMAL`: synced at checkpoints only.
    OsDefault,
}

/// Datastore configuration, usually read from a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `calstore.db`. `None` keeps all rows in memory.
    pub data_dir: Option<PathBuf>,
    /// Root of the attachment tree. Defaults to `<data_dir>/attachments`,
    /// or a scratch directory removed on drop when neither is set.
    pub attachments_dir: Option<PathBuf>,
    /// Number of concurrently open transactions.
    pub max_connections: usize,
    /// How long a write waits for a row lock before failing with a conflict.
    pub lock_timeout_ms: u64,
    pub journal_sync: JournalSync,
    /// Create `calendar` and `inbox` when a home is provisioned.
    pub provision_default_calendars: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            attachments_dir: None,
            max_connections: 64,
            lock_timeout_ms: 5_000,
            journal_sync: JournalSync::default(),
            provision_default_calendars: true,
        }
    }
}

impl StoreConfig {
    /// A configuration persisting under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> DataStoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| DataStoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> DataStoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DataStoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> DataStoreResult<()> {
        if self.max_connections == 0 {
            return Err(DataStoreError::Config(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(DataStoreError::Config(
                "lock_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub(crate) fn database_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("calstore.db"))
    }

    pub(crate) fn resolved_attachments_dir(&self) -> Option<PathBuf> {
        self.attachments_dir
            .clone()
            .or_else(|| self.data_dir.as_ref().map(|dir| dir.join("attachments")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert!(c.data_dir.is_none());
        assert_eq!(c.max_connections, 64);
        assert_eq!(c.lock_timeout(), Duration::from_secs(5));
        assert_eq!(c.journal_sync, JournalSync::EveryCommit);
        assert!(c.provision_default_calendars);
        assert!(c.database_path().is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = StoreConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/calstore"
            lock_timeout_ms = 250
            journal_sync = "os_default"
            "#,
        )
        .unwrap();
        assert_eq!(c.data_dir, Some(PathBuf::from("/var/lib/calstore")));
        assert_eq!(c.lock_timeout_ms, 250);
        assert_eq!(c.journal_sync, JournalSync::OsDefault);
        assert_eq!(c.max_connections, 64);
        assert_eq!(
            c.resolved_attachments_dir(),
            Some(PathBuf::from("/var/lib/calstore/attachments"))
        );
        assert_eq!(
            c.database_path(),
            Some(PathBuf::from("/var/lib/calstore/calstore.db"))
        );
    }

    #[test]
    fn rejects_zero_pool() {
        assert!(matches!(
            StoreConfig::from_toml_str("max_connections = 0"),
            Err(DataStoreError::Config(_))
        ));
    }

    #[test]
    fn rejects_unknown_sync_mode() {
        assert!(StoreConfig::from_toml_str("journal_sync = \"sometimes\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calstore.toml");
        std::fs::write(&path, "provision_default_calendars = false\n").unwrap();
        let c = StoreConfig::load(&path).unwrap();
        assert!(!c.provision_default_calendars);
        assert!(StoreConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
