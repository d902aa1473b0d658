//! Legacy backend over a plain directory tree.
//!
//! ```text
//! <root>/<uid>/.properties.json                  home properties
//! <root>/<uid>/<calendar>/.properties.json       calendar properties
//! <root>/<uid>/<calendar>/<name>.ics             object body
//! <root>/<uid>/<calendar>/.<name>.ics.properties.json
//! ```
//!
//! Sidecars are JSON objects mapping Clark-notation property names to
//! values. Missing sidecars mean no properties. Hidden entries are never
//! listed as calendars or objects.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calstore_types::{PropertyKey, PropertyMap, PropertyName, PropertyValue};
use tokio::fs;
use tracing::debug;

use crate::error::{MigrateError, MigrateResult};
use crate::source::{LegacyCalendar, LegacyCalendarSource, LegacyHome, LegacyObject, LegacyStore};

const SIDECAR: &str = ".properties.json";
const OBJECT_EXTENSION: &str = "ics";

#[derive(Clone, Debug)]
pub struct FileLegacyStore {
    root: PathBuf,
}

impl FileLegacyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Uids of every home directory under the root, sorted.
    pub async fn home_uids(&self) -> MigrateResult<Vec<String>> {
        list_entries(&self.root, |path| path.is_dir()).await
    }
}

#[async_trait]
impl LegacyStore for FileLegacyStore {
    async fn calendar_home_with_uid(&self, uid: &str) -> MigrateResult<Option<Box<dyn LegacyHome>>> {
        check_segment(uid)?;
        let path = self.root.join(uid);
        if !is_dir(&path).await? {
            return Ok(None);
        }
        Ok(Some(Box::new(FileLegacyHome {
            uid: uid.to_string(),
            path,
        })))
    }
}

#[derive(Clone, Debug)]
pub struct FileLegacyHome {
    uid: String,
    path: PathBuf,
}

#[async_trait]
impl LegacyHome for FileLegacyHome {
    fn uid(&self) -> &str {
        &self.uid
    }

    async fn properties(&self) -> MigrateResult<PropertyMap> {
        read_sidecar(&self.path.join(SIDECAR)).await
    }

    async fn calendars(&self) -> MigrateResult<Vec<Box<dyn LegacyCalendar>>> {
        let names = list_entries(&self.path, |path| path.is_dir()).await?;
        Ok(names
            .into_iter()
            .map(|name| {
                let path = self.path.join(&name);
                Box::new(FileLegacyCalendar { name, path }) as Box<dyn LegacyCalendar>
            })
            .collect())
    }

    async fn calendar_with_name(&self, name: &str) -> MigrateResult<Option<Box<dyn LegacyCalendar>>> {
        check_segment(name)?;
        let path = self.path.join(name);
        if name.starts_with('.') || !is_dir(&path).await? {
            return Ok(None);
        }
        Ok(Some(Box::new(FileLegacyCalendar {
            name: name.to_string(),
            path,
        })))
    }
}

#[derive(Clone, Debug)]
pub struct FileLegacyCalendar {
    name: String,
    path: PathBuf,
}

#[async_trait]
impl LegacyCalendar for FileLegacyCalendar {
    fn name(&self) -> &str {
        &self.name
    }

    async fn properties(&self) -> MigrateResult<PropertyMap> {
        read_sidecar(&self.path.join(SIDECAR)).await
    }

    async fn calendar_objects(&self) -> MigrateResult<Vec<LegacyObject>> {
        let names = list_entries(&self.path, |path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == OBJECT_EXTENSION)
        })
        .await?;
        debug!(calendar = %self.name, objects = names.len(), "listed legacy objects");
        Ok(names
            .into_iter()
            .map(|name| {
                let source = FileCalendarSource {
                    body: self.path.join(&name),
                    sidecar: self.path.join(format!(".{name}{SIDECAR}")),
                };
                LegacyObject::new(name, source)
            })
            .collect())
    }
}

#[derive(Clone, Debug)]
pub struct FileCalendarSource {
    body: PathBuf,
    sidecar: PathBuf,
}

#[async_trait]
impl LegacyCalendarSource for FileCalendarSource {
    async fn component(&self) -> MigrateResult<String> {
        Ok(fs::read_to_string(&self.body).await?)
    }

    async fn properties(&self) -> MigrateResult<PropertyMap> {
        read_sidecar(&self.sidecar).await
    }
}

fn check_segment(segment: &str) -> MigrateResult<()> {
    if segment.is_empty() || segment.contains(['/', '\\']) || segment == "." || segment == ".." {
        return Err(MigrateError::Source(format!("invalid path segment {segment:?}")));
    }
    Ok(())
}

async fn is_dir(path: &Path) -> MigrateResult<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Sorted names of the non-hidden entries of `dir` accepted by `keep`.
async fn list_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> MigrateResult<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') || !keep(&entry.path()) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

async fn read_sidecar(path: &Path) -> MigrateResult<PropertyMap> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PropertyMap::new()),
        Err(err) => return Err(err.into()),
    };
    let sidecar_error = |reason: String| MigrateError::Sidecar {
        path: path.to_path_buf(),
        reason,
    };
    let raw: BTreeMap<String, String> = serde_json::from_str(&text).map_err(|e| sidecar_error(e.to_string()))?;
    raw.into_iter()
        .map(|(name, value)| {
            let name = PropertyName::parse(&name).map_err(|e| sidecar_error(e.to_string()))?;
            Ok((PropertyKey::global(name), PropertyValue::new(value)))
        })
        .collect()
}
