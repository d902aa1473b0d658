//! SQLite schema and connection setup.
//!
//! The schema version is stored in `PRAGMA user_version`. Migrations are
//! forward-only. Every child table references its parent's row in
//! `resources` through a deferred foreign key, so a commit that would leave
//! a row owned by a removed resource fails as a whole.

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::config::JournalSync;
use crate::error::{DataStoreError, DataStoreResult};
use crate::tables::storage_error;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    resource_id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS homes (
    owner_uid TEXT PRIMARY KEY,
    resource_id INTEGER NOT NULL UNIQUE,
    created TEXT NOT NULL,
    modified TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_homes (
    owner_uid TEXT PRIMARY KEY,
    resource_id INTEGER NOT NULL UNIQUE,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS calendars (
    home_id INTEGER NOT NULL
        REFERENCES resources (resource_id) DEFERRABLE INITIALLY DEFERRED,
    name TEXT NOT NULL,
    resource_id INTEGER NOT NULL UNIQUE,
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    PRIMARY KEY (home_id, name)
);

CREATE TABLE IF NOT EXISTS calendar_objects (
    calendar_id INTEGER NOT NULL
        REFERENCES resources (resource_id) DEFERRABLE INITIALLY DEFERRED,
    name TEXT NOT NULL,
    resource_id INTEGER NOT NULL UNIQUE,
    uid TEXT NOT NULL,
    component_type TEXT NOT NULL,
    component TEXT NOT NULL,
    metadata TEXT NOT NULL,
    dropbox_id TEXT,
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    PRIMARY KEY (calendar_id, name)
);

CREATE UNIQUE INDEX IF NOT EXISTS calendar_objects_uid
    ON calendar_objects (calendar_id, uid);

CREATE TABLE IF NOT EXISTS notifications (
    collection_id INTEGER NOT NULL
        REFERENCES resources (resource_id) DEFERRABLE INITIALLY DEFERRED,
    name TEXT NOT NULL,
    resource_id INTEGER NOT NULL UNIQUE,
    xml_type TEXT NOT NULL,
    data TEXT NOT NULL,
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    PRIMARY KEY (collection_id, name)
);

CREATE TABLE IF NOT EXISTS attachments (
    object_id INTEGER NOT NULL
        REFERENCES resources (resource_id) DEFERRABLE INITIALLY DEFERRED,
    name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    PRIMARY KEY (object_id, name)
);

-- viewer '' holds the value every viewer sees.
CREATE TABLE IF NOT EXISTS properties (
    resource_id INTEGER NOT NULL
        REFERENCES resources (resource_id) DEFERRABLE INITIALLY DEFERRED,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    viewer TEXT NOT NULL DEFAULT '',
    value TEXT NOT NULL,
    PRIMARY KEY (resource_id, namespace, name, viewer)
);

CREATE TABLE IF NOT EXISTS shares (
    home_id INTEGER NOT NULL
        REFERENCES resources (resource_id) DEFERRABLE INITIALLY DEFERRED,
    share_uid TEXT NOT NULL,
    share_type TEXT NOT NULL,
    host_url TEXT NOT NULL,
    token TEXT NOT NULL,
    display_name TEXT NOT NULL,
    PRIMARY KEY (home_id, share_uid)
);
"#;

/// Open the database at `path`, or an in-memory one, and bring its schema
/// up to date.
pub(crate) fn open(path: Option<&Path>, sync: JournalSync) -> DataStoreResult<Connection> {
    let conn = match path {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    }
    .map_err(storage_error)?;
    configure(&conn, sync)?;
    migrate(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection, sync: JournalSync) -> DataStoreResult<()> {
    let synchronous = match sync {
        JournalSync::EveryCommit => "FULL",
        JournalSync::OsDefault => "NORMAL",
    };
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = {synchronous};"
    ))
    .map_err(storage_error)
}

fn migrate(conn: &Connection) -> DataStoreResult<()> {
    let current: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(storage_error)?;

    if current == 0 {
        info!(version = SCHEMA_VERSION, "initializing database schema");
        conn.execute_batch(SCHEMA_V1).map_err(storage_error)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(storage_error)?;
    } else if current > SCHEMA_VERSION {
        return Err(DataStoreError::StorageUnavailable(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

/// Highest resource id ever committed.
pub(crate) fn high_water(conn: &Connection) -> DataStoreResult<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(resource_id), 0) FROM resources",
        [],
        |row| row.get(0),
    )
    .map_err(storage_error)
}
