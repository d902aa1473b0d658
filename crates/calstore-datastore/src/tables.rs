//! Row storage.
//!
//! Committed rows live in SQLite, one table per entity kind plus a shared
//! property table keyed by resource id. [`Tables`] is a read view over the
//! connection. A transaction accumulates its writes in a [`ChangeSet`] of the
//! same shape, where `None` marks a deleted row; reads merge the two. Commit
//! writes the whole change set inside one SQLite transaction.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::rc::Rc;

use calstore_types::{
    ObjectMetadata, PropertyKey, PropertyName, PropertyValue, ResourceId, ShareType,
    SharedCollectionRecord,
};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, ErrorCode, Row, TransactionBehavior};

use crate::component::ComponentType;
use crate::error::DataStoreError;

/// Kind of a live resource id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Home,
    Calendar,
    CalendarObject,
    NotificationCollection,
    Notification,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Calendar => "calendar",
            Self::CalendarObject => "calendar object",
            Self::NotificationCollection => "notification collection",
            Self::Notification => "notification",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Calendar => "calendar",
            Self::CalendarObject => "object",
            Self::NotificationCollection => "notifications",
            Self::Notification => "notification",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "home" => Some(Self::Home),
            "calendar" => Some(Self::Calendar),
            "object" => Some(Self::CalendarObject),
            "notifications" => Some(Self::NotificationCollection),
            "notification" => Some(Self::Notification),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HomeRow {
    pub resource_id: ResourceId,
    pub owner_uid: String,
    pub created: String,
    pub modified: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationHomeRow {
    pub resource_id: ResourceId,
    pub owner_uid: String,
    pub created: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarRow {
    pub resource_id: ResourceId,
    pub home_id: ResourceId,
    pub name: String,
    pub created: String,
    pub modified: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRow {
    pub resource_id: ResourceId,
    pub calendar_id: ResourceId,
    pub name: String,
    pub component: String,
    pub component_type: ComponentType,
    pub uid: String,
    pub metadata: ObjectMetadata,
    pub dropbox_id: Option<String>,
    pub created: String,
    pub modified: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationRow {
    pub resource_id: ResourceId,
    pub collection_id: ResourceId,
    pub name: String,
    pub xml_type: String,
    pub data: String,
    pub created: String,
    pub modified: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentRow {
    pub object_id: ResourceId,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub content_hash: String,
    pub created: String,
    pub modified: String,
}

pub(crate) type ChildKey = (ResourceId, String);
pub(crate) type PropertyRowKey = (ResourceId, PropertyKey);

/// Keys of rows owned by a parent resource.
pub(crate) trait ParentKey {
    fn parent(&self) -> ResourceId;
}

impl<T> ParentKey for (ResourceId, T) {
    fn parent(&self) -> ResourceId {
        self.0
    }
}

/// Map a SQLite failure onto the store's error taxonomy. Uniqueness and
/// ownership violations surface as [`DataStoreError::ConstraintRace`].
pub(crate) fn storage_error(err: rusqlite::Error) -> DataStoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            DataStoreError::ConstraintRace {
                key: err.to_string(),
            }
        }
        _ => DataStoreError::StorageUnavailable(err.to_string()),
    }
}

fn id_value(id: ResourceId) -> Value {
    Value::Integer(id.get())
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn resource_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<ResourceId> {
    row.get::<_, i64>(idx).map(ResourceId::new)
}

fn decode_failure(idx: usize, reason: impl Into<String>) -> rusqlite::Error {
    let reason: String = reason.into();
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, reason.into())
}

/// One SQL table and how its rows map to Rust values.
///
/// Rows are selected as `KEY` columns followed by `VALUES` columns. For
/// child tables the first key column is the owning resource id.
pub(crate) trait Table {
    type Key: Ord + Clone;
    type Row: Clone;

    const NAME: &'static str;
    const KEY: &'static [&'static str];
    const VALUES: &'static [&'static str];
    /// Column naming the entity a row stands for. A write may only update a
    /// committed row of the same entity.
    const IDENTITY: Option<&'static str> = None;

    fn bind_key(key: &Self::Key) -> Vec<Value>;
    fn bind_row(row: &Self::Row) -> rusqlite::Result<Vec<Value>>;
    fn decode(row: &Row<'_>) -> rusqlite::Result<(Self::Key, Self::Row)>;
}

pub(crate) struct Homes;
pub(crate) struct NotificationHomes;
pub(crate) struct Calendars;
pub(crate) struct Objects;
pub(crate) struct Notifications;
pub(crate) struct Attachments;
pub(crate) struct Properties;
pub(crate) struct Shares;
pub(crate) struct Resources;

impl Table for Homes {
    type Key = String;
    type Row = HomeRow;
    const NAME: &'static str = "homes";
    const IDENTITY: Option<&'static str> = Some("resource_id");
    const KEY: &'static [&'static str] = &["owner_uid"];
    const VALUES: &'static [&'static str] = &["resource_id", "created", "modified"];

    fn bind_key(key: &String) -> Vec<Value> {
        vec![text(key)]
    }

    fn bind_row(row: &HomeRow) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![id_value(row.resource_id), text(&row.created), text(&row.modified)])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(String, HomeRow)> {
        let owner_uid: String = row.get(0)?;
        Ok((
            owner_uid.clone(),
            HomeRow {
                resource_id: resource_id(row, 1)?,
                owner_uid,
                created: row.get(2)?,
                modified: row.get(3)?,
            },
        ))
    }
}

impl Table for NotificationHomes {
    type Key = String;
    type Row = NotificationHomeRow;
    const NAME: &'static str = "notification_homes";
    const IDENTITY: Option<&'static str> = Some("resource_id");
    const KEY: &'static [&'static str] = &["owner_uid"];
    const VALUES: &'static [&'static str] = &["resource_id", "created"];

    fn bind_key(key: &String) -> Vec<Value> {
        vec![text(key)]
    }

    fn bind_row(row: &NotificationHomeRow) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![id_value(row.resource_id), text(&row.created)])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(String, NotificationHomeRow)> {
        let owner_uid: String = row.get(0)?;
        Ok((
            owner_uid.clone(),
            NotificationHomeRow {
                resource_id: resource_id(row, 1)?,
                owner_uid,
                created: row.get(2)?,
            },
        ))
    }
}

impl Table for Calendars {
    type Key = ChildKey;
    type Row = CalendarRow;
    const NAME: &'static str = "calendars";
    const IDENTITY: Option<&'static str> = Some("resource_id");
    const KEY: &'static [&'static str] = &["home_id", "name"];
    const VALUES: &'static [&'static str] = &["resource_id", "created", "modified"];

    fn bind_key((home_id, name): &ChildKey) -> Vec<Value> {
        vec![id_value(*home_id), text(name)]
    }

    fn bind_row(row: &CalendarRow) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![id_value(row.resource_id), text(&row.created), text(&row.modified)])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(ChildKey, CalendarRow)> {
        let home_id = resource_id(row, 0)?;
        let name: String = row.get(1)?;
        Ok((
            (home_id, name.clone()),
            CalendarRow {
                resource_id: resource_id(row, 2)?,
                home_id,
                name,
                created: row.get(3)?,
                modified: row.get(4)?,
            },
        ))
    }
}

impl Table for Objects {
    type Key = ChildKey;
    type Row = ObjectRow;
    const NAME: &'static str = "calendar_objects";
    const IDENTITY: Option<&'static str> = Some("resource_id");
    const KEY: &'static [&'static str] = &["calendar_id", "name"];
    const VALUES: &'static [&'static str] = &[
        "resource_id",
        "uid",
        "component_type",
        "component",
        "metadata",
        "dropbox_id",
        "created",
        "modified",
    ];

    fn bind_key((calendar_id, name): &ChildKey) -> Vec<Value> {
        vec![id_value(*calendar_id), text(name)]
    }

    fn bind_row(row: &ObjectRow) -> rusqlite::Result<Vec<Value>> {
        let metadata = serde_json::to_string(&row.metadata)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(vec![
            id_value(row.resource_id),
            text(&row.uid),
            text(row.component_type.as_str()),
            text(&row.component),
            Value::Text(metadata),
            row.dropbox_id.clone().map_or(Value::Null, Value::Text),
            text(&row.created),
            text(&row.modified),
        ])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(ChildKey, ObjectRow)> {
        let calendar_id = resource_id(row, 0)?;
        let name: String = row.get(1)?;
        let component_type: String = row.get(4)?;
        let component_type = ComponentType::from_name(&component_type)
            .ok_or_else(|| decode_failure(4, format!("unknown component type {component_type}")))?;
        let metadata: String = row.get(6)?;
        let metadata: ObjectMetadata =
            serde_json::from_str(&metadata).map_err(|e| decode_failure(6, e.to_string()))?;
        Ok((
            (calendar_id, name.clone()),
            ObjectRow {
                resource_id: resource_id(row, 2)?,
                calendar_id,
                name,
                uid: row.get(3)?,
                component_type,
                component: row.get(5)?,
                metadata,
                dropbox_id: row.get(7)?,
                created: row.get(8)?,
                modified: row.get(9)?,
            },
        ))
    }
}

impl Table for Notifications {
    type Key = ChildKey;
    type Row = NotificationRow;
    const NAME: &'static str = "notifications";
    const IDENTITY: Option<&'static str> = Some("resource_id");
    const KEY: &'static [&'static str] = &["collection_id", "name"];
    const VALUES: &'static [&'static str] =
        &["resource_id", "xml_type", "data", "created", "modified"];

    fn bind_key((collection_id, name): &ChildKey) -> Vec<Value> {
        vec![id_value(*collection_id), text(name)]
    }

    fn bind_row(row: &NotificationRow) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![
            id_value(row.resource_id),
            text(&row.xml_type),
            text(&row.data),
            text(&row.created),
            text(&row.modified),
        ])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(ChildKey, NotificationRow)> {
        let collection_id = resource_id(row, 0)?;
        let name: String = row.get(1)?;
        Ok((
            (collection_id, name.clone()),
            NotificationRow {
                resource_id: resource_id(row, 2)?,
                collection_id,
                name,
                xml_type: row.get(3)?,
                data: row.get(4)?,
                created: row.get(5)?,
                modified: row.get(6)?,
            },
        ))
    }
}

impl Table for Attachments {
    type Key = ChildKey;
    type Row = AttachmentRow;
    const NAME: &'static str = "attachments";
    const KEY: &'static [&'static str] = &["object_id", "name"];
    const VALUES: &'static [&'static str] =
        &["content_type", "size", "content_hash", "created", "modified"];

    fn bind_key((object_id, name): &ChildKey) -> Vec<Value> {
        vec![id_value(*object_id), text(name)]
    }

    fn bind_row(row: &AttachmentRow) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![
            text(&row.content_type),
            Value::Integer(row.size as i64),
            text(&row.content_hash),
            text(&row.created),
            text(&row.modified),
        ])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(ChildKey, AttachmentRow)> {
        let object_id = resource_id(row, 0)?;
        let name: String = row.get(1)?;
        Ok((
            (object_id, name.clone()),
            AttachmentRow {
                object_id,
                name,
                content_type: row.get(2)?,
                size: row.get::<_, i64>(3)? as u64,
                content_hash: row.get(4)?,
                created: row.get(5)?,
                modified: row.get(6)?,
            },
        ))
    }
}

impl Table for Properties {
    type Key = PropertyRowKey;
    type Row = PropertyValue;
    const NAME: &'static str = "properties";
    const KEY: &'static [&'static str] = &["resource_id", "namespace", "name", "viewer"];
    const VALUES: &'static [&'static str] = &["value"];

    fn bind_key((id, key): &PropertyRowKey) -> Vec<Value> {
        vec![
            id_value(*id),
            text(&key.name.namespace),
            text(&key.name.name),
            text(key.viewer.as_deref().unwrap_or("")),
        ]
    }

    fn bind_row(value: &PropertyValue) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![text(value.as_str())])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(PropertyRowKey, PropertyValue)> {
        let name = PropertyName::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?);
        let viewer: String = row.get(3)?;
        let key = if viewer.is_empty() {
            PropertyKey::global(name)
        } else {
            PropertyKey::for_viewer(name, viewer)
        };
        Ok(((resource_id(row, 0)?, key), PropertyValue::new(row.get::<_, String>(4)?)))
    }
}

impl Table for Shares {
    type Key = ChildKey;
    type Row = SharedCollectionRecord;
    const NAME: &'static str = "shares";
    const KEY: &'static [&'static str] = &["home_id", "share_uid"];
    const VALUES: &'static [&'static str] = &["share_type", "host_url", "token", "display_name"];

    fn bind_key((home_id, share_uid): &ChildKey) -> Vec<Value> {
        vec![id_value(*home_id), text(share_uid)]
    }

    fn bind_row(record: &SharedCollectionRecord) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![
            text(record.share_type.as_str()),
            text(&record.host_url),
            text(&record.token),
            text(&record.display_name),
        ])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(ChildKey, SharedCollectionRecord)> {
        let home_id = resource_id(row, 0)?;
        let share_uid: String = row.get(1)?;
        let share_type: String = row.get(2)?;
        let share_type: ShareType = share_type
            .parse()
            .map_err(|e: calstore_types::TypeError| decode_failure(2, e.to_string()))?;
        Ok((
            (home_id, share_uid.clone()),
            SharedCollectionRecord {
                share_uid,
                share_type,
                host_url: row.get(3)?,
                token: row.get(4)?,
                display_name: row.get(5)?,
            },
        ))
    }
}

impl Table for Resources {
    type Key = ResourceId;
    type Row = ResourceKind;
    const NAME: &'static str = "resources";
    const KEY: &'static [&'static str] = &["resource_id"];
    const VALUES: &'static [&'static str] = &["kind"];

    fn bind_key(id: &ResourceId) -> Vec<Value> {
        vec![id_value(*id)]
    }

    fn bind_row(kind: &ResourceKind) -> rusqlite::Result<Vec<Value>> {
        Ok(vec![text(kind.code())])
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(ResourceId, ResourceKind)> {
        let code: String = row.get(1)?;
        let kind = ResourceKind::from_code(&code)
            .ok_or_else(|| decode_failure(1, format!("unknown resource kind {code}")))?;
        Ok((resource_id(row, 0)?, kind))
    }
}

fn where_clause(columns: &[&str]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn select_sql<T: Table>(filter: &[&str]) -> String {
    let columns = T::KEY.iter().chain(T::VALUES).copied().collect::<Vec<_>>().join(", ");
    let mut sql = format!("SELECT {columns} FROM {}", T::NAME);
    if !filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause(filter));
    }
    sql
}

fn delete_sql<T: Table>() -> String {
    format!("DELETE FROM {} WHERE {}", T::NAME, where_clause(T::KEY))
}

/// Insert or update by primary key. Other unique indexes still reject the
/// row instead of replacing a neighbour, and an update never rebinds a key
/// to a different entity.
fn upsert_sql<T: Table>() -> String {
    let columns: Vec<&str> = T::KEY.iter().chain(T::VALUES).copied().collect();
    let placeholders = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
    let updates = T::VALUES
        .iter()
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT ({}) DO UPDATE SET {updates}",
        T::NAME,
        columns.join(", "),
        T::KEY.join(", "),
    );
    if let Some(identity) = T::IDENTITY {
        sql.push_str(&format!(" WHERE {identity} = excluded.{identity}"));
    }
    sql
}

type Failure = Rc<RefCell<Option<rusqlite::Error>>>;

/// Committed rows of one table, read through the connection.
///
/// Query failures are recorded on the owning [`Tables`] and reported by
/// [`Tables::finish`]; the failed read itself sees no rows.
pub(crate) struct SqlTable<'c, T> {
    conn: &'c Connection,
    failure: Failure,
    _table: PhantomData<T>,
}

impl<'c, T: Table> SqlTable<'c, T> {
    fn new(conn: &'c Connection, failure: &Failure) -> Self {
        Self {
            conn,
            failure: failure.clone(),
            _table: PhantomData,
        }
    }

    fn try_query(&self, filter: &[&str], params: Vec<Value>) -> rusqlite::Result<Vec<(T::Key, T::Row)>> {
        let mut stmt = self.conn.prepare_cached(&select_sql::<T>(filter))?;
        let rows = stmt.query_map(params_from_iter(params), |row| T::decode(row))?;
        rows.collect()
    }

    fn query(&self, filter: &[&str], params: Vec<Value>) -> Vec<(T::Key, T::Row)> {
        match self.try_query(filter, params) {
            Ok(rows) => rows,
            Err(e) => {
                self.failure.borrow_mut().get_or_insert(e);
                Vec::new()
            }
        }
    }

    pub fn get(&self, key: &T::Key) -> Option<T::Row> {
        self.query(T::KEY, T::bind_key(key)).into_iter().next().map(|(_, row)| row)
    }

    /// Rows whose first key column is `parent`.
    pub fn children(&self, parent: ResourceId) -> Vec<(T::Key, T::Row)> {
        self.query(&T::KEY[..1], vec![id_value(parent)])
    }

    pub fn all(&self) -> Vec<(T::Key, T::Row)> {
        self.query(&[], Vec::new())
    }
}

/// Read view of every table over one connection.
pub(crate) struct Tables<'c> {
    pub homes: SqlTable<'c, Homes>,
    pub notification_homes: SqlTable<'c, NotificationHomes>,
    pub calendars: SqlTable<'c, Calendars>,
    pub objects: SqlTable<'c, Objects>,
    pub notifications: SqlTable<'c, Notifications>,
    pub attachments: SqlTable<'c, Attachments>,
    pub properties: SqlTable<'c, Properties>,
    pub shares: SqlTable<'c, Shares>,
    pub resources: SqlTable<'c, Resources>,
    failure: Failure,
}

impl<'c> Tables<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        let failure = Failure::default();
        Self {
            homes: SqlTable::new(conn, &failure),
            notification_homes: SqlTable::new(conn, &failure),
            calendars: SqlTable::new(conn, &failure),
            objects: SqlTable::new(conn, &failure),
            notifications: SqlTable::new(conn, &failure),
            attachments: SqlTable::new(conn, &failure),
            properties: SqlTable::new(conn, &failure),
            shares: SqlTable::new(conn, &failure),
            resources: SqlTable::new(conn, &failure),
            failure,
        }
    }

    /// The first query failure seen through this view, if any.
    pub fn finish(self) -> Result<(), DataStoreError> {
        let failure = self.failure.borrow_mut().take();
        match failure {
            Some(e) => Err(DataStoreError::StorageUnavailable(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Pending writes against one table.
#[derive(Clone, Debug)]
pub(crate) struct Delta<K, V> {
    entries: BTreeMap<K, Option<V>>,
    /// Keys whose committed row goes away, even if a new row is put there
    /// later in the same transaction.
    removed: BTreeSet<K>,
}

impl<K, V> Default for Delta<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Delta<K, V> {
    pub fn put(&mut self, key: K, value: V) {
        self.entries.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: K) {
        self.removed.insert(key.clone());
        self.entries.insert(key, None);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Row as seen by the owning transaction.
    pub fn get<T: Table<Key = K, Row = V>>(&self, committed: &SqlTable<'_, T>, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(pending) => pending.clone(),
            None => committed.get(key),
        }
    }

    /// Rows owned by `parent` as seen by the owning transaction, in key order.
    pub fn children<T: Table<Key = K, Row = V>>(
        &self,
        committed: &SqlTable<'_, T>,
        parent: ResourceId,
    ) -> Vec<(K, V)>
    where
        K: ParentKey,
    {
        let pending = self.entries.iter().filter(|(key, _)| key.parent() == parent);
        merge(committed.children(parent), pending)
    }

    /// Every row as seen by the owning transaction.
    pub fn all<T: Table<Key = K, Row = V>>(&self, committed: &SqlTable<'_, T>) -> Vec<(K, V)> {
        merge(committed.all(), self.entries.iter())
    }

    fn delete_from<T: Table<Key = K, Row = V>>(&self, conn: &Connection) -> Result<(), DataStoreError> {
        let mut stmt = conn.prepare_cached(&delete_sql::<T>()).map_err(storage_error)?;
        for key in &self.removed {
            stmt.execute(params_from_iter(T::bind_key(key)))
                .map_err(storage_error)?;
        }
        Ok(())
    }

    fn upsert_into<T: Table<Key = K, Row = V>>(&self, conn: &Connection) -> Result<(), DataStoreError> {
        let mut stmt = conn.prepare_cached(&upsert_sql::<T>()).map_err(storage_error)?;
        for (key, pending) in &self.entries {
            if let Some(row) = pending {
                let mut params = T::bind_key(key);
                params.extend(T::bind_row(row).map_err(storage_error)?);
                let changed = stmt.execute(params_from_iter(params)).map_err(storage_error)?;
                if changed == 0 {
                    return Err(DataStoreError::ConstraintRace {
                        key: format!("{} row already bound to another resource", T::NAME),
                    });
                }
            }
        }
        Ok(())
    }
}

fn merge<'a, K: Ord + Clone + 'a, V: Clone + 'a>(
    committed: Vec<(K, V)>,
    pending: impl Iterator<Item = (&'a K, &'a Option<V>)>,
) -> Vec<(K, V)> {
    let mut merged: BTreeMap<K, V> = committed.into_iter().collect();
    for (key, value) in pending {
        match value {
            Some(value) => {
                merged.insert(key.clone(), value.clone());
            }
            None => {
                merged.remove(key);
            }
        }
    }
    merged.into_iter().collect()
}

/// Every write of one transaction, committed as a unit.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChangeSet {
    pub homes: Delta<String, HomeRow>,
    pub notification_homes: Delta<String, NotificationHomeRow>,
    pub calendars: Delta<ChildKey, CalendarRow>,
    pub objects: Delta<ChildKey, ObjectRow>,
    pub notifications: Delta<ChildKey, NotificationRow>,
    pub attachments: Delta<ChildKey, AttachmentRow>,
    pub properties: Delta<PropertyRowKey, PropertyValue>,
    pub shares: Delta<ChildKey, SharedCollectionRecord>,
    pub resources: Delta<ResourceId, ResourceKind>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn row_count(&self) -> usize {
        self.homes.len()
            + self.notification_homes.len()
            + self.calendars.len()
            + self.objects.len()
            + self.notifications.len()
            + self.attachments.len()
            + self.properties.len()
            + self.shares.len()
            + self.resources.len()
    }

    /// Write every pending row in one SQLite transaction.
    ///
    /// Deletions run first so a row moved to a new key (a rename) never
    /// collides with its own old copy on a unique column.
    pub fn commit(&self, conn: &mut Connection) -> Result<(), DataStoreError> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_error)?;
        self.write(&tx)?;
        tx.commit().map_err(storage_error)
    }

    fn write(&self, conn: &Connection) -> Result<(), DataStoreError> {
        self.properties.delete_from::<Properties>(conn)?;
        self.attachments.delete_from::<Attachments>(conn)?;
        self.shares.delete_from::<Shares>(conn)?;
        self.notifications.delete_from::<Notifications>(conn)?;
        self.objects.delete_from::<Objects>(conn)?;
        self.calendars.delete_from::<Calendars>(conn)?;
        self.notification_homes.delete_from::<NotificationHomes>(conn)?;
        self.homes.delete_from::<Homes>(conn)?;
        self.resources.delete_from::<Resources>(conn)?;

        self.resources.upsert_into::<Resources>(conn)?;
        self.homes.upsert_into::<Homes>(conn)?;
        self.notification_homes.upsert_into::<NotificationHomes>(conn)?;
        self.calendars.upsert_into::<Calendars>(conn)?;
        self.objects.upsert_into::<Objects>(conn)?;
        self.notifications.upsert_into::<Notifications>(conn)?;
        self.shares.upsert_into::<Shares>(conn)?;
        self.attachments.upsert_into::<Attachments>(conn)?;
        self.properties.upsert_into::<Properties>(conn)?;
        Ok(())
    }
}

/// In-memory database for unit tests that work on rows directly.
#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    crate::schema::open(None, crate::config::JournalSync::OsDefault).unwrap()
}
