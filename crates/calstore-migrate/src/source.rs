//! Capabilities a legacy backend must expose to be migrated.

use async_trait::async_trait;
use calstore_types::{ObjectMetadata, PropertyMap};

use crate::error::MigrateResult;

/// Entry point into a legacy backend.
#[async_trait]
pub trait LegacyStore: Send + Sync {
    async fn calendar_home_with_uid(&self, uid: &str) -> MigrateResult<Option<Box<dyn LegacyHome>>>;
}

#[async_trait]
pub trait LegacyHome: Send + Sync {
    fn uid(&self) -> &str;

    async fn properties(&self) -> MigrateResult<PropertyMap>;

    /// Every calendar, ordered by name.
    async fn calendars(&self) -> MigrateResult<Vec<Box<dyn LegacyCalendar>>>;

    async fn calendar_with_name(&self, name: &str) -> MigrateResult<Option<Box<dyn LegacyCalendar>>>;
}

#[async_trait]
pub trait LegacyCalendar: Send + Sync {
    fn name(&self) -> &str;

    async fn properties(&self) -> MigrateResult<PropertyMap>;

    /// Every object, ordered by name.
    async fn calendar_objects(&self) -> MigrateResult<Vec<LegacyObject>>;
}

/// One calendar object of a legacy calendar.
#[async_trait]
pub trait LegacyCalendarSource: Send + Sync {
    /// The raw component body.
    async fn component(&self) -> MigrateResult<String>;

    async fn properties(&self) -> MigrateResult<PropertyMap>;

    async fn metadata(&self) -> MigrateResult<ObjectMetadata> {
        Ok(ObjectMetadata::default())
    }
}

/// A named object handle as listed by [`LegacyCalendar::calendar_objects`].
pub struct LegacyObject {
    pub name: String,
    pub source: Box<dyn LegacyCalendarSource>,
}

impl LegacyObject {
    pub fn new(name: impl Into<String>, source: impl LegacyCalendarSource + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for LegacyObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyObject").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Transforms a source component body before it is written.
pub trait ComponentFilter: Send + Sync {
    fn filter(&self, component: String) -> MigrateResult<String>;
}

impl<F> ComponentFilter for F
where
    F: Fn(String) -> MigrateResult<String> + Send + Sync,
{
    fn filter(&self, component: String) -> MigrateResult<String> {
        self(component)
    }
}

/// Writes every component unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl ComponentFilter for PassThrough {
    fn filter(&self, component: String) -> MigrateResult<String> {
        Ok(component)
    }
}
