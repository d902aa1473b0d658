//! Migration of calendar data from a legacy backend into a calstore
//! [`Store`](calstore_datastore::Store).
//!
//! The engine only talks to the legacy side through the capability traits in
//! [`source`]; [`FileLegacyStore`] implements them over a directory tree.
//! Objects that fail to copy are counted and reported with their reason.
//! Failure to open or create a destination calendar ends the migration.

pub mod engine;
pub mod error;
pub mod file_source;
pub mod report;
pub mod source;

pub use engine::{migrate_calendar, migrate_home, MigrationOptions, Migrator};
pub use error::{MigrateError, MigrateResult};
pub use file_source::FileLegacyStore;
pub use report::{HomeMigrationReport, MigrationReport};
pub use source::{
    ComponentFilter, LegacyCalendar, LegacyCalendarSource, LegacyHome, LegacyObject, LegacyStore,
    PassThrough,
};
