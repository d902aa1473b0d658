//! Transactional calendar datastore.
//!
//! A [`Store`] holds calendar homes, their calendars and calendar objects,
//! per-user notification collections, dead properties of every resource,
//! attachment files and per-home sharing registries. All access goes through
//! a [`Transaction`]:
//!
//! ```no_run
//! # async fn demo() -> calstore_datastore::DataStoreResult<()> {
//! use calstore_datastore::{Store, StoreConfig};
//!
//! let store = Store::open(StoreConfig::default())?;
//! let mut txn = store.new_transaction().await?;
//! let home = txn.home_with_uid("uid1", true).await?.expect("provisioned");
//! let calendar = home.lookup_or_create_calendar(&mut txn, "work", true).await?;
//! txn.commit()?;
//! # let _ = calendar;
//! # Ok(())
//! # }
//! ```
//!
//! Writes take per-row locks held until commit or abort; reads never lock.
//! Committed rows live in SQLite: `<data_dir>/calstore.db`, or an in-memory
//! database when no data directory is configured.

pub mod calendar;
mod cascade;
pub mod component;
pub mod config;
pub mod directory;
pub mod error;
pub mod home;
mod locks;
pub mod notification;
pub mod object;
pub mod property;
mod provision;
mod schema;
pub mod sharing;
pub mod store;
mod tables;
pub mod transaction;

pub use calendar::Calendar;
pub use component::{ComponentParser, ComponentType, ICalendarParser, ParsedComponent};
pub use config::{JournalSync, StoreConfig};
pub use directory::{DirectoryRecord, DirectoryService, StaticDirectory};
pub use error::{DataStoreError, DataStoreResult};
pub use home::{Home, DEFAULT_CALENDAR, INBOX};
pub use notification::{Notification, NotificationCollection};
pub use object::{Attachment, CalendarObject};
pub use sharing::SharingRegistry;
pub use store::Store;
pub use tables::ResourceKind;
pub use transaction::Transaction;
