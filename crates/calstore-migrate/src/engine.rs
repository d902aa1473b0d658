//! Copies calendars and homes from a legacy backend through an open
//! [`Transaction`].

use std::collections::BTreeSet;

use calstore_datastore::{Calendar, DataStoreError, Home, Store, Transaction, DEFAULT_CALENDAR, INBOX};
use calstore_types::{PropertyMap, PropertyName, ResourceId};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, MigrateResult};
use crate::report::{HomeMigrationReport, MigrationReport};
use crate::source::{ComponentFilter, LegacyCalendar, LegacyHome, LegacyObject, LegacyStore};

/// Calendars that map onto the destination's own provisioned collection.
const RESERVED_CALENDARS: [&str; 2] = [DEFAULT_CALENDAR, INBOX];

/// Source collections that are never copied.
const SKIPPED_CALENDARS: [&str; 2] = ["outbox", "notifications"];

#[derive(Clone, Debug)]
pub struct MigrationOptions {
    /// Properties the destination regenerates itself.
    pub excluded_properties: BTreeSet<PropertyName>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            excluded_properties: BTreeSet::from([PropertyName::resource_type()]),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Migrator {
    options: MigrationOptions,
}

impl Migrator {
    pub fn new(options: MigrationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Copy the properties of `source` and every object in it into
    /// `destination`. Objects that fail individually, and a calendar
    /// property copy that fails locally, are recorded in the report; store
    /// failures that end the transaction are returned.
    pub async fn migrate_calendar(
        &self,
        txn: &mut Transaction,
        source: &dyn LegacyCalendar,
        destination: &Calendar,
        filter: &dyn ComponentFilter,
    ) -> MigrateResult<MigrationReport> {
        let mut report = MigrationReport::default();
        if let Some(reason) = self
            .copy_source_properties(txn, destination.resource_id(), source.properties().await)
            .await?
        {
            warn!(calendar = destination.name(), error = %reason, "calendar properties not migrated");
            report.record_property_failure(reason);
        }

        for object in source.calendar_objects().await? {
            match self.migrate_object(txn, &object, destination, filter).await {
                Ok(()) => report.record_success(object.name),
                Err(err) if err.is_object_local() => {
                    warn!(
                        calendar = destination.name(),
                        name = %object.name,
                        error = %err,
                        "object not migrated"
                    );
                    report.record_failure(object.name, err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        let (migrated, failed) = report.counts();
        info!(txn = txn.id(), calendar = destination.name(), migrated, failed, "calendar migrated");
        Ok(report)
    }

    /// Copy a whole home: its properties, then each calendar. Failing to
    /// open or create a destination calendar ends the migration. A calendar
    /// whose objects cannot be listed is recorded and, unless it maps onto
    /// a provisioned collection, removed from the destination again.
    pub async fn migrate_home(
        &self,
        txn: &mut Transaction,
        source: &dyn LegacyHome,
        destination: &Home,
        filter: &dyn ComponentFilter,
    ) -> MigrateResult<HomeMigrationReport> {
        let mut report = HomeMigrationReport::default();
        if let Some(reason) = self
            .copy_source_properties(txn, destination.resource_id(), source.properties().await)
            .await?
        {
            warn!(uid = source.uid(), error = %reason, "home properties not migrated");
            report.property_failure = Some(reason);
        }

        for calendar in source.calendars().await? {
            let name = calendar.name().to_string();
            if SKIPPED_CALENDARS.contains(&name.as_str()) {
                debug!(uid = source.uid(), name = %name, "calendar skipped");
                report.skipped.push(name);
                continue;
            }
            let reserved = RESERVED_CALENDARS.contains(&name.as_str());
            let target = if reserved {
                destination
                    .lookup_or_create_calendar(txn, &name, true)
                    .await?
                    .ok_or_else(|| DataStoreError::NotFound {
                        kind: "calendar",
                        name: name.clone(),
                    })?
            } else {
                destination.create_calendar_with_name(txn, &name).await?
            };
            match self.migrate_calendar(txn, calendar.as_ref(), &target, filter).await {
                Ok(calendar_report) => {
                    report.calendars.insert(name, calendar_report);
                }
                Err(err) if err.is_object_local() => {
                    warn!(uid = source.uid(), name = %name, error = %err, "calendar not migrated");
                    if !reserved {
                        destination.remove_calendar_with_name(txn, &name).await?;
                    }
                    report.failed_calendars.push((name, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
        let (migrated, failed) = report.counts();
        info!(txn = txn.id(), uid = source.uid(), migrated, failed, "home migrated");
        Ok(report)
    }

    /// Migrate the legacy home of `uid` into `store` in one transaction,
    /// provisioning the destination home. Commits on success.
    pub async fn migrate_uid(
        &self,
        store: &Store,
        legacy: &dyn LegacyStore,
        uid: &str,
        filter: &dyn ComponentFilter,
    ) -> MigrateResult<HomeMigrationReport> {
        let source = legacy
            .calendar_home_with_uid(uid)
            .await?
            .ok_or_else(|| MigrateError::HomeNotFound(uid.to_string()))?;
        let mut txn = store.new_transaction().await?;
        let outcome = self.migrate_into(&mut txn, source.as_ref(), uid, filter).await;
        match outcome {
            Ok(report) => {
                txn.commit()?;
                Ok(report)
            }
            Err(err) => {
                txn.abort();
                Err(err)
            }
        }
    }

    async fn migrate_into(
        &self,
        txn: &mut Transaction,
        source: &dyn LegacyHome,
        uid: &str,
        filter: &dyn ComponentFilter,
    ) -> MigrateResult<HomeMigrationReport> {
        let destination = txn
            .home_with_uid(uid, true)
            .await?
            .ok_or_else(|| DataStoreError::NotFound {
                kind: "home",
                name: uid.to_string(),
            })?;
        self.migrate_home(txn, source, &destination, filter).await
    }

    async fn migrate_object(
        &self,
        txn: &mut Transaction,
        object: &LegacyObject,
        destination: &Calendar,
        filter: &dyn ComponentFilter,
    ) -> MigrateResult<()> {
        let component = filter.filter(object.source.component().await?)?;
        let metadata = object.source.metadata().await?;
        let properties = object.source.properties().await?;
        let created = destination
            .create_calendar_object_with_name(txn, &object.name, &component, metadata)
            .await?;
        match self.copy_properties(txn, created.resource_id(), properties).await {
            Err(err) if err.is_object_local() => {
                destination.remove_calendar_object_with_name(txn, &object.name).await?;
                Err(err)
            }
            result => result,
        }
    }

    /// Copy properties read from a legacy source. Local failures, either
    /// reading them or writing one of them, come back as the reason; rows
    /// written before the failure are kept.
    async fn copy_source_properties(
        &self,
        txn: &mut Transaction,
        id: ResourceId,
        properties: MigrateResult<PropertyMap>,
    ) -> MigrateResult<Option<String>> {
        let result = match properties {
            Ok(properties) => self.copy_properties(txn, id, properties).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => Ok(None),
            Err(err) if err.is_object_local() => Ok(Some(err.to_string())),
            Err(err) => Err(err),
        }
    }

    async fn copy_properties(&self, txn: &mut Transaction, id: ResourceId, properties: PropertyMap) -> MigrateResult<()> {
        for (key, value) in properties {
            if self.options.excluded_properties.contains(&key.name) {
                continue;
            }
            txn.set_property(id, key, value).await?;
        }
        Ok(())
    }
}

/// [`Migrator::migrate_calendar`] with default options.
pub async fn migrate_calendar(
    txn: &mut Transaction,
    source: &dyn LegacyCalendar,
    destination: &Calendar,
    filter: &dyn ComponentFilter,
) -> MigrateResult<MigrationReport> {
    Migrator::default().migrate_calendar(txn, source, destination, filter).await
}

/// [`Migrator::migrate_home`] with default options.
pub async fn migrate_home(
    txn: &mut Transaction,
    source: &dyn LegacyHome,
    destination: &Home,
    filter: &dyn ComponentFilter,
) -> MigrateResult<HomeMigrationReport> {
    Migrator::default().migrate_home(txn, source, destination, filter).await
}
