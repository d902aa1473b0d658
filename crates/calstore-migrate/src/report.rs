use std::collections::BTreeMap;

/// Outcome of migrating one calendar.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: Vec<String>,
    /// `(object name, reason)` for every object that was not copied.
    pub failures: Vec<(String, String)>,
    /// Why the calendar's own properties were not copied.
    pub property_failure: Option<String>,
}

impl MigrationReport {
    pub fn record_success(&mut self, name: impl Into<String>) {
        self.migrated.push(name.into());
    }

    pub fn record_failure(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.failures.push((name.into(), reason.into()));
    }

    pub fn record_property_failure(&mut self, reason: impl Into<String>) {
        self.property_failure = Some(reason.into());
    }

    /// `(succeeded, failed)`. A failed property copy counts as one failure.
    pub fn counts(&self) -> (usize, usize) {
        let property = usize::from(self.property_failure.is_some());
        (self.migrated.len(), self.failures.len() + property)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.property_failure.is_none()
    }
}

/// Outcome of migrating a whole home, keyed by source calendar name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HomeMigrationReport {
    pub calendars: BTreeMap<String, MigrationReport>,
    pub skipped: Vec<String>,
    /// `(calendar name, reason)` for calendars whose objects could not be
    /// listed. Nothing of them is left in the destination.
    pub failed_calendars: Vec<(String, String)>,
    /// Why the home's own properties were not copied.
    pub property_failure: Option<String>,
}

impl HomeMigrationReport {
    /// Counts summed over every calendar, plus one failure for each failed
    /// calendar and for a failed home property copy.
    pub fn counts(&self) -> (usize, usize) {
        let own = self.failed_calendars.len() + usize::from(self.property_failure.is_some());
        self.calendars.values().fold((0, own), |(ok, bad), report| {
            let (o, b) = report.counts();
            (ok + o, bad + b)
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failed_calendars.is_empty()
            && self.property_failure.is_none()
            && self.calendars.values().all(MigrationReport::is_clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_records() {
        let mut report = MigrationReport::default();
        report.record_success("1.ics");
        report.record_success("2.ics");
        report.record_failure("bad.ics", "no UID");
        assert_eq!(report.counts(), (2, 1));
        assert!(!report.is_clean());
        assert_eq!(report.failures[0].0, "bad.ics");
    }

    #[test]
    fn home_counts_sum_calendars() {
        let mut home = HomeMigrationReport::default();
        let mut a = MigrationReport::default();
        a.record_success("1.ics");
        let mut b = MigrationReport::default();
        b.record_success("2.ics");
        b.record_failure("3.ics", "bad");
        home.calendars.insert("a".into(), a);
        home.calendars.insert("b".into(), b);
        assert_eq!(home.counts(), (2, 1));
        assert_eq!(HomeMigrationReport::default().counts(), (0, 0));
    }

    #[test]
    fn property_and_calendar_failures_count() {
        let mut calendar = MigrationReport::default();
        calendar.record_success("1.ics");
        calendar.record_property_failure("malformed sidecar");
        assert_eq!(calendar.counts(), (1, 1));
        assert!(!calendar.is_clean());

        let mut home = HomeMigrationReport::default();
        home.calendars.insert("a".into(), calendar);
        home.failed_calendars.push(("b".into(), "unreadable".into()));
        home.property_failure = Some("malformed sidecar".into());
        assert_eq!(home.counts(), (1, 3));
        assert!(!home.is_clean());
        assert!(HomeMigrationReport::default().is_clean());
    }
}
