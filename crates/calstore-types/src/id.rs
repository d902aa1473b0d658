use std::fmt;

use serde::{Deserialize, Serialize};

/// Surrogate identifier of a stored resource (home, calendar, calendar
/// object, notification collection or notification).
///
/// Identifiers are allocated from a single store-wide sequence, so a
/// `ResourceId` is unique across every resource kind. Property rows refer to
/// their owner only through this identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourceId(i64);

impl ResourceId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ResourceId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}
