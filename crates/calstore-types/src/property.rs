//! Dead property addressing.
//!
//! A property is addressed by a namespaced [`PropertyName`] and, for
//! per-user properties on shared collections, the UID of the viewer the
//! value belongs to. The stored value is opaque to the store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The WebDAV namespace.
pub const DAV_NAMESPACE: &str = "DAV:";
/// The CalDAV namespace.
pub const CALDAV_NAMESPACE: &str = "urn:ietf:params:xml:ns:caldav";

/// Namespaced property name, written in Clark notation as `{namespace}name`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PropertyName {
    pub namespace: String,
    pub name: String,
}

impl PropertyName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `{DAV:}resourcetype`. Regenerated by every store, never migrated.
    pub fn resource_type() -> Self {
        Self::new(DAV_NAMESPACE, "resourcetype")
    }

    /// `{DAV:}getcontentlanguage`.
    pub fn content_language() -> Self {
        Self::new(DAV_NAMESPACE, "getcontentlanguage")
    }

    /// `{urn:ietf:params:xml:ns:caldav}calendar-description`.
    pub fn calendar_description() -> Self {
        Self::new(CALDAV_NAMESPACE, "calendar-description")
    }

    /// Parse Clark notation (`{namespace}name`).
    pub fn parse(clark: &str) -> Result<Self, TypeError> {
        let rest = clark
            .strip_prefix('{')
            .ok_or_else(|| TypeError::InvalidPropertyName(clark.to_string()))?;
        let (namespace, name) = rest
            .split_once('}')
            .ok_or_else(|| TypeError::InvalidPropertyName(clark.to_string()))?;
        if name.is_empty() {
            return Err(TypeError::InvalidPropertyName(clark.to_string()));
        }
        Ok(Self::new(namespace, name))
    }

    /// Render in Clark notation.
    pub fn to_clark(&self) -> String {
        format!("{{{}}}{}", self.namespace, self.name)
    }
}

impl FromStr for PropertyName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyName({})", self.to_clark())
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_clark())
    }
}

/// Full key of a property row: the name plus an optional viewer UID.
///
/// `viewer == None` is the value every viewer sees unless a viewer-specific
/// row overrides it. The derived ordering sorts the default key first, which
/// the store relies on when scanning all rows of one resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PropertyKey {
    pub name: PropertyName,
    pub viewer: Option<String>,
}

impl PropertyKey {
    /// A key visible to every viewer.
    pub fn global(name: PropertyName) -> Self {
        Self { name, viewer: None }
    }

    /// A key holding the value seen by one viewer only.
    pub fn for_viewer(name: PropertyName, viewer: impl Into<String>) -> Self {
        Self {
            name,
            viewer: Some(viewer.into()),
        }
    }

    pub fn is_global(&self) -> bool {
        self.viewer.is_none()
    }
}

impl From<PropertyName> for PropertyKey {
    fn from(name: PropertyName) -> Self {
        Self::global(name)
    }
}

/// Opaque serialized property value (typically a serialized XML element).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyValue(String);

impl PropertyValue {
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyValue({:?})", self.0)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Mapping view over all property rows of one resource.
pub type PropertyMap = BTreeMap<PropertyKey, PropertyValue>;
