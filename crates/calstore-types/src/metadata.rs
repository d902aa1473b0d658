//! Per-object metadata bag, stored verbatim alongside the component body.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// iCalendar-derived access classification of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMode {
    #[default]
    Public,
    Private,
    Confidential,
    Restricted,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Private => "PRIVATE",
            Self::Confidential => "CONFIDENTIAL",
            Self::Restricted => "RESTRICTED",
        }
    }
}

impl FromStr for AccessMode {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUBLIC" => Ok(Self::Public),
            "PRIVATE" => Ok(Self::Private),
            "CONFIDENTIAL" => Ok(Self::Confidential),
            "RESTRICTED" => Ok(Self::Restricted),
            _ => Err(TypeError::UnknownAccessMode(s.to_string())),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling and access metadata supplied by the caller on create/update.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMetadata {
    pub access_mode: AccessMode,
    pub is_schedule_object: bool,
    pub schedule_tag: Option<String>,
    pub schedule_etags: Vec<String>,
    pub has_private_comment: bool,
}

impl ObjectMetadata {
    /// Metadata of an object that takes part in implicit scheduling.
    pub fn scheduled(tag: impl Into<String>) -> Self {
        Self {
            is_schedule_object: true,
            schedule_tag: Some(tag.into()),
            ..Self::default()
        }
    }
}
