//! Shared-collection records kept in a home's sharing registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// How a collection came to be shared with a home.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareType {
    /// Shared directly by the owner, without an invitation (`"D"`).
    #[serde(rename = "D")]
    Direct,
    /// Shared through an accepted invitation (`"I"`).
    #[serde(rename = "I")]
    Invite,
}

impl ShareType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "D",
            Self::Invite => "I",
        }
    }
}

impl FromStr for ShareType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "D" => Ok(Self::Direct),
            "I" => Ok(Self::Invite),
            _ => Err(TypeError::UnknownShareType(s.to_string())),
        }
    }
}

impl fmt::Display for ShareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a sharing registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedCollectionRecord {
    pub share_uid: String,
    pub share_type: ShareType,
    /// URL of the shared collection on the sharer's side.
    pub host_url: String,
    /// Access-control token of the share.
    pub token: String,
    pub display_name: String,
}

impl SharedCollectionRecord {
    pub fn new(
        share_uid: impl Into<String>,
        share_type: ShareType,
        host_url: impl Into<String>,
        token: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            share_uid: share_uid.into(),
            share_type,
            host_url: host_url.into(),
            token: token.into(),
            display_name: display_name.into(),
        }
    }
}
