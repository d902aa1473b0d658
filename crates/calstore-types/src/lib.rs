//! Foundation types for calstore.
//!
//! This crate provides the identity, property, temporal, and record types
//! shared by every other calstore crate.
//!
//! # Key Types
//!
//! - [`ResourceId`] -- surrogate identifier of any stored resource
//! - [`PropertyName`] / [`PropertyKey`] / [`PropertyValue`] -- dead property addressing
//! - [`epoch_seconds`] -- the canonical stored-timestamp conversion
//! - [`ObjectMetadata`] -- scheduling/access metadata carried by calendar objects
//! - [`SharedCollectionRecord`] -- one entry of a home's sharing registry

pub mod error;
pub mod id;
pub mod metadata;
pub mod property;
pub mod sharing;
pub mod temporal;

pub use error::{TypeError, TypeResult};
pub use id::ResourceId;
pub use metadata::{AccessMode, ObjectMetadata};
pub use property::{
    PropertyKey, PropertyMap, PropertyName, PropertyValue, CALDAV_NAMESPACE, DAV_NAMESPACE,
};
pub use sharing::{ShareType, SharedCollectionRecord};
pub use temporal::{epoch_seconds, format_timestamp, now_timestamp, TIMESTAMP_FORMAT};
