//! Attachment blob storage for calstore.
//!
//! Attachments are plain files addressed by the owning object's dropbox ID
//! and a filename. The dropbox ID is hashed with BLAKE3 and the hex digest is
//! split into two shard levels:
//!
//! ```text
//! <root>/ab/cd/abcd0123.../<filename>
//! ```
//!
//! Writes go through an [`AttachmentSink`] that stages bytes in a temporary
//! file inside the shard directory and renames it into place on
//! [`AttachmentSink::commit`], so a reader sees either the previous content
//! or the complete new content. [`AttachmentSink::stage`] stops short of the
//! rename so the owner can decide later whether the bytes go into place.

pub mod error;
pub mod path;
pub mod store;

pub use error::{AttachError, AttachResult};
pub use path::{dropbox_hash, validate_filename};
pub use store::{
    AttachmentSink, AttachmentSource, AttachmentStore, StagedAttachment, StoredAttachment,
};
