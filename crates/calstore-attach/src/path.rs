use std::path::{Path, PathBuf};

use crate::error::{AttachError, AttachResult};

/// Hex BLAKE3 digest of a dropbox ID. Deterministic; the same on every
/// read and write.
pub fn dropbox_hash(dropbox_id: &str) -> String {
    hex::encode(blake3::hash(dropbox_id.as_bytes()).as_bytes())
}

/// Directory holding every attachment of one dropbox.
pub(crate) fn dropbox_dir(root: &Path, dropbox_id: &str) -> PathBuf {
    let hash = dropbox_hash(dropbox_id);
    root.join(&hash[0..2]).join(&hash[2..4]).join(&hash)
}

/// Reject names that would escape the dropbox directory.
pub fn validate_filename(name: &str) -> AttachResult<()> {
    let reason = if name.is_empty() {
        Some("empty name")
    } else if name.contains('/') || name.contains('\\') {
        Some("contains a path separator")
    } else if name == "." || name == ".." {
        Some("is a directory reference")
    } else if name.contains('\0') {
        Some("contains a NUL byte")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(AttachError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
