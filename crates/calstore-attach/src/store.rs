use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{AttachError, AttachResult};
use crate::path::{dropbox_dir, validate_filename};

/// Filesystem attachment store rooted at one directory.
#[derive(Clone, Debug)]
pub struct AttachmentStore {
    root: PathBuf,
}

/// Result of a committed write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredAttachment {
    pub path: PathBuf,
    pub size: u64,
    /// Hex BLAKE3 digest of the written bytes.
    pub content_hash: String,
}

impl AttachmentStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> AttachResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of `(dropbox_id, name)`.
    pub fn path_for(&self, dropbox_id: &str, name: &str) -> AttachResult<PathBuf> {
        validate_filename(name)?;
        Ok(dropbox_dir(&self.root, dropbox_id).join(name))
    }

    /// Begin writing an attachment. Nothing is visible until the sink is
    /// committed; dropping the sink discards the staged bytes.
    pub fn store(&self, dropbox_id: &str, name: &str) -> AttachResult<AttachmentSink> {
        let target = self.path_for(dropbox_id, name)?;
        let dir = dropbox_dir(&self.root, dropbox_id);
        fs::create_dir_all(&dir)?;
        let staged = NamedTempFile::new_in(&dir)?;
        debug!(dropbox_id, name, "attachment write started");
        Ok(AttachmentSink {
            staged,
            target,
            hasher: blake3::Hasher::new(),
            size: 0,
        })
    }

    /// Open a committed attachment for reading.
    pub fn retrieve(&self, dropbox_id: &str, name: &str) -> AttachResult<AttachmentSource> {
        let path = self.path_for(dropbox_id, name)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AttachError::NotFound {
                    dropbox_id: dropbox_id.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        Ok(AttachmentSource { file, size })
    }

    pub fn exists(&self, dropbox_id: &str, name: &str) -> AttachResult<bool> {
        Ok(self.path_for(dropbox_id, name)?.is_file())
    }

    /// Unlink an attachment. Returns `false` if it did not exist.
    pub fn remove(&self, dropbox_id: &str, name: &str) -> AttachResult<bool> {
        let path = self.path_for(dropbox_id, name)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        // Drop the dropbox directory once it is empty; other entries keep it.
        let _ = fs::remove_dir(dropbox_dir(&self.root, dropbox_id));
        debug!(dropbox_id, name, "attachment removed");
        Ok(true)
    }
}

/// Writable staging file for one attachment.
pub struct AttachmentSink {
    staged: NamedTempFile,
    target: PathBuf,
    hasher: blake3::Hasher,
    size: u64,
}

impl AttachmentSink {
    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flush and sync the staged bytes without moving them into place.
    /// Dropping the result discards them.
    pub fn stage(mut self) -> AttachResult<StagedAttachment> {
        self.staged.flush()?;
        self.staged.as_file().sync_all()?;
        let content_hash = self.hasher.finalize().to_hex().to_string();
        Ok(StagedAttachment {
            staged: self.staged,
            target: self.target,
            size: self.size,
            content_hash,
        })
    }

    /// Flush, sync and atomically move the staged file into place. A
    /// concurrent committed write to the same name is replaced whole.
    pub fn commit(self) -> AttachResult<StoredAttachment> {
        self.stage()?.persist()
    }
}

/// Complete attachment content waiting in its staging file.
pub struct StagedAttachment {
    staged: NamedTempFile,
    target: PathBuf,
    size: u64,
    content_hash: String,
}

impl StagedAttachment {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex BLAKE3 digest of the staged bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Read the staged bytes. Only the writer knows where they are.
    pub fn open(&self) -> AttachResult<AttachmentSource> {
        let file = File::open(self.staged.path())?;
        Ok(AttachmentSource {
            file,
            size: self.size,
        })
    }

    /// Atomically move the staged file to its final path.
    pub fn persist(self) -> AttachResult<StoredAttachment> {
        self.staged
            .persist(&self.target)
            .map_err(|e| AttachError::Io(e.error))?;
        debug!(path = %self.target.display(), size = self.size, "attachment committed");
        Ok(StoredAttachment {
            path: self.target,
            size: self.size,
            content_hash: self.content_hash,
        })
    }
}

impl std::fmt::Debug for StagedAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedAttachment")
            .field("target", &self.target)
            .field("size", &self.size)
            .finish()
    }
}

impl Write for AttachmentSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.staged.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.staged.flush()
    }
}

impl std::fmt::Debug for AttachmentSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentSink")
            .field("target", &self.target)
            .field("size", &self.size)
            .finish()
    }
}

/// Readable handle on a committed attachment.
#[derive(Debug)]
pub struct AttachmentSource {
    file: File,
    size: u64,
}

impl AttachmentSource {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the whole attachment into memory.
    pub fn read_to_vec(mut self) -> AttachResult<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for AttachmentSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
