//! The growing backup artifact
//!
//! A full capture replaces the artifact wholesale; an incremental capture
//! appends to it. Both paths keep the artifact consistent with the cycle
//! pointer when a capture fails halfway:
//!
//! - Full captures are written to `<artifact>.partial` and renamed into place
//!   only after the engine succeeds.
//! - Appends remember the length before writing; on failure the file is
//!   truncated back to it, so the retried tick does not duplicate statements.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use dumpcycle_core::{Error, Result};
use tracing::{debug, warn};

use crate::state_store::sync_parent_dir;

/// Outcome of an append to the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Artifact length before the append
    pub previous_len: u64,
    /// Bytes added by the append
    pub bytes_appended: u64,
}

/// Handle on the artifact file.
#[derive(Debug, Clone)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    /// Artifact stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Artifact { path: path.into() }
    }

    /// Path of the artifact
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the artifact exists
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Current size in bytes.
    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        self.path.with_file_name(name)
    }

    /// Replace the artifact with whatever `write` produces at the path it is
    /// given.
    ///
    /// The previous artifact, if any, stays in place until `write` has
    /// succeeded and its output is durable. Returns the new size.
    pub fn replace_with<F>(&self, write: F) -> Result<u64>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let partial = self.partial_path();
        let _ = fs::remove_file(&partial);

        if let Err(e) = write(&partial) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        let file = OpenOptions::new().read(true).write(true).open(&partial)?;
        file.sync_all()?;
        let size = file.metadata()?.len();
        drop(file);

        fs::rename(&partial, &self.path)?;
        sync_parent_dir(&self.path)?;

        debug!(target: "dumpcycle::producer", path = %self.path.display(), size, "Artifact replaced");
        Ok(size)
    }

    /// Append whatever `write` produces to the artifact.
    ///
    /// The artifact must already exist. If `write` fails, or the appended
    /// bytes cannot be flushed, the artifact is truncated back to its
    /// previous length before the error is returned.
    pub fn append_with<F>(&self, write: F) -> Result<AppendReceipt>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64>,
    {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let previous_len = file.metadata()?.len();

        let mut writer = BufWriter::new(file);
        let outcome = write(&mut writer).and_then(|written| {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(written)
        });
        drop(writer);

        match outcome {
            Ok(_) => {
                let bytes_appended = self.size()?.saturating_sub(previous_len);
                Ok(AppendReceipt {
                    previous_len,
                    bytes_appended,
                })
            }
            Err(e) => {
                if let Err(rollback) = self.truncate(previous_len) {
                    warn!(
                        target: "dumpcycle::producer",
                        path = %self.path.display(),
                        error = %rollback,
                        "Failed to roll back partial append"
                    );
                }
                Err(e)
            }
        }
    }

    /// Truncate the artifact to `len` bytes, discarding a rejected append.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;
        debug!(target: "dumpcycle::producer", path = %self.path.display(), len, "Artifact truncated");
        Ok(())
    }

    /// Delete the artifact and any leftover partial full capture.
    ///
    /// Returns whether the artifact existed.
    pub fn remove(&self) -> Result<bool> {
        let _ = fs::remove_file(self.partial_path());
        match fs::remove_file(&self.path) {
            Ok(()) => {
                sync_parent_dir(&self.path)?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
