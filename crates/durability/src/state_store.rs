//! Cycle state store
//!
//! Persists the single [`CyclePointer`] marking where the next incremental
//! capture resumes. Its presence (together with the artifact's) is what
//! makes a cycle incremental.
//!
//! # Crash Safety
//!
//! `save` follows the write-fsync-rename pattern:
//! 1. Write the JSON record to a hidden temporary file
//! 2. fsync the temporary file
//! 3. Atomic rename over the state file
//! 4. fsync the parent directory
//!
//! A reader therefore sees either the previous pointer or the new one, and
//! `save` only returns once the new pointer is durable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use dumpcycle_core::{CyclePointer, Error, Result};
use tracing::debug;

/// File-backed store for the cycle pointer.
#[derive(Debug, Clone)]
pub struct CycleStateStore {
    path: PathBuf,
}

impl CycleStateStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CycleStateStore { path: path.into() }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a state file is present
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the stored pointer.
    ///
    /// Returns `Ok(None)` when no cycle is in progress.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if the file exists but does not hold a
    /// valid record, or `Error::Io` if it cannot be read.
    pub fn load(&self) -> Result<Option<CyclePointer>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let pointer: CyclePointer = serde_json::from_str(&content).map_err(|e| {
            Error::Corruption(format!(
                "invalid cycle state in '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(pointer))
    }

    /// Durably replace the stored pointer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if any step of the write fails. The
    /// previous pointer is left in place in that case.
    pub fn save(&self, pointer: &CyclePointer) -> Result<()> {
        let body = serde_json::to_vec(pointer)?;
        self.write_atomic(&body)
            .map_err(|e| Error::persistence(&self.path, e))?;

        debug!(
            target: "dumpcycle::state",
            log_id = %pointer.log_id,
            offset = pointer.offset,
            "Cycle pointer saved"
        );
        Ok(())
    }

    /// Remove the stored pointer.
    ///
    /// Returns whether a state file was removed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool> {
        let _ = fs::remove_file(self.temp_path());
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(target: "dumpcycle::state", path = %self.path.display(), "Cycle state cleared");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::persistence(&self.path, e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn write_atomic(&self, body: &[u8]) -> io::Result<()> {
        let temp_path = self.temp_path();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(body)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        sync_parent_dir(&self.path)
    }
}

/// fsync the directory containing `path` so a rename or unlink is durable.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

/// Directory handles cannot be fsynced on this platform.
#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> CycleStateStore {
        CycleStateStore::new(dir.path().join("backup.state.json"))
    }

    #[test]
    fn test_load_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load().unwrap().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let pointer = CyclePointer::new("binlog.000012", 98_304);
        store.save(&pointer).unwrap();

        assert!(store.exists());
        assert_eq!(store.load().unwrap(), Some(pointer));
    }

    #[test]
    fn test_save_writes_original_record_shape() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&CyclePointer::new("binlog.000001", 157)).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["File"], "binlog.000001");
        assert_eq!(value["Position"], 157);
    }

    #[test]
    fn test_save_overwrites_previous_pointer() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save(&CyclePointer::new("binlog.000001", 500)).unwrap();
        store.save(&CyclePointer::new("binlog.000002", 4)).unwrap();

        assert_eq!(
            store.load().unwrap(),
            Some(CyclePointer::new("binlog.000002", 4))
        );
    }

    #[test]
    fn test_no_temp_file_after_save() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&CyclePointer::new("binlog.000001", 1)).unwrap();

        assert!(!store.temp_path().exists());
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_load_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"{\"File\": \"binlog.0000").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&CyclePointer::new("binlog.000001", 1)).unwrap();

        assert!(store.clear().unwrap());
        assert!(!store.exists());
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn test_save_into_missing_directory_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let store = CycleStateStore::new(dir.path().join("missing").join("state.json"));

        let err = store.save(&CyclePointer::new("binlog.000001", 1)).unwrap_err();
        assert!(err.is_critical());
    }
}
