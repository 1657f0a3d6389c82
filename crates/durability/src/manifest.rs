//! Rotation manifest (`backup_info.json`)
//!
//! One manifest is written per rotation period, after the split has been
//! verified. It is never rewritten: a period folder that already holds a
//! manifest is considered archived.
//!
//! # Format
//!
//! ```json
//! {
//!   "backup_date": "2024-03-09",
//!   "creation_time": "2024-03-10T00:00:07.512034",
//!   "total_files": 2,
//!   "max_file_size_gb": 1.0,
//!   "files": [
//!     {"filename": "backup_part_001.sql", "size_bytes": 1073741900, "size_mb": 1024.0},
//!     {"filename": "backup_part_002.sql", "size_bytes": 52428800, "size_mb": 50.0}
//!   ],
//!   "total_size_gb": 1.05,
//!   "backup_config": {
//!     "backup_dir": "/var/backup",
//!     "daily_backup_dir": "/var/backup/daily_backups",
//!     "split_time": "00:00"
//!   }
//! }
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use dumpcycle_core::{Error, PartFile, Result};
use serde::{Deserialize, Serialize};

use crate::layout::MANIFEST_FILE_NAME;
use crate::state_store::sync_parent_dir;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One part entry of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPart {
    /// Part file name
    pub filename: String,
    /// Exact size in bytes
    pub size_bytes: u64,
    /// Size in MiB, rounded to two decimals
    pub size_mb: f64,
}

/// Directories and schedule the rotation ran with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Temp directory holding the artifact
    pub backup_dir: String,
    /// Root of the period folders
    pub daily_backup_dir: String,
    /// Configured `HH:MM` trigger time
    pub split_time: String,
}

/// Record describing one rotation period's parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationManifest {
    /// Day the parts represent, `YYYY-MM-DD`
    pub backup_date: String,
    /// When the manifest was written (ISO-8601, local time)
    pub creation_time: NaiveDateTime,
    /// Number of parts
    pub total_files: usize,
    /// Configured part size limit in GiB
    pub max_file_size_gb: f64,
    /// Parts in index order
    pub files: Vec<ManifestPart>,
    /// Sum of part sizes in GiB, rounded to two decimals
    pub total_size_gb: f64,
    /// Directories and schedule used
    pub backup_config: ManifestConfig,
}

impl RotationManifest {
    /// Describe `parts` as the output of the rotation for `backup_date`.
    pub fn new(
        backup_date: NaiveDate,
        creation_time: NaiveDateTime,
        parts: &[PartFile],
        max_file_size_gb: f64,
        backup_config: ManifestConfig,
    ) -> Self {
        let files: Vec<ManifestPart> = parts
            .iter()
            .map(|p| ManifestPart {
                filename: p.name.clone(),
                size_bytes: p.size_bytes,
                size_mb: round2(p.size_bytes as f64 / BYTES_PER_MB),
            })
            .collect();
        let total_bytes: u64 = parts.iter().map(|p| p.size_bytes).sum();

        RotationManifest {
            backup_date: backup_date.format("%Y-%m-%d").to_string(),
            creation_time,
            total_files: files.len(),
            max_file_size_gb,
            files,
            total_size_gb: round2(total_bytes as f64 / crate::BYTES_PER_GB as f64),
            backup_config,
        }
    }

    /// Sum of the exact part sizes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    /// Path of the manifest inside `folder`.
    pub fn path_in(folder: &Path) -> PathBuf {
        folder.join(MANIFEST_FILE_NAME)
    }

    /// Whether `folder` already holds a manifest.
    pub fn exists_in(folder: &Path) -> bool {
        Self::path_in(folder).exists()
    }

    /// Write the manifest into `folder`.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyExists` if the folder already has a manifest;
    /// an existing manifest is never replaced.
    pub fn write_new(&self, folder: &Path) -> Result<PathBuf> {
        let final_path = Self::path_in(folder);
        if final_path.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("manifest already exists: {}", final_path.display()),
            )));
        }

        let temp_path = folder.join(format!(".{}.tmp", MANIFEST_FILE_NAME));
        let body = serde_json::to_vec_pretty(self)?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        sync_parent_dir(&final_path)?;
        Ok(final_path)
    }

    /// Read the manifest stored in `folder`.
    pub fn load(folder: &Path) -> Result<Self> {
        let path = Self::path_in(folder);
        let content = fs::read(&path)?;
        serde_json::from_slice(&content).map_err(|e| {
            Error::Corruption(format!("invalid manifest '{}': {}", path.display(), e))
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
