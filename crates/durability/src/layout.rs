//! Backup directory structure
//!
//! The producer owns a temporary directory holding the growing artifact and
//! its cycle state. Rotations write into a daily directory, one folder per
//! rotation period:
//!
//! ```text
//! <temp_dir>/
//! ├── backup.sql               # Artifact (current cycle)
//! ├── backup.state.json        # Cycle pointer
//! └── dumpcycle.lock           # Single-instance guard
//!
//! <daily_dir>/
//! └── 2024-03-09_00-00/
//!     ├── backup_part_001.sql
//!     ├── backup_part_002.sql
//!     └── backup_info.json
//! ```

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Default artifact file name.
pub const DEFAULT_ARTIFACT_NAME: &str = "backup.sql";
/// Default cycle state file name.
pub const DEFAULT_STATE_NAME: &str = "backup.state.json";
/// Name of the single-instance lock file in the temp directory.
pub const LOCK_FILE_NAME: &str = "dumpcycle.lock";
/// Name of the per-period manifest.
pub const MANIFEST_FILE_NAME: &str = "backup_info.json";
/// Prefix shared by every part file.
pub const PART_FILE_PREFIX: &str = "backup_part_";
/// Extension shared by every part file.
pub const PART_FILE_EXTENSION: &str = ".sql";

/// Paths of every file the producer and the rotation coordinator touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleLayout {
    temp_dir: PathBuf,
    daily_dir: PathBuf,
    artifact_name: String,
    state_name: String,
}

impl CycleLayout {
    /// Layout with the default file names.
    pub fn new(temp_dir: impl AsRef<Path>, daily_dir: impl AsRef<Path>) -> Self {
        CycleLayout {
            temp_dir: temp_dir.as_ref().to_path_buf(),
            daily_dir: daily_dir.as_ref().to_path_buf(),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
            state_name: DEFAULT_STATE_NAME.to_string(),
        }
    }

    /// Override the artifact file name.
    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    /// Override the cycle state file name.
    pub fn with_state_name(mut self, name: impl Into<String>) -> Self {
        self.state_name = name.into();
        self
    }

    /// Directory holding the artifact and the cycle state
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Directory holding one folder per rotation period
    pub fn daily_dir(&self) -> &Path {
        &self.daily_dir
    }

    /// Artifact file name
    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    /// Cycle state file name
    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    /// Path of the growing artifact
    pub fn artifact_path(&self) -> PathBuf {
        self.temp_dir.join(&self.artifact_name)
    }

    /// Path of the cycle state file
    pub fn state_path(&self) -> PathBuf {
        self.temp_dir.join(&self.state_name)
    }

    /// Path of the single-instance lock file
    pub fn lock_path(&self) -> PathBuf {
        self.temp_dir.join(LOCK_FILE_NAME)
    }

    /// Folder for the rotation period labelled `label`
    pub fn period_dir(&self, label: &str) -> PathBuf {
        self.daily_dir.join(label)
    }

    /// Create the temp and daily directories.
    pub fn create_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)?;
        std::fs::create_dir_all(&self.daily_dir)?;
        Ok(())
    }
}

/// File name of the `index`-th part (1-based): `backup_part_001.sql`.
pub fn part_file_name(index: u32) -> String {
    format!("{}{:03}{}", PART_FILE_PREFIX, index, PART_FILE_EXTENSION)
}

/// Whether `name` looks like a part file written by the splitter.
pub fn is_part_file_name(name: &str) -> bool {
    name.strip_prefix(PART_FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(PART_FILE_EXTENSION))
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Folder label of a rotation period: `YYYY-MM-DD_HH-MM`.
pub fn period_label(period: NaiveDateTime) -> String {
    period.format("%Y-%m-%d_%H-%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_default_paths() {
        let layout = CycleLayout::new("/var/backup", "/var/backup/daily_backups");
        assert_eq!(layout.artifact_path(), PathBuf::from("/var/backup/backup.sql"));
        assert_eq!(layout.state_path(), PathBuf::from("/var/backup/backup.state.json"));
        assert_eq!(layout.lock_path(), PathBuf::from("/var/backup/dumpcycle.lock"));
        assert_eq!(
            layout.period_dir("2024-03-09_00-00"),
            PathBuf::from("/var/backup/daily_backups/2024-03-09_00-00")
        );
    }

    #[test]
    fn test_custom_names() {
        let layout = CycleLayout::new("/t", "/d")
            .with_artifact_name("shop.sql")
            .with_state_name("shop.state.json");
        assert_eq!(layout.artifact_path(), PathBuf::from("/t/shop.sql"));
        assert_eq!(layout.state_path(), PathBuf::from("/t/shop.state.json"));
    }

    #[test]
    fn test_part_names_are_zero_padded() {
        assert_eq!(part_file_name(1), "backup_part_001.sql");
        assert_eq!(part_file_name(42), "backup_part_042.sql");
        assert_eq!(part_file_name(1234), "backup_part_1234.sql");
    }

    #[test]
    fn test_is_part_file_name() {
        assert!(is_part_file_name("backup_part_001.sql"));
        assert!(is_part_file_name("backup_part_1000.sql"));
        assert!(!is_part_file_name("backup_part_.sql"));
        assert!(!is_part_file_name("backup_part_01a.sql"));
        assert!(!is_part_file_name("backup_info.json"));
    }

    #[test]
    fn test_period_label_format() {
        let period = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(0, 5, 30)
            .unwrap();
        assert_eq!(period_label(period), "2024-03-09_00-05");
    }

    #[test]
    fn test_create_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CycleLayout::new(dir.path().join("tmp"), dir.path().join("daily"));
        layout.create_directories().unwrap();
        assert!(layout.temp_dir().is_dir());
        assert!(layout.daily_dir().is_dir());
    }
}
