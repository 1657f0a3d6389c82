//! Offline view of a backup directory for `dumpcycle status`.
//!
//! Reads the cycle state, the artifact and the daily folders straight from
//! disk, so it works whether or not a service is running.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use dumpcycle_core::{CycleMode, CyclePointer};
use dumpcycle_durability::{Artifact, CycleStateStore, RotationManifest};
use dumpcycle_engine::ServiceConfig;

/// What `status` prints.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleView {
    pub database: String,
    pub service_running: bool,
    pub next_mode: CycleMode,
    pub pointer: Option<CyclePointer>,
    /// Set when the state file exists but cannot be read
    pub state_error: Option<String>,
    pub artifact_size: Option<u64>,
    pub rotation_enabled: bool,
    pub split_time: String,
    pub max_file_size_gb: f64,
    pub next_rotation: Option<NaiveDateTime>,
    pub temp_dir: PathBuf,
    pub daily_dir: PathBuf,
    /// Archived period labels, oldest first
    pub periods: Vec<String>,
}

impl CycleView {
    /// Read the view for `config` as of `now`.
    pub fn read(config: &ServiceConfig, now: NaiveDateTime) -> CycleView {
        let layout = config.storage.layout();
        let artifact = Artifact::new(layout.artifact_path());
        let (pointer, state_error) = match CycleStateStore::new(layout.state_path()).load() {
            Ok(pointer) => (pointer, None),
            Err(e) => (None, Some(e.to_string())),
        };
        let artifact_size = artifact.size().ok();
        let next_mode = CycleMode::derive(artifact.exists(), pointer.as_ref());

        let next_rotation = if config.rotation.enabled {
            config.rotation.trigger().ok().map(|t| t.next_after(now))
        } else {
            None
        };

        CycleView {
            database: config.database.name.clone(),
            service_running: lock_is_held(&layout.lock_path()),
            next_mode,
            pointer,
            state_error,
            artifact_size,
            rotation_enabled: config.rotation.enabled,
            split_time: config.rotation.split_time.clone(),
            max_file_size_gb: config.rotation.max_file_size_gb,
            next_rotation,
            temp_dir: layout.temp_dir().to_path_buf(),
            daily_dir: layout.daily_dir().to_path_buf(),
            periods: archived_periods(layout.daily_dir()),
        }
    }
}

/// A running service holds an exclusive lock on the lock file.
fn lock_is_held(path: &std::path::Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).open(path) else {
        return false;
    };
    match fs2::FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = fs2::FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

fn archived_periods(daily_dir: &std::path::Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(daily_dir) else {
        return Vec::new();
    };
    let mut periods: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| RotationManifest::exists_in(&entry.path()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    periods.sort();
    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.database.name = "shop".to_string();
        config.storage.backup_dir = dir.path().join("tmp");
        config
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn empty_directory_reads_as_fresh_cycle() {
        let dir = TempDir::new().unwrap();
        let view = CycleView::read(&config(&dir), noon());

        assert_eq!(view.database, "shop");
        assert!(!view.service_running);
        assert_eq!(view.next_mode, CycleMode::Full);
        assert!(view.pointer.is_none());
        assert!(view.state_error.is_none());
        assert!(view.artifact_size.is_none());
        assert!(view.periods.is_empty());
        assert_eq!(
            view.next_rotation,
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn reads_pointer_artifact_and_periods() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let layout = config.storage.layout();
        layout.create_directories().unwrap();
        fs::write(layout.artifact_path(), b"CREATE TABLE t (id INT);\n").unwrap();
        CycleStateStore::new(layout.state_path())
            .save(&CyclePointer::new("binlog.000003", 154))
            .unwrap();
        for label in ["2024-03-09_00-00", "2024-03-08_00-00"] {
            let folder = layout.period_dir(label);
            fs::create_dir_all(&folder).unwrap();
            fs::write(RotationManifest::path_in(&folder), b"{}").unwrap();
        }
        // Unfinished folder without a manifest
        fs::create_dir_all(layout.period_dir("2024-03-10_00-00")).unwrap();

        let view = CycleView::read(&config, noon());
        assert_eq!(view.next_mode, CycleMode::Incremental);
        assert_eq!(view.pointer, Some(CyclePointer::new("binlog.000003", 154)));
        assert_eq!(view.artifact_size, Some(25));
        assert_eq!(view.periods, vec!["2024-03-08_00-00", "2024-03-09_00-00"]);
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let layout = config.storage.layout();
        layout.create_directories().unwrap();
        fs::write(layout.artifact_path(), b"x;\n").unwrap();
        fs::write(layout.state_path(), b"not json").unwrap();

        let view = CycleView::read(&config, noon());
        assert!(view.state_error.is_some());
        assert_eq!(view.next_mode, CycleMode::Full);
    }

    #[test]
    fn disabled_rotation_has_no_next_run() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.rotation.enabled = false;
        assert!(CycleView::read(&config, noon()).next_rotation.is_none());
    }

    #[test]
    fn held_lock_reads_as_running() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let layout = config.storage.layout();
        layout.create_directories().unwrap();
        let holder = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(layout.lock_path())
            .unwrap();
        fs2::FileExt::lock_exclusive(&holder).unwrap();

        assert!(CycleView::read(&config, noon()).service_running);
        fs2::FileExt::unlock(&holder).unwrap();
        assert!(!CycleView::read(&config, noon()).service_running);
    }
}
