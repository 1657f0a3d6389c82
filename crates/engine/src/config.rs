//! Service configuration via `dumpcycle.toml`
//!
//! Every component receives its slice of this configuration at
//! construction; nothing reads ambient settings. On `dumpcycle init` a
//! commented default file is written. To change settings, edit the file and
//! restart the service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use dumpcycle_core::{DatabaseConfig, Error, Result};
use dumpcycle_durability::{
    gb_to_bytes, CycleLayout, DEFAULT_ARTIFACT_NAME, DEFAULT_STATE_NAME,
};

use crate::schedule::DailyTrigger;

/// Config file name looked up by the CLI when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "dumpcycle.toml";

/// Name of the daily folder root when `daily_backup_dir` is not set.
pub const DEFAULT_DAILY_DIR_NAME: &str = "daily_backups";

/// What the producer does when a capture fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log the failure and retry on the next tick (long-lived service)
    #[default]
    Continue,
    /// Stop the producer and signal the host to exit (one-shot / batch)
    Abort,
}

/// Where the artifact, the cycle state and the daily folders live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Temp directory holding the artifact and the cycle state
    #[serde(default)]
    pub backup_dir: PathBuf,
    /// Root of the per-period folders (default: `<backup_dir>/daily_backups`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_backup_dir: Option<PathBuf>,
    /// Artifact file name
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    /// Cycle state file name
    #[serde(default = "default_state_name")]
    pub state_name: String,
}

fn default_artifact_name() -> String {
    DEFAULT_ARTIFACT_NAME.to_string()
}

fn default_state_name() -> String {
    DEFAULT_STATE_NAME.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backup_dir: PathBuf::new(),
            daily_backup_dir: None,
            artifact_name: default_artifact_name(),
            state_name: default_state_name(),
        }
    }
}

impl StorageConfig {
    /// Root of the per-period folders, defaulted under the temp directory.
    pub fn daily_dir(&self) -> PathBuf {
        self.daily_backup_dir
            .clone()
            .unwrap_or_else(|| self.backup_dir.join(DEFAULT_DAILY_DIR_NAME))
    }

    /// Filesystem layout described by this section.
    pub fn layout(&self) -> CycleLayout {
        CycleLayout::new(&self.backup_dir, self.daily_dir())
            .with_artifact_name(self.artifact_name.clone())
            .with_state_name(self.state_name.clone())
    }
}

/// Capture schedule of the backup producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerConfig {
    /// Hours between captures
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Minutes between captures, added to `interval_hours` (0-59)
    #[serde(default)]
    pub interval_minutes: u64,
    /// Reaction to a failed capture
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

fn default_interval_hours() -> u64 {
    24
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            interval_hours: default_interval_hours(),
            interval_minutes: 0,
            on_error: ErrorPolicy::Continue,
        }
    }
}

impl ProducerConfig {
    /// Time between the start of two captures.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600 + self.interval_minutes * 60)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_minutes >= 60 {
            return Err(Error::configuration(format!(
                "producer.interval_minutes must be between 0 and 59, got {}",
                self.interval_minutes
            )));
        }
        if self.interval_hours == 0 && self.interval_minutes == 0 {
            return Err(Error::configuration(
                "producer interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Daily rotation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RotationConfig {
    /// Run the nightly rotation alongside the producer
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Local `HH:MM` at which the rotation fires
    #[serde(default = "default_split_time")]
    pub split_time: String,
    /// Part size limit in GiB (fractions allowed)
    #[serde(default = "default_max_file_size_gb")]
    pub max_file_size_gb: f64,
    /// How long to wait for an in-flight capture before rotating anyway
    #[serde(default = "default_quiescence_timeout_secs")]
    pub quiescence_timeout_secs: u64,
    /// How often to re-check for an in-flight capture
    #[serde(default = "default_quiescence_poll_secs")]
    pub quiescence_poll_secs: u64,
    /// How often the daily trigger checks the clock
    #[serde(default = "default_scheduler_poll_secs")]
    pub scheduler_poll_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_split_time() -> String {
    "00:00".to_string()
}

fn default_max_file_size_gb() -> f64 {
    1.0
}

fn default_quiescence_timeout_secs() -> u64 {
    600
}

fn default_quiescence_poll_secs() -> u64 {
    10
}

fn default_scheduler_poll_secs() -> u64 {
    60
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            enabled: true,
            split_time: default_split_time(),
            max_file_size_gb: default_max_file_size_gb(),
            quiescence_timeout_secs: default_quiescence_timeout_secs(),
            quiescence_poll_secs: default_quiescence_poll_secs(),
            scheduler_poll_secs: default_scheduler_poll_secs(),
        }
    }
}

impl RotationConfig {
    /// Parsed trigger time.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `split_time` is not `HH:MM`.
    pub fn trigger(&self) -> Result<DailyTrigger> {
        DailyTrigger::parse(&self.split_time)
            .map_err(|e| Error::configuration(format!("rotation.split_time: {}", e)))
    }

    /// Part size limit in bytes.
    pub fn max_part_bytes(&self) -> u64 {
        gb_to_bytes(self.max_file_size_gb)
    }

    /// Quiescence budget.
    pub fn quiescence_timeout(&self) -> Duration {
        Duration::from_secs(self.quiescence_timeout_secs)
    }

    /// Quiescence poll period.
    pub fn quiescence_poll(&self) -> Duration {
        Duration::from_secs(self.quiescence_poll_secs)
    }

    /// Daily trigger poll period.
    pub fn scheduler_poll(&self) -> Duration {
        Duration::from_secs(self.scheduler_poll_secs)
    }

    fn validate(&self) -> Result<()> {
        self.trigger()?;
        if !(self.max_file_size_gb.is_finite() && self.max_file_size_gb > 0.0) {
            return Err(Error::configuration(format!(
                "rotation.max_file_size_gb must be a positive number, got {}",
                self.max_file_size_gb
            )));
        }
        if self.quiescence_poll_secs == 0 || self.scheduler_poll_secs == 0 {
            return Err(Error::configuration(
                "rotation poll intervals must be at least one second",
            ));
        }
        Ok(())
    }
}

/// Location of the database client tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DumpConfig {
    /// Directory containing `mysql`, `mysqldump` and `mysqlbinlog`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
}

/// Service configuration loaded from `dumpcycle.toml`.
///
/// # Example
///
/// ```toml
/// [database]
/// name = "shop"
///
/// [storage]
/// backup_dir = "/var/backups/shop"
///
/// [rotation]
/// split_time = "00:00"
/// max_file_size_gb = 1
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceConfig {
    /// Database connection
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Directory layout
    #[serde(default)]
    pub storage: StorageConfig,
    /// Producer schedule
    #[serde(default)]
    pub producer: ProducerConfig,
    /// Nightly rotation
    #[serde(default)]
    pub rotation: RotationConfig,
    /// Client tool discovery
    #[serde(default)]
    pub dump: DumpConfig,
}

impl ServiceConfig {
    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns the first `Error::Configuration` found.
    pub fn validate(&self) -> Result<()> {
        if self.database.name.trim().is_empty() {
            return Err(Error::configuration("database.name is required"));
        }
        if self.database.host.trim().is_empty() || self.database.user.trim().is_empty() {
            return Err(Error::configuration(
                "database.host and database.user must not be empty",
            ));
        }
        if self.storage.backup_dir.as_os_str().is_empty() {
            return Err(Error::configuration("storage.backup_dir is required"));
        }
        if self.storage.artifact_name.is_empty() || self.storage.state_name.is_empty() {
            return Err(Error::configuration(
                "storage.artifact_name and storage.state_name must not be empty",
            ));
        }
        if self.storage.artifact_name == self.storage.state_name {
            return Err(Error::configuration(
                "storage.artifact_name and storage.state_name must differ",
            ));
        }
        self.producer.validate()?;
        self.rotation.validate()?;
        Ok(())
    }

    /// Parse and validate config text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read, parsed,
    /// or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# dumpcycle configuration

[database]
host = "localhost"
port = 3306
user = "root"
password = ""
# Database (schema) to back up. Required.
name = ""

[storage]
# Directory holding the growing backup and its cycle state. Required.
backup_dir = ""
# Root of the daily folders (default: <backup_dir>/daily_backups)
# daily_backup_dir = "/var/backups/daily"
artifact_name = "backup.sql"
state_name = "backup.state.json"

[producer]
# Time between captures
interval_hours = 24
interval_minutes = 0
# "continue" = log the failure and retry next tick
# "abort"    = stop and exit non-zero
on_error = "continue"

[rotation]
enabled = true
# Local time at which yesterday's backup is split and a new cycle starts
split_time = "00:00"
# Part size limit in GiB. Parts only end on a complete statement, so
# a part may exceed this by the length of its last statement.
max_file_size_gb = 1
# Wait up to this long for an in-flight capture before rotating anyway
quiescence_timeout_secs = 600
quiescence_poll_secs = 10
scheduler_poll_secs = 60

[dump]
# Directory with mysql, mysqldump and mysqlbinlog.
# When unset, common install locations and PATH are searched.
# bin_dir = "/usr/bin"
"#
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns whether the file was created.
    pub fn write_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        std::fs::write(path, Self::default_toml()).map_err(|e| {
            Error::configuration(format!(
                "Failed to write default config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(true)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::configuration(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Trigger time as `NaiveTime`, for status reporting.
    pub fn split_time(&self) -> Result<NaiveTime> {
        Ok(self.rotation.trigger()?.time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[database]
name = "shop"

[storage]
backup_dir = "/var/backups/shop"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ServiceConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.producer.interval(), Duration::from_secs(24 * 3600));
        assert_eq!(config.producer.on_error, ErrorPolicy::Continue);
        assert_eq!(config.rotation.split_time, "00:00");
        assert_eq!(config.rotation.max_part_bytes(), 1024 * 1024 * 1024);
        assert_eq!(config.rotation.quiescence_timeout(), Duration::from_secs(600));
        assert_eq!(config.rotation.quiescence_poll(), Duration::from_secs(10));
        assert_eq!(
            config.storage.daily_dir(),
            PathBuf::from("/var/backups/shop/daily_backups")
        );
    }

    #[test]
    fn layout_follows_storage_section() {
        let config = ServiceConfig::parse(
            r#"
[database]
name = "shop"

[storage]
backup_dir = "/tmp/bk"
daily_backup_dir = "/srv/daily"
artifact_name = "shop.sql"
"#,
        )
        .unwrap();
        let layout = config.storage.layout();
        assert_eq!(layout.artifact_path(), PathBuf::from("/tmp/bk/shop.sql"));
        assert_eq!(layout.state_path(), PathBuf::from("/tmp/bk/backup.state.json"));
        assert_eq!(layout.daily_dir(), Path::new("/srv/daily"));
    }

    #[test]
    fn abort_policy_parses() {
        let text = format!("{}\n[producer]\non_error = \"abort\"\ninterval_hours = 1\n", MINIMAL);
        let config = ServiceConfig::parse(&text).unwrap();
        assert_eq!(config.producer.on_error, ErrorPolicy::Abort);
        assert_eq!(config.producer.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn missing_database_name_is_rejected() {
        let err = ServiceConfig::parse("[storage]\nbackup_dir = \"/x\"\n").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("database.name"));
    }

    #[test]
    fn missing_backup_dir_is_rejected() {
        let err = ServiceConfig::parse("[database]\nname = \"shop\"\n").unwrap_err();
        assert!(err.to_string().contains("backup_dir"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let text = format!("{}\n[producer]\ninterval_hours = 0\ninterval_minutes = 0\n", MINIMAL);
        assert!(ServiceConfig::parse(&text).is_err());
    }

    #[test]
    fn interval_minutes_out_of_range_is_rejected() {
        let text = format!("{}\n[producer]\ninterval_hours = 0\ninterval_minutes = 60\n", MINIMAL);
        assert!(ServiceConfig::parse(&text).is_err());
    }

    #[test]
    fn bad_split_time_is_rejected() {
        let text = format!("{}\n[rotation]\nsplit_time = \"25:00\"\n", MINIMAL);
        let err = ServiceConfig::parse(&text).unwrap_err();
        assert!(err.to_string().contains("split_time"));
    }

    #[test]
    fn non_positive_part_size_is_rejected() {
        let text = format!("{}\n[rotation]\nmax_file_size_gb = 0\n", MINIMAL);
        assert!(ServiceConfig::parse(&text).is_err());
    }

    #[test]
    fn fractional_part_size() {
        let text = format!("{}\n[rotation]\nmax_file_size_gb = 0.5\n", MINIMAL);
        let config = ServiceConfig::parse(&text).unwrap();
        assert_eq!(config.rotation.max_part_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn default_toml_parses_but_needs_required_fields() {
        let config: ServiceConfig = toml::from_str(ServiceConfig::default_toml()).unwrap();
        assert_eq!(config.rotation, RotationConfig::default());
        assert_eq!(config.producer, ProducerConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        assert!(ServiceConfig::write_default_if_missing(&path).unwrap());
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(!ServiceConfig::write_default_if_missing(&path).unwrap());

        let config = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(config.database.name, "shop");
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = ServiceConfig::parse(MINIMAL).unwrap();
        config.rotation.split_time = "03:30".to_string();
        config.dump.bin_dir = Some(PathBuf::from("/opt/mysql/bin"));
        config.write_to_file(&path).unwrap();

        let loaded = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.split_time().unwrap(), NaiveTime::from_hms_opt(3, 30, 0).unwrap());
    }

    #[test]
    fn from_file_missing_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = ServiceConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.is_configuration());
    }
}
