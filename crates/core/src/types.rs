//! Domain types shared by the producer, the rotation coordinator and the
//! on-disk layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Position in the database change log up to which the artifact already
/// reflects data.
///
/// Persisted as `{"File": <log id>, "Position": <offset>}`. A pointer is
/// always taken from the engine after a capture, never computed locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CyclePointer {
    /// Change log file identifier (e.g. `binlog.000042`)
    #[serde(rename = "File")]
    pub log_id: String,
    /// Byte offset inside `log_id`
    #[serde(rename = "Position")]
    pub offset: u64,
}

impl CyclePointer {
    /// Create a pointer at `offset` within `log_id`.
    pub fn new(log_id: impl Into<String>, offset: u64) -> Self {
        CyclePointer {
            log_id: log_id.into(),
            offset,
        }
    }
}

impl fmt::Display for CyclePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.log_id, self.offset)
    }
}

/// Which kind of capture the next producer tick performs.
///
/// Never stored: it is derived from whether the artifact and the cycle
/// pointer both exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Take a full snapshot into a fresh artifact
    Full,
    /// Append the change log since the stored pointer
    Incremental,
}

impl CycleMode {
    /// Derive the mode from the presence of the artifact and the pointer.
    pub fn derive(artifact_exists: bool, pointer: Option<&CyclePointer>) -> Self {
        match (artifact_exists, pointer) {
            (true, Some(_)) => CycleMode::Incremental,
            _ => CycleMode::Full,
        }
    }

    /// Lowercase name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleMode::Full => "full",
            CycleMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for CycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable piece of a retired artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFile {
    /// 1-based sequence number within the rotation period
    pub index: u32,
    /// File name, e.g. `backup_part_001.sql`
    pub name: String,
    /// Full path of the part on disk
    pub path: PathBuf,
    /// Bytes written to the part
    pub size_bytes: u64,
}

/// Connection parameters for the database being backed up.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Server host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account used for dumps and log reads
    #[serde(default = "default_user")]
    pub user: String,
    /// Account password (may be empty)
    #[serde(default)]
    pub password: String,
    /// Database (schema) to back up
    #[serde(default)]
    pub name: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            name: String::new(),
        }
    }
}

impl DatabaseConfig {
    /// Config for `name` on the default local server.
    pub fn named(name: impl Into<String>) -> Self {
        DatabaseConfig {
            name: name.into(),
            ..Default::default()
        }
    }
}

// Keep the password out of logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_json_field_names() {
        let pointer = CyclePointer::new("binlog.000007", 1543);
        let json = serde_json::to_string(&pointer).unwrap();
        assert_eq!(json, r#"{"File":"binlog.000007","Position":1543}"#);

        let parsed: CyclePointer = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, pointer);
    }

    #[test]
    fn test_pointer_display() {
        assert_eq!(CyclePointer::new("mysql-bin.000003", 4).to_string(), "mysql-bin.000003@4");
    }

    #[test]
    fn test_mode_full_unless_both_present() {
        let pointer = CyclePointer::new("binlog.000001", 120);
        assert_eq!(CycleMode::derive(false, None), CycleMode::Full);
        assert_eq!(CycleMode::derive(true, None), CycleMode::Full);
        assert_eq!(CycleMode::derive(false, Some(&pointer)), CycleMode::Full);
        assert_eq!(CycleMode::derive(true, Some(&pointer)), CycleMode::Incremental);
    }

    #[test]
    fn test_database_config_defaults() {
        let config: DatabaseConfig = serde_json::from_str(r#"{"name":"shop"}"#).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.user, "root");
        assert!(config.password.is_empty());
        assert_eq!(config, DatabaseConfig::named("shop"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = DatabaseConfig::named("shop");
        config.password = "hunter2".to_string();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
