//! MySQL dump engine backed by the client tools
//!
//! - Full snapshot: `mysqldump --single-transaction --routines --triggers
//!   --set-gtid-purged=OFF <db>`
//! - Log pointer: `mysql -e "SHOW MASTER STATUS\G"`, reading `File:` and
//!   `Position:`
//! - Incremental segment: `mysqlbinlog --read-from-remote-server
//!   --start-position=<offset> --database=<db> <log id>`
//!
//! The password is handed to the tools through `MYSQL_PWD` so it never shows
//! up in the process list.

use std::env;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use dumpcycle_core::{CyclePointer, DatabaseConfig, DumpEngine, Error, Result};
use tracing::{debug, info};

const MYSQL: &str = "mysql";
const MYSQLDUMP: &str = "mysqldump";
const MYSQLBINLOG: &str = "mysqlbinlog";

/// Install locations probed before `PATH`.
const CANDIDATE_DIRS: &[&str] = &[
    "/usr/bin",
    "/usr/local/bin",
    "/usr/local/mysql/bin",
    "/opt/homebrew/bin",
    r"C:\Program Files\MySQL\MySQL Server 8.0\bin",
    r"C:\xampp\mysql\bin",
];

/// Paths of the three client tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlBinaries {
    /// `mysql`
    pub mysql: PathBuf,
    /// `mysqldump`
    pub mysqldump: PathBuf,
    /// `mysqlbinlog`
    pub mysqlbinlog: PathBuf,
}

fn tool_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{}", name, env::consts::EXE_SUFFIX))
}

impl MysqlBinaries {
    /// Tools inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first missing tool.
    pub fn in_dir(dir: &Path) -> Result<Self> {
        let bins = MysqlBinaries {
            mysql: tool_path(dir, MYSQL),
            mysqldump: tool_path(dir, MYSQLDUMP),
            mysqlbinlog: tool_path(dir, MYSQLBINLOG),
        };
        for path in [&bins.mysql, &bins.mysqldump, &bins.mysqlbinlog] {
            if !path.is_file() {
                return Err(Error::configuration(format!(
                    "MySQL client tool not found: {}",
                    path.display()
                )));
            }
        }
        Ok(bins)
    }

    /// Find the tools in `bin_dir`, or else in the usual install locations
    /// and on `PATH`.
    pub fn locate(bin_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = bin_dir {
            return Self::in_dir(dir);
        }

        let path_dirs = env::var_os("PATH")
            .map(|p| env::split_paths(&p).collect::<Vec<_>>())
            .unwrap_or_default();
        let candidates: Vec<PathBuf> = CANDIDATE_DIRS
            .iter()
            .map(PathBuf::from)
            .chain(path_dirs)
            .collect();

        for dir in &candidates {
            if let Ok(bins) = Self::in_dir(dir) {
                info!(target: "dumpcycle::mysql", dir = %dir.display(), "Using MySQL client tools");
                return Ok(bins);
            }
        }
        Err(Error::configuration(format!(
            "MySQL client tools (mysql, mysqldump, mysqlbinlog) not found; searched {} and PATH. Set [dump] bin_dir",
            CANDIDATE_DIRS.join(", ")
        )))
    }
}

/// Connection arguments shared by every tool.
fn connection_args(db: &DatabaseConfig) -> Vec<String> {
    vec![
        "-h".to_string(),
        db.host.clone(),
        "-P".to_string(),
        db.port.to_string(),
        "-u".to_string(),
        db.user.clone(),
    ]
}

fn full_snapshot_args(db: &DatabaseConfig) -> Vec<String> {
    let mut args = connection_args(db);
    args.extend(
        [
            "--single-transaction",
            "--routines",
            "--triggers",
            "--set-gtid-purged=OFF",
        ]
        .map(String::from),
    );
    args.push(db.name.clone());
    args
}

fn log_pointer_args(db: &DatabaseConfig) -> Vec<String> {
    let mut args = connection_args(db);
    args.push("-e".to_string());
    args.push("SHOW MASTER STATUS\\G".to_string());
    args
}

fn incremental_segment_args(from: &CyclePointer, db: &DatabaseConfig) -> Vec<String> {
    let mut args = vec!["--skip-gtids".to_string()];
    args.extend(connection_args(db));
    args.push("--read-from-remote-server".to_string());
    args.push(format!("--start-position={}", from.offset));
    args.push(format!("--database={}", db.name));
    args.push(from.log_id.clone());
    args
}

fn ping_args(db: &DatabaseConfig) -> Vec<String> {
    let mut args = connection_args(db);
    args.push("-e".to_string());
    args.push("SELECT 1".to_string());
    args
}

/// Read the pointer out of `SHOW MASTER STATUS\G` output.
pub fn parse_master_status(output: &str) -> Result<CyclePointer> {
    let mut log_id = None;
    let mut offset = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "File" => log_id = Some(value.trim().to_string()),
            "Position" => {
                let value = value.trim();
                offset = Some(value.parse::<u64>().map_err(|_| {
                    Error::capture("log_pointer", format!("invalid binlog position '{}'", value))
                })?);
            }
            _ => {}
        }
    }

    match (log_id, offset) {
        (Some(log_id), Some(offset)) if !log_id.is_empty() => Ok(CyclePointer::new(log_id, offset)),
        _ => Err(Error::capture(
            "log_pointer",
            "SHOW MASTER STATUS returned no File/Position; is binary logging enabled?",
        )),
    }
}

/// [`DumpEngine`] running the MySQL client tools.
#[derive(Debug, Clone)]
pub struct MysqlDumpEngine {
    bins: MysqlBinaries,
}

impl MysqlDumpEngine {
    /// Engine using `bins`.
    pub fn new(bins: MysqlBinaries) -> Self {
        MysqlDumpEngine { bins }
    }

    /// Engine using the tools found by [`MysqlBinaries::locate`].
    pub fn locate(bin_dir: Option<&Path>) -> Result<Self> {
        MysqlBinaries::locate(bin_dir).map(Self::new)
    }

    /// Paths of the tools in use
    pub fn binaries(&self) -> &MysqlBinaries {
        &self.bins
    }

    fn command(&self, program: &Path, args: Vec<String>, db: &DatabaseConfig) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if db.password.is_empty() {
            cmd.env_remove("MYSQL_PWD");
        } else {
            cmd.env("MYSQL_PWD", &db.password);
        }
        cmd
    }

    fn run_captured(&self, operation: &'static str, mut cmd: Command) -> Result<String> {
        let output = cmd
            .output()
            .map_err(|e| Error::capture(operation, format!("cannot run {:?}: {}", cmd.get_program(), e)))?;
        if !output.status.success() {
            return Err(Error::capture(operation, failure_message(output.status, &output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn failure_message(status: std::process::ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", status)
    } else {
        format!("exited with {}: {}", status, stderr)
    }
}

impl DumpEngine for MysqlDumpEngine {
    fn full_snapshot(&self, target: &Path, db: &DatabaseConfig) -> Result<()> {
        debug!(target: "dumpcycle::mysql", database = %db.name, target = %target.display(), "Running mysqldump");
        let file = File::create(target).map_err(|e| Error::capture("full_snapshot", e.to_string()))?;

        let mut cmd = self.command(&self.bins.mysqldump, full_snapshot_args(db), db);
        cmd.stdout(Stdio::from(file));
        self.run_captured("full_snapshot", cmd).map(|_| ())
    }

    fn log_pointer(&self, db: &DatabaseConfig) -> Result<CyclePointer> {
        let cmd = self.command(&self.bins.mysql, log_pointer_args(db), db);
        let stdout = self.run_captured("log_pointer", cmd)?;
        parse_master_status(&stdout)
    }

    fn incremental_segment(
        &self,
        from: &CyclePointer,
        db: &DatabaseConfig,
        out: &mut dyn Write,
    ) -> Result<u64> {
        debug!(target: "dumpcycle::mysql", database = %db.name, from = %from, "Running mysqlbinlog");
        let mut cmd = self.command(&self.bins.mysqlbinlog, incremental_segment_args(from, db), db);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::capture("incremental_segment", format!("cannot run mysqlbinlog: {}", e)))?;

        // Drained on its own thread so a chatty stderr cannot stall stdout.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                buf
            })
        });

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, out),
            None => Ok(0),
        };
        let status = child.wait();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let status = status.map_err(|e| Error::capture("incremental_segment", e.to_string()))?;
        if !status.success() {
            return Err(Error::capture("incremental_segment", failure_message(status, &stderr)));
        }
        copied.map_err(|e| Error::capture("incremental_segment", format!("writing segment: {}", e)))
    }

    fn ping(&self, db: &DatabaseConfig) -> Result<()> {
        let cmd = self.command(&self.bins.mysql, ping_args(db), db);
        self.run_captured("ping", cmd).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 3307,
            user: "backup".to_string(),
            password: "s3cret".to_string(),
            name: "shop".to_string(),
        }
    }

    #[test]
    fn parses_vertical_master_status() {
        let output = "*************************** 1. row ***************************\n\
                      \x20            File: binlog.000042\n\
                      \x20        Position: 15873\n\
                      \x20    Binlog_Do_DB: \n\
                      Binlog_Ignore_DB: \n\
                      Executed_Gtid_Set: \n";
        let pointer = parse_master_status(output).unwrap();
        assert_eq!(pointer, CyclePointer::new("binlog.000042", 15873));
    }

    #[test]
    fn empty_master_status_is_capture_error() {
        let err = parse_master_status("").unwrap_err();
        assert!(matches!(err, Error::Capture { operation: "log_pointer", .. }));
    }

    #[test]
    fn bad_position_is_capture_error() {
        let err = parse_master_status("File: binlog.000001\nPosition: abc\n").unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn full_snapshot_arguments() {
        let args = full_snapshot_args(&db());
        assert_eq!(
            args,
            [
                "-h", "db.internal", "-P", "3307", "-u", "backup",
                "--single-transaction", "--routines", "--triggers", "--set-gtid-purged=OFF",
                "shop",
            ]
        );
        assert!(!args.iter().any(|a| a.contains("s3cret")));
    }

    #[test]
    fn incremental_arguments_start_at_pointer() {
        let args = incremental_segment_args(&CyclePointer::new("binlog.000042", 15873), &db());
        assert_eq!(args.first().map(String::as_str), Some("--skip-gtids"));
        assert!(args.contains(&"--read-from-remote-server".to_string()));
        assert!(args.contains(&"--start-position=15873".to_string()));
        assert!(args.contains(&"--database=shop".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("binlog.000042"));
    }

    #[test]
    fn log_pointer_and_ping_arguments() {
        assert_eq!(log_pointer_args(&db()).last().map(String::as_str), Some("SHOW MASTER STATUS\\G"));
        assert_eq!(ping_args(&db()).last().map(String::as_str), Some("SELECT 1"));
    }

    #[test]
    fn binaries_in_dir_requires_all_tools() {
        let dir = TempDir::new().unwrap();
        std::fs::write(tool_path(dir.path(), MYSQL), b"").unwrap();
        std::fs::write(tool_path(dir.path(), MYSQLDUMP), b"").unwrap();

        let err = MysqlBinaries::in_dir(dir.path()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("mysqlbinlog"));

        std::fs::write(tool_path(dir.path(), MYSQLBINLOG), b"").unwrap();
        let bins = MysqlBinaries::locate(Some(dir.path())).unwrap();
        assert_eq!(bins.mysqldump, tool_path(dir.path(), MYSQLDUMP));
    }
}
