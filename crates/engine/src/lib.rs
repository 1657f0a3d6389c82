//! Backup producer and rotation coordinator for dumpcycle
//!
//! This crate runs the backup cycle on top of the core types and the
//! on-disk layer:
//! - BackupProducer: one full or incremental capture per interval
//! - RotationCoordinator: quiesce, split, verify, archive, reset, resume
//! - NightlyRotation: fires the coordinator at a daily `HH:MM`
//! - BackupService: hosts both loops behind a single-instance lock
//! - MysqlDumpEngine: the dump engine port over the MySQL client tools

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alerts; // Operator notifications
pub mod capture; // Full/incremental capture step
pub mod config; // dumpcycle.toml
pub mod coordinator;
pub mod mysql;
pub mod nightly;
pub mod producer;
pub mod schedule; // Cancellation token and daily trigger
pub mod service;
pub mod testing; // Fakes for tests

pub use alerts::{Alert, AlertSink, TracingAlerts};
pub use capture::{CaptureOutcome, Capturer};
pub use config::{
    DumpConfig, ErrorPolicy, ProducerConfig, RotationConfig, ServiceConfig, StorageConfig,
    CONFIG_FILE_NAME,
};
pub use coordinator::{
    NoProducer, RotationCoordinator, RotationOutcome, RotationReport, RotationSettings,
    RotationStage,
};
pub use mysql::{MysqlBinaries, MysqlDumpEngine};
pub use nightly::{NightlyRotation, RotationStatus};
pub use producer::BackupProducer;
pub use schedule::{CancellationToken, DailyTrigger, InvalidTriggerTime};
pub use service::{BackupService, ServiceStatus};
