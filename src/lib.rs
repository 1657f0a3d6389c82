//! dumpcycle - continuous database backups with daily rotation
//!
//! A backup producer keeps one growing SQL artifact per cycle: the first
//! capture is a full snapshot, every later one appends the change-log segment
//! since the stored pointer. Once a day the rotation coordinator pauses the
//! producer, splits the artifact into statement-aligned parts, verifies and
//! archives them with a manifest, and starts the next cycle.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dumpcycle::{BackupService, MysqlDumpEngine, ServiceConfig, TracingAlerts};
//!
//! let config = ServiceConfig::from_file("dumpcycle.toml".as_ref())?;
//! let engine = MysqlDumpEngine::locate(config.dump.bin_dir.as_deref())?;
//! let service = BackupService::new(config, Arc::new(engine), Arc::new(TracingAlerts))?;
//! service.start()?;
//! ```
//!
//! # Architecture
//!
//! - `dumpcycle-core`: pointer, mode, part and error types, and the ports
//! - `dumpcycle-durability`: layout, state store, artifact, splitter, manifest
//! - `dumpcycle-engine`: producer, coordinator, scheduler, service, MySQL engine

pub use dumpcycle_core::{
    CycleMode, CyclePointer, DatabaseConfig, DumpEngine, Error, PartFile, ProducerControl, Result,
};
pub use dumpcycle_durability::{
    split, verify_parts, Artifact, CycleLayout, CycleStateStore, RotationManifest, VerifySummary,
};
pub use dumpcycle_engine::*;

/// Crate-level re-exports of the layers, for callers that need more than the
/// common surface above.
pub mod layers {
    pub use dumpcycle_core as core;
    pub use dumpcycle_durability as durability;
    pub use dumpcycle_engine as engine;
}
