//! Durability layer for dumpcycle
//!
//! This crate handles everything that touches disk:
//!
//! - Layout: where the artifact, the cycle state and the daily folders live
//! - Cycle state store: crash-safe persistence of the cycle pointer
//! - Artifact: the growing backup file, replaced on full captures and
//!   appended on incremental ones
//! - Splitter: statement-aligned, size-bounded partition of a retired artifact
//! - Verification: the parts account for every byte of the artifact
//! - Rotation manifest: the per-period `backup_info.json`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact; // Growing backup file
pub mod layout; // Filesystem layout
pub mod manifest; // backup_info.json
pub mod splitter; // Statement-aligned splitting
pub mod state_store; // Cycle pointer persistence
pub mod verify; // Split integrity checks

pub use artifact::{AppendReceipt, Artifact};
pub use layout::{
    is_part_file_name, part_file_name, period_label, CycleLayout, DEFAULT_ARTIFACT_NAME,
    DEFAULT_STATE_NAME, LOCK_FILE_NAME, MANIFEST_FILE_NAME, PART_FILE_PREFIX,
};
pub use manifest::{ManifestConfig, ManifestPart, RotationManifest};
pub use splitter::{ends_statement, split, STATEMENT_TERMINATOR};
pub use state_store::CycleStateStore;
pub use verify::{verify_parts, VerifySummary};

/// Bytes per gibibyte, the unit of the configured part size limit.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Convert a limit in (possibly fractional) gibibytes to bytes.
pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * BYTES_PER_GB as f64) as u64
}
