//! Seams between the backup core and its collaborators
//!
//! `DumpEngine` is the port through which the producer and the rotation
//! coordinator reach the database's snapshot and log tools. `ProducerControl`
//! is the only view the rotation coordinator has of the producer.

use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::types::{CyclePointer, DatabaseConfig};

/// Capability to capture database content.
///
/// Calls are synchronous and block the calling thread until the engine
/// finishes. Implementations must be safe to call from the producer thread
/// and the rotation thread (requires Send + Sync).
pub trait DumpEngine: Send + Sync {
    /// Write a complete snapshot of `db` to `target`, replacing any content.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the engine invocation fails.
    fn full_snapshot(&self, target: &Path, db: &DatabaseConfig) -> Result<()>;

    /// Current position of the engine's change log.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the position cannot be read.
    fn log_pointer(&self, db: &DatabaseConfig) -> Result<CyclePointer>;

    /// Stream the change log of `db` from `from` to `out`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the engine invocation fails. Bytes may
    /// already have been written to `out` when this happens.
    fn incremental_segment(
        &self,
        from: &CyclePointer,
        db: &DatabaseConfig,
        out: &mut dyn Write,
    ) -> Result<u64>;

    /// Check that the engine can reach the database.
    fn ping(&self, _db: &DatabaseConfig) -> Result<()> {
        Ok(())
    }
}

/// What the rotation coordinator may do to the producer.
pub trait ProducerControl: Send + Sync {
    /// Whether a capture is currently in flight.
    fn is_busy(&self) -> bool;

    /// Stop scheduling further captures.
    ///
    /// Returns whether the producer's loop was running before the call.
    /// An in-flight capture is not interrupted.
    fn pause_producer(&self) -> bool;

    /// Restart the producer's loop with its previous interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop cannot be restarted.
    fn resume_producer(&self) -> Result<()>;
}
