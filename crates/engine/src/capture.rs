//! One capture step of the backup cycle
//!
//! A [`Capturer`] binds the dump engine to the artifact and the cycle state
//! store of one layout. It decides full vs incremental from what is on disk,
//! runs the matching engine calls, and only then records the engine's new
//! log pointer. The producer runs it on every tick; the rotation coordinator
//! uses it to reset the cycle and start the next one.
//!
//! Ordering rules:
//! - Full: clear state, snapshot into `<artifact>.partial`, rename, query
//!   pointer, save. Any failure leaves the state absent, so the next tick is
//!   full again.
//! - Incremental: append segment, query pointer, save. A failure at any step
//!   truncates the artifact back to its previous length and leaves the old
//!   pointer in place.

use std::sync::Arc;

use dumpcycle_core::{CycleMode, CyclePointer, DatabaseConfig, DumpEngine, Error, Result};
use dumpcycle_durability::{Artifact, CycleLayout, CycleStateStore};
use tracing::{debug, info, warn};

/// Result of one successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// Mode the capture ran in
    pub mode: CycleMode,
    /// Pointer persisted after the capture
    pub pointer: CyclePointer,
    /// Bytes the capture added to the artifact
    pub bytes_written: u64,
    /// Artifact size after the capture
    pub artifact_size: u64,
    /// Previous log id when the engine switched log files during the cycle
    pub log_switched_from: Option<String>,
}

/// Engine, artifact and state store of one backup cycle.
pub struct Capturer {
    engine: Arc<dyn DumpEngine>,
    database: DatabaseConfig,
    artifact: Artifact,
    store: CycleStateStore,
}

impl Capturer {
    /// Capturer writing into `layout`'s artifact and state file.
    pub fn new(engine: Arc<dyn DumpEngine>, database: DatabaseConfig, layout: &CycleLayout) -> Self {
        Capturer {
            engine,
            database,
            artifact: Artifact::new(layout.artifact_path()),
            store: CycleStateStore::new(layout.state_path()),
        }
    }

    /// The artifact handle
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// The cycle state store
    pub fn store(&self) -> &CycleStateStore {
        &self.store
    }

    /// Database being captured
    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    /// Check that the engine can reach the database.
    pub fn ping(&self) -> Result<()> {
        self.engine.ping(&self.database)
    }

    /// Mode the next capture would run in.
    pub fn mode(&self) -> CycleMode {
        let pointer = self.load_pointer();
        CycleMode::derive(self.artifact.exists(), pointer.as_ref())
    }

    // Unreadable state means we cannot trust the pointer; start over.
    fn load_pointer(&self) -> Option<CyclePointer> {
        match self.store.load() {
            Ok(pointer) => pointer,
            Err(e) => {
                warn!(
                    target: "dumpcycle::state",
                    path = %self.store.path().display(),
                    error = %e,
                    "Cycle state unreadable, next capture will be full"
                );
                None
            }
        }
    }

    /// Run one capture in whichever mode the on-disk state calls for.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the engine fails and `Error::Persistence`
    /// if the new pointer cannot be saved. In both cases the stored pointer
    /// still matches the artifact's content.
    pub fn capture(&self) -> Result<CaptureOutcome> {
        let pointer = self.load_pointer();
        match (CycleMode::derive(self.artifact.exists(), pointer.as_ref()), pointer) {
            (CycleMode::Incremental, Some(from)) => self.incremental(from),
            _ => self.full(),
        }
    }

    /// Start a new cycle with a full snapshot.
    pub fn full(&self) -> Result<CaptureOutcome> {
        debug!(target: "dumpcycle::producer", database = %self.database.name, "Starting full capture");

        self.store.clear()?;
        let artifact_size = self
            .artifact
            .replace_with(|target| self.engine.full_snapshot(target, &self.database))?;
        let pointer = self.engine.log_pointer(&self.database)?;
        self.store.save(&pointer)?;

        info!(
            target: "dumpcycle::producer",
            mode = "full",
            log_id = %pointer.log_id,
            offset = pointer.offset,
            size = artifact_size,
            "Capture complete"
        );
        Ok(CaptureOutcome {
            mode: CycleMode::Full,
            pointer,
            bytes_written: artifact_size,
            artifact_size,
            log_switched_from: None,
        })
    }

    fn incremental(&self, from: CyclePointer) -> Result<CaptureOutcome> {
        debug!(
            target: "dumpcycle::producer",
            database = %self.database.name,
            from = %from,
            "Starting incremental capture"
        );

        let receipt = self
            .artifact
            .append_with(|out| self.engine.incremental_segment(&from, &self.database, out))?;

        let saved = self
            .engine
            .log_pointer(&self.database)
            .and_then(|pointer| self.store.save(&pointer).map(|()| pointer));
        let pointer = match saved {
            Ok(pointer) => pointer,
            Err(e) => {
                self.roll_back(receipt.previous_len);
                return Err(e);
            }
        };

        // The pointer is overwritten, not advanced. Changes written to the
        // old log file after the segment was read are not carried over.
        let log_switched_from = if pointer.log_id != from.log_id {
            warn!(
                target: "dumpcycle::producer",
                from = %from,
                to = %pointer,
                "Change log switched files during the cycle; the tail of the previous file may be missing from the artifact"
            );
            Some(from.log_id)
        } else {
            None
        };

        let artifact_size = receipt.previous_len + receipt.bytes_appended;
        info!(
            target: "dumpcycle::producer",
            mode = "incremental",
            log_id = %pointer.log_id,
            offset = pointer.offset,
            appended = receipt.bytes_appended,
            size = artifact_size,
            "Capture complete"
        );
        Ok(CaptureOutcome {
            mode: CycleMode::Incremental,
            pointer,
            bytes_written: receipt.bytes_appended,
            artifact_size,
            log_switched_from,
        })
    }

    fn roll_back(&self, len: u64) {
        if let Err(e) = self.artifact.truncate(len) {
            warn!(
                target: "dumpcycle::producer",
                path = %self.artifact.path().display(),
                error = %e,
                "Failed to discard appended segment"
            );
        }
    }

    /// End the cycle: remove the state, then the artifact.
    ///
    /// State goes first so an interrupted reset still derives a full capture.
    pub fn reset(&self) -> Result<()> {
        let had_state = self.store.clear()?;
        let had_artifact = self.artifact.remove().map_err(|e| match e {
            Error::Io(source) => Error::persistence(self.artifact.path(), source),
            other => other,
        })?;
        debug!(target: "dumpcycle::state", had_state, had_artifact, "Cycle reset");
        Ok(())
    }
}
