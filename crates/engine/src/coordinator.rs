//! Rotation coordinator
//!
//! Retires the current artifact into size-bounded parts for the period that
//! just ended and starts a new cycle. The coordinator never touches the
//! producer directly, only through [`ProducerControl`]:
//!
//! ```text
//! Idle -> AwaitQuiescence -> ProducerPaused -> Split -> Verify
//!      -> Archive -> Clean -> NewCycleInit -> Resume -> Idle
//! ```
//!
//! Any failure jumps straight to `Resume`. The artifact and the cycle state
//! are only deleted in `Clean`, after the parts have been verified and the
//! manifest written, so a failed run leaves them in place for a retry.
//!
//! Quiescence is cooperative. If the producer is still busy when the budget
//! runs out, the rotation proceeds with a warning.

use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use dumpcycle_core::{CyclePointer, Error, PartFile, ProducerControl, Result};
use dumpcycle_durability::{
    is_part_file_name, period_label, split, verify_parts, CycleLayout, ManifestConfig,
    RotationManifest,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::{Alert, AlertSink};
use crate::capture::Capturer;
use crate::config::RotationConfig;
use crate::schedule::CancellationToken;

/// Where a rotation run is, or where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStage {
    /// No rotation running
    Idle,
    /// Waiting for an in-flight capture to finish
    AwaitQuiescence,
    /// Producer loop stopped
    ProducerPaused,
    /// Writing part files
    Split,
    /// Checking the parts against the artifact
    Verify,
    /// Writing the manifest
    Archive,
    /// Deleting the artifact and the cycle state
    Clean,
    /// Taking the full capture that opens the next cycle
    NewCycleInit,
    /// Restarting the producer loop
    Resume,
}

impl RotationStage {
    /// Name used in logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStage::Idle => "idle",
            RotationStage::AwaitQuiescence => "await_quiescence",
            RotationStage::ProducerPaused => "producer_paused",
            RotationStage::Split => "split",
            RotationStage::Verify => "verify",
            RotationStage::Archive => "archive",
            RotationStage::Clean => "clean",
            RotationStage::NewCycleInit => "new_cycle_init",
            RotationStage::Resume => "resume",
        }
    }
}

impl std::fmt::Display for RotationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rotation run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    /// Parts written, verified and archived; the old cycle was cleaned up
    Completed {
        /// Period folder holding the parts
        folder: PathBuf,
        /// Parts in index order
        parts: Vec<PartFile>,
        /// Sum of the part sizes
        total_bytes: u64,
    },
    /// The run stopped at `stage`; artifact and state were kept
    Failed {
        /// Stage that failed
        stage: RotationStage,
        /// Failure description
        reason: String,
    },
    /// Another rotation was already running
    Skipped,
}

/// Record of one rotation run.
#[derive(Debug, Clone)]
pub struct RotationReport {
    /// Correlates the run's log lines
    pub id: Uuid,
    /// Period folder label, once determined
    pub period: Option<String>,
    /// How the run ended
    pub outcome: RotationOutcome,
    /// Whether the producer was still busy when the quiescence budget ran out
    pub quiescence_timed_out: bool,
    /// Whether the producer loop was running before the pause
    pub producer_was_running: bool,
    /// Whether the producer loop was restarted afterwards
    pub producer_resumed: bool,
    /// Pointer of the capture that opened the next cycle
    pub new_cycle: Option<CyclePointer>,
}

impl RotationReport {
    fn new(id: Uuid) -> Self {
        RotationReport {
            id,
            period: None,
            outcome: RotationOutcome::Skipped,
            quiescence_timed_out: false,
            producer_was_running: false,
            producer_resumed: false,
            new_cycle: None,
        }
    }

    /// Whether the run completed
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RotationOutcome::Completed { .. })
    }
}

/// Knobs of a rotation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationSettings {
    /// Part size limit in bytes
    pub max_part_bytes: u64,
    /// Same limit in GiB, as recorded in the manifest
    pub max_file_size_gb: f64,
    /// Configured trigger time, as recorded in the manifest
    pub split_time: String,
    /// Quiescence budget
    pub quiescence_timeout: Duration,
    /// Quiescence poll period
    pub quiescence_poll: Duration,
}

impl RotationSettings {
    /// Settings from the `[rotation]` section.
    pub fn from_config(config: &RotationConfig) -> Self {
        RotationSettings {
            max_part_bytes: config.max_part_bytes(),
            max_file_size_gb: config.max_file_size_gb,
            split_time: config.split_time.clone(),
            quiescence_timeout: config.quiescence_timeout(),
            quiescence_poll: config.quiescence_poll(),
        }
    }
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self::from_config(&RotationConfig::default())
    }
}

/// Producer stand-in for rotating without a running producer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProducer;

impl ProducerControl for NoProducer {
    fn is_busy(&self) -> bool {
        false
    }

    fn pause_producer(&self) -> bool {
        false
    }

    fn resume_producer(&self) -> Result<()> {
        Ok(())
    }
}

struct StageFailure {
    stage: RotationStage,
    error: Error,
}

impl StageFailure {
    fn at(stage: RotationStage) -> impl FnOnce(Error) -> StageFailure {
        move |error| StageFailure { stage, error }
    }
}

struct Retired {
    folder: PathBuf,
    parts: Vec<PartFile>,
    total_bytes: u64,
}

/// Runs rotations over one layout.
pub struct RotationCoordinator {
    settings: RotationSettings,
    layout: CycleLayout,
    capturer: Capturer,
    control: Arc<dyn ProducerControl>,
    alerts: Arc<dyn AlertSink>,
    stage: Mutex<RotationStage>,
    run_lock: Mutex<()>,
    interrupt: Mutex<CancellationToken>,
}

impl RotationCoordinator {
    /// Coordinator retiring `capturer`'s artifact into `layout`'s daily folders.
    pub fn new(
        settings: RotationSettings,
        layout: CycleLayout,
        capturer: Capturer,
        control: Arc<dyn ProducerControl>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        RotationCoordinator {
            settings,
            layout,
            capturer,
            control,
            alerts,
            stage: Mutex::new(RotationStage::Idle),
            run_lock: Mutex::new(()),
            interrupt: Mutex::new(CancellationToken::new()),
        }
    }

    /// Rotation settings
    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    /// Filesystem layout
    pub fn layout(&self) -> &CycleLayout {
        &self.layout
    }

    /// Current stage
    pub fn stage(&self) -> RotationStage {
        *self.stage.lock()
    }

    /// Abort a quiescence wait in progress. Nothing has been touched at that
    /// point, so the run fails cleanly.
    pub fn interrupt(&self) {
        self.interrupt.lock().cancel();
    }

    /// Rotate now, labelling the output with yesterday's date.
    pub fn run(&self) -> RotationReport {
        self.run_at(Local::now().naive_local())
    }

    /// Rotate as if triggered at `trigger`.
    ///
    /// Never panics and never returns an error: the outcome is in the
    /// report. The producer is resumed if it was running, whatever happened.
    pub fn run_at(&self, trigger: NaiveDateTime) -> RotationReport {
        let mut report = RotationReport::new(Uuid::new_v4());
        let Some(_running) = self.run_lock.try_lock() else {
            warn!(target: "dumpcycle::rotation", "Rotation already in progress, skipping");
            return report;
        };
        *self.interrupt.lock() = CancellationToken::new();

        info!(target: "dumpcycle::rotation", rotation_id = %report.id, %trigger, "Rotation started");

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.rotate(trigger, &mut report)));
        report.outcome = match result {
            Ok(Ok(retired)) => RotationOutcome::Completed {
                folder: retired.folder,
                parts: retired.parts,
                total_bytes: retired.total_bytes,
            },
            Ok(Err(failure)) => RotationOutcome::Failed {
                stage: failure.stage,
                reason: failure.error.to_string(),
            },
            Err(payload) => RotationOutcome::Failed {
                stage: self.stage(),
                reason: format!("panic: {}", panic_message(payload.as_ref())),
            },
        };

        self.resume(&mut report);
        self.set_stage(RotationStage::Idle);
        self.announce(&report);
        report
    }

    fn set_stage(&self, stage: RotationStage) {
        debug!(target: "dumpcycle::rotation", %stage, "Rotation stage");
        *self.stage.lock() = stage;
    }

    fn rotate(
        &self,
        trigger: NaiveDateTime,
        report: &mut RotationReport,
    ) -> std::result::Result<Retired, StageFailure> {
        self.set_stage(RotationStage::AwaitQuiescence);
        report.quiescence_timed_out = !self
            .await_quiescence()
            .map_err(StageFailure::at(RotationStage::AwaitQuiescence))?;

        self.set_stage(RotationStage::ProducerPaused);
        report.producer_was_running = self.control.pause_producer();
        // A tick may have started between the wait and the pause.
        if self.control.is_busy() {
            let idle = self
                .await_quiescence()
                .map_err(StageFailure::at(RotationStage::ProducerPaused))?;
            report.quiescence_timed_out |= !idle;
        }

        let period = trigger - ChronoDuration::days(1);
        let label = period_label(period);
        report.period = Some(label.clone());

        let artifact = self.capturer.artifact();
        if !artifact.exists() {
            return Err(StageFailure {
                stage: RotationStage::Split,
                error: Error::Split(format!("no backup file at {}", artifact.path().display())),
            });
        }

        self.set_stage(RotationStage::Split);
        let folder = self.layout.period_dir(&label);
        let (source_size, parts) = self
            .split_into(&folder)
            .map_err(StageFailure::at(RotationStage::Split))?;

        self.set_stage(RotationStage::Verify);
        let summary =
            verify_parts(source_size, &parts).map_err(StageFailure::at(RotationStage::Verify))?;
        info!(
            target: "dumpcycle::rotation",
            rotation_id = %report.id,
            period = %label,
            parts = summary.part_count,
            total_bytes = summary.total_bytes,
            "Split verified"
        );

        self.set_stage(RotationStage::Archive);
        let manifest = RotationManifest::new(
            period.date(),
            Local::now().naive_local(),
            &parts,
            self.settings.max_file_size_gb,
            ManifestConfig {
                backup_dir: self.layout.temp_dir().display().to_string(),
                daily_backup_dir: self.layout.daily_dir().display().to_string(),
                split_time: self.settings.split_time.clone(),
            },
        );
        manifest
            .write_new(&folder)
            .map_err(StageFailure::at(RotationStage::Archive))?;

        self.set_stage(RotationStage::Clean);
        self.capturer.reset().map_err(StageFailure::at(RotationStage::Clean))?;

        // The old cycle is gone from here on, so nothing below fails the run.
        self.set_stage(RotationStage::NewCycleInit);
        let opened = panic::catch_unwind(AssertUnwindSafe(|| self.capturer.full()))
            .unwrap_or_else(|payload| {
                Err(Error::capture(
                    "full snapshot",
                    format!("panic: {}", panic_message(payload.as_ref())),
                ))
            });
        match opened {
            Ok(outcome) => report.new_cycle = Some(outcome.pointer),
            Err(e) => {
                // The producer's next tick starts the cycle instead.
                error!(target: "dumpcycle::rotation", rotation_id = %report.id, error = %e, "New cycle capture failed");
                self.alerts.notify(&Alert::CaptureFailed {
                    database: self.capturer.database().name.clone(),
                    reason: e.to_string(),
                    critical: e.is_critical(),
                });
            }
        }

        Ok(Retired {
            folder,
            parts,
            total_bytes: summary.total_bytes,
        })
    }

    /// Wait for the producer to go idle. Returns `false` on timeout.
    fn await_quiescence(&self) -> Result<bool> {
        if !self.control.is_busy() {
            return Ok(true);
        }

        let timeout = self.settings.quiescence_timeout;
        let poll = self.settings.quiescence_poll;
        let interrupt = self.interrupt.lock().clone();
        info!(
            target: "dumpcycle::rotation",
            timeout_secs = timeout.as_secs(),
            "Waiting for in-flight capture to finish"
        );

        let started = Instant::now();
        let deadline = started + timeout;
        while self.control.is_busy() {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    target: "dumpcycle::rotation",
                    waited_secs = started.elapsed().as_secs(),
                    "Capture still in flight after quiescence timeout; rotating anyway"
                );
                return Ok(false);
            }
            if interrupt.wait_timeout(poll.min(deadline - now)) {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "rotation interrupted",
                )));
            }
            debug!(target: "dumpcycle::rotation", waited_secs = started.elapsed().as_secs(), "Still waiting");
        }

        info!(target: "dumpcycle::rotation", waited_ms = started.elapsed().as_millis() as u64, "Producer idle");
        Ok(true)
    }

    /// Split the artifact into a fresh period folder.
    fn split_into(&self, folder: &Path) -> Result<(u64, Vec<PartFile>)> {
        prepare_period_folder(folder)?;

        let artifact = self.capturer.artifact();
        let source_size = artifact.size()?;
        let parts = split(artifact.path(), folder, self.settings.max_part_bytes)?;
        if parts.is_empty() {
            return Err(Error::Split(format!(
                "backup file {} is empty",
                artifact.path().display()
            )));
        }
        Ok((source_size, parts))
    }

    fn resume(&self, report: &mut RotationReport) {
        if !report.producer_was_running {
            return;
        }
        self.set_stage(RotationStage::Resume);
        let resumed = panic::catch_unwind(AssertUnwindSafe(|| self.control.resume_producer()));
        match resumed {
            Ok(Ok(())) => {
                report.producer_resumed = true;
                info!(target: "dumpcycle::rotation", rotation_id = %report.id, "Producer resumed");
            }
            Ok(Err(e)) => {
                error!(target: "dumpcycle::rotation", rotation_id = %report.id, error = %e, "Failed to resume producer");
            }
            Err(payload) => {
                error!(
                    target: "dumpcycle::rotation",
                    rotation_id = %report.id,
                    "Producer resume panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn announce(&self, report: &RotationReport) {
        match &report.outcome {
            RotationOutcome::Completed {
                parts, total_bytes, ..
            } => {
                self.alerts.notify(&Alert::RotationCompleted {
                    period: report.period.clone().unwrap_or_default(),
                    parts: parts.len(),
                    total_bytes: *total_bytes,
                });
            }
            RotationOutcome::Failed { stage, reason } => {
                self.alerts.notify(&Alert::RotationFailed {
                    period: report.period.clone(),
                    reason: format!("{}: {}", stage, reason),
                });
            }
            RotationOutcome::Skipped => {}
        }
    }
}

/// Create the period folder, refusing one that was already archived and
/// clearing parts left by an earlier failed run.
fn prepare_period_folder(folder: &Path) -> Result<()> {
    let split_err = |e: io::Error| {
        Error::Split(format!("cannot prepare '{}': {}", folder.display(), e))
    };

    fs::create_dir_all(folder).map_err(split_err)?;
    if RotationManifest::exists_in(folder) {
        return Err(Error::Split(format!(
            "period folder '{}' is already archived",
            folder.display()
        )));
    }

    for entry in fs::read_dir(folder).map_err(split_err)? {
        let entry = entry.map_err(split_err)?;
        let name = entry.file_name();
        if name.to_str().map_or(false, is_part_file_name) {
            fs::remove_file(entry.path()).map_err(split_err)?;
            debug!(target: "dumpcycle::rotation", file = ?name, "Removed stale part");
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
