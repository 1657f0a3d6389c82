//! Backup service: the producer and the nightly rotation under one host
//!
//! `BackupService` wires both loops to the same dump engine and layout, and
//! injects the producer into the coordinator as its [`ProducerControl`].
//! Only one service may run per backup directory; `start` takes an exclusive
//! lock on `<backup_dir>/dumpcycle.lock` for as long as it runs.

use std::fs::{File, OpenOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dumpcycle_core::{CycleMode, CyclePointer, DumpEngine, Error, ProducerControl, Result};
use dumpcycle_durability::CycleLayout;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::alerts::{Alert, AlertSink};
use crate::capture::{CaptureOutcome, Capturer};
use crate::config::ServiceConfig;
use crate::coordinator::{RotationCoordinator, RotationReport, RotationSettings};
use crate::nightly::{NightlyRotation, RotationStatus};
use crate::producer::BackupProducer;
use crate::schedule::CancellationToken;

/// Snapshot of the whole service for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    /// Database being backed up
    pub database: String,
    /// Whether the capture loop is scheduled
    pub producer_running: bool,
    /// Whether a capture is in flight
    pub producer_busy: bool,
    /// Mode of the next capture
    pub next_mode: CycleMode,
    /// Stored cycle pointer, if readable
    pub pointer: Option<CyclePointer>,
    /// Current artifact size, if it exists
    pub artifact_size: Option<u64>,
    /// Last failed tick, cleared by a successful one
    pub last_failure: Option<String>,
    /// Nightly rotation
    pub rotation: RotationStatus,
}

/// Host of the backup producer and the nightly rotation.
pub struct BackupService {
    config: ServiceConfig,
    layout: CycleLayout,
    producer: Arc<BackupProducer>,
    nightly: NightlyRotation,
    alerts: Arc<dyn AlertSink>,
    lock: Mutex<Option<File>>,
    started: AtomicBool,
}

impl BackupService {
    /// Build the service from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(
        config: ServiceConfig,
        engine: Arc<dyn DumpEngine>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = config.storage.layout();

        let producer = Arc::new(BackupProducer::new(
            Capturer::new(Arc::clone(&engine), config.database.clone(), &layout),
            config.producer.on_error,
            Arc::clone(&alerts),
        ));
        let control: Arc<dyn ProducerControl> = producer.clone();
        let coordinator = Arc::new(RotationCoordinator::new(
            RotationSettings::from_config(&config.rotation),
            layout.clone(),
            Capturer::new(engine, config.database.clone(), &layout),
            control,
            Arc::clone(&alerts),
        ));
        let nightly = NightlyRotation::new(
            coordinator,
            config.rotation.trigger()?,
            config.rotation.scheduler_poll(),
            Arc::clone(&alerts),
        );

        Ok(BackupService {
            config,
            layout,
            producer,
            nightly,
            alerts,
            lock: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Configuration the service was built from
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Filesystem layout
    pub fn layout(&self) -> &CycleLayout {
        &self.layout
    }

    /// The backup producer
    pub fn producer(&self) -> &Arc<BackupProducer> {
        &self.producer
    }

    /// The nightly rotation scheduler
    pub fn nightly(&self) -> &NightlyRotation {
        &self.nightly
    }

    /// Create the directories and check that the database is reachable.
    pub fn check(&self) -> Result<()> {
        self.layout
            .create_directories()
            .map_err(|e| Error::persistence(self.layout.temp_dir(), e))?;
        self.producer.capturer().ping()
    }

    /// Run a single capture on the calling thread.
    pub fn run_once(&self) -> Result<CaptureOutcome> {
        self.layout
            .create_directories()
            .map_err(|e| Error::persistence(self.layout.temp_dir(), e))?;
        self.producer.run_once()
    }

    /// Take the single-instance lock on the backup directory.
    ///
    /// One-shot commands call this so they never race a running service.
    /// Calling it again while the lock is held is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if another instance holds the lock.
    pub fn lock_instance(&self) -> Result<()> {
        let mut lock = self.lock.lock();
        if lock.is_some() {
            return Ok(());
        }

        self.layout
            .create_directories()
            .map_err(|e| Error::persistence(self.layout.temp_dir(), e))?;
        let lock_path = self.layout.lock_path();
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::persistence(&lock_path, e))?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            Error::configuration(format!(
                "backup directory '{}' is already in use by another dumpcycle instance",
                self.layout.temp_dir().display()
            ))
        })?;
        *lock = Some(lock_file);
        Ok(())
    }

    /// Start the producer and, if enabled, the nightly rotation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if another instance holds the lock.
    pub fn start(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        self.lock_instance()?;

        let interval = self.config.producer.interval();
        if let Err(e) = self.producer.start(interval) {
            self.release_lock();
            return Err(e);
        }
        if self.config.rotation.enabled {
            if let Err(e) = self.nightly.start() {
                self.producer.shutdown();
                self.release_lock();
                return Err(e);
            }
        } else {
            info!(target: "dumpcycle::service", "Nightly rotation disabled");
        }
        self.started.store(true, Ordering::Release);

        self.alerts.notify(&Alert::ServiceStarted {
            database: self.config.database.name.clone(),
            interval: format_interval(
                self.config.producer.interval_hours,
                self.config.producer.interval_minutes,
            ),
        });
        Ok(())
    }

    /// Stop both loops, wait for them to exit and release the lock.
    pub fn stop(&self) {
        if self.started.swap(false, Ordering::AcqRel) {
            self.nightly.shutdown();
            self.producer.shutdown();
            self.alerts.notify(&Alert::ServiceStopped {
                database: self.config.database.name.clone(),
            });
        }
        self.release_lock();
    }

    fn release_lock(&self) {
        let Some(lock_file) = self.lock.lock().take() else {
            return;
        };
        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!(target: "dumpcycle::service", error = %e, "Failed to release instance lock");
        }
    }

    /// Whether `start` has been called without a matching `stop`
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Rotate now, on the calling thread.
    pub fn force_rotation(&self) -> RotationReport {
        self.nightly.force_run()
    }

    /// Token cancelled when the producer stops under the abort policy.
    pub fn abort_signal(&self) -> CancellationToken {
        self.producer.abort_signal()
    }

    /// Current status.
    pub fn status(&self) -> ServiceStatus {
        let capturer = self.producer.capturer();
        let pointer = capturer.store().load().ok().flatten();
        ServiceStatus {
            database: self.config.database.name.clone(),
            producer_running: self.producer.is_running(),
            producer_busy: self.producer.is_busy(),
            next_mode: capturer.mode(),
            pointer,
            artifact_size: capturer.artifact().size().ok(),
            last_failure: self.producer.last_failure(),
            rotation: self.nightly.status(),
        }
    }
}

impl Drop for BackupService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `"<h>h <m>m"` form of the capture interval.
pub fn format_interval(hours: u64, minutes: u64) -> String {
    format!("{}h {}m", hours, minutes)
}
