//! Daily rotation scheduler
//!
//! Checks the clock every `scheduler_poll` and runs the coordinator once the
//! configured `HH:MM` has been reached. The period label is taken from the
//! instant the rotation actually starts.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use dumpcycle_core::Result;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::alerts::{Alert, AlertSink};
use crate::coordinator::{RotationCoordinator, RotationReport, RotationStage};
use crate::schedule::{CancellationToken, DailyTrigger};

/// Snapshot of the scheduler for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationStatus {
    /// Whether the daily trigger is armed
    pub running: bool,
    /// Configured `HH:MM`
    pub scheduled_time: String,
    /// Part size limit in GiB
    pub max_part_size_gb: f64,
    /// Directory holding the artifact
    pub temp_dir: PathBuf,
    /// Root of the period folders
    pub daily_dir: PathBuf,
    /// Next firing, when running
    pub next_run: Option<NaiveDateTime>,
    /// Stage of the rotation in progress, or idle
    pub stage: RotationStage,
}

struct RunningScheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Fires the rotation coordinator once a day.
pub struct NightlyRotation {
    coordinator: Arc<RotationCoordinator>,
    trigger: DailyTrigger,
    poll: Duration,
    alerts: Arc<dyn AlertSink>,
    running: Mutex<Option<RunningScheduler>>,
}

impl NightlyRotation {
    /// Scheduler firing `coordinator` at `trigger`, checking every `poll`.
    pub fn new(
        coordinator: Arc<RotationCoordinator>,
        trigger: DailyTrigger,
        poll: Duration,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        NightlyRotation {
            coordinator,
            trigger,
            poll,
            alerts,
            running: Mutex::new(None),
        }
    }

    /// The coordinator being scheduled
    pub fn coordinator(&self) -> &Arc<RotationCoordinator> {
        &self.coordinator
    }

    /// Arm the daily trigger. Starting a running scheduler is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!(target: "dumpcycle::rotation", "Nightly rotation already running");
            return Ok(());
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let coordinator = Arc::clone(&self.coordinator);
        let trigger = self.trigger;
        let poll = self.poll;
        let handle = thread::Builder::new()
            .name("dumpcycle-rotation".to_string())
            .spawn(move || scheduler_loop(&coordinator, trigger, poll, &loop_token))?;

        *running = Some(RunningScheduler { token, handle });
        drop(running);

        let settings = self.coordinator.settings();
        self.alerts.notify(&Alert::RotationScheduled {
            split_time: self.trigger.to_string(),
            max_file_size_gb: settings.max_file_size_gb,
        });
        Ok(())
    }

    /// Disarm the trigger. A rotation waiting for quiescence is interrupted;
    /// one past that point runs to completion.
    ///
    /// Returns whether the scheduler was running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(running) => {
                running.token.cancel();
                self.coordinator.interrupt();
                info!(target: "dumpcycle::rotation", "Nightly rotation stopped");
                true
            }
            None => false,
        }
    }

    /// Stop and wait for the scheduler thread to exit.
    pub fn shutdown(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.token.cancel();
            self.coordinator.interrupt();
            if running.handle.join().is_err() {
                error!(target: "dumpcycle::rotation", "Rotation scheduler thread panicked");
            }
        }
    }

    /// Whether the daily trigger is armed
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Run one rotation now, on the calling thread.
    pub fn force_run(&self) -> RotationReport {
        info!(target: "dumpcycle::rotation", "Forced rotation");
        self.coordinator.run()
    }

    /// Current status.
    pub fn status(&self) -> RotationStatus {
        self.status_at(Local::now().naive_local())
    }

    /// Status as seen at `now`.
    pub fn status_at(&self, now: NaiveDateTime) -> RotationStatus {
        let running = self.is_running();
        let settings = self.coordinator.settings();
        let layout = self.coordinator.layout();
        RotationStatus {
            running,
            scheduled_time: self.trigger.to_string(),
            max_part_size_gb: settings.max_file_size_gb,
            temp_dir: layout.temp_dir().to_path_buf(),
            daily_dir: layout.daily_dir().to_path_buf(),
            next_run: running.then(|| self.trigger.next_after(now)),
            stage: self.coordinator.stage(),
        }
    }
}

impl Drop for NightlyRotation {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}

fn scheduler_loop(
    coordinator: &RotationCoordinator,
    trigger: DailyTrigger,
    poll: Duration,
    token: &CancellationToken,
) {
    let mut next = trigger.next_after(Local::now().naive_local());
    info!(target: "dumpcycle::rotation", split_time = %trigger, next_run = %next, "Nightly rotation armed");

    while !token.wait_timeout(poll) {
        let now = Local::now().naive_local();
        if now < next {
            continue;
        }
        let report = coordinator.run_at(now);
        debug!(target: "dumpcycle::rotation", rotation_id = %report.id, completed = report.is_completed(), "Scheduled rotation finished");
        next = trigger.next_after(Local::now().naive_local());
        info!(target: "dumpcycle::rotation", next_run = %next, "Next rotation scheduled");
    }
}
