//! Backup producer: one capture per interval on a dedicated thread
//!
//! The producer owns the artifact and the cycle state between rotations.
//! Ticks are serialized per producer, and the busy flag is raised for the
//! duration of each tick so the rotation coordinator can wait for quiescence.
//!
//! The loop runs its first capture as soon as it starts, then sleeps on a
//! cancellation token. A stop request wakes the sleep at once; a capture
//! already in flight is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dumpcycle_core::{Error, ProducerControl, Result};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::alerts::{Alert, AlertSink};
use crate::capture::{CaptureOutcome, Capturer};
use crate::config::ErrorPolicy;
use crate::schedule::CancellationToken;

/// Clears the busy flag when a tick ends, including by panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        BusyGuard(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct ProducerInner {
    capturer: Capturer,
    policy: ErrorPolicy,
    alerts: Arc<dyn AlertSink>,
    busy: AtomicBool,
    tick_lock: Mutex<()>,
    last_failure: Mutex<Option<String>>,
    aborted: CancellationToken,
}

impl ProducerInner {
    fn run_once(&self) -> Result<CaptureOutcome> {
        let _tick = self.tick_lock.lock();
        let _busy = BusyGuard::raise(&self.busy);
        self.capturer.capture()
    }

    /// One scheduled tick. Returns whether the loop should keep going.
    fn tick(&self) -> bool {
        match self.run_once() {
            Ok(_) => {
                *self.last_failure.lock() = None;
                true
            }
            Err(e) => {
                let critical = e.is_critical();
                if critical {
                    error!(target: "dumpcycle::producer", error = %e, critical, "Capture failed; cycle pointer may not match the artifact");
                } else {
                    warn!(target: "dumpcycle::producer", error = %e, "Capture failed; retrying next tick");
                }
                self.alerts.notify(&Alert::CaptureFailed {
                    database: self.capturer.database().name.clone(),
                    reason: e.to_string(),
                    critical,
                });
                *self.last_failure.lock() = Some(e.to_string());

                match self.policy {
                    ErrorPolicy::Continue => true,
                    ErrorPolicy::Abort => {
                        error!(target: "dumpcycle::producer", "Stopping producer (on_error = abort)");
                        self.aborted.cancel();
                        false
                    }
                }
            }
        }
    }
}

fn producer_loop(inner: &ProducerInner, token: &CancellationToken, interval: Duration) {
    info!(
        target: "dumpcycle::producer",
        database = %inner.capturer.database().name,
        interval_secs = interval.as_secs(),
        "Producer started"
    );
    while !token.is_cancelled() {
        if !inner.tick() {
            token.cancel();
            break;
        }
        if token.wait_timeout(interval) {
            break;
        }
    }
    info!(target: "dumpcycle::producer", "Producer stopped");
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Schedule {
    running: Option<RunningLoop>,
    interval: Option<Duration>,
}

/// Periodic capture loop over one [`Capturer`].
pub struct BackupProducer {
    inner: Arc<ProducerInner>,
    schedule: Mutex<Schedule>,
}

impl BackupProducer {
    /// Producer over `capturer`, reacting to failures per `policy`.
    pub fn new(capturer: Capturer, policy: ErrorPolicy, alerts: Arc<dyn AlertSink>) -> Self {
        BackupProducer {
            inner: Arc::new(ProducerInner {
                capturer,
                policy,
                alerts,
                busy: AtomicBool::new(false),
                tick_lock: Mutex::new(()),
                last_failure: Mutex::new(None),
                aborted: CancellationToken::new(),
            }),
            schedule: Mutex::new(Schedule::default()),
        }
    }

    /// The capturer driven by this producer
    pub fn capturer(&self) -> &Capturer {
        &self.inner.capturer
    }

    /// Run one capture on the calling thread.
    ///
    /// Waits for a tick already in progress to finish first. Errors are
    /// returned to the caller, not subject to the error policy.
    pub fn run_once(&self) -> Result<CaptureOutcome> {
        self.inner.run_once()
    }

    /// Start the capture loop with `interval` between ticks.
    ///
    /// The first capture runs immediately. Starting a running producer is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is zero or the thread cannot be
    /// spawned.
    pub fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::configuration("producer interval must be greater than zero"));
        }

        let mut schedule = self.schedule.lock();
        if let Some(running) = &schedule.running {
            if !running.token.is_cancelled() {
                debug!(target: "dumpcycle::producer", "Producer already running");
                return Ok(());
            }
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("dumpcycle-producer".to_string())
            .spawn(move || producer_loop(&inner, &loop_token, interval))?;

        schedule.running = Some(RunningLoop { token, handle });
        schedule.interval = Some(interval);
        Ok(())
    }

    /// Stop scheduling captures.
    ///
    /// Returns whether the loop was running. An in-flight capture finishes
    /// on its own; watch [`is_busy`](Self::is_busy) to know when.
    pub fn stop(&self) -> bool {
        match self.schedule.lock().running.take() {
            Some(running) => {
                let was_running = !running.token.is_cancelled();
                running.token.cancel();
                was_running
            }
            None => false,
        }
    }

    /// Stop the loop and wait for its thread to exit.
    pub fn shutdown(&self) {
        let running = self.schedule.lock().running.take();
        if let Some(running) = running {
            running.token.cancel();
            if running.handle.join().is_err() {
                error!(target: "dumpcycle::producer", "Producer thread panicked");
            }
        }
    }

    /// Whether the capture loop is scheduled
    pub fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .running
            .as_ref()
            .map_or(false, |r| !r.token.is_cancelled())
    }

    /// Whether a capture is in flight
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Interval of the most recent `start`
    pub fn interval(&self) -> Option<Duration> {
        self.schedule.lock().interval
    }

    /// Token cancelled when the abort policy stops the producer.
    pub fn abort_signal(&self) -> CancellationToken {
        self.inner.aborted.clone()
    }

    /// Description of the last failed tick, cleared by a successful one.
    pub fn last_failure(&self) -> Option<String> {
        self.inner.last_failure.lock().clone()
    }
}

impl ProducerControl for BackupProducer {
    fn is_busy(&self) -> bool {
        BackupProducer::is_busy(self)
    }

    fn pause_producer(&self) -> bool {
        self.stop()
    }

    fn resume_producer(&self) -> Result<()> {
        let interval = self
            .interval()
            .ok_or_else(|| Error::configuration("producer has never been started"))?;
        self.start(interval)
    }
}

impl Drop for BackupProducer {
    fn drop(&mut self) {
        if let Some(running) = self.schedule.get_mut().running.take() {
            running.token.cancel();
        }
    }
}
