//! Deterministic collaborators for tests
//!
//! [`FakeDumpEngine`] stands in for the database tools: it writes a fixed
//! snapshot, hands out scripted pointers and segments, and fails on demand.
//! [`FakeProducerControl`] and [`RecordingAlerts`] let rotation tests observe
//! the quiescence protocol and the alerts it raises.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dumpcycle_core::{CyclePointer, DatabaseConfig, DumpEngine, Error, ProducerControl, Result};
use parking_lot::{Condvar, Mutex};

use crate::alerts::{Alert, AlertSink};

/// Engine operations that can be failed or counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    /// `full_snapshot`
    FullSnapshot,
    /// `log_pointer`
    LogPointer,
    /// `incremental_segment`
    IncrementalSegment,
    /// `ping`
    Ping,
}

impl FakeOp {
    fn name(self) -> &'static str {
        match self {
            FakeOp::FullSnapshot => "full_snapshot",
            FakeOp::LogPointer => "log_pointer",
            FakeOp::IncrementalSegment => "incremental_segment",
            FakeOp::Ping => "ping",
        }
    }
}

/// Bytes a failing `incremental_segment` writes before it errors out.
pub const PARTIAL_SEGMENT: &[u8] = b"-- partial segment";

struct FakeState {
    snapshot: Vec<u8>,
    pointer: CyclePointer,
    segments: VecDeque<(Vec<u8>, CyclePointer)>,
    failures: HashMap<FakeOp, usize>,
    calls: HashMap<FakeOp, usize>,
    observed: Vec<CyclePointer>,
    segment_starts: Vec<CyclePointer>,
}

#[derive(Default)]
struct Gate {
    held: bool,
    parked: usize,
}

/// Scriptable in-memory dump engine.
pub struct FakeDumpEngine {
    state: Mutex<FakeState>,
    gate: Mutex<Gate>,
    gate_cond: Condvar,
}

impl Default for FakeDumpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDumpEngine {
    /// Engine with a one-table snapshot at `binlog.000001@4`.
    pub fn new() -> Self {
        FakeDumpEngine {
            state: Mutex::new(FakeState {
                snapshot: b"-- snapshot\nCREATE TABLE t (id INT);\nINSERT INTO t VALUES (0);\n".to_vec(),
                pointer: CyclePointer::new("binlog.000001", 4),
                segments: VecDeque::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                observed: Vec::new(),
                segment_starts: Vec::new(),
            }),
            gate: Mutex::new(Gate::default()),
            gate_cond: Condvar::new(),
        }
    }

    /// Content written by every later `full_snapshot`.
    pub fn set_snapshot(&self, bytes: Vec<u8>) {
        self.state.lock().snapshot = bytes;
    }

    /// Pointer returned by `log_pointer` until the next segment moves it.
    pub fn set_pointer(&self, pointer: CyclePointer) {
        self.state.lock().pointer = pointer;
    }

    /// Queue the content of one `incremental_segment` call and the pointer
    /// the log reaches once it has been read.
    ///
    /// With the queue empty a segment is empty and the pointer stays put.
    pub fn queue_segment(&self, bytes: Vec<u8>, pointer_after: CyclePointer) {
        self.state.lock().segments.push_back((bytes, pointer_after));
    }

    /// Make the next call to `op` fail with a capture error.
    pub fn fail_next(&self, op: FakeOp) {
        *self.state.lock().failures.entry(op).or_insert(0) += 1;
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: FakeOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every pointer `log_pointer` has returned, in order.
    pub fn observed_pointers(&self) -> Vec<CyclePointer> {
        self.state.lock().observed.clone()
    }

    /// Every pointer an incremental segment was requested from, in order.
    pub fn segment_starts(&self) -> Vec<CyclePointer> {
        self.state.lock().segment_starts.clone()
    }

    /// Block captures (snapshot and segment) until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.lock().held = true;
    }

    /// Let held captures continue.
    pub fn release(&self) {
        let mut gate = self.gate.lock();
        gate.held = false;
        self.gate_cond.notify_all();
    }

    /// Wait until a capture is parked at the gate.
    ///
    /// Returns `false` if none arrived within `timeout`.
    pub fn wait_until_parked(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock();
        while gate.parked == 0 {
            if self.gate_cond.wait_until(&mut gate, deadline).timed_out() {
                return gate.parked > 0;
            }
        }
        true
    }

    fn pass_gate(&self) {
        let mut gate = self.gate.lock();
        if !gate.held {
            return;
        }
        gate.parked += 1;
        self.gate_cond.notify_all();
        while gate.held {
            self.gate_cond.wait(&mut gate);
        }
        gate.parked -= 1;
    }

    fn enter(&self, op: FakeOp) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::capture(op.name(), "injected failure"));
            }
        }
        Ok(())
    }
}

impl DumpEngine for FakeDumpEngine {
    fn full_snapshot(&self, target: &Path, _db: &DatabaseConfig) -> Result<()> {
        self.pass_gate();
        self.enter(FakeOp::FullSnapshot)?;
        let snapshot = self.state.lock().snapshot.clone();
        fs::write(target, snapshot).map_err(|e| Error::capture("full_snapshot", e.to_string()))
    }

    fn log_pointer(&self, _db: &DatabaseConfig) -> Result<CyclePointer> {
        self.enter(FakeOp::LogPointer)?;
        let mut state = self.state.lock();
        let pointer = state.pointer.clone();
        state.observed.push(pointer.clone());
        Ok(pointer)
    }

    fn incremental_segment(
        &self,
        from: &CyclePointer,
        _db: &DatabaseConfig,
        out: &mut dyn Write,
    ) -> Result<u64> {
        self.pass_gate();
        if let Err(e) = self.enter(FakeOp::IncrementalSegment) {
            out.write_all(PARTIAL_SEGMENT)?;
            return Err(e);
        }

        let next = {
            let mut state = self.state.lock();
            state.segment_starts.push(from.clone());
            state.segments.pop_front()
        };
        match next {
            Some((bytes, pointer_after)) => {
                out.write_all(&bytes)?;
                self.state.lock().pointer = pointer_after;
                Ok(bytes.len() as u64)
            }
            None => Ok(0),
        }
    }

    fn ping(&self, _db: &DatabaseConfig) -> Result<()> {
        self.enter(FakeOp::Ping)
    }
}

/// Producer stand-in recording how the coordinator drives it.
#[derive(Default)]
pub struct FakeProducerControl {
    running: AtomicBool,
    busy_until: Mutex<Option<Instant>>,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    fail_resume: AtomicBool,
}

impl FakeProducerControl {
    /// Producer whose loop is running and idle.
    pub fn running() -> Self {
        let control = Self::default();
        control.running.store(true, Ordering::SeqCst);
        control
    }

    /// Producer whose loop is not running.
    pub fn stopped() -> Self {
        Self::default()
    }

    /// Report busy for `duration` from now.
    pub fn busy_for(&self, duration: Duration) {
        *self.busy_until.lock() = Some(Instant::now() + duration);
    }

    /// Make every `resume_producer` call fail.
    pub fn fail_resume(&self) {
        self.fail_resume.store(true, Ordering::SeqCst);
    }

    /// Whether the loop is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of `pause_producer` calls
    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    /// Number of `resume_producer` calls
    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl ProducerControl for FakeProducerControl {
    fn is_busy(&self) -> bool {
        self.busy_until
            .lock()
            .map_or(false, |until| Instant::now() < until)
    }

    fn pause_producer(&self) -> bool {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.running.swap(false, Ordering::SeqCst)
    }

    fn resume_producer(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(Error::configuration("producer cannot be restarted"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that keeps every alert in memory.
#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far, in order.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Number of alerts matching `pred`.
    pub fn count(&self, pred: impl Fn(&Alert) -> bool) -> usize {
        self.alerts.lock().iter().filter(|a| pred(a)).count()
    }
}

impl AlertSink for RecordingAlerts {
    fn notify(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}
