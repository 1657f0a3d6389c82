//! Rotation Protocol Tests
//!
//! The coordinator driving a real BackupProducer through ProducerControl:
//! - A busy producer that finishes inside the budget is waited for
//! - A producer stuck past the budget is rotated around, with a warning
//! - A failed rotation deletes nothing, and a later run succeeds
//! - Two rotations never run at once

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use dumpcycle_core::{CyclePointer, DatabaseConfig, ProducerControl};
use dumpcycle_durability::{CycleLayout, RotationManifest};
use dumpcycle_engine::testing::{FakeDumpEngine, FakeOp, RecordingAlerts};
use dumpcycle_engine::{
    BackupProducer, Capturer, ErrorPolicy, RotationCoordinator, RotationOutcome, RotationSettings,
    RotationStage,
};
use tempfile::TempDir;

struct Rig {
    _dir: TempDir,
    layout: CycleLayout,
    engine: Arc<FakeDumpEngine>,
    producer: Arc<BackupProducer>,
    coordinator: Arc<RotationCoordinator>,
}

fn rig(quiescence_timeout: Duration) -> Rig {
    let dir = TempDir::new().unwrap();
    let layout = CycleLayout::new(dir.path().join("tmp"), dir.path().join("daily"));
    layout.create_directories().unwrap();
    let engine = Arc::new(FakeDumpEngine::new());
    let alerts = Arc::new(RecordingAlerts::new());
    let db = DatabaseConfig::named("shop");

    let producer = Arc::new(BackupProducer::new(
        Capturer::new(engine.clone(), db.clone(), &layout),
        ErrorPolicy::Continue,
        alerts.clone(),
    ));
    let control: Arc<dyn ProducerControl> = producer.clone();
    let coordinator = Arc::new(RotationCoordinator::new(
        RotationSettings {
            max_part_bytes: 32,
            max_file_size_gb: 1.0,
            split_time: "00:00".to_string(),
            quiescence_timeout,
            quiescence_poll: Duration::from_millis(10),
        },
        layout.clone(),
        Capturer::new(engine.clone(), db, &layout),
        control,
        alerts,
    ));
    Rig {
        _dir: dir,
        layout,
        engine,
        producer,
        coordinator,
    }
}

fn trigger(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Test: rotation fires while a capture is in flight; the capture finishes
/// well inside the budget
/// Expected: no timeout warning; producer paused and resumed around the rotation
#[test]
fn test_waits_for_in_flight_capture() {
    let rig = rig(Duration::from_secs(30));
    rig.engine.hold();
    rig.producer.start(Duration::from_secs(3600)).unwrap();
    assert!(rig.engine.wait_until_parked(Duration::from_secs(5)));
    assert!(rig.producer.is_busy());

    let runner = {
        let coordinator = Arc::clone(&rig.coordinator);
        thread::spawn(move || coordinator.run_at(trigger(10)))
    };
    assert!(wait_for(Duration::from_secs(5), || {
        rig.coordinator.stage() == RotationStage::AwaitQuiescence
    }));
    thread::sleep(Duration::from_millis(40));
    rig.engine.release();

    let report = runner.join().unwrap();
    assert!(report.is_completed(), "{:?}", report.outcome);
    assert!(!report.quiescence_timed_out);
    assert!(report.producer_was_running);
    assert!(report.producer_resumed);
    assert!(rig.producer.is_running());

    // The in-flight full capture was retired whole
    let folder = rig.layout.period_dir("2024-03-09_00-00");
    let manifest = RotationManifest::load(&folder).unwrap();
    assert_eq!(manifest.backup_date, "2024-03-09");
    assert!(manifest.total_files >= 1);

    rig.producer.shutdown();
}

/// Test: rotation fires while the producer is stuck in a capture for longer
/// than the budget
/// Expected: timeout recorded; artifact is split anyway
#[test]
fn test_stuck_producer_is_rotated_around() {
    let rig = rig(Duration::from_millis(100));
    rig.producer.run_once().unwrap();
    let retired = fs::read(rig.layout.artifact_path()).unwrap();

    rig.engine.hold();
    rig.engine
        .queue_segment(b"INSERT INTO t VALUES (1);\n".to_vec(), CyclePointer::new("binlog.000001", 50));
    rig.producer.start(Duration::from_secs(3600)).unwrap();
    assert!(rig.engine.wait_until_parked(Duration::from_secs(5)));

    let runner = {
        let coordinator = Arc::clone(&rig.coordinator);
        thread::spawn(move || coordinator.run_at(trigger(10)))
    };
    // The new cycle's snapshot parks behind the same gate.
    assert!(wait_for(Duration::from_secs(5), || {
        rig.coordinator.stage() == RotationStage::NewCycleInit
    }));
    rig.engine.release();

    let report = runner.join().unwrap();
    rig.producer.shutdown();

    assert!(report.quiescence_timed_out);
    assert!(report.is_completed(), "{:?}", report.outcome);
    let parts = match &report.outcome {
        RotationOutcome::Completed { parts, .. } => parts.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    let joined: Vec<u8> = parts.iter().flat_map(|p| fs::read(&p.path).unwrap()).collect();
    assert_eq!(joined, retired);
}

/// Test: rotation fails after the split; then the cause is removed and a
/// rotation for another day runs
/// Expected: the failed run deleted nothing; the second run retires the
/// original artifact
#[test]
fn test_failed_rotation_is_retryable() {
    let rig = rig(Duration::from_secs(1));
    rig.producer.run_once().unwrap();
    rig.engine
        .queue_segment(b"INSERT INTO t VALUES (2);\n".to_vec(), CyclePointer::new("binlog.000001", 60));
    rig.producer.run_once().unwrap();

    let artifact = fs::read(rig.layout.artifact_path()).unwrap();
    let state = fs::read(rig.layout.state_path()).unwrap();

    // The period folder is already archived
    let folder = rig.layout.period_dir("2024-03-09_00-00");
    fs::create_dir_all(&folder).unwrap();
    fs::write(RotationManifest::path_in(&folder), b"{}").unwrap();

    let failed = rig.coordinator.run_at(trigger(10));
    assert!(matches!(failed.outcome, RotationOutcome::Failed { .. }));
    assert_eq!(fs::read(rig.layout.artifact_path()).unwrap(), artifact);
    assert_eq!(fs::read(rig.layout.state_path()).unwrap(), state);
    assert_eq!(rig.engine.calls(FakeOp::FullSnapshot), 1);

    let retried = rig.coordinator.run_at(trigger(11));
    assert!(retried.is_completed(), "{:?}", retried.outcome);
    let parts = match &retried.outcome {
        RotationOutcome::Completed { parts, .. } => parts.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    let joined: Vec<u8> = parts.iter().flat_map(|p| fs::read(&p.path).unwrap()).collect();
    assert_eq!(joined, artifact);
    assert_eq!(retried.new_cycle, rig.engine.observed_pointers().last().cloned());
}

/// Test: a second rotation is requested while one is running
/// Expected: the second is skipped without touching the producer
#[test]
fn test_concurrent_rotation_is_skipped() {
    let rig = rig(Duration::from_secs(1));
    rig.producer.run_once().unwrap();
    rig.engine.hold();

    let runner = {
        let coordinator = Arc::clone(&rig.coordinator);
        thread::spawn(move || coordinator.run_at(trigger(10)))
    };
    assert!(rig.engine.wait_until_parked(Duration::from_secs(5)));
    assert_eq!(rig.coordinator.stage(), RotationStage::NewCycleInit);

    let second = rig.coordinator.run_at(trigger(10));
    assert_eq!(second.outcome, RotationOutcome::Skipped);
    assert!(second.period.is_none());

    rig.engine.release();
    assert!(runner.join().unwrap().is_completed());
}
