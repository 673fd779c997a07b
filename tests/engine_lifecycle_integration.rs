//! Integration tests for the acquisition engine lifecycle
//!
//! These tests validate the complete engine workflow:
//! - Accumulation and publication of runs
//! - Stop and integration-time changes interrupting a run
//! - Device failures surfacing to the consumer
//! - Restart after failures

mod common;

use common::builders::{config, DeviceBuilder, TEST_BOUNDS};
use common::mock_helpers::{stepped_device, Call};
use common::{collect_events_until, test_timeout, wait_for_state};
use serial_test::serial;
use spectrolive::{AcquisitionEngine, EngineEvent, EngineState, SpectroError};
use std::time::Duration;

#[test]
fn test_three_samples_are_summed() {
    let device = DeviceBuilder::new()
        .sequence(vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ])
        .build();
    let engine = AcquisitionEngine::new(device, config(2000, 3)).unwrap();

    engine.start_single_shot().unwrap();
    let snapshot = engine.wait_snapshot(test_timeout()).unwrap();

    assert_eq!(&*snapshot.intensities, &[12.0, 15.0, 18.0]);
    assert_eq!(&*snapshot.wavelengths, &[500.0, 600.0, 700.0]);
    assert_eq!(snapshot.sample_count, 3);
    assert_eq!(snapshot.integration_time_micros, 2000);
    assert_eq!(snapshot.averaged(), vec![4.0, 5.0, 6.0]);

    // A single shot is already idle when its snapshot is handed out
    assert_eq!(engine.state(), EngineState::Idle);
    engine.shutdown().unwrap();
}

#[test]
fn test_integration_time_bounds() {
    let device = DeviceBuilder::new().bounds(1000, 100_000).build();
    let log = device.log();
    let engine = AcquisitionEngine::new(device, config(2000, 1)).unwrap();

    let err = engine.set_integration_time(500).unwrap_err();
    assert!(matches!(
        err,
        SpectroError::ConfigurationRejected {
            requested: 500,
            lower: 1000,
            upper: 100_000
        }
    ));
    assert_eq!(log.applied_integration_times(), vec![2000]);
    assert_eq!(engine.config().integration_time_micros, 2000);

    engine.set_integration_time(5000).unwrap();
    assert_eq!(log.applied_integration_times(), vec![2000, 5000]);
    assert_eq!(engine.config().integration_time_micros, 5000);

    // Lower bound inclusive, upper exclusive
    engine.set_integration_time(1000).unwrap();
    assert!(engine.set_integration_time(100_000).is_err());
    assert_eq!(log.applied_integration_times(), vec![2000, 5000, 1000]);

    // Changing the time while idle does not start sampling
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(log.reads(), 0);

    engine.shutdown().unwrap();
}

#[test]
fn test_construction_rejects_out_of_bounds_config() {
    let device = DeviceBuilder::new().bounds(1000, 100_000).build();
    let log = device.log();

    let result = AcquisitionEngine::new(device, config(100_000, 1));
    assert!(matches!(
        result,
        Err(SpectroError::ConfigurationRejected { .. })
    ));
    assert!(log.applied_integration_times().is_empty());
}

#[test]
#[serial]
fn test_reconfigure_mid_run_discards_partial_run() {
    let (device, steps) = stepped_device(3, TEST_BOUNDS);
    let engine = AcquisitionEngine::new(device, config(2000, 5)).unwrap();

    engine.start().unwrap();
    assert_eq!(steps.step(), 1);
    assert_eq!(steps.step(), 2);
    // Third read is in flight when the change arrives
    assert_eq!(steps.wait_for_read(), 3);

    std::thread::scope(|s| {
        let change = s.spawn(|| engine.set_integration_time(5000));

        wait_for_state(&engine, EngineState::Cancelling);
        assert!(!steps.calls().contains(&Call::Apply(5000)));

        steps.release(1);
        change.join().unwrap().unwrap();
    });

    // Nothing from the abandoned run was published
    assert!(engine.try_snapshot().is_none());

    for expected in 4..=8 {
        assert_eq!(steps.step(), expected);
    }
    let snapshot = engine.wait_snapshot(test_timeout()).unwrap();
    assert_eq!(snapshot.integration_time_micros, 5000);
    assert_eq!(snapshot.sample_count, 5);
    assert_eq!(&*snapshot.intensities, &[25_000.0; 3]);

    let calls = steps.calls();
    let old_read = Call::Read {
        integration_time_micros: 2000,
    };
    let new_read = Call::Read {
        integration_time_micros: 5000,
    };
    assert_eq!(
        &calls[..10],
        &[
            Call::Apply(2000),
            old_read,
            old_read,
            old_read,
            Call::Apply(5000),
            new_read,
            new_read,
            new_read,
            new_read,
            new_read,
        ]
    );

    let events = engine.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::RunCancelled { samples_discarded: 3 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::IntegrationTimeApplied { micros: 5000 })));

    drop(steps);
    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_stop_cancels_run_in_progress() {
    let (device, steps) = stepped_device(2, TEST_BOUNDS);
    let engine = AcquisitionEngine::new(device, config(2000, 3)).unwrap();

    engine.start().unwrap();
    steps.step();
    assert_eq!(steps.wait_for_read(), 2);

    std::thread::scope(|s| {
        let stop = s.spawn(|| engine.stop());
        wait_for_state(&engine, EngineState::Cancelling);
        steps.release(1);
        stop.join().unwrap().unwrap();
    });

    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.try_snapshot().is_none());
    assert!(steps.no_read_within(Duration::from_millis(100)));
    assert_eq!(engine.stats().cancelled_runs, 1);

    let events = engine.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::RunCancelled { samples_discarded: 2 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::StateChanged(EngineState::Idle))));

    drop(steps);
    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_start_is_idempotent() {
    let device = DeviceBuilder::new().constant(2.0).realtime(1.0).build();
    let log = device.log();
    let engine = AcquisitionEngine::new(device, config(2000, 2)).unwrap();

    engine.start().unwrap();
    engine.start().unwrap();
    engine.start().unwrap();
    assert!(engine.is_running());

    let first = engine.wait_snapshot(test_timeout()).unwrap();
    let second = engine.wait_snapshot(test_timeout()).unwrap();
    assert!(second.sequence > first.sequence);
    assert_eq!(&*second.intensities, &[4.0; 3]);

    engine.stop().unwrap();
    let running_events = engine
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::StateChanged(EngineState::Running)))
        .count();
    assert_eq!(running_events, 1);
    assert!(log.reads() >= 4);

    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_read_failure_surfaces_and_engine_restarts() {
    let device = DeviceBuilder::new().constant(1.0).fail_on_read(2).build();
    let engine = AcquisitionEngine::new(device, config(2000, 3)).unwrap();

    engine.start().unwrap();
    let result = engine.wait_snapshot(test_timeout());
    assert!(matches!(result, Err(SpectroError::DeviceReadFailed(_))));
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.stats().failed_runs, 1);

    collect_events_until(&engine, |e| matches!(e, EngineEvent::RunFailed(_)));

    // The fault was a single read; the next run succeeds
    engine.start_single_shot().unwrap();
    let snapshot = engine.wait_snapshot(test_timeout()).unwrap();
    assert_eq!(&*snapshot.intensities, &[3.0; 3]);

    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_back_to_back_single_shots() {
    let device = DeviceBuilder::new().constant(1.0).build();
    let log = device.log();
    let engine = AcquisitionEngine::new(device, config(2000, 1)).unwrap();

    for expected in 1..=50u64 {
        engine.start_single_shot().unwrap();
        let snapshot = engine.wait_snapshot(test_timeout()).unwrap();
        assert_eq!(snapshot.sequence, expected);
        assert_eq!(&*snapshot.intensities, &[1.0; 3]);
    }

    assert_eq!(log.reads(), 50);
    assert_eq!(engine.stats().completed_runs, 50);
    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_start_right_after_read_failure() {
    for _ in 0..10 {
        let device = DeviceBuilder::new().constant(1.0).fail_on_read(1).build();
        let engine = AcquisitionEngine::new(device, config(2000, 3)).unwrap();

        engine.start().unwrap();
        assert!(matches!(
            engine.wait_snapshot(test_timeout()),
            Err(SpectroError::DeviceReadFailed(_))
        ));

        engine.start().unwrap();
        let snapshot = engine.wait_snapshot(test_timeout()).unwrap();
        assert_eq!(&*snapshot.intensities, &[3.0; 3]);
        assert!(engine.is_running());

        engine.shutdown().unwrap();
    }
}

#[test]
#[serial]
fn test_device_rejecting_reconfiguration() {
    let device = DeviceBuilder::new().constant(1.0).reject(5000).build();
    let log = device.log();
    let engine = AcquisitionEngine::new(device, config(2000, 1)).unwrap();

    engine.start().unwrap();
    engine.wait_snapshot(test_timeout()).unwrap();

    let err = engine.set_integration_time(5000).unwrap_err();
    assert!(matches!(
        err,
        SpectroError::DeviceReconfigureFailed {
            requested: 5000,
            ..
        }
    ));
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.config().integration_time_micros, 2000);
    assert_eq!(log.applied_integration_times(), vec![2000, 5000, 2000]);

    // A stale snapshot from before the change is never handed out
    assert!(engine.try_snapshot().is_none());

    engine.start().unwrap();
    let snapshot = engine.wait_snapshot(test_timeout()).unwrap();
    assert_eq!(snapshot.integration_time_micros, 2000);

    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_sample_count_applies_from_next_run() {
    let (device, steps) = stepped_device(2, TEST_BOUNDS);
    let engine = AcquisitionEngine::new(device, config(2000, 2)).unwrap();

    engine.start().unwrap();
    assert_eq!(steps.wait_for_read(), 1);
    engine.set_sample_count(3).unwrap();
    steps.release(1);
    steps.step();

    let first = engine.wait_snapshot(test_timeout()).unwrap();
    assert_eq!(first.sample_count, 2);
    assert_eq!(&*first.intensities, &[4000.0; 2]);

    for _ in 0..3 {
        steps.step();
    }
    let second = engine.wait_snapshot(test_timeout()).unwrap();
    assert_eq!(second.sample_count, 3);
    assert_eq!(&*second.intensities, &[6000.0; 2]);

    drop(steps);
    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_latest_snapshot_peeks_without_consuming() {
    let device = DeviceBuilder::new().constant(5.0).build();
    let engine = AcquisitionEngine::new(device, config(2000, 1)).unwrap();

    assert!(engine.latest_snapshot().is_none());
    engine.start_single_shot().unwrap();
    common::wait_until("snapshot", || engine.latest_snapshot().is_some());
    assert_eq!(engine.state(), EngineState::Idle);

    let peeked = engine.latest_snapshot().unwrap().unwrap();
    let taken = engine.try_snapshot().unwrap().unwrap();
    assert_eq!(peeked.sequence, taken.sequence);
    assert!(engine.try_snapshot().is_none());
    assert!(engine.latest_snapshot().is_some());

    engine.shutdown().unwrap();
}

#[test]
#[serial]
fn test_shutdown_while_running() {
    let device = DeviceBuilder::new().realtime(1.0).build();
    let engine = AcquisitionEngine::new(device, config(20_000, 50)).unwrap();

    engine.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    engine.shutdown().unwrap();
}
