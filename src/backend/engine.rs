//! Consumer-facing handle of the acquisition engine
//!
//! [`AcquisitionEngine`] owns the worker thread and implements the
//! reconfiguration protocol. Every operation is callable from any thread
//! (`&self`), so a UI thread and a scripting thread can share one engine.
//!
//! # Blocking
//!
//! [`AcquisitionEngine::stop`] and [`AcquisitionEngine::set_integration_time`]
//! wait for the worker to acknowledge. Cancellation is cooperative and a read
//! already in progress runs to completion, so the wait is bounded by one
//! in-flight read: roughly one integration time plus device overhead. These
//! are the only calls that block on the worker; snapshot retrieval offers
//! blocking and non-blocking variants.

use crate::backend::device_trait::SpectrometerDevice;
use crate::backend::snapshot_channel::Published;
use crate::backend::worker::{AcquisitionWorker, DeviceProfile, EngineShared, WorkerCommand};
use crate::error::{Result, SpectroError};
use crate::types::{
    check_integration_time, validate_sample_count, AcquisitionConfig, AcquisitionMode,
    AcquisitionStats, EngineEvent, EngineState, Snapshot,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default capacity of the event queue
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Handle to a running acquisition engine
///
/// Dropping the handle shuts the worker down and joins it.
pub struct AcquisitionEngine {
    /// Sender for commands to the worker
    command_tx: Sender<WorkerCommand>,
    /// Receiver for worker events
    event_rx: Receiver<EngineEvent>,
    /// State shared with the worker
    shared: Arc<EngineShared>,
    /// Device facts read once at construction
    profile: DeviceProfile,
    /// Worker thread
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionEngine {
    /// Spawn a worker for `device` with the default event capacity
    pub fn new<D>(device: D, config: AcquisitionConfig) -> Result<Self>
    where
        D: SpectrometerDevice + 'static,
    {
        Self::with_event_capacity(device, config, DEFAULT_EVENT_CAPACITY)
    }

    /// Spawn a worker for `device`
    ///
    /// The device is moved into the worker thread, which reads its wavelength
    /// table and bounds, validates `config` and applies the initial
    /// integration time before this call returns.
    pub fn with_event_capacity<D>(
        device: D,
        config: AcquisitionConfig,
        event_capacity: usize,
    ) -> Result<Self>
    where
        D: SpectrometerDevice + 'static,
    {
        config.validate()?;

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = bounded(event_capacity.max(1));
        let (ready_tx, ready_rx) = bounded::<Result<DeviceProfile>>(1);
        let shared = Arc::new(EngineShared::new(config));

        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("spectrolive-worker".to_string())
            .spawn(move || {
                match AcquisitionWorker::initialize(device, worker_shared, command_rx, event_tx) {
                    Ok((mut worker, profile)) => {
                        let _ = ready_tx.send(Ok(profile));
                        worker.run();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let profile = match ready_rx.recv() {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                tracing::error!("Failed to initialize spectrometer: {}", e);
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(SpectroError::WorkerUnavailable(
                    "worker exited during initialization".to_string(),
                ));
            }
        };

        Ok(Self {
            command_tx,
            event_rx,
            shared,
            profile,
            handle: Some(handle),
        })
    }

    /// Begin continuous sampling
    ///
    /// No-op if a run is already in progress.
    pub fn start(&self) -> Result<()> {
        self.start_mode(AcquisitionMode::Continuous)
    }

    /// Take exactly one snapshot, then go idle
    ///
    /// No-op if a run is already in progress.
    pub fn start_single_shot(&self) -> Result<()> {
        self.start_mode(AcquisitionMode::SingleShot)
    }

    fn start_mode(&self, mode: AcquisitionMode) -> Result<()> {
        let mut state = self.shared.state();
        if *state == EngineState::Running {
            return Ok(());
        }
        *state = EngineState::Running;
        self.send(WorkerCommand::Start(mode))
    }

    /// Cancel any in-flight run and leave the engine idle
    ///
    /// Blocks until the worker acknowledges, at most one read duration. The
    /// partial run is discarded. No-op when idle.
    pub fn stop(&self) -> Result<()> {
        let ack_rx = {
            let mut state = self.shared.state();
            if *state == EngineState::Idle {
                return Ok(());
            }
            *state = EngineState::Cancelling;
            self.shared.snapshots.suppress(false);

            let (ack_tx, ack_rx) = bounded(1);
            self.send(WorkerCommand::Stop { ack: ack_tx })?;
            ack_rx
        };

        ack_rx
            .recv()
            .map_err(|_| SpectroError::WorkerUnavailable("stop not acknowledged".to_string()))
    }

    /// Change the integration time
    ///
    /// Values outside the device's `[lower, upper)` range fail with
    /// [`SpectroError::ConfigurationRejected`] without contacting the worker.
    /// A valid value cancels the current run (if any), discards any unread
    /// snapshot, waits for the worker to abandon the run, applies the value to
    /// the device and resumes sampling in the previous mode.
    ///
    /// A device read that fails while the change is pending belongs to the
    /// abandoned run. It is reported only as [`EngineEvent::RunFailed`] and
    /// sampling still resumes at the new time. A device that keeps failing
    /// fails the next run, which is published as usual.
    pub fn set_integration_time(&self, micros: u64) -> Result<()> {
        if let Err(e) = check_integration_time(micros, self.profile.bounds) {
            tracing::warn!("{}", e);
            return Err(e);
        }

        let ack_rx = {
            let mut state = self.shared.state();
            if *state == EngineState::Running {
                *state = EngineState::Cancelling;
            }
            self.shared.snapshots.suppress(true);

            let (ack_tx, ack_rx) = bounded(1);
            self.send(WorkerCommand::Reconfigure {
                micros,
                ack: ack_tx,
            })?;
            ack_rx
        };

        ack_rx.recv().map_err(|_| {
            SpectroError::WorkerUnavailable("reconfiguration not acknowledged".to_string())
        })?
    }

    /// Change the number of samples summed per snapshot
    ///
    /// Takes effect at the start of the next run; a run in progress completes
    /// with the count it started with.
    pub fn set_sample_count(&self, sample_count: u32) -> Result<()> {
        validate_sample_count(sample_count)?;
        let mut config = self.shared.config();
        if config.sample_count != sample_count {
            tracing::info!(
                "Sample count changed {} -> {}",
                config.sample_count,
                sample_count
            );
            config.sample_count = sample_count;
        }
        Ok(())
    }

    /// Block until a new snapshot (or run failure) is available
    pub fn get_snapshot(&self) -> Result<Snapshot> {
        self.shared.snapshots.wait_forever()
    }

    /// Block until a new snapshot is available or `timeout` elapses
    pub fn wait_snapshot(&self, timeout: Duration) -> Result<Snapshot> {
        self.shared.snapshots.wait(timeout)
    }

    /// Take the unread snapshot without blocking
    pub fn try_snapshot(&self) -> Option<Published> {
        self.shared.snapshots.try_take()
    }

    /// Peek at the most recent snapshot without consuming it
    pub fn latest_snapshot(&self) -> Option<Published> {
        self.shared.snapshots.latest()
    }

    /// Try to receive an event without blocking
    pub fn try_event(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive all pending events
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Event receiver, for `select!`-style integration in a consumer loop
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.event_rx
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        *self.shared.state()
    }

    /// Whether sampling is active
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Configuration the next run will use
    pub fn config(&self) -> AcquisitionConfig {
        *self.shared.config()
    }

    /// Wavelength table of the device
    pub fn wavelengths(&self) -> Arc<[f64]> {
        self.profile.wavelengths.clone()
    }

    /// Integration time bounds `(lower, upper)` in microseconds
    pub fn integration_time_bounds(&self) -> (u64, u64) {
        self.profile.bounds
    }

    /// Acquisition statistics as of the last completed run
    pub fn stats(&self) -> AcquisitionStats {
        self.shared.stats().clone()
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_worker()
    }

    fn shutdown_worker(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        // Close the gate so a run in progress ends at its next checkpoint
        self.shared.snapshots.suppress(false);
        let _ = self.command_tx.send(WorkerCommand::Shutdown);

        handle.join().map_err(|_| {
            SpectroError::WorkerUnavailable("acquisition worker panicked".to_string())
        })
    }

    fn send(&self, cmd: WorkerCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .map_err(|_| SpectroError::WorkerUnavailable("command channel closed".to_string()))
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_worker() {
            tracing::error!("{}", e);
        }
    }
}

impl std::fmt::Debug for AcquisitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionEngine")
            .field("channels", &self.profile.wavelengths.len())
            .field("bounds", &self.profile.bounds)
            .field("state", &self.state())
            .field("config", &self.config())
            .finish()
    }
}
