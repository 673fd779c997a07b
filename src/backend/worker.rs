//! Acquisition Worker Thread Implementation
//!
//! This module contains the loop that runs on the engine's dedicated thread
//! and is the only code that ever touches the spectrometer after construction.
//! It communicates with the consumer through a crossbeam command channel, the
//! shared [`SnapshotChannel`] and a bounded event channel.
//!
//! # Responsibilities
//!
//! - **Command processing**: start, stop, integration-time changes, shutdown
//! - **Accumulation**: sums `sample_count` raw samples into one reading per run
//! - **Publication**: hands completed runs to the snapshot slot
//! - **Cancellation**: checks the publication gate before every read and
//!   discards the partial run when it is closed
//! - **Statistics tracking**: read timing and run outcome counters
//!
//! # Ordering
//!
//! Every cancellation request closes the publication gate *and* queues a
//! command. When a run is cut short the worker blocks on the command channel
//! instead of starting another run, so the device is reconfigured only after
//! the cancelled run has been abandoned, and no run ever starts with a
//! configuration that is about to be replaced.

use crate::backend::accumulator::Accumulator;
use crate::backend::device_trait::{DeviceStats, SpectrometerDevice};
use crate::backend::snapshot_channel::{Published, SnapshotChannel};
use crate::error::{Result, SpectroError};
use crate::types::{
    check_integration_time, AcquisitionConfig, AcquisitionMode, AcquisitionStats, EngineEvent,
    EngineState, Snapshot,
};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Commands sent from the engine handle to the worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Begin sampling in the given mode
    Start(AcquisitionMode),
    /// Abandon any run and go idle; acknowledged once idle
    Stop { ack: Sender<()> },
    /// Apply a new integration time; acknowledged with the outcome
    Reconfigure { micros: u64, ack: Sender<Result<()>> },
    /// Leave the worker loop
    Shutdown,
}

/// State shared between the engine handle and its worker
#[derive(Debug)]
pub struct EngineShared {
    /// Configuration read by the worker at the start of every run
    pub config: Mutex<AcquisitionConfig>,
    /// Current lifecycle state
    pub state: Mutex<EngineState>,
    /// Latest published run result and the publication gate
    pub snapshots: SnapshotChannel,
    /// Statistics, refreshed by the worker after every run
    pub stats: Mutex<AcquisitionStats>,
}

impl EngineShared {
    /// Create shared state for a new engine
    pub fn new(config: AcquisitionConfig) -> Self {
        Self {
            config: Mutex::new(config),
            state: Mutex::new(EngineState::Idle),
            snapshots: SnapshotChannel::new(),
            stats: Mutex::new(AcquisitionStats::default()),
        }
    }

    /// Lock the configuration
    pub fn config(&self) -> MutexGuard<'_, AcquisitionConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the lifecycle state
    pub fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the statistics
    pub fn stats(&self) -> MutexGuard<'_, AcquisitionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the worker learned about the device during initialization
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Wavelength table, fixed for the engine lifetime
    pub wavelengths: Arc<[f64]>,
    /// Integration time bounds `(lower, upper)` in microseconds
    pub bounds: (u64, u64),
}

/// The worker that owns the device and runs the acquisition loop
pub struct AcquisitionWorker<D: SpectrometerDevice> {
    /// The instrument; only this worker calls into it
    device: D,
    /// Wavelength table shared with every snapshot
    wavelengths: Arc<[f64]>,
    /// State shared with the engine handle
    shared: Arc<EngineShared>,
    /// Command receiver from the engine handle
    command_rx: Receiver<WorkerCommand>,
    /// Event sender to the consumer
    event_tx: Sender<EngineEvent>,
    /// Requested sampling mode, `None` while idle
    mode: Option<AcquisitionMode>,
    /// Last state announced through `StateChanged`
    reported_state: EngineState,
    /// Partial sum of the run in progress
    accumulator: Accumulator,
    /// Loop flag
    running: bool,
    /// Run outcome counters
    stats: AcquisitionStats,
    /// Read timing
    device_stats: DeviceStats,
}

impl<D: SpectrometerDevice> AcquisitionWorker<D> {
    /// Query the device and apply the initial configuration
    ///
    /// Reads the wavelength table and bounds once, validates `shared`'s
    /// configuration against them and applies the integration time.
    pub fn initialize(
        mut device: D,
        shared: Arc<EngineShared>,
        command_rx: Receiver<WorkerCommand>,
        event_tx: Sender<EngineEvent>,
    ) -> Result<(Self, DeviceProfile)> {
        let wavelengths = device.wavelengths()?;
        if wavelengths.is_empty() {
            return Err(SpectroError::Device(
                "device reported no wavelength channels".to_string(),
            ));
        }
        let wavelengths: Arc<[f64]> = wavelengths.into();
        let bounds = device.integration_time_bounds();

        let config = *shared.config();
        config.validate()?;
        check_integration_time(config.integration_time_micros, bounds)?;
        device
            .apply_integration_time(config.integration_time_micros)
            .map_err(|e| SpectroError::DeviceReconfigureFailed {
                requested: config.integration_time_micros,
                message: e.to_string(),
            })?;

        tracing::info!(
            "Spectrometer ready: {} channels ({:.1}..{:.1} nm), integration time bounds [{}, {}) us",
            wavelengths.len(),
            wavelengths.first().copied().unwrap_or_default(),
            wavelengths.last().copied().unwrap_or_default(),
            bounds.0,
            bounds.1
        );

        let profile = DeviceProfile {
            wavelengths: wavelengths.clone(),
            bounds,
        };
        let worker = Self {
            device,
            accumulator: Accumulator::new(wavelengths.len()),
            wavelengths,
            shared,
            command_rx,
            event_tx,
            mode: None,
            reported_state: EngineState::Idle,
            running: true,
            stats: AcquisitionStats::default(),
            device_stats: DeviceStats::default(),
        };
        Ok((worker, profile))
    }

    /// Run the main worker loop until shutdown or until the engine is dropped
    pub fn run(&mut self) {
        tracing::info!("Acquisition worker started");

        while self.running {
            let wants_run = self.mode.is_some() && !self.shared.snapshots.is_suppressed();

            let command = if wants_run {
                match self.command_rx.try_recv() {
                    Ok(cmd) => Some(cmd),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                // Idle, or a cancellation is pending and its command is on the way
                match self.command_rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                }
            };

            match command {
                Some(cmd) => self.handle_command(cmd),
                None => self.run_once(),
            }
        }

        self.running = false;
        self.mode = None;
        self.shared.snapshots.close();
        self.set_state(EngineState::Idle);
        tracing::info!("Acquisition worker stopped");
    }

    /// Handle a single command
    fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Start(mode) => {
                tracing::info!("Starting {:?} acquisition", mode);
                self.mode = Some(mode);
                self.set_state(EngineState::Running);
            }
            WorkerCommand::Stop { ack } => {
                self.mode = None;
                self.shared.snapshots.reopen();
                self.set_state(EngineState::Idle);
                tracing::info!("Acquisition stopped");
                let _ = ack.send(());
            }
            WorkerCommand::Reconfigure { micros, ack } => {
                let result = self.reconfigure(micros);
                self.shared.snapshots.reopen();
                let _ = ack.send(result);
            }
            WorkerCommand::Shutdown => {
                self.running = false;
            }
        }
    }

    /// Apply a new integration time to the device
    ///
    /// On rejection the previous value is written back so the device is never
    /// left in a state that differs from the recorded configuration.
    fn reconfigure(&mut self, micros: u64) -> Result<()> {
        let previous = self.shared.config().integration_time_micros;
        self.accumulator.reset();

        match self.device.apply_integration_time(micros) {
            Ok(()) => {
                self.shared.config().integration_time_micros = micros;
                tracing::info!("Integration time changed {} us -> {} us", previous, micros);
                self.try_send_event(EngineEvent::IntegrationTimeApplied { micros });

                let state = if self.mode.is_some() {
                    EngineState::Running
                } else {
                    EngineState::Idle
                };
                self.set_state(state);
                Ok(())
            }
            Err(e) => {
                let err = SpectroError::DeviceReconfigureFailed {
                    requested: micros,
                    message: e.to_string(),
                };
                tracing::error!("{}", err);

                if let Err(restore) = self.device.apply_integration_time(previous) {
                    tracing::error!(
                        "Failed to restore integration time {} us: {}",
                        previous,
                        restore
                    );
                }

                self.mode = None;
                self.set_state(EngineState::Idle);
                self.try_send_event(EngineEvent::ReconfigureFailed(err.clone()));
                Err(err)
            }
        }
    }

    /// Execute one run: accumulate `sample_count` samples and publish the sum
    fn run_once(&mut self) {
        let config = *self.shared.config();
        self.accumulator.reset();

        tracing::debug!(
            "Run started: {} samples at {} us",
            config.sample_count,
            config.integration_time_micros
        );

        for _ in 0..config.sample_count {
            if self.shared.snapshots.is_suppressed() {
                let samples = self.accumulator.samples();
                self.discard_run(samples);
                return;
            }

            let started = Instant::now();
            let sample = match self.device.read_intensities() {
                Ok(raw) => self.accumulator.add(&raw),
                Err(e) => Err(e),
            };

            match sample {
                Ok(()) => {
                    self.device_stats
                        .record_success(started.elapsed().as_micros() as u64);
                    self.stats.samples_read += 1;
                }
                Err(e) => {
                    self.device_stats.record_failure();
                    self.stats.failed_reads += 1;
                    let samples = self.accumulator.samples();
                    self.fail_run(e, samples);
                    return;
                }
            }
        }

        let snapshot = Snapshot {
            wavelengths: self.wavelengths.clone(),
            intensities: self.accumulator.as_slice().into(),
            sample_count: config.sample_count,
            integration_time_micros: config.integration_time_micros,
            sequence: 0,
            acquired_at: Utc::now(),
        };

        let single_shot = self.mode == Some(AcquisitionMode::SingleShot);

        match self.publish_result(Ok(snapshot), single_shot) {
            Some(sequence) => {
                self.stats.completed_runs += 1;
                tracing::debug!("Published snapshot #{}", sequence);
                self.try_send_event(EngineEvent::SnapshotReady { sequence });
            }
            // Cancelled after the last sample was read
            None => self.discard_run(config.sample_count),
        }

        self.sync_stats();
    }

    /// Publish a run result, going idle in the same step when it ends the mode
    ///
    /// `Idle` is written under the state lock before the result becomes
    /// visible, so a consumer that reacts to the result with `start` always
    /// finds the engine idle. Returns `None` without touching the mode or the
    /// state when the gate is closed.
    fn publish_result(&mut self, item: Published, ends_mode: bool) -> Option<u64> {
        let sequence = {
            let mut state = self.shared.state();
            let sequence = self.shared.snapshots.publish(item);
            if sequence.is_some() && ends_mode {
                *state = EngineState::Idle;
            }
            sequence
        };

        if sequence.is_some() && ends_mode {
            self.mode = None;
            self.report_state(EngineState::Idle);
        }
        sequence
    }

    /// Drop a cancelled run's partial accumulation
    fn discard_run(&mut self, samples_discarded: u32) {
        self.stats.cancelled_runs += 1;
        tracing::debug!("Run cancelled, {} samples discarded", samples_discarded);
        self.try_send_event(EngineEvent::RunCancelled { samples_discarded });
        self.sync_stats();
    }

    /// Abort the run after a device failure
    ///
    /// The failure is published and the engine goes idle. If a stop or
    /// integration-time change is already pending, the run was being
    /// abandoned anyway: nothing is published, the mode is left for the
    /// pending command to settle and the failure is only reported as
    /// [`EngineEvent::RunFailed`].
    fn fail_run(&mut self, cause: SpectroError, samples_discarded: u32) {
        let err = match cause {
            SpectroError::DeviceReadFailed(_) => cause,
            other => SpectroError::DeviceReadFailed(other.to_string()),
        };
        tracing::error!(
            "Run aborted after {} samples: {}",
            samples_discarded,
            err
        );

        self.stats.failed_runs += 1;
        self.sync_stats();
        if self.publish_result(Err(err.clone()), true).is_none() {
            tracing::debug!("Read failure during cancellation, not published");
        }
        self.try_send_event(EngineEvent::RunFailed(err));
    }

    /// Update the shared state and notify the consumer
    ///
    /// The handle writes `Running`/`Cancelling` ahead of the worker, so change
    /// detection is against what this worker last reported.
    fn set_state(&mut self, state: EngineState) {
        *self.shared.state() = state;
        self.report_state(state);
    }

    /// Emit `StateChanged` if `state` differs from the last one reported
    fn report_state(&mut self, state: EngineState) {
        if self.reported_state != state {
            self.reported_state = state;
            self.try_send_event(EngineEvent::StateChanged(state));
        }
    }

    /// Copy the worker's counters into the shared statistics
    fn sync_stats(&mut self) {
        self.stats.avg_read_time_us = self.device_stats.avg_read_time_us();
        self.stats.min_read_time_us = self.device_stats.recent_min_us();
        self.stats.max_read_time_us = self.device_stats.recent_max_us();
        self.stats.jitter_us = self.device_stats.jitter_us();
        *self.shared.stats() = self.stats.clone();
    }

    /// Try to send an event, tracking dropped events if the queue is full
    ///
    /// Uses try_send() so a consumer that never drains events cannot stall
    /// acquisition.
    fn try_send_event(&mut self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            self.stats.dropped_events += 1;
        }
    }
}
