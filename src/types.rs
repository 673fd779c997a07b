//! Core data types for spectrolive
//!
//! This module defines the data model shared between the acquisition worker
//! and its consumers: the acquisition configuration, published snapshots,
//! engine state, events and statistics.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::SpectroError;

/// Parameters a run is executed with
///
/// The worker copies this at the start of every run; changes made while a run
/// is in flight never affect that run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Integration time per raw sample in microseconds
    pub integration_time_micros: u64,
    /// Number of raw samples summed into one snapshot (always >= 1)
    pub sample_count: u32,
}

impl AcquisitionConfig {
    /// Create a new configuration
    pub fn new(integration_time_micros: u64, sample_count: u32) -> Self {
        Self {
            integration_time_micros,
            sample_count,
        }
    }

    /// Check that the sample count is usable
    pub fn validate(&self) -> crate::Result<()> {
        validate_sample_count(self.sample_count)
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            integration_time_micros: 100_000,
            sample_count: 1,
        }
    }
}

/// Reject sample counts below one
pub fn validate_sample_count(sample_count: u32) -> crate::Result<()> {
    if sample_count == 0 {
        return Err(SpectroError::InvalidConfiguration(
            "sample count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Check an integration time against a device's `[lower, upper)` range
pub fn check_integration_time(micros: u64, bounds: (u64, u64)) -> crate::Result<()> {
    let (lower, upper) = bounds;
    if micros < lower || micros >= upper {
        return Err(SpectroError::ConfigurationRejected {
            requested: micros,
            lower,
            upper,
        });
    }
    Ok(())
}

/// A completed, fully accumulated reading
///
/// Snapshots are immutable once published. Both arrays are reference counted
/// so cloning a snapshot to hand it to a plot or an exporter is cheap.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Wavelength of each channel (shared by every snapshot of an engine)
    pub wavelengths: Arc<[f64]>,
    /// Element-wise sum of `sample_count` raw samples
    pub intensities: Arc<[f64]>,
    /// Number of raw samples summed into `intensities`
    pub sample_count: u32,
    /// Integration time every sample of this run was taken with
    pub integration_time_micros: u64,
    /// Publication sequence number, strictly increasing per engine
    pub sequence: u64,
    /// Time the run completed
    pub acquired_at: DateTime<Utc>,
}

impl Snapshot {
    /// Number of wavelength channels
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    /// Whether the snapshot has no channels
    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// Mean intensity per channel (sum divided by the sample count)
    pub fn averaged(&self) -> Vec<f64> {
        let k = f64::from(self.sample_count.max(1));
        self.intensities.iter().map(|v| v / k).collect()
    }

    /// Highest summed intensity and the wavelength it was observed at
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.wavelengths
            .iter()
            .zip(self.intensities.iter())
            .fold(None, |best: Option<(f64, f64)>, (&wl, &v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((wl, v)),
            })
    }

    /// Iterate over `(wavelength, intensity)` pairs
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.wavelengths
            .iter()
            .copied()
            .zip(self.intensities.iter().copied())
    }
}

/// What the worker does after a run completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionMode {
    /// Start the next run immediately (live view)
    #[default]
    Continuous,
    /// Go idle after one published snapshot
    SingleShot,
}

/// Lifecycle state of an acquisition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No run in progress
    #[default]
    Idle,
    /// A run is in progress (or about to start)
    Running,
    /// Cancellation requested, waiting for the worker to acknowledge
    Cancelling,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Cancelling => write!(f, "Cancelling..."),
        }
    }
}

/// Notifications sent from the worker to the consumer
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A snapshot was published and can be taken from the slot
    SnapshotReady { sequence: u64 },
    /// A run was aborted by a device failure
    RunFailed(SpectroError),
    /// A run was cancelled and its partial accumulation discarded
    RunCancelled { samples_discarded: u32 },
    /// The device integration time changed
    IntegrationTimeApplied { micros: u64 },
    /// The device rejected an integration time change
    ReconfigureFailed(SpectroError),
    /// Engine state changed
    StateChanged(EngineState),
}

/// Statistics about the acquisition
#[derive(Debug, Clone, Default)]
pub struct AcquisitionStats {
    /// Runs that published a snapshot
    pub completed_runs: u64,
    /// Runs discarded by cancellation
    pub cancelled_runs: u64,
    /// Runs aborted by a device failure
    pub failed_runs: u64,
    /// Raw samples read successfully
    pub samples_read: u64,
    /// Raw samples that failed to read
    pub failed_reads: u64,
    /// Average raw read time in microseconds
    pub avg_read_time_us: f64,
    /// Fastest read in the recent window (microseconds)
    pub min_read_time_us: u64,
    /// Slowest read in the recent window (microseconds)
    pub max_read_time_us: u64,
    /// Spread of recent read times (microseconds)
    pub jitter_us: u64,
    /// Events dropped because the consumer did not keep up
    pub dropped_events: u64,
}

impl AcquisitionStats {
    /// Calculate the read success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.samples_read + self.failed_reads;
        if total == 0 {
            100.0
        } else {
            (self.samples_read as f64 / total as f64) * 100.0
        }
    }
}
