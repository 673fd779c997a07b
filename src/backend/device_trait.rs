//! SpectrometerDevice trait for a unified instrument interface
//!
//! This module provides the narrow capability interface the acquisition
//! engine needs from a spectrometer, enabling both real hardware adapters and
//! simulated devices for testing.

use crate::error::Result;
use std::collections::VecDeque;

/// Size of the rolling window for recent read times
const RECENT_WINDOW_SIZE: usize = 100;

/// Statistics for device read operations
///
/// Tracks success rates and read latency. The worker owns one instance per
/// engine and updates it around every `read_intensities` call.
#[derive(Debug, Clone)]
pub struct DeviceStats {
    /// Total number of successful reads
    pub successful_reads: u64,
    /// Total number of failed reads
    pub failed_reads: u64,
    /// Total read time in microseconds
    pub total_read_time_us: u64,
    /// Last read time in microseconds
    pub last_read_time_us: u64,
    /// Rolling window of recent read times for jitter calculation
    pub recent_read_times: VecDeque<u64>,
}

impl Default for DeviceStats {
    fn default() -> Self {
        Self {
            successful_reads: 0,
            failed_reads: 0,
            total_read_time_us: 0,
            last_read_time_us: 0,
            recent_read_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl DeviceStats {
    /// Calculate average read time in microseconds
    pub fn avg_read_time_us(&self) -> f64 {
        if self.successful_reads == 0 {
            0.0
        } else {
            self.total_read_time_us as f64 / self.successful_reads as f64
        }
    }

    /// Record a successful read operation
    pub fn record_success(&mut self, time_us: u64) {
        self.successful_reads += 1;
        self.total_read_time_us += time_us;
        self.last_read_time_us = time_us;

        self.recent_read_times.push_back(time_us);
        if self.recent_read_times.len() > RECENT_WINDOW_SIZE {
            self.recent_read_times.pop_front();
        }
    }

    /// Record a failed read operation
    pub fn record_failure(&mut self) {
        self.failed_reads += 1;
    }

    /// Calculate jitter (max - min) over recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        self.recent_max_us().saturating_sub(self.recent_min_us())
    }

    /// Get the recent min read time (from rolling window)
    pub fn recent_min_us(&self) -> u64 {
        self.recent_read_times.iter().min().copied().unwrap_or(0)
    }

    /// Get the recent max read time (from rolling window)
    pub fn recent_max_us(&self) -> u64 {
        self.recent_read_times.iter().max().copied().unwrap_or(0)
    }
}

/// Capabilities the acquisition engine requires from a spectrometer
///
/// Nothing else about the instrument is visible to the engine. Implementations
/// must be `Send`: the device is moved into the worker thread at engine
/// construction and only that thread calls into it afterwards.
///
/// # Example
///
/// ```ignore
/// fn first_sample(device: &mut dyn SpectrometerDevice) -> Result<Vec<f64>> {
///     device.apply_integration_time(10_000)?;
///     device.read_intensities()
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait SpectrometerDevice: Send {
    /// Wavelength of every detector channel, in channel order
    ///
    /// Read once per engine; the length defines N for the engine lifetime.
    fn wavelengths(&mut self) -> Result<Vec<f64>>;

    /// Take one raw sample of N intensities
    ///
    /// May block for up to the configured integration time.
    fn read_intensities(&mut self) -> Result<Vec<f64>>;

    /// Supported integration times in microseconds as `(lower, upper)`
    ///
    /// The lower bound is inclusive, the upper bound exclusive.
    fn integration_time_bounds(&self) -> (u64, u64);

    /// Set the integration time used by subsequent reads
    fn apply_integration_time(&mut self, micros: u64) -> Result<()>;
}

impl<D: SpectrometerDevice + ?Sized> SpectrometerDevice for Box<D> {
    fn wavelengths(&mut self) -> Result<Vec<f64>> {
        (**self).wavelengths()
    }

    fn read_intensities(&mut self) -> Result<Vec<f64>> {
        (**self).read_intensities()
    }

    fn integration_time_bounds(&self) -> (u64, u64) {
        (**self).integration_time_bounds()
    }

    fn apply_integration_time(&mut self, micros: u64) -> Result<()> {
        (**self).apply_integration_time(micros)
    }
}
