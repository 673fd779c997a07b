//! Simulated Spectrometer for Testing
//!
//! This module provides a spectrometer that can be used for testing the engine
//! and running the live view without real hardware. It synthesises spectra
//! from configurable patterns.
//!
//! # Features
//!
//! - **Pattern-based spectra**: emission lines on a baseline, a flat level, or
//!   a scripted sequence of raw samples for deterministic tests
//! - **Integration-time response**: line intensity scales with integration
//!   time and clips at the detector maximum, like a real CCD
//! - **Real-time pacing**: optionally sleeps for (a fraction of) the
//!   integration time on every read
//! - **Fault injection**: fail a specific read, or reject specific
//!   integration times even though they are within bounds
//! - **Call log**: a shared [`SimulationLog`] records every read and
//!   integration-time change, and stays observable after the device has been
//!   moved into the worker thread
//!
//! # Example
//!
//! ```ignore
//! use spectrolive::backend::simulated::{SimulatedSpectrometer, SpectrumPattern};
//!
//! let device = SimulatedSpectrometer::new(512, 350.0, 1000.0)
//!     .with_pattern(SpectrumPattern::mercury_argon())
//!     .with_noise(5.0)
//!     .with_realtime(1.0);
//! let log = device.log();
//!
//! let engine = AcquisitionEngine::new(device, AcquisitionConfig::new(10_000, 4))?;
//! ```

use crate::backend::device_trait::SpectrometerDevice;
use crate::error::{Result, SpectroError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default lower integration time bound (inclusive), microseconds
pub const DEFAULT_MIN_INTEGRATION_US: u64 = 1_000;

/// Default upper integration time bound (exclusive), microseconds
pub const DEFAULT_MAX_INTEGRATION_US: u64 = 65_000_000;

/// Default detector full scale in counts
pub const DEFAULT_MAX_INTENSITY: f64 = 65_535.0;

/// A single Gaussian emission line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissionLine {
    /// Line centre in nm
    pub center_nm: f64,
    /// Full width at half maximum in nm
    pub fwhm_nm: f64,
    /// Peak counts accumulated per millisecond of integration
    pub counts_per_ms: f64,
}

impl EmissionLine {
    /// Create a new emission line
    pub fn new(center_nm: f64, fwhm_nm: f64, counts_per_ms: f64) -> Self {
        Self {
            center_nm,
            fwhm_nm,
            counts_per_ms,
        }
    }

    fn profile(&self, wavelength: f64) -> f64 {
        let sigma = self.fwhm_nm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
        let d = wavelength - self.center_nm;
        (-(d * d) / (2.0 * sigma * sigma)).exp()
    }
}

/// Pattern for generating simulated spectra
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrumPattern {
    /// Same value on every channel, independent of integration time
    Constant(f64),
    /// Gaussian lines on a flat dark baseline
    EmissionLines {
        /// Dark level in counts
        baseline: f64,
        /// Lines to render
        lines: Vec<EmissionLine>,
    },
    /// Pre-recorded raw samples returned in order
    Sequence {
        /// Samples still to be returned
        samples: VecDeque<Vec<f64>>,
        /// Whether to start over once exhausted (otherwise reads fail)
        cycle: bool,
    },
}

impl SpectrumPattern {
    /// Scripted sequence that fails once exhausted
    pub fn sequence(samples: impl IntoIterator<Item = Vec<f64>>) -> Self {
        SpectrumPattern::Sequence {
            samples: samples.into_iter().collect(),
            cycle: false,
        }
    }

    /// Scripted sequence that repeats forever
    pub fn cycle(samples: impl IntoIterator<Item = Vec<f64>>) -> Self {
        SpectrumPattern::Sequence {
            samples: samples.into_iter().collect(),
            cycle: true,
        }
    }

    /// A few prominent Hg/Ar calibration lines
    pub fn mercury_argon() -> Self {
        SpectrumPattern::EmissionLines {
            baseline: 1500.0,
            lines: vec![
                EmissionLine::new(435.8, 1.2, 900.0),
                EmissionLine::new(546.1, 1.2, 2000.0),
                EmissionLine::new(696.5, 1.5, 400.0),
                EmissionLine::new(763.5, 1.5, 1200.0),
                EmissionLine::new(811.5, 1.5, 700.0),
            ],
        }
    }
}

impl Default for SpectrumPattern {
    fn default() -> Self {
        SpectrumPattern::mercury_argon()
    }
}

/// One call observed by a simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    /// `read_intensities` was called (recorded on entry)
    Read,
    /// `apply_integration_time` was called with this value
    ApplyIntegrationTime(u64),
}

/// Shared record of the calls a simulated device received
#[derive(Debug, Clone, Default)]
pub struct SimulationLog {
    calls: Arc<Mutex<Vec<DeviceCall>>>,
}

impl SimulationLog {
    fn lock(&self) -> MutexGuard<'_, Vec<DeviceCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: DeviceCall) {
        self.lock().push(call);
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().clone()
    }

    /// Number of reads so far
    pub fn reads(&self) -> usize {
        self.lock()
            .iter()
            .filter(|c| matches!(c, DeviceCall::Read))
            .count()
    }

    /// Every integration time applied so far, in order
    pub fn applied_integration_times(&self) -> Vec<u64> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::ApplyIntegrationTime(t) => Some(*t),
                DeviceCall::Read => None,
            })
            .collect()
    }
}

/// Simulated spectrometer for testing without real hardware
#[derive(Debug)]
pub struct SimulatedSpectrometer {
    /// Serial number reported for device selection
    serial_number: String,
    /// Wavelength of each channel
    wavelengths: Vec<f64>,
    /// Spectrum generator
    pattern: SpectrumPattern,
    /// Integration time bounds `[lower, upper)`
    bounds: (u64, u64),
    /// Currently applied integration time
    integration_time_micros: u64,
    /// Detector full scale
    max_intensity: f64,
    /// Noise amplitude to add (0.0 = no noise)
    noise_amplitude: f64,
    /// Fraction of the integration time each read sleeps (0.0 = no pacing)
    realtime_scale: f64,
    /// 1-based index of the read that should fail
    fail_on_read: Option<usize>,
    /// Integration times the device refuses despite being in bounds
    rejected_times: Vec<u64>,
    /// Reads performed so far
    reads: usize,
    /// Call log shared with the test
    log: SimulationLog,
}

impl SimulatedSpectrometer {
    /// Create a device with `channels` evenly spaced channels over `[start_nm, end_nm]`
    pub fn new(channels: usize, start_nm: f64, end_nm: f64) -> Self {
        let step = if channels > 1 {
            (end_nm - start_nm) / (channels - 1) as f64
        } else {
            0.0
        };
        let wavelengths = (0..channels).map(|i| start_nm + step * i as f64).collect();
        Self::with_wavelengths(wavelengths)
    }

    /// Create a device with an explicit wavelength table
    pub fn with_wavelengths(wavelengths: Vec<f64>) -> Self {
        Self {
            serial_number: "SIM00001".to_string(),
            wavelengths,
            pattern: SpectrumPattern::default(),
            bounds: (DEFAULT_MIN_INTEGRATION_US, DEFAULT_MAX_INTEGRATION_US),
            integration_time_micros: DEFAULT_MIN_INTEGRATION_US,
            max_intensity: DEFAULT_MAX_INTENSITY,
            noise_amplitude: 0.0,
            realtime_scale: 0.0,
            fail_on_read: None,
            rejected_times: Vec::new(),
            reads: 0,
            log: SimulationLog::default(),
        }
    }

    /// Open the simulated device matching `serial_number`, or the default one
    pub fn from_serial_number(serial_number: Option<&str>) -> Self {
        let device = Self::new(1024, 340.0, 1030.0);
        match serial_number {
            Some(serial) => device.with_serial_number(serial),
            None => device,
        }
    }

    /// Set the reported serial number
    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = serial.into();
        self
    }

    /// Set the spectrum pattern
    pub fn with_pattern(mut self, pattern: SpectrumPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Set the integration time bounds `(lower, upper)` in microseconds
    pub fn with_bounds(mut self, lower: u64, upper: u64) -> Self {
        self.bounds = (lower, upper);
        self
    }

    /// Set the detector full scale in counts
    pub fn with_max_intensity(mut self, max_intensity: f64) -> Self {
        self.max_intensity = max_intensity;
        self
    }

    /// Add uniform noise of the given amplitude
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Sleep for `scale` times the integration time on every read
    pub fn with_realtime(mut self, scale: f64) -> Self {
        self.realtime_scale = scale.max(0.0);
        self
    }

    /// Make the `n`-th read (1-based) fail
    pub fn fail_on_read(mut self, n: usize) -> Self {
        self.fail_on_read = Some(n);
        self
    }

    /// Refuse to apply `micros` even though it is within bounds
    pub fn reject_integration_time(mut self, micros: u64) -> Self {
        self.rejected_times.push(micros);
        self
    }

    /// Handle to the call log
    pub fn log(&self) -> SimulationLog {
        self.log.clone()
    }

    /// Reported serial number
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Detector full scale in counts
    pub fn max_intensity(&self) -> f64 {
        self.max_intensity
    }

    /// Currently applied integration time
    pub fn integration_time_micros(&self) -> u64 {
        self.integration_time_micros
    }

    fn generate(&mut self) -> Result<Vec<f64>> {
        let integration_ms = self.integration_time_micros as f64 / 1000.0;
        let sample = match &mut self.pattern {
            SpectrumPattern::Constant(value) => vec![*value; self.wavelengths.len()],
            SpectrumPattern::EmissionLines { baseline, lines } => self
                .wavelengths
                .iter()
                .map(|&wl| {
                    let signal: f64 = lines
                        .iter()
                        .map(|line| line.counts_per_ms * integration_ms * line.profile(wl))
                        .sum();
                    *baseline + signal
                })
                .collect(),
            SpectrumPattern::Sequence { samples, cycle } => {
                let next = samples.pop_front().ok_or_else(|| {
                    SpectroError::DeviceReadFailed("simulated sequence exhausted".to_string())
                })?;
                if *cycle {
                    samples.push_back(next.clone());
                }
                next
            }
        };

        let noisy = self.noise_amplitude > 0.0;
        let is_scripted = matches!(self.pattern, SpectrumPattern::Sequence { .. });
        Ok(sample
            .into_iter()
            .map(|v| {
                let v = if noisy {
                    v + (rand_simple() - 0.5) * 2.0 * self.noise_amplitude
                } else {
                    v
                };
                if is_scripted {
                    v
                } else {
                    v.clamp(0.0, self.max_intensity)
                }
            })
            .collect())
    }
}

impl Default for SimulatedSpectrometer {
    fn default() -> Self {
        Self::from_serial_number(None)
    }
}

impl SpectrometerDevice for SimulatedSpectrometer {
    fn wavelengths(&mut self) -> Result<Vec<f64>> {
        Ok(self.wavelengths.clone())
    }

    fn read_intensities(&mut self) -> Result<Vec<f64>> {
        self.log.record(DeviceCall::Read);
        self.reads += 1;

        if self.realtime_scale > 0.0 {
            let pace = self.integration_time_micros as f64 * self.realtime_scale;
            std::thread::sleep(Duration::from_micros(pace as u64));
        }

        if self.fail_on_read == Some(self.reads) {
            return Err(SpectroError::DeviceReadFailed(format!(
                "simulated fault on read {}",
                self.reads
            )));
        }

        self.generate()
    }

    fn integration_time_bounds(&self) -> (u64, u64) {
        self.bounds
    }

    fn apply_integration_time(&mut self, micros: u64) -> Result<()> {
        self.log.record(DeviceCall::ApplyIntegrationTime(micros));

        let (lower, upper) = self.bounds;
        if micros < lower || micros >= upper || self.rejected_times.contains(&micros) {
            return Err(SpectroError::Device(format!(
                "{} {} us refused",
                self.serial_number, micros
            )));
        }
        self.integration_time_micros = micros;
        Ok(())
    }
}

/// Simple pseudo-random number generator (no external dependency)
fn rand_simple() -> f64 {
    use std::cell::Cell;
    thread_local! {
        static SEED: Cell<u64> = const { Cell::new(0x9E37_79B9_7F4A_7C15) };
    }
    SEED.with(|seed| {
        let mut s = seed.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        seed.set(s);
        (s as f64) / (u64::MAX as f64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wavelength_grid() {
        let mut device = SimulatedSpectrometer::new(5, 400.0, 800.0);
        assert_eq!(
            device.wavelengths().unwrap(),
            vec![400.0, 500.0, 600.0, 700.0, 800.0]
        );
    }

    #[test]
    fn test_constant_pattern() {
        let mut device =
            SimulatedSpectrometer::new(3, 400.0, 600.0).with_pattern(SpectrumPattern::Constant(7.0));
        assert_eq!(device.read_intensities().unwrap(), vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn test_sequence_pattern_exhausts() {
        let mut device = SimulatedSpectrometer::new(2, 400.0, 500.0)
            .with_pattern(SpectrumPattern::sequence([vec![1.0, 2.0], vec![3.0, 4.0]]));
        assert_eq!(device.read_intensities().unwrap(), vec![1.0, 2.0]);
        assert_eq!(device.read_intensities().unwrap(), vec![3.0, 4.0]);
        assert!(matches!(
            device.read_intensities(),
            Err(SpectroError::DeviceReadFailed(_))
        ));
    }

    #[test]
    fn test_cycle_pattern_repeats() {
        let mut device = SimulatedSpectrometer::new(1, 400.0, 400.0)
            .with_pattern(SpectrumPattern::cycle([vec![1.0], vec![2.0]]));
        let values: Vec<f64> = (0..4)
            .map(|_| device.read_intensities().unwrap()[0])
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_emission_lines_scale_with_integration_time() {
        let mut device = SimulatedSpectrometer::with_wavelengths(vec![546.1])
            .with_pattern(SpectrumPattern::EmissionLines {
                baseline: 0.0,
                lines: vec![EmissionLine::new(546.1, 1.0, 10.0)],
            });

        device.apply_integration_time(2_000).unwrap();
        let short = device.read_intensities().unwrap()[0];
        device.apply_integration_time(4_000).unwrap();
        let long = device.read_intensities().unwrap()[0];

        assert!((short - 20.0).abs() < 1e-9);
        assert!((long - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_saturation_clips() {
        let mut device = SimulatedSpectrometer::with_wavelengths(vec![546.1])
            .with_max_intensity(100.0)
            .with_pattern(SpectrumPattern::EmissionLines {
                baseline: 0.0,
                lines: vec![EmissionLine::new(546.1, 1.0, 1_000.0)],
            });
        device.apply_integration_time(10_000).unwrap();
        assert_eq!(device.read_intensities().unwrap()[0], 100.0);
    }

    #[test]
    fn test_fault_injection_and_log() {
        let mut device = SimulatedSpectrometer::new(2, 400.0, 500.0)
            .with_bounds(1000, 10_000)
            .with_pattern(SpectrumPattern::Constant(1.0))
            .reject_integration_time(5000)
            .fail_on_read(2);
        let log = device.log();

        assert!(device.apply_integration_time(2000).is_ok());
        assert!(device.apply_integration_time(5000).is_err());
        assert!(device.apply_integration_time(10_000).is_err());
        assert_eq!(device.integration_time_micros(), 2000);

        assert!(device.read_intensities().is_ok());
        assert!(device.read_intensities().is_err());
        assert!(device.read_intensities().is_ok());

        assert_eq!(log.reads(), 3);
        assert_eq!(log.applied_integration_times(), vec![2000, 5000, 10_000]);
        assert_eq!(log.calls()[0], DeviceCall::ApplyIntegrationTime(2000));
    }

    #[test]
    fn test_noise_stays_bounded() {
        let mut device = SimulatedSpectrometer::new(64, 400.0, 500.0)
            .with_pattern(SpectrumPattern::Constant(100.0))
            .with_noise(5.0);
        for v in device.read_intensities().unwrap() {
            assert!((95.0..=105.0).contains(&v));
        }
    }

    #[test]
    fn test_serial_number_selection() {
        let device = SimulatedSpectrometer::from_serial_number(Some("FLMS12345"));
        assert_eq!(device.serial_number(), "FLMS12345");
        assert_eq!(SimulatedSpectrometer::default().serial_number(), "SIM00001");
    }
}
