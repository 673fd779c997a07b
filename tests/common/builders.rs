//! Test data builders for creating test objects

use spectrolive::backend::{SimulatedSpectrometer, SpectrumPattern};
use spectrolive::config::EngineSettings;
use spectrolive::AcquisitionConfig;

/// Wavelength table shared by the small test devices
pub const TEST_WAVELENGTHS: [f64; 3] = [500.0, 600.0, 700.0];

/// Bounds used by the reconfiguration scenarios
pub const TEST_BOUNDS: (u64, u64) = (1000, 100_000);

/// Builder for creating simulated spectrometers
pub struct DeviceBuilder {
    pattern: SpectrumPattern,
    bounds: (u64, u64),
    fail_on_read: Option<usize>,
    rejected: Vec<u64>,
    realtime: f64,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        Self {
            pattern: SpectrumPattern::Constant(1.0),
            bounds: TEST_BOUNDS,
            fail_on_read: None,
            rejected: Vec::new(),
            realtime: 0.0,
        }
    }

    pub fn constant(mut self, value: f64) -> Self {
        self.pattern = SpectrumPattern::Constant(value);
        self
    }

    pub fn sequence(mut self, samples: Vec<Vec<f64>>) -> Self {
        self.pattern = SpectrumPattern::sequence(samples);
        self
    }

    pub fn bounds(mut self, lower: u64, upper: u64) -> Self {
        self.bounds = (lower, upper);
        self
    }

    pub fn fail_on_read(mut self, n: usize) -> Self {
        self.fail_on_read = Some(n);
        self
    }

    pub fn reject(mut self, micros: u64) -> Self {
        self.rejected.push(micros);
        self
    }

    pub fn realtime(mut self, scale: f64) -> Self {
        self.realtime = scale;
        self
    }

    pub fn build(self) -> SimulatedSpectrometer {
        let mut device = SimulatedSpectrometer::with_wavelengths(TEST_WAVELENGTHS.to_vec())
            .with_pattern(self.pattern)
            .with_bounds(self.bounds.0, self.bounds.1)
            .with_realtime(self.realtime);
        if let Some(n) = self.fail_on_read {
            device = device.fail_on_read(n);
        }
        for micros in self.rejected {
            device = device.reject_integration_time(micros);
        }
        device
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquisition configuration shorthand
pub fn config(integration_time_micros: u64, sample_count: u32) -> AcquisitionConfig {
    AcquisitionConfig::new(integration_time_micros, sample_count)
}

/// Settings with the given runtime values and defaults elsewhere
pub fn settings(integration_time_ms: f64, sample_count: u32) -> EngineSettings {
    EngineSettings {
        integration_time_ms,
        sample_count,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectrolive::SpectrometerDevice;

    #[test]
    fn test_device_builder() {
        let mut device = DeviceBuilder::new().bounds(10, 20).constant(3.0).build();
        assert_eq!(device.integration_time_bounds(), (10, 20));
        assert_eq!(device.wavelengths().unwrap(), TEST_WAVELENGTHS.to_vec());
        assert_eq!(device.read_intensities().unwrap(), vec![3.0; 3]);
    }
}
