//! Element-wise accumulation of raw samples
//!
//! The buffer is always zero-initialised to the engine's channel count.

use crate::error::{Result, SpectroError};

/// Running element-wise sum of raw samples for one run
#[derive(Debug, Clone)]
pub struct Accumulator {
    sum: Vec<f64>,
    samples: u32,
}

impl Accumulator {
    /// Create a zeroed accumulator for `channels` wavelength channels
    pub fn new(channels: usize) -> Self {
        Self {
            sum: vec![0.0; channels],
            samples: 0,
        }
    }

    /// Add one raw sample
    ///
    /// A sample of the wrong length is rejected and leaves the sum untouched.
    pub fn add(&mut self, sample: &[f64]) -> Result<()> {
        if sample.len() != self.sum.len() {
            return Err(SpectroError::WavelengthMismatch {
                expected: self.sum.len(),
                actual: sample.len(),
            });
        }
        for (acc, v) in self.sum.iter_mut().zip(sample) {
            *acc += v;
        }
        self.samples = self.samples.saturating_add(1);
        Ok(())
    }

    /// Number of samples added since creation or the last reset
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Current partial sum
    pub fn as_slice(&self) -> &[f64] {
        &self.sum
    }

    /// Zero the buffer and the sample counter
    pub fn reset(&mut self) {
        self.sum.iter_mut().for_each(|v| *v = 0.0);
        self.samples = 0;
    }
}
