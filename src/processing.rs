//! Post-processing of published snapshots for display
//!
//! The engine publishes raw summed counts. A live view usually wants a
//! corrected trace instead:
//!
//! - **Dark subtraction**: remove a stored dark spectrum (detector offset and
//!   thermal background). When a reference is loaded it is dark-corrected too.
//! - **Relative mode**: show `1 - y / reference`, i.e. absorbance-like depth
//!   relative to a stored reference. Channels where the reference is zero
//!   yield non-finite values rather than errors.
//! - **Averaging**: build a dark or reference from several stored spectra,
//!   which must share one wavelength table.
//! - **Saturation readout**: peak counts against the detector full scale.
//! - **Peak marking**: prominence-filtered local maxima of the corrected trace.
//! - **Line fitting**: least-squares Gaussian over a wavelength window, for
//!   reading off a line's center and width.

use crate::error::{Result, SpectroError};
use crate::types::Snapshot;
use std::sync::Arc;

/// A spectrum that is not tied to an engine run (dark, reference, loaded file)
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Wavelength of each channel
    pub wavelengths: Arc<[f64]>,
    /// Intensity of each channel
    pub intensities: Vec<f64>,
}

impl Spectrum {
    /// Create a spectrum, checking both arrays have the same length
    pub fn new(wavelengths: impl Into<Arc<[f64]>>, intensities: Vec<f64>) -> Result<Self> {
        let wavelengths = wavelengths.into();
        if wavelengths.len() != intensities.len() {
            return Err(SpectroError::WavelengthMismatch {
                expected: wavelengths.len(),
                actual: intensities.len(),
            });
        }
        Ok(Self {
            wavelengths,
            intensities,
        })
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    /// Whether the spectrum has no channels
    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }
}

impl From<&Snapshot> for Spectrum {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            wavelengths: snapshot.wavelengths.clone(),
            intensities: snapshot.intensities.to_vec(),
        }
    }
}

fn check_wavelengths(expected: &[f64], actual: &[f64]) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(SpectroError::WavelengthMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    if let Some(channel) = expected.iter().zip(actual).position(|(a, b)| a != b) {
        return Err(SpectroError::WavelengthTableDiffers { channel });
    }
    Ok(())
}

/// Channel-wise mean of several spectra
///
/// All spectra must share the first one's wavelength table.
pub fn average_spectra(spectra: &[Spectrum]) -> Result<Spectrum> {
    let Some(first) = spectra.first() else {
        return Err(SpectroError::InvalidConfiguration(
            "no spectra to average".to_string(),
        ));
    };

    let mut sum = vec![0.0; first.len()];
    for spectrum in spectra {
        check_wavelengths(&first.wavelengths, &spectrum.wavelengths)?;
        for (acc, v) in sum.iter_mut().zip(&spectrum.intensities) {
            *acc += v;
        }
    }

    let n = spectra.len() as f64;
    Spectrum::new(
        first.wavelengths.clone(),
        sum.into_iter().map(|v| v / n).collect(),
    )
}

/// Display trace produced by [`SpectrumProcessor::process`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSpectrum {
    /// Wavelength of each channel
    pub wavelengths: Arc<[f64]>,
    /// Corrected counts, or `1 - y / reference` in relative mode
    pub values: Vec<f64>,
    /// Dark-corrected reference to overlay (absent in relative mode)
    pub reference: Option<Vec<f64>>,
    /// Whether `values` are relative
    pub relative: bool,
}

impl ProcessedSpectrum {
    /// Peaks of the displayed trace, see [`find_peaks`]
    pub fn peaks(&self, min_prominence: f64) -> Vec<(f64, f64)> {
        find_peaks(&self.wavelengths, &self.values, min_prominence)
    }
}

/// Dark and reference corrections applied to each snapshot
#[derive(Debug, Clone, Default)]
pub struct SpectrumProcessor {
    dark: Option<Spectrum>,
    reference: Option<Spectrum>,
    subtract_dark: bool,
    relative: bool,
}

impl SpectrumProcessor {
    /// Create a processor with no corrections
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a dark spectrum (subtraction stays off until enabled)
    pub fn set_dark(&mut self, dark: Spectrum) {
        self.dark = Some(dark);
    }

    /// Forget the dark spectrum and disable subtraction
    pub fn clear_dark(&mut self) {
        self.dark = None;
        self.subtract_dark = false;
    }

    /// Load a reference spectrum (relative mode stays off until enabled)
    pub fn set_reference(&mut self, reference: Spectrum) {
        self.reference = Some(reference);
    }

    /// Forget the reference and disable relative mode
    pub fn clear_reference(&mut self) {
        self.reference = None;
        self.relative = false;
    }

    /// Enable or disable dark subtraction; enabling requires a loaded dark
    pub fn set_subtract_dark(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.dark.is_none() {
            return Err(SpectroError::InvalidConfiguration(
                "no dark spectrum loaded".to_string(),
            ));
        }
        self.subtract_dark = enabled;
        Ok(())
    }

    /// Enable or disable relative mode; enabling requires a loaded reference
    pub fn set_relative(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.reference.is_none() {
            return Err(SpectroError::InvalidConfiguration(
                "no reference spectrum loaded".to_string(),
            ));
        }
        self.relative = enabled;
        Ok(())
    }

    /// Whether a dark spectrum is loaded
    pub fn has_dark(&self) -> bool {
        self.dark.is_some()
    }

    /// Whether a reference spectrum is loaded
    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Apply the enabled corrections to a snapshot
    pub fn process(&self, snapshot: &Snapshot) -> Result<ProcessedSpectrum> {
        let mut values = snapshot.intensities.to_vec();
        let mut reference = match &self.reference {
            Some(reference) => {
                check_wavelengths(&snapshot.wavelengths, &reference.wavelengths)?;
                Some(reference.intensities.clone())
            }
            None => None,
        };

        if self.subtract_dark {
            if let Some(dark) = &self.dark {
                check_wavelengths(&snapshot.wavelengths, &dark.wavelengths)?;
                subtract_in_place(&mut values, &dark.intensities);
                if let Some(reference) = reference.as_mut() {
                    subtract_in_place(reference, &dark.intensities);
                }
            }
        }

        if self.relative {
            if let Some(reference) = reference {
                let relative = values
                    .iter()
                    .zip(&reference)
                    .map(|(y, r)| 1.0 - y / r)
                    .collect();
                return Ok(ProcessedSpectrum {
                    wavelengths: snapshot.wavelengths.clone(),
                    values: relative,
                    reference: None,
                    relative: true,
                });
            }
        }

        Ok(ProcessedSpectrum {
            wavelengths: snapshot.wavelengths.clone(),
            values,
            reference,
            relative: false,
        })
    }
}

fn subtract_in_place(values: &mut [f64], dark: &[f64]) {
    for (v, d) in values.iter_mut().zip(dark) {
        *v -= d;
    }
}

/// Prominence threshold for live peak marking: the trace mean, capped at 1000
pub fn default_prominence(values: &[f64]) -> f64 {
    const CAP: f64 = 1000.0;
    if values.is_empty() {
        return CAP;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    mean.min(CAP)
}

/// Local maxima of `values` whose prominence is at least `min_prominence`
///
/// Returns `(wavelength, value)` pairs in channel order. A flat plateau is
/// reported once, at its middle sample. The first and last channels are never
/// peaks.
pub fn find_peaks(wavelengths: &[f64], values: &[f64], min_prominence: f64) -> Vec<(f64, f64)> {
    local_maxima(values)
        .into_iter()
        .filter(|&peak| prominence(values, peak) >= min_prominence)
        .filter_map(|peak| Some((*wavelengths.get(peak)?, values[peak])))
        .collect()
}

fn local_maxima(values: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if values.len() < 3 {
        return peaks;
    }

    let last = values.len() - 1;
    let mut i = 1;
    while i < last {
        if values[i - 1] < values[i] {
            let mut ahead = i + 1;
            while ahead < last && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of `peak` above the higher of its two bases
///
/// Each base is the lowest sample between the peak and the nearest strictly
/// higher sample on that side (or the edge of the trace).
fn prominence(values: &[f64], peak: usize) -> f64 {
    let height = values[peak];
    let left = lowest_until_higher(values[..peak].iter().rev(), height);
    let right = lowest_until_higher(values[peak + 1..].iter(), height);
    height - left.max(right)
}

fn lowest_until_higher<'a>(side: impl Iterator<Item = &'a f64>, height: f64) -> f64 {
    side.take_while(|&&v| v <= height)
        .fold(height, |lowest, &v| lowest.min(v))
}

/// Gaussian `amplitude * exp(-(x - center)^2 / (2 sigma^2))` from [`fit_gaussian`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    /// Peak height
    pub amplitude: f64,
    /// Line center in nm
    pub center: f64,
    /// Standard deviation in nm, always positive
    pub sigma: f64,
}

impl GaussianFit {
    /// Value of the fitted curve at `x`
    pub fn evaluate(&self, x: f64) -> f64 {
        gaussian([self.amplitude, self.center, self.sigma], x)
    }

    /// Full width at half maximum in nm
    pub fn fwhm(&self) -> f64 {
        2.0 * (2.0 * std::f64::consts::LN_2).sqrt() * self.sigma
    }
}

const FIT_MAX_ITERATIONS: usize = 200;
const FIT_TOLERANCE: f64 = 1e-12;
const FIT_MAX_DAMPING: f64 = 1e12;

fn gaussian([amplitude, center, sigma]: [f64; 3], x: f64) -> f64 {
    let z = (x - center) / sigma;
    amplitude * (-0.5 * z * z).exp()
}

/// Least-squares Gaussian fit to the samples with `lo < x < hi`
///
/// Starts from the window's intensity-weighted moments (negative values weigh
/// nothing) and refines them with Levenberg-Marquardt. Fails with
/// [`SpectroError::FitFailed`] when the window holds fewer than three samples,
/// has no positive signal or no spread, or when the fit diverges.
pub fn fit_gaussian(
    wavelengths: &[f64],
    values: &[f64],
    window: (f64, f64),
) -> Result<GaussianFit> {
    let (lo, hi) = window;
    let (xs, ys): (Vec<f64>, Vec<f64>) = wavelengths
        .iter()
        .zip(values)
        .filter(|(x, y)| **x > lo && **x < hi && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .unzip();
    if xs.len() < 3 {
        return Err(SpectroError::FitFailed(format!(
            "{} samples in ({}, {}) nm, need at least 3",
            xs.len(),
            lo,
            hi
        )));
    }

    let problem = GaussianProblem { xs, ys };
    let mut params = problem.initial_guess()?;
    let mut cost = problem.cost(params);
    let mut damping = 1e-3;

    for _ in 0..FIT_MAX_ITERATIONS {
        let Some((trial, trial_cost)) = problem.step(params, cost, &mut damping) else {
            break;
        };
        let converged = cost - trial_cost <= FIT_TOLERANCE * cost;
        params = trial;
        cost = trial_cost;
        if converged {
            break;
        }
    }

    let [amplitude, center, sigma] = params;
    let sigma = sigma.abs();
    if !(amplitude.is_finite() && center.is_finite() && sigma.is_finite()) || sigma == 0.0 {
        return Err(SpectroError::FitFailed("fit diverged".to_string()));
    }
    Ok(GaussianFit {
        amplitude,
        center,
        sigma,
    })
}

struct GaussianProblem {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl GaussianProblem {
    fn initial_guess(&self) -> Result<[f64; 3]> {
        let amplitude = self.ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights = || self.xs.iter().zip(&self.ys).map(|(&x, &y)| (x, y.max(0.0)));

        let total: f64 = weights().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(SpectroError::FitFailed(
                "no positive signal in window".to_string(),
            ));
        }
        let center = weights().map(|(x, w)| w * x).sum::<f64>() / total;
        let variance = weights()
            .map(|(x, w)| w * (x - center) * (x - center))
            .sum::<f64>()
            / total;
        if variance <= 0.0 || !variance.is_finite() {
            return Err(SpectroError::FitFailed(
                "signal has no spread in window".to_string(),
            ));
        }
        Ok([amplitude, center, variance.sqrt()])
    }

    fn cost(&self, params: [f64; 3]) -> f64 {
        self.xs
            .iter()
            .zip(&self.ys)
            .map(|(&x, &y)| {
                let r = y - gaussian(params, x);
                r * r
            })
            .sum()
    }

    /// `J^T J` and `J^T r` for the residuals at `params`
    fn normal_equations(&self, params: [f64; 3]) -> ([[f64; 3]; 3], [f64; 3]) {
        let [amplitude, center, sigma] = params;
        let mut jtj = [[0.0; 3]; 3];
        let mut jtr = [0.0; 3];

        for (&x, &y) in self.xs.iter().zip(&self.ys) {
            let z = (x - center) / sigma;
            let e = (-0.5 * z * z).exp();
            let grad = [e, amplitude * e * z / sigma, amplitude * e * z * z / sigma];
            let r = y - amplitude * e;
            for (row, gi) in jtj.iter_mut().zip(grad) {
                for (cell, gj) in row.iter_mut().zip(grad) {
                    *cell += gi * gj;
                }
            }
            for (acc, g) in jtr.iter_mut().zip(grad) {
                *acc += g * r;
            }
        }
        (jtj, jtr)
    }

    /// One damped step that lowers the cost, raising the damping until it does
    ///
    /// `None` once the damping saturates without improvement.
    fn step(&self, params: [f64; 3], cost: f64, damping: &mut f64) -> Option<([f64; 3], f64)> {
        let (jtj, jtr) = self.normal_equations(params);

        while *damping < FIT_MAX_DAMPING {
            let mut lhs = jtj;
            for (k, row) in lhs.iter_mut().enumerate() {
                row[k] += *damping * jtj[k][k].max(f64::MIN_POSITIVE);
            }

            if let Some(delta) = solve3(lhs, jtr) {
                let trial = [
                    params[0] + delta[0],
                    params[1] + delta[1],
                    params[2] + delta[2],
                ];
                let trial_cost = self.cost(trial);
                if trial_cost.is_finite() && trial_cost <= cost {
                    *damping = (*damping / 10.0).max(1e-12);
                    return Some((trial, trial_cost));
                }
            }
            *damping *= 10.0;
        }
        None
    }
}

fn determinant(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Cramer's rule; `None` for a singular system
fn solve3(m: [[f64; 3]; 3], b: [f64; 3]) -> Option<[f64; 3]> {
    let det = determinant(m);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let mut x = [0.0; 3];
    for (col, out) in x.iter_mut().enumerate() {
        let mut replaced = m;
        for (row, value) in replaced.iter_mut().zip(b) {
            row[col] = value;
        }
        *out = determinant(replaced) / det;
    }
    Some(x)
}

/// Peak counts of a snapshot against the detector full scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaturationReadout {
    /// Highest summed count in the snapshot
    pub peak_counts: f64,
    /// Highest count per raw sample (summed peak / sample count)
    pub per_sample_peak: f64,
    /// Detector full scale of one raw sample
    pub max_intensity: f64,
}

impl SaturationReadout {
    /// Compute the readout for a snapshot
    pub fn from_snapshot(snapshot: &Snapshot, max_intensity: f64) -> Self {
        let peak_counts = snapshot
            .intensities
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let peak_counts = if peak_counts.is_finite() { peak_counts } else { 0.0 };
        Self {
            peak_counts,
            per_sample_peak: peak_counts / f64::from(snapshot.sample_count.max(1)),
            max_intensity,
        }
    }

    /// Whether any raw sample reached full scale
    pub fn is_saturated(&self) -> bool {
        self.per_sample_peak >= self.max_intensity
    }

    /// Short label for a status line
    pub fn label(&self) -> String {
        format!("Max: {:.0}/{:.0}", self.peak_counts, self.max_intensity)
    }
}
