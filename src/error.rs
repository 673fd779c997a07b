//! Error handling for the spectrolive engine
//!
//! This module defines the error taxonomy shared by the acquisition engine,
//! the device adapters and the settings layer, together with a Result alias.
//!
//! Errors are `Clone` because a failed run is delivered through the same
//! snapshot slot as a successful one, and may be observed by more than one
//! reader (`latest_snapshot` peeks without consuming).

use thiserror::Error;

/// Main error type for spectrolive operations
#[derive(Error, Debug, Clone)]
pub enum SpectroError {
    /// Requested integration time lies outside the device's `[lower, upper)` range
    #[error("Integration time {requested} us rejected: device accepts [{lower}, {upper}) us")]
    ConfigurationRejected {
        requested: u64,
        lower: u64,
        upper: u64,
    },

    /// Malformed parameter (sample count of zero, unparsable input, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A single sample read failed; the run it belonged to was discarded
    #[error("Device read failed: {0}")]
    DeviceReadFailed(String),

    /// The device refused an integration time it reported as within bounds
    #[error("Device rejected integration time {requested} us: {message}")]
    DeviceReconfigureFailed { requested: u64, message: String },

    /// Any other device-side failure
    #[error("Device error: {0}")]
    Device(String),

    /// Two spectra that must share a wavelength table do not
    #[error("Wavelength mismatch: expected {expected} channels, got {actual}")]
    WavelengthMismatch { expected: usize, actual: usize },

    /// Two spectra have the same length but different wavelength tables
    #[error("Wavelength tables differ at channel {channel}")]
    WavelengthTableDiffers { channel: usize },

    /// A Gaussian fit window was degenerate or the fit did not converge
    #[error("Gaussian fit failed: {0}")]
    FitFailed(String),

    /// The worker thread is gone (shut down, panicked or its channel closed)
    #[error("Acquisition worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Errors related to settings loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SpectroError>,
    },
}

impl SpectroError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SpectroError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &SpectroError {
        match self {
            SpectroError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<std::io::Error> for SpectroError {
    fn from(err: std::io::Error) -> Self {
        SpectroError::Io(err.to_string())
    }
}

/// Result type alias for spectrolive operations
pub type Result<T> = std::result::Result<T, SpectroError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
