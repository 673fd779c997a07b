//! Configuration module for spectrolive
//!
//! This module handles persisted engine settings:
//! - Which spectrometer to open and how to drive it
//! - Conversion from user-facing units (milliseconds) to engine units
//! - Parsing of free-text input fields
//! - Explicit diffs between two settings snapshots, applied to a live engine
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.hxyulin.spectrolive/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.spectrolive/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.spectrolive\`
//!
//! # Files
//!
//! - `settings.json` - Engine settings
//! - `logs/` - Daily rolling log files written by the binary
//!
//! # Example
//!
//! ```ignore
//! use spectrolive::config::{EngineSettings, parse_integration_time_ms};
//!
//! let old = EngineSettings::load_or_default();
//! let mut new = old.clone();
//!
//! if let Some(micros) = parse_integration_time_ms("25")? {
//!     new.integration_time_ms = micros as f64 / 1000.0;
//! }
//!
//! for change in EngineSettings::diff(&old, &new)? {
//!     change.apply(&engine)?;
//! }
//! new.save()?;
//! ```

use crate::backend::engine::{AcquisitionEngine, DEFAULT_EVENT_CAPACITY};
use crate::backend::simulated::DEFAULT_MAX_INTENSITY;
use crate::error::{Result, SpectroError};
use crate::types::AcquisitionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.spectrolive";

/// Settings filename
pub const SETTINGS_FILE: &str = "settings.json";

/// Log directory name inside the app data directory
pub const LOG_DIR: &str = "logs";

/// Default integration time in milliseconds
pub const DEFAULT_INTEGRATION_TIME_MS: f64 = 100.0;

/// Default tracing filter directive
pub const DEFAULT_LOG_FILTER: &str = "info,spectrolive=debug";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        SpectroError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            SpectroError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the settings file
pub fn settings_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(SETTINGS_FILE))
}

// ==================== Engine Settings ====================

/// Persistent engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Version for future migration support
    #[serde(default = "default_settings_version")]
    pub version: u32,

    /// Serial number of the spectrometer to open (None = first found)
    #[serde(default)]
    pub serial_number: Option<String>,

    /// Integration time in milliseconds
    #[serde(default = "default_integration_time_ms")]
    pub integration_time_ms: f64,

    /// Raw samples summed per snapshot
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,

    /// Detector full scale of one raw sample, for the saturation readout
    #[serde(default = "default_max_intensity")]
    pub max_intensity: f64,

    /// Capacity of the engine event queue
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// `tracing` filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_settings_version() -> u32 {
    1
}

fn default_integration_time_ms() -> f64 {
    DEFAULT_INTEGRATION_TIME_MS
}

fn default_sample_count() -> u32 {
    1
}

fn default_max_intensity() -> f64 {
    DEFAULT_MAX_INTENSITY
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: 1,
            serial_number: None,
            integration_time_ms: DEFAULT_INTEGRATION_TIME_MS,
            sample_count: 1,
            max_intensity: DEFAULT_MAX_INTENSITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl EngineSettings {
    /// Load settings from the default location
    ///
    /// A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = settings_path().ok_or_else(|| {
            SpectroError::Config("Could not determine settings path".to_string())
        })?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load settings, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load settings from an explicit file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpectroError::Config(format!("Failed to read settings {:?}: {}", path, e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            SpectroError::Config(format!("Failed to parse settings {:?}: {}", path, e))
        })
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(SETTINGS_FILE))
    }

    /// Save settings to an explicit file, creating parent directories
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SpectroError::Config(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SpectroError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            SpectroError::Config(format!("Failed to write settings {:?}: {}", path, e))
        })
    }

    /// Integration time in microseconds
    pub fn integration_time_micros(&self) -> Result<u64> {
        ms_to_micros(self.integration_time_ms)
    }

    /// Engine configuration described by these settings
    pub fn acquisition_config(&self) -> Result<AcquisitionConfig> {
        let config = AcquisitionConfig::new(self.integration_time_micros()?, self.sample_count);
        config.validate()?;
        Ok(config)
    }

    /// Changes needed to move a live engine from `old` to `new`
    ///
    /// Only settings the engine can change at runtime are reported. The
    /// sample count comes first so the run restarted by an integration-time
    /// change already uses the new count.
    pub fn diff(old: &Self, new: &Self) -> Result<Vec<SettingChange>> {
        let mut changes = Vec::new();

        if old.sample_count != new.sample_count {
            changes.push(SettingChange::SampleCount(new.sample_count));
        }

        let old_micros = old.integration_time_micros()?;
        let new_micros = new.integration_time_micros()?;
        if old_micros != new_micros {
            changes.push(SettingChange::IntegrationTime(new_micros));
        }

        Ok(changes)
    }
}

/// A runtime-applicable settings change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    /// New integration time in microseconds
    IntegrationTime(u64),
    /// New number of samples per snapshot
    SampleCount(u32),
}

impl SettingChange {
    /// Apply the change to a live engine
    pub fn apply(&self, engine: &AcquisitionEngine) -> Result<()> {
        match *self {
            SettingChange::IntegrationTime(micros) => engine.set_integration_time(micros),
            SettingChange::SampleCount(count) => engine.set_sample_count(count),
        }
    }
}

impl std::fmt::Display for SettingChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingChange::IntegrationTime(micros) => {
                write!(f, "integration time -> {} us", micros)
            }
            SettingChange::SampleCount(count) => write!(f, "sample count -> {}", count),
        }
    }
}

// ==================== Input Parsing ====================

fn ms_to_micros(ms: f64) -> Result<u64> {
    if !ms.is_finite() || ms <= 0.0 {
        return Err(SpectroError::InvalidConfiguration(format!(
            "integration time must be a positive number of milliseconds, got {}",
            ms
        )));
    }
    let micros = (ms * 1000.0).round();
    if micros < 1.0 || micros > u64::MAX as f64 {
        return Err(SpectroError::InvalidConfiguration(format!(
            "integration time {} ms out of range",
            ms
        )));
    }
    Ok(micros as u64)
}

/// Parse an integration time typed in milliseconds
///
/// Blank input means "no change" and yields `Ok(None)`. The result is in
/// microseconds; device bounds are checked later by the engine.
pub fn parse_integration_time_ms(input: &str) -> Result<Option<u64>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let ms: f64 = input.parse().map_err(|_| {
        SpectroError::InvalidConfiguration(format!("'{}' is not a number of milliseconds", input))
    })?;
    ms_to_micros(ms).map(Some)
}

/// Parse a sample count
///
/// Blank input means "no change" and yields `Ok(None)`.
pub fn parse_sample_count(input: &str) -> Result<Option<u32>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let count: u32 = input.parse().map_err(|_| {
        SpectroError::InvalidConfiguration(format!("'{}' is not a sample count", input))
    })?;
    crate::types::validate_sample_count(count)?;
    Ok(Some(count))
}

// ==================== Tests ====================
