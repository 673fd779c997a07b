//! # spectrolive: Background Spectrum Acquisition
//!
//! A live-view engine for array spectrometers. A dedicated worker thread
//! repeatedly reads raw samples from the instrument, sums a configurable
//! number of them into a snapshot, and publishes the most recent completed
//! snapshot to a consumer (typically a plotting UI) without ever blocking it
//! on device I/O.
//!
//! ## Architecture
//!
//! - **Backend**: Worker thread, device capability trait, snapshot slot and the
//!   consumer-side [`AcquisitionEngine`] handle
//! - **Processing**: Dark subtraction, relative mode and saturation readout for display
//! - **Config**: Persisted settings and input parsing
//! - **Communication**: Crossbeam channels for commands, acknowledgements and events
//!
//! Integration-time changes interrupt the run in progress: the partial sum is
//! discarded, the device is reconfigured and a fresh run starts, so no
//! published snapshot ever mixes samples taken at different integration times.
//!
//! ## Configuration
//!
//! Settings are stored in the platform-appropriate data directory under
//! `dev.hxyulin.spectrolive`:
//!
//! - **Linux**: `~/.local/share/dev.hxyulin.spectrolive/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.spectrolive/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.spectrolive\`
//!
//! ## Example
//!
//! ```ignore
//! use spectrolive::{AcquisitionEngine, EngineSettings, SimulatedSpectrometer};
//!
//! fn main() -> spectrolive::Result<()> {
//!     let settings = EngineSettings::load_or_default();
//!     let device = SimulatedSpectrometer::from_serial_number(settings.serial_number.as_deref());
//!
//!     let engine = AcquisitionEngine::new(device, settings.acquisition_config()?)?;
//!     engine.start()?;
//!
//!     let snapshot = engine.get_snapshot()?;
//!     if let Some((wl, counts)) = snapshot.peak() {
//!         println!("peak {:.0} counts at {:.1} nm", counts, wl);
//!     }
//!
//!     engine.shutdown()
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod processing;
pub mod types;

// Re-export commonly used types
pub use backend::{AcquisitionEngine, SimulatedSpectrometer, SpectrometerDevice};
pub use config::{EngineSettings, SettingChange};
pub use error::{Result, ResultExt, SpectroError};
pub use processing::{GaussianFit, SaturationReadout, Spectrum, SpectrumProcessor};
pub use types::{AcquisitionConfig, AcquisitionStats, EngineEvent, EngineState, Snapshot};
