//! Backend module for background spectrum acquisition
//!
//! This module handles all spectrometer communication in a separate thread to
//! keep the consumer (typically a UI) responsive. It uses crossbeam channels
//! for commands and events and a single-slot channel for snapshots.
//!
//! # Architecture
//!
//! The worker runs in a separate thread from the consumer:
//!
//! - [`AcquisitionEngine`] - Consumer-side handle: start/stop, reconfiguration, snapshot retrieval
//! - [`WorkerCommand`] - Messages sent from the handle to the worker
//! - [`EngineEvent`](crate::types::EngineEvent) - Notifications sent from the worker to the consumer
//! - [`SnapshotChannel`] - Latest completed run, overwritten by each new one
//!
//! # Components
//!
//! - [`SpectrometerDevice`] - Capability interface the engine needs from an instrument
//! - [`SimulatedSpectrometer`] - Synthetic device for testing without hardware
//! - [`AcquisitionWorker`] - Worker loop that processes commands and accumulates samples
//! - [`Accumulator`] - Zero-initialised element-wise sum of raw samples
//!
//! # Example
//!
//! ```ignore
//! use spectrolive::backend::{AcquisitionEngine, SimulatedSpectrometer};
//! use spectrolive::types::AcquisitionConfig;
//!
//! let device = SimulatedSpectrometer::default().with_realtime(1.0);
//! let engine = AcquisitionEngine::new(device, AcquisitionConfig::new(10_000, 4))?;
//!
//! engine.start()?;
//! let snapshot = engine.get_snapshot()?;
//!
//! // Interrupts the run in progress, reconfigures the device, restarts
//! engine.set_integration_time(20_000)?;
//!
//! // Applies from the next run on
//! engine.set_sample_count(8)?;
//!
//! engine.stop()?;
//! ```

pub mod accumulator;
pub mod device_trait;
pub mod engine;
pub mod simulated;
pub mod snapshot_channel;
pub mod worker;

pub use accumulator::Accumulator;
pub use device_trait::{DeviceStats, SpectrometerDevice};
pub use engine::{AcquisitionEngine, DEFAULT_EVENT_CAPACITY};
pub use simulated::{
    DeviceCall, EmissionLine, SimulatedSpectrometer, SimulationLog, SpectrumPattern,
};
pub use snapshot_channel::{Published, SnapshotChannel};
pub use worker::{AcquisitionWorker, DeviceProfile, EngineShared, WorkerCommand};
