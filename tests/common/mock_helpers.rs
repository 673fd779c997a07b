//! Device doubles for driving the engine one read at a time
//!
//! [`SteppedDevice`] blocks inside every `read_intensities` call until the
//! test hands it a permit through the paired [`StepController`]. Each read
//! announces itself on entry, so a test knows exactly which read is in
//! flight when it issues a command.

use crossbeam_channel::{unbounded, Receiver, Sender};
use spectrolive::{Result, SpectroError, SpectrometerDevice};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::test_timeout;

/// A device call as seen by the stepped device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// Read started while the given integration time was applied
    Read { integration_time_micros: u64 },
    /// Integration time applied
    Apply(u64),
}

type CallLog = Arc<Mutex<Vec<Call>>>;

fn record(log: &CallLog, call: Call) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(call);
}

/// Device whose reads complete only when the test allows it
///
/// Every channel of a sample holds the integration time (in microseconds)
/// that was applied when the read started, so a snapshot's values reveal
/// which configuration its samples were taken with.
pub struct SteppedDevice {
    channels: usize,
    bounds: (u64, u64),
    integration_time_micros: u64,
    reads: u64,
    permits: Receiver<()>,
    entered: Sender<u64>,
    calls: CallLog,
}

/// Test-side handle of a [`SteppedDevice`]
pub struct StepController {
    permits: Sender<()>,
    entered: Receiver<u64>,
    calls: CallLog,
}

/// Create a stepped device with `channels` channels and the given bounds
pub fn stepped_device(channels: usize, bounds: (u64, u64)) -> (SteppedDevice, StepController) {
    let (permit_tx, permit_rx) = unbounded();
    let (entered_tx, entered_rx) = unbounded();
    let calls = CallLog::default();

    let device = SteppedDevice {
        channels,
        bounds,
        integration_time_micros: 0,
        reads: 0,
        permits: permit_rx,
        entered: entered_tx,
        calls: calls.clone(),
    };
    let controller = StepController {
        permits: permit_tx,
        entered: entered_rx,
        calls,
    };
    (device, controller)
}

impl SpectrometerDevice for SteppedDevice {
    fn wavelengths(&mut self) -> Result<Vec<f64>> {
        Ok((0..self.channels).map(|i| 400.0 + i as f64).collect())
    }

    fn read_intensities(&mut self) -> Result<Vec<f64>> {
        self.reads += 1;
        record(
            &self.calls,
            Call::Read {
                integration_time_micros: self.integration_time_micros,
            },
        );
        let _ = self.entered.send(self.reads);

        self.permits
            .recv_timeout(test_timeout())
            .map_err(|_| SpectroError::DeviceReadFailed("no permit".to_string()))?;
        Ok(vec![self.integration_time_micros as f64; self.channels])
    }

    fn integration_time_bounds(&self) -> (u64, u64) {
        self.bounds
    }

    fn apply_integration_time(&mut self, micros: u64) -> Result<()> {
        record(&self.calls, Call::Apply(micros));
        self.integration_time_micros = micros;
        Ok(())
    }
}

impl StepController {
    /// Wait until the next read has started; returns its 1-based index
    pub fn wait_for_read(&self) -> u64 {
        self.entered
            .recv_timeout(test_timeout())
            .expect("device read never started")
    }

    /// Let `n` reads complete
    pub fn release(&self, n: usize) {
        for _ in 0..n {
            self.permits.send(()).expect("device dropped");
        }
    }

    /// Wait for the next read and let it complete
    pub fn step(&self) -> u64 {
        let index = self.wait_for_read();
        self.release(1);
        index
    }

    /// Whether no read starts within `window`
    pub fn no_read_within(&self, window: Duration) -> bool {
        self.entered.recv_timeout(window).is_err()
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
