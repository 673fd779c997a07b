//! spectrolive - Main Entry Point
//!
//! Headless live view against the simulated spectrometer: streams snapshots,
//! logs each one's peak and saturation, then walks through a live
//! integration-time change and a sample-count change, fits the strongest
//! line of the last snapshot and shuts down.

use anyhow::Context;
use spectrolive::{
    backend::SimulatedSpectrometer,
    config::{self, EngineSettings},
    processing::{default_prominence, find_peaks, fit_gaussian},
    types::EngineEvent,
    AcquisitionEngine, SaturationReadout, SettingChange, Snapshot,
};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Snapshots to log in each phase of the demo
const SNAPSHOTS_PER_PHASE: usize = 5;

/// Longest wait for one snapshot before giving up
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Half width of the window fitted around the strongest line, in nm
const FIT_HALF_WINDOW_NM: f64 = 3.0;

fn init_logging(settings: &EngineSettings) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));

    // File logging is best effort; stdout always works
    let (file_layer, guard) = match config::ensure_app_data_dir() {
        Ok(dir) => {
            let appender =
                tracing_appender::rolling::daily(dir.join(config::LOG_DIR), "spectrolive.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn log_snapshots(
    engine: &AcquisitionEngine,
    max_intensity: f64,
    count: usize,
) -> anyhow::Result<()> {
    for _ in 0..count {
        let snapshot = engine
            .wait_snapshot(SNAPSHOT_TIMEOUT)
            .context("Waiting for snapshot")?;
        let readout = SaturationReadout::from_snapshot(&snapshot, max_intensity);

        match snapshot.peak() {
            Some((wavelength, counts)) => tracing::info!(
                "#{} [{} x {} us] peak {:.0} at {:.2} nm, {}{}",
                snapshot.sequence,
                snapshot.sample_count,
                snapshot.integration_time_micros,
                counts,
                wavelength,
                readout.label(),
                if readout.is_saturated() { " (saturated)" } else { "" }
            ),
            None => tracing::warn!("#{} is empty", snapshot.sequence),
        }

        let peaks = find_peaks(
            &snapshot.wavelengths,
            &snapshot.intensities,
            default_prominence(&snapshot.intensities),
        );
        tracing::debug!("#{} peaks (nm, counts): {:?}", snapshot.sequence, peaks);
    }

    for event in engine.drain_events() {
        match event {
            EngineEvent::SnapshotReady { .. } => {}
            EngineEvent::RunFailed(e) | EngineEvent::ReconfigureFailed(e) => {
                tracing::error!("{}", e)
            }
            other => tracing::debug!("Event: {:?}", other),
        }
    }

    Ok(())
}

fn log_line_fit(snapshot: &Snapshot) {
    let Some((wavelength, _)) = snapshot.peak() else {
        return;
    };
    let window = (wavelength - FIT_HALF_WINDOW_NM, wavelength + FIT_HALF_WINDOW_NM);

    match fit_gaussian(&snapshot.wavelengths, &snapshot.intensities, window) {
        Ok(fit) => tracing::info!(
            "Strongest line: center {:.2} nm, FWHM {:.2} nm, amplitude {:.0}",
            fit.center,
            fit.fwhm(),
            fit.amplitude
        ),
        Err(e) => tracing::warn!("{}", e),
    }
}

fn apply_settings(
    engine: &AcquisitionEngine,
    old: &EngineSettings,
    new: &EngineSettings,
) -> anyhow::Result<()> {
    for change in EngineSettings::diff(old, new)? {
        tracing::info!("Applying {}", change);
        change.apply(engine)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let settings = EngineSettings::load_or_default();
    let _guard = init_logging(&settings);

    tracing::info!("Starting spectrolive");

    let device = SimulatedSpectrometer::from_serial_number(settings.serial_number.as_deref())
        .with_max_intensity(settings.max_intensity)
        .with_noise(25.0)
        .with_realtime(1.0);
    tracing::info!("Opened simulated spectrometer {}", device.serial_number());

    let engine = AcquisitionEngine::with_event_capacity(
        device,
        settings.acquisition_config()?,
        settings.event_capacity,
    )
    .context("Starting acquisition engine")?;

    let (lower, upper) = engine.integration_time_bounds();
    tracing::info!(
        "{} channels, integration time [{}, {}) us",
        engine.wavelengths().len(),
        lower,
        upper
    );

    engine.start()?;
    log_snapshots(&engine, settings.max_intensity, SNAPSHOTS_PER_PHASE)?;

    // Halve the integration time while sampling
    let mut faster = settings.clone();
    faster.integration_time_ms = settings.integration_time_ms / 2.0;
    apply_settings(&engine, &settings, &faster)?;
    log_snapshots(&engine, settings.max_intensity, SNAPSHOTS_PER_PHASE)?;

    // Sum more samples per snapshot; the run in progress finishes with the old count
    SettingChange::SampleCount(faster.sample_count.saturating_mul(4)).apply(&engine)?;
    log_snapshots(&engine, settings.max_intensity, SNAPSHOTS_PER_PHASE)?;

    if let Some(Ok(snapshot)) = engine.latest_snapshot() {
        log_line_fit(&snapshot);
    }

    engine.stop()?;

    let stats = engine.stats();
    tracing::info!(
        "{} runs completed, {} cancelled, {} failed, {} samples, avg read {:.1} us",
        stats.completed_runs,
        stats.cancelled_runs,
        stats.failed_runs,
        stats.samples_read,
        stats.avg_read_time_us
    );

    tracing::info!("Shutting down...");
    engine.shutdown()?;

    Ok(())
}
