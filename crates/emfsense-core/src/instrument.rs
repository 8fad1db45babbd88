//! Instrument facade
//!
//! Owns the transport, the signal engine and the calibration store, and
//! wires them into one pipeline:
//!
//! ```text
//! poll thread ──RawSample──▶ pipeline thread ──CalibratedReading──▶ subscribers
//!                            (engine + calibration)
//! ```
//!
//! The reading channel outlives individual acquisitions, so a subscriber
//! taken before `start_measurement` keeps receiving across start/stop cycles.

use crate::calibration::{
    AutobalanceCalibration, AutobalanceRun, CalibratedReading, CalibrationError, CalibrationKind,
    CalibrationStatus, CalibrationStore,
};
use crate::codec::{self, CodecError, FileFormat, Point3};
use crate::config::InstrumentConfig;
use crate::signal::{RawSample, Reading, SignalEngine};
use crate::transport::{
    DeviceSession, DeviceStatus, SerialLink, SimulatedInstrument, SimulatorControl, Transport,
    TransportError, UsbDeviceInfo,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to spawn pipeline thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// State shared with the pipeline thread
struct SharedState {
    engine: Mutex<SignalEngine>,
    calibration: Arc<CalibrationStore>,
    position: RwLock<Point3>,
    autobalance: Mutex<Option<AutobalanceRun>>,
    readings: broadcast::Sender<CalibratedReading>,
    /// Raw samples skipped because the pipeline fell behind
    dropped: AtomicU64,
    published: AtomicU64,
}

impl SharedState {
    fn position(&self) -> Point3 {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn process(&self, sample: RawSample) {
        let reading = self
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process_continuous(sample);

        // Baseline is the mean of unsmoothed readings
        self.feed_autobalance(reading.raw_magnitude);

        let calibrated = self.calibration.calibrate(&reading, self.position());
        self.published.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine
        let _ = self.readings.send(calibrated);
    }

    fn feed_autobalance(&self, signal: f64) {
        let mut run = self.autobalance.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = run.as_mut() else {
            return;
        };
        if !active.push(signal) {
            return;
        }
        match active.finish() {
            Ok(calibration) => {
                tracing::info!(
                    baseline = calibration.baseline,
                    samples = active.collected(),
                    "Autobalance complete"
                );
                self.calibration.set_autobalance(calibration);
            }
            Err(e) => tracing::warn!(error = %e, "Autobalance failed"),
        }
        *run = None;
    }
}

fn run_pipeline(shared: Arc<SharedState>, mut samples: broadcast::Receiver<RawSample>) {
    tracing::debug!("Pipeline started");
    loop {
        match samples.blocking_recv() {
            Ok(sample) => shared.process(sample),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Pipeline lagging, dropped raw samples");
                shared.dropped.fetch_add(skipped, Ordering::Relaxed);
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("Pipeline exited");
}

/// One connected (or connectable) instrument
///
/// Dropping the instrument stops measurement and disconnects.
pub struct Instrument {
    config: InstrumentConfig,
    transport: Transport,
    shared: Arc<SharedState>,
    pipeline: Option<JoinHandle<()>>,
}

impl Instrument {
    pub fn new(config: InstrumentConfig) -> Self {
        let calibration = Arc::new(CalibrationStore::new(config.calibration.clone()));
        let (readings, _) = broadcast::channel(config.transport.stream_capacity.max(1));
        let shared = Arc::new(SharedState {
            engine: Mutex::new(SignalEngine::new(&config.signal)),
            calibration,
            position: RwLock::new(Point3::ORIGIN),
            autobalance: Mutex::new(None),
            readings,
            dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
        });
        Self {
            transport: Transport::new(config.transport.clone()),
            config,
            shared,
            pipeline: None,
        }
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // Connection

    /// Connect to the configured port, or discover one
    pub fn connect(&mut self) -> Result<UsbDeviceInfo, InstrumentError> {
        let Some(port) = self.config.port.clone() else {
            return Ok(self.transport.connect()?);
        };
        let candidate = self
            .transport
            .list_ports()?
            .into_iter()
            .find(|c| c.device.port_name == port)
            .ok_or(TransportError::NoCompatibleDevice)?;
        self.transport.connect_device(&candidate.device)?;
        Ok(candidate.device)
    }

    /// Use an already-open link
    pub fn attach(
        &mut self,
        link: Box<dyn SerialLink>,
        info: &UsbDeviceInfo,
    ) -> Result<(), InstrumentError> {
        self.disconnect();
        self.transport.attach(link, info)?;
        Ok(())
    }

    /// Attach the in-process simulator
    pub fn attach_simulator(&mut self) -> Result<SimulatorControl, InstrumentError> {
        let (sim, control) = SimulatedInstrument::new();
        let info = sim.usb_info();
        self.attach(Box::new(sim), &info)?;
        Ok(control)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn session(&self) -> DeviceSession {
        self.transport.session()
    }

    pub fn device_status(&self) -> Result<DeviceStatus, InstrumentError> {
        Ok(self.transport.status()?)
    }

    /// Stop measurement and release the link. Idempotent.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        self.stop_pipeline();
    }

    // Measurement

    /// Select a carrier, start the device and the pipeline; returns the
    /// carrier frequency in Hz
    pub fn start_measurement(&mut self, frequency_index: usize) -> Result<f64, InstrumentError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        if self.is_measuring() {
            self.stop_measurement()?;
        }
        self.stop_pipeline();

        let frequency_hz = self.transport.set_frequency(frequency_index)?;
        self.shared
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();

        self.transport.start_acquisition()?;
        let samples = self
            .transport
            .subscribe()
            .ok_or(TransportError::NotConnected)?;

        let shared = Arc::clone(&self.shared);
        let pipeline = std::thread::Builder::new()
            .name("emf-pipeline".into())
            .spawn(move || run_pipeline(shared, samples));
        match pipeline {
            Ok(handle) => self.pipeline = Some(handle),
            Err(e) => {
                let _ = self.transport.stop_acquisition();
                return Err(e.into());
            }
        }

        tracing::info!(frequency_hz, "Measurement started");
        Ok(frequency_hz)
    }

    /// Stop acquisition and wait for the pipeline to drain
    pub fn stop_measurement(&mut self) -> Result<(), InstrumentError> {
        let result = self.transport.stop_acquisition();
        if self.stop_pipeline() {
            tracing::info!("Measurement stopped");
        }
        result.map_err(Into::into)
    }

    /// True while the pipeline is running and the device is polled
    pub fn is_measuring(&self) -> bool {
        self.transport.is_acquiring() && self.pipeline.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Subscribe to calibrated readings
    pub fn sample_stream(&self) -> broadcast::Receiver<CalibratedReading> {
        self.shared.readings.subscribe()
    }

    /// Raw samples lost to pipeline lag since creation
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Calibrated readings published since creation
    pub fn published_readings(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    /// Surveyed position applied to subsequent live readings
    pub fn set_position(&self, position: Point3) {
        *self
            .shared
            .position
            .write()
            .unwrap_or_else(PoisonError::into_inner) = position;
    }

    pub fn position(&self) -> Point3 {
        self.shared.position()
    }

    fn stop_pipeline(&mut self) -> bool {
        let Some(handle) = self.pipeline.take() else {
            return false;
        };
        // The pipeline ends once the poll thread drops its sender
        if handle.join().is_err() {
            tracing::error!("Pipeline thread panicked");
        }
        true
    }

    // Calibration

    pub fn calibration_store(&self) -> &Arc<CalibrationStore> {
        &self.shared.calibration
    }

    pub fn load_calibration(
        &self,
        kind: CalibrationKind,
        path: &Path,
    ) -> Result<(), InstrumentError> {
        self.shared.calibration.load_calibration(kind, path)?;
        Ok(())
    }

    pub fn reset_calibration(&self, kind: CalibrationKind) {
        self.shared.calibration.reset(kind);
    }

    pub fn reset_all_calibration(&self) {
        self.shared.calibration.reset_all();
        *self
            .shared
            .autobalance
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn calibration_status(&self) -> BTreeMap<CalibrationKind, CalibrationStatus> {
        self.shared.calibration.status()
    }

    /// Run the device's internal calibration, then autobalance on the next
    /// readings
    pub fn calibrate_device(&self) -> Result<(), InstrumentError> {
        self.transport.calibrate()?;
        self.begin_autobalance();
        Ok(())
    }

    /// Collect the next live readings into a new autobalance baseline
    pub fn begin_autobalance(&self) {
        let required = self.config.calibration.autobalance_samples;
        *self
            .shared
            .autobalance
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(AutobalanceRun::new(required));
        tracing::info!(required, "Autobalance started");
    }

    /// (collected, required) of a running autobalance
    pub fn autobalance_progress(&self) -> Option<(usize, usize)> {
        self.shared
            .autobalance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|run| (run.collected(), run.required()))
    }

    /// End an autobalance run early
    ///
    /// Fails with `InsufficientSamples` if fewer readings than required were
    /// collected; the run is discarded either way. With no run in progress
    /// the current state is returned.
    pub fn finish_autobalance(&self) -> Result<AutobalanceCalibration, InstrumentError> {
        let run = self
            .shared
            .autobalance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(run) = run else {
            let current = *self.shared.calibration.autobalance();
            if current.is_calibrated() {
                return Ok(current);
            }
            return Err(CalibrationError::InsufficientSamples {
                required: self.config.calibration.autobalance_samples,
                available: 0,
            }
            .into());
        };
        let calibration = run.finish()?;
        self.shared.calibration.set_autobalance(calibration);
        Ok(calibration)
    }

    /// Calibrate a file-derived reading taken at `observed`
    pub fn calibrate_reading(&self, reading: &Reading, observed: Point3) -> CalibratedReading {
        self.shared.calibration.calibrate(reading, observed)
    }

    // Files

    /// Parse a survey file into readings
    pub fn parse_file(
        &self,
        path: &Path,
        format: Option<FileFormat>,
    ) -> Result<Vec<Reading>, InstrumentError> {
        let samples = codec::parse_file(path, format)?.samples()?;
        let engine = self.shared.engine.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(samples
            .into_iter()
            .map(|sample| engine.process_single(sample))
            .collect())
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self::new(InstrumentConfig::default())
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        self.disconnect();
    }
}
