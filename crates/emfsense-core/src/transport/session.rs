//! Device session and the request/response channel

use super::chip::ChipFamily;
use super::link::{self, PortCandidate, SerialLink, SerialPortLink, UsbDeviceInfo};
use super::poller::PollerHandle;
use super::protocol::{self, Command, DeviceStatus, Response, ResponseStatus};
use super::{TransportConfig, TransportError};
use crate::signal::{depth::carrier_frequency, RawSample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Connection bookkeeping for the attached instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceSession {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub port_name: Option<String>,
    pub chip: Option<ChipFamily>,
    pub is_connected: bool,
    pub last_communication: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl DeviceSession {
    fn connected(info: &UsbDeviceInfo) -> Self {
        Self {
            vendor_id: Some(info.vendor_id),
            product_id: Some(info.product_id),
            port_name: Some(info.port_name.clone()),
            chip: info.chip(),
            is_connected: true,
            last_communication: None,
            error_count: 0,
            last_error: None,
        }
    }

    /// Back to disconnected / no port; counters survive for diagnostics
    fn mark_disconnected(&mut self) {
        self.is_connected = false;
        self.port_name = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Link plus session, shared between the API and the poll thread
///
/// The link mutex is the in-flight-command lock: one frame exchange at a
/// time. It is always taken before the session mutex.
pub(crate) struct SessionChannel {
    link: Mutex<Option<Box<dyn SerialLink>>>,
    session: Mutex<DeviceSession>,
}

impl SessionChannel {
    pub(crate) fn new() -> Self {
        Self {
            link: Mutex::new(None),
            session: Mutex::new(DeviceSession::default()),
        }
    }

    pub(crate) fn session(&self) -> DeviceSession {
        lock(&self.session).clone()
    }

    pub(crate) fn record_error(&self, err: &TransportError) {
        let mut session = lock(&self.session);
        session.error_count += 1;
        session.last_error = Some(err.to_string());
    }

    /// Write one command and read its response
    pub(crate) fn exchange(
        &self,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let mut guard = lock(&self.link);
        let result = match guard.as_mut() {
            Some(link) => round_trip(link.as_mut(), command, payload, timeout),
            None => return Err(TransportError::NotConnected),
        };

        let mut session = lock(&self.session);
        match &result {
            Ok(_) => session.last_communication = Some(Utc::now()),
            Err(e) => {
                session.error_count += 1;
                session.last_error = Some(e.to_string());
                if e.is_fatal() {
                    if let Some(mut link) = guard.take() {
                        link.close();
                    }
                    session.mark_disconnected();
                    tracing::warn!(?command, error = %e, "Device link lost");
                }
            }
        }
        result
    }

    pub(crate) fn install(&self, link: Box<dyn SerialLink>, info: &UsbDeviceInfo) {
        let mut guard = lock(&self.link);
        if let Some(mut old) = guard.replace(link) {
            old.close();
        }
        *lock(&self.session) = DeviceSession::connected(info);
    }

    /// Close the link. Returns false if nothing was open.
    fn close(&self) -> bool {
        let mut guard = lock(&self.link);
        let was_open = match guard.take() {
            Some(mut link) => {
                link.close();
                true
            }
            None => false,
        };
        lock(&self.session).mark_disconnected();
        was_open
    }
}

fn round_trip(
    link: &mut dyn SerialLink,
    command: Command,
    payload: &[u8],
    timeout: Duration,
) -> Result<Response, TransportError> {
    let frame = protocol::encode_command(command, payload);
    // A reply that arrived after an earlier timeout must not answer this command
    link.discard_input()?;
    tracing::trace!(?command, bytes = ?frame, "TX");
    link.write_all(&frame)?;

    let deadline = Instant::now() + timeout;
    let mut received =
        Vec::with_capacity(protocol::RESPONSE_HEADER_LEN + protocol::DATA_PAYLOAD_LEN);
    let mut chunk = [0u8; 64];
    loop {
        if received.len() >= protocol::expected_frame_len(command, &received) {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let n = link.read(&mut chunk, deadline - now)?;
        received.extend_from_slice(&chunk[..n]);
    }

    if received.is_empty() {
        return Err(TransportError::NoResponse {
            command,
            timeout_ms: timeout.as_millis() as u64,
        });
    }
    let frame_len = protocol::expected_frame_len(command, &received);
    if received.len() > frame_len {
        tracing::debug!(
            ?command,
            extra = received.len() - frame_len,
            "Discarding bytes past the response frame"
        );
        received.truncate(frame_len);
    }
    tracing::trace!(?command, bytes = ?received, "RX");

    let response = protocol::decode_response(command, &received)?;
    if response.status == ResponseStatus::Error {
        return Err(TransportError::DeviceRejected {
            command,
            code: response.error_code(),
        });
    }
    Ok(response)
}

/// Connection to one instrument
///
/// Owns the session channel and, while acquiring, the poll thread.
/// Dropping the transport disconnects.
pub struct Transport {
    config: TransportConfig,
    channel: Arc<SessionChannel>,
    poller: Option<PollerHandle>,
    samples: Option<broadcast::Receiver<RawSample>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            channel: Arc::new(SessionChannel::new()),
            poller: None,
            samples: None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// All USB serial ports with their match verdicts
    pub fn list_ports(&self) -> Result<Vec<PortCandidate>, TransportError> {
        link::list_candidates(&self.config.family_tokens)
    }

    /// Discover a compatible device and connect to it
    pub fn connect(&mut self) -> Result<UsbDeviceInfo, TransportError> {
        let devices = link::list_usb_ports()?;
        let info = link::find_compatible(&devices, &self.config.family_tokens)
            .ok_or(TransportError::NoCompatibleDevice)?;
        self.connect_device(&info)?;
        Ok(info)
    }

    /// Open a specific port
    pub fn connect_device(&mut self, info: &UsbDeviceInfo) -> Result<(), TransportError> {
        let link = SerialPortLink::open(
            &info.port_name,
            self.config.baud_rate,
            self.config.command_timeout(),
        )?;
        self.attach(Box::new(link), info)
    }

    /// Configure an already-open link for its chip and make it current
    pub fn attach(
        &mut self,
        mut link: Box<dyn SerialLink>,
        info: &UsbDeviceInfo,
    ) -> Result<(), TransportError> {
        self.disconnect();

        match info.chip() {
            Some(chip) => {
                for step in chip.configuration(self.config.line_settings()) {
                    link.apply(&step)?;
                }
                tracing::debug!(%chip, "Chip configured");
            }
            None => tracing::warn!(
                vendor_id = info.vendor_id,
                product_id = info.product_id,
                "Unknown bridge chip, skipping configuration"
            ),
        }

        tracing::info!(
            port = %info.port_name,
            link = %link.description(),
            "Device connected"
        );
        self.channel.install(link, info);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.channel.session().is_connected
    }

    pub fn session(&self) -> DeviceSession {
        self.channel.session()
    }

    /// Query firmware, battery and temperature
    pub fn status(&self) -> Result<DeviceStatus, TransportError> {
        let response = self.command(Command::Status, &[])?;
        DeviceStatus::decode(&response.payload)
    }

    /// Select carrier frequency `index` (0-6); returns the frequency in Hz
    pub fn set_frequency(&self, index: usize) -> Result<f64, TransportError> {
        let frequency_hz =
            carrier_frequency(index).ok_or(TransportError::InvalidFrequencyIndex(index))?;
        self.command(Command::SetFrequency, &protocol::frequency_payload(frequency_hz))?;
        tracing::info!(frequency_hz, "Carrier frequency set");
        Ok(frequency_hz)
    }

    /// Run the device's internal calibration routine
    pub fn calibrate(&self) -> Result<(), TransportError> {
        self.command(Command::Calibrate, &[])?;
        Ok(())
    }

    /// Send START and spawn the poll thread
    pub fn start_acquisition(&mut self) -> Result<(), TransportError> {
        if self.is_acquiring() {
            return Ok(());
        }
        self.poller = None;

        self.command(Command::Start, &[])?;

        let (tx, rx) = broadcast::channel(self.config.stream_capacity.max(1));
        let poller = PollerHandle::spawn(
            Arc::clone(&self.channel),
            tx,
            self.config.poll_interval(),
            self.config.poll_timeout(),
        )?;
        self.poller = Some(poller);
        self.samples = Some(rx);
        tracing::info!(
            interval_ms = self.config.poll_interval_ms,
            "Acquisition started"
        );
        Ok(())
    }

    /// Stop the poll thread, then send STOP
    pub fn stop_acquisition(&mut self) -> Result<(), TransportError> {
        let was_polling = self.stop_poller();
        if was_polling {
            tracing::info!("Acquisition stopped");
        }
        if self.is_connected() {
            self.command(Command::Stop, &[])?;
        }
        Ok(())
    }

    /// New receiver on the current acquisition's sample stream
    pub fn subscribe(&self) -> Option<broadcast::Receiver<RawSample>> {
        self.samples.as_ref().map(|rx| rx.resubscribe())
    }

    pub fn is_acquiring(&self) -> bool {
        self.poller.as_ref().is_some_and(PollerHandle::is_alive)
    }

    /// Poll ticks of the current acquisition
    pub fn poll_ticks(&self) -> u64 {
        self.poller.as_ref().map(PollerHandle::ticks).unwrap_or(0)
    }

    /// Stop acquisition and release the link. Idempotent.
    pub fn disconnect(&mut self) {
        self.stop_poller();
        if self.is_connected() {
            if let Err(e) = self.command(Command::Stop, &[]) {
                tracing::debug!(error = %e, "STOP during disconnect failed");
            }
        }
        if self.channel.close() {
            tracing::info!("Device disconnected");
        }
    }

    fn stop_poller(&mut self) -> bool {
        self.samples = None;
        match self.poller.take() {
            Some(mut poller) => {
                poller.stop();
                true
            }
            None => false,
        }
    }

    fn command(&self, command: Command, payload: &[u8]) -> Result<Response, TransportError> {
        self.channel
            .exchange(command, payload, self.config.command_timeout())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
