//! In-process instrument emulator
//!
//! [`SimulatedInstrument`] speaks the device side of the command protocol
//! over the [`SerialLink`] trait, so the session, poll thread and
//! calibration pipeline run unchanged against it. A [`SimulatorControl`]
//! handle stays with the caller for steering and inspection after the link
//! has been handed to a [`Transport`](super::Transport).

use super::chip::{ChipFamily, ConfigStep};
use super::link::{SerialLink, UsbDeviceInfo};
use super::protocol::{self, Command, DeviceStatus, ResponseStatus};
use super::TransportError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Error code returned for a SET_FREQUENCY with a bad payload
pub const ERR_BAD_PAYLOAD: u8 = 0x02;

/// Port name reported by [`SimulatedInstrument::usb_info`]
pub const SIMULATOR_PORT: &str = "sim://emf0";

#[derive(Debug)]
struct SimState {
    frequency_hz: f64,
    running: bool,
    sequence: u64,
    polls_served: u64,
    drop_after: Option<u64>,
    unplugged: bool,
    muted: bool,
    rejected: Vec<(Command, u8)>,
    fixed_signal: Option<(f64, f64)>,
    status: DeviceStatus,
    applied_steps: Vec<ConfigStep>,
    commands: Vec<Command>,
    outbox: VecDeque<u8>,
}

impl SimState {
    fn new() -> Self {
        Self {
            frequency_hz: crate::signal::CARRIER_FREQUENCIES[0],
            running: false,
            sequence: 0,
            polls_served: 0,
            drop_after: None,
            unplugged: false,
            muted: false,
            rejected: Vec::new(),
            fixed_signal: None,
            status: DeviceStatus {
                firmware_major: 1,
                firmware_minor: 4,
                serial_number: 20_240_017,
                battery_percent: 87,
                temperature_c: 24.5,
            },
            applied_steps: Vec::new(),
            commands: Vec::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Synthetic I/Q for the next sample
    fn next_signal(&mut self) -> (f64, f64) {
        let seq = self.sequence as f64;
        self.sequence += 1;
        if let Some(signal) = self.fixed_signal {
            return signal;
        }
        let magnitude = 400.0 + 150.0 * (seq * 0.3).sin();
        let phase = (35.0 + 5.0 * (seq * 0.7).cos()).to_radians();
        (magnitude * phase.cos(), magnitude * phase.sin())
    }

    fn respond(&mut self, status: ResponseStatus, payload: &[u8]) {
        self.outbox
            .extend(protocol::encode_response(status, payload));
    }

    fn handle(&mut self, command: Command, payload: &[u8]) -> Result<(), TransportError> {
        self.commands.push(command);

        if command == Command::PollData {
            if self.drop_after.is_some_and(|n| self.polls_served >= n) {
                self.unplugged = true;
                return Err(TransportError::LinkClosed);
            }
            self.polls_served += 1;
        }

        if self.muted {
            return Ok(());
        }
        if let Some(&(_, code)) = self.rejected.iter().find(|(c, _)| *c == command) {
            self.respond(ResponseStatus::Error, &[code]);
            return Ok(());
        }

        match command {
            Command::Status => {
                let status = self.status.encode();
                self.respond(ResponseStatus::Ok, &status);
            }
            Command::Start => {
                self.running = true;
                self.respond(ResponseStatus::Ok, &[]);
            }
            Command::Stop => {
                self.running = false;
                self.respond(ResponseStatus::Ok, &[]);
            }
            Command::Calibrate => self.respond(ResponseStatus::Ok, &[]),
            Command::SetFrequency => match <[u8; 8]>::try_from(payload) {
                Ok(bytes) => {
                    self.frequency_hz = f64::from_le_bytes(bytes);
                    self.respond(ResponseStatus::Ok, &[]);
                }
                Err(_) => self.respond(ResponseStatus::Error, &[ERR_BAD_PAYLOAD]),
            },
            Command::PollData if self.running => {
                let (real, imaginary) = self.next_signal();
                let temperature = self.status.temperature_c + 0.01 * self.sequence as f32;
                let data = protocol::encode_sample(
                    self.frequency_hz,
                    real,
                    imaginary,
                    temperature,
                    self.status.battery_percent,
                );
                self.respond(ResponseStatus::Data, &data);
            }
            // Idle device: acknowledged, nothing to report
            Command::PollData => self.respond(ResponseStatus::Ok, &[]),
        }
        Ok(())
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Emulated device end of the link
pub struct SimulatedInstrument {
    state: Arc<Mutex<SimState>>,
    chip: ChipFamily,
    closed: bool,
}

impl SimulatedInstrument {
    /// Emulate a device behind a CH340 bridge
    pub fn new() -> (Self, SimulatorControl) {
        Self::with_chip(ChipFamily::Ch340)
    }

    pub fn with_chip(chip: ChipFamily) -> (Self, SimulatorControl) {
        let state = Arc::new(Mutex::new(SimState::new()));
        let control = SimulatorControl {
            state: Arc::clone(&state),
        };
        (
            Self {
                state,
                chip,
                closed: false,
            },
            control,
        )
    }

    /// Discovery record matching the emulated bridge chip
    pub fn usb_info(&self) -> UsbDeviceInfo {
        let (vendor_id, product_id) = super::chip::SUPPORTED_CHIPS
            .iter()
            .find(|(_, _, family)| *family == self.chip)
            .map(|&(vid, pid, _)| (vid, pid))
            .unwrap_or_default();
        UsbDeviceInfo {
            port_name: SIMULATOR_PORT.to_string(),
            vendor_id,
            product_id,
            manufacturer: Some("emfsense".to_string()),
            product: Some("EMF Simulator".to_string()),
            serial_number: Some(lock(&self.state).status.serial_number.to_string()),
        }
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed || lock(&self.state).unplugged {
            Err(TransportError::LinkClosed)
        } else {
            Ok(())
        }
    }
}

impl SerialLink for SimulatedInstrument {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        match protocol::decode_command(bytes) {
            Some((command, payload)) => state.handle(command, payload),
            None => {
                tracing::trace!(len = bytes.len(), "Simulator ignored unparseable frame");
                Ok(())
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.check_open()?;
        {
            let mut state = lock(&self.state);
            if !state.outbox.is_empty() {
                let n = buf.len().min(state.outbox.len());
                for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        // Nothing queued: behave like a silent serial line
        std::thread::sleep(timeout);
        Ok(0)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.check_open()?;
        lock(&self.state).outbox.clear();
        Ok(())
    }

    fn apply(&mut self, step: &ConfigStep) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = lock(&self.state);
        if *step == ConfigStep::Purge {
            state.outbox.clear();
        }
        state.applied_steps.push(*step);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_open(&self) -> bool {
        self.check_open().is_ok()
    }

    fn description(&self) -> String {
        format!("{SIMULATOR_PORT} ({})", self.chip)
    }
}

/// Caller-side handle to a [`SimulatedInstrument`]
#[derive(Clone)]
pub struct SimulatorControl {
    state: Arc<Mutex<SimState>>,
}

impl SimulatorControl {
    pub fn frequency_hz(&self) -> f64 {
        lock(&self.state).frequency_hz
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// POLL_DATA commands answered so far
    pub fn polls_served(&self) -> u64 {
        lock(&self.state).polls_served
    }

    /// Unplug the device on the first poll after `polls` have been served
    pub fn drop_link_after(&self, polls: u64) {
        lock(&self.state).drop_after = Some(polls);
    }

    /// Unplug the device now
    pub fn unplug(&self) {
        lock(&self.state).unplugged = true;
    }

    /// Stop answering commands (frames are still accepted)
    pub fn set_muted(&self, muted: bool) {
        lock(&self.state).muted = muted;
    }

    /// Answer `command` with ERROR `code` from now on
    pub fn reject(&self, command: Command, code: u8) {
        lock(&self.state).rejected.push((command, code));
    }

    /// Report a constant I/Q pair instead of the synthetic waveform
    pub fn set_fixed_signal(&self, real: f64, imaginary: f64) {
        lock(&self.state).fixed_signal = Some((real, imaginary));
    }

    pub fn set_status(&self, status: DeviceStatus) {
        lock(&self.state).status = status;
    }

    /// Configuration steps applied by the host, in order
    pub fn applied_steps(&self) -> Vec<ConfigStep> {
        lock(&self.state).applied_steps.clone()
    }

    /// Commands received, in order
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state).commands.clone()
    }
}
