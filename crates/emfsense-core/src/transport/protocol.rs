//! Command and response framing
//!
//! ## Frame layout
//!
//! ```text
//! host -> device   [0xAA][command][len][payload: len bytes]
//! device -> host   [0xAA][status][payload...]
//! ```
//!
//! Status is OK (0x55), ERROR (0xFF) or DATA (0x10). Multi-byte fields are
//! little-endian. Frames carry no checksum.
//!
//! DATA payload (29 bytes):
//!
//! ```text
//! frequency f64 | real f64 | imaginary f64 | temperature f32 | battery u8
//! ```
//!
//! STATUS payload (11 bytes):
//!
//! ```text
//! fw major u8 | fw minor u8 | serial u32 | battery u8 | temperature f32
//! ```

use super::TransportError;
use crate::signal::RawSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// First byte of every frame
pub const SYNC: u8 = 0xAA;

/// Bytes before the payload in a response
pub const RESPONSE_HEADER_LEN: usize = 2;

/// Size of a DATA payload
pub const DATA_PAYLOAD_LEN: usize = 29;

/// Size of a STATUS payload
pub const STATUS_PAYLOAD_LEN: usize = 11;

/// Host to device command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Status,
    Start,
    Stop,
    PollData,
    SetFrequency,
    Calibrate,
}

impl Command {
    pub fn code(self) -> u8 {
        match self {
            Command::Status => 0x01,
            Command::Start => 0x02,
            Command::Stop => 0x03,
            Command::PollData => 0x04,
            Command::SetFrequency => 0x05,
            Command::Calibrate => 0x06,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Command::Status),
            0x02 => Some(Command::Start),
            0x03 => Some(Command::Stop),
            0x04 => Some(Command::PollData),
            0x05 => Some(Command::SetFrequency),
            0x06 => Some(Command::Calibrate),
            _ => None,
        }
    }
}

/// Response status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Error,
    Data,
}

impl ResponseStatus {
    pub fn code(self) -> u8 {
        match self {
            ResponseStatus::Ok => 0x55,
            ResponseStatus::Error => 0xFF,
            ResponseStatus::Data => 0x10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x55 => Some(ResponseStatus::Ok),
            0xFF => Some(ResponseStatus::Error),
            0x10 => Some(ResponseStatus::Data),
            _ => None,
        }
    }
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: ResponseStatus,
    pub payload: Vec<u8>,
}

impl Response {
    /// First payload byte of an ERROR response, 0 when absent
    pub fn error_code(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }
}

/// Build a command frame
///
/// # Panics
/// If `payload` is longer than 255 bytes. Payloads are built by this crate
/// and never exceed 8 bytes.
pub fn encode_command(command: Command, payload: &[u8]) -> Vec<u8> {
    let len = u8::try_from(payload.len()).expect("command payload exceeds 255 bytes");
    let mut frame = Vec::with_capacity(3 + payload.len());
    frame.push(SYNC);
    frame.push(command.code());
    frame.push(len);
    frame.extend_from_slice(payload);
    frame
}

/// SET_FREQUENCY payload: the frequency as a little-endian f64
pub fn frequency_payload(frequency_hz: f64) -> [u8; 8] {
    frequency_hz.to_le_bytes()
}

/// Split a command frame into its command and payload (device side)
pub fn decode_command(frame: &[u8]) -> Option<(Command, &[u8])> {
    if frame.len() < 3 || frame[0] != SYNC {
        return None;
    }
    let command = Command::from_code(frame[1])?;
    let len = frame[2] as usize;
    let payload = frame.get(3..3 + len)?;
    Some((command, payload))
}

/// Build a response frame (device side)
pub fn encode_response(status: ResponseStatus, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + payload.len());
    frame.push(SYNC);
    frame.push(status.code());
    frame.extend_from_slice(payload);
    frame
}

/// Minimum payload a response of `status` to `command` must carry
pub fn min_payload_len(command: Command, status: ResponseStatus) -> usize {
    match (command, status) {
        (_, ResponseStatus::Data) => DATA_PAYLOAD_LEN,
        (Command::Status, ResponseStatus::Ok) => STATUS_PAYLOAD_LEN,
        _ => 0,
    }
}

/// Total bytes to wait for once the response header has arrived
pub fn expected_frame_len(command: Command, header: &[u8]) -> usize {
    match header.get(1).copied().and_then(ResponseStatus::from_code) {
        Some(status) => RESPONSE_HEADER_LEN + min_payload_len(command, status),
        None => RESPONSE_HEADER_LEN,
    }
}

/// Decode the bytes read in answer to `command`
pub fn decode_response(command: Command, bytes: &[u8]) -> Result<Response, TransportError> {
    let malformed = |reason: String| TransportError::MalformedResponse { command, reason };

    if bytes.len() < RESPONSE_HEADER_LEN {
        return Err(malformed(format!("{} byte(s), header needs 2", bytes.len())));
    }
    if bytes[0] != SYNC {
        return Err(malformed(format!("bad sync byte {:#04x}", bytes[0])));
    }
    let status = ResponseStatus::from_code(bytes[1])
        .ok_or_else(|| malformed(format!("unknown status {:#04x}", bytes[1])))?;

    let payload = &bytes[RESPONSE_HEADER_LEN..];
    let min = min_payload_len(command, status);
    if payload.len() < min {
        return Err(malformed(format!(
            "payload {} byte(s), {:?} needs {}",
            payload.len(),
            status,
            min
        )));
    }

    Ok(Response {
        status,
        payload: payload.to_vec(),
    })
}

/// Device housekeeping reported by the STATUS command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub serial_number: u32,
    pub battery_percent: u8,
    pub temperature_c: f32,
}

impl DeviceStatus {
    pub fn firmware_version(&self) -> String {
        format!("{}.{}", self.firmware_major, self.firmware_minor)
    }

    /// Decode a STATUS payload
    pub fn decode(payload: &[u8]) -> Result<Self, TransportError> {
        if payload.len() < STATUS_PAYLOAD_LEN {
            return Err(TransportError::MalformedResponse {
                command: Command::Status,
                reason: format!(
                    "status payload {} byte(s), needs {}",
                    payload.len(),
                    STATUS_PAYLOAD_LEN
                ),
            });
        }
        Ok(Self {
            firmware_major: payload[0],
            firmware_minor: payload[1],
            serial_number: u32::from_le_bytes(le_array(&payload[2..6])),
            battery_percent: payload[6],
            temperature_c: f32::from_le_bytes(le_array(&payload[7..11])),
        })
    }

    /// Encode as a STATUS payload (device side)
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(STATUS_PAYLOAD_LEN);
        payload.push(self.firmware_major);
        payload.push(self.firmware_minor);
        payload.extend_from_slice(&self.serial_number.to_le_bytes());
        payload.push(self.battery_percent);
        payload.extend_from_slice(&self.temperature_c.to_le_bytes());
        payload
    }
}

/// Decode a DATA payload into a sample stamped with `timestamp`
pub fn decode_sample(
    payload: &[u8],
    timestamp: DateTime<Utc>,
) -> Result<RawSample, TransportError> {
    if payload.len() < DATA_PAYLOAD_LEN {
        return Err(TransportError::MalformedResponse {
            command: Command::PollData,
            reason: format!(
                "data payload {} byte(s), needs {}",
                payload.len(),
                DATA_PAYLOAD_LEN
            ),
        });
    }
    let frequency_hz = f64::from_le_bytes(le_array(&payload[0..8]));
    let real = f64::from_le_bytes(le_array(&payload[8..16]));
    let imaginary = f64::from_le_bytes(le_array(&payload[16..24]));
    let temperature = f32::from_le_bytes(le_array(&payload[24..28]));
    let battery = payload[28];

    Ok(RawSample::new(timestamp, frequency_hz, real, imaginary)
        .with_device_state(Some(battery), Some(temperature)))
}

/// Encode a DATA payload (device side)
pub fn encode_sample(
    frequency_hz: f64,
    real: f64,
    imaginary: f64,
    temperature_c: f32,
    battery_percent: u8,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(DATA_PAYLOAD_LEN);
    payload.extend_from_slice(&frequency_hz.to_le_bytes());
    payload.extend_from_slice(&real.to_le_bytes());
    payload.extend_from_slice(&imaginary.to_le_bytes());
    payload.extend_from_slice(&temperature_c.to_le_bytes());
    payload.push(battery_percent);
    payload
}

/// Copy a slice of known length into an array for `from_le_bytes`
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set_frequency() {
        let frame = encode_command(Command::SetFrequency, &frequency_payload(77_500.0));
        assert_eq!(frame[..3], [0xAA, 0x05, 8]);
        assert_eq!(frame[3..], 77_500.0f64.to_le_bytes());
    }

    #[test]
    fn test_encode_bare_command() {
        assert_eq!(encode_command(Command::PollData, &[]), vec![0xAA, 0x04, 0x00]);
    }

    #[test]
    fn test_decode_command_frame() {
        let frame = encode_command(Command::SetFrequency, &frequency_payload(19_000.0));
        let (command, payload) = decode_command(&frame).unwrap();
        assert_eq!(command, Command::SetFrequency);
        assert_eq!(payload.len(), 8);

        assert!(decode_command(&[0xAA, 0x05, 8, 1, 2]).is_none());
        assert!(decode_command(&[0xAB, 0x01, 0]).is_none());
        assert!(decode_command(&[0xAA, 0x7F, 0]).is_none());
    }

    #[test]
    fn test_decode_ok() {
        let resp = decode_response(Command::Start, &[0xAA, 0x55]).unwrap();
        assert_eq!(resp.status, ResponseStatus::Ok);
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn test_decode_error_code() {
        let resp = decode_response(Command::Start, &[0xAA, 0xFF, 0x07]).unwrap();
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(resp.error_code(), 0x07);
    }

    #[test]
    fn test_short_response_is_malformed() {
        let err = decode_response(Command::Status, &[0xAA]).unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse { .. }));

        // OK to STATUS must carry the 11-byte status block
        let err = decode_response(Command::Status, &[0xAA, 0x55, 1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            TransportError::MalformedResponse {
                command: Command::Status,
                ..
            }
        ));

        let mut short_data = vec![0xAA, 0x10];
        short_data.extend_from_slice(&[0u8; 20]);
        assert!(decode_response(Command::PollData, &short_data).is_err());
    }

    #[test]
    fn test_bad_sync_and_status() {
        assert!(decode_response(Command::Stop, &[0x00, 0x55]).is_err());
        assert!(decode_response(Command::Stop, &[0xAA, 0x42]).is_err());
    }

    #[test]
    fn test_status_payload() {
        let status = DeviceStatus {
            firmware_major: 2,
            firmware_minor: 14,
            serial_number: 0x0102_0304,
            battery_percent: 76,
            temperature_c: 31.5,
        };
        let payload = status.encode();
        assert_eq!(payload.len(), STATUS_PAYLOAD_LEN);
        assert_eq!(payload[2..6], [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(DeviceStatus::decode(&payload).unwrap(), status);
        assert_eq!(status.firmware_version(), "2.14");
    }

    #[test]
    fn test_data_payload_layout() {
        let payload = encode_sample(70_000.0, 120.5, -33.25, 18.5, 91);
        assert_eq!(payload.len(), DATA_PAYLOAD_LEN);
        assert_eq!(payload[28], 91);

        let ts = Utc::now();
        let sample = decode_sample(&payload, ts).unwrap();
        assert_eq!(sample.timestamp, ts);
        assert_eq!(sample.frequency_hz, 70_000.0);
        assert_eq!(sample.real, 120.5);
        assert_eq!(sample.imaginary, -33.25);
        assert_eq!(sample.device_temperature_c, Some(18.5));
        assert_eq!(sample.device_battery_percent, Some(91));
    }

    #[test]
    fn test_expected_frame_len() {
        assert_eq!(expected_frame_len(Command::PollData, &[0xAA, 0x10]), 31);
        assert_eq!(expected_frame_len(Command::PollData, &[0xAA, 0x55]), 2);
        assert_eq!(expected_frame_len(Command::Status, &[0xAA, 0x55]), 13);
        assert_eq!(expected_frame_len(Command::Status, &[0xAA]), 2);
    }
}
