//! Byte link to the instrument
//!
//! [`SerialLink`] is the seam between the protocol code and the operating
//! system. The production implementation wraps a `serialport` handle; the
//! simulator implements the same trait in-process.

use super::chip::{ChipFamily, ConfigStep, LineSettings, Parity};
use super::TransportError;
use serde::Serialize;
use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// A bidirectional byte link
pub trait SerialLink: Send {
    /// Write the whole buffer
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read whatever is available within `timeout`
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Drop any received bytes not yet read
    fn discard_input(&mut self) -> Result<(), TransportError>;

    /// Run one chip configuration step
    fn apply(&mut self, step: &ConfigStep) -> Result<(), TransportError>;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Human-readable identity for logs
    fn description(&self) -> String;
}

/// A USB serial port as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsbDeviceInfo {
    pub port_name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl UsbDeviceInfo {
    pub fn chip(&self) -> Option<ChipFamily> {
        ChipFamily::identify(self.vendor_id, self.product_id)
    }

    /// Product or manufacturer name contains one of `tokens`
    pub fn matches_family(&self, tokens: &[String]) -> bool {
        let names = [self.product.as_deref(), self.manufacturer.as_deref()];
        names.into_iter().flatten().any(|name| {
            let name = name.to_ascii_lowercase();
            tokens
                .iter()
                .any(|token| name.contains(&token.to_ascii_lowercase()))
        })
    }

    /// Either a family name match or a known bridge chip
    pub fn is_compatible(&self, tokens: &[String]) -> bool {
        self.matches_family(tokens) || self.chip().is_some()
    }
}

/// Enumerate USB serial ports
pub fn list_usb_ports() -> Result<Vec<UsbDeviceInfo>, TransportError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(info) => Some(UsbDeviceInfo {
                port_name: port.port_name,
                vendor_id: info.vid,
                product_id: info.pid,
                manufacturer: info.manufacturer,
                product: info.product,
                serial_number: info.serial_number,
            }),
            _ => None,
        })
        .collect())
}

/// A discovered port and whether discovery would accept it
#[derive(Debug, Clone, Serialize)]
pub struct PortCandidate {
    pub device: UsbDeviceInfo,
    pub chip: Option<ChipFamily>,
    pub name_match: bool,
    pub compatible: bool,
}

/// Enumerate USB serial ports with their match verdicts
pub fn list_candidates(tokens: &[String]) -> Result<Vec<PortCandidate>, TransportError> {
    Ok(list_usb_ports()?
        .into_iter()
        .map(|device| PortCandidate {
            chip: device.chip(),
            name_match: device.matches_family(tokens),
            compatible: device.is_compatible(tokens),
            device,
        })
        .collect())
}

/// Pick the device to connect to
///
/// A device whose name matches the family wins over one that is only a
/// known bridge chip; otherwise enumeration order decides.
pub fn find_compatible(devices: &[UsbDeviceInfo], tokens: &[String]) -> Option<UsbDeviceInfo> {
    devices
        .iter()
        .find(|d| d.matches_family(tokens))
        .or_else(|| devices.iter().find(|d| d.chip().is_some()))
        .cloned()
}

/// [`SerialLink`] over an OS serial port
pub struct SerialPortLink {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialPortLink {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;

        tracing::debug!(port = %port_name, baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::LinkClosed)
    }

    fn set_line(&mut self, line: &LineSettings) -> Result<(), TransportError> {
        let port = self.port()?;
        port.set_baud_rate(line.baud_rate)?;
        port.set_data_bits(match line.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        })?;
        port.set_parity(match line.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        })?;
        port.set_stop_bits(if line.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        })?;
        port.set_flow_control(FlowControl::None)?;
        Ok(())
    }
}

/// Map an I/O failure to "link gone" when the device has disappeared
fn link_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => TransportError::LinkClosed,
        _ => TransportError::Io(err),
    }
}

impl SerialLink for SerialPortLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(bytes).map_err(link_error)?;
        port.flush().map_err(link_error)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(link_error(e)),
        }
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn apply(&mut self, step: &ConfigStep) -> Result<(), TransportError> {
        match step {
            ConfigStep::Purge => self.port()?.clear(ClearBuffer::All)?,
            ConfigStep::LineCoding(line) => self.set_line(line)?,
            ConfigStep::ModemLines { dtr, rts } => {
                let port = self.port()?;
                port.write_data_terminal_ready(*dtr)?;
                port.write_request_to_send(*rts)?;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!(port = %self.name, "Serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn description(&self) -> String {
        self.name.clone()
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(vid: u16, pid: u16, product: Option<&str>) -> UsbDeviceInfo {
        UsbDeviceInfo {
            port_name: format!("/dev/ttyUSB{vid:x}"),
            vendor_id: vid,
            product_id: pid,
            manufacturer: None,
            product: product.map(String::from),
            serial_number: None,
        }
    }

    fn tokens() -> Vec<String> {
        vec!["EMF".to_string()]
    }

    #[test]
    fn test_family_match_is_case_insensitive() {
        let d = device(0x1234, 0x0001, Some("Deep emf Locator"));
        assert!(d.matches_family(&tokens()));
        assert!(d.is_compatible(&tokens()));
    }

    #[test]
    fn test_chip_only_is_compatible() {
        let d = device(0x10C4, 0xEA60, Some("CP2102 USB to UART"));
        assert!(!d.matches_family(&tokens()));
        assert!(d.is_compatible(&tokens()));
        assert_eq!(d.chip(), Some(ChipFamily::Cp210x));
    }

    #[test]
    fn test_unrelated_device_is_rejected() {
        let d = device(0x046D, 0xC52B, Some("USB Receiver"));
        assert!(!d.is_compatible(&tokens()));
    }

    #[test]
    fn test_name_match_preferred() {
        let devices = vec![
            device(0x1A86, 0x7523, Some("USB Serial")),
            device(0x0403, 0x6001, Some("EMF Sensor")),
        ];
        let picked = find_compatible(&devices, &tokens()).unwrap();
        assert_eq!(picked.vendor_id, 0x0403);
    }

    #[test]
    fn test_no_compatible_device() {
        let devices = vec![device(0x046D, 0xC52B, None)];
        assert!(find_compatible(&devices, &tokens()).is_none());
    }

    #[test]
    fn test_link_error_mapping() {
        let gone = link_error(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(gone, TransportError::LinkClosed));
        let other = link_error(io::Error::from(io::ErrorKind::InvalidData));
        assert!(matches!(other, TransportError::Io(_)));
    }
}
