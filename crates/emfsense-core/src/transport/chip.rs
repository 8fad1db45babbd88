//! USB-serial bridge chips and their configuration recipes
//!
//! The instrument ships with one of three bridge chips. Each needs a
//! slightly different bring-up before the 115200 8N1 link is usable; the
//! recipe for each is a short list of [`ConfigStep`]s run against the link
//! right after it is opened. Chips outside the table get no recipe and are
//! used as-is.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported (vendor id, product id, family) triples
pub const SUPPORTED_CHIPS: [(u16, u16, ChipFamily); 3] = [
    (0x1A86, 0x7523, ChipFamily::Ch340),
    (0x10C4, 0xEA60, ChipFamily::Cp210x),
    (0x0403, 0x6001, ChipFamily::Ftdi),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipFamily {
    /// WCH CH340
    Ch340,
    /// Silicon Labs CP210x
    Cp210x,
    /// FTDI FT232R
    Ftdi,
}

impl ChipFamily {
    /// Look up the chip family for a vendor/product id pair
    pub fn identify(vendor_id: u16, product_id: u16) -> Option<Self> {
        SUPPORTED_CHIPS
            .iter()
            .find(|(vid, pid, _)| *vid == vendor_id && *pid == product_id)
            .map(|&(_, _, family)| family)
    }

    /// Bring-up sequence for this chip
    pub fn configuration(self, line: LineSettings) -> Vec<ConfigStep> {
        match self {
            // CH340 needs the line coding before the handshake lines are
            // raised, otherwise the first bytes come out at the wrong rate
            ChipFamily::Ch340 => vec![
                ConfigStep::Purge,
                ConfigStep::LineCoding(line),
                ConfigStep::ModemLines {
                    dtr: true,
                    rts: true,
                },
            ],
            // CP210x interface must be enabled (DTR) before it accepts
            // line settings
            ChipFamily::Cp210x => vec![
                ConfigStep::ModemLines {
                    dtr: true,
                    rts: false,
                },
                ConfigStep::LineCoding(line),
                ConfigStep::Purge,
            ],
            // FTDI: reset, drop handshake lines, program line, flush
            ChipFamily::Ftdi => vec![
                ConfigStep::Purge,
                ConfigStep::ModemLines {
                    dtr: false,
                    rts: false,
                },
                ConfigStep::LineCoding(line),
                ConfigStep::Purge,
            ],
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipFamily::Ch340 => "CH340",
            ChipFamily::Cp210x => "CP210x",
            ChipFamily::Ftdi => "FTDI",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial line coding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for LineSettings {
    /// 115200 baud, 8N1
    fn default() -> Self {
        Self {
            baud_rate: crate::DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

/// One step of a chip bring-up recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    /// Discard anything buffered in either direction
    Purge,
    /// Program baud rate, data bits, parity and stop bits
    LineCoding(LineSettings),
    /// Drive the DTR and RTS handshake lines
    ModemLines { dtr: bool, rts: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_supported_chips() {
        assert_eq!(ChipFamily::identify(0x1A86, 0x7523), Some(ChipFamily::Ch340));
        assert_eq!(ChipFamily::identify(0x10C4, 0xEA60), Some(ChipFamily::Cp210x));
        assert_eq!(ChipFamily::identify(0x0403, 0x6001), Some(ChipFamily::Ftdi));
        assert_eq!(ChipFamily::identify(0x0403, 0x6015), None);
    }

    #[test]
    fn test_every_recipe_sets_8n1() {
        let line = LineSettings::default();
        for (_, _, family) in SUPPORTED_CHIPS {
            let steps = family.configuration(line);
            assert!(
                steps.contains(&ConfigStep::LineCoding(line)),
                "{family} recipe must program the line"
            );
        }
        assert_eq!(line.baud_rate, 115_200);
        assert_eq!(line.data_bits, 8);
        assert_eq!(line.parity, Parity::None);
        assert_eq!(line.stop_bits, 1);
    }

    #[test]
    fn test_recipes_are_distinct() {
        let line = LineSettings::default();
        let ch340 = ChipFamily::Ch340.configuration(line);
        let cp210x = ChipFamily::Cp210x.configuration(line);
        let ftdi = ChipFamily::Ftdi.configuration(line);
        assert_ne!(ch340, cp210x);
        assert_ne!(cp210x, ftdi);
        assert_ne!(ch340, ftdi);
    }
}
