//! Hardware addresses and the roles they play.

use core::fmt;

use crate::config::DEFAULT_SENSOR_MAC;
use crate::storage::codec::FixedRecord;

/// A 6-byte BLE device address in display order
/// (`AA:BB:CC:DD:EE:FF` is `[0xAA, .., 0xFF]`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// All-zero address. Stored as "unset - use the compiled-in default".
    pub const UNSET: MacAddress = MacAddress([0; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_unset(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Returns `fallback` when this address is unset.
    pub fn or(self, fallback: MacAddress) -> MacAddress {
        if self.is_unset() {
            fallback
        } else {
            self
        }
    }

    /// Parse exactly 12 ASCII hex digits (either case), no separators.
    pub fn parse_hex(ascii: &[u8]) -> Option<Self> {
        if ascii.len() != 12 {
            return None;
        }
        let mut octets = [0u8; 6];
        for (i, pair) in ascii.chunks_exact(2).enumerate() {
            octets[i] = (hex_value(pair[0])? << 4) | hex_value(pair[1])?;
        }
        Some(Self(octets))
    }

    /// Least-significant byte first, as the BLE controller expects.
    pub fn to_radio_order(&self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    pub fn from_radio_order(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

/// Two 32-bit words: radio-order address followed by two zero pad bytes.
impl FixedRecord for MacAddress {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        out[..6].copy_from_slice(&self.to_radio_order());
        out[6..8].fill(0);
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        let mut radio = [0u8; 6];
        radio.copy_from_slice(&bytes[..6]);
        Some(Self::from_radio_order(radio))
    }
}

/// What an allow-listed address is used for. Each role owns one key in
/// the MAC allow-list namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacRole {
    /// The sensor node hunted by the central role.
    SensorFilter,
    /// Address the repeater's own radio presents.
    RepeaterIdentity,
    /// Peer counted by packet scan mode.
    ScanTarget,
}

impl MacRole {
    pub const ALL: [MacRole; 3] = [
        MacRole::SensorFilter,
        MacRole::RepeaterIdentity,
        MacRole::ScanTarget,
    ];

    /// Record key inside the MAC allow-list namespace.
    pub const fn key(self) -> u16 {
        match self {
            MacRole::SensorFilter => 1,
            MacRole::RepeaterIdentity => 2,
            MacRole::ScanTarget => 3,
        }
    }

    /// Address used while nothing (or all zeros) is stored.
    pub const fn default_address(self) -> MacAddress {
        match self {
            MacRole::SensorFilter => DEFAULT_SENSOR_MAC,
            // Unset identity keeps the radio's factory address.
            MacRole::RepeaterIdentity => MacAddress::UNSET,
            MacRole::ScanTarget => MacAddress::UNSET,
        }
    }
}
