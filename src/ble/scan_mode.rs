//! Packet scan mode: a diagnostic passive scan that counts advertisements
//! from one target address.

use crate::config::{PACKET_SCAN_INACTIVITY_SECS, PACKET_SCAN_MAX_SECS};
use crate::error::{Error, Result};
use crate::mac::MacAddress;

/// Why a scan ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanEnd {
    Requested,
    MaxDuration,
    Inactivity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanReport {
    pub end: ScanEnd,
    pub packets: u32,
    pub last_rssi: i8,
    pub elapsed_secs: u32,
}

impl ScanReport {
    pub const LEN: usize = 10;

    /// End reason, packet count (BE), last RSSI, elapsed seconds (BE).
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = match self.end {
            ScanEnd::Requested => 0,
            ScanEnd::MaxDuration => 1,
            ScanEnd::Inactivity => 2,
        };
        out[1..5].copy_from_slice(&self.packets.to_be_bytes());
        out[5] = self.last_rssi as u8;
        out[6..10].copy_from_slice(&self.elapsed_secs.to_be_bytes());
        out
    }
}

#[derive(Debug, Default)]
pub struct PacketScan {
    target: Option<MacAddress>,
    packets: u32,
    last_rssi: i8,
    elapsed_secs: u32,
    silent_secs: u32,
}

impl PacketScan {
    pub const fn new() -> Self {
        Self {
            target: None,
            packets: 0,
            last_rssi: 0,
            elapsed_secs: 0,
            silent_secs: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.target.is_some()
    }

    pub fn start(&mut self, target: MacAddress) -> Result<()> {
        if target.is_unset() {
            warn!("scan: no target configured");
            return Err(Error::InvalidArgument);
        }
        if self.is_running() {
            return Err(Error::AlreadyActive);
        }
        *self = Self {
            target: Some(target),
            ..Self::new()
        };
        info!("scan: counting packets from {}", target.octets());
        Ok(())
    }

    /// Count an advertisement if it comes from the target.
    pub fn on_advertisement(&mut self, peer: MacAddress, rssi: i8) -> bool {
        if self.target != Some(peer) {
            return false;
        }
        self.packets = self.packets.saturating_add(1);
        self.last_rssi = rssi;
        self.silent_secs = 0;
        true
    }

    /// Advance one second. Returns the report if the scan timed out.
    pub fn on_second(&mut self) -> Option<ScanReport> {
        self.target?;
        self.elapsed_secs += 1;
        if self.packets > 0 {
            self.silent_secs += 1;
        }
        if self.elapsed_secs >= PACKET_SCAN_MAX_SECS {
            return self.finish(ScanEnd::MaxDuration);
        }
        if self.packets > 0 && self.silent_secs >= PACKET_SCAN_INACTIVITY_SECS {
            return self.finish(ScanEnd::Inactivity);
        }
        None
    }

    /// Stop on request. `None` if no scan was running.
    pub fn stop(&mut self) -> Option<ScanReport> {
        self.finish(ScanEnd::Requested)
    }

    fn finish(&mut self, end: ScanEnd) -> Option<ScanReport> {
        self.target.take()?;
        let report = ScanReport {
            end,
            packets: self.packets,
            last_rssi: self.last_rssi,
            elapsed_secs: self.elapsed_secs,
        };
        info!(
            "scan: ended ({:?}) after {}s with {} packets",
            end, report.elapsed_secs, report.packets
        );
        Some(report)
    }
}
