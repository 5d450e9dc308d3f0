//! Bluetooth Low Energy roles.
//!
//! The repeater runs the SoftDevice in both roles at once:
//!
//! 1. **Central** - hunts the sensor node (scan filtered on its MAC),
//!    connects, and exchanges NUS messages with it.
//! 2. **Peripheral** - advertises to the companion app and serves the
//!    Nordic UART Service it sends commands over.
//!
//! The library only sees the [`Radio`] trait; the SoftDevice-backed
//! implementation lives in the firmware binary.

pub mod roles;
pub mod scan_mode;
pub mod sensor;

use crate::mac::MacAddress;

/// SoftDevice connection handle.
pub type LinkHandle = u16;

/// Which side of the repeater a link belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Outbound link to the sensor node.
    CentralHunting,
    /// Inbound link from the companion app.
    PeripheralServing,
}

/// Result of a non-blocking send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    Sent,
    /// Transmit buffer full. Not an error; wait for the ready signal.
    Busy,
    /// No link, or the stack rejected the payload.
    Failed,
}

/// Radio operations the control plane issues. All calls are
/// fire-and-forget; outcomes come back as events.
pub trait Radio {
    /// Scan for and connect to `target`.
    fn start_scan(&mut self, target: MacAddress);

    /// Passive scan reporting advertisements from `target` (packet scan
    /// mode). No connection is attempted.
    fn start_passive_scan(&mut self, target: MacAddress);

    fn stop_scan(&mut self);

    fn start_advertising(&mut self);

    fn stop_advertising(&mut self);

    fn disconnect(&mut self, handle: LinkHandle);

    /// Use `address` as this device's own radio address; `None` goes back
    /// to the factory address. Only called while both roles are idle or
    /// right after the app changed it.
    fn set_identity(&mut self, address: Option<MacAddress>);

    /// Open or close outward-facing I/O (the UART passthrough).
    fn set_io_enabled(&mut self, enabled: bool);

    fn send(&mut self, role: Role, bytes: &[u8]) -> SendStatus;
}
