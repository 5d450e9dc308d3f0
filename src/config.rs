//! Application-wide constants and compile-time configuration.
//!
//! Timing defaults, protocol constants and flash layout live here so they
//! can be tuned in one place. Values that the companion app may change at
//! runtime are only *defaults*; the live copies are in [`crate::settings`].

use crate::mac::MacAddress;

// Duty cycle

/// Default length of an ACTIVE phase (seconds).
pub const DEFAULT_ON_DURATION_SECS: u32 = 10;

/// Default length of a SLEEPING phase (seconds).
pub const DEFAULT_SLEEP_DURATION_SECS: u32 = 20;

/// Default ACTIVE window while in extended search (seconds).
pub const DEFAULT_EXTENDED_SEARCH_SECS: u32 = 120;

/// SLEEPING window while in extended search (seconds). Not configurable.
pub const EXTENDED_SEARCH_SLEEP_SECS: u32 = 10;

/// Consecutive sensor-less ACTIVE cycles before extended search starts.
pub const MAX_FAILED_CYCLES: u8 = 1;

/// Upper bound accepted for any configurable duration (one day).
pub const MAX_DURATION_SECS: u32 = 86_400;

/// Real-time clock ticks per second delivered to the event loop.
pub const RTC_TICKS_PER_SEC: u8 = 8;

// Addresses

/// Sensor the repeater hunts for when none has been configured.
pub const DEFAULT_SENSOR_MAC: MacAddress = MacAddress::new([0x63, 0x98, 0x41, 0xD3, 0x03, 0xFB]);

/// Whether a central link to a peer other than the sensor is dropped.
pub const DEFAULT_STRICT_MAC_FILTER: bool = false;

// Command protocol

/// ASCII prefix that marks an inbound payload as a command.
pub const COMMAND_SENTINEL: &[u8; 3] = b"111";

/// First byte of every command response frame.
pub const RESPONSE_MAGIC: u8 = 0xA5;

/// Firmware version reported in the configuration snapshot.
pub const FIRMWARE_VERSION: [u8; 3] = [0, 0, 1];

// Bulk transfer

/// Records sent per burst (initial burst and each ready signal).
pub const BULK_BATCH_SIZE: usize = 5;

/// Largest history id list a transfer snapshot can hold.
pub const MAX_HISTORY_RECORDS: usize = 1024;

// Packet scan mode

/// Hard limit on a packet scan session (seconds).
pub const PACKET_SCAN_MAX_SECS: u32 = 300;

/// Silence after the last matching packet that ends a scan (seconds).
pub const PACKET_SCAN_INACTIVITY_SECS: u32 = 30;

// BLE

/// GAP device name advertised to the companion app.
pub const DEVICE_NAME: &str = "BLE-Repeater";

/// Largest NUS payload (ATT MTU 247 minus 3 bytes of header).
pub const NUS_MAX_PAYLOAD: usize = 244;

/// Advertising interval (in 0.625 ms units). 300 = 187.5 ms.
pub const BLE_ADV_INTERVAL: u32 = 300;

/// Scan interval and window (in 0.625 ms units).
pub const BLE_SCAN_INTERVAL: u16 = 160;
pub const BLE_SCAN_WINDOW: u16 = 80;

/// BLE connection interval range (in 1.25 ms units).
pub const BLE_CONN_INTERVAL_MIN: u16 = 16;
pub const BLE_CONN_INTERVAL_MAX: u16 = 32;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

// Record store flash region

/// Flash page index where the record store starts (4 KB per page on nRF52840).
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for the record store.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 16;
