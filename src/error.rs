//! Unified error type for the repeater.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

use core::fmt;

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Record store
    /// No record exists under the requested key.
    NotFound,

    /// `write` was called for a key that already holds a record.
    AlreadyExists,

    /// Payload length does not match the namespace's record size.
    InvalidSize,

    /// A stored payload could not be decoded.
    CorruptRecord,

    /// The flash driver reported a fault (driver-specific code).
    StorageFault(u32),

    // Links
    /// The link's transmit buffer is full; retry on the next ready signal.
    LinkBusy,

    /// The link rejected a send for a reason other than back-pressure.
    LinkError,

    // Sessions
    /// A bulk transfer or packet scan is already running.
    AlreadyActive,

    /// The session was cancelled before it finished.
    Cancelled,

    // Commands
    /// A command payload was well-formed but semantically invalid.
    InvalidArgument,

    // Scheduler
    /// A wake alarm could not be armed. Fatal: the device must restart.
    TimerArm,
}

impl Error {
    /// One-byte status carried in command response frames. `0` is success.
    pub const fn status_code(self) -> u8 {
        match self {
            Error::NotFound => 0x01,
            Error::AlreadyExists => 0x02,
            Error::InvalidSize => 0x03,
            Error::CorruptRecord => 0x04,
            Error::StorageFault(_) => 0x05,
            Error::LinkBusy => 0x06,
            Error::LinkError => 0x07,
            Error::AlreadyActive => 0x08,
            Error::Cancelled => 0x09,
            Error::InvalidArgument => 0x0A,
            Error::TimerArm => 0x0B,
        }
    }

    /// Only a failed alarm leaves the device without a safe state.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Error::TimerArm)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => f.write_str("record not found"),
            Error::AlreadyExists => f.write_str("record already exists"),
            Error::InvalidSize => f.write_str("payload size does not match record layout"),
            Error::CorruptRecord => f.write_str("stored record is corrupt"),
            Error::StorageFault(code) => write!(f, "storage fault (code {})", code),
            Error::LinkBusy => f.write_str("link busy"),
            Error::LinkError => f.write_str("link error"),
            Error::AlreadyActive => f.write_str("session already active"),
            Error::Cancelled => f.write_str("session cancelled"),
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::TimerArm => f.write_str("failed to arm alarm"),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
