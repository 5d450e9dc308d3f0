//! Response frames sent back to the companion app:
//! `[0xA5, code, status, payload...]`.

use heapless::Vec;

use super::Rejection;
use crate::config::RESPONSE_MAGIC;
use crate::error::Error;

/// Status byte for success.
pub const STATUS_OK: u8 = 0x00;
/// Status byte for an unknown command code.
pub const STATUS_UNKNOWN_COMMAND: u8 = 0xFE;
/// Code byte used when the code itself could not be read.
pub const CODE_UNREADABLE: u8 = 0xFF;

/// Header plus the largest payload (configuration snapshot).
pub const MAX_RESPONSE_LEN: usize = 48;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    bytes: Vec<u8, MAX_RESPONSE_LEN>,
}

impl Response {
    fn header(code: u8, status: u8) -> Self {
        let mut bytes = Vec::new();
        // Capacity is well above the 3-byte header.
        let _ = bytes.extend_from_slice(&[RESPONSE_MAGIC, code, status]);
        Self { bytes }
    }

    /// Success with `payload`. A payload that does not fit is cut at
    /// [`MAX_RESPONSE_LEN`]; no command produces one.
    pub fn ok(code: u8, payload: &[u8]) -> Self {
        let mut response = Self::header(code, STATUS_OK);
        let room = MAX_RESPONSE_LEN - response.bytes.len();
        let _ = response
            .bytes
            .extend_from_slice(&payload[..payload.len().min(room)]);
        response
    }

    pub fn error(code: u8, error: Error) -> Self {
        Self::header(code, error.status_code())
    }

    pub fn rejected(code: Option<u8>, reason: Rejection) -> Self {
        let status = match reason {
            Rejection::Truncated => Error::InvalidSize.status_code(),
            Rejection::UnknownCode => STATUS_UNKNOWN_COMMAND,
            Rejection::BadPayload => Error::InvalidArgument.status_code(),
        };
        Self::header(code.unwrap_or(CODE_UNREADABLE), status)
    }

    pub fn code(&self) -> u8 {
        self.bytes[1]
    }

    pub fn status(&self) -> u8 {
        self.bytes[2]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[3..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
