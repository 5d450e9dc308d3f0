//! Fixed-layout encode/decode boundary between typed values and flash
//! payloads.
//!
//! Every persisted type declares its exact on-flash size. Padding and
//! byte order are handled here once, never at call sites.

/// Largest payload any namespace stores.
pub const MAX_RECORD_SIZE: usize = 32;

/// A value with a fixed on-flash layout.
pub trait FixedRecord: Sized {
    /// Exact encoded length in bytes.
    const SIZE: usize;

    /// Write the encoding into `out`, which is exactly `SIZE` bytes long.
    fn encode(&self, out: &mut [u8]);

    /// Decode from exactly `SIZE` bytes. `None` if the content is invalid.
    fn decode(bytes: &[u8]) -> Option<Self>;
}

/// Counters and durations are stored as little-endian words.
impl FixedRecord for u32 {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let word: [u8; 4] = bytes.try_into().ok()?;
        Some(u32::from_le_bytes(word))
    }
}

/// Read a big-endian `u16` at `at`. Caller guarantees the bounds.
pub(crate) fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

/// Read a big-endian `u32` at `at`. Caller guarantees the bounds.
pub(crate) fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
