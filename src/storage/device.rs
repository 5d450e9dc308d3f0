//! The key-addressed flash device the record store sits on.

use super::RecordKey;
use crate::error::Error;

/// Driver-specific fault code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashFault(pub u32);

impl From<FlashFault> for Error {
    fn from(fault: FlashFault) -> Self {
        Error::StorageFault(fault.0)
    }
}

/// A flash region addressed by `(file, key)` pairs rather than offsets.
///
/// Implementations handle page management and wear levelling; the store
/// above only sees whole records.
#[allow(async_fn_in_trait)]
pub trait FlashDevice {
    /// Copy the record stored under `key` into `buf` (truncated to
    /// `buf.len()`) and return its full stored length, or `None` if absent.
    async fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, FlashFault>;

    /// Store `data` under `key`, replacing any previous record.
    async fn program(&mut self, key: RecordKey, data: &[u8]) -> Result<(), FlashFault>;

    /// Remove the record under `key`. Returns whether one existed.
    async fn erase(&mut self, key: RecordKey) -> Result<bool, FlashFault>;

    /// Smallest key in `file` strictly greater than `after`
    /// (or the smallest key at all when `after` is `None`).
    async fn next_key(&mut self, file: u16, after: Option<u16>) -> Result<Option<u16>, FlashFault>;

    /// Reclaim space held by erased or superseded records.
    async fn reclaim(&mut self) -> Result<(), FlashFault>;
}
