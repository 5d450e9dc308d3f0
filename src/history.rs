//! Append-only telemetry history on top of the record store.
//!
//! Records live in [`Namespace::History`] under key `id + 1` (key 0 is
//! never used). The local append count lives in its own namespace and is
//! advanced only after the record itself is on flash. Relay writes from
//! the sensor (`append_at`) never touch the count.

use heapless::Vec;

use crate::calendar::DateTime;
use crate::config::MAX_HISTORY_RECORDS;
use crate::error::{Error, Result};
use crate::storage::{FixedRecord, FlashDevice, Namespace, RecordStore};

/// Sequence id of a history slot.
pub type SequenceId = u16;

/// Number of measurement channels per snapshot.
pub const CHANNELS: usize = 8;

const RECORD_MAGIC: u16 = 0xA55A;
const COUNT_KEY: u16 = 1;
const SLOT_KEY_BASE: u16 = 1;
/// Attempts at persisting the count after a successful record write.
const COUNT_WRITE_ATTEMPTS: usize = 2;

/// One telemetry snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HistoryRecord {
    pub timestamp: DateTime,
    /// Sensor-side monotonically increasing counter.
    pub counter: u32,
    pub channels: [u16; CHANNELS],
    pub temperature: u8,
    /// Battery charge in percent.
    pub battery: u8,
}

/// Flash layout (little-endian):
///
/// | off | len | field |
/// |-----|-----|-------|
/// | 0   | 2   | magic `0xA55A` |
/// | 2   | 7   | year (2), month, day, hour, minute, second |
/// | 9   | 4   | counter |
/// | 13  | 16  | channels |
/// | 29  | 1   | temperature |
/// | 30  | 1   | battery |
/// | 31  | 1   | origin (see [`Origin`]), 0 when encoded bare |
impl FixedRecord for HistoryRecord {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        out[2..4].copy_from_slice(&self.timestamp.year.to_le_bytes());
        out[4] = self.timestamp.month;
        out[5] = self.timestamp.day;
        out[6] = self.timestamp.hour;
        out[7] = self.timestamp.minute;
        out[8] = self.timestamp.second;
        out[9..13].copy_from_slice(&self.counter.to_le_bytes());
        for (i, value) in self.channels.iter().enumerate() {
            out[13 + i * 2..15 + i * 2].copy_from_slice(&value.to_le_bytes());
        }
        out[29] = self.temperature;
        out[30] = self.battery;
        out[31] = 0;
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE || u16::from_le_bytes([bytes[0], bytes[1]]) != RECORD_MAGIC {
            return None;
        }
        // Sensor clocks may be unset; keep their timestamps as-is.
        let timestamp = DateTime {
            year: u16::from_le_bytes([bytes[2], bytes[3]]),
            month: bytes[4],
            day: bytes[5],
            hour: bytes[6],
            minute: bytes[7],
            second: bytes[8],
        };
        let mut channels = [0u16; CHANNELS];
        for (i, value) in channels.iter_mut().enumerate() {
            *value = u16::from_le_bytes([bytes[13 + i * 2], bytes[14 + i * 2]]);
        }
        Some(Self {
            timestamp,
            counter: u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]),
            channels,
            temperature: bytes[29],
            battery: bytes[30],
        })
    }
}

/// Who chose a slot's id. Only local appends move the count, so only
/// they may be taken as evidence of an interrupted append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Origin {
    Local = 0x01,
    Relay = 0x02,
}

/// A history slot as it sits on flash: the record plus its origin byte.
struct Slot {
    record: HistoryRecord,
    origin: Option<Origin>,
}

impl FixedRecord for Slot {
    const SIZE: usize = HistoryRecord::SIZE;

    fn encode(&self, out: &mut [u8]) {
        self.record.encode(out);
        out[31] = self.origin.map_or(0, |origin| origin as u8);
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let record = HistoryRecord::decode(bytes)?;
        let origin = match bytes[31] {
            0x01 => Some(Origin::Local),
            0x02 => Some(Origin::Relay),
            _ => None,
        };
        Some(Self { record, origin })
    }
}

fn slot_key(id: SequenceId) -> Result<u16> {
    id.checked_add(SLOT_KEY_BASE).ok_or(Error::InvalidArgument)
}

/// Ordered id snapshot, as used by bulk transfer.
pub type IdList = Vec<SequenceId, MAX_HISTORY_RECORDS>;

/// History view borrowing the store for the duration of one operation.
pub struct HistoryLog<'s, F> {
    store: &'s mut RecordStore<F>,
}

impl<'s, F: FlashDevice> HistoryLog<'s, F> {
    pub fn new(store: &'s mut RecordStore<F>) -> Self {
        Self { store }
    }

    /// Persisted local append count (0 when never written).
    pub async fn count(&mut self) -> Result<u32> {
        Ok(self
            .store
            .load::<u32>(Namespace::HistoryCounter, COUNT_KEY)
            .await?
            .unwrap_or(0))
    }

    /// Store `record` at the next local id and advance the count.
    ///
    /// The count only moves once the record is on flash. If the count
    /// cannot be persisted the error is returned, the count stays put and
    /// the next append overwrites the same slot.
    pub async fn append(&mut self, record: &HistoryRecord) -> Result<SequenceId> {
        let count = self.count().await?;
        let id = SequenceId::try_from(count).map_err(|_| Error::InvalidArgument)?;
        self.store_slot(id, record, Origin::Local).await?;

        let next = count + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .store
                .save(Namespace::HistoryCounter, COUNT_KEY, &next)
                .await
            {
                Ok(_) => break,
                Err(e) if attempt < COUNT_WRITE_ATTEMPTS => {
                    warn!("history: count update failed ({}), retrying", e);
                }
                Err(e) => {
                    error!("history: record {} written but count stuck at {}", id, count);
                    return Err(e);
                }
            }
        }
        debug!("history: appended id {}", id);
        Ok(id)
    }

    /// Store a record at an id chosen by the sensor. The local count is
    /// left alone.
    pub async fn append_at(&mut self, record: &HistoryRecord, id: SequenceId) -> Result<()> {
        self.store_slot(id, record, Origin::Relay).await?;
        debug!("history: stored relay record at id {}", id);
        Ok(())
    }

    pub async fn read(&mut self, id: SequenceId) -> Result<HistoryRecord> {
        Ok(self.load_slot(id).await?.record)
    }

    async fn load_slot(&mut self, id: SequenceId) -> Result<Slot> {
        self.store
            .load::<Slot>(Namespace::History, slot_key(id)?)
            .await?
            .ok_or(Error::NotFound)
    }

    async fn store_slot(&mut self, id: SequenceId, record: &HistoryRecord, origin: Origin) -> Result<()> {
        let slot = Slot {
            record: *record,
            origin: Some(origin),
        };
        self.store.save(Namespace::History, slot_key(id)?, &slot).await?;
        Ok(())
    }

    /// Record at `count - 1`.
    pub async fn read_last(&mut self) -> Result<HistoryRecord> {
        let count = self.count().await?;
        if count == 0 {
            return Err(Error::NotFound);
        }
        let id = SequenceId::try_from(count - 1).map_err(|_| Error::CorruptRecord)?;
        self.read(id).await
    }

    /// Remove a slot. Absent slots are not an error. The count is untouched.
    pub async fn delete(&mut self, id: SequenceId) -> Result<()> {
        match self.store.delete(Namespace::History, slot_key(id)?).await {
            Ok(()) | Err(Error::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Erase every record, reset the count to zero and compact.
    pub async fn delete_all(&mut self) -> Result<()> {
        let removed = self.store.erase_namespace(Namespace::History).await?;
        self.store
            .save(Namespace::HistoryCounter, COUNT_KEY, &0u32)
            .await?;
        self.store.compact().await?;
        info!("history: deleted {} records", removed);
        Ok(())
    }

    /// Every stored id in ascending order. Truncated (with a warning) at
    /// [`MAX_HISTORY_RECORDS`].
    pub async fn list_all_ids(&mut self) -> Result<IdList> {
        let mut ids = IdList::new();
        let mut keys = self.store.keys(Namespace::History);
        while let Some(key) = keys.next().await {
            let key = key?;
            if key < SLOT_KEY_BASE {
                continue;
            }
            if ids.push(key - SLOT_KEY_BASE).is_err() {
                warn!("history: more than {} records, snapshot truncated", MAX_HISTORY_RECORDS);
                break;
            }
        }
        Ok(ids)
    }

    /// Repair the count after an append whose count update never landed:
    /// a locally appended record sitting in slot `count` means the count
    /// is one behind. Relay records in that slot say nothing about the
    /// count. Returns the (possibly repaired) count.
    pub async fn check_consistency(&mut self) -> Result<u32> {
        let count = self.count().await?;
        let Ok(id) = SequenceId::try_from(count) else {
            return Ok(count);
        };
        if slot_key(id).is_err() {
            return Ok(count);
        }
        match self.load_slot(id).await {
            Ok(Slot {
                origin: Some(Origin::Local),
                ..
            }) => {}
            Ok(_) | Err(Error::NotFound | Error::CorruptRecord) => return Ok(count),
            Err(e) => return Err(e),
        }
        warn!("history: slot {} occupied but count is {}, repairing", id, count);
        let repaired = count + 1;
        self.store
            .save(Namespace::HistoryCounter, COUNT_KEY, &repaired)
            .await?;
        Ok(repaired)
    }
}
