//! Record store backend on the nRF52840's internal flash.
//!
//! Uses the `sequential-storage` key-value map over the SoftDevice flash
//! driver. Each record is one map item keyed by [`RecordKey::packed`];
//! `sequential-storage` takes care of page rotation, wear levelling and
//! garbage collection.
//!
//! The map cannot be walked in key order, so a sorted RAM index of live
//! keys is built once at mount and kept in step with every program and
//! erase. `next_key` answers from the index alone.

use core::ops::Range;

use ble_repeater::config::{MAX_HISTORY_RECORDS, STORAGE_FLASH_PAGE_COUNT, STORAGE_FLASH_PAGE_START};
use ble_repeater::storage::{FlashDevice, FlashFault, RecordKey, MAX_RECORD_SIZE};
use defmt::{error, info, warn};
use embedded_storage_async::nor_flash::MultiwriteNorFlash;
use heapless::Vec;
use sequential_storage::cache::NoCache;
use sequential_storage::map;

/// Flash page size for nRF52840 (4 KB).
const FLASH_PAGE_SIZE: u32 = 4096;

/// Start address of our storage region.
const STORAGE_START: u32 = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;

/// End address (exclusive) of our storage region.
const STORAGE_END: u32 = (STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// History slots plus the handful of settings, MAC, clock and counter keys.
const KEY_INDEX_CAPACITY: usize = MAX_HISTORY_RECORDS + 32;

/// Item header, key and the largest record, rounded up to word size.
const DATA_BUFFER_LEN: usize = 64;

// Fault codes reported through `FlashFault`.
const FAULT_STORAGE: u32 = 0x01;
const FAULT_FULL: u32 = 0xF0;
const FAULT_CORRUPTED: u32 = 0xF1;
const FAULT_INDEX_FULL: u32 = 0xF2;
const FAULT_OTHER: u32 = 0xFF;

/// The one place flash faults are logged; `RecordStore` passes them on
/// without logging again.
fn fault<E: core::fmt::Debug>(op: &str, key: u32, e: sequential_storage::Error<E>) -> FlashFault {
    error!("Flash {} {:#x} failed: {:?}", op, key, defmt::Debug2Format(&e));
    FlashFault(match e {
        sequential_storage::Error::Storage { .. } => FAULT_STORAGE,
        sequential_storage::Error::FullStorage => FAULT_FULL,
        sequential_storage::Error::Corrupted { .. } => FAULT_CORRUPTED,
        _ => FAULT_OTHER,
    })
}

pub struct SequentialFlash<S> {
    flash: S,
    range: Range<u32>,
    cache: NoCache,
    buffer: [u8; DATA_BUFFER_LEN],
    /// Packed keys of every live record, ascending.
    index: Vec<u32, KEY_INDEX_CAPACITY>,
}

impl<S: MultiwriteNorFlash> SequentialFlash<S> {
    /// Take over the storage region and index its contents. An unreadable
    /// region mounts empty; records written afterwards are still indexed.
    pub async fn mount(flash: S) -> Self {
        let mut this = Self {
            flash,
            range: STORAGE_START..STORAGE_END,
            cache: NoCache::new(),
            buffer: [0; DATA_BUFFER_LEN],
            index: Vec::new(),
        };
        match this.rebuild_index().await {
            Ok(()) => info!("Flash mounted - {} records", this.index.len()),
            Err(_) => warn!("Flash index incomplete - starting from {} records", this.index.len()),
        }
        this
    }

    async fn rebuild_index(&mut self) -> Result<(), FlashFault> {
        let Self {
            flash,
            range,
            cache,
            buffer,
            index,
        } = self;
        index.clear();

        let mut items = map::fetch_all_items::<u32, _, _>(flash, range.clone(), cache, buffer)
            .await
            .map_err(|e| fault("scan", 0, e))?;
        let mut item = [0u8; DATA_BUFFER_LEN];
        // Superseded copies of a key show up more than once.
        while let Some((key, _)) = items
            .next::<&[u8]>(&mut item)
            .await
            .map_err(|e| fault("scan", 0, e))? {
            if let Err(at) = index.binary_search(&key) {
                if index.insert(at, key).is_err() {
                    warn!("Flash index full - ignoring remaining records");
                    return Err(FlashFault(FAULT_INDEX_FULL));
                }
            }
        }
        Ok(())
    }
}

impl<S: MultiwriteNorFlash> FlashDevice for SequentialFlash<S> {
    async fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, FlashFault> {
        let packed = key.packed();
        if self.index.binary_search(&packed).is_err() {
            return Ok(None);
        }
        let Self {
            flash,
            range,
            cache,
            buffer,
            ..
        } = self;
        let item = map::fetch_item::<u32, &[u8], _>(flash, range.clone(), cache, buffer, &packed)
            .await
            .map_err(|e| fault("read", packed, e))?;
        Ok(item.map(|data| {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            data.len()
        }))
    }

    async fn program(&mut self, key: RecordKey, data: &[u8]) -> Result<(), FlashFault> {
        if data.len() > MAX_RECORD_SIZE {
            error!("Flash program {:#x} failed: {} bytes too large", key.packed(), data.len());
            return Err(FlashFault(FAULT_OTHER));
        }
        let packed = key.packed();
        let slot = self.index.binary_search(&packed);
        if slot.is_err() && self.index.is_full() {
            error!("Flash program {:#x} failed: key index full", packed);
            return Err(FlashFault(FAULT_INDEX_FULL));
        }

        let Self {
            flash,
            range,
            cache,
            buffer,
            ..
        } = self;
        map::store_item::<u32, &[u8], _>(flash, range.clone(), cache, buffer, &packed, &data)
            .await
            .map_err(|e| fault("program", packed, e))?;

        if let Err(at) = slot {
            // Capacity was checked above.
            let _ = self.index.insert(at, packed);
        }
        Ok(())
    }

    async fn erase(&mut self, key: RecordKey) -> Result<bool, FlashFault> {
        let packed = key.packed();
        let Ok(at) = self.index.binary_search(&packed) else {
            return Ok(false);
        };
        let Self {
            flash,
            range,
            cache,
            buffer,
            ..
        } = self;
        map::remove_item::<u32, _>(flash, range.clone(), cache, buffer, &packed)
            .await
            .map_err(|e| fault("erase", packed, e))?;
        self.index.remove(at);
        Ok(true)
    }

    async fn next_key(&mut self, file: u16, after: Option<u16>) -> Result<Option<u16>, FlashFault> {
        let lower = match after {
            Some(u16::MAX) => return Ok(None),
            Some(key) => RecordKey { file, key: key + 1 }.packed(),
            None => RecordKey { file, key: 0 }.packed(),
        };
        let at = self.index.partition_point(|&k| k < lower);
        Ok(self
            .index
            .get(at)
            .map(|&packed| RecordKey::unpack(packed))
            .filter(|found| found.file == file)
            .map(|found| found.key))
    }

    /// `sequential-storage` collects garbage on its own when a write
    /// needs space; nothing to do.
    async fn reclaim(&mut self) -> Result<(), FlashFault> {
        Ok(())
    }
}
