//! In-RAM flash device for host tests and simulation.
//!
//! Holds up to `N` live records in key order and can be told to fail
//! reads or programs, so error paths above the store are testable.

use heapless::Vec;

use super::codec::MAX_RECORD_SIZE;
use super::{FlashDevice, FlashFault, RecordKey};

/// Fault code reported when all `N` slots are taken.
pub const FAULT_FULL: u32 = 0xF0;

type Slot = (u32, Vec<u8, MAX_RECORD_SIZE>);

#[derive(Clone, Copy)]
struct ProgramFault {
    skip: usize,
    code: u32,
    sticky: bool,
}

pub struct MemoryFlash<const N: usize> {
    slots: Vec<Slot, N>,
    stale: usize,
    programs: usize,
    reclaims: usize,
    program_fault: Option<ProgramFault>,
    read_fault: Option<u32>,
}

impl<const N: usize> Default for MemoryFlash<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MemoryFlash<N> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            stale: 0,
            programs: 0,
            reclaims: 0,
            program_fault: None,
            read_fault: None,
        }
    }

    /// Let `successes` more programs through, then fail one with `code`.
    pub fn fail_program_after(&mut self, successes: usize, code: u32) {
        self.program_fault = Some(ProgramFault {
            skip: successes,
            code,
            sticky: false,
        });
    }

    /// Let `successes` more programs through, then fail all of them with
    /// `code` until [`Self::clear_faults`].
    pub fn fail_programs_after(&mut self, successes: usize, code: u32) {
        self.program_fault = Some(ProgramFault {
            skip: successes,
            code,
            sticky: true,
        });
    }

    /// Fail every read with `code` until [`Self::clear_faults`].
    pub fn fail_reads(&mut self, code: u32) {
        self.read_fault = Some(code);
    }

    pub fn clear_faults(&mut self) {
        self.program_fault = None;
        self.read_fault = None;
    }

    /// Store bytes without any checks (for corrupt-record tests).
    /// Data longer than a record slot is truncated.
    pub fn insert_raw(&mut self, key: RecordKey, data: &[u8]) {
        let len = data.len().min(MAX_RECORD_SIZE);
        // Truncated to capacity above.
        let bytes = Vec::from_slice(&data[..len]).unwrap_or_default();
        let _ = self.put(key.packed(), bytes);
    }

    /// Successful programs so far.
    pub fn program_count(&self) -> usize {
        self.programs
    }

    pub fn reclaim_count(&self) -> usize {
        self.reclaims
    }

    /// Records superseded or erased since the last reclaim.
    pub fn stale_count(&self) -> usize {
        self.stale
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn position(&self, packed: u32) -> Result<usize, usize> {
        self.slots.binary_search_by_key(&packed, |(k, _)| *k)
    }

    fn put(&mut self, packed: u32, bytes: Vec<u8, MAX_RECORD_SIZE>) -> Result<(), FlashFault> {
        match self.position(packed) {
            Ok(i) => {
                self.slots[i].1 = bytes;
                self.stale += 1;
                Ok(())
            }
            Err(i) => self
                .slots
                .insert(i, (packed, bytes))
                .map_err(|_| FlashFault(FAULT_FULL)),
        }
    }
}

impl<const N: usize> FlashDevice for MemoryFlash<N> {
    async fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, FlashFault> {
        if let Some(code) = self.read_fault {
            return Err(FlashFault(code));
        }
        Ok(self.position(key.packed()).ok().map(|i| {
            let data = &self.slots[i].1;
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            data.len()
        }))
    }

    async fn program(&mut self, key: RecordKey, data: &[u8]) -> Result<(), FlashFault> {
        if let Some(fault) = self.program_fault.as_mut() {
            if fault.skip > 0 {
                fault.skip -= 1;
            } else {
                let code = fault.code;
                if !fault.sticky {
                    self.program_fault = None;
                }
                return Err(FlashFault(code));
            }
        }
        let bytes = Vec::from_slice(data).map_err(|_| FlashFault(FAULT_FULL))?;
        self.put(key.packed(), bytes)?;
        self.programs += 1;
        Ok(())
    }

    async fn erase(&mut self, key: RecordKey) -> Result<bool, FlashFault> {
        match self.position(key.packed()) {
            Ok(i) => {
                self.slots.remove(i);
                self.stale += 1;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn next_key(&mut self, file: u16, after: Option<u16>) -> Result<Option<u16>, FlashFault> {
        if let Some(code) = self.read_fault {
            return Err(FlashFault(code));
        }
        let start = match after {
            Some(key) => RecordKey { file, key }.packed() as u64 + 1,
            None => RecordKey { file, key: 0 }.packed() as u64,
        };
        Ok(self
            .slots
            .iter()
            .map(|(k, _)| *k)
            .find(|k| u64::from(*k) >= start)
            .map(RecordKey::unpack)
            .filter(|k| k.file == file)
            .map(|k| k.key))
    }

    async fn reclaim(&mut self) -> Result<(), FlashFault> {
        self.stale = 0;
        self.reclaims += 1;
        Ok(())
    }
}
