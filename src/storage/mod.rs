//! Keyed persistence over a flash-like device.
//!
//! Records are addressed by `(namespace, key)`. Each namespace holds one
//! record family with a single fixed payload size, so every write is
//! length-checked against the layout before it reaches flash.
//!
//! The on-target backend is a `sequential-storage` map (see
//! `firmware::flash`); host tests use [`MemoryFlash`].

pub mod codec;
mod device;
pub mod memory;

use heapless::Vec;

use crate::error::{Error, Result};
use crate::history::HistoryRecord;

pub use codec::{FixedRecord, MAX_RECORD_SIZE};
pub use device::{FlashDevice, FlashFault};
pub use memory::MemoryFlash;

/// Raw record payload as returned by [`RecordStore::find`].
pub type Payload = Vec<u8, MAX_RECORD_SIZE>;

/// Record families. Namespaces never share keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Namespace {
    /// Durations and flags, one `u32` per key.
    Settings,
    /// One 8-byte MAC record per [`crate::mac::MacRole`].
    MacAllowList,
    /// Last checkpointed wall-clock time.
    DateTime,
    /// One [`HistoryRecord`] per sequence id.
    History,
    /// The local append count of the history log.
    HistoryCounter,
}

impl Namespace {
    /// Flash file id this namespace occupies.
    pub const fn file_id(self) -> u16 {
        match self {
            Namespace::Settings => 0x1001,
            Namespace::MacAllowList => 0x1002,
            Namespace::DateTime => 0x1003,
            Namespace::History => 0x1004,
            Namespace::HistoryCounter => 0x1005,
        }
    }

    /// Exact payload size every record in this namespace must have.
    pub const fn record_size(self) -> usize {
        match self {
            Namespace::Settings => 4,
            Namespace::MacAllowList => 8,
            Namespace::DateTime => 8,
            Namespace::History => <HistoryRecord as FixedRecord>::SIZE,
            Namespace::HistoryCounter => 4,
        }
    }
}

/// Physical address of a record on the flash device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordKey {
    pub file: u16,
    pub key: u16,
}

impl RecordKey {
    pub const fn new(namespace: Namespace, key: u16) -> Self {
        Self {
            file: namespace.file_id(),
            key,
        }
    }

    /// Packed `(file << 16) | key`, ordered by file then key.
    pub const fn packed(self) -> u32 {
        ((self.file as u32) << 16) | self.key as u32
    }

    pub const fn unpack(packed: u32) -> Self {
        Self {
            file: (packed >> 16) as u16,
            key: packed as u16,
        }
    }
}

/// Which branch an [`RecordStore::upsert`] took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Upsert {
    Created,
    Updated,
}

/// Generic keyed record store.
pub struct RecordStore<F> {
    flash: F,
}

impl<F: FlashDevice> RecordStore<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Raw payload under `key`, if any.
    ///
    /// A stored length that disagrees with the namespace layout is
    /// reported as [`Error::CorruptRecord`].
    pub async fn find(&mut self, namespace: Namespace, key: u16) -> Result<Option<Payload>> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        match self.flash.read(RecordKey::new(namespace, key), &mut buf).await? {
            None => Ok(None),
            Some(len) if len != namespace.record_size() => {
                warn!(
                    "store: {:?}/{} has {} bytes, expected {}",
                    namespace,
                    key,
                    len,
                    namespace.record_size()
                );
                Err(Error::CorruptRecord)
            }
            Some(len) => Vec::from_slice(&buf[..len])
                .map(Some)
                .map_err(|_| Error::CorruptRecord),
        }
    }

    /// Create a record. Fails with [`Error::AlreadyExists`] if the key is taken.
    pub async fn write(&mut self, namespace: Namespace, key: u16, bytes: &[u8]) -> Result<()> {
        check_size(namespace, bytes)?;
        if self.exists(namespace, key).await? {
            return Err(Error::AlreadyExists);
        }
        self.program(namespace, key, bytes).await
    }

    /// Replace a record. Fails with [`Error::NotFound`] if the key is free.
    pub async fn update(&mut self, namespace: Namespace, key: u16, bytes: &[u8]) -> Result<()> {
        check_size(namespace, bytes)?;
        if !self.exists(namespace, key).await? {
            return Err(Error::NotFound);
        }
        self.program(namespace, key, bytes).await
    }

    /// Update if present, write otherwise, and report which happened.
    pub async fn upsert(&mut self, namespace: Namespace, key: u16, bytes: &[u8]) -> Result<Upsert> {
        check_size(namespace, bytes)?;
        let outcome = if self.exists(namespace, key).await? {
            Upsert::Updated
        } else {
            Upsert::Created
        };
        self.program(namespace, key, bytes).await?;
        Ok(outcome)
    }

    /// Remove a record. Fails with [`Error::NotFound`] if the key is free.
    pub async fn delete(&mut self, namespace: Namespace, key: u16) -> Result<()> {
        if self.flash.erase(RecordKey::new(namespace, key)).await? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Lazy ascending walk over the keys of `namespace`.
    pub fn keys(&mut self, namespace: Namespace) -> Keys<'_, F> {
        Keys {
            store: self,
            namespace,
            cursor: None,
            done: false,
        }
    }

    /// Lazy ascending walk over `(key, payload)` pairs of `namespace`.
    /// Each call starts a fresh walk.
    pub fn iterate(&mut self, namespace: Namespace) -> Records<'_, F> {
        Records {
            keys: self.keys(namespace),
        }
    }

    /// Erase every record in `namespace`. Returns how many were removed.
    pub async fn erase_namespace(&mut self, namespace: Namespace) -> Result<usize> {
        let file = namespace.file_id();
        let mut removed = 0;
        while let Some(key) = self.flash.next_key(file, None).await? {
            self.flash.erase(RecordKey { file, key }).await?;
            removed += 1;
        }
        debug!("store: erased {} records from {:?}", removed, namespace);
        Ok(removed)
    }

    /// Reclaim space held by deleted or superseded records. Safe at any time.
    pub async fn compact(&mut self) -> Result<()> {
        self.flash.reclaim().await?;
        Ok(())
    }

    /// Typed read through [`FixedRecord`].
    pub async fn load<T: FixedRecord>(&mut self, namespace: Namespace, key: u16) -> Result<Option<T>> {
        if T::SIZE != namespace.record_size() {
            return Err(Error::InvalidSize);
        }
        match self.find(namespace, key).await? {
            None => Ok(None),
            Some(bytes) => T::decode(&bytes).map(Some).ok_or(Error::CorruptRecord),
        }
    }

    /// Typed upsert through [`FixedRecord`].
    pub async fn save<T: FixedRecord>(&mut self, namespace: Namespace, key: u16, value: &T) -> Result<Upsert> {
        if T::SIZE > MAX_RECORD_SIZE {
            return Err(Error::InvalidSize);
        }
        let mut buf = [0u8; MAX_RECORD_SIZE];
        value.encode(&mut buf[..T::SIZE]);
        self.upsert(namespace, key, &buf[..T::SIZE]).await
    }

    async fn exists(&mut self, namespace: Namespace, key: u16) -> Result<bool> {
        Ok(self
            .flash
            .read(RecordKey::new(namespace, key), &mut [])
            .await?
            .is_some())
    }

    async fn program(&mut self, namespace: Namespace, key: u16, bytes: &[u8]) -> Result<()> {
        // The flash backend logs its own faults.
        Ok(self.flash.program(RecordKey::new(namespace, key), bytes).await?)
    }
}

fn check_size(namespace: Namespace, bytes: &[u8]) -> Result<()> {
    if bytes.len() == namespace.record_size() {
        Ok(())
    } else {
        Err(Error::InvalidSize)
    }
}

/// Key cursor returned by [`RecordStore::keys`].
pub struct Keys<'a, F> {
    store: &'a mut RecordStore<F>,
    namespace: Namespace,
    cursor: Option<u16>,
    done: bool,
}

impl<F: FlashDevice> Keys<'_, F> {
    pub async fn next(&mut self) -> Option<Result<u16>> {
        if self.done {
            return None;
        }
        match self
            .store
            .flash
            .next_key(self.namespace.file_id(), self.cursor)
            .await
        {
            Ok(Some(key)) => {
                self.cursor = Some(key);
                Some(Ok(key))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(fault) => {
                self.done = true;
                Some(Err(fault.into()))
            }
        }
    }
}

/// Record cursor returned by [`RecordStore::iterate`].
pub struct Records<'a, F> {
    keys: Keys<'a, F>,
}

impl<F: FlashDevice> Records<'_, F> {
    pub async fn next(&mut self) -> Option<Result<(u16, Payload)>> {
        loop {
            let key = match self.keys.next().await? {
                Ok(key) => key,
                Err(e) => return Some(Err(e)),
            };
            match self.keys.store.find(self.keys.namespace, key).await {
                Ok(Some(payload)) => return Some(Ok((key, payload))),
                // Erased between the key walk and the read.
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
