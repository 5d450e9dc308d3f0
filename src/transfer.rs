//! Back-pressure paced bulk transfer of the history log.
//!
//! A transfer snapshots the stored ids once, then sends records in
//! bursts: one burst when it starts and one per "ready to send" signal
//! from the app link. A busy link just ends the burst; any other send
//! failure aborts the transfer.

use crate::ble::{Radio, Role, SendStatus};
use crate::error::{Error, Result};
use crate::history::{HistoryLog, HistoryRecord, IdList, SequenceId};
use crate::storage::{FlashDevice, RecordStore};

/// First byte of a history frame.
pub const FRAME_MAGIC: u8 = 0x08;

/// Magic, 7-byte date/time, counter, 8 channels, battery, temperature, id.
pub const FRAME_LEN: usize = 1 + 7 + 4 + 16 + 1 + 1 + 2;

/// Serialize one record for the app (multi-byte fields big-endian).
pub fn encode_frame(id: SequenceId, record: &HistoryRecord) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[0] = FRAME_MAGIC;
    out[1..8].copy_from_slice(&record.timestamp.to_wire());
    out[8..12].copy_from_slice(&record.counter.to_be_bytes());
    for (i, value) in record.channels.iter().enumerate() {
        out[12 + i * 2..14 + i * 2].copy_from_slice(&value.to_be_bytes());
    }
    out[28] = record.battery;
    out[29] = record.temperature;
    out[30..32].copy_from_slice(&id.to_be_bytes());
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    Idle,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl TransferState {
    const fn code(self) -> u8 {
        match self {
            TransferState::Idle => 0,
            TransferState::Active => 1,
            TransferState::Completed => 2,
            TransferState::Cancelled => 3,
            TransferState::Failed => 4,
        }
    }
}

/// Progress as reported to the app.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferStatus {
    pub state: TransferState,
    pub sent: u16,
    pub failed: u16,
    pub total: u16,
    pub percent: u8,
}

impl TransferStatus {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.state.code();
        out[1..3].copy_from_slice(&self.sent.to_be_bytes());
        out[3..5].copy_from_slice(&self.failed.to_be_bytes());
        out[5..7].copy_from_slice(&self.total.to_be_bytes());
        out[7] = self.percent;
        out
    }
}

pub struct BulkTransfer {
    ids: IdList,
    cursor: usize,
    total: usize,
    sent: usize,
    failed: usize,
    state: TransferState,
    batch: usize,
}

impl BulkTransfer {
    pub const fn new(batch: usize) -> Self {
        Self {
            ids: IdList::new(),
            cursor: 0,
            total: 0,
            sent: 0,
            failed: 0,
            state: TransferState::Idle,
            batch,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransferState::Active
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn percent_complete(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            (self.sent * 100 / self.total) as u8
        }
    }

    pub fn status(&self) -> TransferStatus {
        let clamp = |n: usize| u16::try_from(n).unwrap_or(u16::MAX);
        TransferStatus {
            state: self.state,
            sent: clamp(self.sent),
            failed: clamp(self.failed),
            total: clamp(self.total),
            percent: self.percent_complete(),
        }
    }

    /// Snapshot the log and send the first burst. Returns the number of
    /// records queued; an empty log is a successful no-op.
    pub async fn start<F: FlashDevice, R: Radio>(
        &mut self,
        store: &mut RecordStore<F>,
        radio: &mut R,
    ) -> Result<usize> {
        let total = self.begin(store).await?;
        self.pump(store, radio).await;
        Ok(total)
    }

    /// Snapshot the log without sending anything, so the caller can get
    /// its own frame out ahead of the first burst. Follow with [`pump`].
    ///
    /// [`pump`]: BulkTransfer::pump
    pub async fn begin<F: FlashDevice>(&mut self, store: &mut RecordStore<F>) -> Result<usize> {
        if self.is_active() {
            return Err(Error::AlreadyActive);
        }
        let ids = HistoryLog::new(store).list_all_ids().await?;
        self.total = ids.len();
        self.ids = ids;
        self.cursor = 0;
        self.sent = 0;
        self.failed = 0;
        if self.total == 0 {
            info!("transfer: nothing to send");
            self.state = TransferState::Idle;
            return Ok(0);
        }
        self.state = TransferState::Active;
        info!("transfer: started, {} records", self.total);
        Ok(self.total)
    }

    /// Send one burst of up to `batch` records. Call on every ready signal
    /// from the app link; does nothing unless a transfer is active.
    pub async fn pump<F: FlashDevice, R: Radio>(
        &mut self,
        store: &mut RecordStore<F>,
        radio: &mut R,
    ) -> TransferState {
        if !self.is_active() {
            return self.state;
        }
        let mut log = HistoryLog::new(store);
        let mut attempts = 0;
        while attempts < self.batch && self.cursor < self.ids.len() {
            let id = self.ids[self.cursor];
            let record = match log.read(id).await {
                Ok(record) => record,
                Err(Error::NotFound | Error::CorruptRecord) => {
                    // Deleted or damaged since the snapshot; skip it.
                    warn!("transfer: record {} unreadable, skipping", id);
                    self.failed += 1;
                    self.cursor += 1;
                    attempts += 1;
                    continue;
                }
                Err(e) => {
                    self.abort(e);
                    return self.state;
                }
            };
            match radio.send(Role::PeripheralServing, &encode_frame(id, &record)) {
                SendStatus::Sent => {
                    self.sent += 1;
                    self.cursor += 1;
                    attempts += 1;
                }
                SendStatus::Busy => {
                    trace!("transfer: link busy at {}", self.cursor);
                    return self.state;
                }
                SendStatus::Failed => {
                    self.failed += 1;
                    self.abort(Error::LinkError);
                    return self.state;
                }
            }
        }
        if self.cursor >= self.ids.len() {
            self.state = TransferState::Completed;
            self.ids.clear();
            info!(
                "transfer: completed, {} sent, {} failed",
                self.sent, self.failed
            );
        }
        self.state
    }

    /// Stop the transfer. Returns `false` (and changes nothing) if none
    /// was active.
    pub fn cancel(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = TransferState::Cancelled;
        self.ids.clear();
        info!(
            "transfer: cancelled at {}/{} ({} failed)",
            self.sent, self.total, self.failed
        );
        true
    }

    fn abort(&mut self, cause: Error) {
        self.state = TransferState::Failed;
        self.ids.clear();
        error!(
            "transfer: aborted ({}) after {} sent, {} failed",
            cause, self.sent, self.failed
        );
    }
}
