//! Messages exchanged with the sensor node over its NUS link.

use heapless::String;

use crate::calendar::DateTime;
use crate::history::{HistoryRecord, SequenceId, CHANNELS};
use crate::storage::codec::{be_u16, be_u32};

/// Request for a live sample.
pub const REQUEST_LIVE_SAMPLE: &[u8] = b"96";
/// Request for the sensor's stored history.
pub const REQUEST_HISTORY: &[u8] = b"08";

const LIVE_SAMPLE_TAG: u8 = 0x96;
const LIVE_SAMPLE_LEN: usize = 9;
const HISTORY_TAG: u8 = 0x08;
const HISTORY_MIN_LEN: usize = 44;

/// Time-sync command: `"060"` followed by `YYYY.MM.DD HH.MM.SS`.
pub fn time_sync(now: &DateTime) -> String<22> {
    let mut cmd = String::new();
    // 3 + 19 bytes always fit.
    let _ = cmd.push_str("060");
    let _ = cmd.push_str(&now.dotted());
    cmd
}

/// Most recent live reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LiveSample {
    pub channel1: u16,
    pub channel2: u16,
    pub counter: u32,
}

/// A decoded sensor payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorFrame {
    Live(LiveSample),
    /// A history record the sensor wants stored at `id`.
    History { id: SequenceId, record: HistoryRecord },
    /// Anything else; relayed without interpretation.
    Opaque,
}

impl SensorFrame {
    pub fn parse(bytes: &[u8]) -> Self {
        match bytes.first() {
            Some(&LIVE_SAMPLE_TAG) if bytes.len() == LIVE_SAMPLE_LEN => SensorFrame::Live(LiveSample {
                channel1: be_u16(bytes, 1),
                channel2: be_u16(bytes, 3),
                counter: be_u32(bytes, 5),
            }),
            Some(&HISTORY_TAG) if bytes.len() >= HISTORY_MIN_LEN => parse_history(bytes),
            _ => SensorFrame::Opaque,
        }
    }
}

/// Layout after the tag byte: day, month, year (BE), hour, minute,
/// second, counter (BE), ch1, ch2 (BE), battery, origin MAC, custom MAC,
/// ch3..ch8 (BE), temperature, id (BE).
fn parse_history(b: &[u8]) -> SensorFrame {
    let timestamp = DateTime {
        year: be_u16(b, 3),
        month: b[2],
        day: b[1],
        hour: b[5],
        minute: b[6],
        second: b[7],
    };
    let mut channels = [0u16; CHANNELS];
    channels[0] = be_u16(b, 12);
    channels[1] = be_u16(b, 14);
    // 16: battery, 17..29: origin and custom MAC (not stored).
    for (i, value) in channels[2..].iter_mut().enumerate() {
        *value = be_u16(b, 29 + i * 2);
    }
    SensorFrame::History {
        id: be_u16(b, 42),
        record: HistoryRecord {
            timestamp,
            counter: be_u32(b, 8),
            channels,
            temperature: b[41],
            battery: b[16],
        },
    }
}
