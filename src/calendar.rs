//! Wall-clock calendar driven by the RTC tick.
//!
//! The repeater has no battery-backed clock: time is set by the companion
//! app, advanced by the periodic tick and checkpointed to flash on every
//! wake so a reset only loses one duty cycle.

use core::fmt::Write;

use heapless::String;

use crate::config::RTC_TICKS_PER_SEC;
use crate::storage::codec::FixedRecord;

/// First and last year the calendar accepts.
pub const MIN_YEAR: u16 = 2000;
pub const MAX_YEAR: u16 = 2099;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

impl DateTime {
    /// Boot default when nothing valid is stored.
    pub const EPOCH: DateTime = DateTime {
        year: MIN_YEAR,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Build a validated date/time.
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<Self> {
        let dt = Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        };
        dt.is_valid().then_some(dt)
    }

    pub fn is_valid(&self) -> bool {
        (MIN_YEAR..=MAX_YEAR).contains(&self.year)
            && (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }

    /// Advance by one second, carrying into minutes, hours, days, months
    /// and years. Past 2099-12-31 23:59:59 the clock wraps to [`Self::EPOCH`].
    pub fn tick(&mut self) {
        self.second += 1;
        if self.second < 60 {
            return;
        }
        self.second = 0;
        self.minute += 1;
        if self.minute < 60 {
            return;
        }
        self.minute = 0;
        self.hour += 1;
        if self.hour < 24 {
            return;
        }
        self.hour = 0;
        self.day += 1;
        if self.day <= days_in_month(self.year, self.month) {
            return;
        }
        self.day = 1;
        self.month += 1;
        if self.month <= 12 {
            return;
        }
        self.month = 1;
        self.year += 1;
        if self.year > MAX_YEAR {
            *self = Self::EPOCH;
        }
    }

    /// Parse the 14-digit `YYYYMMDDHHMMSS` form used by the command protocol.
    pub fn parse_compact(ascii: &[u8]) -> Option<Self> {
        if ascii.len() != 14 || !ascii.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let field = |from: usize, len: usize| {
            ascii[from..from + len]
                .iter()
                .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'))
        };
        Self::new(
            field(0, 4),
            field(4, 2) as u8,
            field(6, 2) as u8,
            field(8, 2) as u8,
            field(10, 2) as u8,
            field(12, 2) as u8,
        )
    }

    /// Seven-byte wire form: day, month, year (big-endian), hour, minute,
    /// second.
    pub fn to_wire(&self) -> [u8; 7] {
        let [year_hi, year_lo] = self.year.to_be_bytes();
        [
            self.day,
            self.month,
            year_hi,
            year_lo,
            self.hour,
            self.minute,
            self.second,
        ]
    }

    /// Inverse of [`Self::to_wire`]. Rejects invalid dates.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 7 {
            return None;
        }
        Self::new(
            u16::from_be_bytes([bytes[2], bytes[3]]),
            bytes[1],
            bytes[0],
            bytes[4],
            bytes[5],
            bytes[6],
        )
    }

    /// `YYYY.MM.DD HH.MM.SS`, the form the sensor firmware accepts.
    pub fn dotted(&self) -> String<19> {
        let mut s = String::new();
        // 19 characters always fit.
        let _ = write!(
            s,
            "{:04}.{:02}.{:02} {:02}.{:02}.{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        s
    }
}

/// Flash layout: year (LE), month, day, hour, minute, second, pad.
impl FixedRecord for DateTime {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.year.to_le_bytes());
        out[2] = self.month;
        out[3] = self.day;
        out[4] = self.hour;
        out[5] = self.minute;
        out[6] = self.second;
        out[7] = 0;
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        Self::new(
            u16::from_le_bytes([bytes[0], bytes[1]]),
            bytes[2],
            bytes[3],
            bytes[4],
            bytes[5],
            bytes[6],
        )
    }
}

/// Current time plus the sub-second tick count.
#[derive(Debug)]
pub struct Calendar {
    now: DateTime,
    subsecond: u8,
}

impl Calendar {
    pub const fn new(start: DateTime) -> Self {
        Self {
            now: start,
            subsecond: 0,
        }
    }

    pub fn now(&self) -> DateTime {
        self.now
    }

    /// Replace the current time and restart the second boundary.
    pub fn set(&mut self, now: DateTime) {
        self.now = now;
        self.subsecond = 0;
    }

    /// One RTC tick. Returns `true` when a whole second elapsed.
    pub fn on_tick(&mut self) -> bool {
        self.subsecond += 1;
        if self.subsecond < RTC_TICKS_PER_SEC {
            return false;
        }
        self.subsecond = 0;
        self.now.tick();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: u16, mo: u8, d: u8, h: u8, mi: u8, s: u8) -> DateTime {
        DateTime::new(y, mo, d, h, mi, s).unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════
    // Validation
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn leap_years() {
        assert!(is_leap_year(2000));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(2023));
        assert!(!is_leap_year(2100));
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(DateTime::new(1999, 1, 1, 0, 0, 0).is_none());
        assert!(DateTime::new(2100, 1, 1, 0, 0, 0).is_none());
        assert!(DateTime::new(2023, 2, 29, 0, 0, 0).is_none());
        assert!(DateTime::new(2024, 2, 29, 0, 0, 0).is_some());
        assert!(DateTime::new(2024, 13, 1, 0, 0, 0).is_none());
        assert!(DateTime::new(2024, 4, 31, 0, 0, 0).is_none());
        assert!(DateTime::new(2024, 1, 1, 24, 0, 0).is_none());
        assert!(DateTime::new(2024, 1, 1, 0, 60, 0).is_none());
    }

    // ════════════════════════════════════════════════════════════════════════
    // Ticking
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn tick_carries_into_leap_day() {
        let mut t = dt(2024, 2, 28, 23, 59, 59);
        t.tick();
        assert_eq!(t, dt(2024, 2, 29, 0, 0, 0));
        let mut t = dt(2023, 2, 28, 23, 59, 59);
        t.tick();
        assert_eq!(t, dt(2023, 3, 1, 0, 0, 0));
    }

    #[test]
    fn tick_carries_into_new_year() {
        let mut t = dt(2024, 12, 31, 23, 59, 59);
        t.tick();
        assert_eq!(t, dt(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn tick_wraps_after_last_supported_year() {
        let mut t = dt(2099, 12, 31, 23, 59, 59);
        t.tick();
        assert_eq!(t, DateTime::EPOCH);
    }

    #[test]
    fn calendar_advances_once_per_second_of_ticks() {
        let mut cal = Calendar::new(DateTime::EPOCH);
        for _ in 0..RTC_TICKS_PER_SEC - 1 {
            assert!(!cal.on_tick());
        }
        assert!(cal.on_tick());
        assert_eq!(cal.now().second, 1);
    }

    #[test]
    fn calendar_set_restarts_subsecond() {
        let mut cal = Calendar::new(DateTime::EPOCH);
        cal.on_tick();
        cal.on_tick();
        cal.set(dt(2024, 5, 6, 7, 8, 9));
        for _ in 0..RTC_TICKS_PER_SEC - 1 {
            cal.on_tick();
        }
        assert_eq!(cal.now().second, 9);
        cal.on_tick();
        assert_eq!(cal.now().second, 10);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Encodings
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn parses_compact_form() {
        assert_eq!(
            DateTime::parse_compact(b"20240315123045"),
            Some(dt(2024, 3, 15, 12, 30, 45))
        );
        assert!(DateTime::parse_compact(b"2024031512304").is_none());
        assert!(DateTime::parse_compact(b"2024031512304X").is_none());
        assert!(DateTime::parse_compact(b"20241315123045").is_none());
    }

    #[test]
    fn wire_form_is_day_month_year_be() {
        let t = dt(2024, 3, 15, 12, 30, 45);
        assert_eq!(t.to_wire(), [15, 3, 0x07, 0xE8, 12, 30, 45]);
        assert_eq!(DateTime::from_wire(&t.to_wire()), Some(t));
        assert!(DateTime::from_wire(&[1, 2, 3]).is_none());
    }

    #[test]
    fn dotted_form_for_sensor() {
        let t = dt(2024, 3, 5, 1, 2, 3);
        assert_eq!(t.dotted().as_str(), "2024.03.05 01.02.03");
    }

    #[test]
    fn flash_form_rejects_garbage() {
        let mut buf = [0u8; 8];
        dt(2030, 6, 1, 0, 0, 0).encode(&mut buf);
        assert_eq!(DateTime::decode(&buf), Some(dt(2030, 6, 1, 0, 0, 0)));
        assert!(DateTime::decode(&[0xFF; 8]).is_none());
    }
}
