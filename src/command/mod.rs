//! Companion-app command protocol.
//!
//! A command is the ASCII sentinel `"111"`, a two-digit code and a
//! code-specific payload. Anything without the sentinel is not a command
//! and is relayed to the sensor untouched.
//!
//! | code | payload | command |
//! |------|---------|---------|
//! | 01 / 16 / 18 | 12 hex digits | set sensor / repeater / scan-target MAC |
//! | 02 / 17 / 19 | - | get sensor / repeater / scan-target MAC |
//! | 03 | - | reboot |
//! | 04 / 05 / 15 | decimal seconds | set on / sleep / extended-search duration |
//! | 06 | `YYYYMMDDHHMMSS` | set date and time |
//! | 07 | - | get date and time |
//! | 08 / 09 | decimal id | get / delete one history record |
//! | 10 | - | delete all history |
//! | 11 / 12 / 13 | - | start / stop / status of bulk transfer |
//! | 14 | - | configuration snapshot |
//! | 20 / 21 | - | start / stop packet scan |
//! | 22 | `0` or `1` | strict MAC filter off / on |
//! | 23 | - | last history record |

pub mod response;

use crate::calendar::DateTime;
use crate::config::COMMAND_SENTINEL;
use crate::history::SequenceId;
use crate::mac::{MacAddress, MacRole};
use crate::settings::DurationSetting;

pub use response::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetMac(MacRole, MacAddress),
    GetMac(MacRole),
    Reboot,
    SetDuration(DurationSetting, u32),
    SetDateTime(DateTime),
    GetDateTime,
    GetHistory(SequenceId),
    DeleteHistory(SequenceId),
    DeleteAllHistory,
    StartTransfer,
    StopTransfer,
    TransferStatus,
    GetConfiguration,
    StartPacketScan,
    StopPacketScan,
    SetStrictFilter(bool),
    GetLastHistory,
}

/// Why a sentinel-prefixed payload was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// Shorter than sentinel plus code.
    Truncated,
    /// Code is not two digits or not in the table.
    UnknownCode,
    /// Payload has the wrong length or format for the code.
    BadPayload,
}

/// Classification of one inbound app payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    Command { code: u8, command: Command },
    Rejected { code: Option<u8>, reason: Rejection },
    /// Not a command: relay verbatim to the sensor.
    Forward(&'a [u8]),
}

/// Classify `bytes`. Never panics, whatever the length.
pub fn parse(bytes: &[u8]) -> Inbound<'_> {
    let Some(rest) = bytes.strip_prefix(COMMAND_SENTINEL.as_slice()) else {
        return Inbound::Forward(bytes);
    };
    let rest = trim_line_ending(rest);
    if rest.len() < 2 {
        return Inbound::Rejected {
            code: None,
            reason: Rejection::Truncated,
        };
    }
    let Some(code) = parse_decimal(&rest[..2], 2).and_then(|c| u8::try_from(c).ok()) else {
        return Inbound::Rejected {
            code: None,
            reason: Rejection::UnknownCode,
        };
    };
    match decode(code, &rest[2..]) {
        Ok(command) => Inbound::Command { code, command },
        Err(reason) => Inbound::Rejected {
            code: Some(code),
            reason,
        },
    }
}

fn decode(code: u8, payload: &[u8]) -> Result<Command, Rejection> {
    let none = |command: Command| {
        if payload.is_empty() {
            Ok(command)
        } else {
            Err(Rejection::BadPayload)
        }
    };
    let mac = |role: MacRole| {
        MacAddress::parse_hex(payload)
            .map(|mac| Command::SetMac(role, mac))
            .ok_or(Rejection::BadPayload)
    };
    let secs = |setting: DurationSetting| {
        parse_decimal(payload, 5)
            .map(|secs| Command::SetDuration(setting, secs))
            .ok_or(Rejection::BadPayload)
    };
    let id = || {
        parse_decimal(payload, 5)
            .and_then(|id| SequenceId::try_from(id).ok())
            .ok_or(Rejection::BadPayload)
    };
    match code {
        1 => mac(MacRole::SensorFilter),
        2 => none(Command::GetMac(MacRole::SensorFilter)),
        3 => none(Command::Reboot),
        4 => secs(DurationSetting::OnDuration),
        5 => secs(DurationSetting::SleepDuration),
        6 => DateTime::parse_compact(payload)
            .map(Command::SetDateTime)
            .ok_or(Rejection::BadPayload),
        7 => none(Command::GetDateTime),
        8 => id().map(Command::GetHistory),
        9 => id().map(Command::DeleteHistory),
        10 => none(Command::DeleteAllHistory),
        11 => none(Command::StartTransfer),
        12 => none(Command::StopTransfer),
        13 => none(Command::TransferStatus),
        14 => none(Command::GetConfiguration),
        15 => secs(DurationSetting::ExtendedSearch),
        16 => mac(MacRole::RepeaterIdentity),
        17 => none(Command::GetMac(MacRole::RepeaterIdentity)),
        18 => mac(MacRole::ScanTarget),
        19 => none(Command::GetMac(MacRole::ScanTarget)),
        20 => none(Command::StartPacketScan),
        21 => none(Command::StopPacketScan),
        22 => match payload {
            b"0" => Ok(Command::SetStrictFilter(false)),
            b"1" => Ok(Command::SetStrictFilter(true)),
            _ => Err(Rejection::BadPayload),
        },
        23 => none(Command::GetLastHistory),
        _ => Err(Rejection::UnknownCode),
    }
}

/// 1..=`max_digits` ASCII digits.
fn parse_decimal(ascii: &[u8], max_digits: usize) -> Option<u32> {
    if ascii.is_empty() || ascii.len() > max_digits {
        return None;
    }
    ascii.iter().try_fold(0u32, |acc, &c| {
        c.is_ascii_digit().then(|| acc * 10 + u32::from(c - b'0'))
    })
}

/// Terminal apps append CR and/or LF.
fn trim_line_ending(mut bytes: &[u8]) -> &[u8] {
    while let [head @ .., b'\r' | b'\n'] = bytes {
        bytes = head;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(bytes: &[u8]) -> Command {
        match parse(bytes) {
            Inbound::Command { command, .. } => command,
            other => panic!("expected command, got {:?}", other),
        }
    }

    fn rejection(bytes: &[u8]) -> Rejection {
        match parse(bytes) {
            Inbound::Rejected { reason, .. } => reason,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // Framing
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn non_command_is_forwarded_verbatim() {
        assert_eq!(parse(b"hello sensor"), Inbound::Forward(b"hello sensor"));
        assert_eq!(parse(b"11"), Inbound::Forward(b"11"));
        assert_eq!(parse(b""), Inbound::Forward(b""));
        assert_eq!(parse(&[0x96, 0x00]), Inbound::Forward(&[0x96, 0x00]));
    }

    #[test]
    fn truncated_commands_are_rejected() {
        assert_eq!(rejection(b"111"), Rejection::Truncated);
        assert_eq!(rejection(b"1110"), Rejection::Truncated);
        assert_eq!(rejection(b"111\r\n"), Rejection::Truncated);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(rejection(b"11199"), Rejection::UnknownCode);
        assert_eq!(rejection(b"11100"), Rejection::UnknownCode);
        assert_eq!(rejection(b"111AB"), Rejection::UnknownCode);
    }

    #[test]
    fn line_endings_are_ignored() {
        assert_eq!(command(b"11102\r\n"), Command::GetMac(MacRole::SensorFilter));
    }

    // ════════════════════════════════════════════════════════════════════════
    // Payloads
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn mac_commands() {
        let mac = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(
            command(b"11101AABBCCDDEEFF"),
            Command::SetMac(MacRole::SensorFilter, mac)
        );
        assert_eq!(
            command(b"11118aabbccddeeff"),
            Command::SetMac(MacRole::ScanTarget, mac)
        );
        assert_eq!(rejection(b"11101AABBCCDDEE"), Rejection::BadPayload);
        assert_eq!(rejection(b"11116AABBCCDDEEFF00"), Rejection::BadPayload);
    }

    #[test]
    fn duration_commands() {
        assert_eq!(
            command(b"1110430"),
            Command::SetDuration(DurationSetting::OnDuration, 30)
        );
        assert_eq!(
            command(b"1110599999"),
            Command::SetDuration(DurationSetting::SleepDuration, 99_999)
        );
        assert_eq!(
            command(b"11115400"),
            Command::SetDuration(DurationSetting::ExtendedSearch, 400)
        );
        assert_eq!(rejection(b"11104"), Rejection::BadPayload);
        assert_eq!(rejection(b"11104123456"), Rejection::BadPayload);
        assert_eq!(rejection(b"111043x"), Rejection::BadPayload);
    }

    #[test]
    fn datetime_commands() {
        assert_eq!(
            command(b"1110620240315123045"),
            Command::SetDateTime(DateTime::new(2024, 3, 15, 12, 30, 45).unwrap())
        );
        assert_eq!(command(b"11107"), Command::GetDateTime);
        assert_eq!(rejection(b"1110620241315123045"), Rejection::BadPayload);
        assert_eq!(rejection(b"11106"), Rejection::BadPayload);
    }

    #[test]
    fn history_id_commands() {
        assert_eq!(command(b"111080"), Command::GetHistory(0));
        assert_eq!(command(b"1110965535"), Command::DeleteHistory(65_535));
        assert_eq!(rejection(b"1110965536"), Rejection::BadPayload);
        assert_eq!(rejection(b"11108"), Rejection::BadPayload);
    }

    #[test]
    fn no_payload_commands_reject_extra_bytes() {
        assert_eq!(command(b"11103"), Command::Reboot);
        assert_eq!(command(b"11110"), Command::DeleteAllHistory);
        assert_eq!(command(b"11123"), Command::GetLastHistory);
        assert_eq!(rejection(b"11111now"), Rejection::BadPayload);
    }

    #[test]
    fn strict_filter_command() {
        assert_eq!(command(b"111221"), Command::SetStrictFilter(true));
        assert_eq!(command(b"111220"), Command::SetStrictFilter(false));
        assert_eq!(rejection(b"111222"), Rejection::BadPayload);
    }

    #[test]
    fn rejection_carries_code() {
        assert_eq!(
            parse(b"11101XYZ"),
            Inbound::Rejected {
                code: Some(1),
                reason: Rejection::BadPayload
            }
        );
    }
}
