//! End-to-end tests: a booted repeater driven by events, with a mock radio
//! and mock alarms.

mod common;

use ble_repeater::ble::Role;
use ble_repeater::calendar::DateTime;
use ble_repeater::config::{
    DEFAULT_ON_DURATION_SECS, DEFAULT_SENSOR_MAC, DEFAULT_SLEEP_DURATION_SECS, EXTENDED_SEARCH_SLEEP_SECS,
    RESPONSE_MAGIC,
};
use ble_repeater::history::{HistoryLog, HistoryRecord, CHANNELS};
use ble_repeater::mac::{MacAddress, MacRole};
use ble_repeater::scheduler::{DutyCycleState, SyncState};
use ble_repeater::settings::Configuration;
use ble_repeater::storage::Namespace;
use ble_repeater::transfer::{TransferState, FRAME_LEN, FRAME_MAGIC};
use ble_repeater::{Error, Event, Outcome};
use common::*;
use embassy_futures::block_on;

const STATUS_OK: u8 = 0;

fn record(counter: u32) -> HistoryRecord {
    HistoryRecord {
        timestamp: DateTime::new(2024, 5, 1, 8, 0, 0).unwrap(),
        counter,
        channels: [counter as u16; CHANNELS],
        temperature: 22,
        battery: 95,
    }
}

fn seed_history(repeater: &mut TestRepeater, n: u32) {
    let mut log = HistoryLog::new(repeater.store_mut());
    for i in 0..n {
        block_on(log.append(&record(i))).unwrap();
    }
}

fn history_frames(frames: &[Vec<u8>]) -> usize {
    frames
        .iter()
        .filter(|f| f.len() == FRAME_LEN && f[0] == FRAME_MAGIC)
        .count()
}

// ═══════════════════════════════════════════════════════════════════════════
// Boot and duty cycle
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn boot_enters_active_with_both_roles_armed() {
    let r = boot();
    assert_eq!(r.scheduler().state(), DutyCycleState::Active);
    assert_eq!(r.alarms().on, Some(DEFAULT_ON_DURATION_SECS));
    assert!(r.roles().is_armed());

    let calls = &r.radio().calls;
    assert!(calls.contains(&RadioCall::Io(true)));
    assert!(calls.contains(&RadioCall::Scan(DEFAULT_SENSOR_MAC)));
    assert!(calls.contains(&RadioCall::Advertise));
}

#[test]
fn on_alarm_tears_down_and_sleeps() {
    let mut r = boot();
    connect_app(&mut r);
    connect_sensor(&mut r);
    r.radio_mut().clear();

    handle(&mut r, Event::OnAlarm);

    assert_eq!(r.scheduler().state(), DutyCycleState::Sleeping);
    assert_eq!(r.alarms().sleep, Some(DEFAULT_SLEEP_DURATION_SECS));
    assert!(!r.roles().is_armed());
    let calls = &r.radio().calls;
    assert!(calls.contains(&RadioCall::Disconnect(APP_HANDLE)));
    assert!(calls.contains(&RadioCall::Disconnect(SENSOR_HANDLE)));
    assert_eq!(calls.last(), Some(&RadioCall::Io(false)));
}

#[test]
fn stale_alarms_are_ignored() {
    let mut r = boot();
    r.radio_mut().clear();

    handle(&mut r, Event::SleepAlarm);

    assert_eq!(r.scheduler().state(), DutyCycleState::Active);
    assert!(r.radio().calls.is_empty());
}

#[test]
fn missed_sensor_enters_extended_search_and_resyncs_on_connect() {
    let mut r = boot();

    // A whole ACTIVE phase without the sensor.
    handle(&mut r, Event::OnAlarm);
    assert_eq!(r.scheduler().sync_state(), SyncState::ExtendedSearch);
    assert_eq!(r.alarms().sleep, Some(EXTENDED_SEARCH_SLEEP_SECS));

    handle(&mut r, Event::SleepAlarm);
    assert_eq!(r.scheduler().state(), DutyCycleState::Active);
    assert_eq!(r.alarms().on, Some(r.config().extended_search_secs));

    connect_sensor(&mut r);
    assert_eq!(r.scheduler().sync_state(), SyncState::Normal);
    assert_eq!(r.alarms().on, Some(DEFAULT_ON_DURATION_SECS));
}

#[test]
fn sensor_connect_sends_handshake() {
    let mut r = boot();
    connect_sensor(&mut r);

    let sent = &r.radio().to_sensor;
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], b"0602000.01.01 00.00.00".to_vec());
    assert_eq!(sent[1], b"96".to_vec());
    assert_eq!(sent[2], b"08".to_vec());
}

#[test]
fn timer_failure_is_fatal() {
    let mut r = boot();
    r.alarms_mut().fail = true;
    assert_eq!(block_on(r.handle(Event::OnAlarm)), Err(Error::TimerArm));
}

#[test]
fn wake_checkpoints_the_clock() {
    let mut r = boot();
    connect_app(&mut r);
    command(&mut r, "1110620240315102030");
    seconds(&mut r, 3);

    handle(&mut r, Event::OnAlarm);
    handle(&mut r, Event::SleepAlarm);

    let stored = block_on(r.store_mut().load::<DateTime>(Namespace::DateTime, 1)).unwrap();
    assert_eq!(stored, DateTime::new(2024, 3, 15, 10, 20, 33));
}

// ═══════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn set_and_get_sensor_mac() {
    let mut r = boot();
    connect_app(&mut r);
    r.radio_mut().clear();

    let mac = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
    let reply = command(&mut r, "11101AABBCCDDEEFF");
    assert_eq!(reply[..3], [RESPONSE_MAGIC, 1, STATUS_OK]);
    assert_eq!(reply[3..], mac);

    // The hunt switches to the new address straight away.
    assert_eq!(r.radio().calls.last(), Some(&RadioCall::Scan(MacAddress::new(mac))));

    let reply = command(&mut r, "11102");
    assert_eq!(reply[..3], [RESPONSE_MAGIC, 2, STATUS_OK]);
    assert_eq!(reply[3..], mac);

    let reloaded = block_on(Configuration::load(r.store_mut()));
    assert_eq!(reloaded.mac(MacRole::SensorFilter), MacAddress::new(mac));
}

#[test]
fn truncated_command_changes_nothing() {
    let mut r = boot();
    connect_app(&mut r);
    let before = r.config().clone();

    let reply = command(&mut r, "1110");

    assert_eq!(reply, vec![RESPONSE_MAGIC, 0xFF, Error::InvalidSize.status_code()]);
    assert_eq!(r.config(), &before);
}

#[test]
fn bad_duration_is_rejected() {
    let mut r = boot();
    connect_app(&mut r);

    let reply = command(&mut r, "111040");

    assert_eq!(reply, vec![RESPONSE_MAGIC, 4, Error::InvalidArgument.status_code()]);
    assert_eq!(r.config().on_duration_secs, DEFAULT_ON_DURATION_SECS);
}

#[test]
fn new_duration_applies_to_next_phase() {
    let mut r = boot();
    connect_app(&mut r);
    connect_sensor(&mut r);

    let reply = command(&mut r, "1110445\r\n");
    assert_eq!(reply, vec![RESPONSE_MAGIC, 4, STATUS_OK, 0, 0, 0, 45]);
    // The running phase keeps its alarm.
    assert_eq!(r.alarms().on, Some(DEFAULT_ON_DURATION_SECS));

    handle(&mut r, Event::OnAlarm);
    handle(&mut r, Event::SleepAlarm);
    assert_eq!(r.alarms().on, Some(45));
}

#[test]
fn reboot_acknowledges_first() {
    let mut r = boot();
    connect_app(&mut r);

    let outcome = handle(
        &mut r,
        Event::DataReceived {
            role: Role::PeripheralServing,
            bytes: b"11103",
        },
    );

    assert_eq!(outcome, Outcome::Reboot);
    assert_eq!(r.radio().to_app.last(), Some(&vec![RESPONSE_MAGIC, 3, STATUS_OK]));
}

#[test]
fn configuration_snapshot() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 3);

    let reply = command(&mut r, "11114");

    assert_eq!(reply[..3], [RESPONSE_MAGIC, 14, STATUS_OK]);
    let payload = &reply[3..];
    assert_eq!(payload.len(), 39);
    assert_eq!(payload[..6], DEFAULT_SENSOR_MAC.octets());
    assert_eq!(payload[35..], 3u32.to_be_bytes());
}

#[test]
fn history_commands() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 2);

    let reply = command(&mut r, "111081");
    assert_eq!(reply[..3], [RESPONSE_MAGIC, 8, STATUS_OK]);
    assert_eq!(reply[3], FRAME_MAGIC);
    assert_eq!(reply.len(), 3 + FRAME_LEN);

    let reply = command(&mut r, "11123");
    assert_eq!(reply[..3], [RESPONSE_MAGIC, 23, STATUS_OK]);
    // Last record is id 1.
    assert_eq!(reply[3 + FRAME_LEN - 2..], [0, 1]);

    assert_eq!(command(&mut r, "111091")[..3], [RESPONSE_MAGIC, 9, STATUS_OK]);
    let reply = command(&mut r, "111081");
    assert_eq!(reply, vec![RESPONSE_MAGIC, 8, Error::NotFound.status_code()]);

    assert_eq!(command(&mut r, "11110"), vec![RESPONSE_MAGIC, 10, STATUS_OK]);
    assert_eq!(block_on(HistoryLog::new(r.store_mut()).count()), Ok(0));
}

// ═══════════════════════════════════════════════════════════════════════════
// Relay
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn app_data_without_sentinel_is_forwarded_verbatim() {
    let mut r = boot();
    connect_app(&mut r);
    connect_sensor(&mut r);
    r.radio_mut().clear();

    handle(
        &mut r,
        Event::DataReceived {
            role: Role::PeripheralServing,
            bytes: b"12345 raw",
        },
    );

    assert_eq!(r.radio().to_sensor, vec![b"12345 raw".to_vec()]);
    assert!(r.radio().to_app.is_empty());
}

#[test]
fn app_data_is_dropped_without_sensor() {
    let mut r = boot();
    connect_app(&mut r);

    handle(
        &mut r,
        Event::DataReceived {
            role: Role::PeripheralServing,
            bytes: b"hello",
        },
    );

    assert!(r.radio().to_sensor.is_empty());
}

#[test]
fn sensor_history_frame_is_stored_and_relayed() {
    let mut r = boot();
    connect_app(&mut r);
    connect_sensor(&mut r);
    r.radio_mut().clear();

    let mut frame = [0u8; 44];
    frame[0] = 0x08;
    frame[1] = 9; // day
    frame[2] = 7; // month
    frame[3..5].copy_from_slice(&2024u16.to_be_bytes());
    frame[5] = 6;
    frame[8..12].copy_from_slice(&500u32.to_be_bytes());
    frame[16] = 80;
    frame[41] = 19;
    frame[42..44].copy_from_slice(&40u16.to_be_bytes());

    handle(
        &mut r,
        Event::DataReceived {
            role: Role::CentralHunting,
            bytes: &frame,
        },
    );

    assert_eq!(r.radio().to_app, vec![frame.to_vec()]);
    let stored = block_on(HistoryLog::new(r.store_mut()).read(40)).unwrap();
    assert_eq!(stored.counter, 500);
    assert_eq!(stored.battery, 80);
    assert_eq!(stored.temperature, 19);
    assert_eq!(stored.timestamp, DateTime::new(2024, 7, 9, 6, 0, 0).unwrap());
    // Relay writes leave the local count alone.
    assert_eq!(block_on(HistoryLog::new(r.store_mut()).count()), Ok(0));
}

#[test]
fn live_sample_is_cached() {
    let mut r = boot();
    connect_sensor(&mut r);

    let frame = [0x96, 0x00, 0x10, 0x00, 0x20, 0x00, 0x00, 0x00, 0x07];
    handle(
        &mut r,
        Event::DataReceived {
            role: Role::CentralHunting,
            bytes: &frame,
        },
    );

    let sample = r.live_sample().unwrap();
    assert_eq!((sample.channel1, sample.channel2, sample.counter), (0x10, 0x20, 7));
}

// ═══════════════════════════════════════════════════════════════════════════
// Bulk transfer
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn bulk_transfer_streams_in_batches() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 12);
    r.radio_mut().clear();

    command(&mut r, "11111");
    // The ack leads the first burst.
    assert_eq!(r.radio().to_app[0], vec![RESPONSE_MAGIC, 11, STATUS_OK, 0, 12]);
    assert_eq!(history_frames(&r.radio().to_app), 5);

    let ready = Event::ReadyToSend {
        role: Role::PeripheralServing,
    };
    handle(&mut r, ready);
    assert_eq!(history_frames(&r.radio().to_app), 10);
    assert_eq!(r.transfer().state(), TransferState::Active);

    handle(&mut r, ready);
    assert_eq!(history_frames(&r.radio().to_app), 12);
    assert_eq!(r.transfer().state(), TransferState::Completed);
    assert_eq!(r.transfer().percent_complete(), 100);

    let status = command(&mut r, "11113");
    assert_eq!(status[..3], [RESPONSE_MAGIC, 13, STATUS_OK]);
    assert_eq!(status[4..6], 12u16.to_be_bytes());
}

#[test]
fn busy_link_pauses_transfer() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 8);
    r.radio_mut().clear();
    r.radio_mut().app_budget = Some(3);

    handle(
        &mut r,
        Event::DataReceived {
            role: Role::PeripheralServing,
            bytes: b"11111",
        },
    );
    // One slot went to the ack, the rest to records.
    assert_eq!(r.radio().to_app[0], vec![RESPONSE_MAGIC, 11, STATUS_OK, 0, 8]);
    assert_eq!(r.transfer().sent(), 2);
    assert_eq!(r.transfer().state(), TransferState::Active);

    r.radio_mut().app_budget = None;
    handle(
        &mut r,
        Event::ReadyToSend {
            role: Role::PeripheralServing,
        },
    );
    assert_eq!(r.transfer().sent(), 8);
    assert_eq!(r.transfer().state(), TransferState::Completed);
}

#[test]
fn app_disconnect_cancels_transfer() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 12);
    command(&mut r, "11111");

    handle(
        &mut r,
        Event::LinkDown {
            role: Role::PeripheralServing,
            handle: APP_HANDLE,
        },
    );

    assert_eq!(r.transfer().state(), TransferState::Cancelled);
    assert_eq!(r.transfer().sent(), 5);
    // Advertising resumes for the next app.
    assert_eq!(r.radio().calls.last(), Some(&RadioCall::Advertise));
}

#[test]
fn sleep_stops_running_transfer() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 12);
    command(&mut r, "11111");
    assert!(r.transfer().is_active());

    handle(&mut r, Event::OnAlarm);

    assert_eq!(r.scheduler().state(), DutyCycleState::Sleeping);
    assert_eq!(r.transfer().state(), TransferState::Cancelled);
    assert_eq!(r.transfer().sent(), 5);
}

#[test]
fn delete_all_cancels_running_transfer() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 12);
    command(&mut r, "11111");

    let reply = command(&mut r, "11110");
    assert_eq!(reply, vec![RESPONSE_MAGIC, 10, STATUS_OK]);
    assert_eq!(r.transfer().state(), TransferState::Cancelled);

    // Later ready signals send nothing more.
    r.radio_mut().clear();
    handle(
        &mut r,
        Event::ReadyToSend {
            role: Role::PeripheralServing,
        },
    );
    assert_eq!(history_frames(&r.radio().to_app), 0);
    let ids = block_on(HistoryLog::new(r.store_mut()).list_all_ids()).unwrap();
    assert!(ids.is_empty());
}

#[test]
fn second_start_is_rejected_while_active() {
    let mut r = boot();
    connect_app(&mut r);
    seed_history(&mut r, 12);
    command(&mut r, "11111");

    let reply = command(&mut r, "11111");
    assert_eq!(reply, vec![RESPONSE_MAGIC, 11, Error::AlreadyActive.status_code()]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Packet scan
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn packet_scan_needs_a_target() {
    let mut r = boot();
    connect_app(&mut r);

    let reply = command(&mut r, "11120");
    assert_eq!(reply, vec![RESPONSE_MAGIC, 20, Error::InvalidArgument.status_code()]);
    assert!(!r.packet_scan().is_running());
}

#[test]
fn packet_scan_counts_target_packets() {
    let target = MacAddress::new([1, 2, 3, 4, 5, 6]);
    let mut r = boot();
    connect_app(&mut r);
    command(&mut r, "11118010203040506");
    r.radio_mut().clear();

    assert_eq!(command(&mut r, "11120")[..3], [RESPONSE_MAGIC, 20, STATUS_OK]);
    assert!(r.radio().calls.contains(&RadioCall::StopScan));
    assert!(r.radio().calls.contains(&RadioCall::Passive(target)));

    for rssi in [-60, -55] {
        handle(&mut r, Event::Advertisement { peer: target, rssi });
    }
    handle(
        &mut r,
        Event::Advertisement {
            peer: DEFAULT_SENSOR_MAC,
            rssi: -40,
        },
    );
    seconds(&mut r, 2);

    let reply = command(&mut r, "11121");
    assert_eq!(reply[..3], [RESPONSE_MAGIC, 21, STATUS_OK]);
    assert_eq!(reply[3], 0); // stopped on request
    assert_eq!(reply[4..8], 2u32.to_be_bytes());
    assert_eq!(reply[8] as i8, -55);
    assert_eq!(reply[9..13], 2u32.to_be_bytes());
    // The hunt gets the scanner back.
    assert_eq!(r.radio().calls.last(), Some(&RadioCall::Scan(DEFAULT_SENSOR_MAC)));
}

#[test]
fn packet_scan_ends_after_inactivity() {
    let target = MacAddress::new([1, 2, 3, 4, 5, 6]);
    let mut r = boot();
    connect_app(&mut r);
    command(&mut r, "11118010203040506");
    command(&mut r, "11120");
    handle(&mut r, Event::Advertisement { peer: target, rssi: -70 });
    r.radio_mut().clear();

    seconds(&mut r, 30);

    assert!(!r.packet_scan().is_running());
    let report = r.radio().to_app.last().unwrap();
    assert_eq!(report[..3], [RESPONSE_MAGIC, 21, STATUS_OK]);
    assert_eq!(report[3], 2); // inactivity
}

// ═══════════════════════════════════════════════════════════════════════════
// Identity and filtering
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn strict_filter_drops_impostor_sensor() {
    let impostor = MacAddress::new([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
    let mut r = boot();
    connect_app(&mut r);

    let reply = command(&mut r, "111221");
    assert_eq!(reply, vec![RESPONSE_MAGIC, 22, STATUS_OK, 1]);
    assert!(r.config().strict_mac_filter);
    let stored = block_on(Configuration::load(r.store_mut()));
    assert!(stored.strict_mac_filter);

    r.radio_mut().clear();
    handle(
        &mut r,
        Event::LinkUp {
            role: Role::CentralHunting,
            peer: impostor,
            handle: SENSOR_HANDLE,
        },
    );

    assert!(!r.roles().is_connected(Role::CentralHunting));
    assert!(!r.roles().sensor_connected_this_cycle());
    let calls = &r.radio().calls;
    assert!(calls.contains(&RadioCall::Disconnect(SENSOR_HANDLE)));
    assert_eq!(calls.last(), Some(&RadioCall::Scan(DEFAULT_SENSOR_MAC)));
    // No handshake went to the impostor.
    assert!(r.radio().to_sensor.is_empty());
}

#[test]
fn repeater_identity_is_applied_to_radio() {
    let mut r = boot();
    // Unset at boot: the factory address stays.
    assert!(r.radio().calls.contains(&RadioCall::Identity(None)));
    connect_app(&mut r);

    let identity = MacAddress::new([0xC0, 0x11, 0x22, 0x33, 0x44, 0x55]);
    let reply = command(&mut r, "11116C01122334455");
    assert_eq!(reply[..3], [RESPONSE_MAGIC, 16, STATUS_OK]);
    assert_eq!(r.radio().calls.last(), Some(&RadioCall::Identity(Some(identity))));

    // Applied again on every wake, before the roles come back.
    handle(&mut r, Event::OnAlarm);
    r.radio_mut().clear();
    handle(&mut r, Event::SleepAlarm);
    let calls = &r.radio().calls;
    let applied = calls
        .iter()
        .position(|c| *c == RadioCall::Identity(Some(identity)))
        .unwrap();
    let advertised = calls.iter().position(|c| *c == RadioCall::Advertise).unwrap();
    assert!(applied < advertised);
}
