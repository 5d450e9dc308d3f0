//! Mock radio and alarms for driving a [`Repeater`] on the host.

#![allow(dead_code)]

use ble_repeater::ble::{LinkHandle, Radio, Role, SendStatus};
use ble_repeater::config::{DEFAULT_SENSOR_MAC, RTC_TICKS_PER_SEC};
use ble_repeater::mac::MacAddress;
use ble_repeater::scheduler::{Alarm, AlarmControl, TimerFault};
use ble_repeater::storage::MemoryFlash;
use ble_repeater::{Event, Outcome, Repeater};
use embassy_futures::block_on;

pub const APP_MAC: MacAddress = MacAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
pub const APP_HANDLE: LinkHandle = 1;
pub const SENSOR_HANDLE: LinkHandle = 2;

pub type TestRepeater = Repeater<MemoryFlash<64>, MockRadio, MockAlarms>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioCall {
    Scan(MacAddress),
    Passive(MacAddress),
    StopScan,
    Advertise,
    StopAdvertise,
    Disconnect(LinkHandle),
    Io(bool),
    Identity(Option<MacAddress>),
}

#[derive(Default)]
pub struct MockRadio {
    pub calls: Vec<RadioCall>,
    pub to_app: Vec<Vec<u8>>,
    pub to_sensor: Vec<Vec<u8>>,
    /// Sends to the app accepted before the link reports busy.
    pub app_budget: Option<usize>,
}

impl MockRadio {
    pub fn clear(&mut self) {
        self.calls.clear();
        self.to_app.clear();
        self.to_sensor.clear();
    }
}

impl Radio for MockRadio {
    fn start_scan(&mut self, target: MacAddress) {
        self.calls.push(RadioCall::Scan(target));
    }

    fn start_passive_scan(&mut self, target: MacAddress) {
        self.calls.push(RadioCall::Passive(target));
    }

    fn stop_scan(&mut self) {
        self.calls.push(RadioCall::StopScan);
    }

    fn start_advertising(&mut self) {
        self.calls.push(RadioCall::Advertise);
    }

    fn stop_advertising(&mut self) {
        self.calls.push(RadioCall::StopAdvertise);
    }

    fn disconnect(&mut self, handle: LinkHandle) {
        self.calls.push(RadioCall::Disconnect(handle));
    }

    fn set_identity(&mut self, address: Option<MacAddress>) {
        self.calls.push(RadioCall::Identity(address));
    }

    fn set_io_enabled(&mut self, enabled: bool) {
        self.calls.push(RadioCall::Io(enabled));
    }

    fn send(&mut self, role: Role, bytes: &[u8]) -> SendStatus {
        match role {
            Role::PeripheralServing => {
                if let Some(budget) = self.app_budget.as_mut() {
                    if *budget == 0 {
                        return SendStatus::Busy;
                    }
                    *budget -= 1;
                }
                self.to_app.push(bytes.to_vec());
            }
            Role::CentralHunting => self.to_sensor.push(bytes.to_vec()),
        }
        SendStatus::Sent
    }
}

#[derive(Default)]
pub struct MockAlarms {
    pub on: Option<u32>,
    pub sleep: Option<u32>,
    pub fail: bool,
}

impl AlarmControl for MockAlarms {
    fn arm(&mut self, alarm: Alarm, secs: u32) -> Result<(), TimerFault> {
        if self.fail {
            return Err(TimerFault);
        }
        match alarm {
            Alarm::On => self.on = Some(secs),
            Alarm::Sleep => self.sleep = Some(secs),
        }
        Ok(())
    }

    fn cancel(&mut self, alarm: Alarm) {
        match alarm {
            Alarm::On => self.on = None,
            Alarm::Sleep => self.sleep = None,
        }
    }
}

pub fn boot() -> TestRepeater {
    block_on(Repeater::boot(
        MemoryFlash::new(),
        MockRadio::default(),
        MockAlarms::default(),
    ))
    .unwrap()
}

pub fn handle(repeater: &mut TestRepeater, event: Event<'_>) -> Outcome {
    block_on(repeater.handle(event)).unwrap()
}

/// Send `text` from the app and return the last frame the app received.
pub fn command(repeater: &mut TestRepeater, text: &str) -> Vec<u8> {
    handle(
        repeater,
        Event::DataReceived {
            role: Role::PeripheralServing,
            bytes: text.as_bytes(),
        },
    );
    repeater
        .radio()
        .to_app
        .last()
        .cloned()
        .expect("no response to the app")
}

pub fn connect_app(repeater: &mut TestRepeater) {
    handle(
        repeater,
        Event::LinkUp {
            role: Role::PeripheralServing,
            peer: APP_MAC,
            handle: APP_HANDLE,
        },
    );
}

pub fn connect_sensor(repeater: &mut TestRepeater) {
    handle(
        repeater,
        Event::LinkUp {
            role: Role::CentralHunting,
            peer: DEFAULT_SENSOR_MAC,
            handle: SENSOR_HANDLE,
        },
    );
}

/// Advance the clock by whole seconds.
pub fn seconds(repeater: &mut TestRepeater, secs: u32) {
    for _ in 0..secs * u32::from(RTC_TICKS_PER_SEC) {
        handle(repeater, Event::Tick);
    }
}
