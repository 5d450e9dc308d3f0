//! nRF52840 glue around the host-testable control plane.
//!
//! Each piece implements one of the library's seams:
//!
//! - [`radio`] - SoftDevice central + peripheral behind [`ble_repeater::ble::Radio`]
//! - [`flash`] - `sequential-storage` map behind [`ble_repeater::storage::FlashDevice`]
//! - [`alarms`] - embassy-time one-shots behind [`ble_repeater::scheduler::AlarmControl`]
//!
//! Tasks never touch the [`ble_repeater::Repeater`]; they post
//! [`FirmwareEvent`]s to [`EVENTS`] and the main loop feeds them in one at
//! a time.

pub mod alarms;
pub mod flash;
pub mod radio;

use ble_repeater::ble::{LinkHandle, Role};
use ble_repeater::config::{NUS_MAX_PAYLOAD, RTC_TICKS_PER_SEC};
use ble_repeater::mac::MacAddress;
use ble_repeater::Event;
use defmt::warn;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Ticker};
use heapless::Vec;

/// One NUS payload.
pub type Payload = Vec<u8, NUS_MAX_PAYLOAD>;

/// Owned form of [`Event`] that can sit in a channel.
#[derive(Clone, defmt::Format)]
pub enum FirmwareEvent {
    Tick,
    OnAlarm,
    SleepAlarm,
    LinkUp {
        role: Role,
        peer: MacAddress,
        handle: LinkHandle,
    },
    LinkDown {
        role: Role,
        handle: LinkHandle,
    },
    Data {
        role: Role,
        bytes: Payload,
    },
    ReadyToSend(Role),
    Advertisement {
        peer: MacAddress,
        rssi: i8,
    },
}

impl FirmwareEvent {
    pub fn as_event(&self) -> Event<'_> {
        match self {
            FirmwareEvent::Tick => Event::Tick,
            FirmwareEvent::OnAlarm => Event::OnAlarm,
            FirmwareEvent::SleepAlarm => Event::SleepAlarm,
            FirmwareEvent::LinkUp { role, peer, handle } => Event::LinkUp {
                role: *role,
                peer: *peer,
                handle: *handle,
            },
            FirmwareEvent::LinkDown { role, handle } => Event::LinkDown {
                role: *role,
                handle: *handle,
            },
            FirmwareEvent::Data { role, bytes } => Event::DataReceived {
                role: *role,
                bytes: bytes.as_slice(),
            },
            FirmwareEvent::ReadyToSend(role) => Event::ReadyToSend { role: *role },
            FirmwareEvent::Advertisement { peer, rssi } => Event::Advertisement {
                peer: *peer,
                rssi: *rssi,
            },
        }
    }
}

/// Queue drained by the main loop.
pub static EVENTS: Channel<CriticalSectionRawMutex, FirmwareEvent, 16> = Channel::new();

/// Post from a synchronous context (SoftDevice callbacks). Drops the
/// event if the main loop is behind, so only use it for data, ready
/// signals and advertisements.
pub fn post(event: FirmwareEvent) {
    if EVENTS.try_send(event).is_err() {
        warn!("event queue full - dropping event");
    }
}

/// Queue a link up/down from task context, waiting for room. The role
/// bookkeeping goes stale if one of these is lost.
pub async fn send_lifecycle(event: FirmwareEvent) {
    EVENTS.send(event).await;
}

/// RTC tick source for the calendar and packet scan timers.
#[embassy_executor::task]
pub async fn ticker_task() -> ! {
    let mut ticker = Ticker::every(Duration::from_hz(u64::from(RTC_TICKS_PER_SEC)));
    loop {
        ticker.next().await;
        EVENTS.send(FirmwareEvent::Tick).await;
    }
}
