//! nRF52840 firmware entry point.
//!
//! Brings up the SoftDevice, mounts the record store, spawns the radio,
//! alarm and tick tasks, then feeds every event to the [`Repeater`] in
//! order. A fatal error or a reboot command ends in a system reset.

#![no_std]
#![no_main]

mod firmware;

use ble_repeater::{Outcome, Repeater};
use cortex_m::peripheral::SCB;
use defmt::{error, info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::interrupt::Priority;
use embassy_time::{Duration, Timer};
use panic_probe as _;
use static_cell::StaticCell;

use ble_repeater::ble::Role;
use ble_repeater::scheduler::Alarm;
use firmware::alarms::{alarm_task, EmbassyAlarms};
use firmware::flash::SequentialFlash;
use firmware::radio::{self, Server, SoftdeviceRadio};
use firmware::{ticker_task, FirmwareEvent, EVENTS};

/// Time for a reboot acknowledgement to leave the radio.
const REBOOT_GRACE: Duration = Duration::from_millis(200);

static SERVER: StaticCell<Server> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("BLE repeater starting");

    // The SoftDevice owns interrupt priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    let sd = radio::enable_softdevice();
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd)));
    unwrap!(spawner.spawn(radio::softdevice_task(sd)));
    unwrap!(spawner.spawn(radio::central_task(sd)));
    unwrap!(spawner.spawn(radio::peripheral_task(sd, server)));
    unwrap!(spawner.spawn(alarm_task(Alarm::On)));
    unwrap!(spawner.spawn(alarm_task(Alarm::Sleep)));
    unwrap!(spawner.spawn(ticker_task()));

    let flash = SequentialFlash::mount(nrf_softdevice::Flash::take(sd)).await;
    // I/O enable line (LED1 on the DK), active low, starts off.
    let io_enable = Output::new(p.P0_13, Level::High, OutputDrive::Standard);
    let radio = SoftdeviceRadio::new(sd, server, io_enable);

    let mut repeater = match Repeater::boot(flash, radio, EmbassyAlarms).await {
        Ok(repeater) => repeater,
        Err(e) => {
            error!("boot failed: {} - resetting", e);
            SCB::sys_reset();
        }
    };
    info!("BLE repeater running");

    loop {
        let event = EVENTS.receive().await;
        match repeater.handle(event.as_event()).await {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Reboot) => {
                warn!("rebooting on request");
                Timer::after(REBOOT_GRACE).await;
                SCB::sys_reset();
            }
            Err(e) => {
                error!("fatal: {} - resetting", e);
                SCB::sys_reset();
            }
        }

        // No TX-complete event reaches us from the GATT server, so every
        // tick doubles as a ready signal while a transfer is running.
        if matches!(event, FirmwareEvent::Tick) && repeater.transfer().is_active() {
            let ready = FirmwareEvent::ReadyToSend(Role::PeripheralServing);
            if let Err(e) = repeater.handle(ready.as_event()).await {
                error!("fatal: {} - resetting", e);
                SCB::sys_reset();
            }
        }
    }
}
