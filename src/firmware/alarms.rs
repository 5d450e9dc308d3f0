//! The duty cycle's two one-shot alarms on top of embassy-time.
//!
//! Arming or cancelling only signals the alarm's task; the task restarts
//! its timer whenever a new signal arrives, so re-arming never leaves a
//! second timer running.

use ble_repeater::scheduler::{Alarm, AlarmControl, TimerFault};
use defmt::debug;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use super::{FirmwareEvent, EVENTS};

/// `Some(secs)` arms, `None` cancels.
type AlarmSignal = Signal<CriticalSectionRawMutex, Option<u32>>;

static ON_ALARM: AlarmSignal = Signal::new();
static SLEEP_ALARM: AlarmSignal = Signal::new();

fn signal(alarm: Alarm) -> &'static AlarmSignal {
    match alarm {
        Alarm::On => &ON_ALARM,
        Alarm::Sleep => &SLEEP_ALARM,
    }
}

/// Handle passed to the repeater.
pub struct EmbassyAlarms;

impl AlarmControl for EmbassyAlarms {
    fn arm(&mut self, alarm: Alarm, secs: u32) -> Result<(), TimerFault> {
        if secs == 0 {
            return Err(TimerFault);
        }
        signal(alarm).signal(Some(secs));
        Ok(())
    }

    fn cancel(&mut self, alarm: Alarm) {
        signal(alarm).signal(None);
    }
}

/// One task per alarm (`pool_size = 2`).
#[embassy_executor::task(pool_size = 2)]
pub async fn alarm_task(alarm: Alarm) -> ! {
    let control = signal(alarm);
    let mut pending = control.wait().await;
    loop {
        let Some(secs) = pending else {
            pending = control.wait().await;
            continue;
        };
        match select(Timer::after(Duration::from_secs(u64::from(secs))), control.wait()).await {
            Either::First(()) => {
                debug!("{} alarm expired after {} s", alarm, secs);
                let event = match alarm {
                    Alarm::On => FirmwareEvent::OnAlarm,
                    Alarm::Sleep => FirmwareEvent::SleepAlarm,
                };
                EVENTS.send(event).await;
                pending = control.wait().await;
            }
            Either::Second(next) => pending = next,
        }
    }
}
