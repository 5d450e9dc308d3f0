//! Duty-cycle scheduler.
//!
//! Two one-shot alarms drive the cycle: the on-alarm ends an ACTIVE phase
//! and the sleep-alarm ends a SLEEPING phase. The scheduler decides the
//! next duration and arms the alarm; tearing down and re-arming the radio
//! roles is the caller's job, done between [`DutyCycleScheduler::finish_cycle`]
//! and [`DutyCycleScheduler::enter_sleeping`] (and between
//! [`DutyCycleScheduler::begin_wake`] and [`DutyCycleScheduler::enter_active`]).

use crate::config::EXTENDED_SEARCH_SLEEP_SECS;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DutyCycleState {
    Active,
    Sleeping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncState {
    /// Configured on/sleep durations.
    Normal,
    /// Long search window, short fixed sleep.
    ExtendedSearch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alarm {
    /// Ends an ACTIVE phase.
    On,
    /// Ends a SLEEPING phase.
    Sleep,
}

/// The alarm hardware refused to arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerFault;

/// One-shot alarms. Arming an alarm that is already pending restarts it.
pub trait AlarmControl {
    fn arm(&mut self, alarm: Alarm, secs: u32) -> core::result::Result<(), TimerFault>;
    fn cancel(&mut self, alarm: Alarm);
}

/// Durations the scheduler picks from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    pub on_secs: u32,
    pub sleep_secs: u32,
    pub extended_search_secs: u32,
}

#[derive(Debug)]
pub struct DutyCycleScheduler {
    state: DutyCycleState,
    sync: SyncState,
    failed_cycles: u8,
    max_failed_cycles: u8,
}

impl DutyCycleScheduler {
    pub const fn new(max_failed_cycles: u8) -> Self {
        Self {
            state: DutyCycleState::Sleeping,
            sync: SyncState::Normal,
            failed_cycles: 0,
            max_failed_cycles,
        }
    }

    pub fn state(&self) -> DutyCycleState {
        self.state
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub fn failed_cycles(&self) -> u8 {
        self.failed_cycles
    }

    /// Whether `alarm` belongs to the current phase. A late alarm from a
    /// phase that already ended is stale and must be ignored.
    pub fn accepts(&self, alarm: Alarm) -> bool {
        matches!(
            (self.state, alarm),
            (DutyCycleState::Active, Alarm::On) | (DutyCycleState::Sleeping, Alarm::Sleep)
        )
    }

    /// ACTIVE -> SLEEPING, step 1: account for the cycle that just ended.
    pub fn finish_cycle(&mut self, sensor_connected: bool) {
        if sensor_connected {
            self.failed_cycles = 0;
            return;
        }
        self.failed_cycles = self.failed_cycles.saturating_add(1);
        info!(
            "sched: no sensor this cycle ({}/{})",
            self.failed_cycles, self.max_failed_cycles
        );
        if self.failed_cycles >= self.max_failed_cycles && self.sync == SyncState::Normal {
            self.sync = SyncState::ExtendedSearch;
            warn!("sched: entering extended search");
        }
    }

    /// ACTIVE -> SLEEPING, steps 3-4: arm the sleep-alarm and enter
    /// SLEEPING. Returns the sleep duration.
    pub fn enter_sleeping<A: AlarmControl>(&mut self, alarms: &mut A, timing: &Timing) -> Result<u32> {
        let secs = match self.sync {
            SyncState::Normal => timing.sleep_secs,
            SyncState::ExtendedSearch => EXTENDED_SEARCH_SLEEP_SECS,
        };
        arm(alarms, Alarm::Sleep, secs)?;
        self.state = DutyCycleState::Sleeping;
        info!("sched: SLEEPING for {}s ({:?})", secs, self.sync);
        Ok(secs)
    }

    /// SLEEPING -> ACTIVE, step 1. The per-cycle sensor flag lives with the
    /// connection roles; this only cancels a pending sleep-alarm.
    pub fn begin_wake<A: AlarmControl>(&mut self, alarms: &mut A) {
        alarms.cancel(Alarm::Sleep);
    }

    /// SLEEPING -> ACTIVE, steps 3 and 5: arm the on-alarm and enter ACTIVE.
    /// Also used at boot. Returns the active duration.
    pub fn enter_active<A: AlarmControl>(&mut self, alarms: &mut A, timing: &Timing) -> Result<u32> {
        let secs = self.active_secs(timing);
        arm(alarms, Alarm::On, secs)?;
        self.state = DutyCycleState::Active;
        info!("sched: ACTIVE for {}s ({:?})", secs, self.sync);
        Ok(secs)
    }

    /// The hunted sensor just connected. In extended search this drops
    /// straight back to NORMAL and restarts the on-alarm with the normal
    /// on-duration. Returns `true` when that resync happened.
    pub fn on_sensor_connected<A: AlarmControl>(
        &mut self,
        alarms: &mut A,
        timing: &Timing,
    ) -> Result<bool> {
        self.failed_cycles = 0;
        if self.sync != SyncState::ExtendedSearch {
            return Ok(false);
        }
        self.sync = SyncState::Normal;
        info!("sched: sensor found, back to NORMAL");
        if self.state == DutyCycleState::Active {
            arm(alarms, Alarm::On, timing.on_secs)?;
        }
        Ok(true)
    }

    fn active_secs(&self, timing: &Timing) -> u32 {
        match self.sync {
            SyncState::Normal => timing.on_secs,
            SyncState::ExtendedSearch => timing.extended_search_secs,
        }
    }
}

fn arm<A: AlarmControl>(alarms: &mut A, alarm: Alarm, secs: u32) -> Result<()> {
    alarms.arm(alarm, secs).map_err(|TimerFault| {
        error!("sched: failed to arm {:?} alarm", alarm);
        Error::TimerArm
    })
}
