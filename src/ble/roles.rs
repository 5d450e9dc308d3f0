//! Connection role manager.
//!
//! Tracks at most one session per role and keeps the radio doing the
//! right thing around them: scanning for the sensor while no central link
//! exists, advertising while no app is connected, and neither while the
//! roles are disarmed (SLEEPING).

use super::{LinkHandle, Radio, Role};
use crate::mac::MacAddress;

/// A live link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Session {
    pub role: Role,
    pub handle: LinkHandle,
    pub peer: MacAddress,
}

/// What a link-up event turned into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkUp {
    /// The hunted sensor is connected.
    Sensor,
    /// The companion app is connected.
    App,
    /// The link was dropped (filtered peer, role disarmed, or a second
    /// link for an occupied role).
    Rejected,
}

#[derive(Debug, Default)]
pub struct RoleManager {
    central: Option<Session>,
    peripheral: Option<Session>,
    armed: bool,
    hunting_paused: bool,
    sensor_connected_this_cycle: bool,
}

impl RoleManager {
    pub const fn new() -> Self {
        Self {
            central: None,
            peripheral: None,
            armed: false,
            hunting_paused: false,
            sensor_connected_this_cycle: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn session(&self, role: Role) -> Option<&Session> {
        match role {
            Role::CentralHunting => self.central.as_ref(),
            Role::PeripheralServing => self.peripheral.as_ref(),
        }
    }

    pub fn is_connected(&self, role: Role) -> bool {
        self.session(role).is_some()
    }

    pub fn sensor_connected_this_cycle(&self) -> bool {
        self.sensor_connected_this_cycle
    }

    /// Start of an ACTIVE phase.
    pub fn reset_cycle(&mut self) {
        self.sensor_connected_this_cycle = false;
    }

    /// Start hunting and advertising for whichever role has no session.
    /// Calling it while armed is a no-op.
    pub fn arm<R: Radio>(&mut self, radio: &mut R, sensor: MacAddress) {
        if self.armed {
            return;
        }
        self.armed = true;
        if self.central.is_none() && !self.hunting_paused {
            radio.start_scan(sensor);
        }
        if self.peripheral.is_none() {
            radio.start_advertising();
        }
        debug!("roles: armed");
    }

    /// Stop scanning and advertising and drop both links. Calling it
    /// while disarmed with no sessions is a no-op.
    pub fn disarm<R: Radio>(&mut self, radio: &mut R) {
        if !self.armed && self.central.is_none() && self.peripheral.is_none() {
            return;
        }
        if self.armed {
            if !self.hunting_paused {
                radio.stop_scan();
            }
            radio.stop_advertising();
        }
        self.armed = false;
        for session in [self.central.take(), self.peripheral.take()].into_iter().flatten() {
            info!("roles: dropping {:?} link {}", session.role, session.handle);
            radio.disconnect(session.handle);
        }
        debug!("roles: disarmed");
    }

    /// Handle a new link. `filter` is the allow-listed sensor address and
    /// `strict` whether a central link to anyone else is dropped.
    pub fn on_link_up<R: Radio>(
        &mut self,
        radio: &mut R,
        role: Role,
        peer: MacAddress,
        handle: LinkHandle,
        filter: MacAddress,
        strict: bool,
    ) -> LinkUp {
        if !self.armed {
            warn!("roles: {:?} link while disarmed, dropping", role);
            radio.disconnect(handle);
            return LinkUp::Rejected;
        }
        match role {
            Role::CentralHunting => {
                if self.central.is_some() {
                    radio.disconnect(handle);
                    return LinkUp::Rejected;
                }
                if strict && peer != filter {
                    warn!("roles: central peer {} is not the sensor, dropping", peer.octets());
                    radio.disconnect(handle);
                    if !self.hunting_paused {
                        radio.start_scan(filter);
                    }
                    return LinkUp::Rejected;
                }
                self.central = Some(Session { role, handle, peer });
                self.sensor_connected_this_cycle = true;
                info!("roles: sensor {} connected (handle {})", peer.octets(), handle);
                LinkUp::Sensor
            }
            Role::PeripheralServing => {
                if self.peripheral.is_some() {
                    radio.disconnect(handle);
                    return LinkUp::Rejected;
                }
                radio.stop_advertising();
                self.peripheral = Some(Session { role, handle, peer });
                info!("roles: app {} connected (handle {})", peer.octets(), handle);
                LinkUp::App
            }
        }
    }

    /// Handle a lost link. Returns `true` if it was a tracked session.
    /// While armed the role goes back to scanning or advertising.
    pub fn on_link_down<R: Radio>(
        &mut self,
        radio: &mut R,
        role: Role,
        handle: LinkHandle,
        sensor: MacAddress,
    ) -> bool {
        let slot = match role {
            Role::CentralHunting => &mut self.central,
            Role::PeripheralServing => &mut self.peripheral,
        };
        if slot.map(|s| s.handle) != Some(handle) {
            return false;
        }
        *slot = None;
        info!("roles: {:?} link {} down", role, handle);
        if self.armed {
            match role {
                Role::CentralHunting if !self.hunting_paused => radio.start_scan(sensor),
                Role::CentralHunting => {}
                Role::PeripheralServing => radio.start_advertising(),
            }
        }
        true
    }

    /// The sensor address changed: drop the current sensor link and
    /// restart the hunt for `sensor`.
    pub fn retarget<R: Radio>(&mut self, radio: &mut R, sensor: MacAddress) {
        if let Some(session) = self.central.take() {
            radio.disconnect(session.handle);
        }
        if self.armed && !self.hunting_paused {
            radio.stop_scan();
            radio.start_scan(sensor);
        }
    }

    /// Hand the scanner to packet scan mode.
    pub fn pause_hunting<R: Radio>(&mut self, radio: &mut R) {
        if self.hunting_paused {
            return;
        }
        self.hunting_paused = true;
        if self.armed && self.central.is_none() {
            radio.stop_scan();
        }
    }

    /// Take the scanner back from packet scan mode.
    pub fn resume_hunting<R: Radio>(&mut self, radio: &mut R, sensor: MacAddress) {
        if !self.hunting_paused {
            return;
        }
        self.hunting_paused = false;
        if self.armed && self.central.is_none() {
            radio.start_scan(sensor);
        }
    }
}
