//! Store-resident configuration.
//!
//! Loaded once at boot, cached in RAM, and written back field by field
//! when the companion app changes something. Every field falls back to
//! its compiled-in default on its own, so one corrupt record never costs
//! the rest of the configuration.

use crate::config::{
    DEFAULT_EXTENDED_SEARCH_SECS, DEFAULT_ON_DURATION_SECS, DEFAULT_SLEEP_DURATION_SECS,
    DEFAULT_STRICT_MAC_FILTER, FIRMWARE_VERSION, MAX_DURATION_SECS,
};
use crate::error::{Error, Result};
use crate::mac::{MacAddress, MacRole};
use crate::scheduler::{SyncState, Timing};
use crate::storage::{FlashDevice, Namespace, RecordStore};

/// Keys of the settings namespace.
const STRICT_FILTER_KEY: u16 = 4;

/// The three configurable durations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DurationSetting {
    OnDuration,
    SleepDuration,
    ExtendedSearch,
}

impl DurationSetting {
    const fn key(self) -> u16 {
        match self {
            DurationSetting::OnDuration => 1,
            DurationSetting::SleepDuration => 2,
            DurationSetting::ExtendedSearch => 3,
        }
    }

    const fn default_secs(self) -> u32 {
        match self {
            DurationSetting::OnDuration => DEFAULT_ON_DURATION_SECS,
            DurationSetting::SleepDuration => DEFAULT_SLEEP_DURATION_SECS,
            DurationSetting::ExtendedSearch => DEFAULT_EXTENDED_SEARCH_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Configuration {
    pub sensor_mac: MacAddress,
    pub repeater_mac: MacAddress,
    pub scan_target_mac: MacAddress,
    pub on_duration_secs: u32,
    pub sleep_duration_secs: u32,
    pub extended_search_secs: u32,
    pub strict_mac_filter: bool,
    pub firmware_version: [u8; 3],
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            sensor_mac: MacRole::SensorFilter.default_address(),
            repeater_mac: MacRole::RepeaterIdentity.default_address(),
            scan_target_mac: MacRole::ScanTarget.default_address(),
            on_duration_secs: DEFAULT_ON_DURATION_SECS,
            sleep_duration_secs: DEFAULT_SLEEP_DURATION_SECS,
            extended_search_secs: DEFAULT_EXTENDED_SEARCH_SECS,
            strict_mac_filter: DEFAULT_STRICT_MAC_FILTER,
            firmware_version: FIRMWARE_VERSION,
        }
    }
}

/// Length of the snapshot sent for the "get configuration" command.
pub const SNAPSHOT_LEN: usize = 6 * 3 + 4 * 3 + 3 + 1 + 1 + 4;

impl Configuration {
    /// Read every field from the store. Never fails: missing, unreadable
    /// or all-zero values become compiled-in defaults.
    pub async fn load<F: FlashDevice>(store: &mut RecordStore<F>) -> Self {
        let mut config = Self::default();
        for role in MacRole::ALL {
            let mac = match store.load::<MacAddress>(Namespace::MacAllowList, role.key()).await {
                Ok(Some(mac)) => mac.or(role.default_address()),
                Ok(None) => role.default_address(),
                Err(e) => {
                    warn!("settings: {:?} unreadable ({}), using default", role, e);
                    role.default_address()
                }
            };
            *config.mac_slot(role) = mac;
        }
        for setting in [
            DurationSetting::OnDuration,
            DurationSetting::SleepDuration,
            DurationSetting::ExtendedSearch,
        ] {
            let secs = match store.load::<u32>(Namespace::Settings, setting.key()).await {
                Ok(Some(secs)) if valid_duration(secs) => secs,
                Ok(_) => setting.default_secs(),
                Err(e) => {
                    warn!("settings: {:?} unreadable ({}), using default", setting, e);
                    setting.default_secs()
                }
            };
            *config.duration_slot(setting) = secs;
        }
        config.strict_mac_filter = match store.load::<u32>(Namespace::Settings, STRICT_FILTER_KEY).await {
            Ok(Some(flag)) => flag != 0,
            Ok(None) => DEFAULT_STRICT_MAC_FILTER,
            Err(e) => {
                warn!("settings: strict filter unreadable ({}), using default", e);
                DEFAULT_STRICT_MAC_FILTER
            }
        };
        info!(
            "settings: sensor {} on {}s sleep {}s search {}s strict {}",
            config.sensor_mac.octets(),
            config.on_duration_secs,
            config.sleep_duration_secs,
            config.extended_search_secs,
            config.strict_mac_filter
        );
        config
    }

    /// Effective address for `role`.
    pub fn mac(&self, role: MacRole) -> MacAddress {
        match role {
            MacRole::SensorFilter => self.sensor_mac,
            MacRole::RepeaterIdentity => self.repeater_mac,
            MacRole::ScanTarget => self.scan_target_mac,
        }
    }

    pub fn duration(&self, setting: DurationSetting) -> u32 {
        match setting {
            DurationSetting::OnDuration => self.on_duration_secs,
            DurationSetting::SleepDuration => self.sleep_duration_secs,
            DurationSetting::ExtendedSearch => self.extended_search_secs,
        }
    }

    /// Persist `mac` for `role`. Storing [`MacAddress::UNSET`] reverts the
    /// role to its default.
    pub async fn set_mac<F: FlashDevice>(
        &mut self,
        store: &mut RecordStore<F>,
        role: MacRole,
        mac: MacAddress,
    ) -> Result<()> {
        store.save(Namespace::MacAllowList, role.key(), &mac).await?;
        *self.mac_slot(role) = mac.or(role.default_address());
        info!("settings: {:?} set to {}", role, self.mac(role).octets());
        Ok(())
    }

    pub async fn set_duration<F: FlashDevice>(
        &mut self,
        store: &mut RecordStore<F>,
        setting: DurationSetting,
        secs: u32,
    ) -> Result<()> {
        if !valid_duration(secs) {
            return Err(Error::InvalidArgument);
        }
        store.save(Namespace::Settings, setting.key(), &secs).await?;
        *self.duration_slot(setting) = secs;
        info!("settings: {:?} set to {}s", setting, secs);
        Ok(())
    }

    pub async fn set_strict_mac_filter<F: FlashDevice>(
        &mut self,
        store: &mut RecordStore<F>,
        strict: bool,
    ) -> Result<()> {
        store
            .save(Namespace::Settings, STRICT_FILTER_KEY, &u32::from(strict))
            .await?;
        self.strict_mac_filter = strict;
        Ok(())
    }

    /// Durations the scheduler works from.
    pub fn timing(&self) -> Timing {
        Timing {
            on_secs: self.on_duration_secs,
            sleep_secs: self.sleep_duration_secs,
            extended_search_secs: self.extended_search_secs,
        }
    }

    /// Binary snapshot for the companion app: three MACs, three BE
    /// durations, version, strict flag, sync state, history count (BE).
    pub fn snapshot(&self, sync: SyncState, history_count: u32) -> [u8; SNAPSHOT_LEN] {
        let mut out = [0u8; SNAPSHOT_LEN];
        let mut at = 0;
        for role in MacRole::ALL {
            out[at..at + 6].copy_from_slice(&self.mac(role).octets());
            at += 6;
        }
        for secs in [
            self.on_duration_secs,
            self.sleep_duration_secs,
            self.extended_search_secs,
        ] {
            out[at..at + 4].copy_from_slice(&secs.to_be_bytes());
            at += 4;
        }
        out[at..at + 3].copy_from_slice(&self.firmware_version);
        at += 3;
        out[at] = u8::from(self.strict_mac_filter);
        out[at + 1] = match sync {
            SyncState::Normal => 0,
            SyncState::ExtendedSearch => 1,
        };
        at += 2;
        out[at..at + 4].copy_from_slice(&history_count.to_be_bytes());
        out
    }

    fn mac_slot(&mut self, role: MacRole) -> &mut MacAddress {
        match role {
            MacRole::SensorFilter => &mut self.sensor_mac,
            MacRole::RepeaterIdentity => &mut self.repeater_mac,
            MacRole::ScanTarget => &mut self.scan_target_mac,
        }
    }

    fn duration_slot(&mut self, setting: DurationSetting) -> &mut u32 {
        match setting {
            DurationSetting::OnDuration => &mut self.on_duration_secs,
            DurationSetting::SleepDuration => &mut self.sleep_duration_secs,
            DurationSetting::ExtendedSearch => &mut self.extended_search_secs,
        }
    }
}

fn valid_duration(secs: u32) -> bool {
    (1..=MAX_DURATION_SECS).contains(&secs)
}
