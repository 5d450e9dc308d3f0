//! The repeater's event loop state.
//!
//! [`Repeater`] owns the store, the radio, the alarms and every
//! component. The firmware turns SoftDevice callbacks and timer expiries
//! into [`Event`]s and feeds them to [`Repeater::handle`] one at a time,
//! so no component ever sees re-entrant calls.

use crate::ble::roles::{LinkUp, RoleManager};
use crate::ble::scan_mode::{PacketScan, ScanReport};
use crate::ble::sensor::{self, LiveSample, SensorFrame};
use crate::ble::{LinkHandle, Radio, Role, SendStatus};
use crate::calendar::{Calendar, DateTime};
use crate::command::response::STATUS_OK;
use crate::command::{self, Command, Inbound, Response};
use crate::config::{BULK_BATCH_SIZE, MAX_FAILED_CYCLES};
use crate::error::{Error, Result};
use crate::history::{HistoryLog, SequenceId};
use crate::mac::{MacAddress, MacRole};
use crate::scheduler::{Alarm, AlarmControl, DutyCycleScheduler};
use crate::settings::Configuration;
use crate::storage::{FlashDevice, Namespace, RecordStore};
use crate::transfer::{encode_frame, BulkTransfer};

/// Key of the wall-clock checkpoint in [`Namespace::DateTime`].
const DATETIME_KEY: u16 = 1;

/// Code of the stop-packet-scan command, reused for unsolicited reports.
const PACKET_SCAN_REPORT_CODE: u8 = 21;

/// Everything the control plane reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event<'a> {
    /// Periodic RTC tick.
    Tick,
    /// The on-alarm expired (end of ACTIVE).
    OnAlarm,
    /// The sleep-alarm expired (end of SLEEPING).
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
    DataReceived {
        role: Role,
        bytes: &'a [u8],
    },
    ReadyToSend {
        role: Role,
    },
    /// Advertisement seen while packet scan mode owns the scanner.
    Advertisement {
        peer: MacAddress,
        rssi: i8,
    },
}

/// What the firmware loop should do after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Continue,
    Reboot,
}

pub struct Repeater<F, R, A> {
    store: RecordStore<F>,
    radio: R,
    alarms: A,
    config: Configuration,
    scheduler: DutyCycleScheduler,
    roles: RoleManager,
    transfer: BulkTransfer,
    calendar: Calendar,
    scan: PacketScan,
    live: Option<LiveSample>,
}

impl<F: FlashDevice, R: Radio, A: AlarmControl> Repeater<F, R, A> {
    /// Load configuration and clock, check the history log, and start the
    /// first ACTIVE phase. Fails only if the on-alarm cannot be armed.
    pub async fn boot(flash: F, radio: R, alarms: A) -> Result<Self> {
        let mut store = RecordStore::new(flash);
        let config = Configuration::load(&mut store).await;

        let start = match store.load::<DateTime>(Namespace::DateTime, DATETIME_KEY).await {
            Ok(Some(now)) => now,
            Ok(None) => DateTime::EPOCH,
            Err(e) => {
                warn!("boot: stored time unreadable ({}), using epoch", e);
                DateTime::EPOCH
            }
        };

        match HistoryLog::new(&mut store).check_consistency().await {
            Ok(count) => info!("boot: {} history records appended so far", count),
            Err(e) => warn!("boot: history check failed ({})", e),
        }

        let mut repeater = Self {
            store,
            radio,
            alarms,
            config,
            scheduler: DutyCycleScheduler::new(MAX_FAILED_CYCLES),
            roles: RoleManager::new(),
            transfer: BulkTransfer::new(BULK_BATCH_SIZE),
            calendar: Calendar::new(start),
            scan: PacketScan::new(),
            live: None,
        };
        repeater.wake().await?;
        Ok(repeater)
    }

    /// Process one event. `Err` is always fatal ([`Error::TimerArm`]);
    /// every other fault is logged and absorbed here.
    pub async fn handle(&mut self, event: Event<'_>) -> Result<Outcome> {
        match event {
            Event::Tick => {
                if self.calendar.on_tick() {
                    if let Some(report) = self.scan.on_second() {
                        self.finish_packet_scan(report);
                    }
                }
            }
            Event::OnAlarm => {
                if self.scheduler.accepts(Alarm::On) {
                    self.sleep()?;
                } else {
                    debug!("app: stale on-alarm ignored");
                }
            }
            Event::SleepAlarm => {
                if self.scheduler.accepts(Alarm::Sleep) {
                    self.wake().await?;
                } else {
                    debug!("app: stale sleep-alarm ignored");
                }
            }
            Event::LinkUp { role, peer, handle } => self.on_link_up(role, peer, handle)?,
            Event::LinkDown { role, handle } => {
                let sensor = self.config.sensor_mac;
                let was_tracked = self.roles.on_link_down(&mut self.radio, role, handle, sensor);
                if was_tracked && role == Role::PeripheralServing && self.transfer.cancel() {
                    warn!("app: app link lost, transfer cancelled");
                }
            }
            Event::DataReceived {
                role: Role::PeripheralServing,
                bytes,
            } => return Ok(self.on_app_data(bytes).await),
            Event::DataReceived {
                role: Role::CentralHunting,
                bytes,
            } => self.on_sensor_data(bytes).await,
            Event::ReadyToSend {
                role: Role::PeripheralServing,
            } => {
                self.transfer.pump(&mut self.store, &mut self.radio).await;
            }
            Event::ReadyToSend {
                role: Role::CentralHunting,
            } => {}
            Event::Advertisement { peer, rssi } => {
                self.scan.on_advertisement(peer, rssi);
            }
        }
        Ok(Outcome::Continue)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Duty cycle
    // ═══════════════════════════════════════════════════════════════════════

    /// ACTIVE -> SLEEPING.
    fn sleep(&mut self) -> Result<()> {
        self.scheduler
            .finish_cycle(self.roles.sensor_connected_this_cycle());

        if self.transfer.cancel() {
            info!("app: transfer stopped for sleep");
        }
        if let Some(report) = self.scan.stop() {
            self.finish_packet_scan(report);
        }
        self.roles.disarm(&mut self.radio);
        self.radio.set_io_enabled(false);

        self.scheduler
            .enter_sleeping(&mut self.alarms, &self.config.timing())?;
        Ok(())
    }

    /// SLEEPING -> ACTIVE (and the boot entry into ACTIVE).
    async fn wake(&mut self) -> Result<()> {
        self.roles.reset_cycle();
        self.scheduler.begin_wake(&mut self.alarms);

        self.radio.set_io_enabled(true);
        self.apply_identity();
        self.roles.arm(&mut self.radio, self.config.sensor_mac);

        // Best effort: losing one checkpoint only costs drift after a reset.
        let now = self.calendar.now();
        if let Err(e) = self.store.save(Namespace::DateTime, DATETIME_KEY, &now).await {
            warn!("app: time checkpoint failed ({})", e);
        }

        self.scheduler
            .enter_active(&mut self.alarms, &self.config.timing())?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Links
    // ═══════════════════════════════════════════════════════════════════════

    fn on_link_up(&mut self, role: Role, peer: MacAddress, handle: LinkHandle) -> Result<()> {
        let outcome = self.roles.on_link_up(
            &mut self.radio,
            role,
            peer,
            handle,
            self.config.sensor_mac,
            self.config.strict_mac_filter,
        );
        if outcome != LinkUp::Sensor {
            return Ok(());
        }
        self.scheduler
            .on_sensor_connected(&mut self.alarms, &self.config.timing())?;

        let sync = sensor::time_sync(&self.calendar.now());
        for payload in [sync.as_bytes(), sensor::REQUEST_LIVE_SAMPLE, sensor::REQUEST_HISTORY] {
            if self.radio.send(Role::CentralHunting, payload) != SendStatus::Sent {
                warn!("app: sensor handshake send failed");
                break;
            }
        }
        Ok(())
    }

    async fn on_sensor_data(&mut self, bytes: &[u8]) {
        match SensorFrame::parse(bytes) {
            SensorFrame::Live(sample) => {
                debug!("app: live sample counter {}", sample.counter);
                self.live = Some(sample);
            }
            SensorFrame::History { id, record } => {
                if let Err(e) = HistoryLog::new(&mut self.store).append_at(&record, id).await {
                    error!("app: relay record {} not stored ({})", id, e);
                }
            }
            SensorFrame::Opaque => {}
        }
        if self.roles.is_connected(Role::PeripheralServing) {
            self.send_to_app(bytes);
        }
    }

    async fn on_app_data(&mut self, bytes: &[u8]) -> Outcome {
        match command::parse(bytes) {
            Inbound::Forward(payload) => {
                if !self.roles.is_connected(Role::CentralHunting) {
                    debug!("app: no sensor link, {} bytes dropped", payload.len());
                } else if self.radio.send(Role::CentralHunting, payload) != SendStatus::Sent {
                    warn!("app: relay to sensor failed");
                }
                Outcome::Continue
            }
            Inbound::Rejected { code, reason } => {
                warn!("app: command rejected ({:?})", reason);
                self.send_to_app(Response::rejected(code, reason).as_bytes());
                Outcome::Continue
            }
            Inbound::Command { code, command } => {
                info!("app: command {}", code);
                let (response, outcome) = match self.execute(code, command).await {
                    Ok(done) => done,
                    Err(e) => {
                        warn!("app: command {} failed ({})", code, e);
                        (Response::error(code, e), Outcome::Continue)
                    }
                };
                self.send_to_app(response.as_bytes());
                // The start ack goes out ahead of the first burst so a
                // full link cannot swallow it.
                if command == Command::StartTransfer && response.status() == STATUS_OK {
                    self.transfer.pump(&mut self.store, &mut self.radio).await;
                }
                outcome
            }
        }
    }

    /// Unset means the radio keeps its factory address.
    fn apply_identity(&mut self) {
        let identity = self.config.repeater_mac;
        self.radio
            .set_identity((!identity.is_unset()).then_some(identity));
    }

    fn send_to_app(&mut self, bytes: &[u8]) {
        match self.radio.send(Role::PeripheralServing, bytes) {
            SendStatus::Sent => {}
            SendStatus::Busy => warn!("app: app link busy, {} bytes dropped", bytes.len()),
            SendStatus::Failed => warn!("app: send to app failed"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════════

    async fn execute(&mut self, code: u8, command: Command) -> Result<(Response, Outcome)> {
        let response = match command {
            Command::SetMac(role, mac) => {
                self.config.set_mac(&mut self.store, role, mac).await?;
                match role {
                    MacRole::SensorFilter => self.roles.retarget(&mut self.radio, self.config.sensor_mac),
                    MacRole::RepeaterIdentity => self.apply_identity(),
                    MacRole::ScanTarget => {}
                }
                Response::ok(code, &self.config.mac(role).octets())
            }
            Command::GetMac(role) => Response::ok(code, &self.config.mac(role).octets()),
            Command::Reboot => {
                warn!("app: reboot requested");
                return Ok((Response::ok(code, &[]), Outcome::Reboot));
            }
            Command::SetDuration(setting, secs) => {
                self.config
                    .set_duration(&mut self.store, setting, secs)
                    .await?;
                Response::ok(code, &secs.to_be_bytes())
            }
            Command::SetDateTime(now) => {
                self.store.save(Namespace::DateTime, DATETIME_KEY, &now).await?;
                self.calendar.set(now);
                Response::ok(code, &now.to_wire())
            }
            Command::GetDateTime => Response::ok(code, &self.calendar.now().to_wire()),
            Command::GetHistory(id) => {
                let record = HistoryLog::new(&mut self.store).read(id).await?;
                Response::ok(code, &encode_frame(id, &record))
            }
            Command::DeleteHistory(id) => {
                HistoryLog::new(&mut self.store).delete(id).await?;
                Response::ok(code, &id.to_be_bytes())
            }
            Command::DeleteAllHistory => {
                self.transfer.cancel();
                HistoryLog::new(&mut self.store).delete_all().await?;
                Response::ok(code, &[])
            }
            Command::StartTransfer => {
                let total = self.transfer.begin(&mut self.store).await?;
                let total = u16::try_from(total).unwrap_or(u16::MAX);
                Response::ok(code, &total.to_be_bytes())
            }
            Command::StopTransfer => {
                self.transfer.cancel();
                Response::ok(code, &self.transfer.status().encode())
            }
            Command::TransferStatus => Response::ok(code, &self.transfer.status().encode()),
            Command::GetConfiguration => {
                let count = HistoryLog::new(&mut self.store).count().await.unwrap_or(0);
                let snapshot = self.config.snapshot(self.scheduler.sync_state(), count);
                Response::ok(code, &snapshot)
            }
            Command::StartPacketScan => {
                self.scan.start(self.config.scan_target_mac)?;
                self.roles.pause_hunting(&mut self.radio);
                self.radio.start_passive_scan(self.config.scan_target_mac);
                Response::ok(code, &self.config.scan_target_mac.octets())
            }
            Command::StopPacketScan => {
                let report = self.scan.stop().ok_or(Error::NotFound)?;
                self.release_scanner();
                Response::ok(code, &report.encode())
            }
            Command::SetStrictFilter(strict) => {
                self.config
                    .set_strict_mac_filter(&mut self.store, strict)
                    .await?;
                Response::ok(code, &[u8::from(strict)])
            }
            Command::GetLastHistory => {
                let mut log = HistoryLog::new(&mut self.store);
                let count = log.count().await?;
                let record = log.read_last().await?;
                let id = SequenceId::try_from(count - 1).map_err(|_| Error::CorruptRecord)?;
                Response::ok(code, &encode_frame(id, &record))
            }
        };
        Ok((response, Outcome::Continue))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Packet scan
    // ═══════════════════════════════════════════════════════════════════════

    /// A scan ended on its own (timeout or sleep): hand the scanner back
    /// and tell the app.
    fn finish_packet_scan(&mut self, report: ScanReport) {
        self.release_scanner();
        if self.roles.is_connected(Role::PeripheralServing) {
            self.send_to_app(Response::ok(PACKET_SCAN_REPORT_CODE, &report.encode()).as_bytes());
        }
    }

    fn release_scanner(&mut self) {
        self.radio.stop_scan();
        self.roles
            .resume_hunting(&mut self.radio, self.config.sensor_mac);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn scheduler(&self) -> &DutyCycleScheduler {
        &self.scheduler
    }

    pub fn roles(&self) -> &RoleManager {
        &self.roles
    }

    pub fn transfer(&self) -> &BulkTransfer {
        &self.transfer
    }

    pub fn now(&self) -> DateTime {
        self.calendar.now()
    }

    pub fn live_sample(&self) -> Option<LiveSample> {
        self.live
    }

    pub fn packet_scan(&self) -> &PacketScan {
        &self.scan
    }

    pub fn store_mut(&mut self) -> &mut RecordStore<F> {
        &mut self.store
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn alarms(&self) -> &A {
        &self.alarms
    }

    pub fn alarms_mut(&mut self) -> &mut A {
        &mut self.alarms
    }
}
