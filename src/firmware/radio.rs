//! SoftDevice S140 radio: NUS client toward the sensor, NUS server toward
//! the companion app.
//!
//! [`SoftdeviceRadio`] implements the library's [`Radio`] trait. Role
//! changes are posted as the *desired* state of each role's task through a
//! [`Signal`] (latest wins); sends go straight to the SoftDevice through
//! the connections registered in [`LINKS`].
//!
//! The central task hunts with a whitelist on the sensor's address, runs
//! the NUS client while linked, and falls back to passive scanning when
//! packet scan mode asks for it. The peripheral task advertises and runs
//! the NUS server for one app at a time.

use core::cell::RefCell;

use ble_repeater::ble::{LinkHandle, Radio, Role, SendStatus};
use ble_repeater::config::{
    BLE_ADV_INTERVAL, BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN, BLE_SCAN_INTERVAL, BLE_SCAN_WINDOW,
    BLE_SLAVE_LATENCY, BLE_SUP_TIMEOUT, DEVICE_NAME, NUS_MAX_PAYLOAD,
};
use ble_repeater::mac::MacAddress;
use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{self, TryWriteError};
use nrf_softdevice::ble::gatt_server::{self, NotifyValueError};
use nrf_softdevice::ble::{central, peripheral, Address, AddressType, Connection};
use nrf_softdevice::{raw, RawError, Softdevice};

use super::{post, send_lifecycle, FirmwareEvent, Payload};

/// Pause before retrying a failed connect or advertise.
const RETRY_DELAY: Duration = Duration::from_secs(1);

// ═══════════════════════════════════════════════════════════════════════════
// Nordic UART Service
// ═══════════════════════════════════════════════════════════════════════════

#[nrf_softdevice::gatt_service(uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e")]
pub struct NusService {
    /// App -> repeater.
    #[characteristic(uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e", write, write_without_response)]
    pub rx: Vec<u8, NUS_MAX_PAYLOAD>,
    /// Repeater -> app.
    #[characteristic(uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e", notify)]
    pub tx: Vec<u8, NUS_MAX_PAYLOAD>,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub nus: NusService,
}

/// The sensor's NUS, seen from the central side.
#[nrf_softdevice::gatt_client(uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e")]
pub struct NusClient {
    #[characteristic(uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e", write, write_without_response)]
    pub rx: Vec<u8, NUS_MAX_PAYLOAD>,
    #[characteristic(uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e", notify)]
    pub tx: Vec<u8, NUS_MAX_PAYLOAD>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Link registry
// ═══════════════════════════════════════════════════════════════════════════

struct Links {
    /// Sensor connection and the handle of its NUS RX characteristic.
    central: Option<(Connection, u16)>,
    peripheral: Option<Connection>,
}

impl Links {
    const fn new() -> Self {
        Self {
            central: None,
            peripheral: None,
        }
    }

    /// Remove and return the connection with `handle`, if any.
    fn take(&mut self, handle: LinkHandle) -> Option<Connection> {
        if self.central.as_ref().and_then(|(c, _)| c.handle()) == Some(handle) {
            return self.central.take().map(|(c, _)| c);
        }
        if self.peripheral.as_ref().and_then(Connection::handle) == Some(handle) {
            return self.peripheral.take();
        }
        None
    }
}

static LINKS: Mutex<CriticalSectionRawMutex, RefCell<Links>> = Mutex::new(RefCell::new(Links::new()));

// ═══════════════════════════════════════════════════════════════════════════
// Role commands
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, defmt::Format)]
enum CentralCommand {
    Idle,
    Hunt(MacAddress),
    Listen(MacAddress),
}

#[derive(Clone, Copy, defmt::Format)]
enum PeripheralCommand {
    Idle,
    Advertise,
}

static CENTRAL: Signal<CriticalSectionRawMutex, CentralCommand> = Signal::new();
static PERIPHERAL: Signal<CriticalSectionRawMutex, PeripheralCommand> = Signal::new();

/// [`Radio`] handed to the repeater. Owns the I/O-enable pin.
pub struct SoftdeviceRadio {
    server: &'static Server,
    io_enable: Output<'static>,
    /// Address the SoftDevice came up with, restored when the identity
    /// is cleared.
    factory: raw::ble_gap_addr_t,
}

impl SoftdeviceRadio {
    pub fn new(_sd: &'static Softdevice, server: &'static Server, io_enable: Output<'static>) -> Self {
        // SAFETY: plain C struct, filled in by the SoftDevice.
        let mut factory: raw::ble_gap_addr_t = unsafe { core::mem::zeroed() };
        let ret = unsafe { raw::sd_ble_gap_addr_get(&mut factory) };
        if let Err(e) = RawError::convert(ret) {
            warn!("reading factory address failed: {:?}", e);
        }
        Self {
            server,
            io_enable,
            factory,
        }
    }
}

impl Radio for SoftdeviceRadio {
    fn start_scan(&mut self, target: MacAddress) {
        CENTRAL.signal(CentralCommand::Hunt(target));
    }

    fn start_passive_scan(&mut self, target: MacAddress) {
        CENTRAL.signal(CentralCommand::Listen(target));
    }

    fn stop_scan(&mut self) {
        CENTRAL.signal(CentralCommand::Idle);
    }

    fn start_advertising(&mut self) {
        PERIPHERAL.signal(PeripheralCommand::Advertise);
    }

    fn stop_advertising(&mut self) {
        PERIPHERAL.signal(PeripheralCommand::Idle);
    }

    fn disconnect(&mut self, handle: LinkHandle) {
        let conn = LINKS.lock(|links| links.borrow_mut().take(handle));
        if let Some(conn) = conn {
            if conn.disconnect().is_err() {
                warn!("disconnect of link {} failed", handle);
            }
        }
    }

    fn set_identity(&mut self, address: Option<MacAddress>) {
        let addr = match address {
            Some(mac) => {
                // SAFETY: plain C struct.
                let mut addr: raw::ble_gap_addr_t = unsafe { core::mem::zeroed() };
                addr.set_addr_type(raw::BLE_GAP_ADDR_TYPE_RANDOM_STATIC as u8);
                addr.addr = mac.to_radio_order();
                addr
            }
            None => self.factory,
        };
        // The SoftDevice refuses while scanning, advertising or connecting;
        // the repeater applies the identity again on every wake.
        let ret = unsafe { raw::sd_ble_gap_addr_set(&addr) };
        match RawError::convert(ret) {
            Ok(()) => info!("radio identity set to {:?}", address),
            Err(e) => warn!("radio identity not applied now: {:?}", e),
        }
    }

    fn set_io_enabled(&mut self, enabled: bool) {
        // Active low.
        if enabled {
            self.io_enable.set_low();
        } else {
            self.io_enable.set_high();
        }
    }

    fn send(&mut self, role: Role, bytes: &[u8]) -> SendStatus {
        match role {
            Role::CentralHunting => {
                let Some((conn, rx_handle)) = LINKS.lock(|links| links.borrow().central.clone()) else {
                    return SendStatus::Failed;
                };
                match gatt_client::try_write_without_response(&conn, rx_handle, bytes) {
                    Ok(()) => SendStatus::Sent,
                    Err(TryWriteError::BufferFull) => SendStatus::Busy,
                    Err(_) => SendStatus::Failed,
                }
            }
            Role::PeripheralServing => {
                let Some(conn) = LINKS.lock(|links| links.borrow().peripheral.clone()) else {
                    return SendStatus::Failed;
                };
                let Ok(payload) = Payload::from_slice(bytes) else {
                    return SendStatus::Failed;
                };
                match self.server.nus.tx_notify(&conn, &payload) {
                    Ok(()) => SendStatus::Sent,
                    Err(NotifyValueError::Raw(RawError::Resources)) => SendStatus::Busy,
                    Err(_) => SendStatus::Failed,
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SoftDevice setup
// ═══════════════════════════════════════════════════════════════════════════

/// Enable the SoftDevice for one central and one peripheral link.
pub fn enable_softdevice() -> &'static mut Softdevice {
    let config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 2,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: (NUS_MAX_PAYLOAD + 3) as u16,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(raw::BLE_GATTS_VLOC_USER as u8),
        }),
        ..Default::default()
    };
    Softdevice::enable(&config)
}

#[embassy_executor::task]
pub async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

fn conn_params() -> raw::ble_gap_conn_params_t {
    raw::ble_gap_conn_params_t {
        min_conn_interval: BLE_CONN_INTERVAL_MIN,
        max_conn_interval: BLE_CONN_INTERVAL_MAX,
        slave_latency: BLE_SLAVE_LATENCY,
        conn_sup_timeout: BLE_SUP_TIMEOUT,
    }
}

fn peer_of(conn: &Connection) -> MacAddress {
    MacAddress::from_radio_order(conn.peer_address().bytes())
}

// ═══════════════════════════════════════════════════════════════════════════
// Central role
// ═══════════════════════════════════════════════════════════════════════════

/// Drives the central role from [`CENTRAL`] commands.
///
/// A command arriving while hunting or listening preempts it. Once a link
/// is up it runs to completion; commands issued meanwhile are picked up
/// afterwards.
#[embassy_executor::task]
pub async fn central_task(sd: &'static Softdevice) -> ! {
    let mut command = CentralCommand::Idle;
    loop {
        command = match command {
            CentralCommand::Idle => CENTRAL.wait().await,
            CentralCommand::Hunt(target) => match select(CENTRAL.wait(), connect(sd, target)).await {
                Either::First(next) => next,
                Either::Second(Some(conn)) => {
                    run_sensor_link(conn).await;
                    CENTRAL.wait().await
                }
                Either::Second(None) => {
                    Timer::after(RETRY_DELAY).await;
                    CentralCommand::Hunt(target)
                }
            },
            CentralCommand::Listen(target) => match select(CENTRAL.wait(), listen(sd, target)).await {
                Either::First(next) => next,
                Either::Second(()) => CENTRAL.wait().await,
            },
        };
    }
}

async fn connect(sd: &'static Softdevice, target: MacAddress) -> Option<Connection> {
    info!("hunting sensor {}", target);
    let address = Address::new(AddressType::RandomStatic, target.to_radio_order());
    let whitelist = [&address];
    let config = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            interval: u32::from(BLE_SCAN_INTERVAL),
            window: u32::from(BLE_SCAN_WINDOW),
            ..Default::default()
        },
        conn_params: conn_params(),
        ..Default::default()
    };
    match central::connect(sd, &config).await {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!("sensor connect failed: {:?}", e);
            None
        }
    }
}

async fn run_sensor_link(conn: Connection) {
    let Some(handle) = conn.handle() else {
        return;
    };
    let client: NusClient = match gatt_client::discover(&conn).await {
        Ok(client) => client,
        Err(_) => {
            warn!("sensor has no NUS - disconnecting");
            let _ = conn.disconnect();
            return;
        }
    };
    if client.tx_cccd_write(true).await.is_err() {
        warn!("could not enable sensor notifications");
    }

    LINKS.lock(|links| links.borrow_mut().central = Some((conn.clone(), client.rx_value_handle)));
    send_lifecycle(FirmwareEvent::LinkUp {
        role: Role::CentralHunting,
        peer: peer_of(&conn),
        handle,
    })
    .await;

    gatt_client::run(&conn, &client, |event| match event {
        NusClientEvent::TxNotification(bytes) => post(FirmwareEvent::Data {
            role: Role::CentralHunting,
            bytes,
        }),
    })
    .await;

    LINKS.lock(|links| links.borrow_mut().take(handle));
    send_lifecycle(FirmwareEvent::LinkDown {
        role: Role::CentralHunting,
        handle,
    })
    .await;
}

/// Passive scan reporting `target`'s advertisements. Never returns on
/// its own unless the SoftDevice refuses to scan.
async fn listen(sd: &'static Softdevice, target: MacAddress) {
    info!("packet scan listening for {}", target);
    let config = central::ScanConfig {
        active: false,
        interval: u32::from(BLE_SCAN_INTERVAL),
        window: u32::from(BLE_SCAN_WINDOW),
        ..Default::default()
    };
    let result = central::scan(sd, &config, |params| {
        let peer = MacAddress::from_radio_order(params.peer_addr.addr);
        if peer == target {
            post(FirmwareEvent::Advertisement {
                peer,
                rssi: params.rssi,
            });
        }
        None::<()>
    })
    .await;
    if result.is_err() {
        warn!("passive scan failed");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Peripheral role
// ═══════════════════════════════════════════════════════════════════════════

/// Drives the peripheral role from [`PERIPHERAL`] commands.
#[embassy_executor::task]
pub async fn peripheral_task(sd: &'static Softdevice, server: &'static Server) -> ! {
    let mut command = PeripheralCommand::Idle;
    loop {
        command = match command {
            PeripheralCommand::Idle => PERIPHERAL.wait().await,
            PeripheralCommand::Advertise => match select(PERIPHERAL.wait(), advertise(sd)).await {
                Either::First(next) => next,
                Either::Second(Some(conn)) => {
                    run_app_link(conn, server).await;
                    PERIPHERAL.wait().await
                }
                Either::Second(None) => {
                    Timer::after(RETRY_DELAY).await;
                    PeripheralCommand::Advertise
                }
            },
        };
    }
}

async fn advertise(sd: &'static Softdevice) -> Option<Connection> {
    let mut adv_data: Vec<u8, 31> = Vec::new();
    let _ = adv_data.extend_from_slice(&[
        0x02,
        0x01,
        raw::BLE_GAP_ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE as u8,
        1 + DEVICE_NAME.len() as u8,
        0x09,
    ]);
    let _ = adv_data.extend_from_slice(DEVICE_NAME.as_bytes());

    #[rustfmt::skip]
    let scan_data = &[
        0x11, 0x07, // Complete list of 128-bit service UUIDs (NUS, little-endian)
        0x9e, 0xca, 0xdc, 0x24, 0x0e, 0xe5, 0xa9, 0xe0, 0x93, 0xf3, 0xa3, 0xb5, 0x01, 0x00, 0x40, 0x6e,
    ];

    let config = peripheral::Config {
        interval: BLE_ADV_INTERVAL,
        ..Default::default()
    };
    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data: &adv_data,
        scan_data,
    };
    match peripheral::advertise_connectable(sd, adv, &config).await {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!("advertising failed: {:?}", e);
            None
        }
    }
}

async fn run_app_link(conn: Connection, server: &'static Server) {
    let Some(handle) = conn.handle() else {
        return;
    };
    if let Err(e) = conn.set_conn_params(conn_params()) {
        warn!("set_conn_params error: {:?}", e);
    }

    LINKS.lock(|links| links.borrow_mut().peripheral = Some(conn.clone()));
    send_lifecycle(FirmwareEvent::LinkUp {
        role: Role::PeripheralServing,
        peer: peer_of(&conn),
        handle,
    })
    .await;

    gatt_server::run(&conn, server, |event| match event {
        ServerEvent::Nus(NusServiceEvent::RxWrite(bytes)) => post(FirmwareEvent::Data {
            role: Role::PeripheralServing,
            bytes,
        }),
        ServerEvent::Nus(NusServiceEvent::TxCccdWrite { notifications }) => {
            if notifications {
                post(FirmwareEvent::ReadyToSend(Role::PeripheralServing));
            }
        }
    })
    .await;

    LINKS.lock(|links| links.borrow_mut().take(handle));
    send_lifecycle(FirmwareEvent::LinkDown {
        role: Role::PeripheralServing,
        handle,
    })
    .await;
}
