//! Control plane of a duty-cycled BLE repeater.
//!
//! The repeater hunts for one sensor as a BLE central, serves a companion
//! app as a BLE peripheral, relays data between the two, and keeps a
//! flash-backed history of sensor snapshots. The radio is only powered
//! during ACTIVE phases; SLEEPING phases keep the RTC and nothing else.
//!
//! Everything in this crate is hardware-free and runs on the host:
//!
//! - [`storage`] - namespaced fixed-size records over a key-addressed flash
//! - [`history`] - append-only sequence-numbered telemetry log
//! - [`scheduler`] - ACTIVE/SLEEPING duty cycle and the extended search
//! - [`ble::roles`] - central/peripheral link lifecycle
//! - [`transfer`] - flow-controlled history streaming to the app
//! - [`command`] - the app's ASCII command protocol
//! - [`app`] - the event loop tying them together
//!
//! The nRF52840 binary (`src/main.rs`, feature `embedded`) supplies the
//! SoftDevice radio, `sequential-storage` flash and embassy-time alarms.
//!
//! Usage: `cargo test` runs every unit and integration test on the host.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod app;
pub mod ble;
pub mod calendar;
pub mod command;
pub mod config;
pub mod error;
pub mod history;
pub mod mac;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod transfer;

pub use app::{Event, Outcome, Repeater};
pub use error::{Error, Result};
