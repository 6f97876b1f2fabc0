//! # BLE Transport
//!
//! Discovery and connection handling on top of `btleplug`: scanning with
//! the Jackery name filters, advertisement capture for key derivation, and
//! the per-device client with its notification routing and exchange
//! engine.

pub mod client;
pub mod scanner;

pub use client::{ClientConfig, JackeryBleClient, NotificationRouter};
pub use scanner::{BleScanner, DiscoveredDevice};
