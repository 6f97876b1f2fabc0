//! # jackery-ble - A Rust Crate for the Jackery BLE Protocol
//!
//! The jackery-ble crate provides a Rust implementation of the Bluetooth
//! Low Energy protocol spoken by Jackery portable power stations and "Box"
//! stationary units: discovery, per-device key derivation from
//! advertisement data, the three frame encodings with auto-detection, and
//! a polling coordinator that turns notification streams into a merged
//! device-state document.
//!
//! ## Features
//!
//! - Scan for nearby Jackery devices and derive their session keys from
//!   advertisement data alone
//! - Connect with retry, subscribe to telemetry notifications and send
//!   control/query commands by logical name
//! - Encrypt and decrypt all three wire encodings (portable RC4, portable
//!   AES, box AES), resolving the right one by trial when the model is
//!   unknown
//! - Reassemble multi-packet responses and merge polls into an open
//!   state document with typed accessors
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! ```no_run
//! use jackery_ble::{scan_devices, JackeryCoordinator, DeviceConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), jackery_ble::JackeryError> {
//! let devices = scan_devices(Duration::from_secs(10), None).await?;
//! let device = devices.first().expect("a station in range");
//!
//! let mut coordinator = JackeryCoordinator::new(DeviceConfig {
//!     address: device.address.clone(),
//!     name: device.name.clone(),
//!     device_type: device.device_type,
//!     encryption_key: device.encryption_key.clone(),
//!     model_code: device.model_code,
//!     ..DeviceConfig::default()
//! });
//! let state = coordinator.poll_once().await?;
//! println!("battery: {:?}%", state.battery_percent());
//! # Ok(())
//! # }
//! ```

pub mod advert;
pub mod ble;
pub mod codec;
pub mod constants;
pub mod device_manager;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod util;

pub use crate::error::JackeryError;
pub use crate::logging::{init_logger, log_info};

// Core protocol types
pub use advert::{derive_encryption_key, derive_key_from_advertisement, AdvertisementData};
pub use ble::{BleScanner, ClientConfig, DiscoveredDevice, JackeryBleClient};
pub use codec::{DeviceCodec, DeviceType, EncryptionVariant, FrameCodec, KeyMaterial};
pub use device_manager::{DeviceConfig, JackeryCoordinator, JackeryDeviceManager};
pub use protocol::{
    format_status, ActionId, CommandBuilder, DeviceState, MsgType, Notification,
    NotificationPayload, StateValue,
};

use std::time::Duration;

/// Scan for nearby Jackery devices.
///
/// # Arguments
/// * `timeout` - How long to keep the scan window open
/// * `name_filter` - Optional name fragment overriding the built-in filters
///
/// # Returns
/// * `Ok(Vec<DiscoveredDevice>)` - Devices seen, deduped by address
/// * `Err(JackeryError)` - Scanning failed
pub async fn scan_devices(
    timeout: Duration,
    name_filter: Option<&str>,
) -> Result<Vec<DiscoveredDevice>, JackeryError> {
    let scanner = BleScanner::new().await?;
    scanner.scan(timeout, name_filter).await
}

/// Connect to a discovered device and return the ready client.
///
/// # Arguments
/// * `device` - A device from [`scan_devices`]
///
/// # Returns
/// * `Ok(JackeryBleClient)` - Connected client with notifications running
/// * `Err(JackeryError)` - Connection failed after retries
pub async fn connect(device: &DiscoveredDevice) -> Result<JackeryBleClient, JackeryError> {
    let mut client = JackeryBleClient::new(ClientConfig::default());
    client.connect(device).await?;
    Ok(client)
}
