//! # Device Coordination
//!
//! One [`JackeryCoordinator`] per configured device runs the poll cycle:
//! ensure the connection (time-syncing the device clock on every fresh
//! connect), query the device properties in collect-all mode, merge every
//! response into a fresh state document and keep the latest one. The
//! [`JackeryDeviceManager`] holds a coordinator per address so multiple
//! stations can be polled side by side.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Local;
use log::{debug, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::ble::{ClientConfig, JackeryBleClient};
use crate::codec::{DeviceType, EncryptionVariant};
use crate::constants::{DEFAULT_SCAN_TIMEOUT_SECS, DEFAULT_UPDATE_INTERVAL_SECS};
use crate::error::JackeryError;
use crate::protocol::{CommandBuilder, DeviceState};

/// Per-device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub address: String,
    pub name: String,
    pub device_type: DeviceType,
    /// Base64 session key, usually captured during discovery.
    pub encryption_key: Option<String>,
    pub model_code: Option<u16>,
    /// Forces a wire encoding instead of resolving one.
    pub variant_override: Option<EncryptionVariant>,
    /// Reject advertisements whose service-blob CRC fails instead of
    /// tolerating the mismatch during key derivation.
    pub strict_advert_crc: bool,
    pub scan_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            address: String::new(),
            name: "Jackery".to_string(),
            device_type: DeviceType::Portable,
            encryption_key: None,
            model_code: None,
            variant_override: None,
            strict_advert_crc: false,
            scan_timeout: Duration::from_secs_f64(DEFAULT_SCAN_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
        }
    }
}

/// Settle time between a control command and the follow-up refresh.
const CONTROL_SETTLE: Duration = Duration::from_millis(500);

/// Collect-all window for the property query of a poll.
const POLL_COLLECT_WINDOW: Duration = Duration::from_secs(2);

/// Manages the BLE connection and polling for one device.
pub struct JackeryCoordinator {
    config: DeviceConfig,
    builder: CommandBuilder,
    client: Option<JackeryBleClient>,
    state: DeviceState,
}

impl JackeryCoordinator {
    pub fn new(config: DeviceConfig) -> Self {
        let builder = CommandBuilder::new(config.device_type);
        JackeryCoordinator {
            config,
            builder,
            client: None,
            state: DeviceState::new(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.config.name
    }

    pub fn device_address(&self) -> &str {
        &self.config.address
    }

    pub fn command_builder(&self) -> &CommandBuilder {
        &self.builder
    }

    /// The state document from the most recent successful poll.
    pub fn latest_state(&self) -> &DeviceState {
        &self.state
    }

    /// The DST-adjusted local UTC offset in seconds, as the device clock
    /// expects it.
    fn local_utc_offset() -> i32 {
        Local::now().offset().local_minus_utc()
    }

    /// Ensure the BLE connection is active, reconnecting if needed. A
    /// fresh connection gets a fire-and-forget time sync.
    pub async fn ensure_connected(&mut self) -> Result<(), JackeryError> {
        if let Some(client) = &self.client {
            if client.is_connected().await {
                return Ok(());
            }
        }

        debug!(
            "Connecting to {} ({})",
            self.config.name, self.config.address
        );

        let mut client = JackeryBleClient::new(ClientConfig {
            device_type: Some(self.config.device_type),
            encryption_key: self.config.encryption_key.clone(),
            key_is_base64: self.config.encryption_key.is_some(),
            model_code: self.config.model_code,
            variant_override: self.config.variant_override,
            strict_advert_crc: self.config.strict_advert_crc,
        });
        client.connect_by_address(&self.config.address).await?;

        let cmd = self.builder.sync_time(Self::local_utc_offset());
        if let Err(e) = client.send_no_response(&cmd).await {
            debug!("Time sync failed: {e}");
        }

        self.client = Some(client);
        Ok(())
    }

    /// One poll cycle: connect, query device properties, merge every
    /// response into a fresh state document.
    pub async fn poll_once(&mut self) -> Result<DeviceState, JackeryError> {
        self.ensure_connected()
            .await
            .map_err(|e| JackeryError::UpdateFailed(format!("connection failed: {e}")))?;

        let client = self.client.as_ref().ok_or(JackeryError::NotConnected)?;
        let cmd = self.builder.query_device_property();
        let responses = match client.send_collect_all(&cmd, POLL_COLLECT_WINDOW).await {
            Ok(responses) => responses,
            Err(e) => {
                // A failed write means the link dropped; reconnect next poll
                self.teardown_client().await;
                return Err(JackeryError::UpdateFailed(format!(
                    "communication error: {e}"
                )));
            }
        };

        if responses.is_empty() {
            return Err(JackeryError::UpdateFailed("no response from device".into()));
        }

        let mut merged = DeviceState::new();
        for response in &responses {
            merged.merge_notification(response);
        }
        if merged.is_empty() {
            return Err(JackeryError::UpdateFailed(
                "could not parse device response".into(),
            ));
        }

        debug!("Device data: {merged:?}");
        self.state = merged.clone();
        Ok(merged)
    }

    /// Send a control command, give the device time to apply it, then
    /// refresh the state document.
    pub async fn send_control_command(&mut self, command_hex: &str) -> Result<(), JackeryError> {
        self.ensure_connected().await?;
        let client = self.client.as_ref().ok_or(JackeryError::NotConnected)?;
        if let Err(e) = client.send_no_response(command_hex).await {
            self.teardown_client().await;
            return Err(e);
        }
        sleep(CONTROL_SETTLE).await;

        if let Err(e) = self.poll_once().await {
            warn!("Refresh after control command failed: {e}");
        }
        Ok(())
    }

    /// Poll until a shutdown is signalled. Errors are logged and the loop
    /// keeps going; the device may simply be out of range for a while.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.poll_once().await {
                warn!("{}: {e}", self.config.name);
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    async fn teardown_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.disconnect().await;
        }
    }

    /// Disconnect and drop the client.
    pub async fn shutdown(&mut self) {
        self.teardown_client().await;
    }
}

/// Holds a coordinator per configured device address.
#[derive(Default)]
pub struct JackeryDeviceManager {
    coordinators: HashMap<String, JackeryCoordinator>,
}

impl JackeryDeviceManager {
    pub fn new() -> Self {
        JackeryDeviceManager::default()
    }

    /// Register a device; replaces any previous entry for the address.
    pub fn add_device(&mut self, config: DeviceConfig) {
        self.coordinators
            .insert(config.address.clone(), JackeryCoordinator::new(config));
    }

    pub fn coordinator(&mut self, address: &str) -> Option<&mut JackeryCoordinator> {
        self.coordinators.get_mut(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.coordinators.keys().cloned().collect()
    }

    /// Poll every registered device once, collecting per-device outcomes.
    pub async fn poll_all(&mut self) -> HashMap<String, Result<DeviceState, JackeryError>> {
        let mut results = HashMap::new();
        for (address, coordinator) in self.coordinators.iter_mut() {
            results.insert(address.clone(), coordinator.poll_once().await);
        }
        results
    }

    /// Disconnect every device.
    pub async fn shutdown_all(&mut self) {
        for coordinator in self.coordinators.values_mut() {
            coordinator.shutdown().await;
        }
    }
}
