//! # BLE Client and Exchange Engine
//!
//! [`JackeryBleClient`] owns one connection: the peripheral handle, the
//! codec latch, the response slot and the packet-assembly buffer. All
//! inbound traffic flows through a [`NotificationRouter`] shared with the
//! notification task; exchanges are serialised per client so only one
//! in-flight command can touch the shared state.
//!
//! Three exchange modes are provided:
//!
//! 1. fire-and-forget (`send_no_response`): encrypt, a short stabilisation
//!    sleep, write;
//! 2. single response (`send_expect_response`): write, then wait on the
//!    response slot up to the timeout;
//! 3. collect-all (`send_collect_all`): install a per-exchange channel,
//!    write once, gather every parsed notification inside the window.
//!
//! When the codec is unresolved, both waiting modes probe the candidate
//! variants sequentially with a 2-second per-variant timeout and latch the
//! first variant that produces any parsed response.

use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use log::debug;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::codec::{DeviceCodec, DeviceType, EncryptionVariant, KeyMaterial};
use crate::constants::{
    AUTO_DETECT_TIMEOUT_SECS, CHAR_DATA_NOTIFY, CHAR_DATA_WRITE, CHAR_HEARTBEAT,
    CONNECT_BACKOFF_SECS, CONNECT_RETRIES, DEFAULT_RESPONSE_TIMEOUT_SECS,
    DEFAULT_SCAN_TIMEOUT_SECS,
};
use crate::error::JackeryError;
use crate::protocol::parser::{is_multi_packet, parse_combined, parse_single, PacketAssembly};
use crate::protocol::Notification;

use super::scanner::{extract_key_from_advertisement, BleScanner, DiscoveredDevice};

/// Delay before a write so a fresh connection settles.
const WRITE_STABILISE: Duration = Duration::from_millis(100);

/// Client-side configuration for one device.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub device_type: Option<DeviceType>,
    /// Session key; base64 when derived from an advertisement.
    pub encryption_key: Option<String>,
    pub key_is_base64: bool,
    pub model_code: Option<u16>,
    /// Forces a wire encoding instead of resolving one.
    pub variant_override: Option<EncryptionVariant>,
    /// Reject advertisements whose service-blob CRC fails when deriving a
    /// key at connect time.
    pub strict_advert_crc: bool,
}

/// Shared inbound state between the notification task and the exchanges:
/// codec latch, assembly buffer, response slot and the optional
/// per-exchange sink.
///
/// The router is independent of the transport, so the whole
/// decrypt/reassemble/parse/publish path can be driven directly in tests.
#[derive(Default)]
pub struct NotificationRouter {
    codec: Mutex<Option<DeviceCodec>>,
    assembly: Mutex<PacketAssembly>,
    last_response: Mutex<Option<String>>,
    response_ready: Notify,
    sink: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        NotificationRouter::default()
    }

    pub async fn set_codec(&self, codec: Option<DeviceCodec>) {
        *self.codec.lock().await = codec;
    }

    pub async fn detected(&self) -> Option<EncryptionVariant> {
        self.codec.lock().await.as_ref().and_then(|c| c.detected())
    }

    pub async fn needs_probe(&self) -> bool {
        self.codec
            .lock()
            .await
            .as_ref()
            .map(|c| c.needs_probe())
            .unwrap_or(false)
    }

    pub async fn probe_variants(&self) -> Vec<EncryptionVariant> {
        self.codec
            .lock()
            .await
            .as_ref()
            .map(|c| c.probe_variants())
            .unwrap_or_default()
    }

    pub async fn latch(&self, variant: EncryptionVariant) {
        if let Some(codec) = self.codec.lock().await.as_mut() {
            codec.set_detected(variant);
        }
    }

    /// Encrypt an outbound frame; unkeyed devices pass plaintext through.
    pub async fn encrypt(&self, plain_hex: &str) -> Result<String, JackeryError> {
        match self.codec.lock().await.as_ref() {
            Some(codec) => codec.encrypt(plain_hex),
            None => Ok(plain_hex.to_string()),
        }
    }

    /// Encrypt with a specific candidate variant during probing.
    pub async fn encrypt_with(
        &self,
        variant: EncryptionVariant,
        plain_hex: &str,
    ) -> Result<String, JackeryError> {
        match self.codec.lock().await.as_ref() {
            Some(codec) => codec.encrypt_with(variant, plain_hex),
            None => Ok(plain_hex.to_string()),
        }
    }

    /// Clear the response slot and assembly buffer for a new exchange.
    pub async fn begin_exchange(&self) {
        *self.last_response.lock().await = None;
        self.assembly.lock().await.reset();
    }

    /// Route one raw notification: decrypt, reassemble or parse, publish.
    pub async fn ingest(&self, data: &[u8]) {
        let decrypted = {
            let mut codec_guard = self.codec.lock().await;
            match codec_guard.as_mut() {
                Some(codec) => match codec.decrypt(data) {
                    Some(decrypted) => decrypted,
                    None => {
                        debug!("Decryption failed for {} bytes", data.len());
                        return;
                    }
                },
                // Unkeyed device: surface the raw hex as-is
                None => {
                    self.publish(hex::encode_upper(data), None).await;
                    return;
                }
            }
        };

        if is_multi_packet(&decrypted) {
            let combined = self.assembly.lock().await.feed(&decrypted);
            if let Some(combined) = combined {
                let notification = parse_combined(&combined);
                self.publish(combined, Some(notification)).await;
            }
        } else {
            let notification = parse_single(&decrypted);
            self.publish(decrypted, Some(notification)).await;
        }
    }

    async fn publish(&self, response: String, notification: Option<Notification>) {
        *self.last_response.lock().await = Some(response);
        self.response_ready.notify_waiters();
        if let Some(notification) = notification {
            if let Some(sink) = self.sink.lock().await.as_ref() {
                sink.send(notification).ok();
            }
        }
    }

    /// Wait for a complete response up to `timeout`.
    pub async fn wait_response(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.response_ready.notified();
            if let Some(response) = self.last_response.lock().await.clone() {
                return Some(response);
            }
            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    /// Install the per-exchange sink, returning its receiving end.
    pub async fn install_sink(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sink.lock().await = Some(tx);
        rx
    }

    /// Remove the sink; called on every exit path of a collect exchange.
    pub async fn remove_sink(&self) {
        *self.sink.lock().await = None;
    }
}

/// BLE client for one Jackery power station.
pub struct JackeryBleClient {
    config: ClientConfig,
    router: Arc<NotificationRouter>,
    peripheral: Option<Peripheral>,
    write_char: Option<Characteristic>,
    notify_char: Option<Characteristic>,
    heartbeat_char: Option<Characteristic>,
    notify_task: Option<JoinHandle<()>>,
    /// Serialises exchanges: one in-flight command per device.
    exchange_lock: Mutex<()>,
}

impl JackeryBleClient {
    pub fn new(config: ClientConfig) -> Self {
        JackeryBleClient {
            config,
            router: Arc::new(NotificationRouter::new()),
            peripheral: None,
            write_char: None,
            notify_char: None,
            heartbeat_char: None,
            notify_task: None,
            exchange_lock: Mutex::new(()),
        }
    }

    /// The router carrying this client's inbound state.
    pub fn router(&self) -> Arc<NotificationRouter> {
        Arc::clone(&self.router)
    }

    /// The wire encoding in effect, once resolved.
    pub async fn detected_variant(&self) -> Option<EncryptionVariant> {
        self.router.detected().await
    }

    pub async fn is_connected(&self) -> bool {
        match &self.peripheral {
            Some(p) => p.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    /// Connect to a discovered device, with retry.
    ///
    /// The advertisement-derived key takes precedence over the configured
    /// one, and the advertised device type and model code drive variant
    /// selection.
    pub async fn connect(&mut self, device: &DiscoveredDevice) -> Result<(), JackeryError> {
        let device_type = device.device_type;
        let (key, key_is_base64) = if let Some(key) = &device.encryption_key {
            (Some(key.clone()), true)
        } else if let Some(key) = &self.config.encryption_key {
            (Some(key.clone()), self.config.key_is_base64)
        } else {
            // The scan may have skipped derivation; retry from the raw
            // blobs under the configured CRC policy
            let (derived, _, _) = extract_key_from_advertisement(
                &device.manufacturer_data,
                &device.service_data,
                self.config.strict_advert_crc,
            );
            (derived, true)
        };
        let codec = self.build_codec(device_type, device.model_code, key, key_is_base64)?;
        self.connect_peripheral(device.peripheral.clone(), &device.name, codec)
            .await
    }

    /// Connect to a device by its Bluetooth address, with retry.
    ///
    /// Without advertisement data the variant comes from the configured
    /// model code, falling back to auto-detect when it is unknown.
    pub async fn connect_by_address(&mut self, address: &str) -> Result<(), JackeryError> {
        let scanner = BleScanner::new().await?;
        let peripheral = scanner
            .find_by_address(address, Duration::from_secs_f64(DEFAULT_SCAN_TIMEOUT_SECS))
            .await?;
        let device_type = self.config.device_type.unwrap_or(DeviceType::Portable);
        let codec = self.build_codec(
            device_type,
            self.config.model_code,
            self.config.encryption_key.clone(),
            self.config.key_is_base64,
        )?;
        self.connect_peripheral(peripheral, address, codec).await
    }

    fn build_codec(
        &self,
        device_type: DeviceType,
        model_code: Option<u16>,
        key: Option<String>,
        key_is_base64: bool,
    ) -> Result<Option<DeviceCodec>, JackeryError> {
        match key {
            Some(key) => {
                let material = KeyMaterial::parse(&key, key_is_base64)?;
                Ok(Some(DeviceCodec::new(
                    device_type,
                    model_code,
                    self.config.variant_override,
                    &material,
                )))
            }
            None => Ok(None),
        }
    }

    async fn connect_peripheral(
        &mut self,
        peripheral: Peripheral,
        label: &str,
        codec: Option<DeviceCodec>,
    ) -> Result<(), JackeryError> {
        let mut last_error = String::new();

        for attempt in 1..=CONNECT_RETRIES {
            self.teardown().await;

            match self.try_connect(&peripheral).await {
                Ok(()) => {
                    self.router.set_codec(codec).await;
                    debug!("Connected to {label}");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < CONNECT_RETRIES {
                        debug!(
                            "Connection attempt {attempt}/{CONNECT_RETRIES} failed: {last_error}, retrying..."
                        );
                        sleep(Duration::from_secs_f64(CONNECT_BACKOFF_SECS)).await;
                    }
                }
            }
        }

        Err(JackeryError::ConnectFailed(last_error))
    }

    async fn try_connect(&mut self, peripheral: &Peripheral) -> Result<(), JackeryError> {
        peripheral.connect().await?;
        if !peripheral.is_connected().await? {
            return Err(JackeryError::ConnectFailed(
                "connect() returned but not connected".into(),
            ));
        }
        peripheral.discover_services().await?;

        let chars = peripheral.characteristics();
        let write_char = chars.iter().find(|c| c.uuid == CHAR_DATA_WRITE).cloned();
        let notify_char = chars.iter().find(|c| c.uuid == CHAR_DATA_NOTIFY).cloned();
        let heartbeat_char = chars.iter().find(|c| c.uuid == CHAR_HEARTBEAT).cloned();

        let notify_char = notify_char.ok_or_else(|| {
            JackeryError::ConnectFailed("data notify characteristic not found".into())
        })?;
        peripheral.subscribe(&notify_char).await?;

        let router = Arc::clone(&self.router);
        let mut stream = peripheral.notifications().await?;
        let notify_uuid = notify_char.uuid;
        self.notify_task = Some(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == notify_uuid {
                    router.ingest(&notification.value).await;
                }
            }
        }));

        self.write_char = write_char;
        self.notify_char = Some(notify_char);
        self.heartbeat_char = heartbeat_char;
        self.peripheral = Some(peripheral.clone());
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(peripheral) = self.peripheral.take() {
            if peripheral.is_connected().await.unwrap_or(false) {
                if let Some(notify_char) = &self.notify_char {
                    peripheral.unsubscribe(notify_char).await.ok();
                }
                peripheral.disconnect().await.ok();
                sleep(Duration::from_millis(300)).await;
            }
        }
        self.write_char = None;
        self.notify_char = None;
        self.heartbeat_char = None;
    }

    /// Disconnect and drop the connection state.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
    }

    async fn write_encrypted(&self, encrypted_hex: &str) -> Result<(), JackeryError> {
        let peripheral = self.peripheral.as_ref().ok_or(JackeryError::NotConnected)?;
        let write_char = self.write_char.as_ref().ok_or(JackeryError::NotConnected)?;
        let data = crate::util::hex::decode_hex(encrypted_hex)?;
        peripheral
            .write(write_char, &data, WriteType::WithoutResponse)
            .await
            .map_err(|e| JackeryError::WriteFailed(e.to_string()))
    }

    fn ensure_connected_sync(&self) -> Result<(), JackeryError> {
        if self.peripheral.is_none() {
            return Err(JackeryError::NotConnected);
        }
        Ok(())
    }

    /// Fire-and-forget: encrypt, stabilisation sleep, write.
    pub async fn send_no_response(&self, command_hex: &str) -> Result<(), JackeryError> {
        self.ensure_connected_sync()?;
        let _exchange = self.exchange_lock.lock().await;

        let encrypted = self.router.encrypt(command_hex).await?;
        self.router.begin_exchange().await;
        sleep(WRITE_STABILISE).await;
        self.write_encrypted(&encrypted).await
    }

    /// Single-response exchange with the default 5-second timeout.
    pub async fn send_command(&self, command_hex: &str) -> Result<Option<String>, JackeryError> {
        self.send_expect_response(
            command_hex,
            Duration::from_secs_f64(DEFAULT_RESPONSE_TIMEOUT_SECS),
        )
        .await
    }

    /// Single-response exchange. Returns `None` on a quiet timeout so the
    /// caller decides whether silence is an error.
    pub async fn send_expect_response(
        &self,
        command_hex: &str,
        timeout: Duration,
    ) -> Result<Option<String>, JackeryError> {
        self.ensure_connected_sync()?;
        let _exchange = self.exchange_lock.lock().await;

        if self.router.needs_probe().await {
            return self.probe_single(command_hex).await;
        }

        let encrypted = self.router.encrypt(command_hex).await?;
        self.router.begin_exchange().await;
        sleep(WRITE_STABILISE).await;
        self.write_encrypted(&encrypted).await?;

        match self.router.wait_response(timeout).await {
            Some(response) => Ok(Some(response)),
            None => {
                debug!("Response timeout");
                Ok(None)
            }
        }
    }

    /// Probe candidates one at a time and latch the first that answers.
    async fn probe_single(&self, command_hex: &str) -> Result<Option<String>, JackeryError> {
        let probe_timeout = Duration::from_secs_f64(AUTO_DETECT_TIMEOUT_SECS);
        for variant in self.router.probe_variants().await {
            let encrypted = self.router.encrypt_with(variant, command_hex).await?;
            self.router.begin_exchange().await;
            self.write_encrypted(&encrypted).await?;

            if let Some(response) = self.router.wait_response(probe_timeout).await {
                self.router.latch(variant).await;
                debug!("Detected encryption variant: {variant}");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Send once and gather every parsed notification within the window.
    pub async fn send_collect_all(
        &self,
        command_hex: &str,
        collect_time: Duration,
    ) -> Result<Vec<Notification>, JackeryError> {
        self.ensure_connected_sync()?;
        let _exchange = self.exchange_lock.lock().await;

        let mut rx = self.router.install_sink().await;
        // The sink must come back out on every exit path
        let result = self.collect_all_inner(command_hex, collect_time, &mut rx).await;
        self.router.remove_sink().await;

        let mut responses = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            responses.push(notification);
        }
        result.map(|_| responses)
    }

    async fn collect_all_inner(
        &self,
        command_hex: &str,
        collect_time: Duration,
        rx: &mut mpsc::UnboundedReceiver<Notification>,
    ) -> Result<(), JackeryError> {
        if self.router.needs_probe().await {
            return self.probe_collect(command_hex, collect_time, rx).await;
        }

        let encrypted = self.router.encrypt(command_hex).await?;
        self.router.begin_exchange().await;
        self.write_encrypted(&encrypted).await?;
        sleep(collect_time).await;
        Ok(())
    }

    /// Collect-all under an unresolved codec: 2 s per candidate, then the
    /// remainder of the window under the latched variant.
    async fn probe_collect(
        &self,
        command_hex: &str,
        collect_time: Duration,
        rx: &mut mpsc::UnboundedReceiver<Notification>,
    ) -> Result<(), JackeryError> {
        let probe_timeout = Duration::from_secs_f64(AUTO_DETECT_TIMEOUT_SECS);
        for variant in self.router.probe_variants().await {
            let encrypted = self.router.encrypt_with(variant, command_hex).await?;
            self.router.begin_exchange().await;
            self.write_encrypted(&encrypted).await?;
            sleep(probe_timeout).await;

            // Anything parsed during the probe proves the variant
            if !rx.is_empty() {
                self.router.latch(variant).await;
                debug!("Detected encryption variant: {variant}");
                if collect_time > probe_timeout {
                    sleep(collect_time - probe_timeout).await;
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Write a single keep-alive byte to the heartbeat characteristic.
    pub async fn send_heartbeat(&self) -> Result<(), JackeryError> {
        let peripheral = self.peripheral.as_ref().ok_or(JackeryError::NotConnected)?;
        let heartbeat_char = self
            .heartbeat_char
            .as_ref()
            .ok_or_else(|| JackeryError::Other("heartbeat characteristic not found".into()))?;
        peripheral
            .write(heartbeat_char, &[0x01], WriteType::WithoutResponse)
            .await
            .map_err(|e| JackeryError::WriteFailed(e.to_string()))
    }
}
