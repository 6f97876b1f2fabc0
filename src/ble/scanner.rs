//! # BLE Discovery
//!
//! Scans for Jackery devices, classifies them from the advertised name and
//! runs every advertisement through the key-derivation pipeline so that
//! devices surface ready to connect. Devices whose advertisements do not
//! decode simply surface without a key.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use log::debug;
use tokio::time::sleep;
use uuid::Uuid;

use crate::advert::{derive_encryption_key, parse_advertisement};
use crate::codec::DeviceType;
use crate::constants::{DEVICE_NAME_FILTERS, SERVICE_DATA};
use crate::error::JackeryError;

/// A device seen during one scan window.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: String,
    pub rssi: i16,
    pub device_type: DeviceType,
    pub device_sn: Option<String>,
    pub model_code: Option<u16>,
    /// Base64 session key derived from the advertisement, when it decoded.
    pub encryption_key: Option<String>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub(crate) peripheral: Peripheral,
}

impl std::fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key_status = if self.encryption_key.is_some() {
            "key:YES"
        } else {
            "key:NO"
        };
        write!(
            f,
            "{} ({}) - {} [{}] [RSSI: {}]",
            self.name, self.address, self.device_type, key_status, self.rssi
        )?;
        if let Some(sn) = &self.device_sn {
            write!(f, " SN:{sn}")?;
        }
        if let Some(model) = self.model_code {
            write!(f, " Model:{model}")?;
        }
        Ok(())
    }
}

/// Whether an advertised name belongs to a Jackery device.
///
/// With an explicit filter, the name must contain or equal it; otherwise
/// any of the known prefixes matches, anywhere in the name.
pub fn is_jackery_name(name: &str, name_filter: Option<&str>) -> bool {
    let name_upper = name.to_uppercase();
    match name_filter {
        Some(filter) => {
            let filter_upper = filter.to_uppercase();
            name_upper.contains(&filter_upper) || name_upper == filter_upper
        }
        None => DEVICE_NAME_FILTERS
            .iter()
            .any(|prefix| name_upper.starts_with(prefix) || name_upper.contains(prefix)),
    }
}

/// Derive (key, SN, model code) from raw advertisement maps, trying each
/// manufacturer entry until one decodes. `strict_crc` gates the tolerated
/// service-blob CRC mismatch.
pub fn extract_key_from_advertisement(
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    service_data: &HashMap<Uuid, Vec<u8>>,
    strict_crc: bool,
) -> (Option<String>, Option<String>, Option<u16>) {
    let Some(svc_bytes) = service_data.get(&SERVICE_DATA) else {
        return (None, None, None);
    };

    for (&mfr_id, payload) in manufacturer_data {
        if let Some(adv) = parse_advertisement(mfr_id, payload, svc_bytes, strict_crc) {
            let key = derive_encryption_key(&adv.device_sn, &adv.device_guid);
            return (Some(key), Some(adv.device_sn), Some(adv.model_code));
        }
    }
    (None, None, None)
}

/// BLE central wrapper around the first host adapter.
pub struct BleScanner {
    adapter: Adapter,
    strict_advert_crc: bool,
}

impl BleScanner {
    pub async fn new() -> Result<Self, JackeryError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JackeryError::ScanFailed("no Bluetooth adapter found".into()))?;
        Ok(BleScanner {
            adapter,
            strict_advert_crc: false,
        })
    }

    /// Reject advertisements whose service-blob CRC fails instead of
    /// tolerating the mismatch during key derivation.
    pub fn with_strict_advert_crc(mut self, strict: bool) -> Self {
        self.strict_advert_crc = strict;
        self
    }

    /// Scan for Jackery devices, deduped by address.
    pub async fn scan(
        &self,
        timeout: Duration,
        name_filter: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>, JackeryError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| JackeryError::ScanFailed(e.to_string()))?;
        sleep(timeout).await;
        self.adapter.stop_scan().await.ok();

        let mut devices: HashMap<String, DiscoveredDevice> = HashMap::new();
        for peripheral in self.adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let name = props.local_name.unwrap_or_default();
            if !is_jackery_name(&name, name_filter) {
                continue;
            }

            let address = peripheral.address().to_string();
            if devices.contains_key(&address) {
                continue;
            }

            let (encryption_key, device_sn, model_code) = extract_key_from_advertisement(
                &props.manufacturer_data,
                &props.service_data,
                self.strict_advert_crc,
            );

            let device = DiscoveredDevice {
                device_type: DeviceType::classify_name(&name),
                name,
                address: address.clone(),
                rssi: props.rssi.unwrap_or(-100),
                device_sn,
                model_code,
                encryption_key,
                manufacturer_data: props.manufacturer_data,
                service_data: props.service_data,
                peripheral,
            };
            debug!("Discovered {device}");
            devices.insert(address, device);
        }

        Ok(devices.into_values().collect())
    }

    /// Resolve a peripheral by its address during a short scan, for
    /// connections configured by MAC instead of discovery.
    pub async fn find_by_address(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Peripheral, JackeryError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| JackeryError::ScanFailed(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let found = loop {
            if let Some(p) = self
                .adapter
                .peripherals()
                .await?
                .into_iter()
                .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            {
                break Some(p);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            sleep(Duration::from_millis(500)).await;
        };

        self.adapter.stop_scan().await.ok();
        found.ok_or_else(|| JackeryError::ConnectFailed(format!("device {address} not found")))
    }
}
