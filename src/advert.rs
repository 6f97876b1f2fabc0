//! # Advertisement Decoding and Key Derivation
//!
//! Jackery devices broadcast everything needed to derive their session key:
//! the manufacturer id doubles as the first serial-number character (byte
//! swapped), the manufacturer payload carries the SN tail, and the service
//! data under the data service UUID is a 14-byte RC4-encrypted blob holding
//! the model code and device GUID.
//!
//! The pipeline is byte-exact and fragile by construction:
//!
//! 1. format the manufacturer id as 4 hex chars and swap the two bytes;
//!    the first byte is the app type, the second decodes to the first SN
//!    character,
//! 2. append the UTF-8 payload to form the SN (15 chars expected, under 8
//!    aborts),
//! 3. RC4-decrypt the service blob with `sn[0..3] + sn[len-5..] + SALT_RC4`,
//! 4. validate the CRC-16 trailer; a minority of devices ship
//!    advertisements whose trailer fails CRC yet whose fields decode
//!    correctly, so a mismatch is logged and tolerated unless strict mode
//!    is requested,
//! 5. strip the one-byte XOR mask and demask the payload,
//! 6. parse model code, GUID, battery level and reset mark,
//! 7. compose `base64(sn[len-6..] + guid + SALT_KEY)` as the session key.
//!
//! Every step may fail; the caller then surfaces the device without a key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::debug;

use crate::codec::crc::crc16_hex;
use crate::codec::rc4::{rc4_crypt, xor_with_byte};
use crate::constants::{DEVICE_SN_MIN_LEN, SALT_KEY, SALT_RC4, SERVICE_DATA_LEN};
use crate::util::hex::{decode_hex, hex_byte, hex_u16};

/// Parsed BLE advertisement data from a Jackery device.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementData {
    pub device_sn: String,
    pub device_guid: [u8; 6],
    pub model_code: u16,
    pub battery_level: Option<u8>,
    pub reset_mark: Option<u16>,
    pub app_type: u8,
}

/// Decode bytes as ASCII, dropping anything that is not.
fn ascii_lossy(data: &[u8]) -> String {
    data.iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

/// Parse the manufacturer and service advertisement blobs.
///
/// Returns `None` whenever any pipeline step fails; with `strict_crc` set,
/// a service-blob CRC mismatch also aborts instead of being tolerated.
pub fn parse_advertisement(
    manufacturer_id: u16,
    manufacturer_payload: &[u8],
    service_data: &[u8],
    strict_crc: bool,
) -> Option<AdvertisementData> {
    // The vendor id is the first two SN characters, byte-swapped
    let id_hex = format!("{manufacturer_id:04x}");
    let id_swapped = format!("{}{}", &id_hex[2..4], &id_hex[0..2]);
    let app_type = hex_byte(&id_swapped[0..2]).ok()?;
    let sn_first = hex_byte(&id_swapped[2..4]).ok()?;

    if manufacturer_payload.is_empty() {
        return None;
    }
    let device_sn = format!(
        "{}{}",
        ascii_lossy(&[sn_first]),
        ascii_lossy(manufacturer_payload)
    );
    if device_sn.len() < DEVICE_SN_MIN_LEN {
        return None;
    }

    if service_data.len() < SERVICE_DATA_LEN {
        return None;
    }
    let encrypted = &service_data[..SERVICE_DATA_LEN];

    let rc4_key = format!(
        "{}{}{}",
        &device_sn[0..3],
        &device_sn[device_sn.len() - 5..],
        SALT_RC4
    );
    let decrypted = rc4_crypt(encrypted, rc4_key.as_bytes());
    let decrypted_hex = hex::encode_upper(&decrypted);
    if decrypted_hex.len() < 8 {
        return None;
    }

    let data_for_crc = &decrypted_hex[..decrypted_hex.len() - 4];
    let expected_crc = &decrypted_hex[decrypted_hex.len() - 4..];
    let calculated_crc = crc16_hex(data_for_crc);
    if !calculated_crc.eq_ignore_ascii_case(expected_crc) {
        debug!("Advertisement CRC mismatch: expected {expected_crc}, calculated {calculated_crc}");
        if strict_crc {
            return None;
        }
    }

    if data_for_crc.len() < 4 {
        return None;
    }
    let payload_hex = &data_for_crc[..data_for_crc.len() - 2];
    let xor_key = hex_byte(&data_for_crc[data_for_crc.len() - 2..]).ok()?;
    let payload_bytes = decode_hex(payload_hex).ok()?;
    let decoded = xor_with_byte(&payload_bytes, xor_key);

    if decoded.len() < 22 {
        return None;
    }
    let model_code = hex_u16(&decoded[0..4]).ok()?;
    let guid_bytes = decode_hex(&decoded[4..16]).ok()?;
    let mut device_guid = [0u8; 6];
    device_guid.copy_from_slice(&guid_bytes);
    let battery_level = hex_byte(&decoded[16..18]).ok();
    let reset_mark = hex_u16(&decoded[18..22]).ok();

    Some(AdvertisementData {
        device_sn,
        device_guid,
        model_code,
        battery_level,
        reset_mark,
        app_type,
    })
}

/// Derive the base64 session key from a serial number and device GUID.
pub fn derive_encryption_key(device_sn: &str, device_guid: &[u8]) -> String {
    let suffix = if device_sn.len() >= 6 {
        &device_sn[device_sn.len() - 6..]
    } else {
        device_sn
    };
    let mut key_material = Vec::with_capacity(suffix.len() + device_guid.len() + SALT_KEY.len());
    key_material.extend_from_slice(suffix.as_bytes());
    key_material.extend_from_slice(device_guid);
    key_material.extend_from_slice(SALT_KEY.as_bytes());
    BASE64.encode(key_material)
}

/// One-call pipeline: advertisement blobs in, base64 session key out.
pub fn derive_key_from_advertisement(
    manufacturer_id: u16,
    manufacturer_payload: &[u8],
    service_data: &[u8],
    strict_crc: bool,
) -> Option<String> {
    let adv = parse_advertisement(
        manufacturer_id,
        manufacturer_payload,
        service_data,
        strict_crc,
    )?;
    Some(derive_encryption_key(&adv.device_sn, &adv.device_guid))
}
