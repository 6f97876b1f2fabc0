//! Jackery BLE Protocol Constants
//!
//! This module defines constants used in the Jackery BLE protocol
//! implementation: GATT UUIDs, key-derivation salts, frame magic prefixes
//! and the option tables for the mode-style controls.

use uuid::Uuid;

// ----------------------------------------------------------------------------
// GATT surface
// ----------------------------------------------------------------------------

/// Data service carrying the write/notify characteristics; its service data
/// in advertisements holds the encrypted key-derivation blob.
pub const SERVICE_DATA: Uuid = Uuid::from_u128(0x0000bdee_0000_1000_8000_00805f9b34fb);

/// Heartbeat service.
pub const SERVICE_HEARTBEAT: Uuid = Uuid::from_u128(0x0000bdff_0000_1000_8000_00805f9b34fb);

/// Command characteristic, written without response.
pub const CHAR_DATA_WRITE: Uuid = Uuid::from_u128(0x0000ee01_0000_1000_8000_00805f9b34fb);

/// Telemetry/notification characteristic.
pub const CHAR_DATA_NOTIFY: Uuid = Uuid::from_u128(0x0000ee02_0000_1000_8000_00805f9b34fb);

/// Heartbeat characteristic.
pub const CHAR_HEARTBEAT: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

/// Advertised-name fragments that identify a Jackery device.
pub const DEVICE_NAME_FILTERS: &[&str] = &["HT", "JACKERY", "JK", "EXPLORER"];

/// Expected length of the encrypted service-data blob.
pub const SERVICE_DATA_LEN: usize = 14;

/// Full serial numbers are 15 ASCII characters; anything under 8 is rejected.
pub const DEVICE_SN_LEN: usize = 15;
pub const DEVICE_SN_MIN_LEN: usize = 8;

// ----------------------------------------------------------------------------
// Key derivation salts
// ----------------------------------------------------------------------------

/// Salt appended to the SN-derived RC4 key that decrypts advertisement
/// service data.
pub const SALT_RC4: &str = "LYx*G!6u9#";

/// Salt appended to the SN suffix + GUID when composing the session key.
pub const SALT_KEY: &str = "6*SY1c5B9@";

// ----------------------------------------------------------------------------
// Frame magic
// ----------------------------------------------------------------------------

/// Magic prefix of decrypted portable frames (first two plaintext bytes).
pub const MAGIC_PORTABLE: &str = "DFEC";

/// Magic prefix of decrypted box frames.
pub const MAGIC_BOX: &str = "DFED";

/// Outbound command prefix for portable devices (magic + reserved byte).
pub const PREFIX_PORTABLE: &str = "DFEC00";

/// Outbound command prefix for box devices.
pub const PREFIX_BOX: &str = "DFED00";

/// Model codes that use AES instead of RC4 on portable devices
/// (HP3600 = 20, E1500V2 = 21).
pub const AES_MODEL_CODES: &[u16] = &[20, 21];

// ----------------------------------------------------------------------------
// Defaults
// ----------------------------------------------------------------------------

/// Default BLE scan window in seconds.
pub const DEFAULT_SCAN_TIMEOUT_SECS: f64 = 10.0;

/// Default poll interval in seconds.
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30;

/// Default single-response exchange timeout in seconds.
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: f64 = 5.0;

/// Default collect-all window in seconds.
pub const DEFAULT_COLLECT_TIME_SECS: f64 = 3.0;

/// Per-variant timeout while probing an unresolved codec, in seconds.
pub const AUTO_DETECT_TIMEOUT_SECS: f64 = 2.0;

/// Connection attempts and the backoff between them.
pub const CONNECT_RETRIES: u32 = 2;
pub const CONNECT_BACKOFF_SECS: f64 = 2.0;

// ----------------------------------------------------------------------------
// Mode option tables
// ----------------------------------------------------------------------------

pub const LIGHT_MODE_OFF: u8 = 0;
pub const LIGHT_MODE_LOW: u8 = 1;
pub const LIGHT_MODE_HIGH: u8 = 2;
pub const LIGHT_MODE_SOS: u8 = 3;

/// Light mode labels, indexable by mode value.
pub const LIGHT_MODE_OPTIONS: &[(&str, u8)] = &[
    ("off", LIGHT_MODE_OFF),
    ("low", LIGHT_MODE_LOW),
    ("high", LIGHT_MODE_HIGH),
    ("sos", LIGHT_MODE_SOS),
];

/// Charge mode (`cs`) labels.
pub const CHARGE_MODE_OPTIONS: &[(&str, u8)] = &[("fast", 0), ("silent", 1), ("custom", 2)];

/// Battery-save mode (`lps`) labels.
pub const BATTERY_SAVE_OPTIONS: &[(&str, u8)] = &[("full", 0), ("save", 1), ("custom", 2)];

/// Energy-saving shutdown timer (`pm`) labels, in minutes.
pub const ENERGY_SAVING_OPTIONS: &[(&str, u16)] = &[
    ("Never", 0),
    ("2 hours", 120),
    ("8 hours", 480),
    ("12 hours", 720),
    ("24 hours", 1440),
];
