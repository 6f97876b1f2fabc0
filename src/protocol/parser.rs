//! # Response Parsing and Device State
//!
//! Decrypted notification bodies arrive as uppercase hex. A body whose
//! first byte is `0x80` belongs to a multi-packet stream (header-tagged
//! segments numbered 1..N, reassembled in [`PacketAssembly`]); anything
//! else is a single notification whose payload hex decodes to a compact
//! JSON object.
//!
//! Parsed fields merge into a [`DeviceState`] document: an open mapping
//! from the device's short keys (`rb`, `ip`, `op`, `oac`, ...) to tagged
//! values. Unknown keys are preserved for forward compatibility; keys
//! beginning with `_` are internal metadata and are filtered during the
//! merge.

use std::collections::BTreeMap;

use log::debug;
use serde_json::Value;

use crate::util::hex::{decode_hex, hex_byte, hex_u16};

/// Internal metadata key carrying the responding action id.
pub const META_ACTION_ID: &str = "_actionId";

/// Fallback key for bodies that did not parse as JSON.
pub const RAW_HEX_KEY: &str = "raw_hex";

// ----------------------------------------------------------------------------
// Notifications
// ----------------------------------------------------------------------------

/// Payload of one parsed notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    /// A JSON object of state fields.
    Fields(serde_json::Map<String, Value>),
    /// Anything that did not decode to a JSON object.
    RawHex(String),
}

/// One parsed notification frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Action id of the responding command, when the header was present.
    pub action_id: Option<u8>,
    pub payload: NotificationPayload,
}

/// Multi-packet streams are tagged with a leading `0x80` byte.
pub fn is_multi_packet(decrypted: &str) -> bool {
    decrypted.starts_with("80")
}

/// Parse a single-notification body.
///
/// Header layout in hex chars: `[0..2]` flags, `[2..4]` action id,
/// `[4..8]` reserved/length, `[8..]` payload. The payload hex decodes to
/// UTF-8 JSON; a non-object result or any decode failure falls back to a
/// raw-hex notification so other responses in the same window survive.
pub fn parse_single(decrypted: &str) -> Notification {
    if decrypted.len() < 8 {
        return Notification {
            action_id: None,
            payload: NotificationPayload::RawHex(decrypted.to_string()),
        };
    }

    let action_id = hex_byte(&decrypted[2..4]).ok();
    let body_hex = &decrypted[8..];
    if body_hex.is_empty() {
        return Notification {
            action_id,
            payload: NotificationPayload::RawHex(decrypted.to_string()),
        };
    }

    match decode_json_object(body_hex) {
        Some(mut fields) => {
            if let Some(id) = action_id {
                fields.insert(META_ACTION_ID.to_string(), Value::from(id));
            }
            Notification {
                action_id,
                payload: NotificationPayload::Fields(fields),
            }
        }
        None => {
            debug!("Notification body did not parse as JSON: {body_hex}");
            Notification {
                action_id,
                payload: NotificationPayload::RawHex(decrypted.to_string()),
            }
        }
    }
}

/// Parse a reassembled multi-packet body (no per-frame header).
pub fn parse_combined(combined_hex: &str) -> Notification {
    match decode_json_object(combined_hex) {
        Some(fields) => Notification {
            action_id: None,
            payload: NotificationPayload::Fields(fields),
        },
        None => Notification {
            action_id: None,
            payload: NotificationPayload::RawHex(combined_hex.to_string()),
        },
    }
}

fn decode_json_object(body_hex: &str) -> Option<serde_json::Map<String, Value>> {
    let bytes = decode_hex(body_hex).ok()?;
    let text = std::str::from_utf8(&bytes).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Multi-packet reassembly
// ----------------------------------------------------------------------------

/// Reassembly buffer for one multi-packet stream.
///
/// Header fields at hex offsets `[8..12]` and `[12..16]` carry the 1-based
/// packet index and the total count as big-endian u16 hex; the chunk
/// follows from offset 16. The buffer is cleared after every completed
/// assembly and at the start of every exchange.
#[derive(Debug, Default)]
pub struct PacketAssembly {
    buffer: BTreeMap<u16, String>,
    expected_total: u16,
}

impl PacketAssembly {
    pub fn new() -> Self {
        PacketAssembly::default()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_total = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn expected_total(&self) -> u16 {
        self.expected_total
    }

    /// Feed one multi-packet frame body. Returns the combined payload hex
    /// once every index 1..=total has arrived.
    pub fn feed(&mut self, decrypted: &str) -> Option<String> {
        if decrypted.len() < 16 {
            debug!("Multi-packet frame too short: {} chars", decrypted.len());
            return None;
        }
        let packet_num = match hex_u16(&decrypted[8..12]) {
            Ok(n) => n,
            Err(e) => {
                debug!("Multi-packet index parse error: {e}");
                return None;
            }
        };
        let total = match hex_u16(&decrypted[12..16]) {
            Ok(n) => n,
            Err(e) => {
                debug!("Multi-packet total parse error: {e}");
                return None;
            }
        };

        self.buffer.insert(packet_num, decrypted[16..].to_string());
        self.expected_total = total;

        if self.buffer.len() >= total as usize {
            let mut combined = String::new();
            for i in 1..=total {
                if let Some(chunk) = self.buffer.get(&i) {
                    combined.push_str(chunk);
                }
            }
            self.reset();
            return Some(combined);
        }
        None
    }
}

// ----------------------------------------------------------------------------
// Device state document
// ----------------------------------------------------------------------------

/// A tagged state value: device JSON fields are sparse and vary by model.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl StateValue {
    fn from_json(value: &Value) -> StateValue {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StateValue::Int(i)
                } else {
                    StateValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::Bool(b) => StateValue::Int(*b as i64),
            Value::String(s) => StateValue::Str(s.clone()),
            other => StateValue::Str(other.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            StateValue::Float(f) => Some(*f as i64),
            StateValue::Str(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Int(i) => Some(*i as f64),
            StateValue::Float(f) => Some(*f),
            StateValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Merged state document of one poll: short keys to tagged values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    values: BTreeMap<String, StateValue>,
}

impl DeviceState {
    pub fn new() -> Self {
        DeviceState::default()
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge one parsed notification into the document.
    ///
    /// JSON fields merge key-by-key with `_`-prefixed metadata filtered
    /// out; raw-hex fallbacks get one more JSON decode attempt before
    /// being dropped. Returns whether anything merged.
    pub fn merge_notification(&mut self, notification: &Notification) -> bool {
        match &notification.payload {
            NotificationPayload::Fields(fields) => {
                let mut merged = false;
                for (key, value) in fields {
                    if key.starts_with('_') {
                        continue;
                    }
                    self.values
                        .insert(key.clone(), StateValue::from_json(value));
                    merged = true;
                }
                merged
            }
            NotificationPayload::RawHex(raw) => match decode_json_object(raw) {
                Some(fields) => {
                    let mut merged = false;
                    for (key, value) in &fields {
                        if key.starts_with('_') {
                            continue;
                        }
                        self.values
                            .insert(key.clone(), StateValue::from_json(value));
                        merged = true;
                    }
                    merged
                }
                None => {
                    debug!("Dropping unparseable response: {raw}");
                    false
                }
            },
        }
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(StateValue::as_int)
    }

    // Typed accessors for the surfaced key catalogue. Adapters apply their
    // own transforms (bt/10, acov/10) here so callers never see raw tenths.

    pub fn battery_percent(&self) -> Option<i64> {
        self.int("rb")
    }

    pub fn battery_temperature_c(&self) -> Option<f64> {
        self.values.get("bt").and_then(StateValue::as_f64).map(|v| v / 10.0)
    }

    pub fn input_power_w(&self) -> Option<i64> {
        self.int("ip")
    }

    pub fn output_power_w(&self) -> Option<i64> {
        self.int("op")
    }

    pub fn ac_input_power_w(&self) -> Option<i64> {
        self.int("acip")
    }

    pub fn solar_input_power_w(&self) -> Option<i64> {
        self.int("cip")
    }

    pub fn ac_output_power_w(&self) -> Option<i64> {
        self.int("acps")
    }

    pub fn ac_output_voltage(&self) -> Option<f64> {
        self.values.get("acov").and_then(StateValue::as_f64).map(|v| v / 10.0)
    }

    pub fn ac_output_frequency_hz(&self) -> Option<i64> {
        self.int("acohz")
    }

    pub fn ac_output_enabled(&self) -> Option<bool> {
        self.int("oac").map(|v| v == 1)
    }

    pub fn dc_output_enabled(&self) -> Option<bool> {
        self.int("odc").map(|v| v == 1)
    }

    pub fn dc_usb_enabled(&self) -> Option<bool> {
        self.int("odcu").map(|v| v == 1)
    }

    pub fn dc_car_enabled(&self) -> Option<bool> {
        self.int("odcc").map(|v| v == 1)
    }

    pub fn ups_enabled(&self) -> Option<bool> {
        self.int("ups").map(|v| v == 1)
    }

    pub fn super_charge_enabled(&self) -> Option<bool> {
        self.int("sfc").map(|v| v == 1)
    }

    pub fn light_mode(&self) -> Option<i64> {
        self.int("lm")
    }

    pub fn charge_mode(&self) -> Option<i64> {
        self.int("cs")
    }

    pub fn battery_save_mode(&self) -> Option<i64> {
        self.int("lps")
    }

    pub fn power_mode_minutes(&self) -> Option<i64> {
        self.int("pm")
    }

    pub fn error_code(&self) -> Option<i64> {
        self.int("ec")
    }

    pub fn discharge_limit(&self) -> Option<i64> {
        self.int("dl")
    }

    pub fn charge_limit(&self) -> Option<i64> {
        self.int("cl")
    }

    pub fn backup_capacity(&self) -> Option<i64> {
        self.int("bc")
    }
}

/// Render the common status subset for display.
pub fn format_status(state: &DeviceState) -> String {
    let on_off = |v: Option<bool>| if v.unwrap_or(false) { "ON" } else { "OFF" };
    let mut lines = vec![format!(
        "Battery: {}% ({:.1}C)",
        state.battery_percent().unwrap_or(0),
        state.battery_temperature_c().unwrap_or(0.0),
    )];
    lines.push(format!(
        "Input: {}W  Output: {}W",
        state.input_power_w().unwrap_or(0),
        state.output_power_w().unwrap_or(0),
    ));
    lines.push(format!(
        "AC: {}  DC: {}  USB: {}  Car: {}  UPS: {}",
        on_off(state.ac_output_enabled()),
        on_off(state.dc_output_enabled()),
        on_off(state.dc_usb_enabled()),
        on_off(state.dc_car_enabled()),
        on_off(state.ups_enabled()),
    ));
    lines.join("\n")
}
