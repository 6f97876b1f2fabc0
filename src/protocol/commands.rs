//! # Command Builder
//!
//! Assembles the plaintext control/query frames handed to the frame codec:
//! a 3-byte prefix (`DFEC00` portable, `DFED00` box), one byte each of
//! action id, message type and body length, then the UTF-8 hex of a
//! compact JSON body. The length byte counts body bytes, so the JSON must
//! be serialised without whitespace before encoding.

use serde_json::json;

use crate::codec::DeviceType;
use crate::constants::{PREFIX_BOX, PREFIX_PORTABLE};

/// Command action IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActionId {
    OutputDc = 1,
    OutputDcUsb = 2,
    OutputDcCar = 3,
    OutputAc = 4,
    InputAc = 5,
    InputDc = 6,
    LightMode = 7,
    ScreenTime = 8,
    AutoShutdown = 9,
    ChargeModel = 10,
    BatteryModel = 11,
    PowerMode = 12,
    SuperCharge = 13,
    UpsMode = 14,
    TimeSync = 15,
    QueryStrategy = 16,
    InsertStrategy = 17,
    UpdateStrategy = 18,
    DeleteStrategy = 19,
    QueryCurrent = 20,
    DeviceType = 21,
    DeviceEnable = 22,
    BatteryBoundary = 23,
    OutputAcTime = 24,
    OutputDcTime = 25,
    OutputDcUsbTime = 26,
    OutputDcCarTime = 27,
    ChargeSchedule = 28,
    PowerPackList = 248,
    ElectricityData = 249,
    WifiList = 251,
    DeviceProperty = 252,
    WifiConnect = 253,
    OtaVersion = 254,
}

/// BLE message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Query = 1,
    SetWifi = 2,
    DeviceProperty = 3,
    SetControl = 4,
    FirmwareInfo = 5,
    FirmwarePage = 6,
    PowerPack = 7,
    TimeSync = 8,
}

/// Encode a value to compact JSON (no whitespace between separators).
///
/// The on-wire length byte depends on this: `serde_json::to_string` already
/// emits the compact form.
pub fn compact_json(value: &serde_json::Value) -> String {
    value.to_string()
}

/// Builds plaintext command frames for one device family.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    device_type: DeviceType,
    prefix: &'static str,
}

impl CommandBuilder {
    pub fn new(device_type: DeviceType) -> Self {
        let prefix = match device_type {
            DeviceType::Box => PREFIX_BOX,
            DeviceType::Portable => PREFIX_PORTABLE,
        };
        CommandBuilder {
            device_type,
            prefix,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Assemble `prefix || action || msg_type || body_len || body_hex`,
    /// uppercased. Ids and length are masked to one byte each.
    pub fn build(&self, action_id: ActionId, msg_type: MsgType, body: &str) -> String {
        let body_hex = hex::encode(body.as_bytes());
        let body_len = body_hex.len() / 2;
        let command = format!(
            "{}{:02x}{:02x}{:02x}{}",
            self.prefix,
            action_id as u8,
            msg_type as u8,
            (body_len & 0xFF) as u8,
            body_hex
        );
        command.to_uppercase()
    }

    pub fn query_device_property(&self) -> String {
        self.build(ActionId::DeviceProperty, MsgType::DeviceProperty, "")
    }

    pub fn set_dc_output(&self, enabled: bool) -> String {
        let body = compact_json(&json!({"odc": enabled as u8}));
        self.build(ActionId::OutputDc, MsgType::SetControl, &body)
    }

    pub fn set_dc_usb_output(&self, enabled: bool) -> String {
        let body = compact_json(&json!({"odcu": enabled as u8}));
        self.build(ActionId::OutputDcUsb, MsgType::SetControl, &body)
    }

    pub fn set_dc_car_output(&self, enabled: bool) -> String {
        let body = compact_json(&json!({"odcc": enabled as u8}));
        self.build(ActionId::OutputDcCar, MsgType::SetControl, &body)
    }

    pub fn set_ac_output(&self, enabled: bool) -> String {
        let body = compact_json(&json!({"oac": enabled as u8}));
        self.build(ActionId::OutputAc, MsgType::SetControl, &body)
    }

    /// Light mode: 0 = off, 1 = low, 2 = high, 3 = SOS.
    pub fn set_light_mode(&self, mode: u8) -> String {
        let body = compact_json(&json!({"lm": mode}));
        self.build(ActionId::LightMode, MsgType::SetControl, &body)
    }

    pub fn set_light_off(&self) -> String {
        self.set_light_mode(crate::constants::LIGHT_MODE_OFF)
    }

    pub fn set_light_low(&self) -> String {
        self.set_light_mode(crate::constants::LIGHT_MODE_LOW)
    }

    pub fn set_light_high(&self) -> String {
        self.set_light_mode(crate::constants::LIGHT_MODE_HIGH)
    }

    pub fn set_light_sos(&self) -> String {
        self.set_light_mode(crate::constants::LIGHT_MODE_SOS)
    }

    /// Screen timeout in minutes; 0 keeps the screen always on.
    pub fn set_screen_timeout(&self, minutes: u16) -> String {
        let body = compact_json(&json!({"slt": minutes}));
        self.build(ActionId::ScreenTime, MsgType::SetControl, &body)
    }

    pub fn set_screen_always_on(&self) -> String {
        self.set_screen_timeout(0)
    }

    pub fn set_screen_timeout_2min(&self) -> String {
        self.set_screen_timeout(2)
    }

    pub fn set_screen_timeout_2hr(&self) -> String {
        self.set_screen_timeout(120)
    }

    pub fn set_ups_mode(&self, enabled: bool) -> String {
        let body = compact_json(&json!({"ups": enabled as u8}));
        self.build(ActionId::UpsMode, MsgType::SetControl, &body)
    }

    pub fn set_super_charge(&self, enabled: bool) -> String {
        let body = compact_json(&json!({"sfc": enabled as u8}));
        self.build(ActionId::SuperCharge, MsgType::SetControl, &body)
    }

    /// Energy-saving auto-shutdown timer (minutes: 0/120/480/720/1440).
    pub fn set_power_mode(&self, minutes: u16) -> String {
        let body = compact_json(&json!({"pm": minutes}));
        self.build(ActionId::PowerMode, MsgType::SetControl, &body)
    }

    /// Charge mode (0 = fast, 1 = silent, 2 = custom).
    pub fn set_charge_model(&self, model: u8) -> String {
        let body = compact_json(&json!({"cs": model}));
        self.build(ActionId::ChargeModel, MsgType::SetControl, &body)
    }

    /// Battery save mode (0 = full, 1 = save 15-85%, 2 = custom).
    pub fn set_battery_model(&self, model: u8) -> String {
        let body = compact_json(&json!({"lps": model}));
        self.build(ActionId::BatteryModel, MsgType::SetControl, &body)
    }

    pub fn set_battery_boundary(
        &self,
        discharge_limit: u8,
        charge_limit: u8,
        backup_capacity: u8,
    ) -> String {
        let body = compact_json(&json!({
            "dl": discharge_limit,
            "cl": charge_limit,
            "bc": backup_capacity,
        }));
        self.build(ActionId::BatteryBoundary, MsgType::SetControl, &body)
    }

    /// Time sync with the device clock; `utc_offset` in seconds.
    pub fn sync_time(&self, utc_offset: i32) -> String {
        let timestamp = chrono::Utc::now().timestamp();
        self.sync_time_at(timestamp, utc_offset)
    }

    /// Time sync with an explicit timestamp, for deterministic tests.
    pub fn sync_time_at(&self, timestamp: i64, utc_offset: i32) -> String {
        let body = compact_json(&json!({"ts": timestamp, "uo": utc_offset}));
        self.build(ActionId::TimeSync, MsgType::TimeSync, &body)
    }

    pub fn connect_wifi(&self, ssid: &str, password: &str) -> String {
        let body = compact_json(&json!({"s": ssid, "p": password}));
        self.build(ActionId::WifiConnect, MsgType::SetWifi, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_device_property_frame() {
        let builder = CommandBuilder::new(DeviceType::Portable);
        assert_eq!(builder.query_device_property(), "DFEC00FC0300");
    }

    #[test]
    fn test_box_prefix() {
        let builder = CommandBuilder::new(DeviceType::Box);
        assert!(builder.query_device_property().starts_with("DFED00"));
    }

    #[test]
    fn test_set_ac_output_frame() {
        let builder = CommandBuilder::new(DeviceType::Portable);
        let frame = builder.set_ac_output(true);
        // {"oac":1} is 9 bytes
        let expected_body = hex::encode(r#"{"oac":1}"#.as_bytes()).to_uppercase();
        assert_eq!(frame, format!("DFEC00040109{expected_body}"));
    }

    #[test]
    fn test_set_light_mode_body_and_length() {
        let builder = CommandBuilder::new(DeviceType::Portable);
        let frame = builder.set_light_mode(3);
        // prefix(6) + action(2) + msg(2) + len(2); {"lm":3} is 8 bytes
        assert_eq!(&frame[..12], "DFEC00070408");
        let body = hex::decode(&frame[12..]).unwrap();
        assert_eq!(std::str::from_utf8(&body).unwrap(), r#"{"lm":3}"#);
        assert_eq!(body.len(), 8);
    }

    #[test]
    fn test_battery_boundary_compact_json() {
        let builder = CommandBuilder::new(DeviceType::Portable);
        let frame = builder.set_battery_boundary(10, 90, 30);
        let body_len = usize::from_str_radix(&frame[10..12], 16).unwrap();
        let body = hex::decode(&frame[12..]).unwrap();
        assert_eq!(body.len(), body_len);
        let text = std::str::from_utf8(&body).unwrap();
        assert!(!text.contains(' '));
        let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["dl"], 10);
        assert_eq!(parsed["cl"], 90);
        assert_eq!(parsed["bc"], 30);
    }

    #[test]
    fn test_sync_time_frame() {
        let builder = CommandBuilder::new(DeviceType::Portable);
        let frame = builder.sync_time_at(1_700_000_000, 3600);
        assert_eq!(&frame[6..10], "0F08");
        let body = hex::decode(&frame[12..]).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(std::str::from_utf8(&body).unwrap()).unwrap();
        assert_eq!(parsed["ts"], 1_700_000_000i64);
        assert_eq!(parsed["uo"], 3600);
    }

    #[test]
    fn test_connect_wifi_frame() {
        let builder = CommandBuilder::new(DeviceType::Portable);
        let frame = builder.connect_wifi("MyNet", "hunter2");
        assert_eq!(&frame[6..8], "FD");
        assert_eq!(&frame[8..10], "02");
    }

    #[test]
    fn test_empty_body_length_zero() {
        let builder = CommandBuilder::new(DeviceType::Portable);
        let frame = builder.build(ActionId::WifiList, MsgType::Query, "");
        assert_eq!(frame, "DFEC00FB0100");
    }
}
