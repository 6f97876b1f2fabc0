//! Response-parser tests: single/multi-packet dispatch, reassembly
//! ordering, metadata filtering and the collect-all merge.

use jackery_ble::protocol::parser::{
    is_multi_packet, parse_combined, parse_single, PacketAssembly, META_ACTION_ID,
};
use jackery_ble::{DeviceState, NotificationPayload, StateValue};

fn body_hex(json: &str) -> String {
    hex::encode_upper(json.as_bytes())
}

fn multi_packet_frame(index: u16, total: u16, chunk: &str) -> String {
    format!("80000000{index:04X}{total:04X}{}", body_hex(chunk))
}

#[test]
fn test_dispatch_is_on_first_byte() {
    assert!(is_multi_packet("80000000000100020A"));
    assert!(!is_multi_packet("0004010A7B7D"));
    // 0x08 and 0x80 differ; only a leading 0x80 byte selects reassembly
    assert!(!is_multi_packet("0800000000010002"));
}

#[test]
fn test_two_packet_reassembly_scenario() {
    let mut assembly = PacketAssembly::new();

    assert!(assembly
        .feed(&multi_packet_frame(1, 2, r#"{"rb":83,"ip"#))
        .is_none());
    let combined = assembly
        .feed(&multi_packet_frame(2, 2, r#"":45}"#))
        .expect("second packet completes the stream");

    let notification = parse_combined(&combined);
    let NotificationPayload::Fields(fields) = &notification.payload else {
        panic!("expected a JSON object");
    };
    assert_eq!(fields["rb"], 83);
    assert_eq!(fields["ip"], 45);
}

#[test]
fn test_reassembly_accepts_any_arrival_order() {
    let mut assembly = PacketAssembly::new();
    assert!(assembly.feed(&multi_packet_frame(3, 3, "c")).is_none());
    assert!(assembly.feed(&multi_packet_frame(1, 3, "a")).is_none());
    let combined = assembly.feed(&multi_packet_frame(2, 3, "b")).unwrap();
    assert_eq!(combined, body_hex("abc"));
}

#[test]
fn test_assembly_empty_after_completion() {
    let mut assembly = PacketAssembly::new();
    assembly.feed(&multi_packet_frame(1, 2, "x"));
    assert_eq!(assembly.expected_total(), 2);
    assembly.feed(&multi_packet_frame(2, 2, "y")).unwrap();
    assert!(assembly.is_empty());
    assert_eq!(assembly.expected_total(), 0);
}

#[test]
fn test_incomplete_assembly_never_fires() {
    let mut assembly = PacketAssembly::new();
    for index in [1u16, 2, 4, 5] {
        assert!(assembly.feed(&multi_packet_frame(index, 5, "x")).is_none());
    }
    assert!(!assembly.is_empty());
}

#[test]
fn test_duplicate_packet_overwrites() {
    let mut assembly = PacketAssembly::new();
    assert!(assembly.feed(&multi_packet_frame(1, 2, "old")).is_none());
    assert!(assembly.feed(&multi_packet_frame(1, 2, "new")).is_none());
    let combined = assembly.feed(&multi_packet_frame(2, 2, "!")).unwrap();
    assert_eq!(combined, body_hex("new!"));
}

#[test]
fn test_reset_between_exchanges() {
    let mut assembly = PacketAssembly::new();
    assembly.feed(&multi_packet_frame(1, 3, "stale"));
    assembly.reset();
    assert!(assembly.is_empty());
    assert_eq!(assembly.expected_total(), 0);

    assembly.feed(&multi_packet_frame(1, 2, "{\"a\":"));
    let combined = assembly.feed(&multi_packet_frame(2, 2, "1}")).unwrap();
    assert_eq!(combined, body_hex(r#"{"a":1}"#));
}

#[test]
fn test_single_notification_carries_action_id() {
    let decrypted = format!("00FC0312{}", body_hex(r#"{"rb":83}"#));
    let n = parse_single(&decrypted);
    assert_eq!(n.action_id, Some(0xFC));
    let NotificationPayload::Fields(fields) = &n.payload else {
        panic!("expected fields");
    };
    assert_eq!(fields[META_ACTION_ID], 0xFC);
}

#[test]
fn test_undecodable_body_falls_back_to_raw() {
    // Valid header, body bytes that are not UTF-8 JSON
    let n = parse_single("00040104DEADBEEF");
    assert_eq!(n.action_id, Some(4));
    assert!(matches!(n.payload, NotificationPayload::RawHex(_)));
}

#[test]
fn test_collect_all_merge_scenario() {
    // Three notifications of one poll merge into a single document
    let mut state = DeviceState::new();
    for json in [r#"{"rb":83}"#, r#"{"ip":45,"op":0}"#, r#"{"oac":1,"lm":2}"#] {
        let decrypted = format!("00FC0300{}", body_hex(json));
        assert!(state.merge_notification(&parse_single(&decrypted)));
    }

    assert_eq!(state.len(), 5);
    assert_eq!(state.battery_percent(), Some(83));
    assert_eq!(state.input_power_w(), Some(45));
    assert_eq!(state.output_power_w(), Some(0));
    assert_eq!(state.ac_output_enabled(), Some(true));
    assert_eq!(state.light_mode(), Some(2));
    // The action-id metadata never surfaces
    assert!(state.get(META_ACTION_ID).is_none());
    assert!(state.keys().all(|k| !k.starts_with('_')));
}

#[test]
fn test_later_responses_win_the_merge() {
    let mut state = DeviceState::new();
    for json in [r#"{"rb":82}"#, r#"{"rb":83}"#] {
        let decrypted = format!("00FC0300{}", body_hex(json));
        state.merge_notification(&parse_single(&decrypted));
    }
    assert_eq!(state.battery_percent(), Some(83));
}

#[test]
fn test_typed_accessors_and_transforms() {
    let json = r#"{"rb":83,"bt":215,"acov":2304,"acohz":60,"cs":1,"lps":2,"pm":120,"ec":0,"dl":15,"cl":85,"bc":30,"sfc":1,"odcu":0}"#;
    let decrypted = format!("00FC0300{}", body_hex(json));
    let mut state = DeviceState::new();
    state.merge_notification(&parse_single(&decrypted));

    assert_eq!(state.battery_temperature_c(), Some(21.5));
    assert_eq!(state.ac_output_voltage(), Some(230.4));
    assert_eq!(state.ac_output_frequency_hz(), Some(60));
    assert_eq!(state.charge_mode(), Some(1));
    assert_eq!(state.battery_save_mode(), Some(2));
    assert_eq!(state.power_mode_minutes(), Some(120));
    assert_eq!(state.error_code(), Some(0));
    assert_eq!(state.discharge_limit(), Some(15));
    assert_eq!(state.charge_limit(), Some(85));
    assert_eq!(state.backup_capacity(), Some(30));
    assert_eq!(state.super_charge_enabled(), Some(true));
    assert_eq!(state.dc_usb_enabled(), Some(false));
    // Absent keys stay absent rather than defaulting
    assert_eq!(state.ups_enabled(), None);
}

#[test]
fn test_string_values_survive() {
    let decrypted = format!("00FC0300{}", body_hex(r#"{"wname":"HomeNet","wip":"10.0.0.9"}"#));
    let mut state = DeviceState::new();
    state.merge_notification(&parse_single(&decrypted));
    assert_eq!(
        state.get("wname").and_then(StateValue::as_str),
        Some("HomeNet")
    );
    assert_eq!(
        state.get("wip").and_then(StateValue::as_str),
        Some("10.0.0.9")
    );
}
