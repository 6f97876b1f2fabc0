//! Exchange-engine tests driven through the notification router, which
//! carries all the inbound shared state (codec latch, assembly buffer,
//! response slot, collect sink) without needing a radio.

use std::time::Duration;

use jackery_ble::ble::NotificationRouter;
use jackery_ble::codec::{
    AesFrameCodec, DeviceCodec, DeviceType, EncryptionVariant, FrameCodec, KeyMaterial,
    Rc4PortableCodec,
};
use jackery_ble::{CommandBuilder, NotificationPayload};

fn key() -> KeyMaterial {
    KeyMaterial::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
}

fn rc4_device_frame(plain: &str) -> Vec<u8> {
    let encrypted = Rc4PortableCodec::new(&key()).encrypt(plain).unwrap();
    hex::decode(encrypted).unwrap()
}

fn aes_device_frame(plain: &str) -> Vec<u8> {
    let encrypted = AesFrameCodec::portable(&key()).encrypt(plain).unwrap();
    hex::decode(encrypted).unwrap()
}

fn json_frame(json: &str) -> String {
    // Inbound single-notification frame: magic + flags + action + reserved
    format!("DFEC00FC0300{}", hex::encode_upper(json.as_bytes()))
}

async fn fixed_rc4_router() -> NotificationRouter {
    let router = NotificationRouter::new();
    router
        .set_codec(Some(DeviceCodec::new(
            DeviceType::Portable,
            Some(3),
            None,
            &key(),
        )))
        .await;
    router
}

#[tokio::test]
async fn test_single_response_signals_waiter() {
    let router = fixed_rc4_router().await;
    router.begin_exchange().await;

    let waiter = router.wait_response(Duration::from_secs(1));
    let ingest = async {
        router.ingest(&rc4_device_frame(&json_frame(r#"{"rb":83}"#))).await;
    };
    let (response, ()) = tokio::join!(waiter, ingest);

    let response = response.expect("response should arrive");
    assert!(response.starts_with("00FC0300"));
}

#[tokio::test]
async fn test_wait_response_times_out_quietly() {
    let router = fixed_rc4_router().await;
    router.begin_exchange().await;
    assert!(router.wait_response(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_begin_exchange_clears_stale_response() {
    let router = fixed_rc4_router().await;
    router.ingest(&rc4_device_frame(&json_frame(r#"{"rb":1}"#))).await;
    assert!(router.wait_response(Duration::from_millis(10)).await.is_some());

    router.begin_exchange().await;
    assert!(router.wait_response(Duration::from_millis(10)).await.is_none());
}

#[tokio::test]
async fn test_undecryptable_notification_is_dropped() {
    let router = fixed_rc4_router().await;
    router.begin_exchange().await;
    router.ingest(&[0x55; 24]).await;
    assert!(router.wait_response(Duration::from_millis(10)).await.is_none());
}

#[tokio::test]
async fn test_collect_sink_receives_parsed_notifications() {
    let router = fixed_rc4_router().await;
    let mut rx = router.install_sink().await;
    router.begin_exchange().await;

    for json in [r#"{"rb":83}"#, r#"{"ip":45,"op":0}"#, r#"{"oac":1,"lm":2}"#] {
        router.ingest(&rc4_device_frame(&json_frame(json))).await;
    }
    router.remove_sink().await;

    let mut notifications = Vec::new();
    while let Ok(n) = rx.try_recv() {
        notifications.push(n);
    }
    assert_eq!(notifications.len(), 3);
    for n in &notifications {
        assert!(matches!(n.payload, NotificationPayload::Fields(_)));
    }
}

#[tokio::test]
async fn test_removed_sink_stops_delivery() {
    let router = fixed_rc4_router().await;
    let mut rx = router.install_sink().await;
    router.ingest(&rc4_device_frame(&json_frame(r#"{"rb":1}"#))).await;
    router.remove_sink().await;
    router.ingest(&rc4_device_frame(&json_frame(r#"{"rb":2}"#))).await;

    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_multi_packet_stream_signals_once_complete() {
    let router = fixed_rc4_router().await;
    let mut rx = router.install_sink().await;
    router.begin_exchange().await;

    let chunk1 = hex::encode_upper(r#"{"rb":83,"#.as_bytes());
    let chunk2 = hex::encode_upper(r#""ip":45}"#.as_bytes());
    router
        .ingest(&rc4_device_frame(&format!("DFEC8000000000010002{chunk1}")))
        .await;
    // First half: no response yet
    assert!(router.wait_response(Duration::from_millis(10)).await.is_none());

    router
        .ingest(&rc4_device_frame(&format!("DFEC8000000000020002{chunk2}")))
        .await;
    let combined = router.wait_response(Duration::from_millis(10)).await.unwrap();
    assert_eq!(combined, format!("{chunk1}{chunk2}"));

    router.remove_sink().await;
    let n = rx.try_recv().expect("one notification for the whole stream");
    let NotificationPayload::Fields(fields) = n.payload else {
        panic!("expected fields");
    };
    assert_eq!(fields["rb"], 83);
    assert_eq!(fields["ip"], 45);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_auto_detect_latches_from_inbound_traffic() {
    // Portable device that actually speaks AES: the router's auto codec
    // misses with RC4, decodes with AES and latches
    let router = NotificationRouter::new();
    router
        .set_codec(Some(DeviceCodec::new(DeviceType::Portable, None, None, &key())))
        .await;
    assert!(router.needs_probe().await);
    assert_eq!(
        router.probe_variants().await,
        vec![
            EncryptionVariant::Rc4Portable,
            EncryptionVariant::AesPortable
        ]
    );

    router.ingest(&aes_device_frame(&json_frame(r#"{"rb":83}"#))).await;
    assert_eq!(router.detected().await, Some(EncryptionVariant::AesPortable));
    assert!(!router.needs_probe().await);

    // Outbound traffic now uses the latched variant
    let cmd = CommandBuilder::new(DeviceType::Portable).query_device_property();
    let encrypted = router.encrypt(&cmd).await.unwrap();
    let mut aes = AesFrameCodec::portable(&key());
    assert!(aes.decrypt(&hex::decode(encrypted).unwrap()).is_some());
}

#[tokio::test]
async fn test_probe_encrypts_per_candidate() {
    let router = NotificationRouter::new();
    router
        .set_codec(Some(DeviceCodec::new(DeviceType::Portable, None, None, &key())))
        .await;

    let cmd = CommandBuilder::new(DeviceType::Portable).query_device_property();
    let as_rc4 = router
        .encrypt_with(EncryptionVariant::Rc4Portable, &cmd)
        .await
        .unwrap();
    let as_aes = router
        .encrypt_with(EncryptionVariant::AesPortable, &cmd)
        .await
        .unwrap();

    let mut rc4 = Rc4PortableCodec::new(&key());
    let mut aes = AesFrameCodec::portable(&key());
    assert!(rc4.decrypt(&hex::decode(&as_rc4).unwrap()).is_some());
    assert!(aes.decrypt(&hex::decode(&as_aes).unwrap()).is_some());
    // And the mismatched pairings miss
    assert!(aes.decrypt(&hex::decode(&as_rc4).unwrap()).is_none());
    assert!(rc4.decrypt(&hex::decode(&as_aes).unwrap()).is_none());
}

#[tokio::test]
async fn test_manual_latch_after_probe_response() {
    let router = NotificationRouter::new();
    router
        .set_codec(Some(DeviceCodec::new(DeviceType::Portable, None, None, &key())))
        .await;
    router.latch(EncryptionVariant::AesPortable).await;
    assert_eq!(router.detected().await, Some(EncryptionVariant::AesPortable));
}

#[tokio::test]
async fn test_unkeyed_router_surfaces_raw_hex() {
    let router = NotificationRouter::new();
    router.set_codec(None).await;
    router.begin_exchange().await;
    router.ingest(&[0xDE, 0xAD, 0xBE, 0xEF]).await;
    assert_eq!(
        router.wait_response(Duration::from_millis(10)).await,
        Some("DEADBEEF".to_string())
    );
}

#[tokio::test]
async fn test_stale_assembly_cleared_by_new_exchange() {
    let router = fixed_rc4_router().await;
    let chunk = hex::encode_upper(b"half");
    router
        .ingest(&rc4_device_frame(&format!("DFEC8000000000010002{chunk}")))
        .await;

    // New exchange drops the half-assembled stream; a fresh two-packet
    // stream still completes cleanly
    router.begin_exchange().await;
    let c1 = hex::encode_upper(r#"{"op":9"#.as_bytes());
    let c2 = hex::encode_upper(b"}");
    router
        .ingest(&rc4_device_frame(&format!("DFEC8000000000010002{c1}")))
        .await;
    let combined = {
        router
            .ingest(&rc4_device_frame(&format!("DFEC8000000000020002{c2}")))
            .await;
        router.wait_response(Duration::from_millis(10)).await.unwrap()
    };
    assert_eq!(combined, format!("{c1}{c2}"));
}
