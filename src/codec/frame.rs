//! # Frame Codecs
//!
//! The three incompatible wire encodings used by Jackery devices, plus the
//! auto-detect wrapper that resolves between them:
//!
//! - **Portable-RC4** (`DFEC` magic, 1 mask byte): XOR-mask, CRC trailer,
//!   RC4 over the whole frame with the raw key bytes.
//! - **Portable-AES** (`DFEC` magic, 1 mask byte): AES-128-CBC with the
//!   16-byte key doubling as IV, PKCS#7 padded.
//! - **Box-AES** (`DFED` magic, 2 mask bytes): as Portable-AES with a
//!   wider random suffix and a larger minimum frame.
//!
//! Uppercase hex strings are the canonical intermediate representation:
//! `encrypt` consumes the plaintext frame hex and emits ciphertext hex,
//! `decrypt` consumes raw notification bytes and emits the frame body hex
//! (everything after the magic prefix). Decryption never surfaces an error;
//! a frame that fails any check decodes to `None` so that auto-detect can
//! keep probing.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::debug;
use rand::Rng;

use crate::codec::aes_cbc;
use crate::codec::crc::crc16_hex;
use crate::codec::rc4::{rc4_crypt, xor_decode_hex, xor_with_byte};
use crate::constants::{MAGIC_BOX, MAGIC_PORTABLE};
use crate::error::JackeryError;
use crate::util::hex::decode_hex;

/// Jackery device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Portable,
    Box,
}

impl DeviceType {
    /// Classify a device from its advertised name: `Box` iff the name
    /// contains "BOX" case-insensitively.
    pub fn classify_name(name: &str) -> Self {
        if name.to_uppercase().contains("BOX") {
            DeviceType::Box
        } else {
            DeviceType::Portable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Portable => "portable",
            DeviceType::Box => "box",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved wire encoding of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionVariant {
    Rc4Portable,
    AesPortable,
    AesBox,
}

impl std::fmt::Display for EncryptionVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EncryptionVariant::Rc4Portable => "rc4",
            EncryptionVariant::AesPortable => "aes_portable",
            EncryptionVariant::AesBox => "aes_box",
        };
        f.write_str(name)
    }
}

/// Session key material as configured or derived from an advertisement.
///
/// RC4 consumes the raw bytes; the AES codecs use exactly 16 bytes,
/// truncating longer keys and zero-right-padding shorter ones. The derived
/// keys are 22 bytes (SN suffix + GUID + salt), so both behaviours matter.
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    pub fn from_base64(key: &str) -> Result<Self, JackeryError> {
        let bytes = BASE64
            .decode(key.trim())
            .map_err(|e| JackeryError::InvalidKey(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    pub fn from_hex(key: &str) -> Result<Self, JackeryError> {
        let bytes =
            decode_hex(key).map_err(|_| JackeryError::InvalidKey("not valid hex".into()))?;
        Self::from_bytes(bytes)
    }

    /// Parse a configured key, base64 (the usual exchange format) or hex.
    pub fn parse(key: &str, is_base64: bool) -> Result<Self, JackeryError> {
        if is_base64 {
            Self::from_base64(key)
        } else {
            Self::from_hex(key)
        }
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, JackeryError> {
        if bytes.is_empty() {
            return Err(JackeryError::InvalidKey("empty key".into()));
        }
        Ok(KeyMaterial { bytes })
    }

    /// Raw key bytes, as used by the RC4 codec.
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    /// Exactly 16 bytes for the AES codecs: truncate or zero-right-pad.
    pub fn clamped(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        let n = self.bytes.len().min(16);
        key[..n].copy_from_slice(&self.bytes[..n]);
        key
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        write!(f, "KeyMaterial({} bytes)", self.bytes.len())
    }
}

/// One wire encoding: plaintext frame hex in, ciphertext hex out, and back.
pub trait FrameCodec: Send {
    fn variant(&self) -> EncryptionVariant;

    /// Mask, checksum and encrypt an outbound plaintext frame hex.
    fn encrypt(&self, plain_hex: &str) -> Result<String, JackeryError>;

    /// Decrypt and validate an inbound notification. Returns the uppercase
    /// frame body after the magic prefix, or `None` when any check fails.
    fn decrypt(&mut self, encrypted: &[u8]) -> Option<String>;
}

// ----------------------------------------------------------------------------
// Portable RC4
// ----------------------------------------------------------------------------

/// RC4 codec used by most portable models.
pub struct Rc4PortableCodec {
    key: Vec<u8>,
}

impl Rc4PortableCodec {
    pub fn new(key: &KeyMaterial) -> Self {
        Rc4PortableCodec {
            key: key.raw().to_vec(),
        }
    }
}

impl FrameCodec for Rc4PortableCodec {
    fn variant(&self) -> EncryptionVariant {
        EncryptionVariant::Rc4Portable
    }

    fn encrypt(&self, plain_hex: &str) -> Result<String, JackeryError> {
        let security_byte: u8 = rand::thread_rng().gen_range(1..=255);
        let security_hex = format!("{security_byte:02x}");

        let data_bytes = decode_hex(plain_hex)?;
        let xor_data = xor_with_byte(&data_bytes, security_byte);
        let crc_input = format!("{xor_data}{security_hex}");
        let crc = crc16_hex(&crc_input);

        let plaintext_bytes = decode_hex(&format!("{crc_input}{crc}"))?;
        let encrypted = rc4_crypt(&plaintext_bytes, &self.key);
        Ok(hex::encode_upper(encrypted))
    }

    fn decrypt(&mut self, encrypted: &[u8]) -> Option<String> {
        let decrypted = rc4_crypt(encrypted, &self.key);
        let hex_str = hex::encode_upper(&decrypted);
        if hex_str.len() < 16 {
            return None;
        }

        let data_without_crc = &hex_str[..hex_str.len() - 4];
        let expected_crc = &hex_str[hex_str.len() - 4..];
        let calculated_crc = crc16_hex(data_without_crc);
        if !calculated_crc.eq_ignore_ascii_case(expected_crc) {
            debug!("RC4 CRC mismatch: expected {expected_crc}, calculated {calculated_crc}");
            return None;
        }

        // The masking byte sits directly before the CRC trailer
        let xor_key_hex = &data_without_crc[data_without_crc.len() - 2..];
        let xor_data_hex = &data_without_crc[..data_without_crc.len() - 2];
        let decoded_hex = xor_decode_hex(xor_data_hex, xor_key_hex).ok()?;

        if !decoded_hex.to_uppercase().starts_with(MAGIC_PORTABLE) {
            return None;
        }
        Some(decoded_hex[4..].to_uppercase())
    }
}

// ----------------------------------------------------------------------------
// Portable / box AES
// ----------------------------------------------------------------------------

/// AES-128-CBC codec shared by the portable AES models (codes 20/21) and
/// the box family; they differ only in magic prefix, random-suffix width
/// and minimum decoded length.
pub struct AesFrameCodec {
    key: [u8; 16],
    magic: &'static str,
    suffix_bytes: usize,
    min_hex_len: usize,
    variant: EncryptionVariant,
}

impl AesFrameCodec {
    pub fn portable(key: &KeyMaterial) -> Self {
        AesFrameCodec {
            key: key.clamped(),
            magic: MAGIC_PORTABLE,
            suffix_bytes: 1,
            min_hex_len: 16,
            variant: EncryptionVariant::AesPortable,
        }
    }

    pub fn stationary(key: &KeyMaterial) -> Self {
        AesFrameCodec {
            key: key.clamped(),
            magic: MAGIC_BOX,
            suffix_bytes: 2,
            min_hex_len: 36,
            variant: EncryptionVariant::AesBox,
        }
    }

    fn random_suffix(&self) -> String {
        let mut rng = rand::thread_rng();
        if self.suffix_bytes == 2 {
            format!("{:04x}", rng.gen_range(1..=65535u16))
        } else {
            format!("{:02x}", rng.gen_range(1..=255u8))
        }
    }
}

impl FrameCodec for AesFrameCodec {
    fn variant(&self) -> EncryptionVariant {
        self.variant
    }

    fn encrypt(&self, plain_hex: &str) -> Result<String, JackeryError> {
        let data_with_suffix = format!("{plain_hex}{}", self.random_suffix());
        let crc = crc16_hex(&data_with_suffix);
        let plaintext = decode_hex(&format!("{data_with_suffix}{crc}"))?;

        // IV = key, per the device firmware
        let encrypted = aes_cbc::encrypt(&self.key, &self.key, &plaintext)
            .map_err(|e| JackeryError::Other(e.to_string()))?;
        Ok(hex::encode_upper(encrypted))
    }

    fn decrypt(&mut self, encrypted: &[u8]) -> Option<String> {
        let decrypted = aes_cbc::decrypt(&self.key, &self.key, encrypted).ok()?;
        let hex_str = hex::encode_upper(&decrypted);
        if hex_str.len() < self.min_hex_len {
            return None;
        }

        if &hex_str[..4] != self.magic {
            return None;
        }

        let data_for_crc = &hex_str[..hex_str.len() - 4];
        let expected_crc = &hex_str[hex_str.len() - 4..];
        let calculated_crc = crc16_hex(data_for_crc);
        if !calculated_crc.eq_ignore_ascii_case(expected_crc) {
            debug!("AES CRC mismatch: expected {expected_crc}, calculated {calculated_crc}");
            return None;
        }

        let suffix_chars = self.suffix_bytes * 2;
        Some(hex_str[4..hex_str.len() - (suffix_chars + 4)].to_string())
    }
}

// ----------------------------------------------------------------------------
// Auto-detect
// ----------------------------------------------------------------------------

/// Codec wrapper that resolves the wire encoding by trial.
///
/// Holds an ordered candidate list (portable: RC4 then AES; box: AES only)
/// and a one-way latch. Encryption uses the latched handler if resolved,
/// else the first candidate; decryption tries the latched handler first and
/// on a miss re-opens the latch and probes every candidate in order. A
/// decode that yields nothing never moves the latch.
pub struct AutoDetectCodec {
    candidates: Vec<Box<dyn FrameCodec>>,
    detected: Option<usize>,
}

impl AutoDetectCodec {
    pub fn new(device_type: DeviceType, key: &KeyMaterial) -> Self {
        let candidates: Vec<Box<dyn FrameCodec>> = match device_type {
            DeviceType::Box => vec![Box::new(AesFrameCodec::stationary(key))],
            DeviceType::Portable => vec![
                Box::new(Rc4PortableCodec::new(key)),
                Box::new(AesFrameCodec::portable(key)),
            ],
        };
        AutoDetectCodec {
            candidates,
            detected: None,
        }
    }

    /// The variant the latch has resolved to, if any.
    pub fn detected(&self) -> Option<EncryptionVariant> {
        self.detected.map(|i| self.candidates[i].variant())
    }

    /// Candidate variants in probe order.
    pub fn candidate_variants(&self) -> Vec<EncryptionVariant> {
        self.candidates.iter().map(|c| c.variant()).collect()
    }

    /// Latch a specific variant after a successful probe.
    pub fn set_detected(&mut self, variant: EncryptionVariant) {
        if let Some(idx) = self
            .candidates
            .iter()
            .position(|c| c.variant() == variant)
        {
            self.detected = Some(idx);
        }
    }

    /// Encrypt with a specific candidate without touching the latch.
    pub fn encrypt_with(&self, variant: EncryptionVariant, plain_hex: &str) -> Result<String, JackeryError> {
        match self.candidates.iter().find(|c| c.variant() == variant) {
            Some(codec) => codec.encrypt(plain_hex),
            None => self.candidates[0].encrypt(plain_hex),
        }
    }
}

impl FrameCodec for AutoDetectCodec {
    fn variant(&self) -> EncryptionVariant {
        self.detected()
            .unwrap_or_else(|| self.candidates[0].variant())
    }

    fn encrypt(&self, plain_hex: &str) -> Result<String, JackeryError> {
        let idx = self.detected.unwrap_or(0);
        self.candidates[idx].encrypt(plain_hex)
    }

    fn decrypt(&mut self, encrypted: &[u8]) -> Option<String> {
        if let Some(idx) = self.detected {
            if let Some(body) = self.candidates[idx].decrypt(encrypted) {
                return Some(body);
            }
            // Resolved handler stopped decoding; re-open the latch
            self.detected = None;
        }

        for idx in 0..self.candidates.len() {
            if let Some(body) = self.candidates[idx].decrypt(encrypted) {
                self.detected = Some(idx);
                debug!(
                    "Auto-detected encryption variant: {}",
                    self.candidates[idx].variant()
                );
                return Some(body);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> KeyMaterial {
        KeyMaterial::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    #[test]
    fn test_key_clamp_pads_short_keys() {
        let key = KeyMaterial::from_hex("0102").unwrap();
        let clamped = key.clamped();
        assert_eq!(&clamped[..2], &[0x01, 0x02]);
        assert!(clamped[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_key_clamp_truncates_long_keys() {
        // Derived keys are 22 bytes: SN suffix + GUID + salt
        let key = KeyMaterial::from_base64("MTIzNDU2q6Kjqqq7NipTWTFjNUI5QA==").unwrap();
        assert!(key.raw().len() > 16);
        assert_eq!(key.clamped().len(), 16);
        assert_eq!(&key.clamped()[..], &key.raw()[..16]);
    }

    #[test]
    fn test_rc4_codec_roundtrip() {
        let key = test_key();
        let mut codec = Rc4PortableCodec::new(&key);
        let frame = "DFEC000401097B226F6163223A317D";
        let encrypted = codec.encrypt(frame).unwrap();
        let body = codec
            .decrypt(&hex::decode(&encrypted).unwrap())
            .expect("frame should decode");
        // The body is everything after the 4-char magic
        assert_eq!(body, &frame[4..]);
    }

    #[test]
    fn test_aes_portable_codec_roundtrip() {
        let key = test_key();
        let mut codec = AesFrameCodec::portable(&key);
        let frame = "DFEC000401097B226F6163223A317D";
        let encrypted = codec.encrypt(frame).unwrap();
        let body = codec.decrypt(&hex::decode(&encrypted).unwrap()).unwrap();
        assert_eq!(body, &frame[4..]);
    }

    #[test]
    fn test_aes_box_codec_roundtrip() {
        let key = test_key();
        let mut codec = AesFrameCodec::stationary(&key);
        let frame = "DFED00FC030B7B226F70223A313030307D";
        let encrypted = codec.encrypt(frame).unwrap();
        let body = codec.decrypt(&hex::decode(&encrypted).unwrap()).unwrap();
        assert_eq!(body, &frame[4..]);
    }

    #[test]
    fn test_decrypt_rejects_wrong_magic() {
        let key = test_key();
        // A box frame fed to the portable AES codec must decode to None
        let box_codec = AesFrameCodec::stationary(&key);
        let encrypted = box_codec.encrypt("DFED00FC030B7B226F70223A313030307D").unwrap();
        let mut portable = AesFrameCodec::portable(&key);
        assert!(portable
            .decrypt(&hex::decode(&encrypted).unwrap())
            .is_none());
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let key = test_key();
        let mut codec = Rc4PortableCodec::new(&key);
        assert!(codec.decrypt(&[0x00; 4]).is_none());
        assert!(codec.decrypt(&[0xA5; 64]).is_none());
    }

    #[test]
    fn test_auto_detect_latches_on_decode() {
        let key = test_key();
        let aes = AesFrameCodec::portable(&key);
        let encrypted = aes.encrypt("DFEC000401097B226F6163223A317D").unwrap();

        let mut auto = AutoDetectCodec::new(DeviceType::Portable, &key);
        assert_eq!(auto.detected(), None);
        let body = auto.decrypt(&hex::decode(&encrypted).unwrap()).unwrap();
        assert_eq!(body, "000401097B226F6163223A317D");
        assert_eq!(auto.detected(), Some(EncryptionVariant::AesPortable));
    }

    #[test]
    fn test_auto_detect_null_decode_keeps_latch_open() {
        let key = test_key();
        let mut auto = AutoDetectCodec::new(DeviceType::Portable, &key);
        assert!(auto.decrypt(&[0x11; 32]).is_none());
        assert_eq!(auto.detected(), None);
    }

    #[test]
    fn test_auto_detect_box_candidates() {
        let key = test_key();
        let auto = AutoDetectCodec::new(DeviceType::Box, &key);
        assert_eq!(auto.candidate_variants(), vec![EncryptionVariant::AesBox]);
    }
}
