//! # Jackery Frame Codec Stack
//!
//! Everything between a plaintext command frame and the bytes written to
//! the data characteristic: CRC-16 trailers, RC4/XOR masking primitives,
//! AES-128-CBC block handling and the three wire codecs with their
//! auto-detect wrapper.

pub mod aes_cbc;
pub mod crc;
pub mod frame;
pub mod rc4;

pub use frame::{
    AesFrameCodec, AutoDetectCodec, DeviceType, EncryptionVariant, FrameCodec, KeyMaterial,
    Rc4PortableCodec,
};

use crate::constants::AES_MODEL_CODES;
use crate::error::JackeryError;

/// Resolve the wire encoding for a device.
///
/// Resolution order: explicit override, then box devices (always AES-Box),
/// then the AES portable model codes (20/21), then RC4 for any other known
/// model. `None` means the model code is unknown and the caller should use
/// the auto-detect wrapper.
pub fn select_variant(
    device_type: DeviceType,
    model_code: Option<u16>,
    override_variant: Option<EncryptionVariant>,
) -> Option<EncryptionVariant> {
    if let Some(v) = override_variant {
        return Some(v);
    }
    if device_type == DeviceType::Box {
        return Some(EncryptionVariant::AesBox);
    }
    match model_code {
        Some(code) if AES_MODEL_CODES.contains(&code) => Some(EncryptionVariant::AesPortable),
        Some(_) => Some(EncryptionVariant::Rc4Portable),
        None => None,
    }
}

/// Build a fixed codec for a resolved variant.
pub fn codec_for(variant: EncryptionVariant, key: &KeyMaterial) -> Box<dyn FrameCodec> {
    match variant {
        EncryptionVariant::Rc4Portable => Box::new(Rc4PortableCodec::new(key)),
        EncryptionVariant::AesPortable => Box::new(AesFrameCodec::portable(key)),
        EncryptionVariant::AesBox => Box::new(AesFrameCodec::stationary(key)),
    }
}

/// The codec a client holds: either resolved up front from device type and
/// model code, or the auto-detect wrapper with its one-way latch.
pub enum DeviceCodec {
    Fixed(Box<dyn FrameCodec>),
    Auto(AutoDetectCodec),
}

impl DeviceCodec {
    /// Select and build the codec for a device, falling back to auto-detect
    /// when the model code is unknown.
    pub fn new(
        device_type: DeviceType,
        model_code: Option<u16>,
        override_variant: Option<EncryptionVariant>,
        key: &KeyMaterial,
    ) -> Self {
        match select_variant(device_type, model_code, override_variant) {
            Some(variant) => DeviceCodec::Fixed(codec_for(variant, key)),
            None => DeviceCodec::Auto(AutoDetectCodec::new(device_type, key)),
        }
    }

    pub fn encrypt(&self, plain_hex: &str) -> Result<String, JackeryError> {
        match self {
            DeviceCodec::Fixed(codec) => codec.encrypt(plain_hex),
            DeviceCodec::Auto(auto) => auto.encrypt(plain_hex),
        }
    }

    pub fn decrypt(&mut self, encrypted: &[u8]) -> Option<String> {
        match self {
            DeviceCodec::Fixed(codec) => codec.decrypt(encrypted),
            DeviceCodec::Auto(auto) => auto.decrypt(encrypted),
        }
    }

    /// The variant in effect, if resolved.
    pub fn detected(&self) -> Option<EncryptionVariant> {
        match self {
            DeviceCodec::Fixed(codec) => Some(codec.variant()),
            DeviceCodec::Auto(auto) => auto.detected(),
        }
    }

    /// True when exchanges must probe candidates before trusting a reply.
    pub fn needs_probe(&self) -> bool {
        matches!(self, DeviceCodec::Auto(auto) if auto.detected().is_none())
    }

    /// Candidate variants for probing (the resolved variant when fixed).
    pub fn probe_variants(&self) -> Vec<EncryptionVariant> {
        match self {
            DeviceCodec::Fixed(codec) => vec![codec.variant()],
            DeviceCodec::Auto(auto) => auto.candidate_variants(),
        }
    }

    /// Encrypt with a specific candidate during probing.
    pub fn encrypt_with(
        &self,
        variant: EncryptionVariant,
        plain_hex: &str,
    ) -> Result<String, JackeryError> {
        match self {
            DeviceCodec::Fixed(codec) => codec.encrypt(plain_hex),
            DeviceCodec::Auto(auto) => auto.encrypt_with(variant, plain_hex),
        }
    }

    /// Latch a probed variant.
    pub fn set_detected(&mut self, variant: EncryptionVariant) {
        if let DeviceCodec::Auto(auto) = self {
            auto.set_detected(variant);
        }
    }
}
