//! # Jackery Error Handling
//!
//! This module defines the JackeryError enum, which represents the different
//! error types that can occur in the jackery-ble crate.

use thiserror::Error;

/// Represents the different error types that can occur in the Jackery BLE crate.
#[derive(Debug, Error)]
pub enum JackeryError {
    /// Indicates a BLE scan could not be started or completed.
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// Indicates no matching devices were found during a scan window.
    #[error("No Jackery devices found")]
    NoDevicesFound,

    /// Indicates a connection attempt (including retries) failed.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Indicates an operation required an active connection.
    #[error("Not connected to device")]
    NotConnected,

    /// Indicates a characteristic write failed, usually a dropped link.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Indicates no response arrived within the exchange timeout.
    #[error("Response timeout after {0:?}")]
    ResponseTimeout(std::time::Duration),

    /// Indicates an inbound frame could not be decrypted by any handler.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Indicates a CRC-16 trailer mismatch.
    #[error("CRC mismatch: expected {expected}, calculated {calculated}")]
    CrcMismatch { expected: String, calculated: String },

    /// Indicates a decrypted frame did not carry the variant's magic prefix.
    #[error("Magic prefix mismatch: got {0}")]
    MagicMismatch(String),

    /// Indicates a notification body could not be parsed.
    #[error("Parse failed: {0}")]
    ParseFailed(String),

    /// Indicates a poll produced no usable device state.
    #[error("Update failed: {0}")]
    UpdateFailed(String),

    /// Indicates the configured encryption key was not valid base64 or hex.
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string")]
    InvalidHexString,

    /// A BLE transport error from the underlying stack.
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<crate::util::hex::HexError> for JackeryError {
    fn from(_: crate::util::hex::HexError) -> Self {
        JackeryError::InvalidHexString
    }
}
