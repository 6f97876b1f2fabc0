//! # Hex Encoding/Decoding Utilities
//!
//! Enhanced hex encoding and decoding helpers used throughout the Jackery
//! protocol implementation. Uppercase hex strings are the canonical
//! intermediate representation of the frame codec, so both casings are
//! provided.

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Invalid hex character: {0}")]
    InvalidCharacter(char),

    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    if hex_str.is_empty() {
        return Err(HexError::EmptyString);
    }

    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Convert a single hex byte string to u8
pub fn hex_byte(hex: &str) -> Result<u8, HexError> {
    if hex.len() != 2 {
        return Err(HexError::OddLength(hex.len()));
    }

    u8::from_str_radix(hex, 16).map_err(|_| {
        HexError::InvalidCharacter(
            hex.chars()
                .find(|c| !c.is_ascii_hexdigit())
                .unwrap_or('?'),
        )
    })
}

/// Parse a u16 out of four hex characters.
pub fn hex_u16(hex: &str) -> Result<u16, HexError> {
    if hex.len() != 4 {
        return Err(HexError::OddLength(hex.len()));
    }

    u16::from_str_radix(hex, 16).map_err(|_| {
        HexError::InvalidCharacter(
            hex.chars()
                .find(|c| !c.is_ascii_hexdigit())
                .unwrap_or('?'),
        )
    })
}

/// Helper for creating test data from hex strings
///
/// Panics on invalid hex (intended for test code only).
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    decode_hex(hex).expect("Invalid hex in test data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let data = vec![0xDF, 0xEC, 0x00, 0x04, 0x01, 0x09];
        let encoded = encode_hex(&data);
        let decoded = decode_hex(&encoded).unwrap();
        assert_eq!(data, decoded);
    }

    #[test]
    fn test_encode_case() {
        let data = vec![0xAB, 0xCD, 0xEF];
        assert_eq!(encode_hex(&data), "abcdef");
        assert_eq!(encode_hex_upper(&data), "ABCDEF");
    }

    #[test]
    fn test_decode_with_whitespace() {
        let hex = "DF EC 00 04";
        let expected = vec![0xDF, 0xEC, 0x00, 0x04];
        assert_eq!(decode_hex(hex).unwrap(), expected);
    }

    #[test]
    fn test_hex_byte() {
        assert_eq!(hex_byte("5A").unwrap(), 0x5A);
        assert_eq!(hex_byte("ff").unwrap(), 0xFF);
        assert!(hex_byte("5").is_err());
    }

    #[test]
    fn test_hex_u16() {
        assert_eq!(hex_u16("0002").unwrap(), 2);
        assert_eq!(hex_u16("DFEC").unwrap(), 0xDFEC);
        assert!(hex_u16("DFE").is_err());
    }

    #[test]
    fn test_errors() {
        assert!(decode_hex("").is_err());
        assert!(decode_hex("1").is_err()); // Odd length
        assert!(decode_hex("GG").is_err()); // Invalid character
    }
}
