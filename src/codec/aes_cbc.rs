//! # AES-128-CBC with PKCS#7 Padding
//!
//! Block-level AES helpers for the portable/box AES frame codecs. The
//! Jackery firmware uses AES-128 in CBC mode with the session key doubling
//! as the initialization vector, and PKCS#7 padding to the 16-byte block
//! size.

use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128,
};
use thiserror::Error;

pub const BLOCK_SIZE: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AesError {
    #[error("Invalid key length: expected 16, got {0}")]
    InvalidKeyLength(usize),

    #[error("Ciphertext length {0} is not a multiple of the block size")]
    InvalidDataLength(usize),

    #[error("Invalid PKCS#7 padding")]
    InvalidPadding,
}

/// PKCS#7-pad to the AES block size. Always appends at least one byte.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = data.to_vec();
    padded.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    padded
}

/// Strip and validate PKCS#7 padding.
pub fn pkcs7_unpad(data: &[u8]) -> Result<Vec<u8>, AesError> {
    let &last = data.last().ok_or(AesError::InvalidPadding)?;
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > data.len() {
        return Err(AesError::InvalidPadding);
    }
    if !data[data.len() - pad_len..].iter().all(|&b| b == last) {
        return Err(AesError::InvalidPadding);
    }
    Ok(data[..data.len() - pad_len].to_vec())
}

/// AES-128-CBC encryption. The plaintext is PKCS#7-padded first.
pub fn encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>, AesError> {
    let cipher =
        Aes128::new_from_slice(key).map_err(|_| AesError::InvalidKeyLength(key.len()))?;

    let padded = pkcs7_pad(plaintext);
    let mut result = Vec::with_capacity(padded.len());
    let mut prev_block = *iv;

    for chunk in padded.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        for (i, b) in block.iter_mut().enumerate() {
            *b = chunk[i] ^ prev_block[i];
        }

        let mut ga = GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut ga);
        prev_block.copy_from_slice(&ga);
        result.extend_from_slice(&ga);
    }

    Ok(result)
}

/// AES-128-CBC decryption with PKCS#7 unpadding.
pub fn decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, AesError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(AesError::InvalidDataLength(ciphertext.len()));
    }

    let cipher =
        Aes128::new_from_slice(key).map_err(|_| AesError::InvalidKeyLength(key.len()))?;

    let mut result = Vec::with_capacity(ciphertext.len());
    let mut prev_block = *iv;

    for chunk in ciphertext.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);

        let mut ga = GenericArray::clone_from_slice(&block);
        cipher.decrypt_block(&mut ga);

        for (i, b) in ga.iter_mut().enumerate() {
            *b ^= prev_block[i];
        }

        result.extend_from_slice(&ga);
        prev_block = block;
    }

    pkcs7_unpad(&result)
}
