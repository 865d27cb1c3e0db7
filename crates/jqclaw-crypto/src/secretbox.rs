//! ChaCha20-Poly1305 secret box.
//!
//! 32-byte key, 12-byte random nonce, 16-byte tag appended to the
//! ciphertext. Key and nonce generation fail closed when the system RNG
//! reports an error.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};
use thiserror::Error;

pub const SECRET_BOX_KEY_BYTES: usize = 32;
pub const SECRET_BOX_NONCE_BYTES: usize = 12;
pub const SECRET_BOX_TAG_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretBoxError {
    #[error("failed to gather randomness: {0}")]
    Rng(String),
    #[error("invalid secretbox key size")]
    InvalidKeySize,
    #[error("invalid secretbox nonce size")]
    InvalidNonceSize,
    #[error("cipher text is too short")]
    CipherTextTooShort,
    #[error("secretbox encryption failed")]
    Encrypt,
    #[error("secretbox decryption failed")]
    Decrypt,
}

/// Generate a fresh 32-byte key from the system CSPRNG.
pub fn generate_key() -> Result<[u8; SECRET_BOX_KEY_BYTES], SecretBoxError> {
    let mut key = [0u8; SECRET_BOX_KEY_BYTES];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| SecretBoxError::Rng(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plain_text` under `key` with a random nonce. Returns the
/// nonce and the ciphertext with the 16-byte tag appended.
pub fn encrypt(
    key: &[u8],
    plain_text: &[u8],
) -> Result<([u8; SECRET_BOX_NONCE_BYTES], Vec<u8>), SecretBoxError> {
    if key.len() != SECRET_BOX_KEY_BYTES {
        return Err(SecretBoxError::InvalidKeySize);
    }

    let mut nonce = [0u8; SECRET_BOX_NONCE_BYTES];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| SecretBoxError::Rng(e.to_string()))?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let cipher_text = cipher
        .encrypt(Nonce::from_slice(&nonce), plain_text)
        .map_err(|_| SecretBoxError::Encrypt)?;
    Ok((nonce, cipher_text))
}

/// Decrypt and authenticate `cipher_text` (ciphertext with appended tag).
pub fn decrypt(
    key: &[u8],
    nonce: &[u8],
    cipher_text: &[u8],
) -> Result<Vec<u8>, SecretBoxError> {
    if key.len() != SECRET_BOX_KEY_BYTES {
        return Err(SecretBoxError::InvalidKeySize);
    }
    if nonce.len() != SECRET_BOX_NONCE_BYTES {
        return Err(SecretBoxError::InvalidNonceSize);
    }
    if cipher_text.len() < SECRET_BOX_TAG_BYTES {
        return Err(SecretBoxError::CipherTextTooShort);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), cipher_text)
        .map_err(|_| SecretBoxError::Decrypt)
}
