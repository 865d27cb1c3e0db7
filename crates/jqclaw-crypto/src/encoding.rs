//! Base64url codec and auth metadata normalization.
//!
//! The decoder is strict: it accepts only the base64url alphabet, allows
//! `=` solely as trailing padding of length at most two, and rejects any
//! input whose decoded bytes do not re-encode to the same (unpadded)
//! string. A non-canonical encoding never aliases a canonical one.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("input contains characters outside the base64url alphabet")]
    InvalidCharacter,
    #[error("invalid base64url padding")]
    InvalidPadding,
    #[error("base64url decode failed")]
    Decode,
    #[error("input is not canonical base64url")]
    NotCanonical,
}

/// Encode bytes as unpadded base64url.
pub fn to_base64_url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode a base64url string, rejecting non-canonical input.
pub fn from_base64_url(text: &str) -> Result<Vec<u8>, EncodingError> {
    let trimmed = text.trim();
    if !trimmed.bytes().all(is_base64_url_byte) {
        return Err(EncodingError::InvalidCharacter);
    }

    if let Some(first_padding) = trimmed.find('=') {
        if first_padding == 0 {
            return Err(EncodingError::InvalidPadding);
        }
        if !trimmed[first_padding..].bytes().all(|b| b == b'=') {
            return Err(EncodingError::InvalidPadding);
        }
        if trimmed.len() - first_padding > 2 {
            return Err(EncodingError::InvalidPadding);
        }
    }

    let unpadded = trimmed.trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(unpadded)
        .map_err(|_| EncodingError::Decode)?;
    if to_base64_url(&decoded) != unpadded {
        return Err(EncodingError::NotCanonical);
    }
    Ok(decoded)
}

/// Normalize a metadata value (platform, device family) for the signed
/// auth payload: trim, then lowercase ASCII letters.
pub fn normalize_metadata_for_auth(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Normalize a certificate fingerprint for comparison: trim, lowercase
/// ASCII, and strip `:`, `-`, and spaces.
pub fn normalize_fingerprint(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn is_base64_url_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'=')
}
