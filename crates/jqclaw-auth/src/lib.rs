//! Device authentication for the JQOpenClaw gateway handshake.
//!
//! Builds the canonical v3 signing payload and produces Ed25519 detached
//! signatures over its UTF-8 bytes. The gateway verifies the signature
//! against the device public key reported in the same connect request.

#![forbid(unsafe_code)]

use ed25519_dalek::{Signer, SigningKey};
use jqclaw_crypto::encoding;
use thiserror::Error;

pub const ED25519_PUBLIC_KEY_BYTES: usize = 32;
pub const ED25519_SECRET_KEY_SEED_BYTES: usize = 32;
pub const ED25519_SECRET_KEY_LEGACY_BYTES: usize = 64;
pub const ED25519_SIGNATURE_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid Ed25519 secret key size: {0} (expected 32 or 64)")]
    InvalidSecretKeySize(usize),
}

/// Input fields for the v3 auth payload.
///
/// `device_id`, `client_id`, `client_mode`, `role`, `token`, and `nonce`
/// are passed through verbatim; `platform` and `device_family` are
/// normalized (trimmed, ASCII-lowercased) before joining.
#[derive(Debug, Clone, Default)]
pub struct AuthPayloadInput<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: i64,
    pub token: &'a str,
    pub nonce: &'a str,
    pub platform: &'a str,
    pub device_family: &'a str,
}

/// Build the canonical pipe-joined v3 payload.
///
/// Byte-identical inputs produce byte-identical output; the field order
/// is fixed by the protocol.
pub fn build_payload_v3(input: &AuthPayloadInput<'_>) -> String {
    let scopes = input.scopes.join(",");
    let platform = encoding::normalize_metadata_for_auth(input.platform);
    let device_family = encoding::normalize_metadata_for_auth(input.device_family);

    format!(
        "v3|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        input.device_id,
        input.client_id,
        input.client_mode,
        input.role,
        scopes,
        input.signed_at_ms,
        input.token,
        input.nonce,
        platform,
        device_family,
    )
}

/// Reduce a stored secret key to the 32-byte Ed25519 seed.
///
/// Accepts a bare 32-byte seed or the 64-byte legacy `seed ‖ public`
/// layout, of which the seed half is kept.
pub fn normalize_secret_key_seed(
    secret_key: &[u8],
) -> Result<[u8; ED25519_SECRET_KEY_SEED_BYTES], AuthError> {
    match secret_key.len() {
        ED25519_SECRET_KEY_SEED_BYTES | ED25519_SECRET_KEY_LEGACY_BYTES => {
            let mut seed = [0u8; ED25519_SECRET_KEY_SEED_BYTES];
            seed.copy_from_slice(&secret_key[..ED25519_SECRET_KEY_SEED_BYTES]);
            Ok(seed)
        }
        other => Err(AuthError::InvalidSecretKeySize(other)),
    }
}

/// Produce a base64url-encoded 64-byte Ed25519 detached signature over
/// `payload`.
pub fn sign_detached(secret_key: &[u8], payload: &[u8]) -> Result<String, AuthError> {
    let seed = normalize_secret_key_seed(secret_key)?;
    let signing_key = SigningKey::from_bytes(&seed);
    let signature = signing_key.sign(payload);
    Ok(encoding::to_base64_url(&signature.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use rand_core::OsRng;

    fn payload_input<'a>(scopes: &'a [String]) -> AuthPayloadInput<'a> {
        AuthPayloadInput {
            device_id: "d41d8cd9",
            client_id: "node-host",
            client_mode: "node",
            role: "node",
            scopes,
            signed_at_ms: 1_700_000_000_123,
            token: "tok",
            nonce: "N1",
            platform: " Windows ",
            device_family: "Windows-PC",
        }
    }

    #[test]
    fn payload_v3_is_byte_stable() {
        let input = payload_input(&[]);
        assert_eq!(
            build_payload_v3(&input),
            "v3|d41d8cd9|node-host|node|node||1700000000123|tok|N1|windows|windows-pc"
        );
        assert_eq!(build_payload_v3(&input), build_payload_v3(&input));
    }

    #[test]
    fn payload_v3_joins_scopes_with_commas() {
        let scopes = vec!["a".to_string(), "b".to_string()];
        let payload = build_payload_v3(&payload_input(&scopes));
        assert!(payload.contains("|a,b|"), "unexpected payload: {payload}");
    }

    #[test]
    fn payload_v3_passes_identity_fields_through_verbatim() {
        let input = AuthPayloadInput {
            token: " Spaced Token ",
            nonce: " N ",
            ..payload_input(&[])
        };
        let payload = build_payload_v3(&input);
        assert!(payload.contains("| Spaced Token |"));
        assert!(payload.contains("| N |"));
    }

    #[test]
    fn seed_normalization_accepts_32_and_64_byte_keys() {
        let seed = [7u8; 32];
        assert_eq!(normalize_secret_key_seed(&seed).unwrap(), seed);

        let mut legacy = [0u8; 64];
        legacy[..32].copy_from_slice(&seed);
        legacy[32..].fill(9);
        assert_eq!(normalize_secret_key_seed(&legacy).unwrap(), seed);
    }

    #[test]
    fn seed_normalization_rejects_other_lengths() {
        assert_eq!(
            normalize_secret_key_seed(&[0u8; 31]),
            Err(AuthError::InvalidSecretKeySize(31))
        );
        assert_eq!(
            normalize_secret_key_seed(&[0u8; 33]),
            Err(AuthError::InvalidSecretKeySize(33))
        );
        assert_eq!(
            normalize_secret_key_seed(&[]),
            Err(AuthError::InvalidSecretKeySize(0))
        );
    }

    #[test]
    fn detached_signature_verifies_under_the_public_key() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let seed = signing_key.to_bytes();
        let payload = build_payload_v3(&payload_input(&[]));

        let signature_b64 = sign_detached(&seed, payload.as_bytes()).unwrap();
        let signature_bytes =
            jqclaw_crypto::encoding::from_base64_url(&signature_b64).unwrap();
        assert_eq!(signature_bytes.len(), ED25519_SIGNATURE_BYTES);

        let signature = Signature::from_slice(&signature_bytes).unwrap();
        let verifying_key = VerifyingKey::from_bytes(&signing_key.verifying_key().to_bytes())
            .unwrap();
        verifying_key
            .verify(payload.as_bytes(), &signature)
            .expect("signature must verify");
    }

    #[test]
    fn legacy_64_byte_key_signs_identically_to_its_seed() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let seed = signing_key.to_bytes();
        let mut legacy = Vec::with_capacity(64);
        legacy.extend_from_slice(&seed);
        legacy.extend_from_slice(&signing_key.verifying_key().to_bytes());

        let from_seed = sign_detached(&seed, b"payload").unwrap();
        let from_legacy = sign_detached(&legacy, b"payload").unwrap();
        assert_eq!(from_seed, from_legacy);
    }

    #[test]
    fn signing_with_a_bad_key_length_fails() {
        assert_eq!(
            sign_detached(&[0u8; 16], b"payload"),
            Err(AuthError::InvalidSecretKeySize(16))
        );
    }
}
