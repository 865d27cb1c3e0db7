//! Durable Ed25519 device identity.
//!
//! Provides [`IdentityStore`], which loads or creates the on-disk device
//! identity file. The device id is always the lowercase hex SHA-256 of
//! the 32-byte public key; a stored id that disagrees is re-derived and
//! the file rewritten best-effort. A corrupt file is fatal — the store
//! never silently regenerates a keypair over existing material.

#![forbid(unsafe_code)]

use ed25519_dalek::SigningKey;
use jqclaw_auth::{
    ED25519_PUBLIC_KEY_BYTES, ED25519_SECRET_KEY_LEGACY_BYTES, ED25519_SECRET_KEY_SEED_BYTES,
};
use jqclaw_crypto::encoding;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// In-memory device identity.
///
/// `secret_key` is either a 32-byte seed or the 64-byte legacy
/// `seed ‖ public` layout; signing normalizes to the seed.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Lowercase hex SHA-256 of the public key, 64 chars.
    pub device_id: String,
    /// Raw 32-byte Ed25519 public key.
    pub public_key: Vec<u8>,
    /// 32- or 64-byte Ed25519 secret key material.
    pub secret_key: Vec<u8>,
}

/// On-disk identity format.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    version: u8,
    device_id: String,
    /// Base64url-encoded raw public key.
    public_key: String,
    /// Base64url-encoded secret key (32-byte seed or 64-byte legacy).
    secret_key: String,
    #[serde(default)]
    created_at_ms: u64,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to open identity file: {path}")]
    Read { path: PathBuf },
    #[error("invalid identity file JSON: {path}")]
    InvalidJson { path: PathBuf },
    #[error("identity file is missing required fields: {path}")]
    MissingFields { path: PathBuf },
    #[error("identity file contains invalid base64url key data: {path}")]
    InvalidKeyData { path: PathBuf },
    #[error("identity key size is invalid: {path}")]
    InvalidKeySize { path: PathBuf },
    #[error("failed to derive device id from stored key")]
    DeriveDeviceId,
    #[error("failed to create identity directory: {path}")]
    CreateDirectory { path: PathBuf },
    #[error("failed to persist identity file {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Derive the device id from a raw public key.
///
/// Returns an empty string iff the key is not exactly 32 bytes.
pub fn derive_device_id(public_key: &[u8]) -> String {
    if public_key.len() != ED25519_PUBLIC_KEY_BYTES {
        return String::new();
    }
    hex::encode(Sha256::digest(public_key))
}

/// Loads or creates the device identity at a resolved path.
pub struct IdentityStore {
    configured_path: String,
}

impl IdentityStore {
    pub fn new(configured_path: &str) -> Self {
        Self {
            configured_path: configured_path.trim().to_string(),
        }
    }

    /// The path the store reads and writes.
    pub fn identity_path(&self) -> PathBuf {
        if !self.configured_path.is_empty() {
            return PathBuf::from(&self.configured_path);
        }
        default_identity_path()
    }

    /// Load the identity file, or generate and persist a fresh identity
    /// when no file exists. Parse and shape errors are returned, never
    /// papered over with a new keypair.
    pub fn load_or_create(&self) -> Result<DeviceIdentity, IdentityError> {
        if let Some(identity) = self.load_from_disk()? {
            return Ok(identity);
        }
        self.create_and_persist()
    }

    fn load_from_disk(&self) -> Result<Option<DeviceIdentity>, IdentityError> {
        let path = self.identity_path();
        if !path.exists() {
            return Ok(None);
        }

        debug!(path = %path.display(), "loading device identity");
        let content = fs::read_to_string(&path).map_err(|_| IdentityError::Read {
            path: path.clone(),
        })?;
        let stored: StoredIdentity =
            serde_json::from_str(&content).map_err(|_| IdentityError::InvalidJson {
                path: path.clone(),
            })?;

        if stored.version != 1
            || stored.device_id.is_empty()
            || stored.public_key.is_empty()
            || stored.secret_key.is_empty()
        {
            return Err(IdentityError::MissingFields { path });
        }

        let public_key = encoding::from_base64_url(&stored.public_key)
            .map_err(|_| IdentityError::InvalidKeyData { path: path.clone() })?;
        let secret_key = encoding::from_base64_url(&stored.secret_key)
            .map_err(|_| IdentityError::InvalidKeyData { path: path.clone() })?;

        let public_key_length_valid = public_key.len() == ED25519_PUBLIC_KEY_BYTES;
        let secret_key_length_valid = secret_key.len() == ED25519_SECRET_KEY_SEED_BYTES
            || secret_key.len() == ED25519_SECRET_KEY_LEGACY_BYTES;
        if !public_key_length_valid || !secret_key_length_valid {
            return Err(IdentityError::InvalidKeySize { path });
        }

        let derived_device_id = derive_device_id(&public_key);
        if derived_device_id.is_empty() {
            return Err(IdentityError::DeriveDeviceId);
        }

        let identity = DeviceIdentity {
            device_id: derived_device_id.clone(),
            public_key,
            secret_key,
        };

        if !stored.device_id.eq_ignore_ascii_case(&derived_device_id) {
            // Stored id is stale; normalize the file but keep running on
            // the derived id either way.
            if let Err(e) = self.persist(&identity) {
                warn!(error = %e, "failed to normalize identity file device id");
            }
        }

        info!(device_id = %identity.device_id, "loaded device identity");
        Ok(Some(identity))
    }

    fn create_and_persist(&self) -> Result<DeviceIdentity, IdentityError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes().to_vec();
        let secret_key = signing_key.to_bytes().to_vec();

        let device_id = derive_device_id(&public_key);
        if device_id.is_empty() {
            return Err(IdentityError::DeriveDeviceId);
        }

        let identity = DeviceIdentity {
            device_id,
            public_key,
            secret_key,
        };
        self.persist(&identity)?;
        info!(device_id = %identity.device_id, "generated new device identity");
        Ok(identity)
    }

    /// Persist atomically: write a temp file in the same directory,
    /// fsync, then rename over the target. A crash never leaves a
    /// partially written identity file.
    fn persist(&self, identity: &DeviceIdentity) -> Result<(), IdentityError> {
        let path = self.identity_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| IdentityError::CreateDirectory {
                path: parent.to_path_buf(),
            })?;
        }

        let stored = StoredIdentity {
            version: 1,
            device_id: identity.device_id.clone(),
            public_key: encoding::to_base64_url(&identity.public_key),
            secret_key: encoding::to_base64_url(&identity.secret_key),
            created_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        };
        let mut content = serde_json::to_string_pretty(&stored).map_err(|e| {
            IdentityError::Persist {
                path: path.clone(),
                source: std::io::Error::other(e),
            }
        })?;
        content.push('\n');

        let temp_path = temp_sibling_path(&path);
        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, &path)
        })();
        if let Err(source) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(IdentityError::Persist { path, source });
        }

        set_owner_only_permissions(&path);
        debug!(path = %path.display(), "saved device identity");
        Ok(())
    }
}

fn default_identity_path() -> PathBuf {
    let base = dirs::config_dir()
        .map(|dir| dir.join("jqopenclaw"))
        .or_else(|| dirs::home_dir().map(|dir| dir.join(".jqopenclaw")))
        .unwrap_or_else(|| PathBuf::from(".jqopenclaw"));
    base.join("identity").join("device.json")
}

fn temp_sibling_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "device.json".to_string());
    path.with_file_name(format!("{file_name}.tmp"))
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        let _ = fs::set_permissions(path, permissions);
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &Path) -> IdentityStore {
        IdentityStore::new(dir.join("device.json").to_str().unwrap())
    }

    #[test]
    fn creates_identity_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        let identity = store.load_or_create().unwrap();
        assert_eq!(identity.public_key.len(), 32);
        assert_eq!(identity.secret_key.len(), 32);
        assert_eq!(identity.device_id.len(), 64);
        assert_eq!(identity.device_id, derive_device_id(&identity.public_key));
        assert!(store.identity_path().exists());
    }

    #[test]
    fn load_round_trips_the_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        let created = store.load_or_create().unwrap();
        let loaded = store.load_or_create().unwrap();
        assert_eq!(loaded.device_id, created.device_id);
        assert_eq!(loaded.public_key, created.public_key);
        assert_eq!(loaded.secret_key, created.secret_key);
    }

    #[test]
    fn corrupt_json_is_fatal_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        fs::write(&path, "not json").unwrap();

        let store = store_at(dir.path());
        let err = store.load_or_create().unwrap_err();
        assert!(matches!(err, IdentityError::InvalidJson { .. }));
        // The broken file must be left in place for the operator.
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn missing_fields_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        fs::write(
            &path,
            r#"{"version":1,"deviceId":"","publicKey":"","secretKey":"","createdAtMs":0}"#,
        )
        .unwrap();

        let store = store_at(dir.path());
        assert!(matches!(
            store.load_or_create().unwrap_err(),
            IdentityError::MissingFields { .. }
        ));
    }

    #[test]
    fn wrong_version_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let identity = store.load_or_create().unwrap();

        let path = store.identity_path();
        let content = fs::read_to_string(&path).unwrap();
        let bumped = content.replace("\"version\": 1", "\"version\": 2");
        fs::write(&path, bumped).unwrap();

        assert!(matches!(
            store.load_or_create().unwrap_err(),
            IdentityError::MissingFields { .. }
        ));
        drop(identity);
    }

    #[test]
    fn invalid_key_encoding_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        fs::write(
            &path,
            r#"{"version":1,"deviceId":"abc","publicKey":"!!!","secretKey":"!!!","createdAtMs":0}"#,
        )
        .unwrap();

        let store = store_at(dir.path());
        assert!(matches!(
            store.load_or_create().unwrap_err(),
            IdentityError::InvalidKeyData { .. }
        ));
    }

    #[test]
    fn short_public_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        let short_key = encoding::to_base64_url(&[1u8; 16]);
        let secret = encoding::to_base64_url(&[2u8; 32]);
        fs::write(
            &path,
            format!(
                r#"{{"version":1,"deviceId":"abc","publicKey":"{short_key}","secretKey":"{secret}","createdAtMs":0}}"#
            ),
        )
        .unwrap();

        let store = store_at(dir.path());
        assert!(matches!(
            store.load_or_create().unwrap_err(),
            IdentityError::InvalidKeySize { .. }
        ));
    }

    #[test]
    fn legacy_64_byte_secret_key_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let created = store.load_or_create().unwrap();

        let mut legacy_secret = created.secret_key.clone();
        legacy_secret.extend_from_slice(&created.public_key);
        let stored = StoredIdentity {
            version: 1,
            device_id: created.device_id.clone(),
            public_key: encoding::to_base64_url(&created.public_key),
            secret_key: encoding::to_base64_url(&legacy_secret),
            created_at_ms: 0,
        };
        fs::write(
            store.identity_path(),
            serde_json::to_string_pretty(&stored).unwrap(),
        )
        .unwrap();

        let loaded = store.load_or_create().unwrap();
        assert_eq!(loaded.device_id, created.device_id);
        assert_eq!(loaded.secret_key.len(), 64);
    }

    #[test]
    fn mismatched_device_id_is_rederived_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let created = store.load_or_create().unwrap();

        let path = store.identity_path();
        let content = fs::read_to_string(&path).unwrap();
        let tampered = content.replace(&created.device_id, &"0".repeat(64));
        fs::write(&path, tampered).unwrap();

        let loaded = store.load_or_create().unwrap();
        assert_eq!(loaded.device_id, created.device_id);

        // Best-effort rewrite normalized the stored id.
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains(&created.device_id));
    }

    #[test]
    fn stored_id_comparison_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let created = store.load_or_create().unwrap();

        let path = store.identity_path();
        let content = fs::read_to_string(&path).unwrap();
        let uppercased = content.replace(&created.device_id, &created.device_id.to_uppercase());
        fs::write(&path, &uppercased).unwrap();
        let before = fs::metadata(&path).unwrap().modified().unwrap();

        let loaded = store.load_or_create().unwrap();
        assert_eq!(loaded.device_id, created.device_id);
        // An uppercase stored id is the same id; nothing to rewrite.
        let after = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn derive_device_id_is_empty_for_wrong_key_sizes() {
        assert_eq!(derive_device_id(&[0u8; 31]), "");
        assert_eq!(derive_device_id(&[0u8; 33]), "");
        assert_eq!(derive_device_id(&[]), "");
        assert_eq!(derive_device_id(&[0u8; 32]).len(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        store.load_or_create().unwrap();

        let mode = fs::metadata(store.identity_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
