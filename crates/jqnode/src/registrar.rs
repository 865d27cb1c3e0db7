//! Builds the signed `connect` request params.

use crate::error::{NodeError, NodeResult};
use crate::options::NodeOptions;
use crate::profile;
use jqclaw_auth::{AuthPayloadInput, build_payload_v3, sign_detached};
use jqclaw_crypto::encoding;
use jqclaw_identity::DeviceIdentity;
use serde_json::{Map, Value, json};

pub struct NodeRegistrar {
    options: NodeOptions,
}

impl NodeRegistrar {
    pub fn new(options: NodeOptions) -> Self {
        Self { options }
    }

    /// Assemble the `connect` params: a v3 payload signed with the
    /// device secret key over the challenge nonce, plus the client and
    /// capability metadata the gateway indexes the node under.
    pub fn build_connect_params(
        &self,
        identity: &DeviceIdentity,
        challenge_nonce: &str,
    ) -> NodeResult<Value> {
        let nonce = challenge_nonce.trim();
        if nonce.is_empty() {
            return Err(NodeError::Registrar("challenge nonce is empty".to_string()));
        }

        let token = self.options.token.trim();
        let signed_at_ms = chrono::Utc::now().timestamp_millis();
        let role = "node";
        let scopes: Vec<String> = Vec::new();
        let platform = platform_name();

        let payload = build_payload_v3(&AuthPayloadInput {
            device_id: &identity.device_id,
            client_id: profile::client_id(),
            client_mode: "node",
            role,
            scopes: &scopes,
            signed_at_ms,
            token,
            nonce,
            platform: &platform,
            device_family: &self.options.device_family,
        });
        let signature = sign_detached(&identity.secret_key, payload.as_bytes())?;

        let device = json!({
            "id": identity.device_id,
            "publicKey": encoding::to_base64_url(&identity.public_key),
            "signature": signature,
            "signedAt": signed_at_ms,
            "nonce": nonce,
        });

        let mut client = Map::new();
        client.insert("id".to_string(), json!(profile::client_id()));
        client.insert("version".to_string(), json!(profile::client_version()));
        client.insert("platform".to_string(), json!(platform));
        client.insert("mode".to_string(), json!("node"));
        client.insert(
            "deviceFamily".to_string(),
            json!(self.options.device_family),
        );
        let display_name = self.options.display_name.trim();
        if !display_name.is_empty() {
            client.insert("displayName".to_string(), json!(display_name));
        }
        let instance_id = self.options.node_id.trim();
        if !instance_id.is_empty() {
            client.insert("instanceId".to_string(), json!(instance_id));
        }

        let mut params = Map::new();
        params.insert("minProtocol".to_string(), json!(profile::MIN_PROTOCOL_VERSION));
        params.insert("maxProtocol".to_string(), json!(profile::MAX_PROTOCOL_VERSION));
        params.insert("client".to_string(), Value::Object(client));
        params.insert("role".to_string(), json!(role));
        params.insert("scopes".to_string(), json!([]));
        params.insert("caps".to_string(), json!(profile::caps()));
        params.insert("commands".to_string(), json!(profile::commands()));
        params.insert("permissions".to_string(), profile::permissions());
        params.insert("locale".to_string(), json!(system_locale()));
        params.insert(
            "userAgent".to_string(),
            json!(format!("jqopenclaw-node/{}", profile::client_version())),
        );
        params.insert("device".to_string(), device);

        if !token.is_empty() {
            params.insert("auth".to_string(), json!({ "token": token }));
        }

        Ok(Value::Object(params))
    }
}

/// Normalized OS name for auth metadata, falling back to `windows` when
/// the platform reports nothing.
fn platform_name() -> String {
    let platform = encoding::normalize_metadata_for_auth(std::env::consts::OS);
    if platform.is_empty() {
        return "windows".to_string();
    }
    platform
}

/// BCP-47-style locale from the environment (`en_US.UTF-8` → `en-US`),
/// defaulting to `en-US`.
fn system_locale() -> String {
    let raw = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_default();
    let base = raw
        .split(['.', '@'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return "en-US".to_string();
    }
    base.replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use jqclaw_identity::derive_device_id;

    fn test_identity() -> DeviceIdentity {
        let seed = [42u8; 32];
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
        let public_key = signing_key.verifying_key().to_bytes().to_vec();
        DeviceIdentity {
            device_id: derive_device_id(&public_key),
            public_key,
            secret_key: seed.to_vec(),
        }
    }

    fn test_options() -> NodeOptions {
        NodeOptions {
            host: "gw.example".to_string(),
            port: 443,
            token: "abc".to_string(),
            display_name: "Node One".to_string(),
            node_id: "inst-1".to_string(),
            device_family: "Windows-PC".to_string(),
            ..NodeOptions::default()
        }
    }

    #[test]
    fn connect_params_carry_profile_and_device_fields() {
        let registrar = NodeRegistrar::new(test_options());
        let identity = test_identity();
        let params = registrar.build_connect_params(&identity, "N1").unwrap();

        assert_eq!(params["minProtocol"], 3);
        assert_eq!(params["maxProtocol"], 3);
        assert_eq!(params["role"], "node");
        assert_eq!(params["scopes"], json!([]));
        assert_eq!(params["caps"], json!(["file", "process", "system"]));
        assert_eq!(params["permissions"]["file.write"], false);
        assert_eq!(params["client"]["id"], "node-host");
        assert_eq!(params["client"]["mode"], "node");
        assert_eq!(params["client"]["displayName"], "Node One");
        assert_eq!(params["client"]["instanceId"], "inst-1");
        assert_eq!(params["device"]["id"], identity.device_id);
        assert_eq!(params["device"]["nonce"], "N1");
        assert_eq!(params["auth"]["token"], "abc");
        assert!(
            params["userAgent"]
                .as_str()
                .unwrap()
                .starts_with("jqopenclaw-node/")
        );
        assert!(!params["locale"].as_str().unwrap().is_empty());
        assert!(!params["locale"].as_str().unwrap().contains('_'));
    }

    #[test]
    fn connect_params_signature_verifies_over_the_v3_payload() {
        let registrar = NodeRegistrar::new(test_options());
        let identity = test_identity();
        let params = registrar.build_connect_params(&identity, "N1").unwrap();

        let signed_at = params["device"]["signedAt"].as_i64().unwrap();
        let payload = build_payload_v3(&AuthPayloadInput {
            device_id: &identity.device_id,
            client_id: "node-host",
            client_mode: "node",
            role: "node",
            scopes: &[],
            signed_at_ms: signed_at,
            token: "abc",
            nonce: "N1",
            platform: &super::platform_name(),
            device_family: "Windows-PC",
        });

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(params["device"]["signature"].as_str().unwrap())
            .unwrap();
        let signature = Signature::from_slice(&signature_bytes).unwrap();
        let public_key: [u8; 32] = identity.public_key.clone().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&public_key).unwrap();
        verifying_key
            .verify(payload.as_bytes(), &signature)
            .expect("device signature must verify against the v3 payload");
    }

    #[test]
    fn empty_nonce_is_rejected() {
        let registrar = NodeRegistrar::new(test_options());
        let identity = test_identity();
        let err = registrar.build_connect_params(&identity, "  ").unwrap_err();
        assert!(err.to_string().contains("challenge nonce is empty"));
    }

    #[test]
    fn optional_client_fields_are_omitted_when_empty() {
        let options = NodeOptions {
            display_name: "  ".to_string(),
            node_id: String::new(),
            ..test_options()
        };
        let registrar = NodeRegistrar::new(options);
        let params = registrar
            .build_connect_params(&test_identity(), "N1")
            .unwrap();
        let client = params["client"].as_object().unwrap();
        assert!(!client.contains_key("displayName"));
        assert!(!client.contains_key("instanceId"));
    }

    #[test]
    fn auth_object_is_omitted_without_a_token() {
        let options = NodeOptions {
            token: "   ".to_string(),
            ..test_options()
        };
        let registrar = NodeRegistrar::new(options);
        let params = registrar
            .build_connect_params(&test_identity(), "N1")
            .unwrap();
        assert!(!params.as_object().unwrap().contains_key("auth"));
    }
}
