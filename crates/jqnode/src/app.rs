//! Node application: session lifecycle and invoke dispatch.
//!
//! One loop owns all protocol state. Startup loads the identity, runs
//! the crypto self-test, and opens the gateway socket; after that the
//! loop consumes gateway events until an exit path fires.
//!
//! Exit codes: 0 registered with `exit_after_register`; 1 fatal
//! startup/transport before registration; 2 connect rejected; 3
//! connection lost after registration.

use crate::capabilities::{
    self, CODE_COMMAND_NOT_SUPPORTED, CapabilityError, CapabilityResult,
};
use crate::client::{GatewayClient, GatewayEvent};
use crate::error::{NodeError, NodeResult};
use crate::options::NodeOptions;
use crate::registrar::NodeRegistrar;
use jqclaw_crypto::secretbox;
use jqclaw_identity::{DeviceIdentity, IdentityStore};
use jqclaw_proto::{InvokeError, InvokeResultParams, extract_string};
use serde_json::Value;
use tracing::{error, info, warn};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_CONNECT_REJECTED: i32 = 2;
pub const EXIT_CONNECTION_LOST: i32 = 3;

const SELF_TEST_PLAIN_TEXT: &[u8] = b"jqopenclaw-self-test";

pub struct NodeApplication {
    options: NodeOptions,
    registrar: NodeRegistrar,
    client: GatewayClient,
    registered: bool,
}

impl NodeApplication {
    pub fn new(options: NodeOptions) -> Self {
        Self {
            registrar: NodeRegistrar::new(options.clone()),
            client: GatewayClient::new(options.clone()),
            options,
            registered: false,
        }
    }

    /// Run to completion and return the process exit code.
    pub async fn run(mut self) -> i32 {
        let store = IdentityStore::new(&self.options.identity_path);
        let identity = match store.load_or_create() {
            Ok(identity) => identity,
            Err(e) => {
                error!("{e}");
                return EXIT_FATAL;
            }
        };

        if let Err(e) = run_crypto_self_test() {
            error!("{e}");
            return EXIT_FATAL;
        }

        info!(device_id = %identity.device_id, "device identity");
        info!(path = %store.identity_path().display(), "identity file");

        if let Err(e) = self.client.open().await {
            error!("{e}");
            return EXIT_FATAL;
        }

        loop {
            match self.client.next_event().await {
                GatewayEvent::ChallengeReceived(nonce) => {
                    if let Err(e) = self.send_connect_request(&identity, &nonce).await {
                        error!("{e}");
                        return EXIT_FATAL;
                    }
                }
                GatewayEvent::ConnectAccepted(payload) => {
                    self.registered = true;
                    self.log_registration(&payload);
                    if self.options.exit_after_register {
                        self.client.close().await;
                        return EXIT_OK;
                    }
                }
                GatewayEvent::ConnectRejected(error) => {
                    error!(
                        "gateway connect rejected: {}",
                        parse_error_message(&error)
                    );
                    return EXIT_CONNECT_REJECTED;
                }
                GatewayEvent::InvokeRequestReceived(payload) => {
                    self.handle_invoke(payload).await;
                }
                GatewayEvent::TransportError(message) => {
                    error!("{message}");
                    if !self.registered {
                        return EXIT_FATAL;
                    }
                }
                GatewayEvent::Closed => {
                    if !self.registered {
                        return EXIT_FATAL;
                    }
                    if !self.options.exit_after_register {
                        return EXIT_CONNECTION_LOST;
                    }
                    return EXIT_OK;
                }
            }
        }
    }

    async fn send_connect_request(
        &mut self,
        identity: &DeviceIdentity,
        nonce: &str,
    ) -> NodeResult<()> {
        let params = self.registrar.build_connect_params(identity, nonce)?;
        self.client.send_connect(params).await
    }

    fn log_registration(&self, payload: &Value) {
        let device_token = payload
            .get("auth")
            .and_then(|auth| auth.get("deviceToken"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if device_token.is_empty() {
            info!("node registered successfully");
        } else {
            info!("node registered successfully, device token issued");
        }
    }

    /// The invoke pipeline: validate the envelope (dropping malformed
    /// ones without a reply), derive the params value, dispatch, and
    /// report the structured result.
    async fn handle_invoke(&mut self, payload: Value) {
        let invoke_id = extract_string(&payload, "id");
        let node_id = extract_string(&payload, "nodeId");
        let command = extract_string(&payload, "command");

        let mut params_json = extract_string(&payload, "paramsJSON");
        if params_json.is_empty() {
            if let Some(serialized) = try_serialize_json_value(payload.get("params")) {
                params_json = serialized;
            }
        }

        info!(
            id = %invoke_id,
            node_id = %node_id,
            command = %command,
            params_json = %params_json,
            "invoke request received"
        );

        if invoke_id.is_empty() || node_id.is_empty() || command.is_empty() {
            warn!("invoke request ignored: missing id/nodeId/command");
            return;
        }

        let params = match parse_invoke_params_json(&params_json) {
            Ok(params) => params,
            Err(message) => {
                warn!(id = %invoke_id, command = %command, error = %message, "invalid invoke params");
                self.send_invoke_error(
                    &invoke_id,
                    &node_id,
                    &CapabilityError::invalid_params(message),
                )
                .await;
                return;
            }
        };
        let invoke_timeout_ms = payload.get("timeoutMs").and_then(Value::as_u64);

        match execute_invoke_command(&self.options, &command, &params, invoke_timeout_ms).await {
            Ok(result) => {
                self.send_invoke_success(&invoke_id, &node_id, result).await;
                info!(id = %invoke_id, command = %command, "invoke command done");
            }
            Err(e) => {
                warn!(
                    id = %invoke_id,
                    command = %command,
                    code = e.code.as_deref().unwrap_or(""),
                    message = %e.message,
                    "invoke command failed"
                );
                self.send_invoke_error(&invoke_id, &node_id, &e).await;
            }
        }
    }

    async fn send_invoke_success(&mut self, invoke_id: &str, node_id: &str, payload: Value) {
        // String form survives gateways that re-parse nested payloads.
        let (payload_json, raw_payload) = match serde_json::to_string(&payload) {
            Ok(text) => (Some(text), None),
            Err(_) => (None, Some(payload)),
        };
        let params = InvokeResultParams {
            id: invoke_id.to_string(),
            node_id: node_id.to_string(),
            ok: true,
            payload: raw_payload,
            payload_json,
            error: None,
        };
        self.send_invoke_result(params).await;
    }

    async fn send_invoke_error(
        &mut self,
        invoke_id: &str,
        node_id: &str,
        error: &CapabilityError,
    ) {
        let params = InvokeResultParams {
            id: invoke_id.to_string(),
            node_id: node_id.to_string(),
            ok: false,
            payload: None,
            payload_json: None,
            error: Some(build_invoke_error(error)),
        };
        self.send_invoke_result(params).await;
    }

    async fn send_invoke_result(&mut self, params: InvokeResultParams) {
        let value = match serde_json::to_value(&params) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "failed to serialize invoke result");
                return;
            }
        };
        if let Err(e) = self.client.send_invoke_result(value).await {
            error!("{e}");
        }
    }
}

/// Startup gate: the secret box must round-trip a known plaintext.
fn run_crypto_self_test() -> NodeResult<()> {
    let key = secretbox::generate_key()
        .map_err(|e| NodeError::SelfTest(format!("encrypt failed: {e}")))?;
    let (nonce, cipher_text) = secretbox::encrypt(&key, SELF_TEST_PLAIN_TEXT)
        .map_err(|e| NodeError::SelfTest(format!("encrypt failed: {e}")))?;
    let recovered = secretbox::decrypt(&key, &nonce, &cipher_text)
        .map_err(|e| NodeError::SelfTest(format!("decrypt failed: {e}")))?;
    if recovered != SELF_TEST_PLAIN_TEXT {
        return Err(NodeError::SelfTest("round-trip mismatch".to_string()));
    }
    Ok(())
}

/// Compact JSON for the `params` field of an invoke envelope, for any
/// JSON value. `None` only when the field is absent.
fn try_serialize_json_value(value: Option<&Value>) -> Option<String> {
    let value = value?;
    serde_json::to_string(value).ok()
}

/// An empty params string is an empty object; otherwise the string must
/// parse to a JSON object or array.
fn parse_invoke_params_json(params_json: &str) -> Result<Value, String> {
    let normalized = params_json.trim();
    if normalized.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let parsed: Value = serde_json::from_str(normalized)
        .map_err(|e| format!("failed to parse paramsJSON: {e}"))?;
    if parsed.is_object() || parsed.is_array() {
        return Ok(parsed);
    }
    Err("paramsJSON must be object or array".to_string())
}

async fn execute_invoke_command(
    options: &NodeOptions,
    command: &str,
    params: &Value,
    invoke_timeout_ms: Option<u64>,
) -> CapabilityResult {
    match command {
        "file.read" => capabilities::file_read::run(params, invoke_timeout_ms).await,
        "file.write" => capabilities::file_write::run(params),
        "process.exec" => capabilities::process_exec::run(params, invoke_timeout_ms).await,
        "system.info" => capabilities::system_info::collect().await,
        "system.screenshot" => capabilities::screenshot::run(options).await,
        other => Err(CapabilityError::with_code(
            CODE_COMMAND_NOT_SUPPORTED,
            format!("unsupported invoke command: {other}"),
        )),
    }
}

fn build_invoke_error(error: &CapabilityError) -> InvokeError {
    let code = error
        .code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string);
    let message = error.message.trim();
    let message = if message.is_empty() {
        "invoke command failed".to_string()
    } else {
        message.to_string()
    };
    InvokeError { code, message }
}

fn parse_error_message(error: &Value) -> String {
    let message = extract_string(error, "message");
    if message.is_empty() {
        return "unknown connect error".to_string();
    }
    message
}
