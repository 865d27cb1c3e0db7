//! Node configuration snapshot.
//!
//! Options come from an optional JSON config file overridden by CLI
//! flags, are validated once at startup, and stay immutable for the
//! process lifetime. Unset string fields are empty strings; presence
//! checks trim first.

use crate::error::{NodeError, NodeResult};
use serde_json::Value;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub tls: bool,
    pub tls_fingerprint: String,
    pub display_name: String,
    pub node_id: String,
    pub config_path: String,
    pub identity_path: String,
    pub file_server_uri: String,
    pub file_server_token: String,
    pub device_family: String,
    pub exit_after_register: bool,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            token: String::new(),
            tls: false,
            tls_fingerprint: String::new(),
            display_name: String::new(),
            node_id: String::new(),
            config_path: String::new(),
            identity_path: String::new(),
            file_server_uri: String::new(),
            file_server_token: String::new(),
            device_family: "windows-pc".to_string(),
            exit_after_register: false,
        }
    }
}

impl NodeOptions {
    /// Merge values from a JSON config file. Keys are camelCase and
    /// optional; only present keys of the expected type are applied.
    /// A malformed port is an error rather than silently ignored.
    pub fn apply_config_file(&mut self, path: &Path) -> NodeResult<()> {
        let content = std::fs::read_to_string(path).map_err(|_| {
            NodeError::Config(format!("failed to open config file: {}", path.display()))
        })?;
        let root: Value = serde_json::from_str(&content).map_err(|_| {
            NodeError::Config(format!("invalid config JSON: {}", path.display()))
        })?;
        if !root.is_object() {
            return Err(NodeError::Config(format!(
                "invalid config JSON: {}",
                path.display()
            )));
        }

        if let Some(host) = root.get("host").and_then(Value::as_str) {
            self.host = host.trim().to_string();
        }
        match root.get("port") {
            None => {}
            Some(value) => {
                let port = value
                    .as_f64()
                    .ok_or_else(|| {
                        NodeError::Config(format!("invalid config port type: {}", path.display()))
                    })
                    .and_then(|raw| {
                        let port = raw as i64;
                        if raw.is_finite()
                            && raw == port as f64
                            && (1..=65535).contains(&port)
                        {
                            Ok(port as u16)
                        } else {
                            Err(NodeError::Config(format!(
                                "invalid config port: {}",
                                path.display()
                            )))
                        }
                    })?;
                self.port = port;
            }
        }
        if let Some(token) = root.get("token").and_then(Value::as_str) {
            self.token = token.to_string();
        }
        if let Some(tls) = root.get("tls").and_then(Value::as_bool) {
            self.tls = tls;
        }
        if let Some(fingerprint) = root.get("tlsFingerprint").and_then(Value::as_str) {
            self.tls_fingerprint = fingerprint.to_string();
        }
        if let Some(display_name) = root.get("displayName").and_then(Value::as_str) {
            self.display_name = display_name.trim().to_string();
        }
        if let Some(node_id) = root.get("nodeId").and_then(Value::as_str) {
            self.node_id = node_id.to_string();
        }
        if let Some(identity_path) = root.get("identityPath").and_then(Value::as_str) {
            self.identity_path = identity_path.to_string();
        }
        if let Some(uri) = root.get("fileServerUri").and_then(Value::as_str) {
            self.file_server_uri = uri.trim().to_string();
        }
        if let Some(token) = root.get("fileServerToken").and_then(Value::as_str) {
            self.file_server_token = token.to_string();
        }
        if let Some(family) = root.get("deviceFamily").and_then(Value::as_str) {
            self.device_family = family.to_string();
        }
        if let Some(exit) = root.get("exitAfterRegister").and_then(Value::as_bool) {
            self.exit_after_register = exit;
        }
        Ok(())
    }

    /// Startup validation. Invariants: host/port/token present;
    /// a fingerprint requires TLS; a file-server token requires a
    /// file-server URI; the URI must parse with scheme and host.
    pub fn validate(&self) -> NodeResult<()> {
        if self.host.trim().is_empty() {
            return Err(NodeError::Config("gateway host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(NodeError::Config("gateway port is empty".to_string()));
        }
        if self.token.trim().is_empty() {
            return Err(NodeError::Config("gateway token is empty".to_string()));
        }
        if !self.tls_fingerprint.trim().is_empty() && !self.tls {
            return Err(NodeError::Config(
                "--tls-fingerprint requires --tls".to_string(),
            ));
        }

        let uri = self.file_server_uri.trim();
        if !uri.is_empty() {
            let parsed = Url::parse(uri)
                .map_err(|_| NodeError::Config("invalid --file-server-uri value".to_string()))?;
            if parsed.scheme().trim().is_empty()
                || parsed.host_str().map(str::trim).unwrap_or("").is_empty()
            {
                return Err(NodeError::Config(
                    "invalid --file-server-uri value".to_string(),
                ));
            }
        }
        if uri.is_empty() && !self.file_server_token.trim().is_empty() {
            return Err(NodeError::Config(
                "--file-server-token requires --file-server-uri".to_string(),
            ));
        }
        Ok(())
    }
}
