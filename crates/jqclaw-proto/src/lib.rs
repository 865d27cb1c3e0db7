//! Gateway wire protocol shapes.
//!
//! JSON text frames over the WebSocket, tagged by `type`:
//! `req` (request), `res` (response), `event`. Inbound frames are
//! inspected as loose JSON — the gateway client tolerates unknown fields
//! and wrong-typed values the way the protocol requires — while outbound
//! frames are serialized from the typed structs here.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const FRAME_TYPE_REQUEST: &str = "req";
pub const FRAME_TYPE_RESPONSE: &str = "res";
pub const FRAME_TYPE_EVENT: &str = "event";

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_NODE_INVOKE_RESULT: &str = "node.invoke.result";

pub const EVENT_CONNECT_CHALLENGE: &str = "connect.challenge";
pub const EVENT_NODE_INVOKE_REQUEST: &str = "node.invoke.request";

/// Outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl RequestFrame {
    /// Build a request with a fresh UUID id.
    pub fn new(method: &str, params: Value) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), method, params)
    }

    pub fn with_id(id: String, method: &str, params: Value) -> Self {
        Self {
            frame_type: FRAME_TYPE_REQUEST.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Parsed response frame (used by tests and diagnostics; the client
/// correlates responses from the loose JSON form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub id: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Params for the outbound `node.invoke.result` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResultParams {
    pub id: String,
    pub node_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(rename = "payloadJSON", skip_serializing_if = "Option::is_none")]
    pub payload_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

/// Structured error reported back to the gateway for a failed invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// Extract a trimmed string field from a JSON object; returns an empty
/// string for a missing or non-string value.
pub fn extract_string(object: &Value, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_new_sets_type_and_fresh_id() {
        let frame = RequestFrame::new(METHOD_CONNECT, json!({}));
        assert_eq!(frame.frame_type, "req");
        assert_eq!(frame.method, "connect");
        assert!(Uuid::parse_str(&frame.id).is_ok());
    }

    #[test]
    fn request_frame_serializes_type_field() {
        let frame = RequestFrame::with_id(
            "id-001".to_string(),
            METHOD_NODE_INVOKE_RESULT,
            json!({"id": "inv-1"}),
        );
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains(r#""type":"req""#), "missing type: {text}");
        assert!(text.contains("node.invoke.result"));
        assert!(text.contains("id-001"));
        assert!(text.contains("inv-1"));
    }

    #[test]
    fn response_frame_defaults_ok_to_false() {
        let frame: ResponseFrame =
            serde_json::from_str(r#"{"type":"res","id":"r1"}"#).unwrap();
        assert!(!frame.ok);
        assert!(frame.payload.is_none());
        assert!(frame.error.is_none());
    }

    #[test]
    fn invoke_result_params_use_camel_case_and_omit_absent_fields() {
        let params = InvokeResultParams {
            id: "inv-1".to_string(),
            node_id: "node-1".to_string(),
            ok: true,
            payload: None,
            payload_json: Some(r#"{"cpuName":"x"}"#.to_string()),
            error: None,
        };
        let text = serde_json::to_string(&params).unwrap();
        assert!(text.contains(r#""nodeId":"node-1""#), "bad json: {text}");
        assert!(text.contains(r#""payloadJSON":"#), "bad json: {text}");
        assert!(!text.contains(r#""payload":"#), "payload must be omitted: {text}");
        assert!(!text.contains("error"), "error must be omitted: {text}");
    }

    #[test]
    fn invoke_error_omits_empty_code() {
        let with_code = InvokeError {
            code: Some("INVALID_PARAMS".to_string()),
            message: "bad".to_string(),
        };
        assert!(serde_json::to_string(&with_code).unwrap().contains("INVALID_PARAMS"));

        let without_code = InvokeError {
            code: None,
            message: "bad".to_string(),
        };
        let text = serde_json::to_string(&without_code).unwrap();
        assert!(!text.contains("code"), "code must be omitted: {text}");
    }

    #[test]
    fn extract_string_trims_and_tolerates_shape() {
        let value = json!({"a": "  x  ", "b": 5, "c": null});
        assert_eq!(extract_string(&value, "a"), "x");
        assert_eq!(extract_string(&value, "b"), "");
        assert_eq!(extract_string(&value, "c"), "");
        assert_eq!(extract_string(&value, "missing"), "");
    }
}
