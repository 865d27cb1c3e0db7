//! Gateway WebSocket client.
//!
//! Owns the socket, the TLS fingerprint pin check, and the single-slot
//! `connect` request correlation. The application drives
//! [`GatewayClient::next_event`] from one loop; the client never
//! reconnects on its own.

use crate::error::{NodeError, NodeResult};
use crate::options::NodeOptions;
use futures_util::{SinkExt, StreamExt};
use jqclaw_crypto::encoding::normalize_fingerprint;
use jqclaw_proto::{
    EVENT_CONNECT_CHALLENGE, EVENT_NODE_INVOKE_REQUEST, METHOD_CONNECT,
    METHOD_NODE_INVOKE_RESULT, RequestFrame, extract_string,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Opening,
    Open,
    Closing,
    Closed,
}

/// Events surfaced to the application layer.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    ChallengeReceived(String),
    InvokeRequestReceived(Value),
    ConnectAccepted(Value),
    ConnectRejected(Value),
    TransportError(String),
    Closed,
}

pub struct GatewayClient {
    options: NodeOptions,
    state: SocketState,
    pending_connect_request_id: Option<String>,
    socket: Option<WsStream>,
}

impl GatewayClient {
    pub fn new(options: NodeOptions) -> Self {
        Self {
            options,
            state: SocketState::Idle,
            pending_connect_request_id: None,
            socket: None,
        }
    }

    pub fn gateway_url(&self) -> String {
        let scheme = if self.options.tls { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.options.host, self.options.port)
    }

    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    /// Open the socket and run the pin check. An `Err` here is a
    /// transport error; the handshake is never attempted on a socket
    /// whose certificate failed the pin.
    pub async fn open(&mut self) -> NodeResult<()> {
        self.state = SocketState::Opening;

        let url = self.gateway_url();
        if url::Url::parse(&url).is_err() {
            self.state = SocketState::Closed;
            return Err(NodeError::Transport(format!("invalid gateway url: {url}")));
        }

        let pinned = self.options.tls && !self.options.tls_fingerprint.trim().is_empty();
        let connector = if pinned {
            // The pin replaces chain validation entirely.
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| {
                    self.state = SocketState::Closed;
                    NodeError::Transport(format!("gateway transport error: {e}"))
                })?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (mut socket, _response) =
            match connect_async_tls_with_config(url.as_str(), None, false, connector).await {
                Ok(connected) => connected,
                Err(e) => {
                    self.state = SocketState::Closed;
                    return Err(NodeError::Transport(format!(
                        "gateway transport error: {e}"
                    )));
                }
            };

        if pinned {
            let expected = normalize_fingerprint(&self.options.tls_fingerprint);
            match peer_certificate_sha256(&socket) {
                None => {
                    self.reject_socket(&mut socket, "tls cert missing").await;
                    return Err(NodeError::Transport(
                        "tls peer certificate is missing".to_string(),
                    ));
                }
                Some(actual) => {
                    if normalize_fingerprint(&actual) != expected {
                        self.reject_socket(&mut socket, "tls fingerprint mismatch")
                            .await;
                        return Err(NodeError::Transport(
                            "tls fingerprint mismatch".to_string(),
                        ));
                    }
                }
            }
        }

        self.socket = Some(socket);
        self.state = SocketState::Open;
        info!(url = %url, "gateway socket opened");
        Ok(())
    }

    async fn reject_socket(&mut self, socket: &mut WsStream, reason: &'static str) {
        self.state = SocketState::Closing;
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: reason.into(),
            })))
            .await;
        let _ = socket.close(None).await;
        self.state = SocketState::Closed;
    }

    /// Send the `connect` request, arming the single correlation slot.
    pub async fn send_connect(&mut self, params: Value) -> NodeResult<()> {
        if !self.is_open() {
            return Err(NodeError::Transport(
                "gateway socket is not connected".to_string(),
            ));
        }

        let request_id = Uuid::new_v4().to_string();
        self.pending_connect_request_id = Some(request_id.clone());
        let frame = RequestFrame::with_id(request_id, METHOD_CONNECT, params);
        self.send_frame(&frame).await
    }

    /// Send a `node.invoke.result` request, fire-and-forget.
    pub async fn send_invoke_result(&mut self, params: Value) -> NodeResult<()> {
        if !self.is_open() {
            return Err(NodeError::Transport(
                "gateway socket is not connected".to_string(),
            ));
        }

        let frame = RequestFrame::new(METHOD_NODE_INVOKE_RESULT, params);
        self.send_frame(&frame).await
    }

    async fn send_frame(&mut self, frame: &RequestFrame) -> NodeResult<()> {
        let text = serde_json::to_string(frame)?;
        let socket = self.socket.as_mut().ok_or_else(|| {
            NodeError::Transport("gateway socket is not connected".to_string())
        })?;
        socket
            .send(Message::Text(text))
            .await
            .map_err(|e| NodeError::Transport(format!("gateway transport error: {e}")))
    }

    /// Read frames until one produces an event. After the socket closes
    /// or errors, every further call returns [`GatewayEvent::Closed`].
    pub async fn next_event(&mut self) -> GatewayEvent {
        loop {
            let message = match self.socket.as_mut() {
                Some(socket) => socket.next().await,
                None => return GatewayEvent::Closed,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = self.interpret_text_frame(&text) {
                        return event;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Some(socket) = self.socket.as_mut() {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.drop_socket();
                    return GatewayEvent::Closed;
                }
                Some(Ok(_)) => {
                    // Binary and pong frames are not part of the protocol.
                }
                Some(Err(e)) => {
                    self.drop_socket();
                    return GatewayEvent::TransportError(format!(
                        "gateway transport error: {e}"
                    ));
                }
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            self.state = SocketState::Closing;
            let _ = socket.close(None).await;
        }
        self.pending_connect_request_id = None;
        self.state = SocketState::Closed;
    }

    fn drop_socket(&mut self) {
        self.socket = None;
        self.pending_connect_request_id = None;
        self.state = SocketState::Closed;
    }

    /// Interpret one text frame. Returns `None` for frames the protocol
    /// drops (unknown events, uncorrelated responses, unknown types).
    fn interpret_text_frame(&mut self, text: &str) -> Option<GatewayEvent> {
        let root: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return Some(GatewayEvent::TransportError(format!(
                    "invalid gateway message: {e}"
                )));
            }
        };
        if !root.is_object() {
            return Some(GatewayEvent::TransportError(
                "invalid gateway message: frame is not an object".to_string(),
            ));
        }

        let frame_type = extract_string(&root, "type");
        if frame_type == "event" {
            return self.interpret_event_frame(&root);
        }
        if frame_type != "res" {
            return None;
        }

        let response_id = extract_string(&root, "id");
        match &self.pending_connect_request_id {
            Some(pending) if *pending == response_id && !response_id.is_empty() => {}
            _ => return None,
        }
        self.pending_connect_request_id = None;

        let ok = root.get("ok").and_then(Value::as_bool).unwrap_or(false);
        info!(id = %response_id, ok, "gateway connect response");
        if ok {
            Some(GatewayEvent::ConnectAccepted(object_or_empty(
                root.get("payload"),
            )))
        } else {
            Some(GatewayEvent::ConnectRejected(object_or_empty(
                root.get("error"),
            )))
        }
    }

    fn interpret_event_frame(&mut self, root: &Value) -> Option<GatewayEvent> {
        let event_name = extract_string(root, "event");
        if event_name == EVENT_CONNECT_CHALLENGE {
            info!(event = %event_name, "gateway event received");
            let payload = object_or_empty(root.get("payload"));
            let nonce = extract_string(&payload, "nonce");
            if nonce.is_empty() {
                return Some(GatewayEvent::TransportError(
                    "connect challenge nonce is missing".to_string(),
                ));
            }
            return Some(GatewayEvent::ChallengeReceived(nonce));
        }
        if event_name == EVENT_NODE_INVOKE_REQUEST {
            info!(event = %event_name, "gateway event received");
            let payload = object_or_empty(root.get("payload"));
            let invoke_id = extract_string(&payload, "id");
            let node_id = extract_string(&payload, "nodeId");
            let command = extract_string(&payload, "command");
            if invoke_id.is_empty() || node_id.is_empty() || command.is_empty() {
                warn!("invalid node.invoke.request event: missing id/nodeId/command");
                return None;
            }
            return Some(GatewayEvent::InvokeRequestReceived(payload));
        }
        None
    }
}

fn object_or_empty(value: Option<&Value>) -> Value {
    match value {
        Some(value) if value.is_object() => value.clone(),
        _ => Value::Object(serde_json::Map::new()),
    }
}

/// Lowercase hex SHA-256 over the peer certificate's DER bytes, when a
/// TLS session with a certificate is present.
fn peer_certificate_sha256(socket: &WsStream) -> Option<String> {
    match socket.get_ref() {
        MaybeTlsStream::NativeTls(tls) => {
            let certificate = tls.get_ref().peer_certificate().ok().flatten()?;
            let der = certificate.to_der().ok()?;
            Some(hex::encode(Sha256::digest(der)))
        }
        _ => None,
    }
}
