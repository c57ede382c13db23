//! Parsed JSON-RPC messages and their transport tags

use serde_json::{Map, Value};
use thiserror::Error;

use crate::mcp::rpc::JSONRPC_VERSION;

pub const CONNECT_METHOD: &str = "connect";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
    /// Synthesized when a client opens a long-lived SSE stream.
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    Sse,
    Streamable,
}

impl TransportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Streamable => "streamable",
        }
    }
}

/// Extra routing hints attached by the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    Connect,
    Initialize,
    Ping,
}

/// Transport-level facts about where a message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub mode: TransportMode,
    pub session_id: Option<String>,
    pub protocol_version: Option<String>,
    pub accepts_event_stream: bool,
}

impl TransportInfo {
    pub fn streamable(session_id: Option<String>) -> Self {
        Self {
            mode: TransportMode::Streamable,
            session_id,
            protocol_version: None,
            accepts_event_stream: false,
        }
    }

    pub fn sse(session_id: Option<String>) -> Self {
        Self {
            mode: TransportMode::Sse,
            session_id,
            protocol_version: None,
            accepts_event_stream: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("body is not valid JSON")]
    InvalidJson,
    #[error("body is not a JSON object")]
    NotAnObject,
    #[error("jsonrpc field must be the string \"2.0\"")]
    WrongVersion,
    #[error("message does not match exactly one JSON-RPC message class")]
    Unclassifiable,
}

/// A classified inbound message. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
    result: Option<Value>,
    error: Option<Value>,
    tag: Option<MessageTag>,
    transport: TransportInfo,
}

impl Message {
    /// The pseudo request produced when a client opens an SSE stream.
    pub fn connect(transport: TransportInfo) -> Self {
        Self {
            kind: MessageKind::Connect,
            method: CONNECT_METHOD.to_string(),
            params: None,
            id: None,
            result: None,
            error: None,
            tag: Some(MessageTag::Connect),
            transport: TransportInfo {
                mode: TransportMode::Sse,
                ..transport
            },
        }
    }

    pub fn parse(body: &[u8], transport: TransportInfo) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| EnvelopeError::InvalidJson)?;
        let Value::Object(envelope) = value else {
            return Err(EnvelopeError::NotAnObject);
        };
        Self::from_envelope(envelope, transport)
    }

    pub fn from_envelope(
        mut envelope: Map<String, Value>,
        transport: TransportInfo,
    ) -> Result<Self, EnvelopeError> {
        if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(EnvelopeError::WrongVersion);
        }

        // Classification is by key presence, so `"id": null` still counts as an id.
        let id = envelope.remove("id");
        let method = match envelope.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };
        let result = envelope.remove("result");
        let error = envelope.remove("error");

        let is_request = id.is_some() && method.is_some();
        let is_response = id.is_some() && (result.is_some() != error.is_some());
        let is_notification = id.is_none() && method.is_some();

        let kind = match (is_request, is_response, is_notification) {
            (true, false, false) => MessageKind::Request,
            (false, true, false) => MessageKind::Response,
            (false, false, true) => MessageKind::Notification,
            _ => return Err(EnvelopeError::Unclassifiable),
        };

        let method = method.unwrap_or_default();
        let tag = match method.as_str() {
            "initialize" => Some(MessageTag::Initialize),
            "ping" => Some(MessageTag::Ping),
            _ => None,
        };

        Ok(Self {
            kind,
            method,
            params: envelope.remove("params"),
            id,
            result,
            error,
            tag,
            transport,
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    pub fn tag(&self) -> Option<MessageTag> {
        self.tag
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode
    }

    pub fn transport(&self) -> &TransportInfo {
        &self.transport
    }

    pub fn session_id(&self) -> Option<&str> {
        self.transport.session_id.as_deref()
    }

    pub fn expects_response(&self) -> bool {
        self.kind == MessageKind::Request
    }
}
