//! Transport framing
//!
//! Turns an HTTP exchange on `/mcp` or `/sse` into a classified [`Message`]. Anything that is
//! not a recognizable message is rejected here with a plain-text 4xx and never reaches the
//! engine.

use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::debug;

use crate::mcp::message::{EnvelopeError, Message, TransportInfo, TransportMode};

pub const MCP_PATH: &str = "/mcp";
pub const SSE_PATH: &str = "/sse";
pub const SESSION_ID: &str = "Mcp-Session-Id";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
pub const EVENT_STREAM: &str = "text/event-stream";
pub const JSON: &str = "application/json";

/// The parts of an HTTP request the framer looks at.
#[derive(Debug, Clone)]
pub struct HttpRequestData {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequestData {
    fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// The comma-separated `Accept` entries, trimmed.
    fn accept_types(&self) -> Vec<&str> {
        self.header(header::ACCEPT)
            .map(|accept| {
                accept
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn keeps_alive(&self) -> bool {
        self.header(header::CONNECTION).is_some_and(|connection| {
            connection
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("keep-alive"))
        })
    }

    fn content_type_is_json(&self) -> bool {
        self.header(header::CONTENT_TYPE).is_some_and(|content_type| {
            content_type
                .split(';')
                .next()
                .is_some_and(|media| media.trim().eq_ignore_ascii_case(JSON))
        })
    }
}

#[derive(Debug, Error)]
pub enum FrameRejection {
    #[error("unknown endpoint {0}")]
    UnknownPath(String),
    #[error("explicit session close is not supported")]
    CloseUnsupported,
    #[error("stream resumption is not supported")]
    ResumptionUnsupported,
    #[error("Accept must include application/json, text/event-stream or */*")]
    NotAcceptable,
    #[error("Content-Type must be application/json")]
    UnsupportedContentType,
    #[error("malformed JSON-RPC message: {0}")]
    MalformedEnvelope(#[from] EnvelopeError),
    #[error("request neither opens a stream nor carries a message")]
    Unclassifiable,
}

impl FrameRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownPath(_) => StatusCode::NOT_FOUND,
            Self::CloseUnsupported => StatusCode::METHOD_NOT_ALLOWED,
            Self::ResumptionUnsupported => StatusCode::BAD_REQUEST,
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::MalformedEnvelope(_) | Self::Unclassifiable => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for FrameRejection {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Classifies one HTTP request.
pub fn frame(request: &HttpRequestData) -> Result<Message, FrameRejection> {
    if request.path != MCP_PATH && request.path != SSE_PATH {
        return Err(FrameRejection::UnknownPath(request.path.clone()));
    }

    let accept = request.accept_types();
    if request.method == Method::POST
        && !accept
            .iter()
            .any(|entry| matches!(*entry, JSON | EVENT_STREAM | "*/*"))
    {
        return Err(FrameRejection::NotAcceptable);
    }

    if request.method == Method::GET && request.header(LAST_EVENT_ID_HEADER).is_some() {
        return Err(FrameRejection::ResumptionUnsupported);
    }
    if request.method == Method::DELETE {
        return Err(FrameRejection::CloseUnsupported);
    }

    let query_session = request.query_param(SESSION_ID);
    let header_session = request.header(SESSION_HEADER);
    let protocol_version = request.header(PROTOCOL_VERSION_HEADER).map(str::to_string);

    if request.method == Method::GET
        && query_session.is_none()
        && header_session.is_none()
        && accept == [EVENT_STREAM]
        && request.keeps_alive()
    {
        debug!(target: "mcp::transport", path = %request.path, "sse connect");
        return Ok(Message::connect(TransportInfo {
            mode: TransportMode::Sse,
            session_id: None,
            protocol_version,
            accepts_event_stream: true,
        }));
    }

    if request.method != Method::POST {
        return Err(FrameRejection::Unclassifiable);
    }
    if !request.content_type_is_json() {
        return Err(FrameRejection::UnsupportedContentType);
    }

    let transport = TransportInfo {
        mode: if query_session.is_some() {
            TransportMode::Sse
        } else {
            TransportMode::Streamable
        },
        session_id: query_session.or(header_session).map(str::to_string),
        protocol_version,
        accepts_event_stream: accept
            .iter()
            .any(|entry| matches!(*entry, EVENT_STREAM | "*/*")),
    };
    let message = Message::parse(&request.body, transport)?;
    debug!(
        target: "mcp::transport",
        method = %message.method(),
        kind = ?message.kind(),
        mode = message.mode().as_str(),
        "message framed"
    );
    Ok(message)
}
