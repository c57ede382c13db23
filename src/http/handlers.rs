//! Axum HTTP handlers for the web server
//!
//! Provides the MCP transport endpoints and general metadata endpoints.

use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::ErrorCode;
use crate::http::framer::{self, HttpRequestData, EVENT_STREAM, MCP_PATH, SESSION_HEADER, SSE_PATH};
use crate::mcp::session::StreamEvent;
use crate::mcp::{DispatchOutcome, InboundFrame, Message, MessageKind, ServerHandle};
use crate::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
    pub sse_endpoint: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: MCP_PATH,
        sse_endpoint: SSE_PATH,
    })
}

/// Shared handler for `/mcp` and `/sse`, any verb.
pub async fn mcp_transport(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = HttpRequestData {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    };

    let message = match framer::frame(&request) {
        Ok(message) => message,
        Err(rejection) => {
            debug!(
                target: "mcp::transport",
                method = %request.method,
                path = %request.path,
                status = rejection.status().as_u16(),
                reason = %rejection,
                "request rejected by framer"
            );
            return rejection.into_response();
        }
    };

    let connection_id = state.next_connection_id();
    if message.kind() == MessageKind::Connect {
        return open_stream(state.server, connection_id, message).await;
    }

    let accepts_event_stream = message.transport().accepts_event_stream;
    let outcome = state
        .server
        .dispatch(InboundFrame {
            connection_id,
            message,
            stream: None,
        })
        .await;
    outcome_response(outcome, accepts_event_stream)
}

async fn open_stream(server: ServerHandle, connection_id: u64, message: Message) -> Response {
    let (sender, events) = mpsc::unbounded_channel();
    let outcome = server
        .dispatch(InboundFrame {
            connection_id,
            message,
            stream: Some(sender),
        })
        .await;

    match outcome {
        DispatchOutcome::Connected { session_id } => {
            info!(target: "mcp::transport", session_id = %session_id, connection_id, "event stream opened");
            let stream = SessionStream {
                events,
                server,
                connection_id,
            };
            Sse::new(stream)
                .keep_alive(
                    KeepAlive::new()
                        .interval(KEEP_ALIVE_INTERVAL)
                        .text("keep-alive"),
                )
                .into_response()
        }
        other => outcome_response(other, true),
    }
}

/// Event stream of one SSE session. Dropping it, which axum does when the client goes away,
/// tells the engine the connection is gone.
struct SessionStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    server: ServerHandle,
    connection_id: u64,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events
            .poll_recv(cx)
            .map(|event| event.map(|event| Ok(sse_event(event))))
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        debug!(target: "mcp::transport", connection_id = self.connection_id, "event stream closed");
        self.server.disconnect(self.connection_id);
    }
}

fn sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Endpoint(endpoint) => Event::default().event("endpoint").data(endpoint),
        StreamEvent::Message(payload) => Event::default().event("message").data(payload.to_string()),
    }
}

fn outcome_response(outcome: DispatchOutcome, accepts_event_stream: bool) -> Response {
    match outcome {
        DispatchOutcome::Reply {
            session_id,
            notifications,
            response,
        } => {
            let mut http_response = match response {
                None => StatusCode::ACCEPTED.into_response(),
                Some(response) if accepts_event_stream && !notifications.is_empty() => {
                    event_stream_body(&notifications, &response)
                }
                Some(response) => Json(response).into_response(),
            };
            if let Some(session_id) = session_id {
                match HeaderValue::from_str(&session_id) {
                    Ok(value) => {
                        http_response.headers_mut().insert(SESSION_HEADER, value);
                    }
                    Err(_) => {
                        warn!(target: "mcp::transport", session_id = %session_id, "session id is not a valid header value")
                    }
                }
            }
            http_response
        }
        DispatchOutcome::Streamed { .. } | DispatchOutcome::Connected { .. } => {
            StatusCode::ACCEPTED.into_response()
        }
        DispatchOutcome::Rejected(error) => {
            let status = match error.code {
                ErrorCode::SessionNotFound | ErrorCode::SessionExpired => StatusCode::NOT_FOUND,
                ErrorCode::InternalError => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, error.message).into_response()
        }
    }
}

/// Frames flushed notifications followed by the response as one `text/event-stream` body.
fn event_stream_body(notifications: &[Value], response: &Value) -> Response {
    let body: String = notifications
        .iter()
        .chain(std::iter::once(response))
        .map(|payload| format!("event: message\ndata: {payload}\n\n"))
        .collect();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, EVENT_STREAM)],
        Body::from(body),
    )
        .into_response()
}
