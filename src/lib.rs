use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{
    middleware,
    routing::{any, get},
    Router,
};

pub mod bridge;
pub mod capabilities;
pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;

use mcp::ServerHandle;

const FIRST_CONNECTION_ID: u64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub server: ServerHandle,
    connections: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(server: ServerHandle) -> Self {
        Self {
            server,
            connections: Arc::new(AtomicU64::new(FIRST_CONNECTION_ID)),
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::Relaxed)
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(http::framer::MCP_PATH, any(http::handlers::mcp_transport))
        .route(http::framer::SSE_PATH, any(http::handlers::mcp_transport))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
