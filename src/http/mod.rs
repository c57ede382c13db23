//! HTTP transport layer for the Model Context Protocol
//!
//! Frames `/mcp` and `/sse` exchanges into protocol messages and serves the metadata
//! endpoints.

pub mod framer;
pub mod handlers;
