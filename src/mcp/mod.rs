//! Model Context Protocol (MCP) session engine
//!
//! Message classification, the session handshake, routing, notification delivery and the
//! engine actor that owns all of it.

pub mod dispatcher;
pub mod engine;
pub mod initialize;
pub mod message;
pub mod notification;
pub mod rpc;
pub mod session;
pub mod subscription;

pub use engine::{
    ChangeNotifier, DispatchOutcome, EngineOptions, InboundFrame, Mutation, ServerHandle,
};
pub use initialize::ServerInfo;
pub use message::{Message, MessageKind, TransportInfo, TransportMode};
