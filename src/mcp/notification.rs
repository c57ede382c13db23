//! Notification delivery
//!
//! SSE sessions get notifications pushed onto their stream as soon as they happen. Streamable
//! sessions only receive what is queued for them, drained in front of their next response.
//! Queued entries are descriptors, not payloads: content and listings are read when the queue
//! is flushed, so a client never sees stale data.

use serde_json::{json, Value};
use tracing::debug;

use crate::capabilities::Capabilities;
use crate::mcp::message::TransportMode;
use crate::mcp::rpc::json_rpc_notification;
use crate::mcp::session::{Session, SessionRegistry, StreamEvent};

pub const RESOURCE_UPDATED: &str = "notifications/resources/updated";
pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingNotification {
    ResourceChanged(String),
    ResourcesListChanged,
    ToolsListChanged,
    PromptsListChanged,
}

impl PendingNotification {
    pub fn method(&self) -> &'static str {
        match self {
            Self::ResourceChanged(_) => RESOURCE_UPDATED,
            Self::ResourcesListChanged => RESOURCES_LIST_CHANGED,
            Self::ToolsListChanged => TOOLS_LIST_CHANGED,
            Self::PromptsListChanged => PROMPTS_LIST_CHANGED,
        }
    }

    /// Builds the notification envelope from the current registry state.
    pub async fn render(&self, capabilities: &Capabilities) -> Value {
        let params = match self {
            Self::ResourceChanged(uri) => json!({
                "uri": uri,
                "data": capabilities.resources.change_payload(uri).await,
            }),
            Self::ResourcesListChanged => json!({ "resources": capabilities.resources.list().await }),
            Self::ToolsListChanged => json!({ "tools": capabilities.tools.list() }),
            Self::PromptsListChanged => json!({ "prompts": capabilities.prompts.list() }),
        };
        json_rpc_notification(self.method(), params)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub pushed: usize,
    pub queued: usize,
}

/// Sends `notification` to the named sessions, pushing or queueing per transport mode.
pub async fn deliver(
    sessions: &mut SessionRegistry,
    capabilities: &Capabilities,
    targets: &[String],
    notification: PendingNotification,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let pushes_needed = targets.iter().any(|id| {
        sessions
            .get(id)
            .is_some_and(|session| session.mode() == TransportMode::Sse)
    });
    let rendered = if pushes_needed {
        Some(notification.render(capabilities).await)
    } else {
        None
    };

    for session_id in targets {
        let Some(session) = sessions.get_mut(session_id) else {
            continue;
        };
        match (session.mode(), &rendered) {
            (TransportMode::Sse, Some(payload)) => {
                if session.push(StreamEvent::Message(payload.clone())) {
                    report.pushed += 1;
                }
            }
            _ => {
                if session.enqueue(notification.clone()) {
                    report.queued += 1;
                }
            }
        }
    }

    debug!(
        target: "mcp::core",
        method = notification.method(),
        targets = targets.len(),
        pushed = report.pushed,
        queued = report.queued,
        "notification delivered"
    );
    report
}

/// Sends a list-changed notification to every initialized session.
pub async fn broadcast(
    sessions: &mut SessionRegistry,
    capabilities: &Capabilities,
    notification: PendingNotification,
) -> DeliveryReport {
    let targets: Vec<String> = sessions
        .sessions_mut()
        .filter(|session| session.is_initialized())
        .map(|session| session.id().to_string())
        .collect();
    deliver(sessions, capabilities, &targets, notification).await
}

/// Drains a session's queue and renders every entry, oldest first.
pub async fn flush(session: &mut Session, capabilities: &Capabilities) -> Vec<Value> {
    let pending = session.take_pending();
    let mut rendered = Vec::with_capacity(pending.len());
    for notification in &pending {
        rendered.push(notification.render(capabilities).await);
    }
    rendered
}
