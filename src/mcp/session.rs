//! Session records and the handshake state machine
//!
//! A session moves `Connecting -> Initializing -> Initialized`. Streamable sessions keep a
//! queue of pending notifications that is drained ahead of the next response; SSE sessions
//! hold the sender half of their long-lived stream instead.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mcp::message::{TransportInfo, TransportMode};
use crate::mcp::notification::PendingNotification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Initializing,
    Initialized,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
        }
    }
}

/// One event written to an SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Tells the client where to POST its messages.
    Endpoint(String),
    Message(Value),
}

pub type StreamSender = mpsc::UnboundedSender<StreamEvent>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} does not exist")]
    NotFound(String),
    #[error("session {0} has expired")]
    Expired(String),
    #[error("session {session_id} is {}", .status.as_str())]
    InvalidState {
        session_id: String,
        status: SessionStatus,
    },
}

#[derive(Debug)]
pub struct Session {
    id: String,
    connection_id: Option<u64>,
    status: SessionStatus,
    negotiated_version: Option<String>,
    mode: TransportMode,
    pending: Vec<PendingNotification>,
    stream: Option<StreamSender>,
    created_at: DateTime<Utc>,
    last_seen: Instant,
}

impl Session {
    fn new(id: String, mode: TransportMode) -> Self {
        Self {
            id,
            connection_id: None,
            status: SessionStatus::Connecting,
            negotiated_version: None,
            mode,
            pending: Vec::new(),
            stream: None,
            created_at: Utc::now(),
            last_seen: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.connection_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn negotiated_version(&self) -> Option<&str> {
        self.negotiated_version.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// How long the session has gone without a message, as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_initialized(&self) -> bool {
        self.status == SessionStatus::Initialized
    }

    /// Records a validated `initialize`. Only a fresh session may be initialized.
    pub fn begin_initialize(&mut self, protocol_version: &str) -> Result<(), SessionError> {
        if self.status != SessionStatus::Connecting {
            return Err(SessionError::InvalidState {
                session_id: self.id.clone(),
                status: self.status,
            });
        }

        self.status = SessionStatus::Initializing;
        self.negotiated_version = Some(protocol_version.to_string());
        info!(
            target: "mcp::session",
            session_id = %self.id,
            protocol_version = %protocol_version,
            "session initializing"
        );
        Ok(())
    }

    /// Applies the `initialized` notification.
    pub fn complete_initialize(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Initializing {
            return Err(SessionError::InvalidState {
                session_id: self.id.clone(),
                status: self.status,
            });
        }

        self.status = SessionStatus::Initialized;
        info!(target: "mcp::session", session_id = %self.id, "session initialized");
        Ok(())
    }

    /// Queues a notification for the next response. Returns false when an identical entry is
    /// already waiting.
    pub fn enqueue(&mut self, notification: PendingNotification) -> bool {
        if self.pending.contains(&notification) {
            return false;
        }
        self.pending.push(notification);
        true
    }

    pub fn pending(&self) -> &[PendingNotification] {
        &self.pending
    }

    pub fn take_pending(&mut self) -> Vec<PendingNotification> {
        std::mem::take(&mut self.pending)
    }

    /// Writes an event to the session's SSE stream. Returns false when the session has no open
    /// stream.
    pub fn push(&self, event: StreamEvent) -> bool {
        match &self.stream {
            Some(stream) => stream.send(event).is_ok(),
            None => false,
        }
    }
}

/// Outcome of matching an inbound message to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub session_id: String,
    pub created: bool,
    /// The session only lives for this one exchange and is dropped once it is answered.
    pub ephemeral: bool,
}

/// Expired ids remembered so late requests get `SessionExpired` instead of a new session.
const EXPIRED_MEMORY: usize = 1024;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    by_connection: HashMap<u64, String>,
    expired: VecDeque<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn session_for_connection(&self, connection_id: u64) -> Option<&str> {
        self.by_connection.get(&connection_id).map(String::as_str)
    }

    /// Opens an SSE session bound to a long-lived connection.
    pub fn open_stream(&mut self, connection_id: u64, stream: StreamSender) -> &Session {
        let id = Uuid::new_v4().to_string();
        let mut session = Session::new(id.clone(), TransportMode::Sse);
        session.connection_id = Some(connection_id);
        session.stream = Some(stream);

        debug!(target: "mcp::session", session_id = %id, connection_id, "sse session opened");
        self.by_connection.insert(connection_id, id.clone());
        self.sessions.entry(id).or_insert(session)
    }

    /// Finds or creates the session a message belongs to.
    ///
    /// SSE messages must name a session opened by a stream. A Streamable message without an
    /// id starts a new session when `opens_session` is set (an `initialize`); any other
    /// session-less message is served by an ephemeral session. A Streamable message naming an
    /// unknown id adopts it, unless that id recently expired.
    pub fn resolve(
        &mut self,
        transport: &TransportInfo,
        opens_session: bool,
    ) -> Result<Resolution, SessionError> {
        match (transport.mode, transport.session_id.as_deref()) {
            (TransportMode::Sse, Some(session_id)) => match self.sessions.get_mut(session_id) {
                Some(session) => {
                    session.last_seen = Instant::now();
                    Ok(Resolution {
                        session_id: session_id.to_string(),
                        created: false,
                        ephemeral: false,
                    })
                }
                None => Err(SessionError::NotFound(session_id.to_string())),
            },
            (_, Some(session_id)) => {
                if let Some(session) = self.sessions.get_mut(session_id) {
                    session.last_seen = Instant::now();
                    return Ok(Resolution {
                        session_id: session_id.to_string(),
                        created: false,
                        ephemeral: false,
                    });
                }
                if let Some(position) = self.expired.iter().position(|id| id == session_id) {
                    if !opens_session {
                        return Err(SessionError::Expired(session_id.to_string()));
                    }
                    self.expired.remove(position);
                }
                warn!(
                    target: "mcp::session",
                    session_id = %session_id,
                    "adopting unknown streamable session id"
                );
                self.insert(Session::new(session_id.to_string(), TransportMode::Streamable));
                Ok(Resolution {
                    session_id: session_id.to_string(),
                    created: true,
                    ephemeral: false,
                })
            }
            (_, None) => {
                let id = Uuid::new_v4().to_string();
                self.insert(Session::new(id.clone(), TransportMode::Streamable));
                let ephemeral = !opens_session;
                debug!(target: "mcp::session", session_id = %id, ephemeral, "streamable session created");
                Ok(Resolution {
                    session_id: id,
                    created: true,
                    ephemeral,
                })
            }
        }
    }

    /// Removes Streamable sessions idle for at least `idle_timeout` and returns them. SSE
    /// sessions live as long as their stream and are never expired here.
    pub fn expire_idle(&mut self, now: Instant, idle_timeout: Duration) -> Vec<Session> {
        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|session| {
                session.mode == TransportMode::Streamable && session.idle_for(now) >= idle_timeout
            })
            .map(|session| session.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for session_id in stale {
            if let Some(session) = self.sessions.remove(&session_id) {
                info!(target: "mcp::session", session_id = %session_id, "session expired");
                if self.expired.len() == EXPIRED_MEMORY {
                    self.expired.pop_front();
                }
                self.expired.push_back(session_id);
                expired.push(session);
            }
        }
        expired
    }

    fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        if let Some(connection_id) = session.connection_id {
            self.by_connection.remove(&connection_id);
        }
        debug!(target: "mcp::session", session_id = %session_id, "session destroyed");
        Some(session)
    }

    pub fn remove_by_connection(&mut self, connection_id: u64) -> Option<Session> {
        let session_id = self.by_connection.get(&connection_id)?.clone();
        self.remove(&session_id)
    }
}
