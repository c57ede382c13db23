//! The protocol engine
//!
//! All protocol state lives in one [`EngineState`] owned by a task on the `mcp-engine`
//! execution context. Nothing else touches it: HTTP handlers, resource owners and startup code
//! talk to the engine through a [`ServerHandle`], which turns every call into a command on
//! the engine's queue. Tool calls are handed to the tool's owning context
//! and come back as a completion, so a slow tool never stalls other sessions.

use std::{
    sync::{mpsc as std_mpsc, Arc},
    time::{Duration, Instant},
};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bridge::{BridgeError, ContextHandle, ExecutionContext, Owned};
use crate::capabilities::config::{CapabilityConfigError, PromptConfig, ResourceConfig, ToolConfig};
use crate::capabilities::resources::MetadataUpdate;
use crate::capabilities::tools::ToolError;
use crate::capabilities::{
    Capabilities, PromptDefinition, ResourceDefinition, ResourceHandler, ToolDefinition,
    ToolHandler,
};
use crate::errors::{ErrorCode, McpError};
use crate::mcp::dispatcher::{Context, Dispatcher, Reply, ToolCall};
use crate::mcp::initialize::ServerInfo;
use crate::mcp::message::{Message, MessageKind, MessageTag, TransportMode};
use crate::mcp::notification::{self, PendingNotification};
use crate::mcp::rpc::json_rpc_result;
use crate::mcp::session::{Session, SessionError, SessionRegistry, StreamEvent, StreamSender};
use crate::mcp::subscription::SubscriptionIndex;

const ENGINE_CONTEXT: &str = "mcp-engine";

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Streamable sessions that see no message for this long are expired.
    pub session_idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            session_idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Everything the engine owns.
#[derive(Default)]
pub struct EngineState {
    pub sessions: SessionRegistry,
    pub subscriptions: SubscriptionIndex,
    pub capabilities: Capabilities,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A classified message together with the connection it arrived on.
#[derive(Debug)]
pub struct InboundFrame {
    pub connection_id: u64,
    pub message: Message,
    /// Set for SSE connect frames: where pushed events for the new session go.
    pub stream: Option<StreamSender>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// A Streamable exchange: flushed notifications go out ahead of the response. There is
    /// no session id when the exchange was served without a lasting session.
    Reply {
        session_id: Option<String>,
        notifications: Vec<Value>,
        response: Option<Value>,
    },
    /// The response, if any, went out on the session's SSE stream.
    Streamed { session_id: String },
    /// An SSE stream was opened for a new session.
    Connected { session_id: String },
    /// The message could not be matched to a session.
    Rejected(McpError),
}

/// Changes to the capability registries.
pub enum Mutation {
    AddTool(ToolDefinition),
    RemoveTool(String),
    AddResource(ResourceDefinition),
    RemoveResource(String),
    ResourceChanged(String),
    ResourceInvalidated(String),
    UpdateResourceMetadata { uri: String, update: MetadataUpdate },
    AddPrompt(PromptDefinition),
    RemovePrompt(String),
}

impl Mutation {
    fn name(&self) -> &'static str {
        match self {
            Self::AddTool(_) => "add_tool",
            Self::RemoveTool(_) => "remove_tool",
            Self::AddResource(_) => "add_resource",
            Self::RemoveResource(_) => "remove_resource",
            Self::ResourceChanged(_) => "resource_changed",
            Self::ResourceInvalidated(_) => "resource_invalidated",
            Self::UpdateResourceMetadata { .. } => "update_resource_metadata",
            Self::AddPrompt(_) => "add_prompt",
            Self::RemovePrompt(_) => "remove_prompt",
        }
    }
}

enum MutationReply {
    Async(oneshot::Sender<Result<bool, McpError>>),
    Blocking(std_mpsc::SyncSender<Result<bool, McpError>>),
}

impl MutationReply {
    fn send(self, result: Result<bool, McpError>) {
        match self {
            Self::Async(reply) => {
                let _ = reply.send(result);
            }
            Self::Blocking(reply) => {
                let _ = reply.send(result);
            }
        }
    }
}

struct Completion {
    session_id: String,
    accepts_event_stream: bool,
    id: Option<Value>,
    tool: String,
    outcome: Result<Result<Value, ToolError>, BridgeError>,
    reply: Option<oneshot::Sender<DispatchOutcome>>,
}

enum EngineCommand {
    Inbound {
        frame: InboundFrame,
        reply: oneshot::Sender<DispatchOutcome>,
    },
    Completed(Completion),
    Disconnected {
        connection_id: u64,
    },
    Mutate {
        mutation: Mutation,
        reply: Option<MutationReply>,
    },
    Inspect(Box<dyn FnOnce(&EngineState) + Send>),
    Sweep,
}

struct Engine {
    state: EngineState,
    dispatcher: Dispatcher,
    options: EngineOptions,
    commands: mpsc::WeakUnboundedSender<EngineCommand>,
}

impl Engine {
    fn new(
        server_info: ServerInfo,
        options: EngineOptions,
        commands: mpsc::WeakUnboundedSender<EngineCommand>,
    ) -> Self {
        Self {
            state: EngineState::new(),
            dispatcher: Dispatcher::new(server_info),
            options,
            commands,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<EngineCommand>) {
        info!(
            target: "mcp::core",
            server = %self.dispatcher.server_info().name,
            "engine started"
        );
        while let Some(command) = inbox.recv().await {
            match command {
                EngineCommand::Inbound { frame, reply } => self.inbound(frame, reply).await,
                EngineCommand::Completed(completion) => self.complete(completion).await,
                EngineCommand::Disconnected { connection_id } => self.disconnected(connection_id),
                EngineCommand::Mutate { mutation, reply } => {
                    let name = mutation.name();
                    let result = self.mutate(mutation).await;
                    match reply {
                        Some(reply) => reply.send(result),
                        None => {
                            if let Err(error) = result {
                                warn!(target: "mcp::core", mutation = name, error = %error, "posted mutation failed");
                            }
                        }
                    }
                }
                EngineCommand::Inspect(inspect) => inspect(&self.state),
                EngineCommand::Sweep => self.sweep(),
            }
        }
        info!(target: "mcp::core", "engine stopped");
    }

    async fn inbound(&mut self, frame: InboundFrame, reply: oneshot::Sender<DispatchOutcome>) {
        let InboundFrame {
            connection_id,
            message,
            stream,
        } = frame;

        if message.kind() == MessageKind::Connect {
            let _ = reply.send(self.connect(connection_id, stream));
            return;
        }

        let opens_session = message.tag() == Some(MessageTag::Initialize);
        let resolution = match self.state.sessions.resolve(message.transport(), opens_session) {
            Ok(resolution) => resolution,
            Err(error) => {
                warn!(target: "mcp::session", error = %error, "message rejected");
                let code = match error {
                    SessionError::Expired(_) => ErrorCode::SessionExpired,
                    _ => ErrorCode::SessionNotFound,
                };
                let _ = reply.send(DispatchOutcome::Rejected(
                    McpError::from_code(code)
                        .with_data(json!({ "sessionId": message.session_id() })),
                ));
                return;
            }
        };
        let session_id = resolution.session_id;

        if message.kind() == MessageKind::Response {
            if resolution.ephemeral {
                self.discard(&session_id);
            }
            debug!(
                target: "mcp::core",
                session_id = %session_id,
                is_error = message.error().is_some(),
                "client response received"
            );
            self.finish(&session_id, false, None, Some(reply)).await;
            return;
        }

        self.check_protocol_header(&session_id, &message);
        let accepts_event_stream = message.transport().accepts_event_stream;
        let context = Context {
            connection_id,
            session_id: &session_id,
            message: &message,
        };
        let handled = self.dispatcher.dispatch(&mut self.state, context).await;
        if resolution.ephemeral {
            self.discard(&session_id);
        }
        match handled {
            Reply::Response(response) => {
                self.finish(&session_id, accepts_event_stream, Some(response), Some(reply))
                    .await
            }
            Reply::Silent => self.finish(&session_id, false, None, Some(reply)).await,
            Reply::Deferred(call) => self.defer(session_id, accepts_event_stream, call, reply),
        }
    }

    fn connect(&mut self, connection_id: u64, stream: Option<StreamSender>) -> DispatchOutcome {
        let Some(stream) = stream else {
            return DispatchOutcome::Rejected(McpError::invalid_request(
                "connect requires an event stream",
            ));
        };

        let session = self.state.sessions.open_stream(connection_id, stream);
        let session_id = session.id().to_string();
        let endpoint = format!("/sse?Mcp-Session-Id={session_id}");
        if !session.push(StreamEvent::Endpoint(endpoint)) {
            warn!(target: "mcp::transport", session_id = %session_id, "stream closed before endpoint event");
        }
        info!(target: "mcp::session", session_id = %session_id, connection_id, "sse stream connected");
        DispatchOutcome::Connected { session_id }
    }

    fn check_protocol_header(&self, session_id: &str, message: &Message) {
        let header = message.transport().protocol_version.as_deref();
        let negotiated = self
            .state
            .sessions
            .get(session_id)
            .and_then(Session::negotiated_version);
        if let (Some(header), Some(negotiated)) = (header, negotiated) {
            if header != negotiated {
                debug!(
                    target: "mcp::transport",
                    session_id = %session_id,
                    header = %header,
                    negotiated = %negotiated,
                    "MCP-Protocol-Version header disagrees with negotiated version"
                );
            }
        }
    }

    /// Sends a finished exchange back. SSE sessions get the response on their stream; a
    /// Streamable response that can carry an event stream takes the session's queue with it.
    async fn finish(
        &mut self,
        session_id: &str,
        accepts_event_stream: bool,
        response: Option<Value>,
        reply: Option<oneshot::Sender<DispatchOutcome>>,
    ) {
        let session_id = session_id.to_string();
        let Some(session) = self.state.sessions.get_mut(&session_id) else {
            debug!(target: "mcp::session", session_id = %session_id, "no session to attach the reply to");
            if let Some(reply) = reply {
                let _ = reply.send(DispatchOutcome::Reply {
                    session_id: None,
                    notifications: Vec::new(),
                    response,
                });
            }
            return;
        };

        let outcome = match session.mode() {
            TransportMode::Sse => {
                if let Some(response) = response {
                    if !session.push(StreamEvent::Message(response)) {
                        warn!(target: "mcp::transport", session_id = %session_id, "response dropped, stream closed");
                    }
                }
                DispatchOutcome::Streamed { session_id }
            }
            TransportMode::Streamable => {
                let notifications = if response.is_some() && accepts_event_stream {
                    notification::flush(session, &self.state.capabilities).await
                } else {
                    Vec::new()
                };
                DispatchOutcome::Reply {
                    session_id: Some(session_id),
                    notifications,
                    response,
                }
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn defer(
        &mut self,
        session_id: String,
        accepts_event_stream: bool,
        call: ToolCall,
        reply: oneshot::Sender<DispatchOutcome>,
    ) {
        let streamed = self
            .state
            .sessions
            .get(&session_id)
            .is_some_and(|session| session.mode() == TransportMode::Sse);
        let reply = if streamed {
            let _ = reply.send(DispatchOutcome::Streamed {
                session_id: session_id.clone(),
            });
            None
        } else {
            Some(reply)
        };

        let ToolCall {
            id,
            tool,
            arguments,
            handler,
        } = call;
        debug!(
            target: "mcp::tools",
            tool = %tool,
            owner = %handler.owner().name(),
            "tool call handed to owner"
        );

        let commands = self.commands.clone();
        tokio::task::spawn_local(async move {
            let outcome = handler.call(move |handler| handler.execute(arguments)).await;
            let completion = Completion {
                session_id,
                accepts_event_stream,
                id,
                tool,
                outcome,
                reply,
            };
            match commands.upgrade() {
                Some(commands) => {
                    let _ = commands.send(EngineCommand::Completed(completion));
                }
                None => debug!(target: "mcp::tools", "engine stopped before tool call completed"),
            }
        });
    }

    async fn complete(&mut self, completion: Completion) {
        let Completion {
            session_id,
            accepts_event_stream,
            id,
            tool,
            outcome,
            reply,
        } = completion;

        let response = match outcome {
            Ok(Ok(result)) => {
                if let Some(registered) = self.state.capabilities.tools.get(&tool) {
                    if let Err(violation) = registered.validate_output(&result) {
                        warn!(
                            target: "mcp::tools",
                            tool = %tool,
                            violation = %violation,
                            "tool result does not match output schema"
                        );
                    }
                }
                json_rpc_result(id, result)
            }
            Ok(Err(error)) => {
                warn!(target: "mcp::tools", tool = %tool, error = %error, "tool execution failed");
                McpError::tool_execution_failed(format!("Tool execution failed: {error}"))
                    .with_data(json!({ "tool": tool }))
                    .to_response(id)
            }
            Err(error) => {
                warn!(target: "mcp::tools", tool = %tool, error = %error, "tool owner unavailable");
                McpError::tool_execution_failed(format!("Tool execution failed: {error}"))
                    .with_data(json!({ "tool": tool }))
                    .to_response(id)
            }
        };

        self.finish(&session_id, accepts_event_stream, Some(response), reply)
            .await;
    }

    /// Drops a session that only existed to serve one session-less exchange.
    fn discard(&mut self, session_id: &str) {
        if self.state.sessions.remove(session_id).is_some() {
            self.state.subscriptions.unsubscribe_all(session_id);
        }
    }

    fn sweep(&mut self) {
        let expired = self
            .state
            .sessions
            .expire_idle(Instant::now(), self.options.session_idle_timeout);
        for session in expired {
            let dropped = self.state.subscriptions.unsubscribe_all(session.id());
            debug!(
                target: "mcp::session",
                session_id = %session.id(),
                subscriptions = dropped.len(),
                "idle session swept"
            );
        }
    }

    fn disconnected(&mut self, connection_id: u64) {
        let Some(session) = self.state.sessions.remove_by_connection(connection_id) else {
            return;
        };
        let dropped = self.state.subscriptions.unsubscribe_all(session.id());
        info!(
            target: "mcp::session",
            session_id = %session.id(),
            connection_id,
            subscriptions = dropped.len(),
            "connection closed"
        );
    }

    async fn mutate(&mut self, mutation: Mutation) -> Result<bool, McpError> {
        match mutation {
            Mutation::AddTool(definition) => {
                let name = definition.name.clone();
                let replaced = self.state.capabilities.tools.insert(definition)?;
                info!(target: "mcp::tools", tool = %name, replaced, "tool registered");
                self.broadcast(PendingNotification::ToolsListChanged).await;
                Ok(replaced)
            }
            Mutation::RemoveTool(name) => {
                let removed = self.state.capabilities.tools.remove(&name);
                if removed {
                    info!(target: "mcp::tools", tool = %name, "tool removed");
                    self.broadcast(PendingNotification::ToolsListChanged).await;
                }
                Ok(removed)
            }
            Mutation::AddResource(resource) => {
                let uri = resource.uri().to_string();
                let replaced = self.state.capabilities.resources.insert(resource)?;
                info!(target: "mcp::resource", uri = %uri, replaced, "resource registered");
                self.notify_subscribers(&uri).await;
                self.broadcast(PendingNotification::ResourcesListChanged).await;
                Ok(replaced)
            }
            Mutation::RemoveResource(uri) | Mutation::ResourceInvalidated(uri) => {
                Ok(self.remove_resource(&uri).await)
            }
            Mutation::ResourceChanged(uri) => {
                if !self.state.capabilities.resources.contains(&uri) {
                    warn!(target: "mcp::resource", uri = %uri, "change reported for unknown resource");
                    return Ok(false);
                }
                self.notify_subscribers(&uri).await;
                Ok(true)
            }
            Mutation::UpdateResourceMetadata { uri, update } => {
                let changed = self
                    .state
                    .capabilities
                    .resources
                    .update_metadata(&uri, update);
                if changed {
                    self.notify_subscribers(&uri).await;
                    self.broadcast(PendingNotification::ResourcesListChanged).await;
                }
                Ok(changed)
            }
            Mutation::AddPrompt(prompt) => {
                let name = prompt.name.clone();
                let replaced = self.state.capabilities.prompts.insert(prompt)?;
                info!(target: "mcp::core", prompt = %name, replaced, "prompt registered");
                self.broadcast(PendingNotification::PromptsListChanged).await;
                Ok(replaced)
            }
            Mutation::RemovePrompt(name) => {
                let removed = self.state.capabilities.prompts.remove(&name);
                if removed {
                    self.broadcast(PendingNotification::PromptsListChanged).await;
                }
                Ok(removed)
            }
        }
    }

    /// Removes a resource; its subscribers see it as deleted and lose their subscription.
    async fn remove_resource(&mut self, uri: &str) -> bool {
        if !self.state.capabilities.resources.remove(uri) {
            return false;
        }
        info!(target: "mcp::resource", uri = %uri, "resource removed");
        self.notify_subscribers(uri).await;
        self.state.subscriptions.clear_uri(uri);
        self.broadcast(PendingNotification::ResourcesListChanged).await;
        true
    }

    async fn notify_subscribers(&mut self, uri: &str) {
        let targets = self.state.subscriptions.subscribers(uri);
        if targets.is_empty() {
            return;
        }
        notification::deliver(
            &mut self.state.sessions,
            &self.state.capabilities,
            &targets,
            PendingNotification::ResourceChanged(uri.to_string()),
        )
        .await;
    }

    async fn broadcast(&mut self, notification: PendingNotification) {
        notification::broadcast(
            &mut self.state.sessions,
            &self.state.capabilities,
            notification,
        )
        .await;
    }
}

/// Asks the engine to expire idle sessions every `every` until the engine stops.
async fn sweep_sessions(commands: mpsc::WeakUnboundedSender<EngineCommand>, every: Duration) {
    let mut ticks = tokio::time::interval(every);
    ticks.tick().await;
    loop {
        ticks.tick().await;
        let Some(commands) = commands.upgrade() else {
            break;
        };
        if commands.send(EngineCommand::Sweep).is_err() {
            break;
        }
    }
}

fn engine_stopped() -> McpError {
    McpError::internal("engine has stopped")
}

fn config_error(error: CapabilityConfigError) -> McpError {
    McpError::new(ErrorCode::ConfigurationError, error.to_string())
}

/// Public handle to a running engine. The engine stops once every handle is dropped.
#[derive(Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    context: Arc<ExecutionContext>,
}

impl ServerHandle {
    pub fn start(server_info: ServerInfo) -> Result<Self, BridgeError> {
        Self::start_with(server_info, EngineOptions::default())
    }

    pub fn start_with(server_info: ServerInfo, options: EngineOptions) -> Result<Self, BridgeError> {
        let context = ExecutionContext::spawn(ENGINE_CONTEXT)?;
        let (commands, inbox) = mpsc::unbounded_channel();
        let weak = commands.downgrade();
        context.handle().spawn(move || {
            tokio::task::spawn_local(sweep_sessions(weak.clone(), options.sweep_interval));
            Engine::new(server_info, options, weak).run(inbox)
        })?;
        Ok(Self {
            commands,
            context: Arc::new(context),
        })
    }

    /// The context the engine runs on. Handlers owned by it are called inline.
    pub fn engine_context(&self) -> ContextHandle {
        self.context.handle()
    }

    pub fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier {
            commands: self.commands.downgrade(),
        }
    }

    pub async fn dispatch(&self, frame: InboundFrame) -> DispatchOutcome {
        let (reply, outcome) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::Inbound { frame, reply })
            .is_err()
        {
            return DispatchOutcome::Rejected(engine_stopped());
        }
        outcome
            .await
            .unwrap_or_else(|_| DispatchOutcome::Rejected(engine_stopped()))
    }

    pub fn disconnect(&self, connection_id: u64) {
        if self
            .commands
            .send(EngineCommand::Disconnected { connection_id })
            .is_err()
        {
            debug!(target: "mcp::transport", connection_id, "disconnect after engine stopped");
        }
    }

    /// Runs `inspect` against the engine state on the engine's context.
    pub async fn inspect<F, R>(&self, inspect: F) -> Result<R, McpError>
    where
        F: FnOnce(&EngineState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(EngineCommand::Inspect(Box::new(move |state| {
                let _ = reply.send(inspect(state));
            })))
            .map_err(|_| engine_stopped())?;
        result.await.map_err(|_| engine_stopped())
    }

    pub async fn session_count(&self) -> usize {
        self.inspect(|state| state.sessions.len()).await.unwrap_or(0)
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        let name = name.to_string();
        self.inspect(move |state| state.capabilities.tools.contains(&name))
            .await
            .unwrap_or(false)
    }

    pub async fn has_resource(&self, uri: &str) -> bool {
        let uri = uri.to_string();
        self.inspect(move |state| state.capabilities.resources.contains(&uri))
            .await
            .unwrap_or(false)
    }

    pub async fn apply(&self, mutation: Mutation) -> Result<bool, McpError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(EngineCommand::Mutate {
                mutation,
                reply: Some(MutationReply::Async(reply)),
            })
            .map_err(|_| engine_stopped())?;
        result.await.map_err(|_| engine_stopped())?
    }

    /// Queues `mutation` and returns without waiting for it. Failures are logged by the
    /// engine.
    pub fn post(&self, mutation: Mutation) -> Result<(), McpError> {
        self.commands
            .send(EngineCommand::Mutate {
                mutation,
                reply: None,
            })
            .map_err(|_| engine_stopped())
    }

    /// Applies `mutation` and blocks the calling thread until the engine has done so.
    ///
    /// For plain threads and for jobs running on other execution contexts. Calling it from the
    /// engine's own context is an error rather than a deadlock.
    pub fn blocking(&self, mutation: Mutation) -> Result<bool, McpError> {
        if self.context.handle().is_current() {
            return Err(McpError::internal(
                "blocking engine call made from the engine context",
            ));
        }
        let (reply, result) = std_mpsc::sync_channel(1);
        self.commands
            .send(EngineCommand::Mutate {
                mutation,
                reply: Some(MutationReply::Blocking(reply)),
            })
            .map_err(|_| engine_stopped())?;
        result.recv().map_err(|_| engine_stopped())?
    }

    pub async fn add_tool(&self, tool: ToolDefinition) -> Result<(), McpError> {
        self.apply(Mutation::AddTool(tool)).await.map(drop)
    }

    pub async fn add_tool_from_config(
        &self,
        config: &Value,
        handler: Owned<dyn ToolHandler>,
    ) -> Result<(), McpError> {
        let config = ToolConfig::from_json(config).map_err(config_error)?;
        self.add_tool(ToolDefinition::from_config(config, handler))
            .await
    }

    pub async fn remove_tool(&self, name: &str) -> bool {
        self.apply(Mutation::RemoveTool(name.to_string()))
            .await
            .unwrap_or(false)
    }

    pub async fn add_resource(&self, resource: ResourceDefinition) -> Result<(), McpError> {
        self.apply(Mutation::AddResource(resource)).await.map(drop)
    }

    pub async fn add_resource_from_config(
        &self,
        config: &Value,
        handler: Option<Owned<dyn ResourceHandler>>,
    ) -> Result<(), McpError> {
        let config = ResourceConfig::from_json(config).map_err(config_error)?;
        let resource = ResourceDefinition::from_config(config, handler).map_err(config_error)?;
        self.add_resource(resource).await
    }

    pub async fn remove_resource(&self, uri: &str) -> bool {
        self.apply(Mutation::RemoveResource(uri.to_string()))
            .await
            .unwrap_or(false)
    }

    /// Tells subscribers of `uri` that its content changed.
    pub async fn resource_changed(&self, uri: &str) -> bool {
        self.apply(Mutation::ResourceChanged(uri.to_string()))
            .await
            .unwrap_or(false)
    }

    /// Drops the resource; subscribers receive it as deleted.
    pub async fn resource_invalidated(&self, uri: &str) -> bool {
        self.apply(Mutation::ResourceInvalidated(uri.to_string()))
            .await
            .unwrap_or(false)
    }

    pub async fn update_resource_metadata(&self, uri: &str, update: MetadataUpdate) -> bool {
        self.apply(Mutation::UpdateResourceMetadata {
            uri: uri.to_string(),
            update,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn add_prompt(&self, prompt: PromptDefinition) -> Result<(), McpError> {
        self.apply(Mutation::AddPrompt(prompt)).await.map(drop)
    }

    pub async fn add_prompt_from_config(&self, config: &Value) -> Result<(), McpError> {
        let config = PromptConfig::from_json(config).map_err(config_error)?;
        self.add_prompt(PromptDefinition::from_config(config)).await
    }

    pub async fn remove_prompt(&self, name: &str) -> bool {
        self.apply(Mutation::RemovePrompt(name.to_string()))
            .await
            .unwrap_or(false)
    }

    pub fn post_add_tool(&self, tool: ToolDefinition) -> Result<(), McpError> {
        self.post(Mutation::AddTool(tool))
    }

    pub fn post_add_resource(&self, resource: ResourceDefinition) -> Result<(), McpError> {
        self.post(Mutation::AddResource(resource))
    }

    pub fn post_add_prompt(&self, prompt: PromptDefinition) -> Result<(), McpError> {
        self.post(Mutation::AddPrompt(prompt))
    }

    pub fn blocking_add_tool(&self, tool: ToolDefinition) -> Result<(), McpError> {
        self.blocking(Mutation::AddTool(tool)).map(drop)
    }

    pub fn blocking_add_resource(&self, resource: ResourceDefinition) -> Result<(), McpError> {
        self.blocking(Mutation::AddResource(resource)).map(drop)
    }

    pub fn blocking_add_prompt(&self, prompt: PromptDefinition) -> Result<(), McpError> {
        self.blocking(Mutation::AddPrompt(prompt)).map(drop)
    }

    pub fn blocking_remove_tool(&self, name: &str) -> Result<bool, McpError> {
        self.blocking(Mutation::RemoveTool(name.to_string()))
    }

    pub fn blocking_remove_resource(&self, uri: &str) -> Result<bool, McpError> {
        self.blocking(Mutation::RemoveResource(uri.to_string()))
    }
}

/// Lets the owner of a resource report changes from any thread.
#[derive(Clone)]
pub struct ChangeNotifier {
    commands: mpsc::WeakUnboundedSender<EngineCommand>,
}

impl ChangeNotifier {
    /// Returns false once the engine has stopped.
    pub fn changed(&self, uri: &str) -> bool {
        self.send(Mutation::ResourceChanged(uri.to_string()))
    }

    pub fn invalidated(&self, uri: &str) -> bool {
        self.send(Mutation::ResourceInvalidated(uri.to_string()))
    }

    fn send(&self, mutation: Mutation) -> bool {
        self.commands.upgrade().is_some_and(|commands| {
            commands
                .send(EngineCommand::Mutate {
                    mutation,
                    reply: None,
                })
                .is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::capabilities::tools::{owned_tool, text_result};
    use crate::mcp::message::TransportInfo;
    use crate::mcp::notification::{RESOURCE_UPDATED, TOOLS_LIST_CHANGED};
    use crate::mcp::session::SessionStatus;

    use super::*;

    fn start() -> ServerHandle {
        ServerHandle::start(ServerInfo::default()).expect("engine")
    }

    fn streamable(body: Value, session_id: Option<&str>) -> InboundFrame {
        let transport = TransportInfo {
            accepts_event_stream: true,
            ..TransportInfo::streamable(session_id.map(str::to_string))
        };
        InboundFrame {
            connection_id: 1,
            message: Message::parse(body.to_string().as_bytes(), transport).expect("message"),
            stream: None,
        }
    }

    fn sse_post(body: Value, session_id: &str) -> InboundFrame {
        InboundFrame {
            connection_id: 2,
            message: Message::parse(
                body.to_string().as_bytes(),
                TransportInfo::sse(Some(session_id.to_string())),
            )
            .expect("message"),
            stream: None,
        }
    }

    fn request(id: u64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    fn initialized_notification() -> Value {
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
    }

    fn into_reply(outcome: DispatchOutcome) -> (Option<String>, Vec<Value>, Option<Value>) {
        match outcome {
            DispatchOutcome::Reply {
                session_id,
                notifications,
                response,
            } => (session_id, notifications, response),
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    async fn call(server: &ServerHandle, body: Value, session_id: &str) -> (Vec<Value>, Value) {
        let (_, notifications, response) = into_reply(
            server
                .dispatch(streamable(body, Some(session_id)))
                .await,
        );
        (notifications, response.expect("response"))
    }

    async fn initialized_session(server: &ServerHandle) -> String {
        let (session_id, _, response) = into_reply(
            server
                .dispatch(streamable(
                    request(1, "initialize", json!({ "protocolVersion": "2025-06-18" })),
                    None,
                ))
                .await,
        );
        assert!(response.expect("initialize response").get("result").is_some());
        let session_id = session_id.expect("initialize opens a session");
        let (_, _, response) = into_reply(
            server
                .dispatch(streamable(initialized_notification(), Some(&session_id)))
                .await,
        );
        assert!(response.is_none());
        session_id
    }

    async fn session_status(server: &ServerHandle, session_id: &str) -> Option<SessionStatus> {
        let session_id = session_id.to_string();
        server
            .inspect(move |state| state.sessions.get(&session_id).map(Session::status))
            .await
            .expect("inspect")
    }

    async fn open_sse(server: &ServerHandle, connection_id: u64) -> (String, mpsc::UnboundedReceiver<StreamEvent>) {
        let (sender, mut events) = mpsc::unbounded_channel();
        let outcome = server
            .dispatch(InboundFrame {
                connection_id,
                message: Message::connect(TransportInfo::sse(None)),
                stream: Some(sender),
            })
            .await;
        let DispatchOutcome::Connected { session_id } = outcome else {
            panic!("expected connected, got {outcome:?}");
        };
        match events.recv().await.expect("endpoint event") {
            StreamEvent::Endpoint(endpoint) => {
                assert_eq!(endpoint, format!("/sse?Mcp-Session-Id={session_id}"))
            }
            other => panic!("unexpected first event {other:?}"),
        }
        (session_id, events)
    }

    async fn next_message(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Value {
        match timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("stream open")
        {
            StreamEvent::Message(payload) => payload,
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn echo_tool(server: &ServerHandle, name: &str) -> ToolDefinition {
        let handler = owned_tool(server.engine_context(), |arguments: Value| -> Result<Value, ToolError> {
            let mut structured = serde_json::Map::new();
            structured.insert("echo".to_string(), arguments);
            Ok(text_result("echoed", structured))
        });
        ToolDefinition::new(name, handler)
    }

    #[tokio::test]
    async fn initialize_echoes_version_and_moves_to_initializing() {
        let server = start();
        let (session_id, _, response) = into_reply(
            server
                .dispatch(streamable(
                    request(1, "initialize", json!({ "protocolVersion": "2024-11-05" })),
                    None,
                ))
                .await,
        );
        let response = response.expect("response");
        let session_id = session_id.expect("session id");
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(
            session_status(&server, &session_id).await,
            Some(SessionStatus::Initializing)
        );

        let (_, again) = call(
            &server,
            request(2, "initialize", json!({ "protocolVersion": "2024-11-05" })),
            &session_id,
        )
        .await;
        assert_eq!(again["error"]["code"], -32600);
        assert_eq!(again["error"]["message"], "Session already initialized");
    }

    #[tokio::test]
    async fn initialized_notification_completes_handshake_without_response() {
        let server = start();
        let session_id = initialized_session(&server).await;
        assert_eq!(
            session_status(&server, &session_id).await,
            Some(SessionStatus::Initialized)
        );
    }

    #[tokio::test]
    async fn second_unsubscribe_fails() {
        let server = start();
        let session_id = initialized_session(&server).await;
        let uri = json!({ "uri": "mem://a" });

        let (_, subscribed) = call(&server, request(3, "resources/subscribe", uri.clone()), &session_id).await;
        assert_eq!(subscribed["result"], json!({}));

        let (_, first) = call(&server, request(4, "resources/unsubscribe", uri.clone()), &session_id).await;
        assert_eq!(first["result"], json!({}));

        let (_, second) = call(&server, request(5, "resources/unsubscribe", uri), &session_id).await;
        assert_eq!(second["error"]["message"], "Not subscribed to URI");
        assert_eq!(second["error"]["data"]["uri"], "mem://a");
    }

    #[tokio::test]
    async fn queued_change_is_flushed_exactly_once() {
        let server = start();
        server
            .add_resource(ResourceDefinition::text("file:///a.txt", "v1"))
            .await
            .expect("resource");
        let subscriber = initialized_session(&server).await;
        let bystander = initialized_session(&server).await;
        call(
            &server,
            request(2, "resources/subscribe", json!({ "uri": "file:///a.txt" })),
            &subscriber,
        )
        .await;

        server
            .add_resource(ResourceDefinition::text("file:///a.txt", "v2"))
            .await
            .expect("update");

        let (notifications, response) = call(&server, request(3, "ping", json!({})), &subscriber).await;
        assert_eq!(response["result"], json!({}));
        let updates: Vec<&Value> = notifications
            .iter()
            .filter(|notification| notification["method"] == RESOURCE_UPDATED)
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["params"]["uri"], "file:///a.txt");
        assert_eq!(
            updates[0]["params"]["data"]["resource"]["contents"][0]["text"],
            "v2"
        );

        let (notifications, _) = call(&server, request(4, "ping", json!({})), &subscriber).await;
        assert!(notifications.is_empty());

        let (notifications, _) = call(&server, request(5, "ping", json!({})), &bystander).await;
        assert!(notifications
            .iter()
            .all(|notification| notification["method"] != RESOURCE_UPDATED));
    }

    #[tokio::test]
    async fn json_only_clients_keep_their_queue() {
        let server = start();
        let session_id = initialized_session(&server).await;
        server.add_tool(echo_tool(&server, "echo")).await.expect("tool");

        let transport = TransportInfo::streamable(Some(session_id.clone()));
        let frame = InboundFrame {
            connection_id: 1,
            message: Message::parse(request(7, "ping", json!({})).to_string().as_bytes(), transport)
                .expect("message"),
            stream: None,
        };
        let (_, notifications, _) = into_reply(server.dispatch(frame).await);
        assert!(notifications.is_empty());

        let (notifications, _) = call(&server, request(8, "ping", json!({})), &session_id).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["method"], TOOLS_LIST_CHANGED);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_initialized_sse_session() {
        let server = start();
        let mut streams = Vec::new();
        for connection_id in [10, 11] {
            let (session_id, mut events) = open_sse(&server, connection_id).await;
            let outcome = server
                .dispatch(sse_post(
                    request(1, "initialize", json!({ "protocolVersion": "2025-03-26" })),
                    &session_id,
                ))
                .await;
            assert!(matches!(outcome, DispatchOutcome::Streamed { .. }));
            let response = next_message(&mut events).await;
            assert_eq!(response["result"]["protocolVersion"], "2025-03-26");
            server
                .dispatch(sse_post(initialized_notification(), &session_id))
                .await;
            streams.push(events);
        }
        let (_, mut pending) = open_sse(&server, 12).await;

        server.add_tool(echo_tool(&server, "echo")).await.expect("tool");

        for events in &mut streams {
            let pushed = next_message(events).await;
            assert_eq!(pushed["method"], TOOLS_LIST_CHANGED);
            assert_eq!(pushed["params"]["tools"][0]["name"], "echo");
        }
        assert!(pending.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_tools_disappear_and_calls_fail() {
        let server = start();
        let session_id = initialized_session(&server).await;
        server.add_tool(echo_tool(&server, "echo")).await.expect("tool");

        let (_, listed) = call(&server, request(2, "tools/list", json!({})), &session_id).await;
        assert_eq!(listed["result"]["tools"][0]["name"], "echo");

        let (_, called) = call(
            &server,
            request(3, "tools/call", json!({ "name": "echo", "arguments": { "x": 1 } })),
            &session_id,
        )
        .await;
        assert_eq!(called["result"]["structuredContent"]["echo"]["x"], 1);

        assert!(server.remove_tool("echo").await);
        assert!(!server.has_tool("echo").await);

        let (_, listed) = call(&server, request(4, "tools/list", json!({})), &session_id).await;
        assert_eq!(listed["result"]["tools"], json!([]));

        let (_, missing) = call(
            &server,
            request(5, "tools/call", json!({ "name": "echo", "arguments": {} })),
            &session_id,
        )
        .await;
        assert_eq!(missing["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn tool_calls_run_on_the_owning_context() {
        let server = start();
        let owner = ExecutionContext::spawn("tool-owner").expect("owner");
        let handler = owned_tool(owner.handle(), |_arguments: Value| -> Result<Value, ToolError> {
            let thread = std::thread::current().name().unwrap_or_default().to_string();
            let mut structured = serde_json::Map::new();
            structured.insert("thread".to_string(), Value::String(thread));
            Ok(text_result("ran", structured))
        });
        server
            .add_tool(ToolDefinition::new("where", handler))
            .await
            .expect("tool");
        let failing = owned_tool(owner.handle(), |_arguments: Value| -> Result<Value, ToolError> {
            Err(ToolError::Failed("boom".to_string()))
        });
        server
            .add_tool(ToolDefinition::new("fail", failing))
            .await
            .expect("tool");
        let session_id = initialized_session(&server).await;

        let (_, response) = call(
            &server,
            request(2, "tools/call", json!({ "name": "where" })),
            &session_id,
        )
        .await;
        assert_eq!(response["result"]["structuredContent"]["thread"], "tool-owner");

        let (_, response) = call(
            &server,
            request(3, "tools/call", json!({ "name": "fail", "arguments": {} })),
            &session_id,
        )
        .await;
        assert_eq!(response["error"]["code"], -32003);
        assert_eq!(response["error"]["data"]["tool"], "fail");
    }

    #[tokio::test]
    async fn schema_violations_do_not_block_tool_calls() {
        let server = start();
        let strict = owned_tool(server.engine_context(), |arguments: Value| -> Result<Value, ToolError> {
            let mut structured = serde_json::Map::new();
            structured.insert("seen".to_string(), arguments);
            structured.insert("total".to_string(), Value::String("many".to_string()));
            Ok(text_result("counted", structured))
        });
        server
            .add_tool(
                ToolDefinition::new("count", strict)
                    .with_input_schema(json!({
                        "type": "object",
                        "properties": { "count": { "type": "integer" } },
                        "required": ["count"],
                        "additionalProperties": false
                    }))
                    .with_output_schema(json!({
                        "type": "object",
                        "properties": { "total": { "type": "integer" } },
                        "required": ["total"]
                    })),
            )
            .await
            .expect("strict tool");
        let bare = owned_tool(server.engine_context(), |_arguments: Value| -> Result<Value, ToolError> {
            Ok(json!({ "content": [{ "type": "text", "text": "plain" }] }))
        });
        server
            .add_tool(ToolDefinition::new("bare", bare).with_output_schema(json!({
                "type": "object",
                "required": ["total"]
            })))
            .await
            .expect("bare tool");
        let session_id = initialized_session(&server).await;

        let (_, response) = call(
            &server,
            request(2, "tools/call", json!({ "name": "count", "arguments": { "count": "three", "extra": true } })),
            &session_id,
        )
        .await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["structuredContent"]["seen"]["count"], "three");
        assert_eq!(response["result"]["structuredContent"]["total"], "many");

        let (_, response) = call(
            &server,
            request(3, "tools/call", json!({ "name": "bare", "arguments": {} })),
            &session_id,
        )
        .await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["content"][0]["text"], "plain");
        assert!(response["result"].get("structuredContent").is_none());
    }

    #[tokio::test]
    async fn session_less_requests_do_not_accumulate_sessions() {
        let server = start();
        for id in 0..50 {
            let (session_id, _, response) = into_reply(
                server
                    .dispatch(streamable(request(id, "ping", json!({})), None))
                    .await,
            );
            assert_eq!(response.expect("pong")["result"], json!({}));
            assert!(session_id.is_none());
        }
        let (session_id, _, _) = into_reply(
            server
                .dispatch(streamable(initialized_notification(), None))
                .await,
        );
        assert!(session_id.is_none());
        assert_eq!(server.session_count().await, 0);

        initialized_session(&server).await;
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn idle_streamable_sessions_expire_with_their_subscriptions() {
        let server = ServerHandle::start_with(
            ServerInfo::default(),
            EngineOptions {
                session_idle_timeout: Duration::from_millis(50),
                sweep_interval: Duration::from_millis(10),
            },
        )
        .expect("engine");
        let session_id = initialized_session(&server).await;
        call(
            &server,
            request(2, "resources/subscribe", json!({ "uri": "mem://watched" })),
            &session_id,
        )
        .await;

        let mut remaining = 1;
        for _ in 0..100 {
            remaining = server.session_count().await;
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 0);
        let clean = server
            .inspect(|state| state.subscriptions.is_empty())
            .await
            .expect("inspect");
        assert!(clean);

        let outcome = server
            .dispatch(streamable(request(3, "ping", json!({})), Some(&session_id)))
            .await;
        let DispatchOutcome::Rejected(error) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(error.code, ErrorCode::SessionExpired);
    }

    #[tokio::test]
    async fn content_change_reaches_only_subscribers() {
        let server = start();
        server
            .add_resource(ResourceDefinition::text("file:///a.txt", "hello"))
            .await
            .expect("resource");
        let (s1, mut s1_events) = open_sse(&server, 20).await;
        let (s2, mut s2_events) = open_sse(&server, 21).await;
        for (session_id, events) in [(&s1, &mut s1_events), (&s2, &mut s2_events)] {
            server
                .dispatch(sse_post(
                    request(1, "initialize", json!({ "protocolVersion": "2025-06-18" })),
                    session_id,
                ))
                .await;
            next_message(events).await;
        }
        server
            .dispatch(sse_post(
                request(2, "resources/subscribe", json!({ "uri": "file:///a.txt" })),
                &s1,
            ))
            .await;
        next_message(&mut s1_events).await;

        assert!(server.notifier().changed("file:///a.txt"));
        let pushed = next_message(&mut s1_events).await;
        assert_eq!(pushed["method"], RESOURCE_UPDATED);
        assert_eq!(pushed["params"]["uri"], "file:///a.txt");

        assert!(server.has_resource("file:///a.txt").await);
        assert!(s1_events.try_recv().is_err());
        assert!(s2_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn resource_handlers_report_changes_through_the_notifier() {
        use crate::capabilities::resources::{owned_resource, ResourceData, ResourceError};

        struct SelfReporting {
            notifier: ChangeNotifier,
            reads: usize,
        }

        impl ResourceHandler for SelfReporting {
            fn content(&mut self) -> Result<ResourceData, ResourceError> {
                self.reads += 1;
                if self.reads == 1 {
                    self.notifier.changed("app://live");
                }
                Ok(ResourceData::Text(format!("read {}", self.reads)))
            }
        }

        let server = start();
        let owner = ExecutionContext::spawn("resource-owner").expect("owner");
        let handler = owned_resource(
            owner.handle(),
            SelfReporting {
                notifier: server.notifier(),
                reads: 0,
            },
        );
        server
            .add_resource(ResourceDefinition::delegated("app://live", handler))
            .await
            .expect("resource");
        let session_id = initialized_session(&server).await;
        call(
            &server,
            request(2, "resources/subscribe", json!({ "uri": "app://live" })),
            &session_id,
        )
        .await;

        let (_, read) = timeout(
            Duration::from_secs(5),
            call(&server, request(3, "resources/read", json!({ "uri": "app://live" })), &session_id),
        )
        .await
        .expect("read completes");
        assert_eq!(read["result"]["contents"][0]["text"], "read 1");

        let (notifications, _) = call(&server, request(4, "ping", json!({})), &session_id).await;
        let update = notifications
            .iter()
            .find(|notification| notification["method"] == RESOURCE_UPDATED)
            .expect("change reported by the handler");
        assert_eq!(update["params"]["uri"], "app://live");
    }

    #[tokio::test]
    async fn invalidated_resource_reports_deletion_and_clears_subscriptions() {
        let server = start();
        server
            .add_resource(ResourceDefinition::text("mem://doc", "x"))
            .await
            .expect("resource");
        let session_id = initialized_session(&server).await;
        call(
            &server,
            request(2, "resources/subscribe", json!({ "uri": "mem://doc" })),
            &session_id,
        )
        .await;

        assert!(server.resource_invalidated("mem://doc").await);

        let (notifications, _) = call(&server, request(3, "ping", json!({})), &session_id).await;
        let deleted = notifications
            .iter()
            .find(|notification| notification["method"] == RESOURCE_UPDATED)
            .expect("deletion notice");
        assert_eq!(deleted["params"]["data"], json!({ "deleted": true }));

        let subscribed = server
            .inspect(|state| state.subscriptions.is_empty())
            .await
            .expect("inspect");
        assert!(subscribed);
    }

    #[tokio::test]
    async fn disconnect_destroys_session_and_subscriptions() {
        let server = start();
        let (session_id, _events) = open_sse(&server, 30).await;
        server
            .dispatch(sse_post(
                request(1, "resources/subscribe", json!({ "uri": "mem://a" })),
                &session_id,
            ))
            .await;
        assert_eq!(server.session_count().await, 1);

        server.disconnect(30);

        assert_eq!(server.session_count().await, 0);
        let clean = server
            .inspect(|state| state.subscriptions.is_empty())
            .await
            .expect("inspect");
        assert!(clean);

        let outcome = server
            .dispatch(sse_post(request(2, "ping", json!({})), &session_id))
            .await;
        let DispatchOutcome::Rejected(error) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(error.code, ErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn prompts_and_metadata_updates_flow_through_the_engine() {
        let server = start();
        server
            .add_prompt_from_config(&json!({
                "name": "greet",
                "description": "Greets",
                "arguments": [{ "name": "who", "required": true }],
                "template": "Hello {{who}}"
            }))
            .await
            .expect("prompt");
        server
            .add_resource(ResourceDefinition::text("mem://m", "x"))
            .await
            .expect("resource");
        let session_id = initialized_session(&server).await;

        let (_, prompt) = call(
            &server,
            request(2, "prompts/get", json!({ "name": "greet", "arguments": { "who": "Ada" } })),
            &session_id,
        )
        .await;
        assert_eq!(prompt["result"]["messages"][0]["content"]["text"], "Hello Ada");

        let changed = server
            .update_resource_metadata(
                "mem://m",
                MetadataUpdate {
                    name: Some("Renamed".to_string()),
                    ..MetadataUpdate::default()
                },
            )
            .await;
        assert!(changed);
        let (_, listed) = call(&server, request(3, "resources/list", json!({})), &session_id).await;
        assert_eq!(listed["result"]["resources"][0]["name"], "Renamed");
    }

    #[test]
    fn blocking_registration_from_another_context() {
        let server = start();
        let owner = ExecutionContext::spawn("capability-owner").expect("owner");
        let tool = echo_tool(&server, "echo");
        let registering = server.clone();
        let (done, finished) = std::sync::mpsc::channel();
        owner
            .handle()
            .post(move || {
                let _ = done.send(registering.blocking_add_tool(tool));
            })
            .expect("post");

        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("registration job finished")
            .expect("registered");
        assert!(server.blocking_remove_tool("echo").expect("blocking remove"));
    }

    #[test]
    fn blocking_registration_on_the_engine_context_is_refused() {
        let server = start();
        let tool = echo_tool(&server, "echo");
        let registering = server.clone();
        let (done, finished) = std::sync::mpsc::channel();
        server
            .engine_context()
            .post(move || {
                let _ = done.send(registering.blocking_add_tool(tool));
            })
            .expect("post");

        let result = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("job finished");
        let error = result.expect_err("refused on the engine context");
        assert_eq!(error.code, ErrorCode::InternalError);
    }

    #[test]
    fn blocking_registration_from_a_plain_thread() {
        let server = start();
        let tool = echo_tool(&server, "echo");
        server.blocking_add_tool(tool).expect("blocking add");
        assert!(server.blocking_remove_tool("echo").expect("blocking remove"));
        assert!(!server.blocking_remove_tool("echo").expect("second remove"));
    }
}
