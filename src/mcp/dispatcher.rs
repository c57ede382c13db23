//! Method routing
//!
//! Maps JSON-RPC method names onto their handlers and audits every handled call. Tool calls
//! are not executed here: the dispatcher resolves and checks them and hands a [`ToolCall`]
//! back to the engine, which runs it on the tool's owning context.

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use rust_mcp_sdk::schema::{CallToolRequestParams, ReadResourceRequestParams};

use crate::bridge::Owned;
use crate::capabilities::prompts::PromptArguments;
use crate::capabilities::ToolHandler;
use crate::errors::McpError;
use crate::mcp::engine::EngineState;
use crate::mcp::initialize::{initialize_result, negotiate_protocol_version, ServerInfo};
use crate::mcp::message::{Message, MessageKind};
use crate::mcp::rpc::{is_json_rpc_error, json_rpc_result};
use crate::mcp::session::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Connect,
    Ping,
    Initialize,
    Initialized,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesTemplatesList,
    ResourcesRead,
    ResourcesSubscribe,
    ResourcesUnsubscribe,
    PromptsList,
    PromptsGet,
}

const ROUTES: &[(&str, Method)] = &[
    ("connect", Method::Connect),
    ("ping", Method::Ping),
    ("initialize", Method::Initialize),
    ("initialized", Method::Initialized),
    ("notifications/initialized", Method::Initialized),
    ("tools/list", Method::ToolsList),
    ("tools/call", Method::ToolsCall),
    ("resources/list", Method::ResourcesList),
    ("resources/templates/list", Method::ResourcesTemplatesList),
    ("resources/read", Method::ResourcesRead),
    ("resources/subscribe", Method::ResourcesSubscribe),
    ("resources/unsubscribe", Method::ResourcesUnsubscribe),
    ("prompts/list", Method::PromptsList),
    ("prompts/get", Method::PromptsGet),
];

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        ROUTES
            .iter()
            .find(|(route, _)| *route == name)
            .map(|(_, method)| *method)
    }
}

/// Per-dispatch view of the inbound message.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub connection_id: u64,
    pub session_id: &'a str,
    pub message: &'a Message,
}

/// A resolved `tools/call` waiting to run on its handler's context.
#[derive(Debug)]
pub struct ToolCall {
    pub id: Option<Value>,
    pub tool: String,
    pub arguments: Value,
    pub handler: Owned<dyn ToolHandler>,
}

#[derive(Debug)]
pub enum Reply {
    Response(Value),
    /// Nothing goes back to the client.
    Silent,
    Deferred(ToolCall),
}

enum Handled {
    Result(Value),
    Nothing,
    Deferred(ToolCall),
}

pub struct Dispatcher {
    server_info: ServerInfo,
}

impl Dispatcher {
    pub fn new(server_info: ServerInfo) -> Self {
        Self { server_info }
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub async fn dispatch(&self, state: &mut EngineState, context: Context<'_>) -> Reply {
        let message = context.message;
        let method = message.method();
        let id = message.id().cloned();
        let audit_params = redact_audit_params(message.params());

        let outcome = match Method::from_name(method) {
            Some(route) => self.route(route, state, &context).await,
            None => Err(McpError::method_not_found(method)),
        };

        let expects_response = message.kind() != MessageKind::Notification;
        let reply = match outcome {
            Ok(Handled::Result(result)) if expects_response => {
                Reply::Response(json_rpc_result(id, result))
            }
            Ok(Handled::Nothing) if expects_response => {
                Reply::Response(json_rpc_result(id, json!({})))
            }
            Ok(Handled::Deferred(call)) if expects_response => Reply::Deferred(call),
            Err(error) if expects_response => Reply::Response(error.to_response(id)),
            Err(error) => {
                warn!(
                    target: "mcp::core",
                    method = %method,
                    error = %error,
                    "notification could not be handled"
                );
                Reply::Silent
            }
            Ok(_) => Reply::Silent,
        };

        let outcome = match &reply {
            Reply::Response(response) if is_json_rpc_error(response) => "failure",
            Reply::Deferred(_) => "deferred",
            _ => "success",
        };
        info!(
            target: "mcp::core",
            method = %method,
            session_id = %context.session_id,
            connection_id = context.connection_id,
            params = %audit_params,
            outcome,
            "mcp action audited"
        );

        reply
    }

    async fn route(
        &self,
        method: Method,
        state: &mut EngineState,
        context: &Context<'_>,
    ) -> Result<Handled, McpError> {
        let params = context.message.params();
        match method {
            Method::Connect => Ok(Handled::Result(json!({ "sessionId": context.session_id }))),
            Method::Ping => Ok(Handled::Result(json!({}))),
            Method::Initialize => self.initialize(state, context).map(Handled::Result),
            Method::Initialized => {
                initialized(state, context);
                Ok(Handled::Nothing)
            }
            Method::ToolsList => Ok(Handled::Result(
                json!({ "tools": state.capabilities.tools.list() }),
            )),
            Method::ToolsCall => tools_call(state, context).map(Handled::Deferred),
            Method::ResourcesList => Ok(Handled::Result(
                json!({ "resources": state.capabilities.resources.list().await }),
            )),
            Method::ResourcesTemplatesList => {
                Ok(Handled::Result(json!({ "resourceTemplates": [] })))
            }
            Method::ResourcesRead => {
                let uri = resource_uri(params)?;
                state
                    .capabilities
                    .resources
                    .read(&uri)
                    .await
                    .map(Handled::Result)
            }
            Method::ResourcesSubscribe => {
                let uri = required_str(params, "uri")?;
                if !state.subscriptions.subscribe(uri, context.session_id) {
                    return Err(McpError::invalid_params("Subscription requires a uri and a session"));
                }
                Ok(Handled::Result(json!({})))
            }
            Method::ResourcesUnsubscribe => {
                let uri = required_str(params, "uri")?;
                if !state.subscriptions.unsubscribe(uri, context.session_id) {
                    return Err(McpError::invalid_request("Not subscribed to URI")
                        .with_data(json!({ "uri": uri })));
                }
                Ok(Handled::Result(json!({})))
            }
            Method::PromptsList => Ok(Handled::Result(
                json!({ "prompts": state.capabilities.prompts.list() }),
            )),
            Method::PromptsGet => {
                let name = required_str(params, "name")?;
                let prompt = state.capabilities.prompts.get(name).ok_or_else(|| {
                    McpError::invalid_params(format!("Prompt not found: {name}"))
                        .with_data(json!({ "name": name }))
                })?;
                let arguments = prompt_arguments(params)?;
                prompt.render(arguments).await.map(Handled::Result)
            }
        }
    }

    fn initialize(&self, state: &mut EngineState, context: &Context<'_>) -> Result<Value, McpError> {
        let version = negotiate_protocol_version(context.message.params())?;
        let result = initialize_result(&version, &self.server_info)?;

        let session = state
            .sessions
            .get_mut(context.session_id)
            .ok_or_else(|| McpError::internal("session vanished during initialize"))?;
        session.begin_initialize(&version).map_err(|error| match error {
            SessionError::InvalidState { .. } => {
                McpError::invalid_request("Session already initialized")
                    .with_data(json!({ "status": session_status_name(&error) }))
            }
            SessionError::NotFound(_) | SessionError::Expired(_) => {
                McpError::internal(error.to_string())
            }
        })?;
        Ok(result)
    }
}

fn session_status_name(error: &SessionError) -> &'static str {
    match error {
        SessionError::InvalidState { status, .. } => status.as_str(),
        SessionError::NotFound(_) | SessionError::Expired(_) => "missing",
    }
}

fn initialized(state: &mut EngineState, context: &Context<'_>) {
    let Some(session) = state.sessions.get_mut(context.session_id) else {
        warn!(target: "mcp::session", session_id = %context.session_id, "initialized for unknown session");
        return;
    };
    if let Err(error) = session.complete_initialize() {
        warn!(target: "mcp::session", error = %error, "initialized notification ignored");
    }
}

fn tools_call(state: &mut EngineState, context: &Context<'_>) -> Result<ToolCall, McpError> {
    let params = context.message.params();
    required_str(params, "name")?;
    let call: CallToolRequestParams = params
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|_| McpError::invalid_params("Invalid arguments parameter, must be an object"))?
        .ok_or_else(|| McpError::missing_param("name"))?;

    let tool = state
        .capabilities
        .tools
        .get(&call.name)
        .ok_or_else(|| McpError::tool_not_found(&call.name))?;

    let arguments = Value::Object(call.arguments.unwrap_or_default());
    let violations = tool.validate_input(&arguments);
    if !violations.is_empty() {
        warn!(
            target: "mcp::tools",
            tool = %call.name,
            violations = %violations.join("; "),
            "tool arguments do not match input schema"
        );
    }

    Ok(ToolCall {
        id: context.message.id().cloned(),
        tool: call.name,
        arguments,
        handler: tool.handler(),
    })
}

fn resource_uri(params: Option<&Value>) -> Result<String, McpError> {
    required_str(params, "uri")?;
    let request: ReadResourceRequestParams = params
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|_| McpError::invalid_params("Invalid uri parameter"))?
        .ok_or_else(|| McpError::missing_param("uri"))?;
    Ok(request.uri)
}

fn required_str<'a>(params: Option<&'a Value>, field: &str) -> Result<&'a str, McpError> {
    params
        .and_then(|params| params.get(field))
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| McpError::missing_param(field))
}

fn prompt_arguments(params: Option<&Value>) -> Result<PromptArguments, McpError> {
    let Some(arguments) = params.and_then(|params| params.get("arguments")) else {
        return Ok(PromptArguments::new());
    };
    let object = match arguments {
        Value::Null => return Ok(PromptArguments::new()),
        Value::Object(object) => object,
        _ => {
            return Err(McpError::invalid_params(
                "Invalid arguments parameter, must be an object",
            ))
        }
    };

    Ok(object
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect())
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::message::TransportInfo;

    #[test]
    fn every_built_in_method_has_a_route() {
        for name in [
            "connect",
            "ping",
            "initialize",
            "initialized",
            "tools/list",
            "tools/call",
            "resources/list",
            "resources/templates/list",
            "resources/read",
            "resources/subscribe",
            "resources/unsubscribe",
            "prompts/list",
            "prompts/get",
        ] {
            assert!(Method::from_name(name).is_some(), "{name} has no route");
        }
        assert_eq!(Method::from_name("tools/delete"), None);
    }

    #[test]
    fn redacts_sensitive_fields_in_audit_params() {
        let params = json!({
            "name": "fetch",
            "arguments": {
                "url": "https://example.com",
                "token": "should-not-appear",
                "api_key": "should-not-appear",
                "nested": { "client_secret": "should-not-appear" }
            }
        });

        let redacted = redact_audit_params(Some(&params));

        assert_eq!(redacted["name"], json!("fetch"));
        assert_eq!(redacted["arguments"]["url"], json!("https://example.com"));
        assert_eq!(redacted["arguments"]["token"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["api_key"], json!("[REDACTED]"));
        assert_eq!(
            redacted["arguments"]["nested"]["client_secret"],
            json!("[REDACTED]")
        );
    }

    #[test]
    fn prompt_arguments_stringify_non_string_values() {
        let params = json!({ "name": "p", "arguments": { "count": 3, "who": "Ada" } });
        let arguments = prompt_arguments(Some(&params)).expect("arguments");
        assert_eq!(arguments["count"], "3");
        assert_eq!(arguments["who"], "Ada");

        let bad = json!({ "name": "p", "arguments": [1] });
        assert!(prompt_arguments(Some(&bad)).is_err());
    }

    #[test]
    fn required_str_names_the_missing_field() {
        let error = required_str(Some(&json!({})), "uri").expect_err("missing uri");
        assert_eq!(error.message, "Missing required parameter: uri");

        let message = Message::parse(
            br#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"mem://a"}}"#,
            TransportInfo::streamable(None),
        )
        .expect("message");
        assert_eq!(resource_uri(message.params()).expect("uri"), "mem://a");
    }
}
