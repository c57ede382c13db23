use serde_json::Value;
use thiserror::Error;

use crate::mcp::rpc::json_rpc_error_with_data;

/// Numeric error codes carried in JSON-RPC error envelopes.
///
/// The reserved JSON-RPC range is followed by three application bands:
/// `-32001..=-32009` for MCP-level failures, `-32101..` for network failures
/// and `-32201..` for business-rule failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ToolNotFound,
    ResourceNotFound,
    ToolExecutionFailed,
    SessionNotFound,
    SessionExpired,
    AuthenticationFailed,
    AuthorizationFailed,
    RateLimitExceeded,
    ConfigurationError,
    ConnectionClosed,
    ConnectionTimeout,
    ProtocolError,
    MessageTooLarge,
    InvalidToolSchema,
    ToolValidationFailed,
    ResourceAccessDenied,
    SubscriptionNotSupported,
}

const ALL_CODES: [ErrorCode; 22] = [
    ErrorCode::ParseError,
    ErrorCode::InvalidRequest,
    ErrorCode::MethodNotFound,
    ErrorCode::InvalidParams,
    ErrorCode::InternalError,
    ErrorCode::ToolNotFound,
    ErrorCode::ResourceNotFound,
    ErrorCode::ToolExecutionFailed,
    ErrorCode::SessionNotFound,
    ErrorCode::SessionExpired,
    ErrorCode::AuthenticationFailed,
    ErrorCode::AuthorizationFailed,
    ErrorCode::RateLimitExceeded,
    ErrorCode::ConfigurationError,
    ErrorCode::ConnectionClosed,
    ErrorCode::ConnectionTimeout,
    ErrorCode::ProtocolError,
    ErrorCode::MessageTooLarge,
    ErrorCode::InvalidToolSchema,
    ErrorCode::ToolValidationFailed,
    ErrorCode::ResourceAccessDenied,
    ErrorCode::SubscriptionNotSupported,
];

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ToolNotFound => -32001,
            Self::ResourceNotFound => -32002,
            Self::ToolExecutionFailed => -32003,
            Self::SessionNotFound => -32004,
            Self::SessionExpired => -32005,
            Self::AuthenticationFailed => -32006,
            Self::AuthorizationFailed => -32007,
            Self::RateLimitExceeded => -32008,
            Self::ConfigurationError => -32009,
            Self::ConnectionClosed => -32101,
            Self::ConnectionTimeout => -32102,
            Self::ProtocolError => -32103,
            Self::MessageTooLarge => -32104,
            Self::InvalidToolSchema => -32201,
            Self::ToolValidationFailed => -32202,
            Self::ResourceAccessDenied => -32203,
            Self::SubscriptionNotSupported => -32204,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        ALL_CODES.into_iter().find(|candidate| candidate.code() == code)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ToolNotFound => "Tool not found",
            Self::ResourceNotFound => "Resource not found",
            Self::ToolExecutionFailed => "Tool execution failed",
            Self::SessionNotFound => "Session not found: The specified session does not exist",
            Self::SessionExpired => "Session expired: Session has expired, please reconnect",
            Self::AuthenticationFailed => "Authentication failed: Identity verification failed",
            Self::AuthorizationFailed => "Authorization failed: Permission verification failed",
            Self::RateLimitExceeded => {
                "Rate limit: Requests are too frequent, please try again later"
            }
            Self::ConfigurationError => "Configuration error: Server configuration is abnormal",
            Self::ConnectionClosed => {
                "Connection closed: Network connection was unexpectedly disconnected"
            }
            Self::ConnectionTimeout => "Connection timeout: Network request timed out",
            Self::ProtocolError => {
                "Protocol error: Protocol format does not conform to specification"
            }
            Self::MessageTooLarge => "Message too large: Message size exceeds limit",
            Self::InvalidToolSchema => {
                "Invalid tool schema: Tool definition does not conform to specification"
            }
            Self::ToolValidationFailed => {
                "Tool validation failed: Tool parameter validation failed"
            }
            Self::ResourceAccessDenied => {
                "Resource access denied: No permission to access this resource"
            }
            Self::SubscriptionNotSupported => {
                "Subscription not supported: This resource does not support subscription operations"
            }
        }
    }
}

/// An application-level failure that is reported to the client as a JSON-RPC error.
#[derive(Debug, Clone, Error)]
#[error("{message} ({})", .code.code())]
pub struct McpError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn missing_param(name: &str) -> Self {
        Self::invalid_params(format!("Missing required parameter: {name}"))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::from_code(ErrorCode::MethodNotFound)
            .with_data(serde_json::json!({ "method": method }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(ErrorCode::ToolNotFound, format!("Tool not found: {name}"))
            .with_data(serde_json::json!({ "name": name }))
    }

    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(ErrorCode::ResourceNotFound, format!("Resource not found: {uri}"))
            .with_data(serde_json::json!({ "uri": uri }))
    }

    pub fn tool_execution_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ToolExecutionFailed, message)
    }

    pub fn is_internal(&self) -> bool {
        self.code == ErrorCode::InternalError
    }

    /// Renders the error as a JSON-RPC error envelope for the given request id.
    pub fn to_response(&self, id: Option<Value>) -> Value {
        if self.is_internal() {
            tracing::error!(target: "mcp::core", error = %self.message, "request failed with internal error");
        }
        json_rpc_error_with_data(id, self.code.code(), &self.message, self.data.clone())
    }
}
