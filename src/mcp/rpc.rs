//! JSON-RPC envelope construction
//!
//! Wraps the `rust-mcp-sdk` schema types so the rest of the engine can work with plain
//! `serde_json::Value` payloads.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i64,
    message: &str,
    data: Option<Value>,
) -> Value {
    let request_id = id.as_ref().and_then(value_to_request_id);
    let fallback = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message,
            "data": data,
        }
    });

    let response = JsonrpcErrorResponse::new(
        RpcError {
            code,
            data,
            message: message.to_string(),
        },
        request_id,
    );
    serde_json::to_value(response).unwrap_or(fallback)
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        if let Some(extra) = result.as_object().cloned() {
            let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra: Some(extra) });
            if let Ok(value) = serde_json::to_value(response) {
                return value;
            }
        }
    }

    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result
    })
}

/// Builds a server-initiated notification envelope.
pub fn json_rpc_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params
    })
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}
