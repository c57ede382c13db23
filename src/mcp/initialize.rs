//! The `initialize` handshake
//!
//! Versions are matched exactly; there is no downgrade negotiation. The version a client asks
//! for is echoed back verbatim.

use regex::Regex;
use serde_json::{json, Value};

use crate::errors::McpError;

pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

const VERSION_FORMAT: &str = r"^\d{4}-\d{2}-\d{2}$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub title: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "EoF MCP Server".to_string(),
            title: "EoF MCP Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
        }
    }
}

/// Checks `initialize` params and returns the requested protocol version.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<String, McpError> {
    let params = params.and_then(Value::as_object);

    let version = match params.and_then(|object| object.get("protocolVersion")) {
        None | Some(Value::Null) => return Err(McpError::missing_param("protocolVersion")),
        Some(Value::String(version)) => version.trim(),
        Some(_) => {
            return Err(McpError::invalid_params(
                "Invalid protocolVersion format, expected YYYY-MM-DD",
            ))
        }
    };

    let format = Regex::new(VERSION_FORMAT)
        .map_err(|error| McpError::internal(format!("invalid version pattern: {error}")))?;
    if !format.is_match(version) {
        return Err(McpError::invalid_params(
            "Invalid protocolVersion format, expected YYYY-MM-DD",
        ));
    }

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
        return Err(McpError::invalid_params(format!(
            "Unsupported protocol version: {version}. Supported versions: {}",
            SUPPORTED_PROTOCOL_VERSIONS.join(", ")
        ))
        .with_data(json!({ "supported": SUPPORTED_PROTOCOL_VERSIONS })));
    }

    for field in ["capabilities", "clientInfo"] {
        match params.and_then(|object| object.get(field)) {
            None | Some(Value::Object(_)) => {}
            Some(_) => {
                return Err(McpError::invalid_params(format!(
                    "Invalid {field} parameter, must be an object"
                )))
            }
        }
    }

    Ok(version.to_string())
}

/// The `initialize` result advertised to every client.
pub fn initialize_result(protocol_version: &str, server: &ServerInfo) -> Result<Value, McpError> {
    for (field, value) in [
        ("name", &server.name),
        ("title", &server.title),
        ("version", &server.version),
    ] {
        if value.trim().is_empty() {
            return Err(McpError::internal(format!("server {field} is not configured")));
        }
    }

    let mut result = json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "prompts": { "listChanged": true },
            "resources": { "listChanged": true, "subscribe": true },
            "tools": { "listChanged": true }
        },
        "serverInfo": {
            "name": server.name,
            "title": server.title,
            "version": server.version
        }
    });

    if let (Some(instructions), Some(object)) = (
        server.instructions.as_ref().filter(|text| !text.is_empty()),
        result.as_object_mut(),
    ) {
        object.insert(
            "instructions".to_string(),
            Value::String(instructions.clone()),
        );
    }
    Ok(result)
}
