//! Tool registry and the tool handler contract
//!
//! A tool's handler lives on the execution context that owns it; the engine only holds an
//! [`Owned`] reference and calls it through the bridge. Schemas are compiled into validators
//! once, when the tool is registered.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::bridge::{ContextHandle, Owned};
use crate::capabilities::annotations::{Annotations, DEFAULT_PRIORITY};
use crate::capabilities::config::ToolConfig;
use crate::errors::{ErrorCode, McpError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

pub trait ToolHandler: Send {
    fn execute(&mut self, arguments: Value) -> Result<Value, ToolError>;
}

impl<F> ToolHandler for F
where
    F: FnMut(Value) -> Result<Value, ToolError> + Send,
{
    fn execute(&mut self, arguments: Value) -> Result<Value, ToolError> {
        self(arguments)
    }
}

/// Places `handler` on `owner` so the engine can call it through the bridge.
pub fn owned_tool<H>(owner: ContextHandle, handler: H) -> Owned<dyn ToolHandler>
where
    H: ToolHandler + 'static,
{
    let cell: Arc<Mutex<dyn ToolHandler>> = Arc::new(Mutex::new(handler));
    Owned::from_shared(owner, cell)
}

pub fn default_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// Builds a conforming tool result: a text summary plus the structured payload.
pub fn text_result(summary: impl Into<String>, structured: Map<String, Value>) -> Value {
    serde_json::to_value(CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(summary.into(), None, None))],
        is_error: None,
        meta: None,
        structured_content: Some(structured),
    })
    .unwrap_or(Value::Null)
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub annotations: Option<Annotations>,
    pub handler: Owned<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, handler: Owned<dyn ToolHandler>) -> Self {
        let name = name.into();
        Self {
            title: format!("Tool: {name}"),
            description: format!("Tool: {name}"),
            name,
            input_schema: default_schema(),
            output_schema: default_schema(),
            annotations: None,
            handler,
        }
    }

    pub fn from_config(config: ToolConfig, handler: Owned<dyn ToolHandler>) -> Self {
        let mut tool = Self::new(config.name, handler);
        if let Some(title) = config.title.filter(|title| !title.is_empty()) {
            tool.title = title;
        }
        if let Some(description) = config.description.filter(|text| !text.is_empty()) {
            tool.description = description;
        }
        if let Some(schema) = config.input_schema {
            tool.input_schema = schema;
        }
        if let Some(schema) = config.output_schema {
            tool.output_schema = schema;
        }
        if let Some(annotations) = config.annotations {
            tool = tool.with_annotations(annotations);
        }
        tool
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    /// Tool annotations always carry a priority; it defaults to 0.5.
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        let mut annotations = annotations.normalized();
        annotations.priority.get_or_insert(DEFAULT_PRIORITY);
        self.annotations = Some(annotations);
        self
    }

    /// The `tools/list` entry for this tool.
    pub fn schema(&self) -> Value {
        let mut entry = json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "inputSchema": self.input_schema,
            "outputSchema": self.output_schema,
        });
        if let (Some(annotations), Some(object)) = (&self.annotations, entry.as_object_mut()) {
            object.insert("annotations".to_string(), annotations.to_value());
        }
        entry
    }
}

pub struct RegisteredTool {
    definition: ToolDefinition,
    input_validator: jsonschema::Validator,
    output_validator: jsonschema::Validator,
}

impl RegisteredTool {
    fn compile(definition: ToolDefinition) -> Result<Self, McpError> {
        let input_validator = compile_schema(&definition.name, "inputSchema", &definition.input_schema)?;
        let output_validator =
            compile_schema(&definition.name, "outputSchema", &definition.output_schema)?;
        Ok(Self {
            definition,
            input_validator,
            output_validator,
        })
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn handler(&self) -> Owned<dyn ToolHandler> {
        self.definition.handler.clone()
    }

    /// Returns every schema violation in `arguments`.
    pub fn validate_input(&self, arguments: &Value) -> Vec<String> {
        self.input_validator
            .iter_errors(arguments)
            .map(|error| error.to_string())
            .collect()
    }

    /// Checks that a result has a `content` array and a `structuredContent` object matching
    /// the output schema.
    pub fn validate_output(&self, result: &Value) -> Result<(), String> {
        if !result.get("content").is_some_and(Value::is_array) {
            return Err("result is missing a `content` array".to_string());
        }
        let Some(structured) = result.get("structuredContent").filter(|value| value.is_object())
        else {
            return Err("result is missing a `structuredContent` object".to_string());
        };

        let violations: Vec<String> = self
            .output_validator
            .iter_errors(structured)
            .map(|error| error.to_string())
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }
}

fn compile_schema(
    tool: &str,
    field: &str,
    schema: &Value,
) -> Result<jsonschema::Validator, McpError> {
    jsonschema::validator_for(schema).map_err(|error| {
        warn!(target: "mcp::tools", tool = %tool, field = %field, error = %error, "tool schema rejected");
        McpError::new(
            ErrorCode::InvalidToolSchema,
            format!("Invalid {field} for tool {tool}: {error}"),
        )
    })
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any tool of the same name. Returns true when it replaced one.
    pub fn insert(&mut self, definition: ToolDefinition) -> Result<bool, McpError> {
        if definition.name.trim().is_empty() {
            return Err(McpError::invalid_params("Tool name must not be empty"));
        }
        let tool = RegisteredTool::compile(definition)?;
        Ok(self
            .tools
            .insert(tool.definition.name.clone(), tool)
            .is_some())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| tool.definition.schema())
            .collect()
    }
}
