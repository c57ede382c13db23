//! Typed capability configuration
//!
//! Each capability kind has its own struct, parsed once from JSON when the capability is
//! registered.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::capabilities::annotations::Annotations;

#[derive(Debug, Error)]
pub enum CapabilityConfigError {
    #[error("invalid capability configuration: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("capability configuration is missing `{0}`")]
    MissingField(&'static str),
    #[error("resource of type `wrapper` needs a delegated handler")]
    MissingHandler,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub annotations: Option<Annotations>,
}

impl ToolConfig {
    pub fn from_json(value: &Value) -> Result<Self, CapabilityConfigError> {
        let config: Self = serde_json::from_value(value.clone())?;
        if config.name.trim().is_empty() {
            return Err(CapabilityConfigError::MissingField("name"));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Content,
    File,
    Wrapper,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub annotations: Option<Annotations>,
}

impl ResourceConfig {
    pub fn from_json(value: &Value) -> Result<Self, CapabilityConfigError> {
        let config: Self = serde_json::from_value(value.clone())?;
        let has_uri = config
            .uri
            .as_deref()
            .is_some_and(|uri| !uri.trim().is_empty());

        match config.kind {
            ResourceKind::File if config.file_path.is_none() => {
                Err(CapabilityConfigError::MissingField("filePath"))
            }
            ResourceKind::Content | ResourceKind::Wrapper if !has_uri => {
                Err(CapabilityConfigError::MissingField("uri"))
            }
            _ => Ok(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptArgumentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgumentConfig>,
    #[serde(default)]
    pub template: String,
}

impl PromptConfig {
    pub fn from_json(value: &Value) -> Result<Self, CapabilityConfigError> {
        let config: Self = serde_json::from_value(value.clone())?;
        if config.name.trim().is_empty() {
            return Err(CapabilityConfigError::MissingField("name"));
        }
        Ok(config)
    }
}
