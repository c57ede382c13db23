//! Prompt registry
//!
//! Prompts render either a `{{name}}` template or the output of a generator owned by another
//! execution context.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::bridge::{ContextHandle, Owned};
use crate::capabilities::config::PromptConfig;
use crate::errors::McpError;

pub type PromptArguments = BTreeMap<String, String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PromptError(pub String);

pub trait PromptHandler: Send {
    fn generate(&mut self, arguments: &PromptArguments) -> Result<String, PromptError>;
}

impl<F> PromptHandler for F
where
    F: FnMut(&PromptArguments) -> Result<String, PromptError> + Send,
{
    fn generate(&mut self, arguments: &PromptArguments) -> Result<String, PromptError> {
        self(arguments)
    }
}

pub fn owned_prompt<H>(owner: ContextHandle, handler: H) -> Owned<dyn PromptHandler>
where
    H: PromptHandler + 'static,
{
    let cell: Arc<Mutex<dyn PromptHandler>> = Arc::new(Mutex::new(handler));
    Owned::from_shared(owner, cell)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub enum PromptGenerator {
    Template(String),
    Custom(Owned<dyn PromptHandler>),
}

#[derive(Debug, Clone)]
pub struct PromptDefinition {
    pub name: String,
    pub description: String,
    pub arguments: Vec<PromptArgument>,
    pub generator: PromptGenerator,
}

impl PromptDefinition {
    pub fn template(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            arguments: Vec::new(),
            generator: PromptGenerator::Template(template.into()),
        }
    }

    pub fn custom(name: impl Into<String>, handler: Owned<dyn PromptHandler>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            arguments: Vec::new(),
            generator: PromptGenerator::Custom(handler),
        }
    }

    pub fn from_config(config: PromptConfig) -> Self {
        let mut prompt = Self::template(config.name, config.template).with_description(config.description);
        for argument in config.arguments {
            prompt = prompt.with_argument(argument.name, argument.description, argument.required);
        }
        prompt
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_argument(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: description.into(),
            required,
        });
        self
    }

    /// The `prompts/list` entry.
    pub fn metadata(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "arguments": self.arguments,
        })
    }

    /// Produces the `prompts/get` result for the given arguments.
    pub async fn render(&self, arguments: PromptArguments) -> Result<Value, McpError> {
        if let Some(missing) = self
            .arguments
            .iter()
            .find(|argument| argument.required && !arguments.contains_key(&argument.name))
        {
            return Err(McpError::invalid_params(format!(
                "Missing required argument: {}",
                missing.name
            ))
            .with_data(json!({ "prompt": self.name, "argument": missing.name })));
        }

        let text = match &self.generator {
            PromptGenerator::Template(template) => render_template(template, &arguments),
            PromptGenerator::Custom(handler) => handler
                .call(move |handler| handler.generate(&arguments))
                .await
                .map_err(|error| McpError::internal(error.to_string()))?
                .map_err(|error| McpError::internal(format!("Prompt generation failed: {error}")))?,
        };

        Ok(json!({
            "description": self.description,
            "messages": [{
                "role": "user",
                "content": {
                    "type": "text",
                    "text": text,
                }
            }]
        }))
    }
}

/// Replaces every `{{name}}` placeholder with its argument. Unknown placeholders are kept.
pub fn render_template(template: &str, arguments: &PromptArguments) -> String {
    arguments
        .iter()
        .fold(template.to_string(), |rendered, (name, value)| {
            rendered.replace(&format!("{{{{{name}}}}}"), value)
        })
}

#[derive(Debug, Default)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptDefinition>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a prompt, replacing one with the same name. Returns true when it replaced one.
    pub fn insert(&mut self, prompt: PromptDefinition) -> Result<bool, McpError> {
        if prompt.name.trim().is_empty() {
            return Err(McpError::invalid_params("Prompt name must not be empty"));
        }
        Ok(self.prompts.insert(prompt.name.clone(), prompt).is_some())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.prompts.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&PromptDefinition> {
        self.prompts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prompts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn list(&self) -> Vec<Value> {
        self.prompts.values().map(PromptDefinition::metadata).collect()
    }
}
