//! Tool, resource and prompt registries
//!
//! Handlers are reached through the uniform contracts defined here and always run on the
//! execution context that owns them.

pub mod annotations;
pub mod config;
pub mod mime;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use annotations::Annotations;
pub use prompts::{PromptDefinition, PromptHandler, PromptRegistry};
pub use resources::{ResourceDefinition, ResourceHandler, ResourceRegistry};
pub use tools::{ToolDefinition, ToolHandler, ToolRegistry};

/// Every registry the engine serves from.
#[derive(Default)]
pub struct Capabilities {
    pub tools: ToolRegistry,
    pub resources: ResourceRegistry,
    pub prompts: PromptRegistry,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }
}
