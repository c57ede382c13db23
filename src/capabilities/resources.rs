//! Resource registry, content providers and the delegated resource contract
//!
//! A resource's uri is its identity. Its name, description and MIME type may change, and
//! its body comes from a [`ContentProvider`]: static text, a file on disk, or a handler object
//! owned by another execution context.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bridge::{ContextHandle, Owned};
use crate::capabilities::annotations::Annotations;
use crate::capabilities::config::{CapabilityConfigError, ResourceConfig, ResourceKind};
use crate::capabilities::mime::{is_text_mime_type, mime_type_for_path, DEFAULT_MIME_TYPE};
use crate::errors::{ErrorCode, McpError};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("resource handler failed: {0}")]
    Handler(String),
    #[error("resource handler is unavailable: {0}")]
    Unavailable(String),
}

impl ResourceError {
    pub fn into_mcp_error(self, uri: &str) -> McpError {
        match &self {
            Self::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
                McpError::from_code(ErrorCode::ResourceAccessDenied)
                    .with_data(json!({ "uri": uri }))
            }
            Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                McpError::resource_not_found(uri)
            }
            _ => McpError::internal(self.to_string()),
        }
    }
}

/// Raw resource bytes as produced by a provider. Encoding for the wire is decided by MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceData {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<String> for ResourceData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ResourceData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for ResourceData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Mutable, change-triggering resource metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

/// Metadata updates; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

/// Contract for resources backed by an external object.
///
/// The engine waits on these methods while it serves a read, so they must not call back into
/// the engine through a `ServerHandle`. Report changes with a `ChangeNotifier`, which only
/// queues a command and returns.
pub trait ResourceHandler: Send {
    fn content(&mut self) -> Result<ResourceData, ResourceError>;

    /// Overrides the registered metadata when it returns `Some`.
    fn metadata(&mut self) -> Option<ResourceMetadata> {
        None
    }

    fn annotations(&mut self) -> Option<Annotations> {
        None
    }
}

pub fn owned_resource<H>(owner: ContextHandle, handler: H) -> Owned<dyn ResourceHandler>
where
    H: ResourceHandler + 'static,
{
    let cell: Arc<Mutex<dyn ResourceHandler>> = Arc::new(Mutex::new(handler));
    Owned::from_shared(owner, cell)
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn read(&self) -> Result<ResourceData, ResourceError>;

    async fn metadata(&self) -> Option<ResourceMetadata> {
        None
    }

    async fn annotations(&self) -> Option<Annotations> {
        None
    }

    fn kind(&self) -> &'static str;
}

pub struct StaticContent {
    data: ResourceData,
}

impl StaticContent {
    pub fn new(data: impl Into<ResourceData>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ContentProvider for StaticContent {
    async fn read(&self) -> Result<ResourceData, ResourceError> {
        Ok(self.data.clone())
    }

    fn kind(&self) -> &'static str {
        "content"
    }
}

/// Reads through tokio's blocking pool so the caller's thread never waits on disk.
pub struct FileContent {
    path: PathBuf,
    text: bool,
}

impl FileContent {
    pub fn new(path: impl AsRef<Path>, mime_type: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            text: is_text_mime_type(mime_type),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContentProvider for FileContent {
    async fn read(&self) -> Result<ResourceData, ResourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| ResourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        if self.text {
            Ok(ResourceData::Text(String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            Ok(ResourceData::Bytes(bytes))
        }
    }

    async fn annotations(&self) -> Option<Annotations> {
        let modified = tokio::fs::metadata(&self.path).await.ok()?.modified().ok()?;
        Some(Annotations::default().with_last_modified(DateTime::<Utc>::from(modified)))
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

pub struct DelegatedContent {
    handler: Owned<dyn ResourceHandler>,
}

impl DelegatedContent {
    pub fn new(handler: Owned<dyn ResourceHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ContentProvider for DelegatedContent {
    async fn read(&self) -> Result<ResourceData, ResourceError> {
        self.handler
            .call(|handler| handler.content())
            .await
            .map_err(|error| ResourceError::Unavailable(error.to_string()))?
    }

    async fn metadata(&self) -> Option<ResourceMetadata> {
        self.handler
            .call(|handler| handler.metadata())
            .await
            .ok()
            .flatten()
    }

    async fn annotations(&self) -> Option<Annotations> {
        self.handler
            .call(|handler| handler.annotations())
            .await
            .ok()
            .flatten()
    }

    fn kind(&self) -> &'static str {
        "wrapper"
    }
}

#[derive(Clone)]
pub struct ResourceDefinition {
    uri: String,
    metadata: ResourceMetadata,
    annotations: Option<Annotations>,
    provider: Arc<dyn ContentProvider>,
    file_path: Option<PathBuf>,
}

impl ResourceDefinition {
    pub fn new(uri: impl Into<String>, provider: Arc<dyn ContentProvider>) -> Self {
        let uri = uri.into();
        Self {
            metadata: ResourceMetadata {
                name: uri.clone(),
                description: String::new(),
                mime_type: DEFAULT_MIME_TYPE.to_string(),
            },
            uri,
            annotations: None,
            provider,
            file_path: None,
        }
    }

    pub fn text(uri: impl Into<String>, content: impl Into<ResourceData>) -> Self {
        Self::new(uri, Arc::new(StaticContent::new(content)))
    }

    /// A file-backed resource. The uri defaults to a `file://` uri for the path, the name to
    /// the file name and the MIME type to one inferred from the extension.
    pub fn file(path: impl Into<PathBuf>, uri: Option<String>) -> Self {
        let path = path.into();
        let mime_type = mime_type_for_path(&path);
        let uri = uri
            .filter(|uri| !uri.is_empty())
            .unwrap_or_else(|| file_uri(&path));
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| uri.clone());

        let mut resource = Self::new(uri, Arc::new(FileContent::new(&path, mime_type)));
        resource.file_path = Some(path);
        resource.with_name(name).with_mime_type(mime_type)
    }

    pub fn delegated(uri: impl Into<String>, handler: Owned<dyn ResourceHandler>) -> Self {
        Self::new(uri, Arc::new(DelegatedContent::new(handler)))
    }

    pub fn from_config(
        config: ResourceConfig,
        handler: Option<Owned<dyn ResourceHandler>>,
    ) -> Result<Self, CapabilityConfigError> {
        let mut resource = match config.kind {
            ResourceKind::Content => Self::text(
                config.uri.clone().unwrap_or_default(),
                config.content.clone().unwrap_or_default(),
            ),
            ResourceKind::File => {
                let path = config
                    .file_path
                    .clone()
                    .ok_or(CapabilityConfigError::MissingField("filePath"))?;
                Self::file(path, config.uri.clone())
            }
            ResourceKind::Wrapper => {
                let handler = handler.ok_or(CapabilityConfigError::MissingHandler)?;
                Self::delegated(config.uri.clone().unwrap_or_default(), handler)
            }
        };

        if let Some(name) = config.name.filter(|name| !name.is_empty()) {
            resource = resource.with_name(name);
        }
        if let Some(description) = config.description {
            resource = resource.with_description(description);
        }
        if let Some(mime_type) = config.mime_type.filter(|mime| !mime.is_empty()) {
            resource = resource.with_mime_type(mime_type);
        }
        if let Some(annotations) = config.annotations {
            resource = resource.with_annotations(annotations);
        }
        Ok(resource)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Also switches a file provider between text and base64 reads.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.set_mime_type(mime_type.into());
        self
    }

    fn set_mime_type(&mut self, mime_type: String) {
        if let Some(path) = &self.file_path {
            self.provider = Arc::new(FileContent::new(path, &mime_type));
        }
        self.metadata.mime_type = mime_type;
    }

    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = Some(annotations.normalized());
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn provider_kind(&self) -> &'static str {
        self.provider.kind()
    }

    /// Current metadata, preferring what a delegated handler reports.
    pub async fn metadata(&self) -> ResourceMetadata {
        self.provider
            .metadata()
            .await
            .unwrap_or_else(|| self.metadata.clone())
    }

    pub async fn annotations(&self) -> Option<Annotations> {
        let provided = self.provider.annotations().await;
        match (&self.annotations, provided) {
            (Some(configured), Some(provided)) => Some(Annotations {
                audience: if configured.audience.is_empty() {
                    provided.audience
                } else {
                    configured.audience.clone()
                },
                priority: configured.priority.or(provided.priority),
                last_modified: configured.last_modified.clone().or(provided.last_modified),
            }),
            (Some(configured), None) => Some(configured.clone()),
            (None, provided) => provided.map(Annotations::normalized),
        }
    }

    /// The `resources/list` entry.
    pub async fn describe(&self) -> Value {
        let metadata = self.metadata().await;
        let mut entry = json!({
            "uri": self.uri,
            "name": metadata.name,
            "description": metadata.description,
            "mimeType": metadata.mime_type,
        });
        if let Some(annotations) = self.annotations().await.filter(|a| !a.is_empty()) {
            if let Some(object) = entry.as_object_mut() {
                object.insert("annotations".to_string(), annotations.to_value());
            }
        }
        entry
    }

    /// The `contents` array of a `resources/read` result.
    pub async fn contents(&self) -> Result<Vec<Value>, ResourceError> {
        let metadata = self.metadata().await;
        let data = self.provider.read().await?;
        Ok(vec![encode_content(&self.uri, &metadata.mime_type, data)])
    }

    fn apply(&mut self, update: MetadataUpdate) -> bool {
        let before = self.metadata.clone();
        if let Some(name) = update.name {
            self.metadata.name = name;
        }
        if let Some(description) = update.description {
            self.metadata.description = description;
        }
        if let Some(mime_type) = update.mime_type {
            self.set_mime_type(mime_type);
        }
        before != self.metadata
    }
}

/// Renders one content entry: `text` for textual MIME types, base64 `blob` otherwise.
pub fn encode_content(uri: &str, mime_type: &str, data: ResourceData) -> Value {
    let mut entry = json!({ "uri": uri });
    let Some(object) = entry.as_object_mut() else {
        return entry;
    };
    if !mime_type.is_empty() {
        object.insert("mimeType".to_string(), Value::String(mime_type.to_string()));
    }

    let text = is_text_mime_type(mime_type);
    match (data, text) {
        (ResourceData::Text(text), true) => {
            object.insert("text".to_string(), Value::String(text));
        }
        (ResourceData::Bytes(bytes), true) => {
            object.insert(
                "text".to_string(),
                Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            );
        }
        (ResourceData::Text(text), false) => {
            object.insert("blob".to_string(), Value::String(STANDARD.encode(text)));
        }
        (ResourceData::Bytes(bytes), false) => {
            object.insert("blob".to_string(), Value::String(STANDARD.encode(bytes)));
        }
    }
    entry
}

fn file_uri(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

#[derive(Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, ResourceDefinition>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource, replacing one with the same uri. Returns true when it replaced one.
    pub fn insert(&mut self, resource: ResourceDefinition) -> Result<bool, McpError> {
        if resource.uri.trim().is_empty() {
            return Err(McpError::invalid_params("Resource uri must not be empty"));
        }
        debug!(
            target: "mcp::resource",
            uri = %resource.uri,
            provider = resource.provider_kind(),
            "resource registered"
        );
        Ok(self
            .resources
            .insert(resource.uri.clone(), resource)
            .is_some())
    }

    pub fn remove(&mut self, uri: &str) -> bool {
        self.resources.remove(uri).is_some()
    }

    pub fn get(&self, uri: &str) -> Option<&ResourceDefinition> {
        self.resources.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.resources.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Applies a metadata update. Returns false for an unknown uri or a no-op update.
    pub fn update_metadata(&mut self, uri: &str, update: MetadataUpdate) -> bool {
        match self.resources.get_mut(uri) {
            Some(resource) => resource.apply(update),
            None => {
                warn!(target: "mcp::resource", uri = %uri, "metadata update for unknown resource");
                false
            }
        }
    }

    pub async fn list(&self) -> Vec<Value> {
        let mut entries = Vec::with_capacity(self.resources.len());
        for resource in self.resources.values() {
            entries.push(resource.describe().await);
        }
        entries
    }

    /// A `resources/read` result.
    pub async fn read(&self, uri: &str) -> Result<Value, McpError> {
        let resource = self
            .resources
            .get(uri)
            .ok_or_else(|| McpError::resource_not_found(uri))?;
        let contents = resource
            .contents()
            .await
            .map_err(|error| error.into_mcp_error(uri))?;
        Ok(json!({ "contents": contents }))
    }

    /// The `data` payload of a resource-updated notification.
    pub async fn change_payload(&self, uri: &str) -> Value {
        let Some(resource) = self.resources.get(uri) else {
            return json!({ "deleted": true });
        };

        let metadata = resource.metadata().await;
        let contents = match resource.contents().await {
            Ok(contents) => contents,
            Err(error) => {
                warn!(target: "mcp::resource", uri = %uri, error = %error, "changed resource could not be read");
                Vec::new()
            }
        };
        json!({
            "resource": {
                "contents": contents,
                "name": metadata.name,
                "description": metadata.description,
                "mimeType": metadata.mime_type,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::bridge::ExecutionContext;

    use super::*;

    struct Counter {
        reads: usize,
    }

    impl ResourceHandler for Counter {
        fn content(&mut self) -> Result<ResourceData, ResourceError> {
            self.reads += 1;
            Ok(ResourceData::Text(format!("read {}", self.reads)))
        }

        fn metadata(&mut self) -> Option<ResourceMetadata> {
            Some(ResourceMetadata {
                name: "counter".to_string(),
                description: "Counts reads".to_string(),
                mime_type: "text/plain".to_string(),
            })
        }
    }

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{name}", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).expect("create temp file");
        file.write_all(bytes).expect("write temp file");
        path
    }

    #[tokio::test]
    async fn static_text_resource_reads_as_text() {
        let mut registry = ResourceRegistry::new();
        registry
            .insert(ResourceDefinition::text("mem://greeting", "hello").with_name("Greeting"))
            .expect("insert");

        let result = registry.read("mem://greeting").await.expect("read");
        assert_eq!(result["contents"][0]["uri"], "mem://greeting");
        assert_eq!(result["contents"][0]["mimeType"], "text/plain");
        assert_eq!(result["contents"][0]["text"], "hello");
        assert!(result["contents"][0].get("blob").is_none());
    }

    #[tokio::test]
    async fn binary_mime_types_are_base64_blobs() {
        let mut registry = ResourceRegistry::new();
        registry
            .insert(
                ResourceDefinition::text("mem://image", ResourceData::Bytes(vec![0, 1, 2, 255]))
                    .with_mime_type("image/png"),
            )
            .expect("insert");

        let result = registry.read("mem://image").await.expect("read");
        assert_eq!(result["contents"][0]["blob"], STANDARD.encode([0u8, 1, 2, 255]));
        assert!(result["contents"][0].get("text").is_none());
    }

    #[tokio::test]
    async fn file_resource_infers_name_uri_and_mime() {
        let path = temp_file("notes.md", b"# Notes");
        let resource = ResourceDefinition::file(&path, None);

        assert!(resource.uri().starts_with("file://"));
        let metadata = resource.metadata().await;
        assert_eq!(metadata.mime_type, "text/markdown");
        assert!(metadata.name.ends_with("notes.md"));

        let contents = resource.contents().await.expect("contents");
        assert_eq!(contents[0]["text"], "# Notes");
        assert!(resource.annotations().await.and_then(|a| a.last_modified).is_some());

        std::fs::remove_file(path).expect("cleanup");
    }

    #[tokio::test]
    async fn missing_file_maps_to_resource_not_found() {
        let mut registry = ResourceRegistry::new();
        registry
            .insert(ResourceDefinition::file(
                "/definitely/not/here.txt",
                Some("file:///gone.txt".to_string()),
            ))
            .expect("insert");

        let error = registry.read("file:///gone.txt").await.expect_err("missing file");
        assert_eq!(error.code, ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn delegated_resource_reads_through_its_owner() {
        let context = ExecutionContext::spawn("resource-owner").expect("context");
        let handler = owned_resource(context.handle(), Counter { reads: 0 });
        let mut registry = ResourceRegistry::new();
        registry
            .insert(ResourceDefinition::delegated("app://counter", handler))
            .expect("insert");

        let first = registry.read("app://counter").await.expect("first read");
        let second = registry.read("app://counter").await.expect("second read");
        assert_eq!(first["contents"][0]["text"], "read 1");
        assert_eq!(second["contents"][0]["text"], "read 2");

        let listed = registry.list().await;
        assert_eq!(listed[0]["name"], "counter");
        assert_eq!(listed[0]["description"], "Counts reads");
    }

    #[tokio::test]
    async fn change_payload_marks_missing_resources_deleted() {
        let mut registry = ResourceRegistry::new();
        registry
            .insert(ResourceDefinition::text("mem://a", "A").with_description("first"))
            .expect("insert");

        let payload = registry.change_payload("mem://a").await;
        assert_eq!(payload["resource"]["contents"][0]["text"], "A");
        assert_eq!(payload["resource"]["description"], "first");

        assert!(registry.remove("mem://a"));
        assert_eq!(registry.change_payload("mem://a").await, json!({ "deleted": true }));
    }

    #[test]
    fn metadata_updates_report_changes() {
        let mut registry = ResourceRegistry::new();
        registry
            .insert(ResourceDefinition::text("mem://a", "A"))
            .expect("insert");

        let update = MetadataUpdate {
            description: Some("described".to_string()),
            ..MetadataUpdate::default()
        };
        assert!(registry.update_metadata("mem://a", update.clone()));
        assert!(!registry.update_metadata("mem://a", update));
        assert!(!registry.update_metadata("mem://missing", MetadataUpdate::default()));
    }

    #[test]
    fn wrapper_config_needs_a_handler() {
        let config = ResourceConfig::from_json(&json!({"type": "wrapper", "uri": "app://x"}))
            .expect("config");
        let error = ResourceDefinition::from_config(config, None)
            .err()
            .expect("missing handler");
        assert!(matches!(error, CapabilityConfigError::MissingHandler));
    }
}
