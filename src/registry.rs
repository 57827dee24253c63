//! Capability registry: static capabilities from discovery plus a dynamic
//! overlay changed at runtime.
//!
//! The [`DynamicRegistry`] handle adds and removes capabilities while the
//! server is running. Changes are visible to the very next list or invoke
//! call, and every subscribed notification channel receives the matching
//! `notifications/*/list_changed`.
//!
//! # Example
//!
//! ```rust
//! # async fn example() -> mcp_host::Result<()> {
//! use mcp_host::{McpServer, ToolBuilder, ToolError};
//! use serde_json::Value;
//!
//! let server = McpServer::builder("dynamic").build().await?;
//! let registry = server.registry();
//!
//! let tool = ToolBuilder::new("echo")
//!     .public()
//!     .raw_handler(|_ctx, args: Value| async move { Ok::<_, ToolError>(args) })
//!     .build()?;
//! registry.register_tool(tool);
//! assert!(registry.contains_tool("echo"));
//!
//! assert!(registry.remove_tool("echo"));
//! assert!(!registry.remove_tool("echo"));
//! # Ok(())
//! # }
//! ```
//!
//! A dynamic entry whose name matches a static one shadows it; removing the
//! dynamic entry brings the static one back. Static entries are never
//! removed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::capability::CapabilityCore;
use crate::context::{NotificationSender, ServerNotification};
use crate::module::Discovery;
use crate::prompt::Prompt;
use crate::resource::{Resource, ResourceTemplate};
use crate::tool::Tool;

/// Anything stored in a registry table.
pub(crate) trait Entry {
    fn core(&self) -> &CapabilityCore;

    fn key(&self) -> &str {
        &self.core().meta.name
    }
}

impl Entry for Tool {
    fn core(&self) -> &CapabilityCore {
        &self.core
    }
}

impl Entry for Resource {
    fn core(&self) -> &CapabilityCore {
        &self.core
    }
}

impl Entry for ResourceTemplate {
    fn core(&self) -> &CapabilityCore {
        &self.core
    }
}

impl Entry for Prompt {
    fn core(&self) -> &CapabilityCore {
        &self.core
    }
}

struct Dynamic<T> {
    next_seq: u64,
    entries: HashMap<String, (u64, Arc<T>)>,
}

/// One kind's namespace.
pub(crate) struct Table<T> {
    statics: Vec<Arc<T>>,
    index: HashMap<String, usize>,
    dynamic: RwLock<Dynamic<T>>,
}

impl<T: Entry> Table<T> {
    fn new(statics: Vec<T>) -> Self {
        let statics: Vec<Arc<T>> = statics.into_iter().map(Arc::new).collect();
        let index = statics
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.key().to_string(), i))
            .collect();
        Self {
            statics,
            index,
            dynamic: RwLock::new(Dynamic {
                next_seq: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Look up by key; dynamic entries shadow static ones.
    pub(crate) fn find(&self, key: &str) -> Option<Arc<T>> {
        {
            let dynamic = self.dynamic.read().unwrap_or_else(PoisonError::into_inner);
            if let Some((_, entry)) = dynamic.entries.get(key) {
                return Some(entry.clone());
            }
        }
        self.index.get(key).map(|&i| self.statics[i].clone())
    }

    /// Snapshot: statics in discovery order (minus shadowed ones), then
    /// dynamic entries in registration order.
    pub(crate) fn list(&self) -> Vec<Arc<T>> {
        let dynamic = self.dynamic.read().unwrap_or_else(PoisonError::into_inner);
        let mut added: Vec<&(u64, Arc<T>)> = dynamic.entries.values().collect();
        added.sort_by_key(|(seq, _)| *seq);

        self.statics
            .iter()
            .filter(|entry| !dynamic.entries.contains_key(entry.key()))
            .cloned()
            .chain(added.into_iter().map(|(_, entry)| entry.clone()))
            .collect()
    }

    /// Insert or replace. Returns `true` when an existing dynamic entry was
    /// replaced.
    fn register(&self, entry: T) -> bool {
        let mut dynamic = self.dynamic.write().unwrap_or_else(PoisonError::into_inner);
        let seq = dynamic.next_seq;
        dynamic.next_seq += 1;
        let key = entry.key().to_string();
        dynamic
            .entries
            .insert(key, (seq, Arc::new(entry)))
            .is_some()
    }

    fn remove(&self, key: &str) -> bool {
        let mut dynamic = self.dynamic.write().unwrap_or_else(PoisonError::into_inner);
        dynamic.entries.remove(key).is_some()
    }

    fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }
}

/// Per-server registry of every capability kind.
pub(crate) struct CapabilityRegistry {
    pub(crate) tools: Table<Tool>,
    pub(crate) resources: Table<Resource>,
    pub(crate) templates: Table<ResourceTemplate>,
    pub(crate) prompts: Table<Prompt>,
    subscribers: RwLock<Vec<NotificationSender>>,
}

impl CapabilityRegistry {
    pub(crate) fn new(discovery: Discovery) -> Self {
        Self {
            tools: Table::new(discovery.tools),
            resources: Table::new(discovery.resources),
            templates: Table::new(discovery.templates),
            prompts: Table::new(discovery.prompts),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Receive list-changed notifications on `sender`.
    pub(crate) fn subscribe(&self, sender: NotificationSender) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.push(sender);
    }

    /// Notify every subscriber, dropping closed channels.
    fn broadcast(&self, notification: ServerNotification) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            let _ = tx.try_send(notification.clone());
        }
    }
}

/// A cloneable handle for runtime registration on one server.
///
/// Obtained from [`McpServer::registry`](crate::McpServer::registry).
#[derive(Clone)]
pub struct DynamicRegistry {
    inner: Arc<CapabilityRegistry>,
}

impl DynamicRegistry {
    pub(crate) fn new(inner: Arc<CapabilityRegistry>) -> Self {
        Self { inner }
    }

    /// Register a tool, replacing any dynamic tool with the same name.
    pub fn register_tool(&self, tool: Tool) {
        tracing::debug!(tool = %tool.name(), "Registering dynamic tool");
        self.inner.tools.register(tool);
        self.inner.broadcast(ServerNotification::ToolsListChanged);
    }

    /// Remove a dynamic tool. Returns `true` if it existed.
    pub fn remove_tool(&self, name: &str) -> bool {
        let removed = self.inner.tools.remove(name);
        if removed {
            tracing::debug!(tool = %name, "Removed dynamic tool");
            self.inner.broadcast(ServerNotification::ToolsListChanged);
        }
        removed
    }

    pub fn register_resource(&self, resource: Resource) {
        tracing::debug!(uri = %resource.uri(), "Registering dynamic resource");
        self.inner.resources.register(resource);
        self.inner.broadcast(ServerNotification::ResourcesListChanged);
    }

    pub fn register_resource_template(&self, template: ResourceTemplate) {
        tracing::debug!(
            uri_template = %template.uri_template(),
            "Registering dynamic resource template"
        );
        self.inner.templates.register(template);
        self.inner.broadcast(ServerNotification::ResourcesListChanged);
    }

    /// Remove a dynamic resource or resource template by URI (or URI
    /// template). Returns `true` if either existed.
    pub fn remove_resource(&self, uri: &str) -> bool {
        let resource = self.inner.resources.remove(uri);
        let template = self.inner.templates.remove(uri);
        let removed = resource || template;
        if removed {
            tracing::debug!(uri = %uri, "Removed dynamic resource");
            self.inner.broadcast(ServerNotification::ResourcesListChanged);
        }
        removed
    }

    pub fn register_prompt(&self, prompt: Prompt) {
        tracing::debug!(prompt = %prompt.name(), "Registering dynamic prompt");
        self.inner.prompts.register(prompt);
        self.inner.broadcast(ServerNotification::PromptsListChanged);
    }

    pub fn remove_prompt(&self, name: &str) -> bool {
        let removed = self.inner.prompts.remove(name);
        if removed {
            tracing::debug!(prompt = %name, "Removed dynamic prompt");
            self.inner.broadcast(ServerNotification::PromptsListChanged);
        }
        removed
    }

    /// Whether a tool (static or dynamic) is registered under `name`
    pub fn contains_tool(&self, name: &str) -> bool {
        self.inner.tools.contains(name)
    }

    pub fn contains_resource(&self, uri: &str) -> bool {
        self.inner.resources.contains(uri) || self.inner.templates.contains(uri)
    }

    pub fn contains_prompt(&self, name: &str) -> bool {
        self.inner.prompts.contains(name)
    }

    /// Receive list-changed notifications on `sender`.
    pub fn subscribe(&self, sender: NotificationSender) {
        self.inner.subscribe(sender);
    }
}
