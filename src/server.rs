//! MCP server: protocol handling on top of the capability executor.
//!
//! An [`McpServer`] is built once from a root [`Module`] and is cheap to
//! clone. It implements `tower::Service<ServerRequest>`, so any tower
//! middleware (including [`McpTracingLayer`](crate::McpTracingLayer)) can
//! wrap it, and any transport that produces [`ServerRequest`]s can drive it.
//!
//! ```rust
//! # async fn example() -> mcp_host::Result<()> {
//! use mcp_host::{McpServer, Module, ToolBuilder, ToolError};
//! use serde_json::Value;
//!
//! let ping = ToolBuilder::new("ping")
//!     .public()
//!     .raw_handler(|_ctx, _args: Value| async move { Ok::<_, ToolError>("pong") })
//!     .build()?;
//!
//! let server = McpServer::builder("example")
//!     .version("1.0.0")
//!     .import(Module::new("core").tool(ping))
//!     .build()
//!     .await?;
//! assert_eq!(server.name(), "example");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use tower_service::Service;

use crate::config::{DEFAULT_NOTIFICATION_BUFFER, DEFAULT_VERSION, ServerConfig};
use crate::context::{
    CancellationToken, NotificationReceiver, NotificationSender, RequestContext,
    notification_channel,
};
use crate::error::{JsonRpcError, Result};
use crate::executor::Executor;
use crate::filter::DenialBehavior;
use crate::guard::GuardRef;
use crate::identity::Identity;
use crate::module::Module;
use crate::prompt::Prompt;
use crate::protocol::{
    EmptyResult, Implementation, InitializeResult, JsonRpcResponse, LATEST_PROTOCOL_VERSION,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    LogLevel, LoggingCapability, McpNotification, McpRequest, McpResponse, ProgressToken,
    PromptsCapability, RequestId, ResourcesCapability, SUPPORTED_PROTOCOL_VERSIONS,
    ServerCapabilities, ToolsCapability,
};
use crate::provider::{Container, ProviderDef};
use crate::registry::{CapabilityRegistry, DynamicRegistry};
use crate::resource::{Resource, ResourceTemplate};
use crate::tool::Tool;

/// A running MCP server.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    name: String,
    version: String,
    instructions: Option<String>,
    executor: Executor,
    registry: Arc<CapabilityRegistry>,
    /// Shared with every request context so `logging/setLevel` applies at once
    min_log_level: Arc<RwLock<LogLevel>>,
    in_flight: RwLock<InFlight>,
    notification_tx: RwLock<Option<NotificationSender>>,
    notification_buffer: usize,
}

/// Cancellation tokens of running requests.
///
/// Ids are chosen by clients and need not be unique across batches or
/// connections, so each request instance gets its own sequence number.
#[derive(Default)]
struct InFlight {
    next_seq: u64,
    requests: HashMap<RequestId, Vec<(u64, CancellationToken)>>,
}

/// Keeps a request cancellable until dropped.
///
/// Dropping it, including when the request future itself is dropped
/// mid-call, stops tracking the request.
#[must_use = "the request stops being cancellable when the guard is dropped"]
pub struct RequestGuard {
    inner: Arc<ServerInner>,
    request_id: RequestId,
    seq: u64,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let mut in_flight = self
            .inner
            .in_flight
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = in_flight.requests.get_mut(&self.request_id) {
            entries.retain(|(seq, _)| *seq != self.seq);
            if entries.is_empty() {
                in_flight.requests.remove(&self.request_id);
            }
        }
    }
}

impl McpServer {
    pub fn builder(name: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// Handle for registering and removing capabilities at runtime.
    pub fn registry(&self) -> DynamicRegistry {
        DynamicRegistry::new(self.inner.registry.clone())
    }

    /// The executor behind this server, for callers that bypass the
    /// protocol layer.
    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Open a channel for outgoing notifications.
    ///
    /// The receiver gets list-changed notifications plus the progress and
    /// log notifications of requests started after this call. A later call
    /// takes over progress and log delivery; list-changed notifications go
    /// to every open receiver.
    pub fn subscribe(&self) -> NotificationReceiver {
        let (tx, rx) = notification_channel(self.inner.notification_buffer);
        self.inner.registry.subscribe(tx.clone());
        *self
            .inner
            .notification_tx
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Current minimum level for log notifications
    pub fn min_log_level(&self) -> LogLevel {
        *self
            .inner
            .min_log_level
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the context for one request and track it for cancellation
    /// until the returned guard is dropped.
    pub fn begin_request(
        &self,
        request_id: RequestId,
        progress_token: Option<ProgressToken>,
        identity: Option<Identity>,
    ) -> (RequestContext, RequestGuard) {
        let token = CancellationToken::new();
        let mut ctx = RequestContext::new(request_id.clone())
            .with_min_log_level(self.inner.min_log_level.clone())
            .with_cancellation(token.clone());

        if let Some(progress_token) = progress_token {
            ctx = ctx.with_progress_token(progress_token);
        }
        if let Some(identity) = identity {
            ctx = ctx.with_identity(identity);
        }
        let tx = self
            .inner
            .notification_tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(tx) = tx {
            ctx = ctx.with_notification_sender(tx);
        }

        let mut in_flight = self
            .inner
            .in_flight
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let seq = in_flight.next_seq;
        in_flight.next_seq += 1;
        in_flight
            .requests
            .entry(request_id.clone())
            .or_default()
            .push((seq, token));

        let guard = RequestGuard {
            inner: self.inner.clone(),
            request_id,
            seq,
        };
        (ctx, guard)
    }

    /// Number of requests currently tracked for cancellation
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Cancel every running request with this id.
    fn cancel_request(&self, request_id: &RequestId) -> bool {
        let in_flight = self
            .inner
            .in_flight
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = in_flight.requests.get(request_id) else {
            return false;
        };
        for (_, token) in entries {
            token.cancel();
        }
        !entries.is_empty()
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
            resources: Some(ResourcesCapability { list_changed: true }),
            prompts: Some(PromptsCapability { list_changed: true }),
            logging: Some(LoggingCapability::default()),
        }
    }

    /// Handle one MCP request on behalf of `identity`.
    pub async fn handle(
        &self,
        request_id: RequestId,
        request: McpRequest,
        identity: Option<Identity>,
    ) -> std::result::Result<McpResponse, JsonRpcError> {
        let executor = &self.inner.executor;
        match request {
            McpRequest::Initialize(params) => {
                tracing::info!(
                    server = %self.inner.name,
                    client = %params.client_info.name,
                    version = %params.client_info.version,
                    "Client initializing"
                );

                let protocol_version =
                    if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
                        params.protocol_version
                    } else {
                        LATEST_PROTOCOL_VERSION.to_string()
                    };

                Ok(McpResponse::Initialize(InitializeResult {
                    protocol_version,
                    capabilities: self.capabilities(),
                    server_info: Implementation {
                        name: self.inner.name.clone(),
                        version: self.inner.version.clone(),
                    },
                    instructions: self.inner.instructions.clone(),
                }))
            }

            McpRequest::ListTools(_params) => Ok(McpResponse::ListTools(ListToolsResult {
                tools: executor.list_tools(identity.as_ref()).await,
                next_cursor: None,
            })),

            McpRequest::CallTool(params) => {
                let progress_token = params.meta.and_then(|m| m.progress_token);
                let (ctx, _guard) = self.begin_request(request_id, progress_token, identity);
                let result = executor.call_tool(&params.name, params.arguments, ctx).await;
                Ok(McpResponse::CallTool(result?))
            }

            McpRequest::ListResources(_params) => {
                Ok(McpResponse::ListResources(ListResourcesResult {
                    resources: executor.list_resources(identity.as_ref()).await,
                    next_cursor: None,
                }))
            }

            McpRequest::ListResourceTemplates(_params) => Ok(McpResponse::ListResourceTemplates(
                ListResourceTemplatesResult {
                    resource_templates: executor.list_resource_templates(identity.as_ref()).await,
                    next_cursor: None,
                },
            )),

            McpRequest::ReadResource(params) => {
                let (ctx, _guard) = self.begin_request(request_id, None, identity);
                let result = executor.read_resource(&params.uri, ctx).await;
                Ok(McpResponse::ReadResource(result?))
            }

            McpRequest::ListPrompts(_params) => Ok(McpResponse::ListPrompts(ListPromptsResult {
                prompts: executor.list_prompts(identity.as_ref()).await,
                next_cursor: None,
            })),

            McpRequest::GetPrompt(params) => {
                let (ctx, _guard) = self.begin_request(request_id, None, identity);
                let result = executor.get_prompt(&params.name, params.arguments, ctx).await;
                Ok(McpResponse::GetPrompt(result?))
            }

            McpRequest::Ping => Ok(McpResponse::Pong(EmptyResult {})),

            McpRequest::SetLoggingLevel(params) => {
                tracing::debug!(level = %params.level, "Client set logging level");
                *self
                    .inner
                    .min_log_level
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = params.level;
                Ok(McpResponse::SetLoggingLevel(EmptyResult {}))
            }

            McpRequest::Unknown { method, .. } => Err(JsonRpcError::method_not_found(&method)),
        }
    }

    /// Handle an MCP notification (no response expected)
    pub fn handle_notification(&self, notification: McpNotification) {
        match notification {
            McpNotification::Initialized => {
                tracing::info!(server = %self.inner.name, "Client initialized");
            }
            McpNotification::Cancelled(params) => {
                if self.cancel_request(&params.request_id) {
                    tracing::info!(
                        request_id = %params.request_id,
                        reason = ?params.reason,
                        "Request cancelled"
                    );
                } else {
                    tracing::debug!(
                        request_id = %params.request_id,
                        "Cancellation requested for unknown request"
                    );
                }
            }
            McpNotification::Progress(params) => {
                tracing::trace!(
                    token = ?params.progress_token,
                    progress = params.progress,
                    "Progress notification from client"
                );
            }
            McpNotification::Unknown { method, .. } => {
                tracing::debug!(method = %method, "Unknown notification received");
            }
        }
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("executor", &self.inner.executor)
            .finish()
    }
}

/// Builder for [`McpServer`].
///
/// Capabilities added directly on the builder go into the server's root
/// module, alongside everything imported.
pub struct McpServerBuilder {
    name: String,
    version: String,
    instructions: Option<String>,
    root: Module,
    global_guards: Vec<GuardRef>,
    denial: DenialBehavior,
    notification_buffer: usize,
    min_log_level: LogLevel,
}

impl McpServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: Module::new(name.clone()),
            name,
            version: DEFAULT_VERSION.to_string(),
            instructions: None,
            global_guards: Vec::new(),
            denial: DenialBehavior::default(),
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
            min_log_level: LogLevel::default(),
        }
    }

    /// Start from serialized settings. Capabilities, guards, and a custom
    /// denial behavior are still added in code.
    pub fn from_config(config: ServerConfig) -> Self {
        let mut builder = Self::new(config.name)
            .version(config.version)
            .denial_behavior(config.denial_behavior.into())
            .notification_buffer(config.notification_buffer)
            .min_log_level(config.min_log_level);
        builder.instructions = config.instructions;
        builder
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Instructions returned to clients in `initialize`
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Import a module into the server's root.
    pub fn import(mut self, module: Module) -> Self {
        self.root = self.root.import(module);
        self
    }

    pub fn provider<P: Send + Sync + 'static>(mut self, def: ProviderDef<P>) -> Self {
        self.root = self.root.provider(def);
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.root = self.root.tool(tool);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.root = self.root.resource(resource);
        self
    }

    pub fn resource_template(mut self, template: ResourceTemplate) -> Self {
        self.root = self.root.resource_template(template);
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.root = self.root.prompt(prompt);
        self
    }

    /// Guard applied to every non-public capability, after its own guards.
    pub fn global_guard(mut self, guard: GuardRef) -> Self {
        self.global_guards.push(guard);
        self
    }

    pub fn denial_behavior(mut self, denial: DenialBehavior) -> Self {
        self.denial = denial;
        self
    }

    pub fn notification_buffer(mut self, buffer: usize) -> Self {
        self.notification_buffer = buffer.max(1);
        self
    }

    pub fn min_log_level(mut self, level: LogLevel) -> Self {
        self.min_log_level = level;
        self
    }

    /// Discover the module graph, verify providers, and construct every
    /// singleton.
    ///
    /// Any failure here is an [`Error::Composition`](crate::Error::Composition)
    /// and the server is not created.
    pub async fn build(self) -> Result<McpServer> {
        let discovery = self.root.discover()?;
        let container = Container::new(&discovery.providers)?;
        container.instantiate_singletons().await?;

        tracing::info!(
            server = %self.name,
            tools = discovery.tools.len(),
            resources = discovery.resources.len() + discovery.templates.len(),
            prompts = discovery.prompts.len(),
            providers = discovery.providers.len(),
            "Server composed"
        );

        let registry = Arc::new(CapabilityRegistry::new(discovery));
        let executor = Executor::new(
            registry.clone(),
            container,
            self.global_guards,
            self.denial,
        );

        Ok(McpServer {
            inner: Arc::new(ServerInner {
                name: self.name,
                version: self.version,
                instructions: self.instructions,
                executor,
                registry,
                min_log_level: Arc::new(RwLock::new(self.min_log_level)),
                in_flight: RwLock::new(InFlight::default()),
                notification_tx: RwLock::new(None),
                notification_buffer: self.notification_buffer,
            }),
        })
    }
}

// =============================================================================
// Tower Service implementation
// =============================================================================

/// Request type for the tower Service implementation
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub id: RequestId,
    pub inner: McpRequest,
    /// The caller, as established by the transport; `None` is anonymous
    pub identity: Option<Identity>,
}

impl ServerRequest {
    pub fn new(id: impl Into<RequestId>, inner: McpRequest) -> Self {
        Self {
            id: id.into(),
            inner,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// Response type for the tower Service implementation
#[derive(Debug)]
pub struct ServerResponse {
    pub id: RequestId,
    pub inner: std::result::Result<McpResponse, JsonRpcError>,
}

impl ServerResponse {
    /// Convert to JSON-RPC response
    pub fn into_jsonrpc(self) -> JsonRpcResponse {
        match self.inner {
            Ok(response) => match serde_json::to_value(response) {
                Ok(result) => JsonRpcResponse::result(self.id, result),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                    JsonRpcResponse::error(
                        Some(self.id),
                        JsonRpcError::internal_error(format!("Serialization error: {}", e)),
                    )
                }
            },
            Err(error) => JsonRpcResponse::error(Some(self.id), error),
        }
    }
}

impl Service<ServerRequest> for McpServer {
    type Response = ServerResponse;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ServerRequest) -> Self::Future {
        let server = self.clone();
        Box::pin(async move {
            let inner = server.handle(req.id.clone(), req.inner, req.identity).await;
            Ok(ServerResponse { id: req.id, inner })
        })
    }
}
