//! # mcp-host
//!
//! Host Model Context Protocol (MCP) tools, resources, and prompts behind a
//! request-scoped executor, on top of the [Tower](https://docs.rs/tower)
//! service abstraction.
//!
//! Capabilities are declared once, either as free closures or as methods of
//! *providers* whose instances live for the whole server or for a single
//! request. Every call runs the same pipeline:
//!
//! ```text
//! lookup → authorize → resolve provider → validate arguments → invoke → normalize
//! ```
//!
//! and every failure after bootstrap comes back as a value: a JSON-RPC error
//! for unknown or forbidden capabilities, an error envelope for everything
//! else. Only composition problems (missing provider dependencies, duplicate
//! names, a failing singleton factory) are fatal, and only at
//! [`McpServerBuilder::build`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use mcp_host::{
//!     Identity, McpServer, Module, ProviderDef, RequestContext, TestClient, ToolBuilder,
//!     ToolError,
//! };
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Clone)]
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct GreetInput {
//!     name: String,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> mcp_host::Result<()> {
//! let greetings = Module::new("greetings").provider(
//!     ProviderDef::value(Greeter { greeting: "Hello".into() })
//!         .require_scope("greet")
//!         .tool(
//!             ToolBuilder::new("greet").description("Greet someone by name"),
//!             |greeter: Arc<Greeter>, _ctx: RequestContext, input: GreetInput| async move {
//!                 Ok::<_, ToolError>(format!("{}, {}!", greeter.greeting, input.name))
//!             },
//!         ),
//! );
//!
//! let server = McpServer::builder("my-server")
//!     .version("1.0.0")
//!     .import(greetings)
//!     .build()
//!     .await?;
//!
//! let mut client = TestClient::new(server)
//!     .with_identity(Identity::authenticated("alice").with_scopes(["greet"]));
//! let result = client.call_tool("greet", json!({"name": "World"})).await;
//! assert_eq!(result.first_text(), Some("Hello, World!"));
//! # Ok(())
//! # }
//! ```
//!
//! Serve it over stdio with [`StdioTransport`], or drive it from any other
//! transport through its `tower::Service<ServerRequest>` implementation.
//!
//! ## Key Types
//!
//! ### Composition
//! - [`McpServer`] / [`McpServerBuilder`] - one named server with its own registry
//! - [`Module`] - composition root grouping providers and capabilities
//! - [`ProviderDef`] - a provider type, its lifetime, and its capabilities
//! - [`McpHost`] - several isolated servers in one process
//!
//! ### Capabilities
//! - [`ToolBuilder`], [`ResourceBuilder`], [`ResourceTemplateBuilder`], [`PromptBuilder`]
//! - [`DynamicRegistry`] - register and remove capabilities at runtime
//!
//! ### Authorization
//! - [`Identity`] - the caller, as established by the transport
//! - [`Guard`] - async predicate over identity and capability metadata
//! - [`DenialBehavior`] - whether denied callers learn a capability exists
//!
//! ### Execution
//! - [`Executor`] - the request-scoped pipeline itself
//! - [`RequestContext`] - identity, progress, logging, and cancellation for a handler
//! - [`InvocationResult`] - text, structured, or error envelope

pub mod authz;
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod filter;
pub mod guard;
pub mod host;
pub mod identity;
pub mod jsonrpc;
pub mod module;
pub mod prompt;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod result;
pub mod schema;
pub mod server;
pub mod testing;
pub mod tool;
pub mod tracing_layer;
pub mod transport;

// Re-exports
pub use authz::{AccessError, AccessPolicy, Denial};
pub use capability::{CapabilityKind, CapabilityMeta};
pub use config::ServerConfig;
pub use context::{
    CancellationToken, NotificationReceiver, NotificationSender, RequestContext,
    ServerNotification, notification_channel,
};
pub use error::{BoxError, Error, ErrorCode, JsonRpcError, McpErrorCode, Result, ToolError};
pub use executor::Executor;
pub use filter::{DenialBehavior, DenialMode};
pub use guard::{Guard, GuardRef, SubjectAllowList, async_guard_fn, guard_fn};
pub use host::McpHost;
pub use identity::Identity;
pub use jsonrpc::{JsonRpcLayer, JsonRpcService};
pub use module::Module;
pub use prompt::{Prompt, PromptBuilder};
pub use protocol::{
    CallToolResult, Content, GetPromptResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, JsonRpcResponseMessage, LogLevel, McpNotification,
    McpRequest, McpResponse, PromptMessage, PromptRole, ReadResourceResult, RequestId,
    ResourceContent,
};
pub use provider::{Lifetime, ProviderDef, RequestScope, Resolver};
pub use registry::DynamicRegistry;
pub use resource::{Resource, ResourceBuilder, ResourceTemplate, ResourceTemplateBuilder};
pub use result::{ErrorResult, InvocationResult, StructuredResult, TextResult};
pub use schema::{ArgumentSchema, ValidationIssue};
pub use server::{McpServer, McpServerBuilder, RequestGuard, ServerRequest, ServerResponse};
pub use testing::TestClient;
pub use tool::{Tool, ToolBuilder};
pub use tracing_layer::{McpTracingLayer, McpTracingService};
pub use transport::StdioTransport;
