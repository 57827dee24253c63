//! Test utilities for MCP servers.
//!
//! [`TestClient`] drives an [`McpServer`] through the same JSON-RPC framing
//! a transport uses, with typed helpers and a switchable caller identity.
//!
//! ```rust
//! use mcp_host::{Identity, McpServer, TestClient, ToolBuilder, ToolError};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct EchoInput {
//!     message: String,
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let echo = ToolBuilder::new("echo")
//!     .require_scope("echo")
//!     .handler(|input: EchoInput| async move { Ok::<_, ToolError>(input.message) })
//!     .build()
//!     .unwrap();
//!
//! let server = McpServer::builder("test-server").tool(echo).build().await.unwrap();
//! let mut client = TestClient::new(server);
//!
//! // Anonymous callers do not see the tool at all
//! assert!(client.list_tools().await.is_empty());
//!
//! client.set_identity(Some(Identity::authenticated("dev").with_scopes(["echo"])));
//! let result = client.call_tool("echo", json!({"message": "hello"})).await;
//! assert_eq!(result.first_text(), Some("hello"));
//! # }
//! ```

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::context::{NotificationReceiver, ServerNotification};
use crate::error::JsonRpcError;
use crate::identity::Identity;
use crate::jsonrpc::JsonRpcService;
use crate::protocol::{
    CallToolResult, GetPromptResult, JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION,
    McpNotification, PromptDefinition, ReadResourceResult, ResourceDefinition,
    ResourceTemplateDefinition, ToolDefinition,
};
use crate::server::McpServer;

/// An ergonomic test client for MCP servers.
///
/// Methods named after a protocol operation panic on JSON-RPC errors, which
/// is what test code usually wants; the `try_*` variants return them.
pub struct TestClient {
    server: McpServer,
    service: JsonRpcService<McpServer>,
    notification_rx: NotificationReceiver,
    next_id: i64,
}

impl TestClient {
    /// Wrap `server`, subscribing to its notifications. Requests are
    /// anonymous until an identity is set.
    pub fn new(server: McpServer) -> Self {
        let notification_rx = server.subscribe();
        Self {
            service: JsonRpcService::new(server.clone()),
            server,
            notification_rx,
            next_id: 1,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.set_identity(Some(identity));
        self
    }

    /// Change the caller for subsequent requests; `None` is anonymous.
    pub fn set_identity(&mut self, identity: Option<Identity>) {
        let service = JsonRpcService::new(self.server.clone());
        self.service = match identity {
            Some(identity) => service.with_identity(identity),
            None => service,
        };
    }

    pub fn server(&self) -> &McpServer {
        &self.server
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send `initialize` followed by the initialized notification.
    ///
    /// Returns the raw JSON result of the initialize response.
    pub async fn initialize(&mut self) -> Value {
        let result = self
            .send_request(
                "initialize",
                Some(json!({
                    "protocolVersion": LATEST_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "test-client", "version": "1.0.0" }
                })),
            )
            .await;
        self.server.handle_notification(McpNotification::Initialized);
        result
    }

    pub async fn list_tools(&mut self) -> Vec<ToolDefinition> {
        self.list("tools/list", "tools").await
    }

    /// Call a tool. Handler failures come back as a result with `is_error`
    /// set; only protocol-level errors panic.
    pub async fn call_tool(&mut self, name: &str, args: Value) -> CallToolResult {
        self.try_call_tool(name, args)
            .await
            .unwrap_or_else(|e| panic!("tools/call '{}' failed: {} (code {})", name, e.message, e.code))
    }

    pub async fn try_call_tool(
        &mut self,
        name: &str,
        args: Value,
    ) -> Result<CallToolResult, JsonRpcError> {
        self.try_typed("tools/call", json!({ "name": name, "arguments": args }))
            .await
    }

    pub async fn list_resources(&mut self) -> Vec<ResourceDefinition> {
        self.list("resources/list", "resources").await
    }

    pub async fn list_resource_templates(&mut self) -> Vec<ResourceTemplateDefinition> {
        self.list("resources/templates/list", "resourceTemplates").await
    }

    pub async fn read_resource(&mut self, uri: &str) -> ReadResourceResult {
        self.try_read_resource(uri)
            .await
            .unwrap_or_else(|e| panic!("resources/read '{}' failed: {} (code {})", uri, e.message, e.code))
    }

    pub async fn try_read_resource(&mut self, uri: &str) -> Result<ReadResourceResult, JsonRpcError> {
        self.try_typed("resources/read", json!({ "uri": uri })).await
    }

    pub async fn list_prompts(&mut self) -> Vec<PromptDefinition> {
        self.list("prompts/list", "prompts").await
    }

    pub async fn get_prompt(&mut self, name: &str, args: HashMap<String, String>) -> GetPromptResult {
        self.try_get_prompt(name, args)
            .await
            .unwrap_or_else(|e| panic!("prompts/get '{}' failed: {} (code {})", name, e.message, e.code))
    }

    pub async fn try_get_prompt(
        &mut self,
        name: &str,
        args: HashMap<String, String>,
    ) -> Result<GetPromptResult, JsonRpcError> {
        self.try_typed("prompts/get", json!({ "name": name, "arguments": args }))
            .await
    }

    /// Send an arbitrary request and expect success.
    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Value {
        self.try_send_request(method, params)
            .await
            .unwrap_or_else(|e| {
                panic!(
                    "expected request '{}' to succeed, but got error: {} (code {})",
                    method, e.message, e.code
                )
            })
    }

    /// Send an arbitrary request and return its JSON-RPC outcome.
    pub async fn try_send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, JsonRpcError> {
        let id = self.next_id();
        let mut req = JsonRpcRequest::new(id, method);
        if let Some(p) = params {
            req = req.with_params(p);
        }

        match self.service.call_single(req).await {
            JsonRpcResponse::Result(r) => Ok(r.result),
            JsonRpcResponse::Error(e) => Err(e.error),
        }
    }

    /// Try to receive a notification without blocking.
    pub fn try_recv_notification(&mut self) -> Option<ServerNotification> {
        self.notification_rx.try_recv().ok()
    }

    /// Drain all pending notifications.
    pub fn drain_notifications(&mut self) -> Vec<ServerNotification> {
        let mut notifications = Vec::new();
        while let Ok(n) = self.notification_rx.try_recv() {
            notifications.push(n);
        }
        notifications
    }

    async fn list<T: DeserializeOwned>(&mut self, method: &str, field: &str) -> Vec<T> {
        let mut result = self.send_request(method, None).await;
        let items = result.get_mut(field).map(Value::take).unwrap_or_default();
        serde_json::from_value(items)
            .unwrap_or_else(|e| panic!("failed to deserialize {} from '{}': {}", field, method, e))
    }

    async fn try_typed<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<T, JsonRpcError> {
        let raw = self.try_send_request(method, Some(params)).await?;
        Ok(serde_json::from_value(raw)
            .unwrap_or_else(|e| panic!("failed to deserialize '{}' result: {}", method, e)))
    }
}

#[cfg(test)]
mod tests {
    use schemars::JsonSchema;
    use serde::Deserialize;

    use super::*;
    use crate::error::ToolError;
    use crate::prompt::PromptBuilder;
    use crate::resource::ResourceBuilder;
    use crate::tool::ToolBuilder;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    async fn create_test_server() -> McpServer {
        let add = ToolBuilder::new("add")
            .description("Add two numbers")
            .public()
            .handler(|input: AddInput| async move {
                Ok::<_, ToolError>(format!("{}", input.a + input.b))
            })
            .build()
            .unwrap();

        let readme = ResourceBuilder::new("file:///README.md")
            .name("README")
            .public()
            .text("# My Project")
            .unwrap();

        let greet = PromptBuilder::new("greet")
            .description("Greet someone")
            .required_arg("name", "Name to greet")
            .public()
            .raw_handler(|_ctx, args: Value| async move {
                let name = args["name"].as_str().unwrap_or("World").to_string();
                Ok::<_, ToolError>(format!("Please greet {} warmly.", name))
            })
            .unwrap();

        McpServer::builder("test-server")
            .tool(add)
            .resource(readme)
            .prompt(greet)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_round() {
        let mut client = TestClient::new(create_test_server().await);
        let init = client.initialize().await;
        assert_eq!(init["serverInfo"]["name"], "test-server");

        let tools = client.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "add");

        let result = client.call_tool("add", json!({"a": 2, "b": 3})).await;
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("5"));

        let resources = client.list_resources().await;
        assert_eq!(resources[0].name, "README");
        let readme = client.read_resource("file:///README.md").await;
        assert_eq!(readme.contents[0].text.as_deref(), Some("# My Project"));

        let prompts = client.list_prompts().await;
        assert_eq!(prompts[0].arguments.len(), 1);
        let prompt = client
            .get_prompt("greet", HashMap::from([("name".to_string(), "Alice".to_string())]))
            .await;
        assert_eq!(
            prompt.messages[0].content.as_text(),
            Some("Please greet Alice warmly.")
        );
    }

    #[tokio::test]
    async fn test_errors_surface() {
        let mut client = TestClient::new(create_test_server().await);

        let err = client.try_call_tool("nonexistent", json!({})).await.unwrap_err();
        assert_eq!(err.code, -32601);

        let err = client.try_read_resource("file:///missing").await.unwrap_err();
        assert_eq!(err.code, -32002);

        let err = client.try_get_prompt("greet", HashMap::new()).await.unwrap_err();
        assert_eq!(err.code, -32602);

        let pong = client.send_request("ping", None).await;
        assert_eq!(pong, json!({}));
    }

    #[tokio::test]
    async fn test_dynamic_registration_notifies() {
        let mut client = TestClient::new(create_test_server().await);
        let tool = ToolBuilder::new("late")
            .public()
            .raw_handler(|_ctx, _args: Value| async move { Ok::<_, ToolError>("late") })
            .build()
            .unwrap();
        client.server().registry().register_tool(tool);

        assert_eq!(
            client.drain_notifications(),
            vec![ServerNotification::ToolsListChanged]
        );
        assert_eq!(client.list_tools().await.len(), 2);
    }
}
