//! Several independently composed servers in one process.
//!
//! Each [`McpServer`] owns its registry, providers, and executor, so a
//! capability registered on one server is never listed or invoked through
//! another, even when both import the same module.
//!
//! ```rust
//! # async fn example() -> mcp_host::Result<()> {
//! use mcp_host::{McpHost, McpServer, McpRequest, ServerRequest};
//!
//! let mut host = McpHost::new();
//! host.add(McpServer::builder("billing").build().await?)?;
//! host.add(McpServer::builder("search").build().await?)?;
//!
//! let response = host
//!     .dispatch("billing", ServerRequest::new(1, McpRequest::Ping))
//!     .await?;
//! assert!(response.inner.is_ok());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::server::{McpServer, ServerRequest, ServerResponse};

#[derive(Debug, Clone, Default)]
pub struct McpHost {
    servers: BTreeMap<String, McpServer>,
}

impl McpHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server under its own name. Names must be unique within a host.
    pub fn add(&mut self, server: McpServer) -> Result<()> {
        let name = server.name().to_string();
        if self.servers.contains_key(&name) {
            return Err(Error::composition(format!(
                "server '{}' is already hosted",
                name
            )));
        }
        tracing::info!(server = %name, "Hosting server");
        self.servers.insert(name, server);
        Ok(())
    }

    pub fn server(&self, name: &str) -> Option<&McpServer> {
        self.servers.get(name)
    }

    /// Names of hosted servers, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Route a request to the named server.
    pub async fn dispatch(&self, server: &str, request: ServerRequest) -> Result<ServerResponse> {
        let Some(target) = self.servers.get(server) else {
            return Err(Error::Transport(format!("no server named '{}'", server)));
        };
        let id = request.id.clone();
        let inner = target.handle(request.id, request.inner, request.identity).await;
        Ok(ServerResponse { id, inner })
    }
}
