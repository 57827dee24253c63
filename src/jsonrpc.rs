//! JSON-RPC 2.0 service layer
//!
//! Provides a Tower [`Layer`] and [`Service`] for JSON-RPC framing of MCP requests.
//!
//! - [`JsonRpcLayer`] - Tower layer for [`ServiceBuilder`](tower::ServiceBuilder) composition
//! - [`JsonRpcService`] - Tower service wrapping an [`McpServer`](crate::McpServer)
//!
//! The service handles:
//! - Single request processing
//! - Batch request processing (concurrent execution)
//! - JSON-RPC version validation
//! - Attaching the caller [`Identity`] established by the transport

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Layer;
use tower_service::Service;

use crate::error::{Error, JsonRpcError, Result};
use crate::identity::Identity;
use crate::protocol::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseMessage, McpRequest,
};
use crate::server::{ServerRequest, ServerResponse};

/// Tower layer that adds JSON-RPC 2.0 framing to an MCP service.
///
/// ```rust
/// # async fn example() -> mcp_host::Result<()> {
/// use tower::ServiceBuilder;
/// use mcp_host::{Identity, JsonRpcLayer, McpServer};
///
/// let server = McpServer::builder("my-server").build().await?;
///
/// let service = ServiceBuilder::new()
///     .layer(JsonRpcLayer::new().identity(Identity::authenticated("local")))
///     .service(server);
/// # let _ = service;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonRpcLayer {
    identity: Option<Identity>,
}

impl JsonRpcLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity attached to every request passing through the layer
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }
}

impl<S> Layer<S> for JsonRpcLayer {
    type Service = JsonRpcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JsonRpcService {
            inner,
            identity: self.identity.clone(),
        }
    }
}

/// Service that handles JSON-RPC framing.
///
/// Wraps an MCP service and handles JSON-RPC request/response conversion.
/// Supports both single requests and batch requests. Requests are anonymous
/// unless an identity is attached with [`with_identity`](Self::with_identity).
#[derive(Debug)]
pub struct JsonRpcService<S> {
    inner: S,
    identity: Option<Identity>,
}

impl<S> JsonRpcService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Process a single JSON-RPC request
    pub async fn call_single(&mut self, req: JsonRpcRequest) -> JsonRpcResponse
    where
        S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
    {
        process_single_request(self.inner.clone(), req, self.identity.clone()).await
    }

    /// Process a batch of JSON-RPC requests concurrently
    pub async fn call_batch(&mut self, requests: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>>
    where
        S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
    {
        if requests.is_empty() {
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                "Empty batch request",
            )));
        }
        Ok(process_batch(self.inner.clone(), requests, self.identity.clone()).await)
    }

    /// Process a JSON-RPC message (single or batch)
    pub async fn call_message(&mut self, msg: JsonRpcMessage) -> JsonRpcResponseMessage
    where
        S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
    {
        dispatch_message(self.inner.clone(), msg, self.identity.clone()).await
    }
}

impl<S: Clone> Clone for JsonRpcService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            identity: self.identity.clone(),
        }
    }
}

impl<S> Service<JsonRpcRequest> for JsonRpcService<S>
where
    S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = JsonRpcResponse;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: JsonRpcRequest) -> Self::Future {
        let inner = self.inner.clone();
        let identity = self.identity.clone();
        Box::pin(async move { Ok(process_single_request(inner, req, identity).await) })
    }
}

/// Service implementation for JSON-RPC batch requests
impl<S> Service<JsonRpcMessage> for JsonRpcService<S>
where
    S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = JsonRpcResponseMessage;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, msg: JsonRpcMessage) -> Self::Future {
        let inner = self.inner.clone();
        let identity = self.identity.clone();
        Box::pin(async move { Ok(dispatch_message(inner, msg, identity).await) })
    }
}

async fn dispatch_message<S>(
    inner: S,
    msg: JsonRpcMessage,
    identity: Option<Identity>,
) -> JsonRpcResponseMessage
where
    S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    match msg {
        JsonRpcMessage::Single(req) => {
            JsonRpcResponseMessage::Single(process_single_request(inner, req, identity).await)
        }
        // Empty batch is an invalid request per JSON-RPC
        JsonRpcMessage::Batch(requests) if requests.is_empty() => {
            JsonRpcResponseMessage::Single(JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request("Empty batch request"),
            ))
        }
        JsonRpcMessage::Batch(requests) => {
            JsonRpcResponseMessage::Batch(process_batch(inner, requests, identity).await)
        }
    }
}

async fn process_batch<S>(
    inner: S,
    requests: Vec<JsonRpcRequest>,
    identity: Option<Identity>,
) -> Vec<JsonRpcResponse>
where
    S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    tracing::debug!(count = requests.len(), "Processing batch request");
    let futures: Vec<_> = requests
        .into_iter()
        .map(|req| process_single_request(inner.clone(), req, identity.clone()))
        .collect();
    futures::future::join_all(futures).await
}

async fn process_single_request<S>(
    mut inner: S,
    req: JsonRpcRequest,
    identity: Option<Identity>,
) -> JsonRpcResponse
where
    S: Service<ServerRequest, Response = ServerResponse, Error = Infallible> + Send + 'static,
    S::Future: Send,
{
    if let Err(e) = req.validate() {
        return JsonRpcResponse::error(Some(req.id), e);
    }

    let mcp_request = match McpRequest::from_jsonrpc(&req) {
        Ok(r) => r,
        Err(e) => {
            return JsonRpcResponse::error(
                Some(req.id),
                JsonRpcError::invalid_params(e.to_string()),
            );
        }
    };

    let server_req = ServerRequest {
        id: req.id,
        inner: mcp_request,
        identity,
    };

    match inner.call(server_req).await {
        Ok(response) => response.into_jsonrpc(),
        Err(never) => match never {},
    }
}
