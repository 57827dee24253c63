//! MCP request tracing middleware.
//!
//! [`McpTracingLayer`] wraps an [`McpServer`](crate::McpServer) (or anything
//! else serving [`ServerRequest`]) and records one `mcp.request` span per
//! request, carrying:
//! - the method (`tools/call`, `resources/read`, ...)
//! - the request id
//! - the capability name or URI, for call/read/get
//! - the caller's subject, when the transport identified one
//!
//! On completion it logs the duration and outcome. Protocol errors log at
//! `WARN`; a tool call that produced an error envelope logs at `DEBUG` so
//! handler failures stay visible without being treated as server faults.
//!
//! ```rust
//! # async fn example() -> mcp_host::Result<()> {
//! use tower::ServiceBuilder;
//! use mcp_host::{McpServer, McpTracingLayer};
//!
//! let server = McpServer::builder("traced").build().await?;
//! let service = ServiceBuilder::new()
//!     .layer(McpTracingLayer::new().level(tracing::Level::DEBUG))
//!     .service(server);
//! # let _ = service;
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::Layer;
use tower_service::Service;
use tracing::{Instrument, Level, Span};

use crate::protocol::McpResponse;
use crate::server::{ServerRequest, ServerResponse};

/// Tower layer that adds structured tracing to MCP requests.
#[derive(Debug, Clone, Copy)]
pub struct McpTracingLayer {
    level: Level,
}

impl Default for McpTracingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl McpTracingLayer {
    /// Spans and completion logs at `INFO`
    pub fn new() -> Self {
        Self { level: Level::INFO }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl<S> Layer<S> for McpTracingLayer {
    type Service = McpTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        McpTracingService {
            inner,
            level: self.level,
        }
    }
}

/// Created by [`McpTracingLayer`].
#[derive(Debug, Clone)]
pub struct McpTracingService<S> {
    inner: S,
    level: Level,
}

impl<S> Service<ServerRequest> for McpTracingService<S>
where
    S: Service<ServerRequest, Response = ServerResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = ServerResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<ServerResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ServerRequest) -> Self::Future {
        let method = req.inner.method_name().to_string();
        let span = request_span(
            self.level,
            &method,
            &req.id.to_string(),
            req.inner.capability_name(),
            req.identity.as_ref().and_then(|i| i.subject()),
        );

        let start = Instant::now();
        let fut = self.inner.call(req);
        let level = self.level;

        Box::pin(
            async move {
                let result = fut.await;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                if let Ok(response) = &result {
                    match &response.inner {
                        Ok(McpResponse::CallTool(call)) if call.is_error => {
                            tracing::debug!(
                                method = %method,
                                duration_ms,
                                "Capability returned an error result"
                            );
                        }
                        Ok(_) => log_success(level, &method, duration_ms),
                        Err(err) => {
                            tracing::warn!(
                                method = %method,
                                error_code = err.code,
                                error_message = %err.message,
                                duration_ms,
                                "MCP request failed"
                            );
                        }
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

// Span and event levels must be known at the callsite, hence one arm per level.
fn request_span(
    level: Level,
    method: &str,
    request_id: &str,
    capability: Option<&str>,
    subject: Option<&str>,
) -> Span {
    macro_rules! span_at {
        ($mac:ident) => {
            tracing::$mac!(
                "mcp.request",
                method = %method,
                request_id = %request_id,
                capability = capability,
                subject = subject,
            )
        };
    }

    match level {
        Level::TRACE => span_at!(trace_span),
        Level::DEBUG => span_at!(debug_span),
        Level::INFO => span_at!(info_span),
        Level::WARN => span_at!(warn_span),
        Level::ERROR => span_at!(error_span),
    }
}

fn log_success(level: Level, method: &str, duration_ms: f64) {
    macro_rules! completed_at {
        ($mac:ident) => {
            tracing::$mac!(method = %method, duration_ms, "MCP request completed")
        };
    }

    match level {
        Level::TRACE => completed_at!(trace),
        Level::DEBUG => completed_at!(debug),
        Level::INFO => completed_at!(info),
        Level::WARN => completed_at!(warn),
        Level::ERROR => completed_at!(error),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tower::{ServiceBuilder, ServiceExt};

    use super::*;
    use crate::McpServer;
    use crate::error::ToolError;
    use crate::identity::Identity;
    use crate::protocol::{CallToolParams, McpRequest};
    use crate::tool::ToolBuilder;

    #[test]
    fn test_layer_creation() {
        assert_eq!(McpTracingLayer::new().level, Level::INFO);
        assert_eq!(McpTracingLayer::new().level(Level::DEBUG).level, Level::DEBUG);
    }

    #[tokio::test]
    async fn test_traced_service_passes_responses_through() {
        let fail = ToolBuilder::new("fail")
            .public()
            .raw_handler(|_ctx, _args: Value| async move {
                Err::<String, _>(ToolError::user("nope"))
            })
            .build()
            .unwrap();
        let server = McpServer::builder("traced").tool(fail).build().await.unwrap();
        let service = ServiceBuilder::new()
            .layer(McpTracingLayer::new())
            .service(server);

        let response = service
            .clone()
            .oneshot(
                ServerRequest::new(
                    1,
                    McpRequest::CallTool(CallToolParams {
                        name: "fail".to_string(),
                        arguments: json!({}),
                        meta: None,
                    }),
                )
                .with_identity(Identity::authenticated("carol")),
            )
            .await
            .unwrap();
        let Ok(McpResponse::CallTool(result)) = response.inner else {
            panic!("expected call result");
        };
        assert!(result.is_error);

        let response = service
            .oneshot(ServerRequest::new(2, McpRequest::Unknown {
                method: "nope/nope".to_string(),
                params: None,
            }))
            .await
            .unwrap();
        assert!(response.inner.is_err());
    }
}
