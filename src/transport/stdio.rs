//! Stdio transport for MCP
//!
//! Reads JSON-RPC messages from stdin and writes responses and server
//! notifications to stdout. Uses line-delimited JSON format.

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::context::{NotificationReceiver, ServerNotification};
use crate::error::{Error, JsonRpcError, Result};
use crate::identity::Identity;
use crate::jsonrpc::JsonRpcService;
use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, JsonRpcResponseMessage, McpNotification,
};
use crate::server::McpServer;

/// Stdio transport for MCP servers
///
/// A stdio peer is a local process, so every request runs with one fixed
/// identity: anonymous unless set with [`with_identity`](Self::with_identity).
///
/// # Example
///
/// ```rust,no_run
/// use mcp_host::{Identity, McpServer, StdioTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = McpServer::builder("my-server").version("1.0.0").build().await?;
///
///     StdioTransport::new(server)
///         .with_identity(Identity::authenticated("local").with_roles(["admin"]))
///         .run()
///         .await?;
///     Ok(())
/// }
/// ```
pub struct StdioTransport {
    server: McpServer,
    identity: Option<Identity>,
}

impl StdioTransport {
    pub fn new(server: McpServer) -> Self {
        Self {
            server,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Run over the process's stdin and stdout until EOF
    pub async fn run(self) -> Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Run over any line-oriented reader and writer until the reader hits EOF
    ///
    /// Requests run concurrently with each other and with reading input, so
    /// a `notifications/cancelled` line reaches a handler that is still
    /// running. Responses are written as requests finish, which may not be
    /// the order they arrived in. After EOF the loop waits for the requests
    /// already accepted.
    pub async fn serve<R, W>(self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut notifications = self.server.subscribe();
        let mut service = JsonRpcService::new(self.server.clone());
        if let Some(identity) = self.identity.clone() {
            service = service.with_identity(identity);
        }
        let mut lines = reader.lines();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, JsonRpcResponseMessage>> =
            FuturesUnordered::new();
        let mut reading = true;

        tracing::info!(server = %self.server.name(), "Stdio transport started, waiting for input");

        while reading || !in_flight.is_empty() {
            tokio::select! {
                next = lines.next_line(), if reading => {
                    let next = next
                        .map_err(|e| Error::Transport(format!("Failed to read input: {}", e)))?;
                    let Some(line) = next else {
                        tracing::info!(pending = in_flight.len(), "Input closed, shutting down");
                        reading = false;
                        continue;
                    };

                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    tracing::debug!(input = %trimmed, "Received message");

                    match self.accept_line(trimmed) {
                        Ok(Some(message)) => {
                            let mut service = service.clone();
                            in_flight.push(async move { service.call_message(message).await }.boxed());
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Error processing message");
                            let error_response =
                                JsonRpcResponse::error(None, JsonRpcError::parse_error(e.to_string()));
                            write_json(&mut writer, &error_response).await?;
                        }
                    }
                }
                Some(response) = in_flight.next(), if !in_flight.is_empty() => {
                    write_json(&mut writer, &response).await?;
                }
                Some(notification) = notifications.recv() => {
                    forward_notification(&mut writer, &notification).await?;
                }
            }
        }

        drain_notifications(&mut notifications, &mut writer).await
    }

    /// Handle a notification line in place, or parse a request line for dispatch.
    fn accept_line(&self, line: &str) -> Result<Option<JsonRpcMessage>> {
        // Notifications carry no id
        let parsed: serde_json::Value = serde_json::from_str(line)?;
        if parsed.get("id").is_none()
            && let Ok(notification) = serde_json::from_value::<JsonRpcNotification>(parsed.clone())
        {
            let notification = McpNotification::from_jsonrpc(&notification)?;
            self.server.handle_notification(notification);
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(parsed)?))
    }
}

async fn drain_notifications<W>(notifications: &mut NotificationReceiver, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(notification) = notifications.try_recv() {
        forward_notification(writer, &notification).await?;
    }
    Ok(())
}

async fn forward_notification<W>(writer: &mut W, notification: &ServerNotification) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let wire = notification.to_jsonrpc()?;
    write_json(writer, &wire).await
}

async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let json = serde_json::to_string(value)
        .map_err(|e| Error::Transport(format!("Failed to serialize output: {}", e)))?;
    tracing::debug!(output = %json, "Sending message");
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| Error::Transport(format!("Failed to write output: {}", e)))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| Error::Transport(format!("Failed to write newline: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("Failed to flush output: {}", e)))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

    use super::*;
    use crate::RequestContext;
    use crate::error::ToolError;
    use crate::tool::ToolBuilder;

    async fn run_lines(transport: StdioTransport, input: &str) -> Vec<Value> {
        let (mut out_writer, mut out_reader) = tokio::io::duplex(64 * 1024);
        let reader = BufReader::new(input.as_bytes());
        transport.serve(reader, &mut out_writer).await.unwrap();
        drop(out_writer);

        let mut output = String::new();
        out_reader.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    async fn server() -> McpServer {
        let whoami = ToolBuilder::new("whoami")
            .public()
            .raw_handler(|ctx: RequestContext, _args: Value| async move {
                ctx.info("looking up caller");
                Ok::<_, ToolError>(
                    ctx.identity()
                        .and_then(|i| i.subject())
                        .unwrap_or("anonymous")
                        .to_string(),
                )
            })
            .build()
            .unwrap();
        McpServer::builder("stdio").tool(whoami).build().await.unwrap()
    }

    #[tokio::test]
    async fn test_request_response_with_fixed_identity() {
        let transport = StdioTransport::new(server().await)
            .with_identity(Identity::authenticated("local-user"));
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"whoami","arguments":{}}}"#,
            "\n",
        );

        let output = run_lines(transport, input).await;
        let response = output
            .iter()
            .find(|v| v.get("id") == Some(&json!(1)))
            .expect("response for request 1");
        assert_eq!(response["result"]["content"][0]["text"], "local-user");

        let log = output
            .iter()
            .find(|v| v["method"] == "notifications/message")
            .expect("log notification");
        assert_eq!(log["params"]["data"], "looking up caller");
        assert_eq!(log["params"]["logger"], "whoami");
    }

    #[tokio::test]
    async fn test_malformed_line_gets_parse_error() {
        let output = run_lines(StdioTransport::new(server().await), "{not json\n").await;
        assert_eq!(output.len(), 1);
        assert_eq!(output[0]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_batch() {
        let input = concat!(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","id":2,"method":"tools/list"}]"#,
            "\n"
        );
        let output = run_lines(StdioTransport::new(server().await), input).await;
        let batch = output[0].as_array().expect("batch response");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1]["result"]["tools"][0]["name"], "whoami");
    }

    async fn next_message(output: &mut Lines<BufReader<DuplexStream>>) -> Value {
        let line = output.next_line().await.unwrap().expect("output line");
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_cancel_reaches_running_request() {
        let slow = ToolBuilder::new("slow")
            .public()
            .raw_handler(|ctx: RequestContext, _args: Value| async move {
                ctx.report_progress(1.0, Some(2.0), Some("started"));
                while !ctx.is_cancelled() {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
                Err::<&str, _>(ToolError::user("cancelled"))
            })
            .build()
            .unwrap();
        let server = McpServer::builder("stdio").tool(slow).build().await.unwrap();

        let (mut input, in_reader) = tokio::io::duplex(64 * 1024);
        let (out_writer, out_reader) = tokio::io::duplex(64 * 1024);
        let serving =
            tokio::spawn(StdioTransport::new(server).serve(BufReader::new(in_reader), out_writer));
        let mut output = BufReader::new(out_reader).lines();

        input
            .write_all(concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"slow","arguments":{},"_meta":{"progressToken":"t1"}}}"#,
                "\n"
            ).as_bytes())
            .await
            .unwrap();

        // Progress is written while the handler is still running
        let progress = next_message(&mut output).await;
        assert_eq!(progress["method"], "notifications/progress");
        assert_eq!(progress["params"]["progressToken"], "t1");
        assert_eq!(progress["params"]["message"], "started");

        // Other requests are not queued behind the running one
        input
            .write_all(concat!(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n").as_bytes())
            .await
            .unwrap();
        let pong = next_message(&mut output).await;
        assert_eq!(pong["id"], 2);
        assert!(pong.get("result").is_some());

        input
            .write_all(concat!(
                r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":1,"reason":"stop"}}"#,
                "\n"
            ).as_bytes())
            .await
            .unwrap();
        let response = next_message(&mut output).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(response["result"]["content"][0]["text"], "cancelled");

        drop(input);
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_eof_waits_for_accepted_requests() {
        let delayed = ToolBuilder::new("delayed")
            .public()
            .raw_handler(|_ctx: RequestContext, _args: Value| async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok::<_, ToolError>("finished")
            })
            .build()
            .unwrap();
        let server = McpServer::builder("stdio").tool(delayed).build().await.unwrap();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"delayed","arguments":{}}}"#,
            "\n",
        );

        let output = run_lines(StdioTransport::new(server), input).await;
        assert_eq!(output.len(), 1);
        assert_eq!(output[0]["result"]["content"][0]["text"], "finished");
    }
}
