//! MCP transport implementations
//!
//! A transport owns the connection, decides who the caller is, and hands
//! framed requests to the server:
//! - `stdio` - line-delimited JSON over standard input/output
//!
//! Other transports drive [`McpServer`](crate::McpServer) the same way:
//! build a [`ServerRequest`](crate::ServerRequest) carrying the caller's
//! [`Identity`](crate::Identity), or wrap the server in a
//! [`JsonRpcService`](crate::JsonRpcService) with a fixed identity.

pub mod stdio;

pub use stdio::StdioTransport;
