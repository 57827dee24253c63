//! Error types for mcp-host

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;

/// Type-erased error used at handler, guard, and factory boundaries
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// MCP error codes in the implementation-defined server range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum McpErrorCode {
    /// Requested resource URI does not exist (or is hidden from the caller)
    ResourceNotFound = -32002,
    /// Caller is known but not allowed to use the capability
    Forbidden = -32007,
}

impl McpErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn resource_not_found(uri: &str) -> Self {
        Self {
            code: McpErrorCode::ResourceNotFound.code(),
            message: format!("Resource not found: {}", uri),
            data: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            code: McpErrorCode::Forbidden.code(),
            message: message.into(),
            data: None,
        }
    }

    /// The error a caller sees when a capability is absent or hidden from them.
    ///
    /// Both cases produce the same error, so a caller cannot tell a hidden
    /// capability from a missing one.
    pub fn unknown_capability(kind: CapabilityKind, name: &str) -> Self {
        match kind {
            CapabilityKind::Tool => {
                Self::new(ErrorCode::MethodNotFound, format!("Unknown tool: {}", name))
            }
            CapabilityKind::Prompt => Self::new(
                ErrorCode::MethodNotFound,
                format!("Unknown prompt: {}", name),
            ),
            CapabilityKind::Resource => Self::resource_not_found(name),
        }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Error raised by a capability handler.
///
/// A user-facing error carries a message intended for the caller and is
/// surfaced verbatim. Any other error is surfaced with a generic prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    message: String,
    user_facing: bool,
}

impl ToolError {
    /// An internal failure. The message is still surfaced, behind a prefix.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_facing: false,
        }
    }

    /// An error whose message is meant for the caller as-is.
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_facing: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_user_facing(&self) -> bool {
        self.user_facing
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<BoxError> for ToolError {
    fn from(err: BoxError) -> Self {
        match err.downcast::<ToolError>() {
            Ok(tool_err) => *tool_err,
            Err(other) => Self::new(other.to_string()),
        }
    }
}

impl From<Error> for ToolError {
    fn from(err: Error) -> Self {
        match err {
            Error::Tool(tool_err) => tool_err,
            other => Self::new(other.to_string()),
        }
    }
}

/// mcp-host error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("JSON-RPC error: {0}")]
    JsonRpc(JsonRpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The module graph or a capability declaration cannot be assembled.
    #[error("Composition error: {0}")]
    Composition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a user-facing handler error
    pub fn tool(message: impl Into<String>) -> Self {
        Error::Tool(ToolError::user(message))
    }

    pub fn composition(message: impl Into<String>) -> Self {
        Error::Composition(message.into())
    }

    /// Convert into the JSON-RPC error sent to the client.
    pub fn into_jsonrpc(self) -> JsonRpcError {
        match self {
            Error::JsonRpc(err) => err,
            Error::Serialization(err) => JsonRpcError::invalid_params(err.to_string()),
            other => JsonRpcError::internal_error(other.to_string()),
        }
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Error::JsonRpc(err)
    }
}

/// Result type alias for mcp-host
pub type Result<T> = std::result::Result<T, Error>;
