//! Serializable server settings.
//!
//! [`ServerConfig`] carries the settings a host usually keeps outside code.
//! Feed it to [`McpServerBuilder::from_config`](crate::McpServerBuilder::from_config):
//!
//! ```rust
//! use mcp_host::config::ServerConfig;
//!
//! let config = ServerConfig::from_json_str(r#"{
//!     "name": "billing",
//!     "version": "2.1.0",
//!     "denialBehavior": "not_found",
//!     "minLogLevel": "warning"
//! }"#).unwrap();
//! assert_eq!(config.notification_buffer, 64);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filter::DenialMode;
use crate::protocol::LogLevel;

pub(crate) const DEFAULT_VERSION: &str = "0.1.0";
pub(crate) const DEFAULT_NOTIFICATION_BUFFER: usize = 64;

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_notification_buffer() -> usize {
    DEFAULT_NOTIFICATION_BUFFER
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server name reported in `initialize`; also its key in an
    /// [`McpHost`](crate::McpHost)
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub denial_behavior: DenialMode,
    /// Capacity of each notification channel handed out by `subscribe`
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
    /// Initial minimum level for log notifications to clients
    #[serde(default)]
    pub min_log_level: LogLevel,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            instructions: None,
            denial_behavior: DenialMode::default(),
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
            min_log_level: LogLevel::default(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_json_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(config, ServerConfig::new("x"));
        assert_eq!(config.min_log_level, LogLevel::Info);
        assert_eq!(config.denial_behavior, DenialMode::Forbidden);
    }

    #[test]
    fn test_full() {
        let config = ServerConfig::from_json_str(
            r#"{
                "name": "billing",
                "version": "2.0.0",
                "instructions": "Use invoice tools",
                "denialBehavior": "not_found",
                "notificationBuffer": 8,
                "minLogLevel": "error"
            }"#,
        )
        .unwrap();
        assert_eq!(config.version, "2.0.0");
        assert_eq!(config.instructions.as_deref(), Some("Use invoice tools"));
        assert_eq!(config.denial_behavior, DenialMode::NotFound);
        assert_eq!(config.notification_buffer, 8);
        assert_eq!(config.min_log_level, LogLevel::Error);
    }

    #[test]
    fn test_missing_name_rejected() {
        assert!(ServerConfig::from_json_str("{}").is_err());
    }
}
