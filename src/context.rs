//! Per-invocation request context.
//!
//! Every handler receives a [`RequestContext`] carrying the caller's
//! identity, the request's instance scope, progress reporting, leveled
//! logging to the client, and a cancellation flag.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn reindex(ctx: RequestContext, input: ReindexInput) -> Result<String, ToolError> {
//!     for (i, shard) in input.shards.iter().enumerate() {
//!         if ctx.is_cancelled() {
//!             return Err(ToolError::user("Reindex cancelled"));
//!         }
//!         ctx.report_progress(i as f64, Some(input.shards.len() as f64), Some(shard));
//!         ctx.debug(format!("reindexing {shard}"));
//!     }
//!     Ok("done".to_string())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::identity::Identity;
use crate::protocol::{
    JsonRpcNotification, LogLevel, LoggingMessageParams, ProgressParams, ProgressToken, RequestId,
    notifications,
};
use crate::provider::RequestScope;

/// A notification to be sent to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    /// Progress update for a request
    Progress(ProgressParams),
    /// Log message notification
    LogMessage(LoggingMessageParams),
    /// The list of available resources has changed
    ResourcesListChanged,
    /// The list of available tools has changed
    ToolsListChanged,
    /// The list of available prompts has changed
    PromptsListChanged,
}

impl ServerNotification {
    /// Wire form of this notification
    pub fn to_jsonrpc(&self) -> Result<JsonRpcNotification, serde_json::Error> {
        let notification = match self {
            Self::Progress(params) => JsonRpcNotification::new(notifications::PROGRESS)
                .with_params(serde_json::to_value(params)?),
            Self::LogMessage(params) => JsonRpcNotification::new(notifications::MESSAGE)
                .with_params(serde_json::to_value(params)?),
            Self::ResourcesListChanged => {
                JsonRpcNotification::new(notifications::RESOURCES_LIST_CHANGED)
            }
            Self::ToolsListChanged => JsonRpcNotification::new(notifications::TOOLS_LIST_CHANGED),
            Self::PromptsListChanged => {
                JsonRpcNotification::new(notifications::PROMPTS_LIST_CHANGED)
            }
        };
        Ok(notification)
    }
}

/// Sender for server notifications
pub type NotificationSender = mpsc::Sender<ServerNotification>;

/// Receiver for server notifications
pub type NotificationReceiver = mpsc::Receiver<ServerNotification>;

/// Create a new notification channel
pub fn notification_channel(buffer: usize) -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(buffer)
}

/// Context for a request
#[derive(Clone)]
pub struct RequestContext {
    request_id: RequestId,
    progress_token: Option<ProgressToken>,
    cancelled: Arc<AtomicBool>,
    notification_tx: Option<NotificationSender>,
    /// Shared with the server so `logging/setLevel` applies immediately
    min_log_level: Option<Arc<RwLock<LogLevel>>>,
    identity: Option<Arc<Identity>>,
    scope: RequestScope,
    logger: Option<String>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("progress_token", &self.progress_token)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .field("subject", &self.identity.as_ref().and_then(|i| i.subject()))
            .finish()
    }
}

impl RequestContext {
    /// Create a new request context with a fresh scope and no identity
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            progress_token: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            notification_tx: None,
            min_log_level: None,
            identity: None,
            scope: RequestScope::new(),
            logger: None,
        }
    }

    pub fn with_progress_token(mut self, token: ProgressToken) -> Self {
        self.progress_token = Some(token);
        self
    }

    pub fn with_notification_sender(mut self, tx: NotificationSender) -> Self {
        self.notification_tx = Some(tx);
        self
    }

    /// Set the minimum log level for filtering outgoing log notifications
    pub fn with_min_log_level(mut self, level: Arc<RwLock<LogLevel>>) -> Self {
        self.min_log_level = Some(level);
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Logger name attached to messages sent through [`log`](Self::log)
    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    pub(crate) fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancelled = token.cancelled;
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// The caller, if the transport identified one
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    /// Instances created for this request
    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Get a cancellation token that can be shared
    pub fn cancellation_token(&self) -> CancellationToken {
        CancellationToken {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Report progress to the client.
    ///
    /// No-op without a progress token or notification sender. Never blocks:
    /// updates are dropped if the channel is full.
    pub fn report_progress(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        let Some(token) = &self.progress_token else {
            return;
        };
        let Some(tx) = &self.notification_tx else {
            return;
        };

        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message: message.map(|s| s.to_string()),
        };

        let _ = tx.try_send(ServerNotification::Progress(params));
    }

    /// Send a log message notification to the client
    ///
    /// This is a no-op if no notification sender is configured.
    pub fn send_log(&self, params: LoggingMessageParams) {
        let Some(tx) = &self.notification_tx else {
            return;
        };

        // LogLevel orders Emergency < ... < Debug, so a message passes when
        // its ordinal is <= the minimum level's ordinal.
        if let Some(min_level) = &self.min_log_level
            && let Ok(min) = min_level.read()
            && params.level > *min
        {
            return;
        }

        let _ = tx.try_send(ServerNotification::LogMessage(params));
    }

    /// Log structured data at `level` under this context's logger name
    pub fn log(&self, level: LogLevel, data: Value) {
        let mut params = LoggingMessageParams::new(level).with_data(data);
        if let Some(logger) = &self.logger {
            params = params.with_logger(logger.clone());
        }
        self.send_log(params);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, Value::String(message.into()));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, Value::String(message.into()));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, Value::String(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, Value::String(message.into()));
    }
}

/// A token that can be used to check for cancellation
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_form() {
        let wire = ServerNotification::ToolsListChanged.to_jsonrpc().unwrap();
        assert_eq!(wire.method, "notifications/tools/list_changed");
        assert!(wire.params.is_none());

        let wire = ServerNotification::LogMessage(
            LoggingMessageParams::new(LogLevel::Warning).with_data(Value::from("disk low")),
        )
        .to_jsonrpc()
        .unwrap();
        assert_eq!(wire.method, "notifications/message");
        let params = wire.params.unwrap();
        assert_eq!(params["level"], "warning");
        assert_eq!(params["data"], "disk low");
    }

    #[test]
    fn test_cancellation() {
        let ctx = RequestContext::new(RequestId::Number(1));
        assert!(!ctx.is_cancelled());

        let token = ctx.cancellation_token();
        assert!(!token.is_cancelled());

        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_external_cancellation_token() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(RequestId::Number(1)).with_cancellation(token.clone());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_progress_reporting() {
        let (tx, mut rx) = notification_channel(10);

        let ctx = RequestContext::new(RequestId::Number(1))
            .with_progress_token(ProgressToken::Number(42))
            .with_notification_sender(tx);

        ctx.report_progress(1.0, Some(3.0), Some("first"));
        ctx.report_progress(2.0, Some(3.0), Some("second"));

        let ServerNotification::Progress(first) = rx.recv().await.unwrap() else {
            panic!("Expected Progress notification");
        };
        let ServerNotification::Progress(second) = rx.recv().await.unwrap() else {
            panic!("Expected Progress notification");
        };
        assert_eq!(first.progress, 1.0);
        assert_eq!(first.message.as_deref(), Some("first"));
        assert_eq!(second.progress, 2.0);
        assert_eq!(second.progress_token, ProgressToken::Number(42));
    }

    #[tokio::test]
    async fn test_progress_no_token() {
        let (tx, mut rx) = notification_channel(10);
        let ctx = RequestContext::new(RequestId::Number(1)).with_notification_sender(tx);

        ctx.report_progress(50.0, Some(100.0), None);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_log_filtered_by_level() {
        let (tx, mut rx) = notification_channel(10);
        let min_level = Arc::new(RwLock::new(LogLevel::Warning));

        let ctx = RequestContext::new(RequestId::Number(1))
            .with_notification_sender(tx)
            .with_min_log_level(min_level.clone());

        ctx.error("disk full");
        assert!(rx.try_recv().is_ok(), "Error should pass a Warning filter");

        ctx.warn("slow");
        assert!(rx.try_recv().is_ok(), "Warning should pass a Warning filter");

        ctx.info("hello");
        assert!(rx.try_recv().is_err(), "Info should be filtered");

        ctx.debug("details");
        assert!(rx.try_recv().is_err(), "Debug should be filtered");
    }

    #[tokio::test]
    async fn test_send_log_level_updates_dynamically() {
        let (tx, mut rx) = notification_channel(10);
        let min_level = Arc::new(RwLock::new(LogLevel::Error));

        let ctx = RequestContext::new(RequestId::Number(1))
            .with_notification_sender(tx)
            .with_min_log_level(min_level.clone());

        ctx.info("filtered");
        assert!(rx.try_recv().is_err());

        *min_level.write().unwrap() = LogLevel::Debug;

        ctx.info("passes");
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_log_uses_logger_name() {
        let (tx, mut rx) = notification_channel(10);
        let ctx = RequestContext::new(RequestId::Number(1))
            .with_notification_sender(tx)
            .with_logger("weather");

        ctx.info("fetched");

        let ServerNotification::LogMessage(params) = rx.recv().await.unwrap() else {
            panic!("Expected LogMessage notification");
        };
        assert_eq!(params.logger.as_deref(), Some("weather"));
        assert_eq!(params.data, Some(Value::String("fetched".into())));
        assert_eq!(params.level, LogLevel::Info);
    }

    #[test]
    fn test_identity() {
        let ctx = RequestContext::new(RequestId::Number(1));
        assert!(ctx.identity().is_none());

        let ctx = ctx.with_identity(Identity::authenticated("alice"));
        assert_eq!(ctx.identity().and_then(|i| i.subject()), Some("alice"));
    }
}
