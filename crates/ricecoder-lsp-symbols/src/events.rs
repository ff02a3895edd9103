//! Server notifications surfaced to callers

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use crate::client::protocol::JsonRpcNotification;
use crate::types::SessionState;

/// Severity of `window/logMessage` and `window/showMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
    Log,
    Debug,
}

impl MessageLevel {
    fn from_lsp(level: Option<u64>) -> Self {
        match level {
            Some(1) => MessageLevel::Error,
            Some(2) => MessageLevel::Warning,
            Some(3) => MessageLevel::Info,
            Some(5) => MessageLevel::Debug,
            _ => MessageLevel::Log,
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ServerEventKind {
    /// `textDocument/publishDiagnostics`
    Diagnostics {
        uri: String,
        version: Option<i64>,
        diagnostics: Vec<Value>,
    },
    /// `window/logMessage`
    Log { level: MessageLevel, message: String },
    /// `window/showMessage`
    ShowMessage { level: MessageLevel, message: String },
    /// Any other notification
    Notification { method: String, params: Option<Value> },
    /// Session moved between lifecycle states
    StateChanged { from: SessionState, to: SessionState },
}

/// One event from a server session
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    /// When the event was observed
    pub received_at: DateTime<Utc>,
    /// Language of the emitting session
    pub language: String,
    /// Event payload
    pub kind: ServerEventKind,
}

impl ServerEvent {
    /// Event stamped with the current time
    pub fn new(language: impl Into<String>, kind: ServerEventKind) -> Self {
        Self {
            received_at: Utc::now(),
            language: language.into(),
            kind,
        }
    }

    /// Classify a server notification
    pub fn from_notification(language: &str, notification: &JsonRpcNotification) -> Self {
        let params = notification.params.as_ref();
        let text = |key: &str| {
            params
                .and_then(|p| p.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let level = || MessageLevel::from_lsp(params.and_then(|p| p.get("type")).and_then(Value::as_u64));

        let kind = match notification.method.as_str() {
            "textDocument/publishDiagnostics" => ServerEventKind::Diagnostics {
                uri: text("uri"),
                version: params.and_then(|p| p.get("version")).and_then(Value::as_i64),
                diagnostics: params
                    .and_then(|p| p.get("diagnostics"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            },
            "window/logMessage" => ServerEventKind::Log {
                level: level(),
                message: text("message"),
            },
            "window/showMessage" => ServerEventKind::ShowMessage {
                level: level(),
                message: text("message"),
            },
            method => ServerEventKind::Notification {
                method: method.to_string(),
                params: notification.params.clone(),
            },
        };

        Self::new(language, kind)
    }
}

/// Lazily consumed stream of server events.
///
/// Iteration blocks the calling thread until the next event; it ends when the
/// session is dropped. Subscribers that fall behind lose the oldest events.
/// Must not be iterated from inside an async runtime.
pub struct EventStream {
    receiver: broadcast::Receiver<ServerEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: broadcast::Receiver<ServerEvent>) -> Self {
        Self { receiver }
    }

    /// Next buffered event, without blocking
    pub fn try_next(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event subscriber lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl Iterator for EventStream {
    type Item = ServerEvent;

    fn next(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
