//! Error types for language-server-backed symbol operations

use thiserror::Error;

use crate::client::capabilities::Capability;
use crate::transport::FramingError;

/// Result type for symbol operations
pub type Result<T> = std::result::Result<T, SymbolsError>;

/// Errors surfaced by the orchestration layer
#[derive(Debug, Error)]
pub enum SymbolsError {
    /// The byte stream from the server could not be framed
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// A single message was malformed or violated JSON-RPC
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The caller's deadline elapsed; the request was abandoned, not cancelled
    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The session is permanently failed or shutting down
    #[error("Language server unavailable: {reason}")]
    ServerUnavailable { reason: String },

    /// The server did not advertise a capability the operation needs
    #[error("Language server does not support {capability}")]
    CapabilityUnsupported { capability: Capability },

    /// The symbol was fetched under an older document version
    #[error("Stale edit for {uri}: symbol captured at version {captured}, document is at {current}")]
    StaleEdit {
        uri: String,
        captured: i32,
        current: i32,
    },

    /// No symbol matched a lookup that requires one
    #[error("No symbol matching '{name_path}' found in {scope}")]
    SymbolNotFound { name_path: String, scope: String },

    /// More than one symbol matched a lookup that requires exactly one
    #[error("Found {count} symbols matching '{name_path}' in {scope}")]
    AmbiguousSymbol {
        name_path: String,
        scope: String,
        count: usize,
    },

    /// The server answered with a JSON-RPC error object
    #[error("Server error {code}: {message}")]
    ServerError { code: i64, message: String },

    /// Launching the server process failed
    #[error("Failed to spawn language server: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// An operation was attempted in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A line/column pair does not exist in the document
    #[error("Invalid position {line}:{character} in {uri}")]
    InvalidPosition {
        uri: String,
        line: u32,
        character: u32,
    },

    /// A caller-supplied argument (pattern, path, kind, line) is unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be read
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Configuration was read but is not valid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SymbolsError {
    /// Shorthand for a `ServerUnavailable` error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ServerUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SymbolsError::Timeout { .. } | SymbolsError::ProtocolError(_) | SymbolsError::StaleEdit { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SymbolsError::Timeout {
            method: "textDocument/documentSymbol".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "Request 'textDocument/documentSymbol' timed out after 250ms"
        );

        let err = SymbolsError::StaleEdit {
            uri: "file:///a.rs".to_string(),
            captured: 3,
            current: 4,
        };
        assert!(err.to_string().contains("version 3"));
        assert!(err.to_string().contains("is at 4"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(SymbolsError::ProtocolError("bad".into()).is_transient());
        assert!(!SymbolsError::unavailable("gone").is_transient());
        assert!(!SymbolsError::CapabilityUnsupported {
            capability: Capability::Rename
        }
        .is_transient());
    }
}
