//! JSON-RPC 2.0 protocol handling

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, SymbolsError};

/// JSON-RPC 2.0 request ID for requests this client sends
pub type RequestId = u64;

/// Method not found (-32601)
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Request cancelled (-32800)
pub const REQUEST_CANCELLED: i64 = -32800;

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Request method name
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Response ID (matches request ID, `null` for unattributable errors)
    #[serde(default)]
    pub id: Value,
    /// Response result (mutually exclusive with error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Response error (mutually exclusive with result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response to a server-initiated request
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response to a server-initiated request
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// The numeric id this response answers, if it has one.
    ///
    /// Some servers echo numeric ids back as strings.
    pub fn request_id(&self) -> Option<RequestId> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 notification (request without ID)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Notification method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A request the server sends to us (ids may be strings or numbers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRequest {
    /// Server-chosen request ID, echoed back verbatim
    pub id: Value,
    /// Request method name
    pub method: String,
    /// Request parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A decoded message arriving from the server
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Response to one of our requests
    Response(JsonRpcResponse),
    /// Server notification
    Notification(JsonRpcNotification),
    /// Server-initiated request that expects a reply
    Request(ServerRequest),
}

/// Handles JSON-RPC 2.0 protocol communication
pub struct JsonRpcHandler {
    /// Next request ID to use
    next_id: AtomicU64,
}

impl JsonRpcHandler {
    /// Create a new JSON-RPC handler
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Generate the next request ID
    pub fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Create a JSON-RPC request with a fresh ID
    pub fn create_request(&self, method: impl Into<String>, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_request_id(),
            method: method.into(),
            params,
        }
    }

    /// Create a JSON-RPC notification (no response expected)
    pub fn create_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> JsonRpcNotification {
        JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }

    /// Parse a frame payload into a message
    pub fn parse_message(&self, payload: &[u8]) -> Result<IncomingMessage> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| SymbolsError::ProtocolError(format!("Failed to parse message: {}", e)))?;

        let Some(object) = value.as_object() else {
            return Err(SymbolsError::ProtocolError(
                "Message is not a JSON object".to_string(),
            ));
        };

        let has_method = object.contains_key("method");
        let has_id = object.get("id").is_some_and(|id| !id.is_null());

        let message = if has_method && has_id {
            serde_json::from_value(value).map(IncomingMessage::Request)
        } else if has_method {
            serde_json::from_value(value).map(IncomingMessage::Notification)
        } else if object.contains_key("result") || object.contains_key("error") {
            serde_json::from_value(value).map(IncomingMessage::Response)
        } else {
            return Err(SymbolsError::ProtocolError(
                "Message must be a request, response, or notification".to_string(),
            ));
        };

        message.map_err(|e| SymbolsError::ProtocolError(format!("Invalid message shape: {}", e)))
    }
}

impl Default for JsonRpcHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request() {
        let handler = JsonRpcHandler::new();
        let request = handler.create_request("initialize", Some(json!({"processId": 1234})));

        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method, "initialize");
        assert_eq!(request.id, 1);
        assert!(request.params.is_some());
    }

    #[test]
    fn test_request_id_increments() {
        let handler = JsonRpcHandler::new();
        let id1 = handler.next_request_id();
        let id2 = handler.next_request_id();
        let id3 = handler.next_request_id();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(id3, 3);
    }

    #[test]
    fn test_notification_omits_params() {
        let handler = JsonRpcHandler::new();
        let notification = handler.create_notification("exit", None);
        let json = serde_json::to_string(&notification).unwrap();

        assert_eq!(json, r#"{"jsonrpc":"2.0","method":"exit"}"#);
    }

    #[test]
    fn test_parse_response() {
        let handler = JsonRpcHandler::new();
        let message = handler
            .parse_message(br#"{"jsonrpc":"2.0","result":{"key":"value"},"id":7}"#)
            .unwrap();

        match message {
            IncomingMessage::Response(response) => {
                assert_eq!(response.request_id(), Some(7));
                assert!(response.error.is_none());
            }
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_null_result_is_response() {
        let handler = JsonRpcHandler::new();
        let message = handler
            .parse_message(br#"{"jsonrpc":"2.0","result":null,"id":"3"}"#)
            .unwrap();

        match message {
            IncomingMessage::Response(response) => assert_eq!(response.request_id(), Some(3)),
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let handler = JsonRpcHandler::new();
        let message = handler
            .parse_message(
                br#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid Request"},"id":1}"#,
            )
            .unwrap();

        match message {
            IncomingMessage::Response(response) => {
                assert_eq!(response.error.unwrap().code, -32600);
            }
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_server_request_with_string_id() {
        let handler = JsonRpcHandler::new();
        let message = handler
            .parse_message(br#"{"jsonrpc":"2.0","id":"abc","method":"workspace/configuration","params":{"items":[{}]}}"#)
            .unwrap();

        match message {
            IncomingMessage::Request(request) => {
                assert_eq!(request.id, json!("abc"));
                assert_eq!(request.method, "workspace/configuration");
            }
            other => panic!("Expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification() {
        let handler = JsonRpcHandler::new();
        let message = handler
            .parse_message(br#"{"jsonrpc":"2.0","method":"window/logMessage","params":{"type":3,"message":"hi"}}"#)
            .unwrap();

        assert!(matches!(message, IncomingMessage::Notification(n) if n.method == "window/logMessage"));
    }

    #[test]
    fn test_parse_garbage_is_protocol_error() {
        let handler = JsonRpcHandler::new();
        assert!(matches!(
            handler.parse_message(b"{not json"),
            Err(SymbolsError::ProtocolError(_))
        ));
        assert!(matches!(
            handler.parse_message(b"[1,2,3]"),
            Err(SymbolsError::ProtocolError(_))
        ));
        assert!(matches!(
            handler.parse_message(br#"{"jsonrpc":"2.0"}"#),
            Err(SymbolsError::ProtocolError(_))
        ));
    }
}
