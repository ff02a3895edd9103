//! LSP client communication and protocol handling

pub mod capabilities;
pub mod channel;
pub mod handshake;
pub mod protocol;

pub use capabilities::{
    Capability, CapabilityNegotiator, ClientCapabilities, NegotiatedCapabilities,
    PositionEncoding, ServerCapabilities, TextSyncKind,
};
pub use channel::{reply_to_server_request, NotificationHandler, PendingRequest, ResponseSlot, RpcChannel};
pub use handshake::HandshakeManager;
pub use protocol::{
    IncomingMessage, JsonRpcError, JsonRpcHandler, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, ServerRequest,
};
