//! Symbol-level code intelligence backed by external Language Server Protocol servers
//!
//! This crate drives one language server per project and exposes a synchronous,
//! symbol-centric API on top of it: find symbols by name path, collect
//! references, and edit code at symbol granularity while keeping the server's
//! view of every document in step with the disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SymbolService                                  │
//! │   name paths · symbol cache · document store · structural edits         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                           ServerSession                                  │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  SyncBridge     │  │  Handshake      │  │  Supervisor             │ │
//! │  │  (blocking API) │  │  (initialize)   │  │  (crash + restart)      │ │
//! │  └────────┬────────┘  └────────┬────────┘  └────────────┬────────────┘ │
//! │           │                    │                        │              │
//! │  ┌────────▼────────────────────▼────────────────────────▼────────────┐ │
//! │  │                         RpcChannel                                 │ │
//! │  │   request ids · pending slots · notification dispatch              │ │
//! │  └───────────────────────────────┬───────────────────────────────────┘ │
//! │                                  │                                      │
//! │  ┌───────────────────────────────▼───────────────────────────────────┐ │
//! │  │        Transport framer (Content-Length) + ProcessManager          │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `transport`: Content-Length framing over the server's stdio
//! - `client`: JSON-RPC messages, the request channel, capabilities and the handshake
//! - `process`: Launching, supervising and restarting server processes
//! - `bridge`: Blocking calls into the session's async runtime
//! - `session`: One running server and its lifecycle state machine
//! - `symbols`: Symbol model, name paths, cache, queries and edits
//! - `config`: Server descriptors and session settings
//! - `error`: Error types and result types
//!
//! # Example
//!
//! ```no_run
//! use ricecoder_lsp_symbols::{FindOptions, SymbolService};
//!
//! let service = SymbolService::open("/path/to/project", "rust")?;
//! let symbols = service.find_symbol("Parser/parse", &FindOptions::default())?;
//! for symbol in &symbols {
//!     println!("{} {}", symbol.kind, symbol.name_path());
//! }
//! service.shutdown()?;
//! # Ok::<(), ricecoder_lsp_symbols::SymbolsError>(())
//! ```

pub mod bridge;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod logging;
pub mod process;
pub mod session;
pub mod symbols;
pub mod text;
pub mod transport;
pub mod types;

// Re-export public API
pub use bridge::{ChannelSource, SyncBridge};
pub use client::{
    Capability, HandshakeManager, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, NegotiatedCapabilities, PositionEncoding, RequestId, RpcChannel,
    TextSyncKind,
};
pub use config::{ConfigLoader, DefaultServers, LanguageRegistry, ServerDescriptor, SessionSettings};
pub use document::{Document, DocumentStore, ServerGeneration};
pub use error::{Result, SymbolsError};
pub use events::{EventStream, MessageLevel, ServerEvent, ServerEventKind};
pub use logging::init_logging;
pub use process::{HealthChecker, LaunchedServer, ProcessManager, ServerLauncher, StdioLauncher};
pub use session::ServerSession;
pub use symbols::{
    CacheMetrics, EditOutcome, FindOptions, NamePathPattern, Reference, ReferencingSymbol,
    RenameOutcome, SourceLine, Symbol, SymbolKind, SymbolService, SymbolTree,
};
pub use text::{Position, Range, TextEdit};
pub use types::{HealthStatus, Project, SessionState};
