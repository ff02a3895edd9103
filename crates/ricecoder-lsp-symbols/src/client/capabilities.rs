//! LSP capability negotiation

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::error::{Result, SymbolsError};

/// A server feature the symbol layer may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// `textDocument/documentSymbol`
    DocumentSymbol,
    /// `workspace/symbol`
    WorkspaceSymbol,
    /// `textDocument/references`
    References,
    /// `textDocument/rename`
    Rename,
    /// `textDocument/definition`
    Definition,
    /// `textDocument/didChange` with any sync kind other than none
    TextDocumentSync,
}

impl Capability {
    /// All capabilities, in a stable order
    pub const ALL: [Capability; 6] = [
        Capability::DocumentSymbol,
        Capability::WorkspaceSymbol,
        Capability::References,
        Capability::Rename,
        Capability::Definition,
        Capability::TextDocumentSync,
    ];

    /// LSP-style name of the capability
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::DocumentSymbol => "documentSymbol",
            Capability::WorkspaceSymbol => "workspaceSymbol",
            Capability::References => "references",
            Capability::Rename => "rename",
            Capability::Definition => "definition",
            Capability::TextDocumentSync => "textDocumentSync",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the server wants document changes delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextSyncKind {
    /// Server does not accept didChange
    #[default]
    None,
    /// Full text on every change
    Full,
    /// Range edits
    Incremental,
}

impl TextSyncKind {
    fn from_lsp(kind: u64) -> Self {
        match kind {
            1 => TextSyncKind::Full,
            2 => TextSyncKind::Incremental,
            _ => TextSyncKind::None,
        }
    }
}

/// Unit in which `Position.character` is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionEncoding {
    /// UTF-16 code units (the LSP default)
    #[default]
    Utf16,
    /// UTF-8 bytes
    Utf8,
}

impl PositionEncoding {
    /// Wire name of the encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionEncoding::Utf16 => "utf-16",
            PositionEncoding::Utf8 => "utf-8",
        }
    }
}

/// Client capabilities for LSP initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Text document capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_document: Option<TextDocumentClientCapabilities>,
    /// Workspace capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceClientCapabilities>,
    /// General capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub general: Option<GeneralClientCapabilities>,
}

/// Text document client capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentClientCapabilities {
    /// Synchronization capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<SynchronizationCapability>,
    /// Document symbol capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_symbol: Option<DocumentSymbolCapability>,
    /// References capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<DynamicRegistration>,
    /// Definition capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<DynamicRegistration>,
    /// Rename capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename: Option<DynamicRegistration>,
    /// Diagnostic capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_diagnostics: Option<PublishDiagnosticsCapability>,
}

/// Synchronization capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationCapability {
    /// Whether the client sends didSave notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_save: Option<bool>,
    /// Whether the client sends willSave notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_save: Option<bool>,
    /// Whether the client supports dynamic registration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_registration: Option<bool>,
}

/// Document symbol capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbolCapability {
    /// Whether the client understands `DocumentSymbol[]` trees
    pub hierarchical_document_symbol_support: bool,
    /// Symbol kinds the client understands
    pub symbol_kind: SymbolKindCapability,
}

/// Symbol kinds accepted by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolKindCapability {
    /// Accepted `SymbolKind` values
    pub value_set: Vec<u8>,
}

/// Bare dynamic registration flag shared by several request capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRegistration {
    /// Whether the client supports dynamic registration
    pub dynamic_registration: bool,
}

/// Publish diagnostics capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishDiagnosticsCapability {
    /// Whether the client supports related information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_information: Option<bool>,
}

/// Workspace client capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceClientCapabilities {
    /// Whether the client supports workspace folders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_folders: Option<bool>,
    /// Whether the client answers `workspace/configuration`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<bool>,
    /// Whether the client supports `workspace/symbol`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<DynamicRegistration>,
    /// Whether the client watches files for the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_change_watched_files: Option<DynamicRegistration>,
    /// Workspace edit capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_edit: Option<WorkspaceEditCapability>,
}

/// Workspace edit capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEditCapability {
    /// Whether versioned `documentChanges` are understood
    pub document_changes: bool,
}

/// General client capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralClientCapabilities {
    /// Position encodings the client can handle, in preference order
    pub position_encodings: Vec<String>,
}

/// Server capabilities from LSP initialization response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Definition provider capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_provider: Option<Value>,
    /// References provider capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references_provider: Option<Value>,
    /// Document symbol provider capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_symbol_provider: Option<Value>,
    /// Workspace symbol provider capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_symbol_provider: Option<Value>,
    /// Rename provider capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_provider: Option<Value>,
    /// Text document sync capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_document_sync: Option<Value>,
    /// Position encoding picked by the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_encoding: Option<String>,
}

/// `true`, an options object, or a registration object all enable a provider
fn provider_enabled(provider: &Option<Value>) -> bool {
    !matches!(provider, None | Some(Value::Null) | Some(Value::Bool(false)))
}

/// What the server agreed to during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiatedCapabilities {
    /// `textDocument/documentSymbol` supported
    pub document_symbol: bool,
    /// `workspace/symbol` supported
    pub workspace_symbol: bool,
    /// `textDocument/references` supported
    pub references: bool,
    /// `textDocument/rename` supported
    pub rename: bool,
    /// `textDocument/definition` supported
    pub definition: bool,
    /// How didChange must be sent
    pub text_sync: TextSyncKind,
    /// Whether didOpen/didClose are expected
    pub open_close: bool,
    /// Unit of `Position.character`
    pub position_encoding: PositionEncoding,
    /// Whether `$/cancelRequest` is sent for abandoned requests
    pub cancel_support: bool,
}

impl NegotiatedCapabilities {
    /// Derive the negotiated set from the server's advertised capabilities
    pub fn from_server(server: &ServerCapabilities, cancel_support: bool) -> Self {
        let (text_sync, open_close) = match &server.text_document_sync {
            Some(Value::Number(kind)) => {
                let kind = TextSyncKind::from_lsp(kind.as_u64().unwrap_or(0));
                (kind, kind != TextSyncKind::None)
            }
            Some(Value::Object(options)) => {
                let kind = options
                    .get("change")
                    .and_then(Value::as_u64)
                    .map(TextSyncKind::from_lsp)
                    .unwrap_or_default();
                let open_close = options
                    .get("openClose")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                (kind, open_close)
            }
            _ => (TextSyncKind::None, false),
        };

        let position_encoding = match server.position_encoding.as_deref() {
            Some("utf-8") => PositionEncoding::Utf8,
            _ => PositionEncoding::Utf16,
        };

        Self {
            document_symbol: provider_enabled(&server.document_symbol_provider),
            workspace_symbol: provider_enabled(&server.workspace_symbol_provider),
            references: provider_enabled(&server.references_provider),
            rename: provider_enabled(&server.rename_provider),
            definition: provider_enabled(&server.definition_provider),
            text_sync,
            open_close,
            position_encoding,
            cancel_support,
        }
    }

    /// Whether the server supports a capability
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::DocumentSymbol => self.document_symbol,
            Capability::WorkspaceSymbol => self.workspace_symbol,
            Capability::References => self.references,
            Capability::Rename => self.rename,
            Capability::Definition => self.definition,
            Capability::TextDocumentSync => self.text_sync != TextSyncKind::None,
        }
    }

    /// Fail fast when a capability is missing
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(SymbolsError::CapabilityUnsupported { capability })
        }
    }

    /// The subset of `required` the server does not support
    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        required
            .iter()
            .copied()
            .filter(|capability| !self.supports(*capability))
            .collect()
    }

    /// Get list of supported capabilities
    pub fn supported(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|capability| self.supports(*capability))
            .collect()
    }
}

/// Handles LSP capability negotiation
pub struct CapabilityNegotiator;

impl CapabilityNegotiator {
    /// Create default client capabilities for ricecoder
    pub fn default_client_capabilities() -> ClientCapabilities {
        ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(SynchronizationCapability {
                    did_save: Some(true),
                    will_save: Some(false),
                    dynamic_registration: Some(false),
                }),
                document_symbol: Some(DocumentSymbolCapability {
                    hierarchical_document_symbol_support: true,
                    symbol_kind: SymbolKindCapability {
                        value_set: (1..=26).collect(),
                    },
                }),
                references: Some(DynamicRegistration {
                    dynamic_registration: false,
                }),
                definition: Some(DynamicRegistration {
                    dynamic_registration: false,
                }),
                rename: Some(DynamicRegistration {
                    dynamic_registration: false,
                }),
                publish_diagnostics: Some(PublishDiagnosticsCapability {
                    related_information: Some(true),
                }),
            }),
            workspace: Some(WorkspaceClientCapabilities {
                workspace_folders: Some(true),
                configuration: Some(true),
                symbol: Some(DynamicRegistration {
                    dynamic_registration: false,
                }),
                did_change_watched_files: Some(DynamicRegistration {
                    dynamic_registration: false,
                }),
                workspace_edit: Some(WorkspaceEditCapability {
                    document_changes: true,
                }),
            }),
            general: Some(GeneralClientCapabilities {
                position_encodings: vec![
                    PositionEncoding::Utf16.as_str().to_string(),
                    PositionEncoding::Utf8.as_str().to_string(),
                ],
            }),
        }
    }

    /// Create initialization request parameters
    pub fn create_initialize_params(
        process_id: Option<u32>,
        root_path: &str,
        root_uri: &str,
        workspace_name: &str,
        initialization_options: Option<Value>,
    ) -> Value {
        let mut params = json!({
            "processId": process_id,
            "clientInfo": {
                "name": "ricecoder",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "locale": "en",
            "rootPath": root_path,
            "rootUri": root_uri,
            "workspaceFolders": [{ "uri": root_uri, "name": workspace_name }],
            "capabilities": Self::default_client_capabilities(),
            "trace": "off",
        });

        if let Some(options) = initialization_options {
            params["initializationOptions"] = options;
        }

        params
    }
}
