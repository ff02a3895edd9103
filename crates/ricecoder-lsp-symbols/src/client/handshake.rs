//! The initialize/initialized exchange

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::capabilities::{CapabilityNegotiator, NegotiatedCapabilities, ServerCapabilities};
use super::channel::RpcChannel;
use crate::document::path_to_uri;
use crate::error::{Result, SymbolsError};
use crate::types::Project;

/// Runs the LSP handshake for one project
pub struct HandshakeManager<'a> {
    project: &'a Project,
    timeout: Duration,
}

impl<'a> HandshakeManager<'a> {
    /// Handshake for `project`, waiting up to `timeout` for `initialize`
    pub fn new(project: &'a Project, timeout: Duration) -> Self {
        Self { project, timeout }
    }

    /// Parameters of the `initialize` request
    pub fn initialize_params(&self) -> Result<Value> {
        let root = self.project.root();
        let root_uri = path_to_uri(root)?;
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        Ok(CapabilityNegotiator::create_initialize_params(
            Some(std::process::id()),
            &root.to_string_lossy(),
            &root_uri,
            &name,
            self.project.descriptor().initialization_options.clone(),
        ))
    }

    /// Send `initialize`, record what the server offers, then send `initialized`
    pub async fn perform(&self, channel: &RpcChannel) -> Result<NegotiatedCapabilities> {
        let descriptor = self.project.descriptor();
        debug!(language = %descriptor.language, "Sending initialize");

        let result = channel
            .request("initialize", Some(self.initialize_params()?), self.timeout, false)
            .await?;

        let server_capabilities: ServerCapabilities = match result.get("capabilities") {
            Some(capabilities) => serde_json::from_value(capabilities.clone()).map_err(|e| {
                SymbolsError::ProtocolError(format!("Invalid server capabilities: {}", e))
            })?,
            None => {
                return Err(SymbolsError::ProtocolError(
                    "initialize result has no capabilities".to_string(),
                ))
            }
        };

        channel.notify("initialized", Some(json!({}))).await?;

        let negotiated =
            NegotiatedCapabilities::from_server(&server_capabilities, descriptor.cancel_on_timeout);

        let server_name = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(
            language = %descriptor.language,
            server = %server_name,
            capabilities = ?negotiated.supported(),
            text_sync = ?negotiated.text_sync,
            position_encoding = negotiated.position_encoding.as_str(),
            "LSP handshake complete"
        );

        Ok(negotiated)
    }
}
