//! Built-in server descriptors

use std::collections::HashMap;

use serde_json::json;

use super::{LanguageRegistry, ServerDescriptor};
use crate::client::capabilities::Capability;

/// Provides descriptors for the servers ricecoder knows out of the box
pub struct DefaultServers;

impl DefaultServers {
    /// Registry containing every built-in server with default settings
    pub fn registry() -> LanguageRegistry {
        let servers = [
            Self::rust_analyzer(),
            Self::pyright(),
            Self::typescript_language_server(),
            Self::gopls(),
            Self::dart(),
        ];

        LanguageRegistry {
            servers: servers
                .into_iter()
                .map(|descriptor| (descriptor.language.clone(), descriptor))
                .collect::<HashMap<_, _>>(),
            settings: None,
        }
    }

    /// rust-analyzer
    pub fn rust_analyzer() -> ServerDescriptor {
        let mut descriptor = ServerDescriptor::new("rust", "rust-analyzer", ["rs"]);
        descriptor.initialization_options = Some(json!({
            "checkOnSave": false,
            "cargo": { "buildScripts": { "enable": false } },
            "procMacro": { "enable": false },
        }));
        descriptor.required_capabilities =
            vec![Capability::DocumentSymbol, Capability::References];
        descriptor.cancel_on_timeout = true;
        descriptor
    }

    /// Pyright
    pub fn pyright() -> ServerDescriptor {
        let mut descriptor =
            ServerDescriptor::new("python", "pyright-langserver", ["py", "pyi"]).with_args(["--stdio"]);
        descriptor.required_capabilities =
            vec![Capability::DocumentSymbol, Capability::References];
        descriptor.ignored_dirs = vec!["site-packages".to_string()];
        descriptor.cancel_on_timeout = true;
        descriptor
    }

    /// typescript-language-server
    pub fn typescript_language_server() -> ServerDescriptor {
        let mut descriptor = ServerDescriptor::new(
            "typescript",
            "typescript-language-server",
            ["ts", "tsx", "js", "jsx", "mjs", "cjs"],
        )
        .with_args(["--stdio"]);
        descriptor.required_capabilities =
            vec![Capability::DocumentSymbol, Capability::References];
        descriptor.cancel_on_timeout = true;
        descriptor
    }

    /// gopls
    pub fn gopls() -> ServerDescriptor {
        let mut descriptor = ServerDescriptor::new("go", "gopls", ["go"]).with_args(["serve"]);
        descriptor.required_capabilities =
            vec![Capability::DocumentSymbol, Capability::References];
        descriptor.ignored_dirs = vec!["vendor".to_string()];
        descriptor
    }

    /// Dart analysis server
    pub fn dart() -> ServerDescriptor {
        let mut descriptor = ServerDescriptor::new("dart", "dart", ["dart"])
            .with_args(["language-server", "--client-id", "ricecoder"]);
        descriptor.initialization_options = Some(json!({
            "onlyAnalyzeProjectsWithOpenFiles": false,
            "closingLabels": false,
            "outline": false,
            "flutterOutline": false,
        }));
        descriptor.ignored_dirs = vec![".dart_tool".to_string()];
        descriptor
    }
}
