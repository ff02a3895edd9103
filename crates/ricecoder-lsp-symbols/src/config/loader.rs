//! Configuration loading from YAML files

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{DefaultServers, LanguageRegistry};
use crate::error::{Result, SymbolsError};

/// File name of both the user and the project configuration
pub const CONFIG_FILE_NAME: &str = "lsp-symbols.yaml";

/// Directory (under the home or project root) holding ricecoder configuration
pub const CONFIG_DIR_NAME: &str = ".ricecoder";

/// Loads server configurations from YAML files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<LanguageRegistry> {
        debug!("Loading LSP symbol configuration from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| {
            SymbolsError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<LanguageRegistry> {
        let mut registry: LanguageRegistry = serde_yaml::from_str(content)
            .map_err(|e| SymbolsError::ConfigError(format!("Failed to parse YAML: {}", e)))?;

        // Extensions are stored without the leading dot.
        for descriptor in registry.servers.values_mut() {
            for extension in &mut descriptor.extensions {
                *extension = extension.trim_start_matches('.').to_string();
            }
        }

        Self::validate(&registry)?;

        info!(
            "Successfully loaded LSP symbol configuration with {} languages",
            registry.servers.len()
        );

        Ok(registry)
    }

    /// Validate configuration schema
    pub fn validate(registry: &LanguageRegistry) -> Result<()> {
        for (language, descriptor) in &registry.servers {
            if descriptor.language != *language {
                return Err(SymbolsError::InvalidConfiguration(format!(
                    "Server for language '{}' has mismatched language field: '{}'",
                    language, descriptor.language
                )));
            }

            if descriptor.command.trim().is_empty() {
                return Err(SymbolsError::InvalidConfiguration(format!(
                    "Server for language '{}' has empty command",
                    language
                )));
            }

            if descriptor.extensions.is_empty() {
                return Err(SymbolsError::InvalidConfiguration(format!(
                    "Server for language '{}' has no file extensions",
                    language
                )));
            }
        }

        if let Some(settings) = &registry.settings {
            let timeouts = [
                ("request_timeout_ms", settings.request_timeout_ms),
                ("startup_timeout_ms", settings.startup_timeout_ms),
                ("shutdown_timeout_ms", settings.shutdown_timeout_ms),
                ("restart_backoff_base_ms", settings.restart_backoff_base_ms),
            ];
            for (name, value) in timeouts {
                if value == 0 {
                    return Err(SymbolsError::InvalidConfiguration(format!(
                        "Setting {} must be greater than 0",
                        name
                    )));
                }
            }

            if settings.restart_backoff_max_ms < settings.restart_backoff_base_ms {
                return Err(SymbolsError::InvalidConfiguration(format!(
                    "restart_backoff_max_ms ({}) is below restart_backoff_base_ms ({})",
                    settings.restart_backoff_max_ms, settings.restart_backoff_base_ms
                )));
            }

            if settings.event_buffer == 0 {
                return Err(SymbolsError::InvalidConfiguration(
                    "Setting event_buffer must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Merge configurations with hierarchy: Project → User → Built-in
    pub fn merge_configs(
        project: Option<LanguageRegistry>,
        user: Option<LanguageRegistry>,
        builtin: LanguageRegistry,
    ) -> LanguageRegistry {
        let mut result = builtin;

        if let Some(user_config) = user {
            Self::merge_into(&mut result, user_config);
        }

        if let Some(project_config) = project {
            Self::merge_into(&mut result, project_config);
        }

        result
    }

    /// Merge one registry into another
    fn merge_into(target: &mut LanguageRegistry, source: LanguageRegistry) {
        for (language, descriptor) in source.servers {
            target.servers.insert(language, descriptor);
        }

        if source.settings.is_some() {
            target.settings = source.settings;
        }
    }

    /// Location of the per-user configuration file
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Location of the per-project configuration file
    pub fn project_config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
    }

    /// Load the full hierarchy for a project; missing files are skipped
    pub fn load_hierarchy(project_root: &Path) -> Result<LanguageRegistry> {
        let user = match Self::user_config_path() {
            Some(path) if path.is_file() => Some(Self::load_from_file(&path)?),
            _ => None,
        };

        let project_path = Self::project_config_path(project_root);
        let project = if project_path.is_file() {
            Some(Self::load_from_file(&project_path)?)
        } else {
            None
        };

        Ok(Self::merge_configs(project, user, DefaultServers::registry()))
    }
}
