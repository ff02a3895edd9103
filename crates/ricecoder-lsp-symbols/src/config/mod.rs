//! Server startup descriptors and session settings

pub mod defaults;
pub mod loader;

pub use defaults::DefaultServers;
pub use loader::ConfigLoader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::capabilities::Capability;

/// How to start and talk to one language server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Language identifier (e.g., "rust", "python"), also sent as `languageId`
    pub language: String,
    /// File extensions this server handles, without the leading dot
    pub extensions: Vec<String>,
    /// Executable (looked up on `$PATH`)
    pub command: String,
    /// Command line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory; the project root when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Sent verbatim as `initializationOptions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
    /// Capabilities without which the session is `Degraded`
    #[serde(default = "default_required_capabilities")]
    pub required_capabilities: Vec<Capability>,
    /// Send `$/cancelRequest` for requests the caller stopped waiting on
    #[serde(default)]
    pub cancel_on_timeout: bool,
    /// Directory names skipped when walking the project
    #[serde(default)]
    pub ignored_dirs: Vec<String>,
    /// Whether this server is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_required_capabilities() -> Vec<Capability> {
    vec![Capability::DocumentSymbol]
}

fn default_true() -> bool {
    true
}

impl ServerDescriptor {
    /// Minimal descriptor for `command` serving `language`
    pub fn new<I, S>(language: impl Into<String>, command: impl Into<String>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            language: language.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            initialization_options: None,
            required_capabilities: default_required_capabilities(),
            cancel_on_timeout: false,
            ignored_dirs: Vec::new(),
            enabled: true,
        }
    }

    /// Builder-style arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a file extension (with or without the dot) belongs to this server
    pub fn handles_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.extensions
            .iter()
            .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }

    /// Whether a path belongs to this server
    pub fn handles_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| self.handles_extension(extension))
    }

    /// Whether a directory name is skipped during project walks
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        name.starts_with('.')
            || ALWAYS_IGNORED_DIRS.contains(&name)
            || self.ignored_dirs.iter().any(|ignored| ignored == name)
    }
}

/// Directories no language server wants walked
const ALWAYS_IGNORED_DIRS: &[&str] = &["node_modules", "target", "__pycache__", "build", "dist", "venv"];

/// Timeouts and fault-tolerance knobs of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Default deadline for one request
    pub request_timeout_ms: u64,
    /// Deadline for the `initialize` round trip
    pub startup_timeout_ms: u64,
    /// Deadline for each step of a graceful shutdown
    pub shutdown_timeout_ms: u64,
    /// Restarts allowed before the session stops for good
    pub max_restarts: u32,
    /// First restart delay
    pub restart_backoff_base_ms: u64,
    /// Restart delay cap
    pub restart_backoff_max_ms: u64,
    /// Consecutive malformed messages tolerated before the channel closes
    pub malformed_frame_threshold: u32,
    /// Uptime after which the restart budget is refilled
    pub stable_after_ms: u64,
    /// Events buffered per subscriber before the oldest are dropped
    pub event_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            startup_timeout_ms: 60_000,
            shutdown_timeout_ms: 2_000,
            max_restarts: 3,
            restart_backoff_base_ms: 100,
            restart_backoff_max_ms: 30_000,
            malformed_frame_threshold: 5,
            stable_after_ms: 30_000,
            event_buffer: 256,
        }
    }
}

impl SessionSettings {
    /// Default request deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Handshake deadline
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Per-step shutdown deadline
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Stability window
    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }
}

/// All configured servers plus the session settings they share
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageRegistry {
    /// Map of language to server descriptor
    #[serde(default)]
    pub servers: HashMap<String, ServerDescriptor>,
    /// Session settings; built-in defaults when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SessionSettings>,
}

impl LanguageRegistry {
    /// Effective session settings
    pub fn settings(&self) -> SessionSettings {
        self.settings.clone().unwrap_or_default()
    }

    /// Descriptor for a language, if enabled
    pub fn descriptor_for_language(&self, language: &str) -> Option<&ServerDescriptor> {
        self.servers
            .get(language)
            .filter(|descriptor| descriptor.enabled)
    }

    /// Descriptor whose extensions cover `path`.
    ///
    /// When several servers claim the extension the alphabetically first
    /// language wins so the choice is stable.
    pub fn descriptor_for_path(&self, path: &Path) -> Option<&ServerDescriptor> {
        self.servers
            .values()
            .filter(|descriptor| descriptor.enabled && descriptor.handles_path(path))
            .min_by(|a, b| a.language.cmp(&b.language))
    }

    /// Languages with an enabled server, sorted
    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self
            .servers
            .values()
            .filter(|descriptor| descriptor.enabled)
            .map(|descriptor| descriptor.language.as_str())
            .collect();
        languages.sort_unstable();
        languages
    }
}
