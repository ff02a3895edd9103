//! Core data structures shared across the crate

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ServerDescriptor;
use crate::error::{Result, SymbolsError};

/// Lifecycle state of a server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Process is being spawned
    Starting,
    /// Process is up, handshake in flight
    Initializing,
    /// Handshake complete, all required capabilities present
    Ready,
    /// Handshake complete, some required capability missing
    Degraded,
    /// Process exited or its stream failed; a restart may follow
    Crashed,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Terminal
    Stopped,
}

impl SessionState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Stopped, _) => false,
            (ShuttingDown, Stopped) => true,
            (ShuttingDown, _) => false,
            (_, ShuttingDown) => true,
            (Starting, Initializing | Crashed | Stopped) => true,
            (Initializing, Ready | Degraded | Crashed | Stopped) => true,
            (Ready | Degraded, Crashed) => true,
            (Crashed, Starting | Stopped) => true,
            _ => false,
        }
    }

    /// Whether ordinary requests may be sent
    pub fn accepts_requests(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Degraded)
    }

    /// Whether no request will ever be served again
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::ShuttingDown)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Starting => "starting",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Crashed => "crashed",
            SessionState::ShuttingDown => "shutting-down",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Health status of a language server
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// Server is answering in time
    Healthy { latency: Duration },
    /// Server keeps missing deadlines
    Unhealthy { reason: String },
}

/// A project served by one language server
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    descriptor: ServerDescriptor,
}

impl Project {
    /// Create a project rooted at an existing directory
    pub fn new(root: impl AsRef<Path>, descriptor: ServerDescriptor) -> Result<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            SymbolsError::ConfigError(format!(
                "Project root {} is not accessible: {}",
                root.display(),
                e
            ))
        })?;
        if !root.is_dir() {
            return Err(SymbolsError::ConfigError(format!(
                "Project root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root, descriptor })
    }

    /// Absolute project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Language served
    pub fn language(&self) -> &str {
        &self.descriptor.language
    }

    /// Startup descriptor of the server
    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// Resolve a project-relative path
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.root.join(relative)
        }
    }

    /// Project-relative form of an absolute path, if it lies inside the project
    pub fn relativize(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }
}
