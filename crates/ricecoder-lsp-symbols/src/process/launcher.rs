//! Starting language server processes

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

use crate::config::ServerDescriptor;
use crate::error::{Result, SymbolsError};
use crate::transport::{BoxedReader, BoxedWriter};

/// The byte streams of a started server, plus its process handle when it is
/// a real subprocess
pub struct LaunchedServer {
    /// Server's stdin
    pub stdin: BoxedWriter,
    /// Server's stdout
    pub stdout: BoxedReader,
    /// Process handle, absent for in-process servers
    pub process: Option<Child>,
}

/// Starts a language server for a project.
///
/// Called from inside the session runtime, so implementations may spawn
/// tasks.
pub trait ServerLauncher: Send + Sync {
    /// Start the server described by `descriptor` for the project at `root`
    fn launch(&self, descriptor: &ServerDescriptor, root: &Path) -> Result<LaunchedServer>;
}

/// Launches servers as child processes talking over stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioLauncher;

impl ServerLauncher for StdioLauncher {
    fn launch(&self, descriptor: &ServerDescriptor, root: &Path) -> Result<LaunchedServer> {
        let working_dir = match &descriptor.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        };

        debug!(
            language = %descriptor.language,
            command = %descriptor.command,
            args = ?descriptor.args,
            working_dir = %working_dir.display(),
            "Starting LSP server process"
        );

        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            error!(
                language = %descriptor.language,
                command = %descriptor.command,
                error = %e,
                "Failed to spawn LSP server process"
            );
            SymbolsError::SpawnFailed(e)
        })?;

        info!(
            language = %descriptor.language,
            command = %descriptor.command,
            pid = ?child.id(),
            "LSP server process spawned successfully"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SymbolsError::InvalidState("server stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SymbolsError::InvalidState("server stdout was not piped".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let language = descriptor.language.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(language = %language, "server stderr: {}", line);
                }
            });
        }

        Ok(LaunchedServer {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            process: Some(child),
        })
    }
}
