//! Process lifecycle management

use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::error::{Result, SymbolsError};

/// Owns the server subprocess and the restart budget
pub struct ProcessManager {
    /// Language served, for log context
    language: String,
    /// Restart and backoff settings
    settings: SessionSettings,
    /// Current process handle
    process: Option<Child>,
    /// Number of restarts since the last stable period
    restart_count: u32,
    /// When the current process finished its handshake
    ready_at: Option<Instant>,
    /// Time of last restart attempt
    last_restart_attempt: Option<Instant>,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new(language: impl Into<String>, settings: SessionSettings) -> Self {
        Self {
            language: language.into(),
            settings,
            process: None,
            restart_count: 0,
            ready_at: None,
            last_restart_attempt: None,
        }
    }

    /// Take ownership of a freshly launched process
    pub fn attach(&mut self, process: Option<Child>) {
        self.process = process;
        self.ready_at = None;
    }

    /// Record that the current process completed its handshake
    pub fn mark_ready(&mut self) {
        self.ready_at = Some(Instant::now());
    }

    /// OS process id, if the server is a subprocess
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// Get the restart count
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// When the last restart was attempted
    pub fn last_restart_attempt(&self) -> Option<Instant> {
        self.last_restart_attempt
    }

    /// Poll the process for an exit status without blocking
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        let child = self.process.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(
                    language = %self.language,
                    status = %status,
                    "LSP server process exited"
                );
                self.process = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    language = %self.language,
                    error = %e,
                    "Error checking process status"
                );
                None
            }
        }
    }

    /// Refill the restart budget if the current process has been serving
    /// long enough
    pub fn note_uptime(&mut self) -> bool {
        let stable = self
            .ready_at
            .is_some_and(|started| started.elapsed() >= self.settings.stable_after());
        if stable && self.restart_count > 0 {
            debug!(
                language = %self.language,
                restart_count = self.restart_count,
                "LSP server stable, resetting restart budget"
            );
            self.restart_count = 0;
            return true;
        }
        false
    }

    /// Check if restart is allowed
    pub fn can_restart(&self) -> bool {
        self.restart_count < self.settings.max_restarts
    }

    /// Consume one restart from the budget, returning the delay before it
    pub fn prepare_restart(&mut self) -> Result<Duration> {
        if !self.can_restart() {
            return Err(SymbolsError::unavailable(format!(
                "Max restart attempts ({}) exceeded",
                self.settings.max_restarts
            )));
        }

        let backoff = calculate_exponential_backoff(
            self.restart_count,
            self.settings.restart_backoff_base_ms,
            self.settings.restart_backoff_max_ms,
        );
        self.restart_count += 1;
        self.last_restart_attempt = Some(Instant::now());

        warn!(
            language = %self.language,
            restart_count = self.restart_count,
            backoff_ms = backoff.as_millis() as u64,
            "Restarting LSP server with exponential backoff"
        );

        Ok(backoff)
    }

    /// Wait for the process to exit, killing it once `timeout` elapses
    pub async fn wait_or_kill(&mut self, timeout: Duration) {
        let Some(mut child) = self.process.take() else {
            return;
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(
                    language = %self.language,
                    status = %status,
                    "LSP server process shut down gracefully"
                );
                return;
            }
            Ok(Err(e)) => {
                warn!(
                    language = %self.language,
                    error = %e,
                    "Error waiting for LSP server process to exit"
                );
            }
            Err(_) => {
                warn!(
                    language = %self.language,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timeout waiting for LSP server process to exit, killing it"
                );
            }
        }

        if let Err(e) = child.kill().await {
            warn!(
                language = %self.language,
                error = %e,
                "Failed to kill LSP server process"
            );
        }
    }

    /// Kill the process immediately
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.kill().await {
                debug!(language = %self.language, error = %e, "Kill after exit");
            }
        }
    }
}

/// Calculate exponential backoff duration
/// Formula: min(base * 2^attempt, max_backoff)
pub fn calculate_exponential_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff_ms = base_ms
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(max_ms);

    Duration::from_millis(backoff_ms)
}
