//! Blocking calls into a session's async runtime
//!
//! Callers are ordinary threads. Each call parks its thread on the session
//! runtime until the request resolves or its deadline passes; unrelated
//! calls pipeline freely on the channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::trace;

use crate::client::channel::RpcChannel;
use crate::error::{Result, SymbolsError};
use crate::types::SessionState;

/// Method that may be sent before the session is ready
const CANCEL_METHOD: &str = "$/cancelRequest";

/// Where the bridge finds the live connection of a session
pub trait ChannelSource: Send + Sync {
    /// Channel of the currently booted server, if any
    fn current_channel(&self) -> Option<Arc<RpcChannel>>;

    /// Receiver following the session state
    fn subscribe_state(&self) -> watch::Receiver<SessionState>;

    /// Whether abandoned requests get `$/cancelRequest`
    fn cancel_on_timeout(&self) -> bool;

    /// Feed the result of a finished call into health tracking
    fn record_outcome(&self, method: &str, outcome: &Result<Value>, elapsed: Duration);
}

/// Fail if the current thread is driving an async runtime
pub fn ensure_blocking_context() -> Result<()> {
    if Handle::try_current().is_ok() {
        return Err(SymbolsError::InvalidState(
            "blocking call made from inside an async runtime".to_string(),
        ));
    }
    Ok(())
}

/// Synchronous facade over one session's channel
#[derive(Clone)]
pub struct SyncBridge {
    handle: Handle,
    source: Arc<dyn ChannelSource>,
}

impl SyncBridge {
    /// Bridge into the runtime behind `handle`
    pub fn new(handle: Handle, source: Arc<dyn ChannelSource>) -> Self {
        Self { handle, source }
    }

    /// Send a request and block until it resolves or `timeout` elapses.
    ///
    /// The timeout covers the wait for the session to become ready as well
    /// as the request itself.
    pub fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        ensure_blocking_context()?;
        let started = Instant::now();
        let deadline = started + timeout;
        let cancel = self.source.cancel_on_timeout();

        let result = self.handle.block_on(async {
            let channel = self.ready_channel(method, deadline, timeout).await?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            channel.request(method, params, remaining, cancel).await
        });

        let result = match result {
            Err(SymbolsError::Timeout { method, .. }) => Err(SymbolsError::Timeout {
                method,
                timeout_ms: timeout.as_millis() as u64,
            }),
            other => other,
        };

        trace!(
            method = %method,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Bridged call finished"
        );
        self.source.record_outcome(method, &result, started.elapsed());
        result
    }

    /// Send a notification once the session is ready.
    ///
    /// `$/cancelRequest` skips the readiness gate.
    pub fn notify(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<()> {
        ensure_blocking_context()?;
        let deadline = Instant::now() + timeout;

        self.handle.block_on(async {
            let channel = if method == CANCEL_METHOD {
                self.source
                    .current_channel()
                    .ok_or_else(|| SymbolsError::unavailable("no server connection"))?
            } else {
                self.ready_channel(method, deadline, timeout).await?
            };
            channel.notify(method, params).await
        })
    }

    /// Wait until the session accepts requests and return its channel
    async fn ready_channel(
        &self,
        method: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Arc<RpcChannel>> {
        let mut state = self.source.subscribe_state();
        loop {
            let current = *state.borrow_and_update();
            if current.is_terminal() {
                return Err(SymbolsError::unavailable(format!("session is {}", current)));
            }
            if current.accepts_requests() {
                if let Some(channel) = self.source.current_channel().filter(|c| !c.is_closed()) {
                    return Ok(channel);
                }
            }

            let wait = tokio::time::timeout_at(deadline.into(), state.changed()).await;
            match wait {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(SymbolsError::unavailable("session dropped")),
                Err(_) => {
                    return Err(SymbolsError::Timeout {
                        method: method.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }
    }
}
