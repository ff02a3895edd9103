//! One language server bound to one project
//!
//! A session owns a small tokio runtime hosting the channel reader, the
//! server's stderr forwarding and a supervisor that restarts the server when
//! its connection drops. All public methods are blocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::{ensure_blocking_context, ChannelSource, SyncBridge};
use crate::client::capabilities::NegotiatedCapabilities;
use crate::client::channel::RpcChannel;
use crate::client::handshake::HandshakeManager;
use crate::client::protocol::JsonRpcNotification;
use crate::config::SessionSettings;
use crate::document::ServerGeneration;
use crate::error::{Result, SymbolsError};
use crate::events::{EventStream, ServerEvent, ServerEventKind};
use crate::process::{HealthChecker, ProcessManager, ServerLauncher};
use crate::types::{HealthStatus, Project, SessionState};

/// Worker threads of each session runtime
const RUNTIME_WORKERS: usize = 2;

struct SessionInner {
    id: Uuid,
    project: Project,
    settings: SessionSettings,
    launcher: Arc<dyn ServerLauncher>,
    process: AsyncMutex<ProcessManager>,
    channel: RwLock<Option<Arc<RpcChannel>>>,
    capabilities: RwLock<NegotiatedCapabilities>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<ServerEvent>,
    health: Mutex<HealthChecker>,
    /// Bumped on every successful handshake
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl SessionInner {
    fn language(&self) -> &str {
        self.project.language()
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) -> Result<()> {
        let mut from = None;
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        let Some(from) = from else {
            return Err(SymbolsError::InvalidState(format!(
                "cannot move from {} to {}",
                self.state(),
                next
            )));
        };

        info!(
            language = %self.language(),
            session = %self.id,
            from = %from,
            to = %next,
            "Session state changed"
        );
        let _ = self.events.send(ServerEvent::new(
            self.language(),
            ServerEventKind::StateChanged { from, to: next },
        ));
        Ok(())
    }

    /// Launch the server and run the handshake. Expects `Starting`.
    async fn boot(&self) -> Result<()> {
        let descriptor = self.project.descriptor();
        let launched = self.launcher.launch(descriptor, self.project.root())?;
        self.process.lock().await.attach(launched.process);

        let channel = RpcChannel::new(
            self.language(),
            launched.stdin,
            self.settings.malformed_frame_threshold,
        );
        let events = self.events.clone();
        let language = self.language().to_string();
        channel.on_any_notification(Arc::new(move |notification: &JsonRpcNotification| {
            let _ = events.send(ServerEvent::from_notification(&language, notification));
        }));
        channel.spawn_reader(launched.stdout);
        *self.channel.write() = Some(Arc::clone(&channel));

        if let Err(e) = self.transition(SessionState::Initializing) {
            channel.close("session left the starting state");
            self.process.lock().await.kill().await;
            return Err(e);
        }

        let negotiated = match HandshakeManager::new(&self.project, self.settings.startup_timeout())
            .perform(&channel)
            .await
        {
            Ok(negotiated) => negotiated,
            Err(e) => {
                channel.close(format!("handshake failed: {}", e));
                self.process.lock().await.kill().await;
                return Err(e);
            }
        };

        let missing = negotiated.missing(&descriptor.required_capabilities);
        *self.capabilities.write() = negotiated;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.health.lock().reset();
        self.process.lock().await.mark_ready();

        if missing.is_empty() {
            self.transition(SessionState::Ready)
        } else {
            warn!(
                language = %self.language(),
                missing = ?missing,
                "LSP server lacks required capabilities, running degraded"
            );
            self.transition(SessionState::Degraded)
        }
    }

    /// Watch the connection and restart the server when it drops
    async fn supervise(self: Arc<Self>) {
        loop {
            let Some(channel) = self.channel.read().clone() else {
                return;
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = channel.closed() => {}
            }
            if self.shutdown.is_cancelled() {
                return;
            }

            {
                let mut process = self.process.lock().await;
                process.note_uptime();
                process.try_exit_status();
                process.kill().await;
            }
            warn!(
                language = %self.language(),
                reason = %channel.close_reason().unwrap_or_default(),
                "LSP server connection lost"
            );
            if self.transition(SessionState::Crashed).is_err() {
                return;
            }

            if !self.restart_until_booted().await {
                return;
            }
        }
    }

    /// Restart with backoff until a boot succeeds. Returns false once the
    /// session stopped for good.
    async fn restart_until_booted(&self) -> bool {
        loop {
            let delay = match self.process.lock().await.prepare_restart() {
                Ok(delay) => delay,
                Err(e) => {
                    error!(
                        language = %self.language(),
                        error = %e,
                        "LSP server keeps crashing, giving up"
                    );
                    let _ = self.transition(SessionState::Stopped);
                    return false;
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.transition(SessionState::Starting).is_err() {
                return false;
            }

            match self.boot().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(language = %self.language(), error = %e, "LSP server restart failed");
                    if self.transition(SessionState::Crashed).is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Drop abandoned requests left behind by timeouts
    async fn reap(self: Arc<Self>) {
        let period = self.settings.request_timeout().max(Duration::from_millis(100));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }
            let channel = self.channel.read().clone();
            if let Some(channel) = channel {
                let reaped = channel.reap_abandoned(period);
                if reaped > 0 {
                    debug!(language = %self.language(), reaped, "Reaped abandoned requests");
                }
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let previous = self.state();
        if previous.is_terminal() {
            return Ok(());
        }
        self.transition(SessionState::ShuttingDown)?;
        self.shutdown.cancel();

        let timeout = self.settings.shutdown_timeout();
        let channel = self.channel.read().clone();
        if let Some(channel) = channel.as_ref().filter(|c| !c.is_closed()) {
            if previous.accepts_requests() {
                match channel.request("shutdown", None, timeout, false).await {
                    Ok(_) => debug!(language = %self.language(), "LSP server acknowledged shutdown"),
                    Err(e) => warn!(language = %self.language(), error = %e, "LSP shutdown request failed"),
                }
                if let Err(e) = channel.notify("exit", None).await {
                    debug!(language = %self.language(), error = %e, "Could not send exit");
                }
            }
        }

        self.process.lock().await.wait_or_kill(timeout).await;
        if let Some(channel) = channel {
            channel.close("session shut down");
        }
        info!(language = %self.language(), session = %self.id, "LSP session stopped");
        self.transition(SessionState::Stopped)
    }
}

impl ChannelSource for SessionInner {
    fn current_channel(&self) -> Option<Arc<RpcChannel>> {
        self.channel.read().clone()
    }

    fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn cancel_on_timeout(&self) -> bool {
        self.capabilities.read().cancel_support
    }

    fn record_outcome(&self, method: &str, outcome: &Result<Value>, elapsed: Duration) {
        let mut health = self.health.lock();
        match outcome {
            Ok(_) => {
                health.record_success(elapsed);
            }
            Err(SymbolsError::Timeout { .. }) => {
                let was_unhealthy = health.is_unhealthy();
                health.record_failure(format!("{} timed out", method));
                if health.is_unhealthy() && !was_unhealthy {
                    warn!(
                        language = %self.language(),
                        failures = health.failure_count(),
                        "LSP server is unresponsive"
                    );
                }
            }
            Err(_) => {}
        }
    }
}

/// A running language server session
pub struct ServerSession {
    runtime: Option<Runtime>,
    inner: Arc<SessionInner>,
    bridge: SyncBridge,
}

impl ServerSession {
    /// Launch the server for `project` and wait for its handshake.
    ///
    /// Must be called outside any async runtime.
    pub fn start(
        project: Project,
        settings: SessionSettings,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Result<Self> {
        ensure_blocking_context()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKERS)
            .thread_name(format!("lsp-{}", project.language()))
            .enable_all()
            .build()?;

        let (state, _) = watch::channel(SessionState::Starting);
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            process: AsyncMutex::new(ProcessManager::new(project.language(), settings.clone())),
            project,
            settings,
            launcher,
            channel: RwLock::new(None),
            capabilities: RwLock::new(NegotiatedCapabilities::default()),
            state,
            events,
            health: Mutex::new(HealthChecker::default()),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        info!(
            language = %inner.language(),
            session = %inner.id,
            root = %inner.project.root().display(),
            "Starting LSP session"
        );

        if let Err(e) = runtime.block_on(inner.boot()) {
            error!(language = %inner.language(), error = %e, "LSP server failed to start");
            runtime.block_on(async {
                if let Some(channel) = inner.channel.read().clone() {
                    channel.close("startup failed");
                }
                inner.process.lock().await.kill().await;
            });
            let _ = inner.transition(SessionState::Stopped);
            runtime.shutdown_background();
            return Err(e);
        }

        runtime.spawn(Arc::clone(&inner).supervise());
        runtime.spawn(Arc::clone(&inner).reap());

        let bridge = SyncBridge::new(
            runtime.handle().clone(),
            Arc::clone(&inner) as Arc<dyn ChannelSource>,
        );
        Ok(Self {
            runtime: Some(runtime),
            inner,
            bridge,
        })
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The project served
    pub fn project(&self) -> &Project {
        &self.inner.project
    }

    /// Settings the session runs with
    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Identity of the currently booted server; changes on every restart
    pub fn generation(&self) -> ServerGeneration {
        (self.inner.id, self.inner.generation.load(Ordering::SeqCst))
    }

    /// Capabilities agreed during the latest handshake
    pub fn capabilities(&self) -> NegotiatedCapabilities {
        self.inner.capabilities.read().clone()
    }

    /// Latest health status
    pub fn health(&self) -> HealthStatus {
        self.inner.health.lock().status()
    }

    /// Stream of server events from now on
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Send a request and block for its result
    pub fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        self.bridge.call(method, params, timeout)
    }

    /// [`ServerSession::call`] with the configured request timeout
    pub fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call(method, params, self.inner.settings.request_timeout())
    }

    /// Send a notification once the server is ready
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.bridge
            .notify(method, params, self.inner.settings.request_timeout())
    }

    /// Block until the state satisfies `predicate`
    pub fn wait_for(
        &self,
        predicate: impl Fn(SessionState) -> bool,
        timeout: Duration,
    ) -> Result<SessionState> {
        ensure_blocking_context()?;
        let mut state = self.inner.state.subscribe();
        let deadline = Instant::now() + timeout;

        self.handle()?.block_on(async move {
            loop {
                let current = *state.borrow_and_update();
                if predicate(current) {
                    return Ok(current);
                }
                match tokio::time::timeout_at(deadline.into(), state.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => return Err(SymbolsError::unavailable("session dropped")),
                    Err(_) => {
                        return Err(SymbolsError::Timeout {
                            method: format!("wait for session state (now {})", current),
                            timeout_ms: timeout.as_millis() as u64,
                        })
                    }
                }
            }
        })
    }

    /// Gracefully stop the server. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        ensure_blocking_context()?;
        self.handle()?.block_on(self.inner.shutdown())
    }

    fn handle(&self) -> Result<&Handle> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or_else(|| SymbolsError::unavailable("session runtime is gone"))
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        if !self.inner.state().is_terminal() {
            if ensure_blocking_context().is_ok() {
                if let Err(e) = self.shutdown() {
                    debug!(error = %e, "Shutdown on drop failed");
                }
            } else {
                self.inner.shutdown.cancel();
                if let Some(channel) = self.inner.channel.read().clone() {
                    channel.close("session dropped");
                }
            }
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.inner.id)
            .field("language", &self.inner.language())
            .field("state", &self.state())
            .finish()
    }
}
