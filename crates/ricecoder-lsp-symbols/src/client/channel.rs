//! Request/response correlation over one server connection
//!
//! The channel owns the pending request table and a single reader task that
//! decodes frames from the server. Writes are serialized through one async
//! lock; request ids are assigned while that lock is held so ids reach the
//! wire in increasing order.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::protocol::{
    IncomingMessage, JsonRpcHandler, JsonRpcNotification, JsonRpcResponse, RequestId,
    ServerRequest, METHOD_NOT_FOUND,
};
use crate::error::{Result, SymbolsError};
use crate::transport::{encode, read_frame, BoxedReader, BoxedWriter};

/// Receiving end of a request's single-writer result slot
pub type ResponseSlot = oneshot::Receiver<Result<Value>>;

/// Callback invoked on the reader task for each matching notification.
///
/// Handlers must return quickly; anything slow belongs on another task.
pub type NotificationHandler = Arc<dyn Fn(&JsonRpcNotification) + Send + Sync>;

/// A request awaiting a response
pub struct PendingRequest {
    /// Request ID
    pub id: RequestId,
    /// Request method name
    pub method: String,
    /// Time when request was sent
    pub sent_at: Instant,
    /// Result slot, taken when the request resolves
    slot: Option<oneshot::Sender<Result<Value>>>,
    /// Set once the caller stopped waiting
    abandoned_at: Option<Instant>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
    closed: bool,
}

/// JSON-RPC channel to one language server
pub struct RpcChannel {
    /// Language served, for log context
    language: String,
    /// JSON-RPC protocol handler
    handler: JsonRpcHandler,
    /// Write half of the connection
    writer: AsyncMutex<BoxedWriter>,
    /// Pending requests awaiting responses
    pending: Mutex<PendingTable>,
    /// Per-method notification handlers
    handlers: RwLock<HashMap<String, Vec<NotificationHandler>>>,
    /// Handlers that see every notification
    catch_all: RwLock<Vec<NotificationHandler>>,
    /// Cancelled when the channel closes
    closed: CancellationToken,
    /// Why the channel closed
    close_reason: Mutex<Option<String>>,
    /// Consecutive malformed frames tolerated before closing
    malformed_frame_threshold: u32,
}

impl RpcChannel {
    /// Create a channel over the server's stdin. Call [`RpcChannel::spawn_reader`]
    /// once handlers are registered.
    pub fn new(
        language: impl Into<String>,
        writer: BoxedWriter,
        malformed_frame_threshold: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            language: language.into(),
            handler: JsonRpcHandler::new(),
            writer: AsyncMutex::new(writer),
            pending: Mutex::new(PendingTable::default()),
            handlers: RwLock::new(HashMap::new()),
            catch_all: RwLock::new(Vec::new()),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
            malformed_frame_threshold,
        })
    }

    /// Start the reader task on the current runtime
    pub fn spawn_reader(self: &Arc<Self>, reader: BoxedReader) -> tokio::task::JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move { channel.read_loop(reader).await })
    }

    /// Register a handler for one notification method
    pub fn on_notification(&self, method: impl Into<String>, handler: NotificationHandler) {
        self.handlers
            .write()
            .entry(method.into())
            .or_default()
            .push(handler);
    }

    /// Register a handler for every notification
    pub fn on_any_notification(&self, handler: NotificationHandler) {
        self.catch_all.write().push(handler);
    }

    /// Send a request, returning its id and the slot its result will land in
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(RequestId, ResponseSlot)> {
        let mut writer = self.writer.lock().await;

        let request = self.handler.create_request(method, params);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(self.unavailable());
            }
            pending.entries.insert(
                request.id,
                PendingRequest {
                    id: request.id,
                    method: request.method.clone(),
                    sent_at: Instant::now(),
                    slot: Some(tx),
                    abandoned_at: None,
                },
            );
        }

        trace!(language = %self.language, id = request.id, method = %method, "-> request");
        if let Err(e) = Self::write_message(&mut writer, &request).await {
            drop(writer);
            self.pending.lock().entries.remove(&request.id);
            self.close(format!("write failed: {}", e));
            return Err(self.unavailable());
        }

        Ok((request.id, rx))
    }

    /// Send a request and wait for its result.
    ///
    /// When `timeout` elapses the request is abandoned and, if `cancel` is
    /// set, `$/cancelRequest` is sent for it.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel: bool,
    ) -> Result<Value> {
        let (id, slot) = self.send_request(method, params).await?;

        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.unavailable()),
            Err(_) => {
                self.abandon(id);
                debug!(
                    language = %self.language,
                    id,
                    method = %method,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request abandoned after timeout"
                );
                if cancel {
                    if let Err(e) = self.cancel(id).await {
                        debug!(id, error = %e, "Could not send $/cancelRequest");
                    }
                }
                Err(SymbolsError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(self.unavailable());
        }
        let notification = self.handler.create_notification(method, params);
        trace!(language = %self.language, method = %method, "-> notification");
        self.write(&notification).await
    }

    /// Ask the server to stop working on a request
    pub async fn cancel(&self, id: RequestId) -> Result<()> {
        self.notify("$/cancelRequest", Some(json!({ "id": id }))).await
    }

    /// Answer a server-initiated request
    pub async fn respond(&self, response: JsonRpcResponse) -> Result<()> {
        trace!(language = %self.language, id = %response.id, "-> response");
        self.write(&response).await
    }

    async fn write<T: Serialize>(&self, message: &T) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = Self::write_message(&mut writer, message).await {
            drop(writer);
            self.close(format!("write failed: {}", e));
            return Err(self.unavailable());
        }
        Ok(())
    }

    async fn write_message<T: Serialize>(writer: &mut BoxedWriter, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        writer.write_all(&encode(&payload)).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Mark a request as abandoned; a late response is discarded
    pub fn abandon(&self, id: RequestId) {
        if let Some(request) = self.pending.lock().entries.get_mut(&id) {
            request.slot = None;
            request.abandoned_at.get_or_insert_with(Instant::now);
        }
    }

    /// Drop abandoned entries older than `age`, returning how many were removed
    pub fn reap_abandoned(&self, age: Duration) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.entries.len();
        pending
            .entries
            .retain(|_, request| !request.abandoned_at.is_some_and(|at| at.elapsed() >= age));
        before - pending.entries.len()
    }

    /// Number of requests in the pending table, abandoned ones included
    pub fn pending_count(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Whether the channel has closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolve once the channel has closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Why the channel closed, if it has
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Close the channel and fail every outstanding request
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut stored = self.close_reason.lock();
            if stored.is_some() {
                return;
            }
            *stored = Some(reason.clone());
        }

        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.entries.drain().map(|(_, request)| request).collect()
        };

        debug!(
            language = %self.language,
            reason = %reason,
            failed = drained.len(),
            "Closing RPC channel"
        );
        for mut request in drained {
            if let Some(slot) = request.slot.take() {
                let _ = slot.send(Err(SymbolsError::unavailable(reason.clone())));
            }
        }
        self.closed.cancel();
    }

    fn unavailable(&self) -> SymbolsError {
        SymbolsError::unavailable(
            self.close_reason()
                .unwrap_or_else(|| "channel closed".to_string()),
        )
    }

    async fn read_loop(self: Arc<Self>, reader: BoxedReader) {
        let mut reader = BufReader::new(reader);
        let mut strikes = 0u32;

        let reason = loop {
            let frame = tokio::select! {
                _ = self.closed.cancelled() => return,
                frame = read_frame(&mut reader) => frame,
            };

            let fault = match frame {
                Ok(Some(payload)) => match self.handler.parse_message(&payload) {
                    Ok(message) => {
                        strikes = 0;
                        self.dispatch(message);
                        continue;
                    }
                    Err(e) => e.to_string(),
                },
                Ok(None) => break "server closed its output stream".to_string(),
                Err(e) if e.is_recoverable() => e.to_string(),
                Err(e) => break e.to_string(),
            };

            strikes += 1;
            warn!(
                language = %self.language,
                error = %fault,
                strikes,
                "Dropping malformed message from server"
            );
            if strikes > self.malformed_frame_threshold {
                break format!("{} consecutive malformed messages", strikes);
            }
        };

        self.close(reason);
    }

    fn dispatch(self: &Arc<Self>, message: IncomingMessage) {
        match message {
            IncomingMessage::Response(response) => self.resolve(response),
            IncomingMessage::Notification(notification) => {
                trace!(language = %self.language, method = %notification.method, "<- notification");
                if let Some(handlers) = self.handlers.read().get(&notification.method) {
                    for handler in handlers {
                        handler(&notification);
                    }
                }
                for handler in self.catch_all.read().iter() {
                    handler(&notification);
                }
            }
            IncomingMessage::Request(request) => {
                trace!(language = %self.language, method = %request.method, "<- server request");
                let channel = Arc::clone(self);
                tokio::spawn(async move {
                    let response = reply_to_server_request(&request);
                    if let Err(e) = channel.respond(response).await {
                        debug!(method = %request.method, error = %e, "Could not answer server request");
                    }
                });
            }
        }
    }

    fn resolve(&self, response: JsonRpcResponse) {
        let Some(id) = response.request_id() else {
            warn!(language = %self.language, id = %response.id, "Response without a usable id");
            return;
        };

        let Some(mut request) = self.pending.lock().entries.remove(&id) else {
            warn!(language = %self.language, id, "Response for unknown request id");
            return;
        };

        trace!(
            language = %self.language,
            id,
            method = %request.method,
            elapsed_ms = request.sent_at.elapsed().as_millis() as u64,
            "<- response"
        );

        let Some(slot) = request.slot.take() else {
            debug!(id, method = %request.method, "Discarding late response to abandoned request");
            return;
        };

        let result = match response.error {
            Some(error) => Err(SymbolsError::ServerError {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = slot.send(result);
    }
}

/// The canned answer to a request the server sends us
pub fn reply_to_server_request(request: &ServerRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "workspace/configuration" => {
            let items = request
                .params
                .as_ref()
                .and_then(|params| params.get("items"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            JsonRpcResponse::success(id, Value::Array(vec![Value::Null; items]))
        }
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create" => JsonRpcResponse::success(id, Value::Null),
        "workspace/applyEdit" => JsonRpcResponse::success(id, json!({ "applied": false })),
        other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
    }
}
