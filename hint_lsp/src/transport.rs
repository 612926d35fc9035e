//! JSON-RPC transport layer for LSP communication.
//!
//! Frames messages with `Content-Length` headers over any async byte
//! stream. One reader task per transport resolves pending requests and
//! dispatches server notifications and requests; callers block on a
//! per-request channel.

use crate::error::TransportError;
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID (can be number or string).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// Parses a raw JSON value into a JSON-RPC message.
pub fn parse_message(value: &Value) -> Option<JsonRpcMessage> {
    let has_id = value.get("id").is_some();
    let has_method = value.get("method").is_some();

    if has_id && !has_method {
        serde_json::from_value(value.clone())
            .ok()
            .map(JsonRpcMessage::Response)
    } else if has_id && has_method {
        serde_json::from_value(value.clone())
            .ok()
            .map(JsonRpcMessage::Request)
    } else if has_method {
        serde_json::from_value(value.clone())
            .ok()
            .map(JsonRpcMessage::Notification)
    } else {
        None
    }
}

/// Write half of the transport.
pub struct TransportWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl TransportWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Sends one framed JSON-RPC message.
    pub async fn send_message(&mut self, message: &Value) -> Result<(), TransportError> {
        let content = serde_json::to_string(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", content.len());

        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(content.as_bytes()).await?;
        self.inner.flush().await?;

        log::trace!("Sent: {}", content);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Read half of the transport.
pub struct TransportReader {
    inner: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
}

impl TransportReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            inner: BufReader::new(boxed),
        }
    }

    /// Reads one framed JSON-RPC message.
    ///
    /// End of stream before any header byte is [`TransportError::Closed`];
    /// anything malformed or truncated is [`TransportError::Protocol`].
    pub async fn read_message(&mut self) -> Result<Value, TransportError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut first_line = true;

        loop {
            line.clear();
            let read = self.inner.read_line(&mut line).await?;
            if read == 0 {
                return Err(if first_line {
                    TransportError::Closed("server closed its output".to_string())
                } else {
                    TransportError::Protocol("stream ended inside a header block".to_string())
                });
            }
            first_line = false;

            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| TransportError::Protocol(format!("malformed header {:?}", header)))?;
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    TransportError::Protocol(format!("invalid Content-Length {:?}", value.trim()))
                })?;
                content_length = Some(length);
            }
        }

        let length = content_length
            .ok_or_else(|| TransportError::Protocol("missing Content-Length header".to_string()))?;

        let mut content = vec![0u8; length];
        self.inner
            .read_exact(&mut content)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => TransportError::Protocol(format!(
                    "stream ended inside a {} byte message",
                    length
                )),
                _ => TransportError::from(e),
            })?;

        let text = String::from_utf8_lossy(&content);
        log::trace!("Received: {}", text);

        serde_json::from_slice(&content)
            .map_err(|e| TransportError::Protocol(format!("invalid JSON payload: {}", e)))
    }
}

/// Handler for a server notification.
pub type NotificationHandler = Box<dyn Fn(Option<Value>) + Send + Sync>;
/// Handler for a server-to-client request; returns the result to send back.
pub type RequestHandler = Box<dyn Fn(Option<Value>) -> Value + Send + Sync>;
/// Handler for notifications nobody registered for.
pub type DefaultHandler = Box<dyn Fn(&str, Option<Value>) + Send + Sync>;

type Waiter = Sender<Result<Value, TransportError>>;

/// State shared between callers and the reader task.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<i64, Waiter>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    default_handler: RwLock<Option<DefaultHandler>>,
    closed: AtomicBool,
    close_reason: Mutex<Option<TransportError>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> TransportError {
        self.close_reason
            .lock()
            .clone()
            .unwrap_or_else(|| TransportError::Closed("transport closed".to_string()))
    }

    /// Marks the transport closed, fails every pending request and drops
    /// all handlers. Only the first reason is kept.
    fn close(&self, reason: TransportError) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.closed.store(true, Ordering::SeqCst);

        let reason = self.closed_error();
        let waiters: Vec<(i64, Waiter)> = self.pending.lock().drain().collect();
        for (id, waiter) in waiters {
            log::debug!("Failing pending request {}: {}", id, reason);
            let _ = waiter.send(Err(reason.clone()));
        }

        self.notification_handlers.write().clear();
        self.request_handlers.write().clear();
        *self.default_handler.write() = None;
    }

    fn resolve(&self, response: JsonRpcResponse) {
        let id = match response.id {
            RequestId::Number(id) => id,
            RequestId::String(other) => {
                log::error!("Response with unexpected id {:?}", other);
                return;
            }
        };
        let Some(waiter) = self.pending.lock().remove(&id) else {
            log::error!("Response for unknown request {}", id);
            return;
        };
        let outcome = match response.error {
            Some(error) => Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = waiter.send(outcome);
    }

    fn notify(&self, notification: JsonRpcNotification) {
        let handlers = self.notification_handlers.read();
        if let Some(handler) = handlers.get(&notification.method) {
            handler(notification.params);
            return;
        }
        drop(handlers);

        match self.default_handler.read().as_ref() {
            Some(handler) => handler(&notification.method, notification.params),
            None => log::trace!("Unhandled notification: {}", notification.method),
        }
    }

    fn answer(&self, method: &str, params: Option<Value>) -> Value {
        match self.request_handlers.read().get(method) {
            Some(handler) => handler(params),
            None => {
                log::debug!("Answering server request {} with null", method);
                Value::Null
            }
        }
    }
}

/// Blocking JSON-RPC endpoint over an async byte stream.
pub struct Transport {
    runtime: Handle,
    writer: Arc<tokio::sync::Mutex<TransportWriter>>,
    shared: Arc<Shared>,
    next_id: AtomicI64,
    request_timeout: Option<Duration>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Creates a transport and spawns its reader task on `runtime`.
    pub fn new<R, W>(runtime: Handle, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = Arc::new(tokio::sync::Mutex::new(TransportWriter::new(writer)));
        let shared = Arc::new(Shared::default());
        let task = runtime.spawn(read_loop(
            TransportReader::new(reader),
            Arc::clone(&shared),
            Arc::clone(&writer),
        ));

        Self {
            runtime,
            writer,
            shared,
            next_id: AtomicI64::new(1),
            request_timeout: None,
            reader_task: Mutex::new(Some(task)),
        }
    }

    /// Bounds how long [`Transport::send_request`] waits for a response.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Registers the handler for a server notification method.
    pub fn on_notification(
        &self,
        method: &str,
        handler: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) {
        self.shared
            .notification_handlers
            .write()
            .insert(method.to_string(), Box::new(handler));
    }

    /// Registers the handler for a server-to-client request method.
    pub fn on_request(
        &self,
        method: &str,
        handler: impl Fn(Option<Value>) -> Value + Send + Sync + 'static,
    ) {
        self.shared
            .request_handlers
            .write()
            .insert(method.to_string(), Box::new(handler));
    }

    /// Sets the handler for notifications without a registered handler.
    pub fn set_default_handler(&self, handler: impl Fn(&str, Option<Value>) + Send + Sync + 'static) {
        *self.shared.default_handler.write() = Some(Box::new(handler));
    }

    /// Sends a request and blocks until its response arrives, the transport
    /// closes or the request timeout elapses.
    pub fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.shared.pending.lock().insert(id, tx);

        // close() may have drained the table before the insert above.
        if self.shared.is_closed() {
            self.shared.pending.lock().remove(&id);
            return Err(self.shared.closed_error());
        }

        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        };
        if let Err(err) = serde_json::to_value(request)
            .map_err(TransportError::from)
            .and_then(|message| self.write(&message))
        {
            self.shared.pending.lock().remove(&id);
            return Err(err);
        }
        log::debug!("-> {} (id {})", method, id);

        let received = match self.request_timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => {
                    self.shared.pending.lock().remove(&id);
                    TransportError::Timeout {
                        method: method.to_string(),
                        timeout,
                    }
                }
                RecvTimeoutError::Disconnected => self.shared.closed_error(),
            }),
            None => rx.recv().map_err(|_| self.shared.closed_error()),
        };
        received?
    }

    /// Sends a notification.
    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let notification = JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        };
        self.write(&serde_json::to_value(notification)?)?;
        log::debug!("-> {}", method);
        Ok(())
    }

    /// Whether the transport has been closed by EOF, a protocol error or
    /// [`Transport::shutdown`].
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The error that closed the transport, if any.
    pub fn close_reason(&self) -> Option<TransportError> {
        self.shared.close_reason.lock().clone()
    }

    /// Closes the transport and stops the reader task. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.is_closed() {
            self.shared
                .close(TransportError::Closed("transport shut down".to_string()));
        }
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
    }

    fn write(&self, message: &Value) -> Result<(), TransportError> {
        if self.shared.is_closed() {
            return Err(self.shared.closed_error());
        }
        let result = self
            .runtime
            .block_on(async { self.writer.lock().await.send_message(message).await });
        if let Err(err) = &result {
            log::error!("Write failed, closing transport: {}", err);
            self.shared.close(err.clone());
        }
        result
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_loop(
    mut reader: TransportReader,
    shared: Arc<Shared>,
    writer: Arc<tokio::sync::Mutex<TransportWriter>>,
) {
    loop {
        match reader.read_message().await {
            Ok(message) => dispatch(message, &shared, &writer).await,
            Err(err) => {
                match &err {
                    TransportError::Closed(_) => log::info!("Language server closed its output"),
                    other => log::error!("Transport failure: {}", other),
                }
                shared.close(err);
                return;
            }
        }
    }
}

async fn dispatch(
    message: Value,
    shared: &Shared,
    writer: &tokio::sync::Mutex<TransportWriter>,
) {
    match parse_message(&message) {
        Some(JsonRpcMessage::Response(response)) => shared.resolve(response),
        Some(JsonRpcMessage::Notification(notification)) => shared.notify(notification),
        Some(JsonRpcMessage::Request(request)) => {
            let result = shared.answer(&request.method, request.params);
            let reply = JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: request.id,
                result: Some(result),
                error: None,
            };
            let sent = match serde_json::to_value(reply) {
                Ok(reply) => writer.lock().await.send_message(&reply).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = sent {
                log::warn!("Failed to answer {}: {}", request.method, err);
            }
        }
        None => log::warn!("Unrecognized message: {}", message),
    }
}
