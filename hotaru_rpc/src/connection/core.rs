//! [`NetworkConnection`]: owns one connected byte stream and runs the
//! RMI correlation engine and controller dispatcher on top of it
//! (§4.2). This is the core the rest of the crate is built around.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::Instrument;

use crate::codepage::CodePage;
use crate::config::NetworkConfig;
use crate::connection::calls::{CallOutcome, CallTable};
use crate::connection::controller::{
    Controller, ControllerRegistry, DispatchError, ProxyCache, RemoteCallDispatcher, RemoteController,
};
use crate::connection::stream::{split_connection, TcpConnectionStream};
use crate::error::{ControllerErrorKind, NetworkError, Result};
use crate::frame::Frame;
use crate::message::{ExceptionCode, InvokeRequest, InvokeResult};
use crate::serializer::Serializer;
use crate::value::WireValue;

/// The connection's lifecycle (§4.2.4). `Broken` and `Closed` both
/// drain the outstanding call table; only `Broken` carries a fatal
/// cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Established,
    Listening,
    Closing,
    Closed,
    Broken,
}

impl ConnectionState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Broken)
    }
}

enum DispatchOutcome {
    Application(Option<WireValue>),
    Handled,
}

/// An RAII deregistration handle returned by `on_*` (§9's "Event +
/// delegate surface" redesign): dropping it removes the handler.
/// Dropping it twice, or calling [`Disposer::dispose`] then dropping
/// it, is a no-op — the underlying handler list tolerates removing an
/// id that's already gone.
pub struct Disposer {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposer {
    fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self { remove: Some(Box::new(remove)) }
    }

    pub fn dispose(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

/// A small append/remove/snapshot registry of event handlers, keyed by
/// an internally assigned id so a [`Disposer`] can remove exactly the
/// handler it was issued for.
struct HandlerList<F: ?Sized> {
    next_id: AtomicU64,
    handlers: SyncRwLock<Vec<(u64, Arc<F>)>>,
}

impl<F: ?Sized> HandlerList<F> {
    fn new() -> Self {
        Self { next_id: AtomicU64::new(0), handlers: SyncRwLock::new(Vec::new()) }
    }

    fn push(&self, handler: Arc<F>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers.write().push((id, handler));
        id
    }

    fn remove(&self, id: u64) {
        self.handlers.write().retain(|(existing, _)| *existing != id);
    }

    fn snapshot(&self) -> Vec<Arc<F>> {
        self.handlers.read().iter().map(|(_, handler)| handler.clone()).collect()
    }
}

type ReceivedHandler = dyn Fn(WireValue) + Send + Sync;
type ReceivedErrorHandler = dyn Fn(NetworkError) + Send + Sync;
type ClosedHandler = dyn Fn(Option<NetworkError>) + Send + Sync;

/// Owns one connected byte stream; provides `write_object`/`read_object`/
/// `set_listening` to its host and runs the RMI engine and controller
/// dispatcher internally (§4.2.1).
pub struct NetworkConnection {
    reader: AsyncMutex<ReadHalf<TcpConnectionStream>>,
    writer: AsyncMutex<WriteHalf<TcpConnectionStream>>,
    state: SyncMutex<ConnectionState>,
    call_table: CallTable,
    controllers: ControllerRegistry,
    proxies: ProxyCache,
    config: Arc<NetworkConfig>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    listening_tx: watch::Sender<bool>,
    listening_rx: watch::Receiver<bool>,
    loop_running_tx: watch::Sender<bool>,
    loop_running_rx: watch::Receiver<bool>,
    received_handlers: HandlerList<ReceivedHandler>,
    received_error_handlers: HandlerList<ReceivedErrorHandler>,
    closed_handlers: HandlerList<ClosedHandler>,
    /// One span per connection, entered by the background receive loop
    /// and by every RMI dispatch so a `tracing-subscriber` consumer sees
    /// all of a connection's structured logs grouped together.
    span: tracing::Span,
}

impl NetworkConnection {
    /// Wraps an already-established transport (post credential
    /// exchange, §4.3) as an `Established` connection. If
    /// `config.listening` is set, background listening is started
    /// immediately, same as the host calling `set_listening(true)`
    /// right after construction.
    pub fn new(stream: TcpConnectionStream, config: Arc<NetworkConfig>) -> Arc<Self> {
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();
        let (reader, writer) = split_connection(stream);
        let (listening_tx, listening_rx) = watch::channel(false);
        let (loop_running_tx, loop_running_rx) = watch::channel(false);
        let peer_label = peer_addr.map(|addr| addr.to_string()).unwrap_or_else(|| "unknown".to_string());
        let span = tracing::info_span!("connection", peer = %peer_label);

        let connection = Arc::new(Self {
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            state: SyncMutex::new(ConnectionState::Established),
            call_table: CallTable::new(),
            controllers: ControllerRegistry::new(),
            proxies: ProxyCache::new(),
            config,
            peer_addr,
            local_addr,
            listening_tx,
            listening_rx,
            loop_running_tx,
            loop_running_rx,
            received_handlers: HandlerList::new(),
            received_error_handlers: HandlerList::new(),
            closed_handlers: HandlerList::new(),
            span,
        });

        if connection.config.listening {
            let started = connection.clone();
            tokio::spawn(async move {
                started.set_listening(true).await;
            });
        }

        connection
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &Arc<NetworkConfig> {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_listening(&self) -> bool {
        *self.listening_rx.borrow()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().is_terminal() {
            Err(NetworkError::ObjectDisposed)
        } else {
            Ok(())
        }
    }

    // -- application-level I/O (§4.2.1) --------------------------------

    /// Enqueues a single application frame (`MessageId`/`InResponseToId`
    /// both 0). A local serialization failure is reported to the
    /// caller without affecting the connection; a transport failure
    /// transitions the connection to `Broken`.
    pub async fn write_object(&self, value: WireValue) -> Result<()> {
        self.ensure_open()?;
        let frame = value.into_frame(0, 0, self.config.encoding, self.config.serializer.as_ref())?;
        self.send_frame(frame).await
    }

    /// Foreground read of the next application frame; drains and
    /// handles any RMI/control frames ahead of it (§4.2.3). Must not be
    /// called while `Listening` is on.
    pub async fn read_object(self: &Arc<Self>) -> Result<Option<WireValue>> {
        self.ensure_open()?;
        if self.is_listening() {
            return Err(NetworkError::ProtocolViolation(
                "read_object called while background listening is enabled".into(),
            ));
        }
        loop {
            match self.read_and_dispatch_one().await? {
                DispatchOutcome::Application(value) => return Ok(value),
                DispatchOutcome::Handled => continue,
            }
        }
    }

    /// Low-level single-frame write, bypassing the application
    /// serializer entirely. Used for the credential handshake (§6.2)
    /// and the RMI engine, both of which always speak JSON over the
    /// wire regardless of the connection's configured `Serializer`.
    pub(crate) async fn write_frame_raw(&self, frame: Frame) -> Result<()> {
        self.send_frame(frame).await
    }

    /// Low-level single-frame read, bypassing dispatch entirely. Used
    /// for the credential handshake before `Listening` is enabled.
    pub(crate) async fn read_frame_raw(&self) -> Result<Frame> {
        self.ensure_open()?;
        let mut reader = self.reader.lock().await;
        match Frame::read(&mut *reader).await {
            Ok(frame) => Ok(frame),
            Err(err) => {
                drop(reader);
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        let result = frame.write(&mut *writer).await;
        drop(writer);
        if let Err(err) = &result {
            self.fail(err.clone()).await;
        }
        result
    }

    // -- listening toggle (§4.2.1, §5, open question resolution) -------

    /// Turns background listening on or off. Turning it on after a
    /// prior turn-off never chains a second loop onto the first: it
    /// waits for the previous loop to observe `listening == false` and
    /// exit before spawning a fresh one. A redundant on-call while a
    /// loop is already running is a no-op — it neither stops and
    /// restarts the loop nor waits on it, since that wait would never
    /// be satisfied by a loop this same call never asked to stop.
    pub async fn set_listening(self: &Arc<Self>, enabled: bool) {
        if !enabled {
            let _ = self.listening_tx.send(false);
            return;
        }

        if self.is_listening() {
            return;
        }

        if self.ensure_open().is_err() {
            return;
        }

        let mut loop_running_rx = self.loop_running_rx.clone();
        while *loop_running_rx.borrow() {
            if loop_running_rx.changed().await.is_err() {
                break;
            }
        }

        let _ = self.loop_running_tx.send(true);
        let _ = self.listening_tx.send(true);
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Established {
                *state = ConnectionState::Listening;
            }
        }

        let connection = self.clone();
        let span = connection.span.clone();
        tokio::spawn(async move { connection.run_listen_loop().await }.instrument(span));
    }

    async fn run_listen_loop(self: Arc<Self>) {
        let mut listening_rx = self.listening_rx.clone();
        loop {
            if !*listening_rx.borrow() || self.state().is_terminal() {
                break;
            }
            match self.read_and_dispatch_one().await {
                Ok(DispatchOutcome::Application(Some(value))) => self.emit_received(value),
                Ok(DispatchOutcome::Application(None)) | Ok(DispatchOutcome::Handled) => {}
                Err(NetworkError::ConnectionBroken) => break,
                Err(_) => break,
            }
        }
        let _ = self.loop_running_tx.send(false);
    }

    // -- frame classification & RMI dispatch (§4.2.2, §4.2.3) ----------

    async fn read_and_dispatch_one(self: &Arc<Self>) -> Result<DispatchOutcome> {
        let frame = {
            let mut reader = self.reader.lock().await;
            Frame::read(&mut *reader).await
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                self.fail(err.clone()).await;
                return Err(err);
            }
        };

        let message_id = frame.message_id;
        let in_response_to_id = frame.in_response_to_id;

        if message_id == 0 && in_response_to_id == 0 {
            return self.dispatch_application_frame(frame).await;
        }

        if in_response_to_id != 0 {
            return Ok(self.dispatch_response_frame(in_response_to_id, frame));
        }

        Ok(self.dispatch_request_frame(message_id, frame).await)
    }

    async fn dispatch_application_frame(self: &Arc<Self>, frame: Frame) -> Result<DispatchOutcome> {
        match WireValue::from_frame(frame, self.config.serializer.as_ref()) {
            Ok(value) => Ok(DispatchOutcome::Application(match value {
                WireValue::Empty | WireValue::DBNull => None,
                other => Some(other),
            })),
            Err(err) => {
                // Neither correlation id is set: §4.2.3 makes this
                // fatal, since there is no RMI exchange to attribute it to.
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    fn dispatch_response_frame(&self, in_response_to_id: i32, frame: Frame) -> DispatchOutcome {
        match InvokeResult::from_frame(&frame) {
            Ok(result) => {
                self.complete_call(in_response_to_id, result);
            }
            Err(err) => {
                if !self.call_table.complete(
                    in_response_to_id,
                    CallOutcome::Exception(ControllerErrorKind::DataReceivingError(err.to_string())),
                ) {
                    tracing::warn!(id = in_response_to_id, "response for unknown or already-completed call");
                }
                self.emit_received_error(err);
            }
        }
        DispatchOutcome::Handled
    }

    async fn dispatch_request_frame(self: &Arc<Self>, message_id: i32, frame: Frame) -> DispatchOutcome {
        match InvokeRequest::from_frame(&frame) {
            Ok(request) => self.spawn_incoming_request(message_id, request),
            Err(err) => {
                let result = InvokeResult::failure(ExceptionCode::DataReceivingError, err.to_string(), String::new());
                if let Ok(reply) = result.into_frame(message_id, self.config.encoding) {
                    let _ = self.send_frame(reply).await;
                }
                self.emit_received_error(err);
            }
        }
        DispatchOutcome::Handled
    }

    fn complete_call(&self, in_response_to_id: i32, result: InvokeResult) {
        let outcome = if result.is_success() {
            CallOutcome::Result(result.result)
        } else {
            let message = result.exception_message.unwrap_or_default();
            let kind = match result.exception_code {
                ExceptionCode::Success => unreachable!("is_success() already handled"),
                ExceptionCode::OperationCancelled => ControllerErrorKind::OperationCancelled,
                ExceptionCode::DataReceivingError => ControllerErrorKind::DataReceivingError(message),
                ExceptionCode::ControllerNotFound => ControllerErrorKind::ControllerNotFound { identifier: message },
                ExceptionCode::MethodNotFound => {
                    ControllerErrorKind::MethodNotFound { identifier: String::new(), method: message }
                }
                ExceptionCode::MethodInvokeException => ControllerErrorKind::MethodInvokeException {
                    message,
                    full_exception: result.full_exception.unwrap_or_default(),
                },
            };
            CallOutcome::Exception(kind)
        };

        if !self.call_table.complete(in_response_to_id, outcome) {
            tracing::warn!(id = in_response_to_id, "response for unknown or already-completed call");
        }
    }

    fn spawn_incoming_request(self: &Arc<Self>, message_id: i32, request: InvokeRequest) {
        let connection = self.clone();
        let span = tracing::debug_span!(parent: &connection.span, "rmi_dispatch", message_id, controller = %request.controller, method = %request.method);
        tokio::spawn(
            async move {
                let result = connection.handle_invoke_request(&request).await;
                let frame = match result.into_frame(message_id, connection.config.encoding) {
                    Ok(frame) => frame,
                    Err(err) => {
                        connection.emit_received_error(err);
                        return;
                    }
                };
                if let Err(err) = connection.send_frame(frame).await {
                    connection.emit_received_error(err);
                }
            }
            .instrument(span),
        );
    }

    async fn handle_invoke_request(self: &Arc<Self>, request: &InvokeRequest) -> InvokeResult {
        let peer: Arc<dyn Any + Send + Sync> = self.clone();
        let controller = match self.controllers.resolve(&request.controller, &peer) {
            Some(controller) => controller,
            None => {
                return InvokeResult::failure(
                    ExceptionCode::ControllerNotFound,
                    format!("controller not found: {}", request.controller),
                    String::new(),
                );
            }
        };

        match controller
            .dispatch(&request.method, &request.parameter_types, request.parameters.clone())
            .await
        {
            Ok(value) => InvokeResult::success(value),
            Err(DispatchError::MethodNotFound) => InvokeResult::failure(
                ExceptionCode::MethodNotFound,
                format!("method not found: {}::{}", request.controller, request.method),
                String::new(),
            ),
            Err(DispatchError::Invoke { message, full_exception }) => {
                InvokeResult::failure(ExceptionCode::MethodInvokeException, message, full_exception)
            }
        }
    }

    // -- controllers & remote proxies (§4.2.1, §9) ----------------------

    pub fn use_instance(&self, identifier: impl Into<String>, instance: Arc<dyn Controller>) {
        self.controllers.use_instance(identifier, instance);
    }

    pub fn use_constructor(
        &self,
        identifier: impl Into<String>,
        ctor: impl Fn() -> Arc<dyn Controller> + Send + Sync + 'static,
    ) {
        self.controllers.use_constructor(identifier, ctor);
    }

    pub fn use_factory(
        &self,
        identifier: impl Into<String>,
        factory: impl Fn(Arc<dyn Any + Send + Sync>) -> Arc<dyn Controller> + Send + Sync + 'static,
    ) {
        self.controllers.use_factory(identifier, factory);
    }

    /// Returns a cached proxy handle for the remote controller named
    /// `identifier` (the statically-typed replacement for
    /// `GetController<T>()`, §9).
    pub fn get_controller(self: &Arc<Self>, identifier: &str) -> RemoteController {
        let dispatcher: Arc<dyn RemoteCallDispatcher> = self.clone();
        self.proxies.get_or_create(identifier, &dispatcher)
    }

    // -- events (§9's "Event + delegate surface" redesign) --------------

    pub fn on_received(self: &Arc<Self>, handler: impl Fn(WireValue) + Send + Sync + 'static) -> Disposer {
        let id = self.received_handlers.push(Arc::new(handler));
        let connection = self.clone();
        Disposer::new(move || connection.received_handlers.remove(id))
    }

    pub fn on_received_error(self: &Arc<Self>, handler: impl Fn(NetworkError) + Send + Sync + 'static) -> Disposer {
        let id = self.received_error_handlers.push(Arc::new(handler));
        let connection = self.clone();
        Disposer::new(move || connection.received_error_handlers.remove(id))
    }

    pub fn on_closed(self: &Arc<Self>, handler: impl Fn(Option<NetworkError>) + Send + Sync + 'static) -> Disposer {
        let id = self.closed_handlers.push(Arc::new(handler));
        let connection = self.clone();
        Disposer::new(move || connection.closed_handlers.remove(id))
    }

    fn emit_received(&self, value: WireValue) {
        for handler in self.received_handlers.snapshot() {
            handler(value.clone());
        }
    }

    fn emit_received_error(&self, err: NetworkError) {
        for handler in self.received_error_handlers.snapshot() {
            handler(err.clone());
        }
    }

    fn emit_closed(&self, err: Option<NetworkError>) {
        for handler in self.closed_handlers.snapshot() {
            handler(err.clone());
        }
    }

    // -- shutdown (§4.2.4) ----------------------------------------------

    /// Gracefully closes the connection: same draining and event
    /// sequence as a fatal failure, but with no carried exception.
    pub async fn close(&self) {
        self.transition_terminal(None).await;
    }

    async fn fail(&self, err: NetworkError) {
        self.transition_terminal(Some(err)).await;
    }

    async fn transition_terminal(&self, err: Option<NetworkError>) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = if err.is_some() { ConnectionState::Broken } else { ConnectionState::Closed };
        }

        let _ = self.listening_tx.send(false);
        self.call_table.cancel_all();

        {
            let mut writer = self.writer.lock().await;
            let _ = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await;
        }

        if let Some(err) = &err {
            tracing::error!(error = %err, "connection failed");
        }

        self.emit_closed(err);
    }
}

/// Builder for a [`NetworkConnection`], mirroring the teacher's
/// `ConnectionBuilder<P>` chain-of-setters idiom (§6.4).
#[derive(Default)]
pub struct NetworkConnectionBuilder {
    config: NetworkConfig,
}

impl NetworkConnectionBuilder {
    pub fn new() -> Self {
        Self { config: NetworkConfig::default() }
    }

    pub fn encoding(mut self, encoding: CodePage) -> Self {
        self.config.encoding = encoding;
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.config.serializer = serializer;
        self
    }

    pub fn disconnect_clients_on_dispose(mut self, value: bool) -> Self {
        self.config.disconnect_clients_on_dispose = value;
        self
    }

    pub fn listening(mut self, value: bool) -> Self {
        self.config.listening = value;
        self
    }

    pub fn build(self, stream: TcpConnectionStream) -> Arc<NetworkConnection> {
        NetworkConnection::new(stream, Arc::new(self.config))
    }
}

#[async_trait]
impl RemoteCallDispatcher for NetworkConnection {
    async fn call_raw(
        &self,
        controller: &str,
        method: &str,
        parameter_types: Vec<String>,
        parameters: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, NetworkError> {
        self.ensure_open()?;

        let id = self.call_table.allocate_id();
        let span = tracing::debug_span!(parent: &self.span, "rmi_dispatch", message_id = id, controller = %controller, method = %method);

        async {
            let rx = self.call_table.register(id);

            let request = InvokeRequest {
                controller: controller.to_string(),
                method: method.to_string(),
                parameter_types,
                parameters,
            };
            let frame = request.into_frame(id, self.config.encoding)?;

            if let Err(err) = self.send_frame(frame).await {
                self.call_table.remove(id);
                return Err(err);
            }

            match rx.await {
                Ok(CallOutcome::Result(value)) => Ok(value),
                Ok(CallOutcome::Exception(kind)) => Err(NetworkError::ControllerInvocation(kind)),
                Err(_) => Err(NetworkError::ObjectDisposed),
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::controller::DispatchError;
    use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};

    // NetworkConnection is built directly on TcpConnectionStream, so the
    // full read/write/RMI round trip is only exercisable over a real
    // socket pair; that coverage lives in tests/scenarios.rs. This module
    // only exercises the logic that doesn't need a live connection.

    #[test]
    fn connection_state_terminal_classification() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Broken.is_terminal());
        assert!(!ConnectionState::Established.is_terminal());
        assert!(!ConnectionState::Listening.is_terminal());
    }

    #[test]
    fn handler_list_remove_is_idempotent() {
        let list: HandlerList<dyn Fn() + Send + Sync> = HandlerList::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let id = list.push(Arc::new(move || {
            calls_clone.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        for handler in list.snapshot() {
            handler();
        }
        list.remove(id);
        list.remove(id);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert!(list.snapshot().is_empty());
    }

    struct Echo;

    #[async_trait]
    impl Controller for Echo {
        async fn dispatch(
            &self,
            method: &str,
            parameter_types: &[String],
            parameters: Vec<serde_json::Value>,
        ) -> std::result::Result<serde_json::Value, DispatchError> {
            if method == "Echo" && parameter_types == ["i32"] {
                Ok(parameters[0].clone())
            } else {
                Err(DispatchError::MethodNotFound)
            }
        }
    }

    #[test]
    fn echo_controller_is_constructible() {
        // Smoke-tests that `Controller` objects compose the way
        // `handle_invoke_request` expects; the full RMI round trip is
        // covered by tests/scenarios.rs over real sockets.
        let _: Arc<dyn Controller> = Arc::new(Echo);
    }
}
