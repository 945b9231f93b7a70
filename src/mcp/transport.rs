//! Per-session protocol state machine.
//!
//! A [`SessionTransport`] owns one session's lifecycle:
//!
//! - The first message must be `initialize`; anything else is rejected and
//!   the transport is discarded without ever being registered
//! - A successful handshake registers the transport through its
//!   [`SessionObserver`] and moves it to `Active`
//! - Requests are handled one at a time, in arrival order. Each reply is a
//!   stream of zero or more notifications followed by exactly one terminal
//!   response or error
//! - If the client drops a reply stream while a tool call is in flight, or
//!   the session is closed from elsewhere (`DELETE`, shutdown), the session
//!   closes at once and the call's reply stream ends without a terminal
//!   envelope. The handler is left to finish and its result is discarded
//!
//! # Thread Safety
//!
//! The call lock is a FIFO [`tokio::sync::Mutex`], so queued requests are
//! served in the order they acquired it. Session state sits behind a short
//! synchronous lock that is never held across an await point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{ProtocolError, TransportError};
use crate::mcp::protocol::{
    IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcNotification, JsonRpcRequest,
    OutgoingMessage, OutgoingNotification, RequestId,
};
use crate::mcp::server::{McpServer, PendingCall};
use crate::mcp::session::{Session, SessionId, SessionObserver, SessionState};

/// Events buffered per reply stream before the sender waits for the client.
const REPLY_BUFFER: usize = 16;

/// A reply stream of serialised JSON-RPC messages.
pub type ReplyStream = ReceiverStream<String>;

/// What the gateway should send back for one inbound message.
#[derive(Debug)]
pub enum Reply {
    /// Stream these events, then end the response.
    Stream(ReplyStream),
    /// Acknowledge without a body (notifications and client responses).
    Accepted,
}

/// The protocol state machine for one session.
pub struct SessionTransport {
    session: Mutex<Session>,
    server: Arc<McpServer>,
    observer: Arc<dyn SessionObserver>,
    call_lock: Arc<tokio::sync::Mutex<()>>,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("session", &*self.session())
            .finish_non_exhaustive()
    }
}

impl SessionTransport {
    /// Creates an uninitialised transport.
    #[must_use]
    pub fn new(server: Arc<McpServer>, observer: Arc<dyn SessionObserver>) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(Session::new()),
            server,
            observer,
            call_lock: Arc::new(tokio::sync::Mutex::new(())),
            closed: watch::Sender::new(false),
        })
    }

    /// Returns the session id.
    ///
    /// The id is only reachable by clients once the handshake succeeds.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session().id()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    /// Returns a snapshot of the session.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.session().clone()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles one inbound message.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the message is not legal in the current
    /// state. Nothing is streamed in that case.
    pub async fn handle(self: &Arc<Self>, message: IncomingMessage) -> Result<Reply, ProtocolError> {
        let state = self.state();
        let initialize = message.is_initialize();
        match (state, message) {
            (SessionState::Closed, _) => Err(ProtocolError::SessionNotFound),

            (SessionState::Uninitialized, IncomingMessage::Request(req)) if initialize => {
                self.handshake(&req)
            }
            (SessionState::Uninitialized, message) => {
                tracing::debug!(
                    method = message.method().unwrap_or("<response>"),
                    "Rejected message before initialize"
                );
                Err(ProtocolError::NotInitialized {
                    id: message.id().cloned(),
                })
            }

            (_, IncomingMessage::Request(req)) if initialize => {
                Err(ProtocolError::AlreadyInitialized { id: Some(req.id) })
            }
            (_, IncomingMessage::Request(req)) => Ok(self.enqueue(req).await),
            (_, IncomingMessage::Notification(notif)) => {
                self.handle_notification(&notif);
                Ok(Reply::Accepted)
            }
            (_, IncomingMessage::Response(response)) => {
                tracing::debug!(session = %self.id(), id = ?response.id, "Ignoring client response");
                Ok(Reply::Accepted)
            }
        }
    }

    /// Closes the session. Idempotent.
    ///
    /// The session is removed from the registry and the reply stream of any
    /// call in flight is released at once; that call's result is discarded.
    pub fn close(&self, reason: &str) {
        let (id, was) = {
            let mut session = self.session();
            let was = session.state();
            if session.transition(SessionState::Closed).is_err() {
                return;
            }
            (session.id(), was)
        };
        self.closed.send_replace(true);

        if was != SessionState::Uninitialized {
            self.observer.on_closed(&id);
            tracing::info!(session = %id, reason, "Session closed");
        }
    }

    /// Runs the `initialize` handshake.
    fn handshake(self: &Arc<Self>, req: &JsonRpcRequest) -> Result<Reply, ProtocolError> {
        let (tx, rx) = mpsc::channel(REPLY_BUFFER);

        let (response, negotiated) = match self.server.initialize(req) {
            Ok(accepted) => accepted,
            Err(error) => {
                self.close("handshake rejected");
                let _ = try_emit(&tx, &error.into());
                return Ok(Reply::Stream(ReceiverStream::new(rx)));
            }
        };

        let id = {
            let mut session = self.session();
            if session.transition(SessionState::Initializing).is_err() {
                return Err(ProtocolError::AlreadyInitialized {
                    id: Some(req.id.clone()),
                });
            }
            session.set_protocol_version(negotiated.protocol_version.clone());
            session.id()
        };

        if let Err(e) = self.observer.on_initialized(Arc::clone(self)) {
            let error = TransportError::from(e);
            tracing::error!(session = %id, error = %error, "Failed to register session");
            // Never registered, so the observer must not hear about it.
            let _ = self.session().transition(SessionState::Closed);
            let _ = try_emit(&tx, &error.to_jsonrpc(Some(req.id.clone())).into());
            return Ok(Reply::Stream(ReceiverStream::new(rx)));
        }

        if self.session().transition(SessionState::Active).is_err() {
            // Closed concurrently between registration and activation.
            return Err(ProtocolError::SessionNotFound);
        }

        tracing::info!(
            session = %id,
            protocol_version = %negotiated.protocol_version,
            client = negotiated.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            "Session initialised"
        );

        if let Err(e) = try_emit(&tx, &response.into()) {
            self.fail(&e, None);
        }
        Ok(Reply::Stream(ReceiverStream::new(rx)))
    }

    /// Queues a request behind any request already in flight.
    async fn enqueue(self: &Arc<Self>, req: JsonRpcRequest) -> Reply {
        let permit = Arc::clone(&self.call_lock).lock_owned().await;
        let (tx, rx) = mpsc::channel(REPLY_BUFFER);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if this.state() == SessionState::Active {
                this.process(req, &tx).await;
            } else {
                let error = JsonRpcError::new(
                    Some(req.id.clone()),
                    JsonRpcErrorData::with_message(
                        ProtocolError::SessionNotFound.code(),
                        ProtocolError::SessionNotFound.to_string(),
                    ),
                );
                let _ = try_emit(&tx, &error.into());
            }
            drop(permit);
        });

        Reply::Stream(ReceiverStream::new(rx))
    }

    async fn process(&self, req: JsonRpcRequest, tx: &mpsc::Sender<String>) {
        tracing::debug!(session = %self.id(), method = %req.method, request_id = %req.id, "Handling request");

        if req.method == "tools/call" {
            match self.server.prepare_call(&req) {
                Ok(pending) => self.run_call(pending, tx).await,
                Err(error) => {
                    self.send(tx, error.into(), &req.id).await;
                }
            }
        } else {
            let reply = self.server.handle_request(&req);
            self.send(tx, reply, &req.id).await;
        }
    }

    /// Runs a validated tool call, racing it against the client going away
    /// and against the session being closed.
    async fn run_call(&self, pending: PendingCall, tx: &mpsc::Sender<String>) {
        let PendingCall {
            id,
            progress_token,
            call,
        } = pending;
        let tool = call.tool().to_string();

        if let Some(token) = progress_token {
            let started = OutgoingNotification::progress(&token, 0, Some(1), Some(tool.as_str()));
            if !self.send(tx, started.into(), &id).await {
                return;
            }
        }

        let mut closed = self.closed.subscribe();
        let mut handle = tokio::spawn(call.run());

        tokio::select! {
            joined = &mut handle => {
                let (reply, fault) = match joined {
                    Ok(result) => match McpServer::complete_call(id.clone(), &result) {
                        Ok(response) => (response.into(), None),
                        Err(e) => (e.to_jsonrpc(Some(id.clone())).into(), Some(e)),
                    },
                    Err(e) => {
                        let error = TransportError::Task(e.to_string());
                        (error.to_jsonrpc(Some(id.clone())).into(), Some(error))
                    }
                };
                self.send(tx, reply, &id).await;
                if let Some(error) = fault {
                    self.fail(&error, Some(&id));
                }
            }
            () = tx.closed() => {
                tracing::info!(session = %self.id(), tool = %tool, request_id = %id, "Client disconnected during tool call");
                self.close("connection dropped during call");
                // The handler keeps running detached; its result is discarded.
                drop(handle);
            }
            () = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                tracing::info!(session = %self.id(), tool = %tool, request_id = %id, "Session closed during tool call");
                drop(handle);
            }
        }
    }

    /// Sends one message on the reply stream. Returns `false` and tears the
    /// session down if the message could not be delivered.
    ///
    /// A closed session emits no terminal envelope; the message is dropped.
    async fn send(&self, tx: &mpsc::Sender<String>, message: OutgoingMessage, id: &RequestId) -> bool {
        if message.is_terminal() && self.state() == SessionState::Closed {
            tracing::debug!(session = %self.id(), request_id = %id, "Discarding reply for closed session");
            return false;
        }

        let data = match serde_json::to_string(&message) {
            Ok(data) => data,
            Err(e) => {
                let error = TransportError::from(e);
                self.fail(&error, Some(id));
                let fallback = OutgoingMessage::from(error.to_jsonrpc(Some(id.clone())));
                let _ = try_emit(tx, &fallback);
                return false;
            }
        };

        if tx.send(data).await.is_err() {
            self.fail(&TransportError::StreamClosed, Some(id));
            return false;
        }
        true
    }

    fn fail(&self, error: &TransportError, id: Option<&RequestId>) {
        tracing::error!(session = %self.id(), request_id = ?id, error = %error, "Transport fault");
        self.close("transport fault");
    }

    fn handle_notification(&self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                tracing::debug!(session = %self.id(), "Client confirmed initialisation");
            }
            "notifications/cancelled" => {
                let request_id = notif.params.as_ref().and_then(|p| p.get("requestId"));
                tracing::debug!(session = %self.id(), request_id = ?request_id, "Client cancelled request");
            }
            method => {
                tracing::debug!(session = %self.id(), method, "Ignoring notification");
            }
        }
    }
}

/// Serialises and enqueues `message` without waiting for buffer space.
fn try_emit(tx: &mpsc::Sender<String>, message: &OutgoingMessage) -> Result<(), TransportError> {
    let data = serde_json::to_string(message)?;
    tx.try_send(data).map_err(|_| TransportError::StreamClosed)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::Notify;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::error::HandlerError;
    use crate::mcp::protocol::parse_message;
    use crate::mcp::session::SessionRegistry;
    use crate::tools::{InputSchema, ParamSpec, ToolRegistry, ValidatedInput};

    fn message(value: Value) -> IncomingMessage {
        parse_message(value.to_string()).unwrap()
    }

    fn initialize(id: i64) -> IncomingMessage {
        message(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {"protocolVersion": "2025-03-26", "capabilities": {}}
        }))
    }

    fn call(id: i64, name: &str, arguments: Value) -> IncomingMessage {
        message(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        }))
    }

    fn server(gate: Arc<Notify>, calls: Arc<AtomicUsize>) -> Arc<McpServer> {
        let mut tools = ToolRegistry::new();
        tools
            .register(
                "echo",
                "Echoes its input",
                InputSchema::new().param("text", ParamSpec::string("text").required()),
                |input: ValidatedInput| async move { Ok(Value::Object(input)) },
            )
            .unwrap();
        tools
            .register("fail", "Always fails", InputSchema::new(), |_input: ValidatedInput| async {
                Err(HandlerError::Other("upstream down".to_string()))
            })
            .unwrap();
        tools
            .register("wait", "Waits for the gate", InputSchema::new(), move |_input: ValidatedInput| {
                let gate = Arc::clone(&gate);
                let calls = Arc::clone(&calls);
                async move {
                    gate.notified().await;
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("done"))
                }
            })
            .unwrap();
        Arc::new(McpServer::new(tools))
    }

    fn setup() -> (Arc<McpServer>, Arc<SessionRegistry>, Arc<Notify>, Arc<AtomicUsize>) {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        (
            server(Arc::clone(&gate), Arc::clone(&calls)),
            Arc::new(SessionRegistry::new()),
            gate,
            calls,
        )
    }

    async fn stream(reply: Reply) -> Vec<Value> {
        match reply {
            Reply::Stream(stream) => {
                stream
                    .filter_map(|data| serde_json::from_str(&data).ok())
                    .collect()
                    .await
            }
            Reply::Accepted => panic!("expected a stream"),
        }
    }

    async fn active(server: &Arc<McpServer>, registry: &Arc<SessionRegistry>) -> Arc<SessionTransport> {
        let transport = SessionTransport::new(Arc::clone(server), registry.clone());
        let events = stream(transport.handle(initialize(0)).await.unwrap()).await;
        assert_eq!(events[0]["result"]["protocolVersion"], "2025-03-26");
        transport
    }

    #[tokio::test]
    async fn first_message_must_be_initialize() {
        let (server, registry, _, _) = setup();
        let transport = SessionTransport::new(server, registry.clone());

        let err = transport
            .handle(call(1, "echo", json!({"text": "hi"})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::NotInitialized {
                id: Some(RequestId::Number(1))
            }
        );
        assert_eq!(transport.state(), SessionState::Uninitialized);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn handshake_registers_and_activates() {
        let (server, registry, _, _) = setup();
        let transport = active(&server, &registry).await;

        assert_eq!(transport.state(), SessionState::Active);
        assert_eq!(transport.snapshot().protocol_version(), Some("2025-03-26"));
        let found = registry.lookup(&transport.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &transport));
    }

    #[tokio::test]
    async fn rejected_handshake_creates_no_session() {
        let (server, registry, _, _) = setup();
        let transport = SessionTransport::new(server, registry.clone());

        let events = stream(
            transport
                .handle(message(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(events[0]["error"]["code"], -32602);
        assert_eq!(transport.state(), SessionState::Closed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let (server, registry, _, _) = setup();
        let transport = active(&server, &registry).await;

        let err = transport.handle(initialize(5)).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::AlreadyInitialized {
                id: Some(RequestId::Number(5))
            }
        );
        assert_eq!(transport.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn notifications_are_accepted() {
        let (server, registry, _, _) = setup();
        let transport = active(&server, &registry).await;

        let reply = transport
            .handle(message(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Accepted));
        assert_eq!(transport.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn handler_failure_keeps_session_active() {
        let (server, registry, _, _) = setup();
        let transport = active(&server, &registry).await;

        let events = stream(transport.handle(call(2, "fail", json!({}))).await.unwrap()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], 2);
        assert_eq!(events[0]["result"]["isError"], true);
        assert_eq!(transport.state(), SessionState::Active);

        let events = stream(
            transport
                .handle(call(3, "echo", json!({"text": "again"})))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(events[0]["id"], 3);
        assert!(events[0]["result"].get("isError").is_none());
    }

    #[tokio::test]
    async fn progress_token_streams_notification_first() {
        let (server, registry, _, _) = setup();
        let transport = active(&server, &registry).await;

        let events = stream(
            transport
                .handle(message(json!({
                    "jsonrpc": "2.0",
                    "id": 4,
                    "method": "tools/call",
                    "params": {
                        "name": "echo",
                        "arguments": {"text": "hi"},
                        "_meta": {"progressToken": "tok"}
                    }
                })))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["method"], "notifications/progress");
        assert_eq!(events[0]["params"]["progressToken"], "tok");
        assert_eq!(events[1]["id"], 4);
    }

    #[tokio::test]
    async fn calls_are_served_in_arrival_order() {
        let (server, registry, gate, calls) = setup();
        let transport = active(&server, &registry).await;

        let first = transport.handle(call(10, "wait", json!({}))).await.unwrap();

        let queued = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.handle(call(11, "echo", json!({"text": "x"}))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queued.is_finished());

        gate.notify_one();
        let first = stream(first).await;
        assert_eq!(first[0]["id"], 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = stream(queued.await.unwrap().unwrap()).await;
        assert_eq!(second[0]["id"], 11);
    }

    #[tokio::test]
    async fn dropped_stream_closes_session_but_handler_finishes() {
        let (server, registry, gate, calls) = setup();
        let transport = active(&server, &registry).await;

        let reply = transport.handle(call(20, "wait", json!({}))).await.unwrap();
        drop(reply);

        for _ in 0..50 {
            if transport.state() == SessionState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.state(), SessionState::Closed);
        assert!(registry.lookup(&transport.id()).is_none());

        gate.notify_one();
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = transport.handle(call(21, "echo", json!({"text": "x"}))).await.unwrap_err();
        assert_eq!(err, ProtocolError::SessionNotFound);
    }

    #[tokio::test]
    async fn close_releases_in_flight_call_without_a_reply() {
        let (server, registry, gate, calls) = setup();
        let transport = active(&server, &registry).await;

        let reply = transport.handle(call(30, "wait", json!({}))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.close_all();
        assert_eq!(transport.state(), SessionState::Closed);

        let events = tokio::time::timeout(Duration::from_secs(1), stream(reply))
            .await
            .unwrap();
        assert!(events.is_empty());

        gate.notify_one();
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_deregisters() {
        let (server, registry, _, _) = setup();
        let transport = active(&server, &registry).await;

        transport.close("terminated by client");
        transport.close("terminated by client");
        assert_eq!(transport.state(), SessionState::Closed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let (server, registry, gate, _) = setup();
        let a = active(&server, &registry).await;
        let b = active(&server, &registry).await;
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);

        let blocked = a.handle(call(1, "wait", json!({}))).await.unwrap();
        let events = stream(b.handle(call(1, "echo", json!({"text": "b"}))).await.unwrap()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], 1);

        gate.notify_one();
        let events = stream(blocked).await;
        assert_eq!(events[0]["result"]["content"][0]["text"], "\"done\"");
    }

    #[tokio::test]
    async fn close_all_closes_everything() {
        let (server, registry, _, _) = setup();
        let a = active(&server, &registry).await;
        let b = active(&server, &registry).await;

        registry.close_all();
        assert!(registry.is_empty());
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let (server, registry, _, _) = setup();
        let transport = active(&server, &registry).await;

        let err = registry
            .register(transport.id(), Arc::clone(&transport))
            .unwrap_err();
        assert!(err.to_string().contains(&transport.id().to_string()));
    }
}
