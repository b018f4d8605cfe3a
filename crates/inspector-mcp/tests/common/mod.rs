//! Scriptable in-process MCP server for session tests.

#![allow(dead_code)]

use async_trait::async_trait;
use inspector_mcp::protocol::{
    error_codes, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId,
    PROTOCOL_VERSION,
};
use inspector_mcp::transport::EventSender;
use inspector_mcp::{
    ClientHandler, ConnectionStatus, Connector, McpError, McpResult, PendingOutcome,
    PendingRequest, ServerConfig, SessionManager, Transport, TransportEvent,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the mock server answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error(i64, String),
    /// Never answer.
    Ignore,
}

type Script = Arc<dyn Fn(&JsonRpcRequest) -> Option<Reply> + Send + Sync>;

#[derive(Default)]
struct ServerState {
    events: Option<EventSender>,
    sent: Vec<JsonRpcMessage>,
    headers: Vec<HashMap<String, String>>,
    transports: Vec<Arc<MockTransport>>,
}

/// Connector whose transports talk to a scripted server.
///
/// Requests not covered by the script get the default answers: a successful
/// initialize, `{}` for ping and the method-not-found error for the rest.
#[derive(Clone)]
pub struct MockServer {
    script: Script,
    state: Arc<Mutex<ServerState>>,
    auth_failures: Arc<AtomicUsize>,
    required_token: Option<String>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            script: Arc::new(|_| None),
            state: Arc::new(Mutex::new(ServerState::default())),
            auth_failures: Arc::new(AtomicUsize::new(0)),
            required_token: None,
        }
    }

    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&JsonRpcRequest) -> Option<Reply> + Send + Sync + 'static,
    {
        self.script = Arc::new(script);
        self
    }

    /// Refuse to open until a request carries `Authorization: Bearer {token}`.
    pub fn requiring_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    pub fn manager(&self, handler: Arc<dyn ClientHandler>) -> SessionManager {
        SessionManager::with_connector(handler, Arc::new(self.clone()))
    }

    /// Frames the client sent, in order.
    pub fn sent(&self) -> Vec<JsonRpcMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect()
    }

    /// Responses the client sent to server requests.
    pub fn sent_responses(&self) -> Vec<JsonRpcResponse> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                JsonRpcMessage::Response(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// The id of the last request sent for `method`.
    pub fn last_request_id(&self, method: &str) -> Option<RequestId> {
        self.sent().into_iter().rev().find_map(|m| match m {
            JsonRpcMessage::Request(r) if r.method == method => Some(r.id),
            _ => None,
        })
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().transports.len()
    }

    pub fn auth_failures(&self) -> usize {
        self.auth_failures.load(Ordering::SeqCst)
    }

    pub fn headers(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().headers.clone()
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.state.lock().unwrap().transports[index].clone()
    }

    /// Deliver an event on the most recently opened transport.
    pub fn push(&self, event: TransportEvent) {
        let events = self.state.lock().unwrap().events.clone();
        if let Some(events) = events {
            let _ = events.send(event);
        }
    }

    pub fn push_request(&self, id: impl Into<String>, method: &str, params: Value) {
        self.push(TransportEvent::Message(JsonRpcMessage::Request(
            JsonRpcRequest::new(RequestId::String(id.into()), method, Some(params)),
        )));
    }

    pub fn push_response(&self, id: RequestId, result: Value) {
        self.push(TransportEvent::Message(JsonRpcMessage::Response(
            JsonRpcResponse::success(id, result),
        )));
    }

    fn reply(&self, request: &JsonRpcRequest) -> Reply {
        if let Some(reply) = (self.script)(request) {
            return reply;
        }
        match request.method.as_str() {
            "initialize" => Reply::Result(initialize_result(PROTOCOL_VERSION, full_capabilities())),
            "ping" => Reply::Result(json!({})),
            other => Reply::Error(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ),
        }
    }

    fn record(&self, message: JsonRpcMessage) {
        self.state.lock().unwrap().sent.push(message);
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockServer {
    async fn open(
        &self,
        _config: &ServerConfig,
        headers: &HashMap<String, String>,
        events: EventSender,
    ) -> McpResult<Arc<dyn Transport>> {
        if let Some(token) = &self.required_token {
            let expected = format!("Bearer {}", token);
            if headers.get("Authorization") != Some(&expected) {
                self.auth_failures.fetch_add(1, Ordering::SeqCst);
                return Err(McpError::AuthRequired);
            }
        }

        let transport = Arc::new(MockTransport {
            server: self.clone(),
            events: events.clone(),
            connected: AtomicBool::new(true),
        });
        let mut state = self.state.lock().unwrap();
        state.events = Some(events);
        state.headers.push(headers.clone());
        state.transports.push(transport.clone());
        Ok(transport)
    }
}

pub struct MockTransport {
    server: MockServer,
    events: EventSender,
    connected: AtomicBool,
}

impl MockTransport {
    /// Deliver an event on this transport, even after a newer one opened.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::transport("mock transport closed"));
        }
        self.server.record(message.clone());

        let JsonRpcMessage::Request(request) = message else {
            return Ok(());
        };
        let response = match self.server.reply(&request) {
            Reply::Result(result) => JsonRpcResponse::success(request.id, result),
            Reply::Error(code, text) => {
                JsonRpcResponse::failure(request.id, JsonRpcError::new(code, text))
            }
            Reply::Ignore => return Ok(()),
        };
        let _ = self
            .events
            .send(TransportEvent::Message(JsonRpcMessage::Response(response)));
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub fn full_capabilities() -> Value {
    json!({
        "tools": {},
        "resources": { "subscribe": true },
        "prompts": {},
        "logging": {},
        "completions": {},
    })
}

pub fn initialize_result(version: &str, capabilities: Value) -> Value {
    json!({
        "protocolVersion": version,
        "capabilities": capabilities,
        "serverInfo": { "name": "mock-server", "version": "1.0.0" },
    })
}

pub fn stdio_config() -> ServerConfig {
    ServerConfig::stdio("mock", "mock-server", Vec::<String>::new())
}

/// Everything the session told the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Notification(String),
    Diagnostic(String),
    Pending(PendingRequest),
    Settled(u64, PendingOutcome),
    Status(ConnectionStatus),
    ConnectionError(String),
}

#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn pending(&self) -> Vec<PendingRequest> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Pending(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn settled(&self) -> Vec<(u64, PendingOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Settled(id, outcome) => Some((id, outcome)),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

impl ClientHandler for RecordingHandler {
    fn on_notification(&self, notification: &inspector_mcp::ServerNotification) {
        self.push(Recorded::Notification(notification.method.clone()));
    }

    fn on_diagnostic(&self, diagnostic: &inspector_mcp::DiagnosticMessage) {
        self.push(Recorded::Diagnostic(diagnostic.content.clone()));
    }

    fn on_pending_request(&self, request: &PendingRequest) {
        self.push(Recorded::Pending(request.clone()));
    }

    fn on_pending_settled(&self, id: u64, outcome: &PendingOutcome) {
        self.push(Recorded::Settled(id, outcome.clone()));
    }

    fn on_status_change(&self, status: &ConnectionStatus) {
        self.push(Recorded::Status(status.clone()));
    }

    fn on_connection_error(&self, error: &McpError) {
        self.push(Recorded::ConnectionError(error.to_string()));
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Wait until the manager reports `expected`.
pub async fn wait_for_status(manager: &SessionManager, expected: ConnectionStatus) -> bool {
    let mut rx = manager.subscribe_status();
    let wait = async {
        loop {
            if *rx.borrow_and_update() == expected {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .unwrap_or(false)
}
