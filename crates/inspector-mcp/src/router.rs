//! Routing of server-initiated frames.
//!
//! Notifications are logged, diagnostics collected, and server requests
//! either answered on the spot or queued until the operator settles them.

use crate::error::{McpError, McpResult};
use crate::handler::ClientHandler;
use crate::protocol::{
    error_codes, methods, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListRootsResult, RequestId,
};
use crate::transport::Transport;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A notification received from the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerNotification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Out-of-band text from the server, such as a stderr line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticMessage {
    pub content: String,
}

/// A server request waiting for the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequest {
    /// Inspector-assigned id, unrelated to the server's JSON-RPC id.
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// How a pending request was settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum PendingOutcome {
    Resolved(Value),
    Rejected(String),
    SessionClosed,
}

/// Single-use handle for answering one server request.
struct Responder {
    server_id: RequestId,
    transport: Arc<dyn Transport>,
}

impl Responder {
    async fn settle(self, outcome: &PendingOutcome) -> McpResult<()> {
        let response = match outcome {
            PendingOutcome::Resolved(result) => {
                JsonRpcResponse::success(self.server_id, result.clone())
            }
            PendingOutcome::Rejected(message) => JsonRpcResponse::failure(
                self.server_id,
                JsonRpcError::new(error_codes::INTERNAL_ERROR, message.clone()),
            ),
            PendingOutcome::SessionClosed => return Ok(()),
        };
        self.transport
            .send(JsonRpcMessage::Response(response))
            .await
    }
}

struct Pending {
    request: PendingRequest,
    responder: Responder,
}

/// Sorts inbound non-response frames.
pub struct NotificationRouter {
    handler: Arc<dyn ClientHandler>,
    notifications: RwLock<Vec<ServerNotification>>,
    diagnostics: RwLock<Vec<DiagnosticMessage>>,
    pending: Mutex<BTreeMap<u64, Pending>>,
    next_pending_id: AtomicU64,
}

impl NotificationRouter {
    pub fn new(handler: Arc<dyn ClientHandler>) -> Self {
        Self {
            handler,
            notifications: RwLock::new(Vec::new()),
            diagnostics: RwLock::new(Vec::new()),
            pending: Mutex::new(BTreeMap::new()),
            next_pending_id: AtomicU64::new(0),
        }
    }

    /// Route a request or notification that arrived on `transport`.
    pub async fn route(&self, message: JsonRpcMessage, transport: &Arc<dyn Transport>) {
        match message {
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await
            }
            JsonRpcMessage::Request(request) => self.handle_request(request, transport).await,
            JsonRpcMessage::Response(response) => {
                debug!(id = %response.id, "Router ignoring response frame");
            }
        }
    }

    /// Record a diagnostic line.
    pub async fn diagnostic(&self, content: impl Into<String>) {
        let diagnostic = DiagnosticMessage {
            content: content.into(),
        };
        self.diagnostics.write().await.push(diagnostic.clone());
        self.handler.on_diagnostic(&diagnostic);
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        if notification.method == methods::NOTIFICATION_STDERR {
            let content = notification
                .params
                .as_ref()
                .and_then(|p| p.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.diagnostic(content).await;
            return;
        }

        debug!(method = %notification.method, "Server notification");
        let notification = ServerNotification {
            method: notification.method,
            params: notification.params,
        };
        self.notifications.write().await.push(notification.clone());
        self.handler.on_notification(&notification);
    }

    async fn handle_request(&self, request: JsonRpcRequest, transport: &Arc<dyn Transport>) {
        let response = match request.method.as_str() {
            methods::SAMPLING_CREATE_MESSAGE | methods::ELICITATION_CREATE => {
                self.enqueue(request, transport.clone()).await;
                return;
            }
            methods::ROOTS_LIST => {
                let roots = ListRootsResult {
                    roots: self.handler.roots(),
                };
                let result = serde_json::to_value(&roots).unwrap_or_else(|_| json!({"roots": []}));
                JsonRpcResponse::success(request.id, result)
            }
            methods::PING => JsonRpcResponse::success(request.id, json!({})),
            other => {
                warn!(method = other, "Unsupported server request");
                JsonRpcResponse::failure(
                    request.id,
                    JsonRpcError::new(
                        error_codes::METHOD_NOT_FOUND,
                        format!("Method not found: {}", other),
                    ),
                )
            }
        };

        if let Err(e) = transport.send(JsonRpcMessage::Response(response)).await {
            warn!(error = %e, "Failed to answer server request");
        }
    }

    async fn enqueue(&self, request: JsonRpcRequest, transport: Arc<dyn Transport>) {
        let id = self.next_pending_id.fetch_add(1, Ordering::SeqCst);
        let pending = PendingRequest {
            id,
            method: request.method,
            params: request.params,
        };
        info!(id, method = %pending.method, "Server request awaiting operator");

        self.pending.lock().await.insert(
            id,
            Pending {
                request: pending.clone(),
                responder: Responder {
                    server_id: request.id,
                    transport,
                },
            },
        );
        self.handler.on_pending_request(&pending);
    }

    /// Answer pending request `id` with `result`.
    pub async fn resolve(&self, id: u64, result: Value) -> McpResult<()> {
        self.settle(id, PendingOutcome::Resolved(result)).await
    }

    /// Answer pending request `id` with an error.
    pub async fn reject(&self, id: u64, message: impl Into<String>) -> McpResult<()> {
        self.settle(id, PendingOutcome::Rejected(message.into()))
            .await
    }

    async fn settle(&self, id: u64, outcome: PendingOutcome) -> McpResult<()> {
        let pending = self
            .pending
            .lock()
            .await
            .remove(&id)
            .ok_or(McpError::PendingNotFound(id))?;

        debug!(id, method = %pending.request.method, "Settling pending request");
        let sent = pending.responder.settle(&outcome).await;
        self.handler.on_pending_settled(id, &outcome);
        sent
    }

    /// Force-settle every pending request with `SessionClosed`.
    pub async fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.pending.lock().await);
        let count = drained.len();
        for id in drained.into_keys() {
            self.handler
                .on_pending_settled(id, &PendingOutcome::SessionClosed);
        }
        count
    }

    pub async fn pending(&self) -> Vec<PendingRequest> {
        self.pending
            .lock()
            .await
            .values()
            .map(|p| p.request.clone())
            .collect()
    }

    pub async fn notifications(&self) -> Vec<ServerNotification> {
        self.notifications.read().await.clone()
    }

    pub async fn diagnostics(&self) -> Vec<DiagnosticMessage> {
        self.diagnostics.read().await.clone()
    }

    pub async fn clear_diagnostics(&self) {
        self.diagnostics.write().await.clear();
    }
}
