//! Callbacks from the session to the operator.

use crate::error::McpError;
use crate::protocol::Root;
use crate::router::{DiagnosticMessage, PendingOutcome, PendingRequest, ServerNotification};
use crate::server::ConnectionStatus;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Receives everything the server sends that no caller asked for.
///
/// Callbacks run on the session's reader task and must not block. Every
/// method has a no-op default.
pub trait ClientHandler: Send + Sync {
    fn on_notification(&self, _notification: &ServerNotification) {}

    fn on_diagnostic(&self, _diagnostic: &DiagnosticMessage) {}

    /// A server request is waiting for the operator to resolve or reject it.
    fn on_pending_request(&self, _request: &PendingRequest) {}

    fn on_pending_settled(&self, _id: u64, _outcome: &PendingOutcome) {}

    fn on_status_change(&self, _status: &ConnectionStatus) {}

    fn on_connection_error(&self, _error: &McpError) {}

    /// Roots returned for `roots/list`.
    fn roots(&self) -> Vec<Root> {
        Vec::new()
    }
}

/// Handler that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl ClientHandler for NoopHandler {}

/// Everything a [`ChannelHandler`] forwards.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InspectorEvent {
    Notification(ServerNotification),
    Diagnostic(DiagnosticMessage),
    PendingRequest(PendingRequest),
    PendingSettled { id: u64, outcome: PendingOutcome },
    StatusChanged { status: String },
    ConnectionError { message: String },
}

/// Handler that forwards every callback into an unbounded channel.
#[derive(Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<InspectorEvent>,
    roots: Arc<RwLock<Vec<Root>>>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InspectorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                roots: Arc::new(RwLock::new(Vec::new())),
            },
            rx,
        )
    }

    /// Replace the roots served to the server.
    pub fn set_roots(&self, roots: Vec<Root>) {
        if let Ok(mut guard) = self.roots.write() {
            *guard = roots;
        }
    }

    fn emit(&self, event: InspectorEvent) {
        let _ = self.tx.send(event);
    }
}

impl ClientHandler for ChannelHandler {
    fn on_notification(&self, notification: &ServerNotification) {
        self.emit(InspectorEvent::Notification(notification.clone()));
    }

    fn on_diagnostic(&self, diagnostic: &DiagnosticMessage) {
        self.emit(InspectorEvent::Diagnostic(diagnostic.clone()));
    }

    fn on_pending_request(&self, request: &PendingRequest) {
        self.emit(InspectorEvent::PendingRequest(request.clone()));
    }

    fn on_pending_settled(&self, id: u64, outcome: &PendingOutcome) {
        self.emit(InspectorEvent::PendingSettled {
            id,
            outcome: outcome.clone(),
        });
    }

    fn on_status_change(&self, status: &ConnectionStatus) {
        self.emit(InspectorEvent::StatusChanged {
            status: status.to_string(),
        });
    }

    fn on_connection_error(&self, error: &McpError) {
        self.emit(InspectorEvent::ConnectionError {
            message: error.to_string(),
        });
    }

    fn roots(&self) -> Vec<Root> {
        self.roots.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_handler_forwards_events() {
        let (handler, mut rx) = ChannelHandler::new();
        handler.on_status_change(&ConnectionStatus::Connecting);
        handler.on_connection_error(&McpError::Timeout);

        match rx.try_recv().unwrap() {
            InspectorEvent::StatusChanged { status } => assert_eq!(status, "connecting"),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            InspectorEvent::ConnectionError { message } => assert_eq!(message, "Request timed out"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_channel_handler_roots_snapshot() {
        let (handler, _rx) = ChannelHandler::new();
        assert!(handler.roots().is_empty());

        handler.set_roots(vec![Root::new("file:///workspace")]);
        assert_eq!(handler.roots(), vec![Root::new("file:///workspace")]);
    }

    #[test]
    fn test_noop_handler_has_no_roots() {
        assert!(NoopHandler.roots().is_empty());
    }
}
