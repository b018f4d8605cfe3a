//! One live session per command invocation.

use super::auth;
use crate::config::InspectorConfig;
use anyhow::Context;
use inspector_mcp::protocol::methods;
use inspector_mcp::{
    ChannelHandler, HistoryEntry, InspectorEvent, PendingRequest, Root, ServerConfig,
    SessionManager,
};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A connected session plus the task answering what the server sends.
pub struct Inspector {
    manager: Arc<SessionManager>,
    events: JoinHandle<()>,
}

impl Inspector {
    pub async fn connect(
        target: &ServerConfig,
        config: &InspectorConfig,
        approve_sampling: bool,
        roots: &[String],
    ) -> anyhow::Result<Self> {
        let (handler, rx) = ChannelHandler::new();
        // Answered from roots/list as soon as the handshake completes.
        handler.set_roots(roots.iter().map(Root::new).collect());
        let mut manager =
            SessionManager::new(Arc::new(handler))?.with_options(config.session_options());
        if target.url().is_some() {
            manager = manager.with_auth_provider(Arc::new(auth::authenticator(config)?));
        }
        let manager = Arc::new(manager);
        let events = tokio::spawn(handle_events(
            Arc::downgrade(&manager),
            rx,
            approve_sampling,
        ));

        let init = manager
            .connect(target.clone())
            .await
            .with_context(|| format!("Failed to connect to {}", target.endpoint()))?;
        info!(
            server = %target.name,
            server_name = %init.server_info.name,
            server_version = %init.server_info.version,
            protocol_version = %init.protocol_version,
            "Session ready"
        );
        if let Some(instructions) = &init.instructions {
            debug!(%instructions, "Server instructions");
        }

        Ok(Self { manager, events })
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Print the history if asked, then disconnect.
    pub async fn finish(self, show_history: bool) -> anyhow::Result<()> {
        if show_history {
            print_history(&self.manager.history().await)?;
        }
        self.manager.disconnect().await;
        self.events.abort();
        Ok(())
    }
}

fn print_history(history: &[HistoryEntry]) -> anyhow::Result<()> {
    println!();
    println!("History ({} requests):", history.len());
    for entry in history {
        let method = entry.request["method"].as_str().unwrap_or("?");
        let late = if entry.late { " (late)" } else { "" };
        println!();
        println!("→ {method}{late}");
        println!("{}", serde_json::to_string_pretty(&entry.request)?);
        println!("←");
        println!("{}", serde_json::to_string_pretty(&entry.response)?);
    }
    Ok(())
}

async fn handle_events(
    manager: Weak<SessionManager>,
    mut rx: mpsc::UnboundedReceiver<InspectorEvent>,
    approve_sampling: bool,
) {
    while let Some(event) = rx.recv().await {
        match event {
            InspectorEvent::PendingRequest(request) => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                settle(&manager, request, approve_sampling).await;
            }
            InspectorEvent::Notification(notification) => {
                info!(method = %notification.method, "Server notification");
                if let Some(params) = &notification.params {
                    debug!(%params, "Notification params");
                }
            }
            InspectorEvent::Diagnostic(diagnostic) => {
                eprintln!("[server] {}", diagnostic.content);
            }
            InspectorEvent::PendingSettled { id, outcome } => {
                debug!(id, ?outcome, "Pending request settled");
            }
            InspectorEvent::StatusChanged { status } => debug!(%status, "Status changed"),
            InspectorEvent::ConnectionError { message } => {
                warn!(error = %message, "Connection error")
            }
        }
    }
}

async fn settle(manager: &SessionManager, request: PendingRequest, approve_sampling: bool) {
    let result = if approve_sampling && request.method == methods::SAMPLING_CREATE_MESSAGE {
        info!(id = request.id, "Answering sampling request with a stub");
        manager.resolve_pending(request.id, stub_sampling_result()).await
    } else {
        info!(id = request.id, method = %request.method, "Declining server request");
        manager
            .reject_pending(request.id, "Declined by the inspector operator")
            .await
    };
    if let Err(e) = result {
        warn!(id = request.id, error = %e, "Failed to answer server request");
    }
}

fn stub_sampling_result() -> Value {
    json!({
        "role": "assistant",
        "content": {
            "type": "text",
            "text": "Stub response from mcp-inspector.",
        },
        "model": "mcp-inspector-stub",
        "stopReason": "endTurn",
    })
}
