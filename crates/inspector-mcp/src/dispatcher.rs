//! Client-to-server request dispatch.
//!
//! Assigns request ids, correlates responses, enforces per-request timeouts
//! and keeps the request/response history.

use crate::error::{McpError, McpResult};
use crate::protocol::{
    ClientRequest, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use crate::schema::ResultSchema;
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};

/// One request and the response the server sent for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub request: Value,
    pub response: Value,
    /// The response arrived after the caller had already timed out.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub late: bool,
}

struct InFlight {
    request: Value,
    record: bool,
    waiter: oneshot::Sender<McpResult<JsonRpcResponse>>,
}

/// Issues requests over the current transport and routes their responses.
pub struct RequestDispatcher {
    next_id: AtomicU64,
    next_progress_token: AtomicU64,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    timed_out: Mutex<HashMap<u64, (Value, bool)>>,
    history: RwLock<Vec<HistoryEntry>>,
}

impl RequestDispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            next_progress_token: AtomicU64::new(0),
            transport: RwLock::new(None),
            in_flight: Mutex::new(HashMap::new()),
            timed_out: Mutex::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Route requests through `transport` from now on.
    ///
    /// Progress tokens restart for every session; request ids never do.
    pub async fn attach(&self, transport: Arc<dyn Transport>) {
        *self.transport.write().await = Some(transport);
        self.next_progress_token.store(0, Ordering::SeqCst);
    }

    /// Stop routing and settle every in-flight request with `SessionClosed`.
    pub async fn detach(&self) -> usize {
        self.transport.write().await.take();
        self.timed_out.lock().await.clear();
        self.fail_in_flight(|| McpError::SessionClosed).await
    }

    /// Settle every in-flight request with an error built by `error`.
    pub async fn fail_in_flight<F>(&self, error: F) -> usize
    where
        F: Fn() -> McpError,
    {
        let drained: Vec<InFlight> = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.waiter.send(Err(error()));
        }
        if count > 0 {
            debug!(count, "Failed in-flight requests");
        }
        count
    }

    pub fn next_progress_token(&self) -> u64 {
        self.next_progress_token.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and wait for a result satisfying `schema`.
    pub async fn call<S: ResultSchema>(
        &self,
        request: ClientRequest,
        schema: &S,
        timeout: Duration,
    ) -> McpResult<S::Output> {
        let response = self.execute(request, timeout, true).await?;
        Self::into_result(response, schema)
    }

    /// Like [`call`](Self::call), but the exchange is kept out of the history.
    pub async fn call_untracked<S: ResultSchema>(
        &self,
        request: ClientRequest,
        schema: &S,
        timeout: Duration,
    ) -> McpResult<S::Output> {
        let response = self.execute(request, timeout, false).await?;
        Self::into_result(response, schema)
    }

    pub async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let transport = self.current_transport().await?;
        debug!(method = %notification.method, "Sending notification");
        transport
            .send(JsonRpcMessage::Notification(notification))
            .await
    }

    /// Deliver a response frame from the server.
    pub async fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_u64() else {
            warn!(id = %response.id, "Response with foreign id");
            return;
        };
        let payload = serde_json::to_value(&response).unwrap_or(Value::Null);

        let entry = self.in_flight.lock().await.remove(&id);
        if let Some(entry) = entry {
            if entry.record {
                self.record(entry.request, payload, false).await;
            }
            let _ = entry.waiter.send(Ok(response));
            return;
        }

        let timed_out = self.timed_out.lock().await.remove(&id);
        match timed_out {
            Some((request, record)) => {
                warn!(id, "Late response for timed-out request");
                if record {
                    self.record(request, payload, true).await;
                }
            }
            None => warn!(id, "Response for unknown request"),
        }
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.read().await.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn current_transport(&self) -> McpResult<Arc<dyn Transport>> {
        self.transport
            .read()
            .await
            .clone()
            .ok_or(McpError::NotConnected)
    }

    async fn execute(
        &self,
        request: ClientRequest,
        timeout: Duration,
        record: bool,
    ) -> McpResult<JsonRpcResponse> {
        let transport = self.current_transport().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = JsonRpcRequest::new(id, request.method, request.params);
        let payload = serde_json::to_value(&message)?;

        let (tx, rx) = oneshot::channel();
        self.in_flight.lock().await.insert(
            id,
            InFlight {
                request: payload,
                record,
                waiter: tx,
            },
        );

        debug!(id, method = %message.method, "Sending request");

        // One deadline covers the send and the wait; HTTP sends block until
        // the server answers the POST.
        let deadline = tokio::time::Instant::now() + timeout;
        let send = transport.send(JsonRpcMessage::Request(message));
        tokio::pin!(send);
        let mut rx = rx;
        let mut sent = false;

        loop {
            tokio::select! {
                result = &mut send, if !sent => match result {
                    Ok(()) => sent = true,
                    Err(e) => {
                        if self.in_flight.lock().await.remove(&id).is_some() {
                            return Err(e);
                        }
                        // Already settled by a response or by teardown.
                        return (&mut rx).await.unwrap_or(Err(McpError::SessionClosed));
                    }
                },
                result = &mut rx => return result.unwrap_or(Err(McpError::SessionClosed)),
                _ = tokio::time::sleep_until(deadline) => {
                    let entry = self.in_flight.lock().await.remove(&id);
                    match entry {
                        Some(entry) => {
                            warn!(id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                            self.timed_out
                                .lock()
                                .await
                                .insert(id, (entry.request, entry.record));
                            return Err(McpError::Timeout);
                        }
                        None => return (&mut rx).await.unwrap_or(Err(McpError::SessionClosed)),
                    }
                }
            }
        }
    }

    fn into_result<S: ResultSchema>(response: JsonRpcResponse, schema: &S) -> McpResult<S::Output> {
        if let Some(error) = response.error {
            return Err(McpError::Protocol {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        schema.parse(result).map_err(McpError::SchemaMismatch)
    }

    async fn record(&self, request: Value, response: Value, late: bool) {
        self.history.write().await.push(HistoryEntry {
            request,
            response,
            late,
        });
    }
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
