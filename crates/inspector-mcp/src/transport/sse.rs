//! Legacy HTTP+SSE transport.
//!
//! A long-lived GET stream carries every server frame. Its first `endpoint`
//! event names the URL that client frames are POSTed to.

use super::{apply_headers, forward_payload, EventSender, SseDecoder, Transport, TransportEvent};
use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// How long to wait for the `endpoint` event after the stream opens.
pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SseTransport {
    client: Client,
    endpoint: Url,
    headers: HashMap<String, String>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl SseTransport {
    pub async fn connect(
        client: Client,
        url: &str,
        headers: HashMap<String, String>,
        events: EventSender,
    ) -> McpResult<Self> {
        let base = Url::parse(url)
            .map_err(|e| McpError::InvalidConfig(format!("invalid url '{}': {}", url, e)))?;

        debug!(url = %base, "Opening SSE stream");
        let response = apply_headers(client.get(base.clone()), &headers)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::transport(format!("failed to open event stream: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if !status.is_success() {
            return Err(McpError::transport(format!(
                "event stream returned {}",
                status
            )));
        }

        let connected = Arc::new(AtomicBool::new(true));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_stream(
            response,
            base.clone(),
            events,
            endpoint_tx,
            connected.clone(),
        ));

        let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                return Err(McpError::transport(
                    "event stream closed before announcing an endpoint",
                ))
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::transport("timed out waiting for endpoint event"));
            }
        };
        debug!(endpoint = %endpoint, "SSE endpoint announced");

        Ok(Self {
            client,
            endpoint,
            headers,
            reader: Mutex::new(Some(reader)),
            connected,
        })
    }
}

async fn read_stream(
    response: reqwest::Response,
    base: Url,
    events: EventSender,
    endpoint_tx: oneshot::Sender<Url>,
    connected: Arc<AtomicBool>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "SSE stream failed");
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(TransportEvent::Error(format!("event stream failed: {}", e)));
                return;
            }
        };
        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => match base.join(event.data.trim()) {
                    Ok(url) => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                    Err(e) => warn!(error = %e, data = %event.data, "Invalid endpoint event"),
                },
                "message" => forward_payload(&event.data, &events),
                other => debug!(event = other, "Ignoring SSE event"),
            }
        }
    }

    for event in decoder.finish() {
        if event.event == "message" {
            forward_payload(&event.data, &events);
        }
    }
    connected.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed);
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        let body = serde_json::to_string(&message)?;
        debug!(method = ?message.method(), "Posting SSE frame");

        let response = apply_headers(self.client.post(self.endpoint.clone()), &self.headers)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| McpError::transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::transport(format!(
                "server returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
