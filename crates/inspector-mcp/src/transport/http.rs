//! Streamable HTTP transport.
//!
//! Every outbound frame is a POST. The server answers with either a JSON
//! body or an event stream carrying the response plus any requests and
//! notifications it wants to interleave.

use super::{apply_headers, forward_payload, is_event_stream, EventSender, SseDecoder};
use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcMessage;
use crate::transport::{Transport, TransportEvent};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const SESSION_ID_HEADER: &str = "mcp-session-id";

pub struct StreamableHttpTransport {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
    session_id: RwLock<Option<String>>,
    events: EventSender,
    connected: Arc<AtomicBool>,
}

impl StreamableHttpTransport {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        events: EventSender,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            headers,
            session_id: RwLock::new(None),
            events,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn build_request(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);
        req = apply_headers(req, &self.headers);
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_ID_HEADER, id);
        }
        req
    }

    fn read_event_stream(&self, response: reqwest::Response) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        for event in decoder.push(&chunk) {
                            if event.event == "message" {
                                forward_payload(&event.data, &events);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Response stream interrupted");
                        let _ = events.send(TransportEvent::Diagnostic(format!(
                            "response stream interrupted: {}",
                            e
                        )));
                        return;
                    }
                }
            }
            for event in decoder.finish() {
                if event.event == "message" {
                    forward_payload(&event.data, &events);
                }
            }
        });
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::transport("transport closed"));
        }

        let body = serde_json::to_string(&message)?;
        debug!(method = ?message.method(), "Sending HTTP frame");

        let response = self
            .build_request(body)
            .await
            .send()
            .await
            .map_err(|e| McpError::transport(format!("request failed: {}", e)))?;

        if let Some(id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(id.to_string());
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::transport(format!(
                "server returned {}: {}",
                status, text
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if is_event_stream(&content_type) {
            self.read_event_stream(response);
            return Ok(());
        }

        let text = response
            .text()
            .await
            .map_err(|e| McpError::transport(format!("failed to read response: {}", e)))?;
        if !text.trim().is_empty() {
            forward_payload(&text, &self.events);
        }
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(id) = self.session_id.write().await.take() {
            let req = apply_headers(self.client.delete(&self.url), &self.headers)
                .header(SESSION_ID_HEADER, id);
            if let Err(e) = req.send().await {
                debug!(error = %e, "Failed to terminate HTTP session");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
