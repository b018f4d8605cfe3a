//! MCP transport implementations.
//!
//! A transport moves JSON-RPC frames in both directions. Outbound frames go
//! through [`Transport::send`]; everything the server emits arrives on the
//! event channel handed to [`Connector::open`], in arrival order.

mod event_stream;
mod http;
mod sse;
mod stdio;

pub use event_stream::{is_event_stream, SseDecoder, SseEvent};
pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::error::McpResult;
use crate::protocol::JsonRpcMessage;
use crate::server::{ServerConfig, TransportConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Something the transport observed.
#[derive(Debug)]
pub enum TransportEvent {
    /// A JSON-RPC frame from the server.
    Message(JsonRpcMessage),
    /// Out-of-band text, such as a line the server wrote to stderr.
    Diagnostic(String),
    /// The transport failed and cannot be used further.
    Error(String),
    /// The transport closed.
    Closed,
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to the server.
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()>;

    /// Close the transport.
    async fn close(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Opens transports from server configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        config: &ServerConfig,
        headers: &HashMap<String, String>,
        events: EventSender,
    ) -> McpResult<Arc<dyn Transport>>;
}

/// Connect timeout for HTTP transports.
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens the real stdio, SSE and streamable HTTP transports.
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    client: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> McpResult<Self> {
        // No overall timeout: event streams stay open for the whole session.
        let client = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(
        &self,
        config: &ServerConfig,
        headers: &HashMap<String, String>,
        events: EventSender,
    ) -> McpResult<Arc<dyn Transport>> {
        match &config.transport {
            TransportConfig::Stdio { command, args, env } => {
                let transport = StdioTransport::spawn(command, args, env, events)?;
                Ok(Arc::new(transport))
            }
            TransportConfig::Sse { url } => {
                let transport =
                    SseTransport::connect(self.client.clone(), url, headers.clone(), events)
                        .await?;
                Ok(Arc::new(transport))
            }
            TransportConfig::StreamableHttp { url } => {
                let transport = StreamableHttpTransport::new(
                    self.client.clone(),
                    url,
                    headers.clone(),
                    events,
                );
                Ok(Arc::new(transport))
            }
        }
    }
}

/// Apply configured headers to an outgoing HTTP request.
pub(crate) fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: &HashMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

/// Parse the payload of one data frame and forward every message in it.
pub(crate) fn forward_payload(payload: &str, events: &EventSender) {
    match JsonRpcMessage::parse_all(payload) {
        Ok(messages) => {
            for message in messages {
                let _ = events.send(TransportEvent::Message(message));
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Discarding malformed frame");
            let _ = events.send(TransportEvent::Diagnostic(format!(
                "malformed frame: {}",
                payload
            )));
        }
    }
}
