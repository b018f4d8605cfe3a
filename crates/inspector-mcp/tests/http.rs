//! Sessions over streamable HTTP against slow or failing servers.

mod common;

use common::{full_capabilities, initialize_result, RecordingHandler};
use inspector_mcp::protocol::PROTOCOL_VERSION;
use inspector_mcp::{
    ConnectionStatus, McpError, ServerConfig, SessionManager, SessionOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers JSON-RPC POSTs the way a streamable HTTP MCP server does.
#[derive(Clone)]
struct McpEndpoint {
    initialize_delay: Duration,
    ping_delay: Duration,
    ping_status: u16,
}

impl Default for McpEndpoint {
    fn default() -> Self {
        Self {
            initialize_delay: Duration::ZERO,
            ping_delay: Duration::ZERO,
            ping_status: 200,
        }
    }
}

impl Respond for McpEndpoint {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let (Some(id), Some(method)) = (body.get("id"), body["method"].as_str()) else {
            // Notifications and responses are only acknowledged.
            return ResponseTemplate::new(202);
        };
        let reply = |result: Value| json!({ "jsonrpc": "2.0", "id": id, "result": result });

        match method {
            "initialize" => ResponseTemplate::new(200)
                .set_body_json(reply(initialize_result(
                    PROTOCOL_VERSION,
                    full_capabilities(),
                )))
                .set_delay(self.initialize_delay),
            "ping" if self.ping_status == 200 => ResponseTemplate::new(200)
                .set_body_json(reply(json!({})))
                .set_delay(self.ping_delay),
            "ping" => ResponseTemplate::new(self.ping_status)
                .set_body_string("upstream failure")
                .set_delay(self.ping_delay),
            other => ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {other}") },
            })),
        }
    }
}

async fn mcp_server(endpoint: McpEndpoint) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(endpoint)
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer, name: &str) -> ServerConfig {
    ServerConfig::streamable_http(name, format!("{}/mcp", server.uri()))
}

fn manager(options: SessionOptions) -> SessionManager {
    SessionManager::new(Arc::new(RecordingHandler::new()))
        .unwrap()
        .with_options(options)
}

#[tokio::test]
async fn test_request_timeout_covers_slow_post() {
    let server = mcp_server(McpEndpoint {
        ping_delay: Duration::from_secs(3),
        ..McpEndpoint::default()
    })
    .await;
    let manager = manager(SessionOptions {
        request_timeout: Duration::from_millis(200),
        ..SessionOptions::default()
    });
    manager.connect(config(&server, "slow")).await.unwrap();

    let started = Instant::now();
    let err = manager.ping().await.unwrap_err();
    assert!(matches!(err, McpError::Timeout));
    assert!(started.elapsed() < Duration::from_secs(2));
    // A timeout is not fatal.
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_handshake_timeout_covers_slow_post() {
    let server = mcp_server(McpEndpoint {
        initialize_delay: Duration::from_secs(3),
        ..McpEndpoint::default()
    })
    .await;
    let manager = manager(SessionOptions {
        handshake_timeout: Duration::from_millis(200),
        ..SessionOptions::default()
    });

    let started = Instant::now();
    let err = manager.connect(config(&server, "slow")).await.unwrap_err();
    assert!(matches!(err, McpError::HandshakeFailed(ref m) if m == "initialize timed out"));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_failure_from_replaced_session_leaves_new_one_alone() {
    let old = mcp_server(McpEndpoint {
        ping_delay: Duration::from_millis(800),
        ping_status: 500,
        ..McpEndpoint::default()
    })
    .await;
    let new = mcp_server(McpEndpoint::default()).await;
    let manager = Arc::new(manager(SessionOptions::default()));
    manager.connect(config(&old, "old")).await.unwrap();

    let stale = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ping().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.connect(config(&new, "new")).await.unwrap();
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    let result = stale.await.unwrap();
    assert!(matches!(result, Err(McpError::SessionClosed)));

    // Give a late failure the chance to leak into the new session.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(manager.server_config().await.unwrap().name, "new");
    manager.ping().await.unwrap();
}

#[tokio::test]
async fn test_server_error_ends_live_session() {
    let server = mcp_server(McpEndpoint {
        ping_status: 500,
        ..McpEndpoint::default()
    })
    .await;
    let manager = manager(SessionOptions::default());
    manager.connect(config(&server, "failing")).await.unwrap();

    let err = manager.ping().await.unwrap_err();
    assert!(matches!(err, McpError::Transport(ref m) if m.contains("500")));
    assert!(matches!(manager.status(), ConnectionStatus::Error(_)));
    assert!(manager.server_config().await.is_none());
}
