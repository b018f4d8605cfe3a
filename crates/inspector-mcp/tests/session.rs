//! Session lifecycle against a scripted server.

mod common;

use async_trait::async_trait;
use common::{
    eventually, initialize_result, stdio_config, wait_for_status, MockServer, Recorded,
    RecordingHandler, Reply,
};
use inspector_mcp::protocol::{error_codes, methods, CompletionReference, RequestId};
use inspector_mcp::{
    AnyResult, AuthProvider, ChannelHandler, ClientRequest, ConnectionStatus, EmptyResult, HistoryEntry,
    LoggingLevel, McpError, McpResult, PendingOutcome, Root, ServerConfig, SessionManager,
    SessionOptions, Transport, TransportEvent,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn connected(server: &MockServer) -> (SessionManager, RecordingHandler) {
    let handler = RecordingHandler::new();
    let manager = server.manager(Arc::new(handler.clone()));
    manager.connect(stdio_config()).await.unwrap();
    (manager, handler)
}

async fn history_where<F>(manager: &SessionManager, check: F) -> Vec<HistoryEntry>
where
    F: Fn(&[HistoryEntry]) -> bool,
{
    for _ in 0..100 {
        let history = manager.history().await;
        if check(&history) {
            return history;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    manager.history().await
}

#[tokio::test]
async fn test_connect_and_ping() {
    let server = MockServer::new();
    let handler = RecordingHandler::new();
    let manager = server.manager(Arc::new(handler.clone()));

    let init = manager.connect(stdio_config()).await.unwrap();
    assert_eq!(init.server_info.name, "mock-server");
    assert!(manager.is_connected());
    assert!(manager.supports_completion().await);
    assert!(manager.supports_logging().await);
    assert_eq!(manager.server_config().await.unwrap().name, "mock");

    manager.ping().await.unwrap();

    assert_eq!(
        server.sent_methods(),
        vec!["initialize", "notifications/initialized", "ping"]
    );
    let history = manager.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].request["method"], "ping");
    assert_eq!(history[0].response["result"], json!({}));
    assert!(!history[0].late);
    assert_eq!(
        handler.statuses(),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );
}

#[tokio::test]
async fn test_operations_require_a_session() {
    let server = MockServer::new();
    let manager = server.manager(Arc::new(RecordingHandler::new()));

    assert!(matches!(manager.ping().await, Err(McpError::NotConnected)));
    assert!(matches!(
        manager.list_tools(None).await,
        Err(McpError::NotConnected)
    ));
    assert!(matches!(
        manager.send_roots_list_changed().await,
        Err(McpError::NotConnected)
    ));
    assert_eq!(server.opened(), 0);
    assert!(server.sent().is_empty());
}

#[tokio::test]
async fn test_protocol_error_keeps_session_usable() {
    let server = MockServer::new().with_script(|request| match request.method.as_str() {
        "prompts/list" => Some(Reply::Result(json!({ "prompts": [] }))),
        _ => None,
    });
    let (manager, _) = connected(&server).await;

    manager.ping().await.unwrap();
    let err = manager
        .get_prompt("missing", Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(error_codes::METHOD_NOT_FOUND));
    manager.list_prompts(None).await.unwrap();

    let methods: Vec<_> = manager
        .history()
        .await
        .iter()
        .map(|e| e.request["method"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(methods, vec!["ping", "prompts/get", "prompts/list"]);
    // A JSON-RPC error leaves the session usable.
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_responses_complete_in_arrival_order() {
    let server = MockServer::new().with_script(|request| {
        request.method.starts_with("slow/").then_some(Reply::Ignore)
    });
    let (manager, _) = connected(&server).await;
    let manager = Arc::new(manager);

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .call(ClientRequest::new("slow/first", None), &AnyResult)
                .await
        })
    };
    let observed = server.clone();
    assert!(eventually(|| observed.last_request_id("slow/first").is_some()).await);
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .call(ClientRequest::new("slow/second", None), &AnyResult)
                .await
        })
    };
    assert!(eventually(|| observed.last_request_id("slow/second").is_some()).await);

    // Answer the later request first.
    let second_id = server.last_request_id("slow/second").unwrap();
    server.push_response(second_id, json!({ "n": 2 }));
    let result = second.await.unwrap().unwrap();
    assert_eq!(result, json!({ "n": 2 }));
    assert!(!first.is_finished());

    let first_id = server.last_request_id("slow/first").unwrap();
    server.push_response(first_id, json!({ "n": 1 }));
    assert_eq!(first.await.unwrap().unwrap(), json!({ "n": 1 }));

    let methods: Vec<_> = manager
        .history()
        .await
        .iter()
        .map(|e| e.request["method"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(methods, vec!["slow/second", "slow/first"]);
}

#[tokio::test]
async fn test_sampling_request_resolved_by_operator() {
    let server = MockServer::new();
    let (manager, handler) = connected(&server).await;

    server.push_request(
        "s1",
        methods::SAMPLING_CREATE_MESSAGE,
        json!({ "messages": [], "maxTokens": 16 }),
    );
    assert!(eventually(|| handler.pending().len() == 1).await);

    let pending = manager.pending_requests().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].method, "sampling/createMessage");
    let id = pending[0].id;

    let answer = json!({
        "role": "assistant",
        "content": { "type": "text", "text": "hello" },
        "model": "stub",
    });
    manager.resolve_pending(id, answer.clone()).await.unwrap();

    let responses = server.sent_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, RequestId::String("s1".to_string()));
    assert_eq!(responses[0].result, Some(answer.clone()));
    assert_eq!(
        handler.settled(),
        vec![(id, PendingOutcome::Resolved(answer))]
    );
    assert!(manager.pending_requests().await.is_empty());

    let err = manager.resolve_pending(id, json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::PendingNotFound(n) if n == id));
}

#[tokio::test]
async fn test_elicitation_rejected_by_operator() {
    let server = MockServer::new();
    let (manager, handler) = connected(&server).await;

    server.push_request("e1", methods::ELICITATION_CREATE, json!({ "message": "name?" }));
    assert!(eventually(|| handler.pending().len() == 1).await);
    let id = handler.pending()[0].id;

    manager.reject_pending(id, "declined").await.unwrap();

    let responses = server.sent_responses();
    assert_eq!(responses.len(), 1);
    let error = responses[0].error.as_ref().unwrap();
    assert_eq!(error.code, error_codes::INTERNAL_ERROR);
    assert_eq!(error.message, "declined");
}

#[tokio::test]
async fn test_disconnect_settles_pending_without_answering() {
    let server = MockServer::new();
    let (manager, handler) = connected(&server).await;

    server.push_request("s1", methods::SAMPLING_CREATE_MESSAGE, json!({}));
    assert!(eventually(|| handler.pending().len() == 1).await);
    let id = handler.pending()[0].id;

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert!(manager.pending_requests().await.is_empty());
    assert!(server.sent_responses().is_empty());
    assert_eq!(handler.settled(), vec![(id, PendingOutcome::SessionClosed)]);
    assert_eq!(
        handler.statuses(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );
    assert!(!server.transport(0).is_connected());
}

#[tokio::test]
async fn test_disconnect_fails_in_flight_requests() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "tools/list").then_some(Reply::Ignore)
    });
    let (manager, _) = connected(&server).await;
    let manager = Arc::new(manager);

    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.list_tools(None).await })
    };
    let observed = server.clone();
    assert!(eventually(|| observed.sent_methods().iter().any(|m| m == "tools/list")).await);

    manager.disconnect().await;

    let result = call.await.unwrap();
    assert!(matches!(result, Err(McpError::SessionClosed)));
    assert!(manager.history().await.is_empty());
}

#[tokio::test]
async fn test_timeout_then_late_response_is_recorded() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "ping").then_some(Reply::Ignore)
    });
    let (manager, _) = connected(&server).await;

    let err = manager
        .call_with_timeout(
            ClientRequest::new(methods::PING, None),
            &EmptyResult,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout));
    assert!(manager.is_connected());
    assert!(manager.history().await.is_empty());

    let id = server.last_request_id("ping").unwrap();
    server.push_response(id, json!({}));

    let history = history_where(&manager, |h| h.len() == 1).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].late);
    assert_eq!(history[0].request["method"], "ping");
}

#[tokio::test]
async fn test_server_close_ends_session() {
    let server = MockServer::new();
    let (manager, handler) = connected(&server).await;

    server.push(TransportEvent::Closed);
    assert!(wait_for_status(&manager, ConnectionStatus::Disconnected).await);

    assert!(matches!(manager.ping().await, Err(McpError::NotConnected)));
    assert!(!handler
        .events()
        .iter()
        .any(|e| matches!(e, Recorded::ConnectionError(_))));
    // The last handshake stays inspectable.
    assert!(manager.initialize_result().await.is_some());
}

#[tokio::test]
async fn test_transport_error_reports_cause() {
    let server = MockServer::new();
    let (manager, handler) = connected(&server).await;

    server.push(TransportEvent::Error("broken pipe".to_string()));
    let expected = ConnectionStatus::Error("Transport error: broken pipe".to_string());
    assert!(wait_for_status(&manager, expected).await);

    assert!(handler
        .events()
        .contains(&Recorded::ConnectionError("Transport error: broken pipe".to_string())));
}

#[tokio::test]
async fn test_stale_transport_close_is_ignored() {
    let server = MockServer::new();
    let (manager, _) = connected(&server).await;

    manager.connect(stdio_config()).await.unwrap();
    assert_eq!(server.opened(), 2);
    assert!(!server.transport(0).is_connected());

    server.transport(0).emit(TransportEvent::Closed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(manager.is_connected());
    manager.ping().await.unwrap();
}

#[tokio::test]
async fn test_request_ids_continue_across_sessions() {
    let server = MockServer::new();
    let (manager, _) = connected(&server).await;
    manager.ping().await.unwrap();

    manager.connect(stdio_config()).await.unwrap();

    assert_eq!(
        server.last_request_id("initialize"),
        Some(RequestId::Number(2))
    );
}

#[tokio::test]
async fn test_concurrent_connects_leave_one_session() {
    let server = MockServer::new();
    let manager = Arc::new(server.manager(Arc::new(RecordingHandler::new())));

    let a = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(stdio_config()).await })
    };
    let b = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(stdio_config()).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    // Whichever connect came second may cancel the first.
    assert!(results.iter().any(|r| r.is_ok()));
    assert!(results
        .iter()
        .all(|r| matches!(r, Ok(_) | Err(McpError::Cancelled))));
    let opened = server.opened();
    assert!((1..=2).contains(&opened));
    let open = (0..opened)
        .filter(|i| server.transport(*i).is_connected())
        .count();
    assert_eq!(open, 1);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_disconnect_cancels_connect_in_progress() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "initialize").then_some(Reply::Ignore)
    });
    let handler = RecordingHandler::new();
    let manager = Arc::new(server.manager(Arc::new(handler.clone())));

    let connect = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(stdio_config()).await })
    };
    let observed = server.clone();
    assert!(eventually(|| observed.sent_methods().iter().any(|m| m == "initialize")).await);

    tokio::time::timeout(Duration::from_secs(2), manager.disconnect())
        .await
        .expect("disconnect waited for the handshake timeout");

    let result = connect.await.unwrap();
    assert!(matches!(result, Err(McpError::Cancelled)));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert!(!server.transport(0).is_connected());
    assert!(!handler
        .events()
        .iter()
        .any(|e| matches!(e, Recorded::ConnectionError(_))));
}

#[tokio::test]
async fn test_connect_supersedes_connect_in_progress() {
    let initializes = Arc::new(AtomicUsize::new(0));
    let counter = initializes.clone();
    let server = MockServer::new().with_script(move |request| {
        if request.method != "initialize" {
            return None;
        }
        // Only the first handshake hangs.
        (counter.fetch_add(1, Ordering::SeqCst) == 0).then_some(Reply::Ignore)
    });
    let manager = Arc::new(server.manager(Arc::new(RecordingHandler::new())));

    let stuck = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(stdio_config()).await })
    };
    let observed = initializes.clone();
    assert!(eventually(|| observed.load(Ordering::SeqCst) == 1).await);

    let init = tokio::time::timeout(Duration::from_secs(2), manager.connect(stdio_config()))
        .await
        .expect("second connect waited for the first handshake")
        .unwrap();
    assert_eq!(init.server_info.name, "mock-server");

    assert!(matches!(stuck.await.unwrap(), Err(McpError::Cancelled)));
    assert!(manager.is_connected());
    assert!(!server.transport(0).is_connected());
    assert!(server.transport(1).is_connected());
}

#[tokio::test]
async fn test_unsupported_protocol_version_fails_handshake() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "initialize")
            .then(|| Reply::Result(initialize_result("1999-01-01", json!({}))))
    });
    let handler = RecordingHandler::new();
    let manager = server.manager(Arc::new(handler.clone()));

    let err = manager.connect(stdio_config()).await.unwrap_err();
    match &err {
        McpError::HandshakeFailed(message) => {
            assert!(message.contains("unsupported protocol version"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(manager.status(), ConnectionStatus::Error(_)));
    assert!(!server.transport(0).is_connected());
    assert!(!server
        .sent_methods()
        .iter()
        .any(|m| m == "notifications/initialized"));
    assert!(handler
        .events()
        .iter()
        .any(|e| matches!(e, Recorded::ConnectionError(_))));
}

#[tokio::test]
async fn test_handshake_timeout() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "initialize").then_some(Reply::Ignore)
    });
    let manager = server
        .manager(Arc::new(RecordingHandler::new()))
        .with_options(SessionOptions {
            handshake_timeout: Duration::from_millis(50),
            ..SessionOptions::default()
        });

    let err = manager.connect(stdio_config()).await.unwrap_err();
    assert!(matches!(err, McpError::HandshakeFailed(ref m) if m == "initialize timed out"));
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_initialize_error_fails_handshake() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "initialize").then(|| {
            Reply::Error(error_codes::INVALID_PARAMS, "unsupported client".to_string())
        })
    });
    let manager = server.manager(Arc::new(RecordingHandler::new()));

    let err = manager.connect(stdio_config()).await.unwrap_err();
    assert!(matches!(err, McpError::HandshakeFailed(_)));
    // The handshake is not part of the operator's history.
    assert!(manager.history().await.is_empty());
}

#[tokio::test]
async fn test_server_requests_answered_automatically() {
    let server = MockServer::new();
    let (handler, _rx) = ChannelHandler::new();
    handler.set_roots(vec![Root {
        uri: "file:///work".to_string(),
        name: Some("work".to_string()),
    }]);
    let manager = server.manager(Arc::new(handler));
    manager.connect(stdio_config()).await.unwrap();

    server.push_request("r1", methods::ROOTS_LIST, json!({}));
    server.push_request("p1", methods::PING, json!({}));
    server.push_request("x1", "custom/unknown", json!({}));
    let observed = server.clone();
    assert!(eventually(|| observed.sent_responses().len() == 3).await);

    let responses = server.sent_responses();
    let by_id = |id: &str| {
        responses
            .iter()
            .find(|r| r.id == RequestId::String(id.to_string()))
            .cloned()
            .unwrap()
    };
    assert_eq!(
        by_id("r1").result.unwrap()["roots"][0]["uri"],
        "file:///work"
    );
    assert_eq!(by_id("p1").result, Some(json!({})));
    assert_eq!(
        by_id("x1").error.unwrap().code,
        error_codes::METHOD_NOT_FOUND
    );
    assert!(manager.pending_requests().await.is_empty());
}

#[tokio::test]
async fn test_notifications_and_diagnostics() {
    let server = MockServer::new();
    let (manager, handler) = connected(&server).await;

    server.push(TransportEvent::Message(
        inspector_mcp::protocol::JsonRpcMessage::Notification(
            inspector_mcp::JsonRpcNotification::new("notifications/tools/list_changed", None),
        ),
    ));
    server.push(TransportEvent::Diagnostic("server warming up".to_string()));

    assert!(
        eventually(|| handler
            .events()
            .contains(&Recorded::Diagnostic("server warming up".to_string())))
        .await
    );
    let notifications = manager.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].method, "notifications/tools/list_changed");
    assert_eq!(manager.diagnostics().await.len(), 1);

    manager.clear_diagnostics().await;
    assert!(manager.diagnostics().await.is_empty());
}

#[tokio::test]
async fn test_tool_output_schema_is_enforced() {
    let schema = json!({
        "type": "object",
        "properties": { "count": { "type": "integer" } },
        "required": ["count"],
    });
    let tools = json!({
        "tools": [
            { "name": "good", "inputSchema": { "type": "object" }, "outputSchema": schema },
            { "name": "bad", "inputSchema": { "type": "object" }, "outputSchema": schema },
            { "name": "missing", "inputSchema": { "type": "object" }, "outputSchema": schema },
            { "name": "failing", "inputSchema": { "type": "object" }, "outputSchema": schema },
        ]
    });
    let server = MockServer::new().with_script(move |request| match request.method.as_str() {
        "tools/list" => Some(Reply::Result(tools.clone())),
        "tools/call" => {
            let name = request.params.as_ref()?["name"].as_str()?.to_string();
            let text = json!([{ "type": "text", "text": name }]);
            Some(Reply::Result(match name.as_str() {
                "good" => json!({ "content": text, "structuredContent": { "count": 3 } }),
                "bad" => json!({ "content": text, "structuredContent": { "count": "three" } }),
                "failing" => json!({ "content": text, "isError": true }),
                _ => json!({ "content": text }),
            }))
        }
        _ => None,
    });
    let (manager, _) = connected(&server).await;

    let listed = manager.list_tools(None).await.unwrap();
    assert_eq!(listed.tools.len(), 4);

    let result = manager.call_tool("good", json!({})).await.unwrap();
    assert_eq!(result.structured_content, Some(json!({ "count": 3 })));
    assert!(matches!(
        manager.call_tool("bad", json!({})).await,
        Err(McpError::SchemaMismatch(_))
    ));
    assert!(matches!(
        manager.call_tool("missing", json!({})).await,
        Err(McpError::SchemaMismatch(_))
    ));
    assert!(manager.call_tool("failing", json!({})).await.unwrap().is_error);
    assert!(manager.is_connected());

    let tokens: Vec<_> = server
        .sent()
        .iter()
        .filter_map(|m| match m {
            inspector_mcp::protocol::JsonRpcMessage::Request(r) if r.method == "tools/call" => {
                r.params.as_ref().map(|p| p["_meta"]["progressToken"].clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec![json!(0), json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_completion_skipped_without_capability() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "initialize").then(|| {
            Reply::Result(initialize_result(
                inspector_mcp::protocol::PROTOCOL_VERSION,
                json!({ "prompts": {} }),
            ))
        })
    });
    let (manager, _) = connected(&server).await;

    let completion = manager
        .complete(
            CompletionReference::Prompt {
                name: "greet".to_string(),
            },
            "name",
            "Al",
            None,
        )
        .await
        .unwrap();
    assert!(completion.values.is_empty());
    assert!(!server
        .sent_methods()
        .iter()
        .any(|m| m == "completion/complete"));
}

#[tokio::test]
async fn test_completion_with_context() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "completion/complete").then(|| {
            Reply::Result(json!({
                "completion": { "values": ["Alice", "Alan"], "hasMore": false }
            }))
        })
    });
    let (manager, _) = connected(&server).await;

    let mut context = serde_json::Map::new();
    context.insert("greeting".to_string(), json!("hi"));
    let completion = manager
        .complete(
            CompletionReference::Prompt {
                name: "greet".to_string(),
            },
            "name",
            "Al",
            Some(context),
        )
        .await
        .unwrap();
    assert_eq!(completion.values, vec!["Alice", "Alan"]);

    let history = manager.history().await;
    let params = &history[0].request["params"];
    assert_eq!(params["ref"]["type"], "ref/prompt");
    assert_eq!(params["argument"]["value"], "Al");
    assert_eq!(params["context"]["arguments"]["greeting"], "hi");
}

#[tokio::test]
async fn test_subscriptions_tracked_per_session() {
    let server = MockServer::new().with_script(|request| match request.method.as_str() {
        "resources/subscribe" | "resources/unsubscribe" => Some(Reply::Result(json!({}))),
        _ => None,
    });
    let (manager, _) = connected(&server).await;

    manager.subscribe_resource("file:///b").await.unwrap();
    manager.subscribe_resource("file:///a").await.unwrap();
    assert_eq!(manager.subscriptions().await, vec!["file:///a", "file:///b"]);

    manager.unsubscribe_resource("file:///a").await.unwrap();
    assert_eq!(manager.subscriptions().await, vec!["file:///b"]);

    manager.disconnect().await;
    assert!(manager.subscriptions().await.is_empty());
}

#[tokio::test]
async fn test_logging_level_and_roots_notification() {
    let server = MockServer::new().with_script(|request| {
        (request.method == "logging/setLevel").then(|| Reply::Result(json!({})))
    });
    let (manager, _) = connected(&server).await;

    manager.set_logging_level(LoggingLevel::Warning).await.unwrap();
    manager.send_roots_list_changed().await.unwrap();

    let history = manager.history().await;
    assert_eq!(history[0].request["params"]["level"], "warning");
    assert_eq!(
        server.sent_methods().last().map(String::as_str),
        Some("notifications/roots/list_changed")
    );
}

struct StaticAuth {
    token: String,
    authorizations: AtomicUsize,
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn bearer_token(&self, _target: &str) -> McpResult<Option<String>> {
        Ok(None)
    }

    async fn authorize(&self, _target: &str) -> McpResult<String> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.clone())
    }
}

fn remote_config() -> ServerConfig {
    ServerConfig::streamable_http("remote", "http://127.0.0.1:9/mcp")
}

#[tokio::test]
async fn test_auth_required_retries_with_token() {
    let server = MockServer::new().requiring_token("tok-1");
    let auth = Arc::new(StaticAuth {
        token: "tok-1".to_string(),
        authorizations: AtomicUsize::new(0),
    });
    let manager = server
        .manager(Arc::new(RecordingHandler::new()))
        .with_auth_provider(auth.clone());

    manager.connect(remote_config()).await.unwrap();

    assert_eq!(server.auth_failures(), 1);
    assert_eq!(auth.authorizations.load(Ordering::SeqCst), 1);
    assert_eq!(
        server.headers()[0].get("Authorization").map(String::as_str),
        Some("Bearer tok-1")
    );
}

#[tokio::test]
async fn test_auth_required_without_provider() {
    let server = MockServer::new().requiring_token("tok-1");
    let manager = server.manager(Arc::new(RecordingHandler::new()));

    let err = manager.connect(remote_config()).await.unwrap_err();
    assert!(matches!(err, McpError::AuthRequired));
    assert_eq!(
        manager.status(),
        ConnectionStatus::Error("Authentication required".to_string())
    );
}

#[tokio::test]
async fn test_auth_retried_only_once() {
    let server = MockServer::new().requiring_token("tok-1");
    let auth = Arc::new(StaticAuth {
        token: "wrong".to_string(),
        authorizations: AtomicUsize::new(0),
    });
    let manager = server
        .manager(Arc::new(RecordingHandler::new()))
        .with_auth_provider(auth.clone());

    let err = manager.connect(remote_config()).await.unwrap_err();
    assert!(matches!(err, McpError::AuthRequired));
    assert_eq!(server.auth_failures(), 2);
    assert_eq!(auth.authorizations.load(Ordering::SeqCst), 1);
}
