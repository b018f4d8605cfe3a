//! Loopback listener that receives OAuth redirects from the browser.

use crate::error::{McpError, McpResult};
use crate::oauth::{OAUTH_CALLBACK_PATH, OAUTH_DEBUG_CALLBACK_PATH};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

type CodeSender = oneshot::Sender<Result<String, String>>;

const PAGE_STYLE: &str = "body { font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #111827; color: #e5e7eb; } \
    .container { text-align: center; padding: 2rem; } \
    .ok { color: #34d399; } .failed { color: #f87171; } \
    code { display: block; margin-top: 1rem; padding: 1rem; background: rgba(255,255,255,0.06); border-radius: 0.5rem; word-break: break-all; }";

fn page(title: &str, heading_class: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <title>MCP Inspector - {title}</title>\n  <style>{PAGE_STYLE}</style>\n</head>\n<body>\n  <div class=\"container\">\n    <h1 class=\"{heading_class}\">{title}</h1>\n    {body}\n  </div>\n</body>\n</html>"
    )
}

fn success_page() -> String {
    page(
        "Authorization Successful",
        "ok",
        "<p>You can close this window and return to the inspector.</p>\n    <script>setTimeout(() => window.close(), 2000);</script>",
    )
}

fn debug_page(code: &str, state: &str) -> String {
    page(
        "Authorization Code",
        "ok",
        &format!(
            "<p>Supply this code to the OAuth flow to continue.</p>\n    <code>{}</code>\n    <p>state: {}</p>",
            html_escape(code),
            html_escape(state)
        ),
    )
}

fn error_page(error: &str) -> String {
    page(
        "Authorization Failed",
        "failed",
        &format!("<code>{}</code>", html_escape(error)),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
}

/// HTTP listener on `127.0.0.1` serving the OAuth callback paths.
///
/// Each authorization registers its `state` parameter; a callback carrying an
/// unknown state is refused.
pub struct CallbackListener {
    port: u16,
    pending: Arc<Mutex<HashMap<String, CodeSender>>>,
    running: Mutex<Option<Running>>,
}

impl CallbackListener {
    /// Listener for `port`; zero picks a free port on start.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            pending: Arc::new(Mutex::new(HashMap::new())),
            running: Mutex::new(None),
        }
    }

    /// Bind and start serving. Calling it again while running is a no-op.
    pub async fn start(&self) -> McpResult<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.addr);
        }

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], self.port)))
            .await
            .map_err(|e| {
                McpError::auth_failed(format!(
                    "failed to bind OAuth callback listener on port {}: {e}",
                    self.port
                ))
            })?;
        let addr = listener.local_addr()?;
        info!(%addr, "OAuth callback listener started");

        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let pending = pending.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, pending).await {
                                    warn!(error = %e, "Error handling OAuth callback");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Error accepting callback connection"),
                    },
                    _ = &mut shutdown_rx => {
                        debug!("OAuth callback listener shutting down");
                        break;
                    }
                }
            }
        });

        *running = Some(Running { addr, shutdown });
        Ok(addr)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Expect a callback carrying `state`.
    ///
    /// The receiver yields the code, or the provider's error description.
    pub async fn register(&self, state: &str) -> oneshot::Receiver<Result<String, String>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(state.to_string(), tx);
        rx
    }

    pub async fn cancel(&self, state: &str) {
        if let Some(sender) = self.pending.lock().await.remove(state) {
            let _ = sender.send(Err("Authorization cancelled".to_string()));
        }
    }

    /// Register `state` and wait for its callback.
    pub async fn wait_for_callback(&self, state: &str, timeout: Duration) -> McpResult<String> {
        let rx = self.register(state).await;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(code))) => Ok(code),
            Ok(Ok(Err(error))) => Err(McpError::AuthFailed(error)),
            Ok(Err(_)) => Err(McpError::auth_failed("Authorization cancelled")),
            Err(_) => {
                self.pending.lock().await.remove(state);
                Err(McpError::auth_failed(
                    "OAuth callback timeout - authorization took too long",
                ))
            }
        }
    }

    /// Stop serving and fail every waiting authorization.
    pub async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown.send(());
        }
        for (_, sender) in self.pending.lock().await.drain() {
            let _ = sender.send(Err("OAuth callback listener stopped".to_string()));
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    pending: Arc<Mutex<HashMap<String, CodeSender>>>,
) -> McpResult<()> {
    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("");
    let response = match url::Url::parse(&format!("http://127.0.0.1{target}")) {
        Ok(url) if target.starts_with('/') => callback_response(&url, &pending).await,
        _ => http_response(400, "text/plain", "Bad Request"),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await.ok();
    Ok(())
}

async fn callback_response(
    url: &url::Url,
    pending: &Mutex<HashMap<String, CodeSender>>,
) -> String {
    let debug_path = match url.path() {
        OAUTH_CALLBACK_PATH => false,
        OAUTH_DEBUG_CALLBACK_PATH => true,
        _ => return http_response(404, "text/plain", "Not Found"),
    };

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    debug!(
        has_code = params.contains_key("code"),
        error = ?params.get("error"),
        debug_path,
        "Received OAuth callback"
    );

    let Some(state) = params.get("state") else {
        warn!("OAuth callback missing state parameter");
        return http_response(
            400,
            "text/html",
            &error_page("Missing required state parameter"),
        );
    };

    if let Some(error) = params.get("error") {
        let message = match params.get("error_description") {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        };
        if let Some(sender) = pending.lock().await.remove(state) {
            let _ = sender.send(Err(message.clone()));
        }
        return http_response(200, "text/html", &error_page(&message));
    }

    let Some(code) = params.get("code") else {
        return http_response(
            400,
            "text/html",
            &error_page("No authorization code provided"),
        );
    };

    let waiter = pending.lock().await.remove(state);
    match waiter {
        Some(sender) => {
            let _ = sender.send(Ok(code.clone()));
            let body = if debug_path {
                debug_page(code, state)
            } else {
                success_page()
            };
            http_response(200, "text/html", &body)
        }
        // Nobody is waiting in debug mode: show the code for manual entry.
        None if debug_path => http_response(200, "text/html", &debug_page(code, state)),
        None => {
            warn!(state = %state, "OAuth callback with unknown state");
            http_response(
                400,
                "text/html",
                &error_page("Invalid or expired state parameter"),
            )
        }
    }
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Unknown",
    };

    format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
        assert_eq!(html_escape("it's"), "it&#39;s");
    }

    #[test]
    fn test_error_page_escapes() {
        let html = error_page("<script>alert('xss')</script>");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>alert"));
    }

    #[tokio::test]
    async fn test_callback_delivers_code() {
        let listener = CallbackListener::new(0);
        let addr = listener.start().await.unwrap();
        let rx = listener.register("xyz").await;

        let response = get(addr, "/oauth/callback?code=abc&state=xyz").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Authorization Successful"));
        assert_eq!(rx.await.unwrap(), Ok("abc".to_string()));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_callback_rejects_unknown_state() {
        let listener = CallbackListener::new(0);
        let addr = listener.start().await.unwrap();
        let _rx = listener.register("expected").await;

        let response = get(addr, "/oauth/callback?code=abc&state=forged").await;
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains("Invalid or expired state"));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_callback_forwards_provider_error() {
        let listener = CallbackListener::new(0);
        let addr = listener.start().await.unwrap();
        let rx = listener.register("xyz").await;

        let response = get(
            addr,
            "/oauth/callback?error=access_denied&error_description=user%20said%20no&state=xyz",
        )
        .await;
        assert!(response.contains("Authorization Failed"));
        assert_eq!(
            rx.await.unwrap(),
            Err("access_denied: user said no".to_string())
        );

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_debug_path_shows_code() {
        let listener = CallbackListener::new(0);
        let addr = listener.start().await.unwrap();

        let response = get(addr, "/oauth/callback/debug?code=abc123&state=s1").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("abc123"));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let listener = CallbackListener::new(0);
        let addr = listener.start().await.unwrap();

        let response = get(addr, "/favicon.ico").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_wait_for_callback_times_out() {
        let listener = CallbackListener::new(0);
        let err = listener
            .wait_for_callback("never", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::AuthFailed(_)));
        assert!(listener.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_fails_waiters() {
        let listener = CallbackListener::new(0);
        listener.start().await.unwrap();
        let rx = listener.register("xyz").await;

        listener.stop().await;
        assert!(rx.await.unwrap().is_err());
        assert!(listener.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let listener = CallbackListener::new(0);
        let first = listener.start().await.unwrap();
        let second = listener.start().await.unwrap();
        assert_eq!(first, second);
        listener.stop().await;
    }
}
