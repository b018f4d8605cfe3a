//! Stdio transport: one JSON-RPC frame per line.

use super::{forward_payload, EventSender, Transport, TransportEvent};
use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Transport to a locally spawned server process.
///
/// Stdout lines are frames, stderr lines become diagnostics.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        events: EventSender,
    ) -> McpResult<Self> {
        debug!(command = command, args = ?args, "Starting MCP server process");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::transport(format!("failed to start '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::transport("failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::transport("failed to get stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::transport("failed to get stderr"))?;

        let connected = Arc::new(AtomicBool::new(true));

        let stdout_task = {
            let events = events.clone();
            let connected = connected.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            trace!(frame = %line, "Received stdio frame");
                            forward_payload(line, &events);
                        }
                        Ok(None) => {
                            debug!("Server process closed stdout");
                            connected.store(false, Ordering::SeqCst);
                            let _ = events.send(TransportEvent::Closed);
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read server stdout");
                            connected.store(false, Ordering::SeqCst);
                            let _ = events.send(TransportEvent::Error(format!(
                                "failed to read server output: {}",
                                e
                            )));
                            break;
                        }
                    }
                }
            })
        };

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = events.send(TransportEvent::Diagnostic(line));
            }
        });

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            readers: Mutex::new(vec![stdout_task, stderr_task]),
            connected,
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::transport("transport closed"))?;

        trace!(frame = %line.trim_end(), "Sending stdio frame");
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::transport(format!("failed to write to server: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::transport(format!("failed to flush server stdin: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Server process already exited");
            }
        }

        for task in self.readers.lock().await.drain(..) {
            task.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
