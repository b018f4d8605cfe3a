//! Session core of the MCP inspector.
//!
//! Connects to a single Model Context Protocol server, issues requests on the
//! operator's behalf, and surfaces everything the server sends back:
//! responses, notifications, diagnostics and server-initiated requests that
//! wait for the operator to answer them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  call   ┌────────────────┐  frames  ┌───────────┐
//! │ operator │────────▶│ SessionManager │─────────▶│ transport │
//! │          │◀────────│  dispatcher    │◀─────────│ stdio/sse │
//! └──────────┘ handler │  router        │          │ /http     │
//!                      └────────────────┘          └───────────┘
//! ```
//!
//! # Supported Transports
//!
//! - **stdio**: Local servers via stdin/stdout, stderr lines become diagnostics
//! - **SSE**: Remote servers via the legacy Server-Sent Events transport
//! - **Streamable HTTP**: Remote servers via POST with JSON or SSE responses
//! - **OAuth**: Authorization code flow with PKCE for remote servers
//!
//! # Example
//!
//! ```no_run
//! use inspector_mcp::{NoopHandler, ServerConfig, SessionManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let manager = SessionManager::new(Arc::new(NoopHandler))?;
//!
//! let config = ServerConfig::stdio(
//!     "everything",
//!     "npx",
//!     ["-y", "@modelcontextprotocol/server-everything"],
//! );
//! manager.connect(config).await?;
//!
//! let tools = manager.list_tools(None).await?;
//! for tool in &tools.tools {
//!     println!("{}", tool.name);
//! }
//!
//! manager.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod callback;
mod dispatcher;
mod error;
mod handler;
pub mod oauth;
mod operations;
pub mod protocol;
mod router;
pub mod schema;
mod server;
mod session;
pub mod transport;

pub use callback::CallbackListener;
pub use dispatcher::HistoryEntry;
pub use error::{McpError, McpResult};
pub use handler::{ChannelHandler, ClientHandler, InspectorEvent, NoopHandler};
pub use oauth::{
    AuthProvider, AuthorizationPrompt, OAuthAuthenticator, OAuthConfig, OAuthFlow, OAuthState,
    OAuthStepKind, OAuthTokens,
};
pub use protocol::{
    CallToolResult, ClientRequest, Content, Implementation, InitializeResult,
    JsonRpcNotification, LoggingLevel, Root, ServerCapabilities, Tool,
};
pub use router::{DiagnosticMessage, PendingOutcome, PendingRequest, ServerNotification};
pub use schema::{AnyResult, EmptyResult, JsonSchema, ResultSchema, Typed};
pub use server::{ConnectionStatus, ServerConfig, TransportConfig, TransportKind};
pub use session::{
    SessionManager, SessionOptions, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use transport::{Connector, DefaultConnector, Transport, TransportEvent};
