//! Target server configuration and connection status.

use crate::error::{McpError, McpResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Which wire transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable-http" | "http" => Ok(Self::StreamableHttp),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

/// How to reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// Spawn a local process and speak over its stdin/stdout.
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// Legacy HTTP+SSE transport.
    Sse { url: String },
    /// Streamable HTTP transport.
    StreamableHttp { url: String },
}

/// Configuration for one target server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name.
    pub name: String,

    #[serde(flatten)]
    pub transport: TransportConfig,

    /// Extra HTTP headers sent on every request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ServerConfig {
    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            transport: TransportConfig::Stdio {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: HashMap::new(),
            },
            headers: HashMap::new(),
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Sse { url: url.into() },
            headers: HashMap::new(),
        }
    }

    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::StreamableHttp { url: url.into() },
            headers: HashMap::new(),
        }
    }

    /// Add a header (HTTP transports only).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add an environment variable (stdio transport only).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn kind(&self) -> TransportKind {
        match self.transport {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }

    /// The URL for HTTP transports.
    pub fn url(&self) -> Option<&str> {
        match &self.transport {
            TransportConfig::Sse { url } | TransportConfig::StreamableHttp { url } => Some(url),
            TransportConfig::Stdio { .. } => None,
        }
    }

    /// URL or command line, for display.
    pub fn endpoint(&self) -> String {
        match &self.transport {
            TransportConfig::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            TransportConfig::Stdio { command, args, .. } => {
                format!("{} {}", command, args.join(" "))
            }
            TransportConfig::Sse { url } | TransportConfig::StreamableHttp { url } => url.clone(),
        }
    }

    /// Reject configurations that cannot possibly connect.
    pub fn validate(&self) -> McpResult<()> {
        match &self.transport {
            TransportConfig::Stdio { command, .. } if command.trim().is_empty() => Err(
                McpError::InvalidConfig(format!("server '{}' has an empty command", self.name)),
            ),
            TransportConfig::Sse { url } | TransportConfig::StreamableHttp { url } => {
                let parsed = url::Url::parse(url).map_err(|e| {
                    McpError::InvalidConfig(format!("server '{}' has invalid url: {}", self.name, e))
                })?;
                match parsed.scheme() {
                    "http" | "https" => Ok(()),
                    scheme => Err(McpError::InvalidConfig(format!(
                        "server '{}' uses unsupported scheme '{}'",
                        self.name, scheme
                    ))),
                }
            }
            TransportConfig::Stdio { .. } => Ok(()),
        }
    }
}

/// State of the inspector's connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connect attempt or the live session failed.
    Error(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}
