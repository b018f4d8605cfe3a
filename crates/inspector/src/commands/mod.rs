//! Command handlers for the CLI.

pub mod auth;
pub mod inspect;
pub mod logging;
pub mod servers;
pub mod session;

use crate::config::InspectorConfig;
use anyhow::bail;
use clap::Args;
use inspector_mcp::{ServerConfig, TransportKind};

/// Which server a command talks to.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Configured server name
    #[arg(short, long, conflicts_with_all = ["server_command", "url"])]
    pub server: Option<String>,

    /// Command that starts a stdio server
    #[arg(long = "command", conflicts_with = "url")]
    pub server_command: Option<String>,

    /// Argument for --command (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true, requires = "server_command")]
    pub server_args: Vec<String>,

    /// URL of a remote server
    #[arg(long)]
    pub url: Option<String>,

    /// Transport for --url: sse or streamable-http
    #[arg(long, default_value = "streamable-http")]
    pub transport: TransportKind,

    /// HTTP header for --url as NAME=VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_key_val, requires = "url")]
    pub headers: Vec<(String, String)>,
}

impl TargetArgs {
    /// Pick the server from the flags, falling back to the only configured one.
    pub fn resolve(&self, config: &InspectorConfig) -> anyhow::Result<ServerConfig> {
        if let Some(command) = &self.server_command {
            return Ok(ServerConfig::stdio(
                command.as_str(),
                command.as_str(),
                self.server_args.iter().cloned(),
            ));
        }

        if let Some(url) = &self.url {
            let mut server = match self.transport {
                TransportKind::Sse => ServerConfig::sse(url.as_str(), url.as_str()),
                TransportKind::StreamableHttp => {
                    ServerConfig::streamable_http(url.as_str(), url.as_str())
                }
                TransportKind::Stdio => bail!("Use --command for stdio servers"),
            };
            for (name, value) in &self.headers {
                server = server.with_header(name.as_str(), value.as_str());
            }
            return Ok(server);
        }

        if let Some(name) = &self.server {
            return config.server(name);
        }

        let mut names = config.servers.keys();
        match (names.next(), names.next()) {
            (Some(only), None) => config.server(only),
            (None, _) => bail!("No server selected: pass --server, --command or --url"),
            (Some(_), Some(_)) => bail!("Several servers configured: pick one with --server"),
        }
    }
}

/// Parse `NAME=VALUE`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Shorten `text` to at most `max` characters for table output.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
