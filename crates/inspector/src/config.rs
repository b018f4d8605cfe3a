//! Inspector configuration.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `<config dir>/mcp-inspector/config.json`
//! 2. Project config: `inspector.jsonc` or `inspector.json` in the working directory
//! 3. Environment overrides: `MCP_INSPECTOR_*` variables
//!
//! Files may contain `//` and `/* */` comments, and `{env:VAR_NAME}` is
//! replaced by the value of the environment variable.

use anyhow::{anyhow, bail, Context};
use inspector_mcp::{OAuthConfig, ServerConfig, SessionOptions, TransportConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{env:([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

pub const REQUEST_TIMEOUT_VAR: &str = "MCP_INSPECTOR_REQUEST_TIMEOUT";
pub const HANDSHAKE_TIMEOUT_VAR: &str = "MCP_INSPECTOR_HANDSHAKE_TIMEOUT";

const PROJECT_FILES: &[&str] = &["inspector.jsonc", "inspector.json"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectorConfig {
    /// Named servers, sorted for display.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub servers: BTreeMap<String, ServerEntry>,

    /// Per-request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,

    /// Initialize timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthSettings>,

    /// Default log filter, such as `info` or `inspector_mcp=debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// A configured server, without its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ServerEntry {
    pub fn to_server_config(&self, name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            transport: self.transport.clone(),
            headers: self.headers.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,
    /// Origin the stored tokens are keyed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl InspectorConfig {
    /// Load configuration from the global directory and `project_dir`.
    ///
    /// Returns the merged configuration and the files it came from.
    pub async fn load(project_dir: &Path) -> anyhow::Result<(Self, Vec<PathBuf>)> {
        let mut config = Self::default();
        let mut sources = Vec::new();

        if let Some(dir) = Self::global_config_dir() {
            let path = dir.join("config.json");
            if path.exists() {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        for name in PROJECT_FILES {
            let path = project_dir.join(name);
            if path.exists() {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
                break;
            }
        }

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok((config, sources))
    }

    /// Load exactly one file, plus environment overrides.
    pub async fn load_explicit(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load_file(path).await?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn global_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mcp-inspector"))
    }

    pub async fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let content = substitute_variables(&content, |name| std::env::var(name).ok())?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    fn parse_jsonc(content: &str, source: &str) -> anyhow::Result<Self> {
        let stripped = strip_comments(content);
        serde_json::from_str(&stripped).with_context(|| format!("invalid config in {}", source))
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        self.servers.extend(other.servers);
        self.request_timeout = other.request_timeout.or(self.request_timeout);
        self.handshake_timeout = other.handshake_timeout.or(self.handshake_timeout);
        self.oauth = match (self.oauth, other.oauth) {
            (Some(base), Some(other)) => Some(OAuthSettings {
                client_id: other.client_id.or(base.client_id),
                client_secret: other.client_secret.or(base.client_secret),
                scope: other.scope.or(base.scope),
                callback_port: other.callback_port.or(base.callback_port),
                origin: other.origin.or(base.origin),
            }),
            (base, other) => other.or(base),
        };
        self.log_level = other.log_level.or(self.log_level);
        self
    }

    /// Apply `MCP_INSPECTOR_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(REQUEST_TIMEOUT_VAR) {
            self.request_timeout = Some(parse_seconds(REQUEST_TIMEOUT_VAR, &value)?);
        }
        if let Some(value) = lookup(HANDSHAKE_TIMEOUT_VAR) {
            self.handshake_timeout = Some(parse_seconds(HANDSHAKE_TIMEOUT_VAR, &value)?);
        }
        Ok(())
    }

    pub fn server(&self, name: &str) -> anyhow::Result<ServerConfig> {
        match self.servers.get(name) {
            Some(entry) => Ok(entry.to_server_config(name)),
            None if self.servers.is_empty() => bail!("Server '{name}' not found: no servers configured"),
            None => {
                let known: Vec<&str> = self.servers.keys().map(String::as_str).collect();
                bail!("Server '{name}' not found (configured: {})", known.join(", "))
            }
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::default();
        if let Some(secs) = self.request_timeout {
            options.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.handshake_timeout {
            options.handshake_timeout = Duration::from_secs(secs);
        }
        options
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        let mut config = OAuthConfig::default();
        let Some(settings) = &self.oauth else {
            return config;
        };
        config.client_id = settings.client_id.clone();
        config.client_secret = settings.client_secret.clone();
        config.scope = settings.scope.clone();
        if let Some(port) = settings.callback_port {
            config.callback_port = port;
        }
        if let Some(origin) = &settings.origin {
            config.origin = origin.clone();
        }
        config
    }
}

fn parse_seconds(name: &str, value: &str) -> anyhow::Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(0) => bail!("{name} must be at least one second"),
        Ok(secs) => Ok(secs),
        Err(_) => Err(anyhow!("{name} must be a number of seconds, got '{value}'")),
    }
}

/// Replace every `{env:VAR}` in `content`.
fn substitute_variables<F>(content: &str, lookup: F) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;
    let result = var_regex().replace_all(content, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing = Some(name.to_string());
            String::new()
        })
    });
    if let Some(name) = missing {
        bail!("environment variable '{name}' referenced in config is not set");
    }
    Ok(result.into_owned())
}

/// Strip `//` and `/* */` comments outside of strings.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
            result.push(c);
            continue;
        }

        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    // Keep line numbers in parse errors.
                    if c == '\n' {
                        result.push('\n');
                    }
                    prev = c;
                }
            }
            _ => result.push(c),
        }
    }

    result
}
