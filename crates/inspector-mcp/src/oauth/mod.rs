//! OAuth support for remote MCP servers.
//!
//! Implements the OAuth 2.0 authorization code flow with PKCE as a sequence
//! of explicit steps, so a debugging operator can run it one step at a time
//! and inspect what each step produced.

mod authenticator;
mod client;
mod flow;
mod metadata;
mod pkce;
mod state;

pub use authenticator::{AuthorizationPrompt, OAuthAuthenticator};
pub use client::{exchange_code, refresh_token, register_client, ClientRegistration};
pub use flow::{FlowOverrides, OAuthFlow};
pub use metadata::{discover, AuthServerMetadata, ProtectedResourceMetadata};
pub use pkce::{generate_state, PkceChallenge};
pub use state::{OAuthState, OAuthStep, OAuthStepKind, PendingAuthorization, TokenGrant};

use crate::error::McpResult;
use async_trait::async_trait;
use inspector_auth::{OAuthClient, StoredTokens};
use serde::{Deserialize, Serialize};

/// Default loopback callback port.
pub const DEFAULT_CALLBACK_PORT: u16 = 6274;

/// Callback path for normal authorization.
pub const OAUTH_CALLBACK_PATH: &str = "/oauth/callback";

/// Callback path for step-by-step debugging.
pub const OAUTH_DEBUG_CALLBACK_PATH: &str = "/oauth/callback/debug";

/// Origin tokens are stored under unless configured otherwise.
pub const DEFAULT_ORIGIN: &str = "http://localhost:6274";

/// Tokens within this many seconds of expiry are treated as expired.
pub const EXPIRY_MARGIN_SECS: u64 = 60;

/// OAuth configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Pre-registered client ID.
    pub client_id: Option<String>,
    /// Pre-registered client secret.
    pub client_secret: Option<String>,
    /// Requested scopes.
    pub scope: Option<String>,
    pub callback_port: u16,
    /// Inspector origin, half of the token storage key.
    pub origin: String,
    pub client_name: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            scope: None,
            callback_port: DEFAULT_CALLBACK_PORT,
            origin: DEFAULT_ORIGIN.to_string(),
            client_name: "MCP Inspector".to_string(),
        }
    }
}

impl OAuthConfig {
    pub fn redirect_uri(&self, debug: bool) -> String {
        let path = if debug {
            OAUTH_DEBUG_CALLBACK_PATH
        } else {
            OAUTH_CALLBACK_PATH
        };
        format!("http://127.0.0.1:{}{}", self.callback_port, path)
    }

    /// The statically configured client, if any.
    pub fn configured_client(&self) -> Option<OAuthClient> {
        self.client_id.as_ref().map(|id| OAuthClient {
            client_id: id.clone(),
            client_secret: self.client_secret.clone(),
            client_id_issued_at: None,
            client_secret_expires_at: None,
        })
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn bearer() -> String {
    "Bearer".to_string()
}

impl OAuthTokens {
    /// Convert to the stored form.
    ///
    /// A response without a refresh token keeps the one from `previous`.
    pub fn into_stored(self, now: u64, previous: Option<&StoredTokens>) -> StoredTokens {
        let refresh_token = self
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));
        StoredTokens {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token,
            expires_at: self.expires_in.map(|secs| now + secs),
            scope: self.scope,
        }
    }
}

/// Supplies credentials for HTTP transports.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// A usable access token for `target`, refreshing if needed.
    async fn bearer_token(&self, target: &str) -> McpResult<Option<String>>;

    /// Obtain a new access token for `target` after the server refused the
    /// current one.
    async fn authorize(&self, target: &str) -> McpResult<String>;
}
