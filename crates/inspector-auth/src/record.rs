//! Stored OAuth artifacts.

use serde::{Deserialize, Serialize};

/// Access and refresh tokens as persisted between sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry in seconds since Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredTokens {
    /// Create a bearer token without expiry or refresh token.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        }
    }

    /// Whether the access token expires within `margin_secs` of `now`.
    ///
    /// Tokens without an expiry never expire.
    pub fn is_expired(&self, now: u64, margin_secs: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin_secs >= expires_at,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Client credentials, either configured statically or obtained through
/// dynamic client registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
    /// Zero means the secret never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
}

impl OAuthClient {
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            client_id_issued_at: None,
            client_secret_expires_at: None,
        }
    }

    /// Whether the client secret has expired.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.client_secret_expires_at {
            Some(0) | None => false,
            Some(expires_at) => now >= expires_at,
        }
    }
}

/// Everything remembered about one target server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<StoredTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<OAuthClient>,
    /// Token endpoint used to obtain the stored tokens, kept for refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

impl OAuthRecord {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_none() && self.client.is_none() && self.token_endpoint.is_none()
    }
}
