//! Authorization server discovery.

use crate::error::{McpError, McpResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Authorization server metadata (RFC 8414 / OpenID Connect discovery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_challenge_methods_supported: Vec<String>,
}

impl AuthServerMetadata {
    /// Conventional endpoints on the server origin, used when nothing is
    /// published.
    pub fn fallback(base: &Url) -> Self {
        let origin = base.origin().ascii_serialization();
        Self {
            issuer: Some(origin.clone()),
            authorization_endpoint: format!("{origin}/authorize"),
            token_endpoint: format!("{origin}/token"),
            registration_endpoint: Some(format!("{origin}/register")),
            scopes_supported: Vec::new(),
            code_challenge_methods_supported: Vec::new(),
        }
    }
}

/// Protected resource metadata (RFC 9728).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

/// Discover the authorization server for an MCP endpoint.
///
/// Protected resource metadata names the authorization server; without it the
/// endpoint's own origin is assumed. Sources that answer with an error status
/// are skipped. Network failures and malformed documents are errors.
pub async fn discover(http: &reqwest::Client, target: &str) -> McpResult<AuthServerMetadata> {
    let target_url = Url::parse(target)
        .map_err(|e| McpError::InvalidConfig(format!("invalid server url {target}: {e}")))?;

    let mut issuer = target_url.clone();
    for candidate in well_known_urls(&target_url, "oauth-protected-resource") {
        if let Some(resource) = fetch::<ProtectedResourceMetadata>(http, &candidate).await? {
            if let Some(server) = resource.authorization_servers.first() {
                issuer = Url::parse(server).map_err(|e| {
                    McpError::auth_failed(format!("invalid authorization server {server}: {e}"))
                })?;
            }
            break;
        }
    }

    let mut candidates = well_known_urls(&issuer, "oauth-authorization-server");
    candidates.extend(well_known_urls(&issuer, "openid-configuration"));
    for candidate in candidates {
        if let Some(metadata) = fetch::<AuthServerMetadata>(http, &candidate).await? {
            debug!(url = %candidate, "Discovered authorization server metadata");
            return Ok(metadata);
        }
    }

    debug!(issuer = %issuer, "No authorization server metadata, using default endpoints");
    Ok(AuthServerMetadata::fallback(&issuer))
}

/// Well-known URLs for `suffix`, path-inserted first when the base has a path.
fn well_known_urls(base: &Url, suffix: &str) -> Vec<String> {
    let origin = base.origin().ascii_serialization();
    let path = base.path().trim_end_matches('/');
    let mut urls = Vec::with_capacity(2);
    if !path.is_empty() {
        urls.push(format!("{origin}/.well-known/{suffix}{path}"));
    }
    urls.push(format!("{origin}/.well-known/{suffix}"));
    urls
}

async fn fetch<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> McpResult<Option<T>> {
    let response = http
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| McpError::auth_failed(format!("discovery request to {url} failed: {e}")))?;

    if !response.status().is_success() {
        debug!(url = %url, status = %response.status(), "Discovery source unavailable");
        return Ok(None);
    }

    let document = response
        .json::<T>()
        .await
        .map_err(|e| McpError::auth_failed(format!("invalid metadata at {url}: {e}")))?;
    Ok(Some(document))
}
