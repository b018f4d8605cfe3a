//! Requests against the authorization server.

use super::metadata::AuthServerMetadata;
use super::pkce::PkceChallenge;
use super::{OAuthConfig, OAuthTokens};
use crate::error::{McpError, McpResult};
use inspector_auth::OAuthClient;
use serde::Serialize;
use tracing::info;
use url::Url;

/// Dynamic client registration request (RFC 7591).
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistration {
    pub redirect_uris: Vec<String>,
    pub client_name: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ClientRegistration {
    pub fn for_inspector(config: &OAuthConfig, redirect_uri: &str) -> Self {
        let auth_method = if config.client_secret.is_some() {
            "client_secret_post"
        } else {
            "none"
        };
        Self {
            redirect_uris: vec![redirect_uri.to_string()],
            client_name: config.client_name.clone(),
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: auth_method.to_string(),
            scope: config.scope.clone(),
        }
    }
}

/// Register a client with the authorization server.
pub async fn register_client(
    http: &reqwest::Client,
    registration_endpoint: &str,
    registration: &ClientRegistration,
) -> McpResult<OAuthClient> {
    let response = http
        .post(registration_endpoint)
        .json(registration)
        .send()
        .await
        .map_err(|e| McpError::auth_failed(format!("Registration request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(McpError::auth_failed(format!(
            "Client registration failed ({status}): {text}"
        )));
    }

    let client: OAuthClient = response
        .json()
        .await
        .map_err(|e| McpError::auth_failed(format!("Invalid registration response: {e}")))?;

    info!(client_id = %client.client_id, "Registered OAuth client");
    Ok(client)
}

/// Build the URL the operator opens to authorize.
pub(crate) fn authorization_url(
    metadata: &AuthServerMetadata,
    client: &OAuthClient,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    pkce: &PkceChallenge,
    resource: &str,
) -> McpResult<String> {
    let mut url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
        McpError::auth_failed(format!(
            "invalid authorization endpoint {}: {e}",
            metadata.authorization_endpoint
        ))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &client.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", PkceChallenge::METHOD)
            .append_pair("resource", resource);
        if let Some(scope) = scope {
            query.append_pair("scope", scope);
        }
    }

    Ok(url.into())
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    token_endpoint: &str,
    client: &OAuthClient,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
    resource: &str,
) -> McpResult<OAuthTokens> {
    let params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("code_verifier", code_verifier),
        ("resource", resource),
    ];
    token_request(http, token_endpoint, client, params, "Token exchange").await
}

/// Obtain new tokens with a refresh token.
pub async fn refresh_token(
    http: &reqwest::Client,
    token_endpoint: &str,
    client: &OAuthClient,
    refresh_token: &str,
    resource: &str,
) -> McpResult<OAuthTokens> {
    let params = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("resource", resource),
    ];
    token_request(http, token_endpoint, client, params, "Token refresh").await
}

async fn token_request<'a>(
    http: &reqwest::Client,
    token_endpoint: &str,
    client: &'a OAuthClient,
    mut params: Vec<(&'a str, &'a str)>,
    action: &str,
) -> McpResult<OAuthTokens> {
    params.push(("client_id", &client.client_id));
    if let Some(secret) = client.client_secret.as_deref() {
        params.push(("client_secret", secret));
    }

    let response = http
        .post(token_endpoint)
        .header("Accept", "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| McpError::auth_failed(format!("{action} request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(McpError::auth_failed(format!(
            "{action} failed ({status}): {text}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| McpError::auth_failed(format!("Invalid token response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata(base: &str) -> AuthServerMetadata {
        AuthServerMetadata {
            issuer: None,
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/token"),
            registration_endpoint: Some(format!("{base}/register")),
            scopes_supported: Vec::new(),
            code_challenge_methods_supported: Vec::new(),
        }
    }

    #[test]
    fn test_registration_auth_method() {
        let mut config = OAuthConfig::default();
        let public = ClientRegistration::for_inspector(&config, "http://127.0.0.1:6274/oauth/callback");
        assert_eq!(public.token_endpoint_auth_method, "none");
        assert_eq!(public.client_name, "MCP Inspector");

        config.client_secret = Some("secret".to_string());
        let confidential = ClientRegistration::for_inspector(&config, "http://x/cb");
        assert_eq!(confidential.token_endpoint_auth_method, "client_secret_post");
    }

    #[test]
    fn test_authorization_url() {
        let pkce = PkceChallenge::from_verifier("verifier");
        let url = authorization_url(
            &metadata("https://auth.example.com"),
            &OAuthClient::public("client123"),
            "http://127.0.0.1:6274/oauth/callback",
            Some("read write"),
            "state123",
            &pkce,
            "https://example.com/mcp",
        )
        .unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/authorize");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client123");
        assert_eq!(pairs["state"], "state123");
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["scope"], "read write");
        assert_eq!(pairs["resource"], "https://example.com/mcp");
    }

    #[test]
    fn test_authorization_url_without_scope() {
        let pkce = PkceChallenge::generate();
        let url = authorization_url(
            &metadata("https://auth.example.com"),
            &OAuthClient::public("client123"),
            "http://127.0.0.1:6274/oauth/callback",
            None,
            "state123",
            &pkce,
            "https://example.com/mcp",
        )
        .unwrap();
        assert!(!url.contains("scope="));
    }

    #[tokio::test]
    async fn test_register_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .and(body_string_contains("authorization_code"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "client_id": "dyn-client",
                "client_id_issued_at": 1700000000,
                "redirect_uris": ["http://127.0.0.1:6274/oauth/callback"]
            })))
            .mount(&server)
            .await;

        let registration =
            ClientRegistration::for_inspector(&OAuthConfig::default(), "http://127.0.0.1:6274/oauth/callback");
        let client = register_client(
            &reqwest::Client::new(),
            &format!("{}/register", server.uri()),
            &registration,
        )
        .await
        .unwrap();
        assert_eq!(client.client_id, "dyn-client");
        assert_eq!(client.client_id_issued_at, Some(1700000000));
        assert!(client.client_secret.is_none());
    }

    #[tokio::test]
    async fn test_exchange_code_sends_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=the-verifier"))
            .and(body_string_contains("client_id=client123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "refresh_token": "rt",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let tokens = exchange_code(
            &reqwest::Client::new(),
            &format!("{}/token", server.uri()),
            &OAuthClient::public("client123"),
            "code",
            "the-verifier",
            "http://127.0.0.1:6274/oauth/callback",
            "http://example.com/mcp",
        )
        .await
        .unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
        assert_eq!(tokens.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn test_refresh_failure_is_auth_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let err = refresh_token(
            &reqwest::Client::new(),
            &format!("{}/token", server.uri()),
            &OAuthClient::public("client123"),
            "stale",
            "http://example.com/mcp",
        )
        .await
        .unwrap_err();
        match err {
            McpError::AuthFailed(message) => assert!(message.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
