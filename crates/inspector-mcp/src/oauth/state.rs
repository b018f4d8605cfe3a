//! OAuth flow steps and the transitions between them.

use super::metadata::AuthServerMetadata;
use crate::error::{McpError, McpResult};
use inspector_auth::{OAuthClient, StoredTokens};
use serde::Serialize;
use std::fmt;

/// Name of a flow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthStepKind {
    MetadataDiscovery,
    ClientRegistration,
    AuthorizationRedirect,
    AuthorizationCode,
    TokenRequest,
    Complete,
}

impl OAuthStepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetadataDiscovery => "metadata_discovery",
            Self::ClientRegistration => "client_registration",
            Self::AuthorizationRedirect => "authorization_redirect",
            Self::AuthorizationCode => "authorization_code",
            Self::TokenRequest => "token_request",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for OAuthStepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authorization URL waiting for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingAuthorization {
    pub url: String,
    /// CSRF `state` parameter the callback must echo.
    pub state: String,
    pub code_verifier: String,
    pub redirect_uri: String,
}

/// What a token request exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum TokenGrant {
    AuthorizationCode {
        code: String,
        code_verifier: String,
        redirect_uri: String,
    },
    RefreshToken {
        refresh_token: String,
    },
}

/// A flow step with everything obtained so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum OAuthStep {
    MetadataDiscovery,
    ClientRegistration {
        metadata: AuthServerMetadata,
    },
    AuthorizationRedirect {
        metadata: AuthServerMetadata,
        client: OAuthClient,
    },
    AuthorizationCode {
        metadata: AuthServerMetadata,
        client: OAuthClient,
        authorization: PendingAuthorization,
    },
    TokenRequest {
        token_endpoint: String,
        client: OAuthClient,
        grant: TokenGrant,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<AuthServerMetadata>,
        /// Tokens being refreshed.
        #[serde(skip_serializing_if = "Option::is_none")]
        previous: Option<StoredTokens>,
    },
    Complete {
        tokens: StoredTokens,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_endpoint: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client: Option<OAuthClient>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<AuthServerMetadata>,
    },
}

impl OAuthStep {
    pub fn kind(&self) -> OAuthStepKind {
        match self {
            Self::MetadataDiscovery => OAuthStepKind::MetadataDiscovery,
            Self::ClientRegistration { .. } => OAuthStepKind::ClientRegistration,
            Self::AuthorizationRedirect { .. } => OAuthStepKind::AuthorizationRedirect,
            Self::AuthorizationCode { .. } => OAuthStepKind::AuthorizationCode,
            Self::TokenRequest { .. } => OAuthStepKind::TokenRequest,
            Self::Complete { .. } => OAuthStepKind::Complete,
        }
    }

    pub fn metadata(&self) -> Option<&AuthServerMetadata> {
        match self {
            Self::MetadataDiscovery => None,
            Self::ClientRegistration { metadata }
            | Self::AuthorizationRedirect { metadata, .. }
            | Self::AuthorizationCode { metadata, .. } => Some(metadata),
            Self::TokenRequest { metadata, .. } | Self::Complete { metadata, .. } => {
                metadata.as_ref()
            }
        }
    }

    pub fn client(&self) -> Option<&OAuthClient> {
        match self {
            Self::MetadataDiscovery | Self::ClientRegistration { .. } => None,
            Self::AuthorizationRedirect { client, .. }
            | Self::AuthorizationCode { client, .. }
            | Self::TokenRequest { client, .. } => Some(client),
            Self::Complete { client, .. } => client.as_ref(),
        }
    }

    /// Issued tokens, or the tokens a refresh is replacing.
    pub fn tokens(&self) -> Option<&StoredTokens> {
        match self {
            Self::Complete { tokens, .. } => Some(tokens),
            Self::TokenRequest { previous, .. } => previous.as_ref(),
            _ => None,
        }
    }

    pub fn authorization_url(&self) -> Option<&str> {
        match self {
            Self::AuthorizationCode { authorization, .. } => Some(&authorization.url),
            _ => None,
        }
    }

    /// The `state` parameter the callback must carry.
    pub fn oauth_state(&self) -> Option<&str> {
        match self {
            Self::AuthorizationCode { authorization, .. } => Some(&authorization.state),
            _ => None,
        }
    }

    pub fn discovered(&self, metadata: AuthServerMetadata) -> McpResult<Self> {
        match self {
            Self::MetadataDiscovery => Ok(Self::ClientRegistration { metadata }),
            other => Err(other.invalid("store discovered metadata")),
        }
    }

    pub fn registered(&self, client: OAuthClient) -> McpResult<Self> {
        match self {
            Self::ClientRegistration { metadata } => Ok(Self::AuthorizationRedirect {
                metadata: metadata.clone(),
                client,
            }),
            other => Err(other.invalid("store client information")),
        }
    }

    pub fn redirect_ready(&self, authorization: PendingAuthorization) -> McpResult<Self> {
        match self {
            Self::AuthorizationRedirect { metadata, client } => Ok(Self::AuthorizationCode {
                metadata: metadata.clone(),
                client: client.clone(),
                authorization,
            }),
            other => Err(other.invalid("build an authorization url")),
        }
    }

    pub fn code_received(&self, code: impl Into<String>) -> McpResult<Self> {
        match self {
            Self::AuthorizationCode {
                metadata,
                client,
                authorization,
            } => Ok(Self::TokenRequest {
                token_endpoint: metadata.token_endpoint.clone(),
                client: client.clone(),
                grant: TokenGrant::AuthorizationCode {
                    code: code.into(),
                    code_verifier: authorization.code_verifier.clone(),
                    redirect_uri: authorization.redirect_uri.clone(),
                },
                metadata: Some(metadata.clone()),
                previous: None,
            }),
            other => Err(other.invalid("accept an authorization code")),
        }
    }

    pub fn tokens_issued(&self, tokens: StoredTokens) -> McpResult<Self> {
        match self {
            Self::TokenRequest {
                token_endpoint,
                client,
                metadata,
                ..
            } => Ok(Self::Complete {
                tokens,
                token_endpoint: Some(token_endpoint.clone()),
                client: Some(client.clone()),
                metadata: metadata.clone(),
            }),
            other => Err(other.invalid("store issued tokens")),
        }
    }

    /// Re-enter the token request with the stored refresh token.
    pub fn begin_refresh(&self, client: OAuthClient) -> McpResult<Self> {
        match self {
            Self::Complete {
                tokens,
                token_endpoint,
                metadata,
                ..
            } => {
                let refresh_token = tokens
                    .refresh_token
                    .clone()
                    .ok_or_else(|| McpError::auth_failed("no refresh token available"))?;
                let token_endpoint = token_endpoint
                    .clone()
                    .or_else(|| metadata.as_ref().map(|m| m.token_endpoint.clone()))
                    .ok_or_else(|| McpError::auth_failed("token endpoint unknown"))?;
                Ok(Self::TokenRequest {
                    token_endpoint,
                    client,
                    grant: TokenGrant::RefreshToken { refresh_token },
                    metadata: metadata.clone(),
                    previous: Some(tokens.clone()),
                })
            }
            other => Err(other.invalid("refresh tokens")),
        }
    }

    fn invalid(&self, action: &str) -> McpError {
        McpError::auth_failed(format!("cannot {action} during {}", self.kind()))
    }
}

/// Observable state of one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OAuthState {
    pub step: OAuthStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for OAuthState {
    fn default() -> Self {
        Self {
            step: OAuthStep::MetadataDiscovery,
            last_error: None,
        }
    }
}

impl OAuthState {
    pub fn kind(&self) -> OAuthStepKind {
        self.step.kind()
    }
}
