//! Step-by-step OAuth flow for one target server.

use super::client::{self, authorization_url, ClientRegistration};
use super::metadata::{self, AuthServerMetadata};
use super::pkce::{generate_state, PkceChallenge};
use super::state::{OAuthState, OAuthStep, OAuthStepKind, PendingAuthorization, TokenGrant};
use super::{OAuthConfig, EXPIRY_MARGIN_SECS};
use crate::error::{McpError, McpResult};
use inspector_auth::{current_time_secs, token_key, OAuthClient, StoredTokens, TokenStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Operator-supplied values that replace discovered or configured ones.
#[derive(Debug, Clone, Default)]
pub struct FlowOverrides {
    pub metadata: Option<AuthServerMetadata>,
    pub client: Option<OAuthClient>,
    pub scope: Option<String>,
    pub redirect_uri: Option<String>,
}

/// OAuth flow against one target endpoint.
///
/// Each call to [`advance`](Self::advance) runs exactly one step. Failures
/// record `last_error` and leave the step and its artifacts in place so the
/// step can be retried.
pub struct OAuthFlow {
    target: String,
    key: String,
    config: OAuthConfig,
    http: reqwest::Client,
    store: Arc<TokenStore>,
    debug: bool,
    overrides: RwLock<FlowOverrides>,
    state: RwLock<OAuthState>,
    /// Bumped on every state change.
    progress: watch::Sender<u64>,
}

impl OAuthFlow {
    pub fn new(
        target: impl Into<String>,
        config: OAuthConfig,
        store: Arc<TokenStore>,
        http: reqwest::Client,
    ) -> Self {
        let target = target.into();
        let (progress, _) = watch::channel(0);
        Self {
            key: token_key(&config.origin, &target),
            target,
            config,
            http,
            store,
            debug: false,
            overrides: RwLock::new(FlowOverrides::default()),
            state: RwLock::new(OAuthState::default()),
            progress,
        }
    }

    /// Use the debug callback path, which displays the code instead of
    /// handing it over automatically.
    pub fn with_debug_callback(mut self) -> Self {
        self.debug = true;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Key the flow's artifacts are stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn snapshot(&self) -> OAuthState {
        self.state.read().await.clone()
    }

    pub async fn set_overrides(&self, overrides: FlowOverrides) {
        *self.overrides.write().await = overrides;
    }

    pub async fn redirect_uri(&self) -> String {
        self.overrides
            .read()
            .await
            .redirect_uri
            .clone()
            .unwrap_or_else(|| self.config.redirect_uri(self.debug))
    }

    /// Start the flow, at `complete` when tokens are stored.
    pub async fn begin_flow(&self) -> McpResult<OAuthStepKind> {
        let record = self.store.get(&self.key).await?.unwrap_or_default();
        let step = match record.tokens {
            Some(tokens) => OAuthStep::Complete {
                tokens,
                token_endpoint: record.token_endpoint,
                client: record.client,
                metadata: None,
            },
            None => OAuthStep::MetadataDiscovery,
        };
        let kind = step.kind();
        self.replace(step).await;
        debug!(server = %self.target, step = %kind, "OAuth flow started");
        Ok(kind)
    }

    /// Start a fresh authorization, ignoring stored tokens.
    pub async fn restart(&self) {
        self.replace(OAuthStep::MetadataDiscovery).await;
    }

    /// Run the current step.
    ///
    /// `authorization_code` and `complete` do nothing: the first waits for
    /// [`supply_authorization_code`](Self::supply_authorization_code).
    pub async fn advance(&self) -> McpResult<OAuthStepKind> {
        let (current, epoch) = {
            let state = self.state.read().await;
            (state.step.clone(), *self.progress.borrow())
        };

        let outcome = self.run_step(&current).await;

        let mut state = self.state.write().await;
        if *self.progress.borrow() != epoch {
            // Someone else moved the flow while this step was running.
            return Ok(state.kind());
        }
        match outcome {
            Ok(Some(next)) => {
                debug!(server = %self.target, from = %current.kind(), to = %next.kind(), "OAuth step");
                state.step = next;
                state.last_error = None;
                self.bump();
                Ok(state.kind())
            }
            Ok(None) => Ok(state.kind()),
            Err(e) => {
                warn!(server = %self.target, step = %current.kind(), error = %e, "OAuth step failed");
                state.last_error = Some(e.to_string());
                self.bump();
                Err(e)
            }
        }
    }

    /// Hand over the authorization code obtained by the operator.
    pub async fn supply_authorization_code(&self, code: &str) -> McpResult<()> {
        let mut state = self.state.write().await;
        let next = state.step.code_received(code)?;
        state.step = next;
        state.last_error = None;
        self.bump();
        Ok(())
    }

    /// Record that the authorization server refused the request.
    pub async fn fail_authorization(&self, message: impl Into<String>) {
        let mut state = self.state.write().await;
        state.last_error = Some(message.into());
        self.bump();
    }

    /// Wait until the flow leaves `authorization_code`.
    pub async fn wait_for_code(&self, timeout: Duration) -> McpResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut progress = self.progress.subscribe();
        loop {
            let _ = progress.borrow_and_update();
            {
                let state = self.state.read().await;
                if state.kind() != OAuthStepKind::AuthorizationCode {
                    return Ok(());
                }
                if let Some(error) = &state.last_error {
                    return Err(McpError::auth_failed(error.clone()));
                }
            }
            match tokio::time::timeout_at(deadline, progress.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(McpError::auth_failed("OAuth flow dropped")),
                Err(_) => {
                    return Err(McpError::auth_failed(
                        "timed out waiting for the authorization code",
                    ))
                }
            }
        }
    }

    /// Advance until the operator has to act.
    ///
    /// Returns the pending authorization, or `None` when the flow is already
    /// complete.
    pub async fn run_to_redirect(&self) -> McpResult<Option<PendingAuthorization>> {
        loop {
            let step = self.state.read().await.step.clone();
            match step {
                OAuthStep::AuthorizationCode { authorization, .. } => {
                    return Ok(Some(authorization))
                }
                OAuthStep::Complete { .. } => return Ok(None),
                _ => {
                    self.advance().await?;
                }
            }
        }
    }

    /// Advance from a supplied code to `complete`.
    pub async fn complete_authorization(&self) -> McpResult<StoredTokens> {
        loop {
            let step = self.state.read().await.step.clone();
            match step {
                OAuthStep::Complete { tokens, .. } => return Ok(tokens),
                OAuthStep::AuthorizationCode { .. } => {
                    return Err(McpError::auth_failed("authorization code not supplied"))
                }
                _ => {
                    self.advance().await?;
                }
            }
        }
    }

    /// A usable access token, refreshing it when it is about to expire.
    ///
    /// A failed refresh is logged and reported as no token.
    pub async fn access_token(&self) -> McpResult<Option<String>> {
        let tokens = match self.state.read().await.step.clone() {
            OAuthStep::Complete { tokens, .. } => Some(tokens),
            _ => None,
        };
        let tokens = match tokens {
            Some(tokens) => Some(tokens),
            None => self.store.get(&self.key).await?.and_then(|r| r.tokens),
        };
        let Some(tokens) = tokens else {
            return Ok(None);
        };

        if !tokens.is_expired(current_time_secs(), EXPIRY_MARGIN_SECS) {
            return Ok(Some(tokens.access_token));
        }
        if !tokens.can_refresh() {
            debug!(server = %self.target, "Access token expired without refresh token");
            return Ok(None);
        }
        match self.refresh().await {
            Ok(tokens) => Ok(Some(tokens.access_token)),
            Err(e) => {
                warn!(server = %self.target, error = %e, "Token refresh failed");
                Ok(None)
            }
        }
    }

    /// Exchange the stored refresh token for new tokens.
    pub async fn refresh(&self) -> McpResult<StoredTokens> {
        if self.snapshot().await.kind() != OAuthStepKind::Complete
            && self.begin_flow().await? != OAuthStepKind::Complete
        {
            return Err(McpError::auth_failed("no stored tokens to refresh"));
        }

        {
            let mut state = self.state.write().await;
            let client = state
                .step
                .client()
                .cloned()
                .or_else(|| self.config.configured_client())
                .ok_or_else(|| McpError::auth_failed("no client for token refresh"))?;
            let next = state.step.begin_refresh(client)?;
            state.step = next;
            self.bump();
        }

        self.complete_authorization().await
    }

    /// Forget stored tokens and client for the target.
    pub async fn logout(&self) -> McpResult<()> {
        self.store.remove(&self.key).await?;
        self.replace(OAuthStep::MetadataDiscovery).await;
        info!(server = %self.target, "Removed stored OAuth credentials");
        Ok(())
    }

    async fn replace(&self, step: OAuthStep) {
        let mut state = self.state.write().await;
        state.step = step;
        state.last_error = None;
        self.bump();
    }

    fn bump(&self) {
        self.progress.send_modify(|epoch| *epoch += 1);
    }

    async fn run_step(&self, step: &OAuthStep) -> McpResult<Option<OAuthStep>> {
        match step {
            OAuthStep::MetadataDiscovery => {
                let metadata = match self.overrides.read().await.metadata.clone() {
                    Some(metadata) => metadata,
                    None => metadata::discover(&self.http, &self.target).await?,
                };
                step.discovered(metadata).map(Some)
            }
            OAuthStep::ClientRegistration { metadata } => {
                let client = self.resolve_client(metadata).await?;
                step.registered(client).map(Some)
            }
            OAuthStep::AuthorizationRedirect { metadata, client } => {
                let pkce = PkceChallenge::generate();
                let state = generate_state();
                let redirect_uri = self.redirect_uri().await;
                let scope = self
                    .overrides
                    .read()
                    .await
                    .scope
                    .clone()
                    .or_else(|| self.config.scope.clone());
                let url = authorization_url(
                    metadata,
                    client,
                    &redirect_uri,
                    scope.as_deref(),
                    &state,
                    &pkce,
                    &self.target,
                )?;
                step.redirect_ready(PendingAuthorization {
                    url,
                    state,
                    code_verifier: pkce.verifier,
                    redirect_uri,
                })
                .map(Some)
            }
            OAuthStep::AuthorizationCode { .. } | OAuthStep::Complete { .. } => Ok(None),
            OAuthStep::TokenRequest {
                token_endpoint,
                client,
                grant,
                previous,
                ..
            } => {
                let issued = match grant {
                    TokenGrant::AuthorizationCode {
                        code,
                        code_verifier,
                        redirect_uri,
                    } => {
                        client::exchange_code(
                            &self.http,
                            token_endpoint,
                            client,
                            code,
                            code_verifier,
                            redirect_uri,
                            &self.target,
                        )
                        .await?
                    }
                    TokenGrant::RefreshToken { refresh_token } => {
                        client::refresh_token(
                            &self.http,
                            token_endpoint,
                            client,
                            refresh_token,
                            &self.target,
                        )
                        .await?
                    }
                };
                let tokens = issued.into_stored(current_time_secs(), previous.as_ref());

                let stored = tokens.clone();
                let endpoint = token_endpoint.clone();
                let stored_client = client.clone();
                self.store
                    .update(&self.key, move |record| {
                        record.tokens = Some(stored);
                        record.token_endpoint = Some(endpoint);
                        record.client = Some(stored_client);
                    })
                    .await?;
                info!(server = %self.target, "Stored OAuth tokens");

                step.tokens_issued(tokens).map(Some)
            }
        }
    }

    async fn resolve_client(&self, metadata: &AuthServerMetadata) -> McpResult<OAuthClient> {
        if let Some(client) = self.overrides.read().await.client.clone() {
            return Ok(client);
        }
        if let Some(client) = self.config.configured_client() {
            return Ok(client);
        }
        if let Some(client) = self.store.get(&self.key).await?.and_then(|r| r.client) {
            if !client.is_expired(current_time_secs()) {
                debug!(server = %self.target, client_id = %client.client_id, "Reusing stored client");
                return Ok(client);
            }
            info!(server = %self.target, "Stored client secret expired");
        }

        let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
            McpError::auth_failed(
                "no client id configured and the server does not support dynamic registration",
            )
        })?;
        let redirect_uri = self.redirect_uri().await;
        let registration = ClientRegistration::for_inspector(&self.config, &redirect_uri);
        let client = client::register_client(&self.http, endpoint, &registration).await?;

        let stored = client.clone();
        self.store
            .update(&self.key, move |record| record.client = Some(stored))
            .await?;
        Ok(client)
    }
}
