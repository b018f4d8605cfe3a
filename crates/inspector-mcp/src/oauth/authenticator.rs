//! Automatic OAuth for connecting sessions.

use super::flow::{FlowOverrides, OAuthFlow};
use super::{AuthProvider, OAuthConfig, OAUTH_CALLBACK_PATH};
use crate::callback::CallbackListener;
use crate::error::{McpError, McpResult};
use async_trait::async_trait;
use inspector_auth::TokenStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Shows the authorization URL to the operator.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    async fn present(&self, url: &str) -> McpResult<()>;
}

const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// [`AuthProvider`] that runs the full authorization code flow, receiving
/// the code on the loopback callback listener.
pub struct OAuthAuthenticator {
    config: OAuthConfig,
    store: Arc<TokenStore>,
    http: reqwest::Client,
    prompt: Arc<dyn AuthorizationPrompt>,
    listener: Arc<CallbackListener>,
    flows: Mutex<HashMap<String, Arc<OAuthFlow>>>,
    authorization_timeout: Duration,
}

impl OAuthAuthenticator {
    pub fn new(
        config: OAuthConfig,
        store: Arc<TokenStore>,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        let listener = Arc::new(CallbackListener::new(config.callback_port));
        Self {
            config,
            store,
            http: reqwest::Client::new(),
            prompt,
            listener,
            flows: Mutex::new(HashMap::new()),
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    /// The flow for `target`, created on first use.
    pub async fn flow(&self, target: &str) -> Arc<OAuthFlow> {
        let mut flows = self.flows.lock().await;
        flows
            .entry(target.to_string())
            .or_insert_with(|| {
                Arc::new(OAuthFlow::new(
                    target,
                    self.config.clone(),
                    self.store.clone(),
                    self.http.clone(),
                ))
            })
            .clone()
    }

    /// A standalone flow for stepping through authorization by hand.
    ///
    /// It redirects to the debug callback path and is not shared with
    /// connecting sessions, though tokens it obtains land in the same store.
    pub fn debug_flow(&self, target: &str) -> OAuthFlow {
        OAuthFlow::new(
            target,
            self.config.clone(),
            self.store.clone(),
            self.http.clone(),
        )
        .with_debug_callback()
    }

    pub async fn logout(&self, target: &str) -> McpResult<()> {
        self.flow(target).await.logout().await
    }

    async fn authorize_interactively(&self, flow: &OAuthFlow) -> McpResult<String> {
        let addr = self.listener.start().await?;
        // The listener may have picked its own port.
        flow.set_overrides(FlowOverrides {
            redirect_uri: Some(format!(
                "http://127.0.0.1:{}{}",
                addr.port(),
                OAUTH_CALLBACK_PATH
            )),
            ..FlowOverrides::default()
        })
        .await;
        flow.restart().await;

        let Some(pending) = flow.run_to_redirect().await? else {
            return flow.complete_authorization().await.map(|t| t.access_token);
        };

        let receiver = self.listener.register(&pending.state).await;
        if let Err(e) = self.prompt.present(&pending.url).await {
            self.listener.cancel(&pending.state).await;
            return Err(e);
        }

        let code = match tokio::time::timeout(self.authorization_timeout, receiver).await {
            Ok(Ok(Ok(code))) => code,
            Ok(Ok(Err(error))) => {
                flow.fail_authorization(error.clone()).await;
                return Err(McpError::AuthFailed(error));
            }
            Ok(Err(_)) => return Err(McpError::auth_failed("Authorization cancelled")),
            Err(_) => {
                self.listener.cancel(&pending.state).await;
                flow.fail_authorization("authorization timed out").await;
                return Err(McpError::auth_failed(
                    "timed out waiting for the authorization code",
                ));
            }
        };

        flow.supply_authorization_code(&code).await?;
        let tokens = flow.complete_authorization().await?;
        info!(server = %flow.target(), "OAuth authorization complete");
        Ok(tokens.access_token)
    }
}

#[async_trait]
impl AuthProvider for OAuthAuthenticator {
    async fn bearer_token(&self, target: &str) -> McpResult<Option<String>> {
        self.flow(target).await.access_token().await
    }

    async fn authorize(&self, target: &str) -> McpResult<String> {
        let flow = self.flow(target).await;

        let stored = self.store.get(flow.key()).await?.and_then(|r| r.tokens);
        if stored.as_ref().is_some_and(|t| t.can_refresh()) {
            match flow.refresh().await {
                Ok(tokens) => return Ok(tokens.access_token),
                Err(e) => warn!(server = %target, error = %e, "Refresh failed, reauthorizing"),
            }
        }

        self.authorize_interactively(&flow).await
    }
}
