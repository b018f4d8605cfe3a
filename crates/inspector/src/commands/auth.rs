//! OAuth command handlers.

use crate::config::InspectorConfig;
use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Args;
use inspector_auth::{OAuthClient, TokenStore};
use inspector_mcp::oauth::{FlowOverrides, OAUTH_DEBUG_CALLBACK_PATH};
use inspector_mcp::{
    AuthProvider, AuthorizationPrompt, CallbackListener, McpResult, OAuthAuthenticator, OAuthFlow,
    OAuthStepKind, ServerConfig,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Options for `auth`.
#[derive(Debug, Clone, Args)]
pub struct AuthArgs {
    /// Step through the flow, printing its state after every step
    #[arg(long)]
    pub debug: bool,

    /// Use this client ID instead of registering one
    #[arg(long, requires = "debug")]
    pub client_id: Option<String>,

    /// Scopes to request
    #[arg(long, requires = "debug")]
    pub scope: Option<String>,

    /// Redirect URI to send instead of the local debug callback
    #[arg(long, requires = "debug")]
    pub redirect_uri: Option<String>,

    /// Authorization code to use instead of waiting for one
    #[arg(long, requires = "debug")]
    pub code: Option<String>,
}

/// Prints the authorization URL and tries to open it in a browser.
pub struct TerminalPrompt;

#[async_trait]
impl AuthorizationPrompt for TerminalPrompt {
    async fn present(&self, url: &str) -> McpResult<()> {
        eprintln!("Open this URL in your browser to authorize:");
        eprintln!();
        eprintln!("  {url}");
        eprintln!();
        eprintln!("Waiting for the authorization callback...");
        if let Err(e) = open::that(url) {
            debug!(error = %e, "Could not open browser");
        }
        Ok(())
    }
}

pub fn authenticator(config: &InspectorConfig) -> anyhow::Result<OAuthAuthenticator> {
    let store = Arc::new(TokenStore::new()?);
    Ok(OAuthAuthenticator::new(
        config.oauth_config(),
        store,
        Arc::new(TerminalPrompt),
    ))
}

fn remote_url(target: &ServerConfig) -> anyhow::Result<&str> {
    match target.url() {
        Some(url) => Ok(url),
        None => bail!(
            "Server '{}' is not a remote server (OAuth only available for remote servers)",
            target.name
        ),
    }
}

/// Obtain tokens for `target`, refreshing stored ones when possible.
pub async fn authorize(target: &ServerConfig, config: &InspectorConfig) -> anyhow::Result<()> {
    let url = remote_url(target)?;
    let auth = authenticator(config)?;
    auth.authorize(url).await?;

    println!("✓ Authorized '{}'", target.name);
    println!("Tokens stored for {url}");
    Ok(())
}

/// Remove stored tokens and client registration for `target`.
pub async fn logout(target: &ServerConfig, config: &InspectorConfig) -> anyhow::Result<()> {
    let url = remote_url(target)?;
    authenticator(config)?.logout(url).await?;

    println!("✓ Removed stored OAuth credentials for '{}'", target.name);
    Ok(())
}

/// Run the OAuth flow one step at a time, printing the state after each.
///
/// The code comes from `--code`, the debug callback page, or stdin. The
/// callback listener only runs when neither `--code` nor `--redirect-uri`
/// is given.
pub async fn debug(
    target: &ServerConfig,
    config: &InspectorConfig,
    args: AuthArgs,
) -> anyhow::Result<()> {
    let url = remote_url(target)?;
    let oauth = config.oauth_config();
    let flow = authenticator(config)?.debug_flow(url);

    let listener = CallbackListener::new(oauth.callback_port);
    let listening = args.code.is_none() && args.redirect_uri.is_none();
    let redirect_uri = if listening {
        let addr = listener.start().await?;
        Some(format!(
            "http://127.0.0.1:{}{}",
            addr.port(),
            OAUTH_DEBUG_CALLBACK_PATH
        ))
    } else {
        args.redirect_uri
    };

    flow.set_overrides(FlowOverrides {
        client: args.client_id.map(OAuthClient::public),
        scope: args.scope,
        redirect_uri,
        metadata: None,
    })
    .await;
    flow.restart().await;
    print_state(&flow).await?;

    let result = step_through(&flow, &listener, listening, args.code).await;
    listener.stop().await;
    result?;

    println!("✓ Authorized '{}'", target.name);
    println!("Tokens stored for {url}");
    Ok(())
}

async fn step_through(
    flow: &OAuthFlow,
    listener: &CallbackListener,
    listening: bool,
    mut code: Option<String>,
) -> anyhow::Result<()> {
    loop {
        let step = flow.advance().await;
        print_state(flow).await?;
        match step? {
            OAuthStepKind::Complete => return Ok(()),
            OAuthStepKind::AuthorizationCode => {
                let code = match code.take() {
                    Some(code) => code,
                    None => obtain_code(flow, listener, listening).await?,
                };
                flow.supply_authorization_code(&code).await?;
                print_state(flow).await?;
            }
            _ => {}
        }
    }
}

async fn print_state(flow: &OAuthFlow) -> anyhow::Result<()> {
    let state = flow.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn obtain_code(
    flow: &OAuthFlow,
    listener: &CallbackListener,
    listening: bool,
) -> anyhow::Result<String> {
    let snapshot = flow.snapshot().await;
    let url = snapshot
        .step
        .authorization_url()
        .context("Flow has no authorization URL")?;
    let state = snapshot
        .step
        .oauth_state()
        .context("Flow has no state parameter")?;

    eprintln!("Open this URL in your browser to authorize:");
    eprintln!();
    eprintln!("  {url}");
    eprintln!();
    if let Err(e) = open::that(url) {
        debug!(error = %e, "Could not open browser");
    }

    if !listening {
        eprintln!("Paste the authorization code:");
        return typed_code()
            .await
            .ok()
            .flatten()
            .context("No authorization code supplied");
    }

    eprintln!("Waiting for the callback, or paste the authorization code:");
    let mut received = listener.register(state).await;
    tokio::select! {
        outcome = &mut received => delivered(outcome),
        typed = typed_code() => match typed.ok().flatten() {
            Some(code) => {
                listener.cancel(state).await;
                Ok(code)
            }
            // Stdin closed: only the callback can deliver now.
            None => delivered(received.await),
        },
    }
}

fn delivered(
    outcome: Result<Result<String, String>, oneshot::error::RecvError>,
) -> anyhow::Result<String> {
    match outcome {
        Ok(Ok(code)) => Ok(code),
        Ok(Err(error)) => bail!("Authorization failed: {error}"),
        Err(_) => bail!("Authorization cancelled"),
    }
}

/// The first non-empty line on stdin, or `None` at end of input.
///
/// Read on a plain thread so a pending read never holds up shutdown.
fn typed_code() -> oneshot::Receiver<Option<String>> {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        let code = loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break None,
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => break Some(line.trim().to_string()),
            }
        };
        let _ = tx.send(code);
    });
    rx
}
