//! The inspector's single live session.
//!
//! [`SessionManager`] owns the connection lifecycle: it opens the transport,
//! runs the initialize handshake, feeds inbound frames to the dispatcher and
//! router, and tears everything down on disconnect or transport loss.

use crate::dispatcher::{HistoryEntry, RequestDispatcher};
use crate::error::{McpError, McpResult};
use crate::handler::ClientHandler;
use crate::oauth::AuthProvider;
use crate::protocol::{
    methods, ClientRequest, Implementation, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcNotification, ServerCapabilities, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::router::{DiagnosticMessage, NotificationRouter, PendingRequest, ServerNotification};
use crate::schema::{JsonSchema, ResultSchema, Typed};
use crate::server::{ConnectionStatus, ServerConfig};
use crate::transport::{Connector, DefaultConnector, EventReceiver, Transport, TransportEvent};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default timeout for requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for the initialize exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Sent as `clientInfo` during initialize.
    pub client_info: Implementation,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            client_info: Implementation::default(),
        }
    }
}

struct LiveSession {
    generation: u64,
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    reader: JoinHandle<()>,
}

/// State shared with the reader task.
pub(crate) struct SessionShared {
    pub(crate) dispatcher: RequestDispatcher,
    pub(crate) router: NotificationRouter,
    handler: Arc<dyn ClientHandler>,
    slot: Mutex<Option<LiveSession>>,
    status: watch::Sender<ConnectionStatus>,
    init: RwLock<Option<InitializeResult>>,
    /// Generation of the transport being handshaken or served; zero for none.
    current_generation: AtomicU64,
    pub(crate) subscriptions: Mutex<HashSet<String>>,
    pub(crate) tool_schemas: Mutex<HashMap<String, Arc<JsonSchema>>>,
}

impl SessionShared {
    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status.clone();
            true
        });
        if changed {
            debug!(status = %status, "Connection status changed");
            self.handler.on_status_change(&status);
        }
    }

    /// End the live session if it matches `generation` (any when `None`).
    ///
    /// Returns whether a session was ended.
    async fn end_live(
        &self,
        generation: Option<u64>,
        cause: Option<&McpError>,
        abort_reader: bool,
    ) -> bool {
        let live = {
            let mut slot = self.slot.lock().await;
            let matches = match (slot.as_ref(), generation) {
                (Some(live), Some(generation)) => live.generation == generation,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                if let Some(generation) = generation {
                    // Lost before it was installed; connect checks this under the slot lock.
                    let _ = self.current_generation.compare_exchange(
                        generation,
                        0,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }
                return false;
            }
            slot.take()
        };
        let Some(live) = live else {
            return false;
        };

        self.teardown(live, abort_reader).await;
        match cause {
            Some(error) => {
                self.set_status(ConnectionStatus::Error(error.to_string()));
                self.handler.on_connection_error(error);
            }
            None => self.set_status(ConnectionStatus::Disconnected),
        }
        true
    }

    async fn teardown(&self, live: LiveSession, abort_reader: bool) {
        let _ = self.current_generation.compare_exchange(
            live.generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let failed = self.dispatcher.detach().await;
        let rejected = self.router.close_all().await;
        if let Err(e) = live.transport.close().await {
            debug!(error = %e, "Error closing transport");
        }
        if abort_reader {
            live.reader.abort();
        }
        self.subscriptions.lock().await.clear();
        self.tool_schemas.lock().await.clear();
        info!(
            server = %live.config.name,
            failed_requests = failed,
            rejected_pending = rejected,
            "Session closed"
        );
    }

    /// The transport of `generation` reported an error or closed.
    async fn transport_lost(&self, generation: u64, error: Option<String>) {
        if self.current_generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Ignoring close of a stale transport");
            return;
        }

        // Wake callers first; during a handshake there is no live session yet.
        let cause = match error {
            Some(message) => {
                warn!(error = %message, "Transport failed");
                self.dispatcher
                    .fail_in_flight(|| McpError::Transport(message.clone()))
                    .await;
                Some(McpError::Transport(message))
            }
            None => {
                info!("Transport closed by server");
                self.dispatcher
                    .fail_in_flight(|| McpError::SessionClosed)
                    .await;
                None
            }
        };
        self.end_live(Some(generation), cause.as_ref(), false).await;
    }
}

async fn run_reader(
    shared: Weak<SessionShared>,
    generation: u64,
    transport: Arc<dyn Transport>,
    mut events: EventReceiver,
) {
    let error = loop {
        let Some(event) = events.recv().await else {
            break None;
        };
        let Some(session) = shared.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message(JsonRpcMessage::Response(response)) => {
                session.dispatcher.handle_response(response).await
            }
            TransportEvent::Message(message) => session.router.route(message, &transport).await,
            TransportEvent::Diagnostic(line) => session.router.diagnostic(line).await,
            TransportEvent::Error(message) => break Some(message),
            TransportEvent::Closed => break None,
        }
    };

    if let Some(shared) = shared.upgrade() {
        shared.transport_lost(generation, error).await;
    }
}

/// Owns at most one live session with an MCP server.
///
/// Connects are serialized: a new connect tears down the previous session
/// before opening the next transport, so two sessions never coexist.
pub struct SessionManager {
    shared: Arc<SessionShared>,
    connector: Arc<dyn Connector>,
    auth: Option<Arc<dyn AuthProvider>>,
    options: SessionOptions,
    generation: AtomicU64,
    connect_lock: Mutex<()>,
    /// Bumped by every connect and disconnect; a connect in progress gives
    /// up once it no longer holds the latest value.
    connect_epoch: watch::Sender<u64>,
}

impl SessionManager {
    /// Create a manager using the real transports.
    pub fn new(handler: Arc<dyn ClientHandler>) -> McpResult<Self> {
        Ok(Self::with_connector(handler, Arc::new(DefaultConnector::new()?)))
    }

    pub fn with_connector(handler: Arc<dyn ClientHandler>, connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(SessionShared {
                dispatcher: RequestDispatcher::new(),
                router: NotificationRouter::new(handler.clone()),
                handler,
                slot: Mutex::new(None),
                status,
                init: RwLock::new(None),
                current_generation: AtomicU64::new(0),
                subscriptions: Mutex::new(HashSet::new()),
                tool_schemas: Mutex::new(HashMap::new()),
            }),
            connector,
            auth: None,
            options: SessionOptions::default(),
            generation: AtomicU64::new(0),
            connect_lock: Mutex::new(()),
            connect_epoch: watch::channel(0).0,
        }
    }

    /// Use `auth` for bearer tokens and automatic authorization on HTTP
    /// transports.
    pub fn with_auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn shared(&self) -> &SessionShared {
        &self.shared
    }

    /// Connect to `config`, replacing any live session.
    ///
    /// A connect still in progress is cancelled and returns
    /// [`McpError::Cancelled`].
    pub async fn connect(&self, config: ServerConfig) -> McpResult<InitializeResult> {
        let epoch = self.cancel_pending_connect();
        let _guard = self.connect_lock.lock().await;
        if *self.connect_epoch.borrow() != epoch {
            return Err(McpError::Cancelled);
        }
        self.shared.end_live(None, None, true).await;

        info!(server = %config.name, endpoint = %config.endpoint(), "Connecting");
        self.shared.set_status(ConnectionStatus::Connecting);

        let result = match self.establish(&config, epoch).await {
            Ok((live, init)) => self.install(live, init).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(init) => {
                info!(
                    server = %config.name,
                    server_name = %init.server_info.name,
                    protocol_version = %init.protocol_version,
                    "Connected"
                );
                Ok(init)
            }
            Err(McpError::Cancelled) => {
                info!(server = %config.name, "Connect cancelled");
                Err(McpError::Cancelled)
            }
            Err(e) => {
                warn!(server = %config.name, error = %e, "Connect failed");
                self.shared
                    .set_status(ConnectionStatus::Error(e.to_string()));
                self.shared.handler.on_connection_error(&e);
                Err(e)
            }
        }
    }

    async fn install(&self, live: LiveSession, init: InitializeResult) -> McpResult<InitializeResult> {
        let mut slot = self.shared.slot.lock().await;
        if self.shared.current_generation.load(Ordering::SeqCst) != live.generation {
            drop(slot);
            self.shared.teardown(live, true).await;
            return Err(McpError::transport("connection closed during initialize"));
        }
        *self.shared.init.write().await = Some(init.clone());
        *slot = Some(live);
        self.shared.set_status(ConnectionStatus::Connected);
        Ok(init)
    }

    /// Close the live session, cancelling a connect in progress. Calling it
    /// without one is a no-op.
    pub async fn disconnect(&self) {
        self.cancel_pending_connect();
        let _guard = self.connect_lock.lock().await;
        self.shared.end_live(None, None, true).await;
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    fn cancel_pending_connect(&self) -> u64 {
        let mut epoch = 0;
        self.connect_epoch.send_modify(|current| {
            *current += 1;
            epoch = *current;
        });
        epoch
    }

    /// Run `step` unless a later connect or disconnect supersedes `epoch`.
    async fn unless_cancelled<T>(
        &self,
        epoch: u64,
        step: impl Future<Output = McpResult<T>>,
    ) -> McpResult<T> {
        let mut latest = self.connect_epoch.subscribe();
        let superseded = async {
            loop {
                if *latest.borrow_and_update() != epoch {
                    return;
                }
                if latest.changed().await.is_err() {
                    return std::future::pending().await;
                }
            }
        };
        tokio::select! {
            result = step => result,
            _ = superseded => Err(McpError::Cancelled),
        }
    }

    async fn establish(
        &self,
        config: &ServerConfig,
        epoch: u64,
    ) -> McpResult<(LiveSession, InitializeResult)> {
        config.validate()?;

        match self.open_and_handshake(config, None, epoch).await {
            Err(McpError::AuthRequired) => {
                let (Some(auth), Some(url)) = (&self.auth, config.url()) else {
                    return Err(McpError::AuthRequired);
                };
                info!(server = %config.name, "Server requires authorization");
                let token = self.unless_cancelled(epoch, auth.authorize(url)).await?;
                self.open_and_handshake(config, Some(token), epoch).await
            }
            other => other,
        }
    }

    async fn open_and_handshake(
        &self,
        config: &ServerConfig,
        token: Option<String>,
        epoch: u64,
    ) -> McpResult<(LiveSession, InitializeResult)> {
        let mut headers = config.headers.clone();
        if let Some(url) = config.url() {
            let token = match (token, &self.auth) {
                (Some(token), _) => Some(token),
                (None, Some(auth)) => self.unless_cancelled(epoch, auth.bearer_token(url)).await?,
                (None, None) => None,
            };
            if let Some(token) = token {
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .current_generation
            .store(generation, Ordering::SeqCst);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = match self
            .unless_cancelled(epoch, self.connector.open(config, &headers, events_tx))
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                self.shared.current_generation.store(0, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.shared.dispatcher.attach(transport.clone()).await;
        let reader = tokio::spawn(run_reader(
            Arc::downgrade(&self.shared),
            generation,
            transport.clone(),
            events_rx,
        ));

        match self.unless_cancelled(epoch, self.handshake()).await {
            Ok(init) => Ok((
                LiveSession {
                    generation,
                    config: config.clone(),
                    transport,
                    reader,
                },
                init,
            )),
            Err(e) => {
                self.shared.current_generation.store(0, Ordering::SeqCst);
                self.shared.dispatcher.detach().await;
                self.shared.router.close_all().await;
                let _ = transport.close().await;
                reader.abort();
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> McpResult<InitializeResult> {
        let params = InitializeParams::new(self.options.client_info.clone());
        let request = ClientRequest::new(methods::INITIALIZE, Some(serde_json::to_value(&params)?));
        let init = self
            .shared
            .dispatcher
            .call_untracked(
                request,
                &Typed::<InitializeResult>::new(),
                self.options.handshake_timeout,
            )
            .await
            .map_err(|e| match e {
                McpError::Timeout => McpError::handshake_failed("initialize timed out"),
                McpError::SessionClosed => {
                    McpError::handshake_failed("connection closed during initialize")
                }
                McpError::Protocol { .. } | McpError::SchemaMismatch(_) => {
                    McpError::handshake_failed(e.to_string())
                }
                other => other,
            })?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(McpError::handshake_failed(format!(
                "unsupported protocol version {}",
                init.protocol_version
            )));
        }

        self.shared
            .dispatcher
            .notify(JsonRpcNotification::new(
                methods::NOTIFICATION_INITIALIZED,
                None,
            ))
            .await?;
        Ok(init)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.borrow().is_connected()
    }

    /// Configuration of the live session.
    pub async fn server_config(&self) -> Option<ServerConfig> {
        self.shared
            .slot
            .lock()
            .await
            .as_ref()
            .map(|live| live.config.clone())
    }

    /// Result of the last successful handshake.
    pub async fn initialize_result(&self) -> Option<InitializeResult> {
        self.shared.init.read().await.clone()
    }

    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.shared
            .init
            .read()
            .await
            .as_ref()
            .map(|init| init.capabilities.clone())
    }

    pub async fn server_info(&self) -> Option<Implementation> {
        self.shared
            .init
            .read()
            .await
            .as_ref()
            .map(|init| init.server_info.clone())
    }

    pub async fn supports_completion(&self) -> bool {
        self.server_capabilities()
            .await
            .is_some_and(|caps| caps.completions.is_some())
    }

    pub async fn supports_logging(&self) -> bool {
        self.server_capabilities()
            .await
            .is_some_and(|caps| caps.logging.is_some())
    }

    /// Send a request with the default timeout.
    pub async fn call<S: ResultSchema>(
        &self,
        request: ClientRequest,
        schema: &S,
    ) -> McpResult<S::Output> {
        self.call_with_timeout(request, schema, self.options.request_timeout)
            .await
    }

    pub async fn call_with_timeout<S: ResultSchema>(
        &self,
        request: ClientRequest,
        schema: &S,
        timeout: Duration,
    ) -> McpResult<S::Output> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let generation = self.shared.current_generation.load(Ordering::SeqCst);
        let result = self.shared.dispatcher.call(request, schema, timeout).await;
        self.settle_failure(generation, result).await
    }

    pub async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let generation = self.shared.current_generation.load(Ordering::SeqCst);
        let result = self.shared.dispatcher.notify(notification).await;
        self.settle_failure(generation, result).await
    }

    /// End the session a fatal error came from. A session that was already
    /// replaced is left alone and its callers see `SessionClosed`.
    async fn settle_failure<T>(&self, generation: u64, result: McpResult<T>) -> McpResult<T> {
        let Err(e) = result else {
            return result;
        };
        let current = self.shared.current_generation.load(Ordering::SeqCst);
        if current != generation {
            debug!(generation, error = %e, "Request failed after its session ended");
            if current != 0 && e.is_fatal() {
                return Err(McpError::SessionClosed);
            }
            return Err(e);
        }
        if e.is_fatal() {
            self.shared.end_live(Some(generation), Some(&e), true).await;
        }
        Err(e)
    }

    /// Answer a pending server request.
    pub async fn resolve_pending(&self, id: u64, result: Value) -> McpResult<()> {
        self.shared.router.resolve(id, result).await
    }

    /// Refuse a pending server request.
    pub async fn reject_pending(&self, id: u64, message: impl Into<String>) -> McpResult<()> {
        self.shared.router.reject(id, message).await
    }

    pub async fn pending_requests(&self) -> Vec<PendingRequest> {
        self.shared.router.pending().await
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.shared.dispatcher.history().await
    }

    pub async fn notifications(&self) -> Vec<ServerNotification> {
        self.shared.router.notifications().await
    }

    pub async fn diagnostics(&self) -> Vec<DiagnosticMessage> {
        self.shared.router.diagnostics().await
    }

    pub async fn clear_diagnostics(&self) {
        self.shared.router.clear_diagnostics().await
    }
}
