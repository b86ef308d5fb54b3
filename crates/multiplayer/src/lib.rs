//! Middleware entry point: wires a local reactive store to a remote
//! key/value and pubsub service, turning it into a multiplayer one.

mod logging;
mod options;

pub use logging::init_tracing;
pub use options::MultiplayerOptions;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(5);

use orchestrator::{LifecycleState, Orchestrator, Store};
use remote::{HttpWsRemote, RemoteStorage};
use token::{AuthMode, IssuedToken, TokenManager};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid multiplayer configuration: {0}")]
    Config(&'static str),
    #[error(transparent)]
    Token(#[from] token::Error),
    #[error(transparent)]
    Orchestrator(#[from] orchestrator::Error),
}

/// The observable `multiplayer` slice an embedding application can
/// read off the store alongside its own state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplayerState {
    pub connection_state: LifecycleState,
    pub has_hydrated: bool,
    pub performance_metrics: metrics::PerformanceMetrics,
}

/// A running multiplayer attachment. Dropping this does not tear down
/// background tasks; call [`Multiplayer::destroy`] explicitly.
pub struct Multiplayer<St: Store> {
    orchestrator: Arc<Orchestrator<St>>,
    refresh_task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<St: Store> Multiplayer<St> {
    /// Validate `options`, obtain an access token, dial the default
    /// HTTP/websocket transport, and begin the connect/hydrate/sync
    /// lifecycle.
    pub async fn attach(store: Arc<St>, mut options: MultiplayerOptions) -> Result<Arc<Self>, Error> {
        options.validate()?;
        let client_id = Uuid::new_v4().to_string();
        let (token_manager, current_token, issued) = issue_token(&options).await?;

        let token_source: remote::TokenSource = {
            let current_token = current_token.clone();
            Arc::new(move || current_token.lock().unwrap().clone())
        };
        let remote_storage: Arc<dyn RemoteStorage> = Arc::new(HttpWsRemote::new(
            options.api_base_url.clone(),
            options.ws_url.clone(),
            client_id.clone(),
            token_source,
        ));

        let orchestrator = Orchestrator::new(
            store,
            remote_storage,
            options.namespace.clone(),
            client_id,
            options.sync.clone(),
            options.z_factor,
            options.rate_limit,
        );
        Self::finish(orchestrator, token_manager, current_token, issued).await
    }

    /// Build an attachment against a caller-supplied transport,
    /// bypassing the default HTTP/websocket implementation. Exists for
    /// tests and for embedders with a custom [`RemoteStorage`].
    pub async fn attach_with_remote(
        store: Arc<St>,
        remote_storage: Arc<dyn RemoteStorage>,
        client_id: impl Into<String>,
        mut options: MultiplayerOptions,
    ) -> Result<Arc<Self>, Error> {
        options.validate()?;
        let (token_manager, current_token, issued) = issue_token(&options).await?;
        let orchestrator = Orchestrator::new(
            store,
            remote_storage,
            options.namespace.clone(),
            client_id.into(),
            options.sync.clone(),
            options.z_factor,
            options.rate_limit,
        );
        Self::finish(orchestrator, token_manager, current_token, issued).await
    }

    async fn finish(
        orchestrator: Arc<Orchestrator<St>>,
        token_manager: Arc<TokenManager>,
        current_token: Arc<StdMutex<String>>,
        issued: IssuedToken,
    ) -> Result<Arc<Self>, Error> {
        let refresh_task = spawn_refresh_loop(orchestrator.clone(), token_manager, current_token, issued);
        orchestrator.connect().await?;
        Ok(Arc::new(Self {
            orchestrator,
            refresh_task: StdMutex::new(Some(refresh_task)),
        }))
    }

    pub fn state(&self) -> MultiplayerState {
        let connection_state = self.orchestrator.connection_status();
        MultiplayerState {
            connection_state,
            has_hydrated: matches!(
                connection_state,
                LifecycleState::Hydrated | LifecycleState::ReconnectingHydrated
            ),
            performance_metrics: self.orchestrator.metrics(),
        }
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        Ok(self.orchestrator.disconnect().await?)
    }

    pub async fn re_hydrate(&self) -> Result<(), Error> {
        Ok(self.orchestrator.re_hydrate().await?)
    }

    pub async fn clear_storage(&self) -> Result<(), Error> {
        Ok(self.orchestrator.clear_storage().await?)
    }

    /// Tear down background tasks: the sync loops, the reconnect
    /// transport, and the token refresh loop. Idempotent.
    pub async fn destroy(&self) {
        if let Some(task) = self.refresh_task.lock().unwrap().take() {
            task.abort();
        }
        self.orchestrator.destroy().await;
    }
}

async fn issue_token(
    options: &MultiplayerOptions,
) -> Result<(Arc<TokenManager>, Arc<StdMutex<String>>, IssuedToken), Error> {
    let auth = AuthMode::from_options(options.api_key.clone(), options.token_generation_url.clone())
        .map_err(Error::Token)?;
    let scopes = token::subscription_patterns(&options.sync);
    let token_manager = Arc::new(TokenManager::new(auth, scopes));
    let issued = token_manager.fetch().await?;
    let current_token = Arc::new(StdMutex::new(issued.access_token.clone()));
    Ok((token_manager, current_token, issued))
}

/// Keep fetching a fresh token a little ahead of each expiry,
/// publishing it into `current_token`, and closing and re-establishing
/// the orchestrator's remote connection so the new token takes effect
/// immediately instead of waiting for the socket to drop on its own.
///
/// Built on [`TokenManager::schedule_refresh`] rather than a bare sleep
/// loop: a oneshot channel bridges its synchronous callback into this
/// async loop, and the `RefreshHandle` returned each iteration is kept
/// alive until it fires so dropping `refresh_task` (via `destroy`)
/// cancels a pending timer instead of leaking it.
fn spawn_refresh_loop<St: Store>(
    orchestrator: Arc<Orchestrator<St>>,
    token_manager: Arc<TokenManager>,
    current_token: Arc<StdMutex<String>>,
    issued: IssuedToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut issued = issued;
        loop {
            let (fired_tx, fired_rx) = tokio::sync::oneshot::channel::<()>();
            let fired_tx = StdMutex::new(Some(fired_tx));
            let _handle = token_manager.schedule_refresh(&issued, move || {
                if let Some(tx) = fired_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            });

            if fired_rx.await.is_err() {
                return;
            }

            match token_manager.fetch().await {
                Ok(next) => {
                    *current_token.lock().unwrap() = next.access_token.clone();
                    issued = next;
                    orchestrator.disconnect().await.ok();
                    if let Err(error) = orchestrator.connect().await {
                        warn!(%error, "failed to reconnect after token refresh");
                    }
                }
                Err(error) => {
                    warn!(%error, "token refresh failed, retrying shortly");
                    tokio::time::sleep(REFRESH_RETRY_DELAY).await;
                }
            }
        }
    })
}
