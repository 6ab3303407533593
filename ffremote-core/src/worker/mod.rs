//! The worker: one HTTP/WebSocket endpoint that hosts sessions, proxies
//! range reads to callers and serves finished outputs.

mod control;
mod cookie;
mod data;
mod error;
mod handlers;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::auth::{CredentialStore, Credentials};
use crate::config::WorkerConfig;
use crate::session::SessionTable;
use crate::supervisor::{Launcher, SystemLauncher};

pub use cookie::{query_param, session_id, SESSION_COOKIE};
pub use error::{WorkerError, WorkerResult};

/// Shared by every request handled by one worker.
pub(crate) struct WorkerState {
    pub(crate) sessions: Arc<SessionTable>,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) credentials: Option<Arc<CredentialStore>>,
    pub(crate) loopback: Url,
    pub(crate) temp_dir: PathBuf,
    pub(crate) input_timeout: Duration,
    pub(crate) stderr_drain: Duration,
    pub(crate) shutdown: CancellationToken,
}

pub struct Worker {
    config: WorkerConfig,
    launcher: Arc<dyn Launcher>,
    credentials: Option<Arc<CredentialStore>>,
    sessions: Arc<SessionTable>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        let launcher = Arc::new(SystemLauncher::new(config.transcoder.program.clone()));
        Self {
            config,
            launcher,
            credentials: None,
            sessions: Arc::new(SessionTable::new()),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Enables Basic authentication. Without a store, or while its file is
    /// empty or absent, every request is accepted.
    pub fn with_credentials(mut self, credentials: Option<CredentialStore>) -> Self {
        self.credentials = credentials.map(Arc::new);
        self
    }

    /// The live session table, for inspection.
    pub fn sessions(&self) -> Arc<SessionTable> {
        Arc::clone(&self.sessions)
    }

    /// Serves until `shutdown` fires. Canceling it also cancels every live
    /// session.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> WorkerResult<()> {
        let local = listener.local_addr()?;
        let loopback = loopback_url(local)?;
        let temp_dir = self.config.temp_dir();
        tokio::fs::create_dir_all(&temp_dir).await?;

        let state = Arc::new(WorkerState {
            sessions: self.sessions,
            launcher: self.launcher,
            credentials: self.credentials,
            loopback,
            temp_dir,
            input_timeout: self.config.session.input_timeout(),
            stderr_drain: self.config.session.stderr_drain(),
            shutdown: shutdown.clone(),
        });
        let authentication = match &state.credentials {
            Some(store) => store.is_enabled().await,
            None => false,
        };
        info!(
            address = %local,
            loopback = %state.loopback,
            authentication,
            "worker listening"
        );

        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

fn router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .fallback(handlers::dispatch)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), authenticate))
        .with_state(state)
}

async fn authenticate(State(state): State<Arc<WorkerState>>, mut request: Request, next: Next) -> Response {
    let Some(store) = state.credentials.as_ref() else {
        return next.run(request).await;
    };
    if !store.is_enabled().await {
        return next.run(request).await;
    }
    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(Credentials::from_authorization);
    let Some(credentials) = credentials else {
        return WorkerError::Unauthorized.into_response();
    };
    if !store.validate(&credentials).await {
        warn!(user = %credentials.user, "invalid credentials");
        return WorkerError::Forbidden.into_response();
    }
    request.extensions_mut().insert(credentials);
    next.run(request).await
}

/// Base URL the transcoder uses to reach this worker.
pub fn loopback_url(local: SocketAddr) -> Result<Url, url::ParseError> {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    Url::parse(&format!("http://{}/", SocketAddr::new(ip, local.port())))
}
