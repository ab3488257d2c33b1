//! HTTP server assembly and lifecycle
//!
//! Routes are versioned under `/v1` with `/health` and `/version` outside.
//! Middleware, outermost first: panic recovery, access logging, and bearer
//! authentication on the protected subrouter. Shutdown drains in-flight
//! handlers for up to five seconds, then forces the close and locks every
//! session.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info, warn};

use keyp_core::session::DEFAULT_SESSION_TIMEOUT;

use crate::handlers;
use crate::middleware::{access_log, handle_panic, require_session};
use crate::sessions::SessionStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub vault_path: PathBuf,
    pub session_timeout: Duration,
}

/// The keyp HTTP API server.
pub struct Server {
    address: SocketAddr,
    vault_path: PathBuf,
    session_timeout: Duration,
    sessions: Arc<SessionStore>,
}

impl Server {
    pub fn new(address: SocketAddr, vault_path: PathBuf) -> Self {
        Self {
            address,
            vault_path,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            sessions: Arc::new(SessionStore::new()),
        }
    }

    /// Override the per-token session lifetime.
    pub fn set_session_timeout(&mut self, timeout: Duration) {
        self.session_timeout = timeout;
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: self.sessions.clone(),
            vault_path: self.vault_path.clone(),
            session_timeout: self.session_timeout,
        };

        let protected = Router::new()
            .route("/v1/lock", post(handlers::lock))
            .route("/v1/refresh", post(handlers::refresh))
            .route(
                "/v1/secrets",
                get(handlers::list_secrets).post(handlers::create_secret),
            )
            .route(
                "/v1/secrets/:name",
                get(handlers::get_secret)
                    .put(handlers::update_secret)
                    .delete(handlers::delete_secret),
            )
            .route("/v1/search", get(handlers::search))
            .route_layer(from_fn_with_state(state.clone(), require_session));

        Router::new()
            .route("/health", get(handlers::health))
            .route("/version", get(handlers::version))
            .route("/v1/unlock", post(handlers::unlock))
            .merge(protected)
            .layer(axum::middleware::from_fn(access_log))
            .layer(CatchPanicLayer::custom(handle_panic))
            .with_state(state)
    }

    /// Bind and serve until interrupted.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.address).await?;
        info!(address = %self.address, "server listening");

        let eviction = {
            let sessions = self.sessions.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(EVICTION_INTERVAL);
                loop {
                    tick.tick().await;
                    sessions.cleanup();
                }
            })
        };

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });

        let serve = {
            let mut rx = shutdown_rx.clone();
            axum::serve(listener, self.router()).with_graceful_shutdown(async move {
                let _ = rx.changed().await;
                info!("shutdown signal received");
            })
        };

        let mut serve_task = tokio::spawn(async move { serve.await });

        // Bound the drain: once the signal fires, in-flight handlers get
        // SHUTDOWN_GRACE to finish before the task is aborted.
        let mut force_rx = shutdown_rx;
        let grace_elapsed = async move {
            let _ = force_rx.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        };

        let outcome = tokio::select! {
            result = &mut serve_task => Some(result),
            () = grace_elapsed => None,
        };
        match outcome {
            Some(result) => {
                result.map_err(std::io::Error::other)??;
            }
            None => {
                warn!("graceful shutdown timed out, forcing close");
                serve_task.abort();
            }
        }

        eviction.abort();
        self.sessions.lock_all();
        info!("server stopped");
        Ok(())
    }
}
