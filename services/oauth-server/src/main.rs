//! OAuth2 Authorization Server
//!
//! Single-binary service implementing the authorization-code grant:
//! 1. `GET /oauth/authorization` issues a single-use code and redirects
//! 2. `POST /oauth/token` trades the code for a bearer token
//!
//! Client registration lives on a separate admin listener.

mod admin;
mod authorization;
mod config;
mod error;
mod metrics;
mod token;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use oauth_store::{CredentialStore, FileStore, MemoryStore};

use crate::admin::AdminState;
use crate::config::{Config, StoreDriver};

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    store: Arc<dyn CredentialStore>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the public router.
///
/// Wrong methods on the protocol paths answer 404 rather than 405, the same
/// as an unknown path.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route(
            "/oauth/authorization",
            get(authorization::authorization_handler).fallback(route_not_found),
        )
        .route(
            "/oauth/token",
            post(token::token_handler).fallback(route_not_found),
        )
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(route_not_found)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Open the configured credential store backend.
async fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    let code_ttl = config.code_ttl();
    let store: Arc<dyn CredentialStore> = match config.store.driver {
        StoreDriver::Memory => Arc::new(MemoryStore::with_code_ttl(code_ttl)),
        StoreDriver::File => {
            let path = config
                .store
                .path
                .clone()
                .context("store.path is required for the file driver")?;
            let store = FileStore::open(path.clone(), code_ttl)
                .await
                .with_context(|| format!("failed to open credential store at {}", path.display()))?;
            Arc::new(store)
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-server");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.admin.listen_addr,
        store = ?config.store.driver,
        code_ttl_secs = config.store.code_ttl_secs,
        admin_auth = config.admin.token.is_some(),
        "configuration loaded"
    );
    if config.admin.token.is_none() {
        warn!("no admin token configured, admin API is unauthenticated");
    }

    let store = open_store(&config).await?;

    let app = build_router(
        AppState {
            store: Arc::clone(&store),
            started_at: Instant::now(),
            prometheus: prometheus_handle,
        },
        config.server.max_connections,
    );
    let admin_app = admin::build_admin_router(AdminState::new(store, config.admin.token));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.admin.listen_addr)
        .await
        .with_context(|| format!("failed to bind admin to {}", config.admin.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");
    info!(addr = %config.admin.listen_addr, "admin API listening");

    // Both listeners stop accepting on the same signal; the drain timer
    // starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let public = tokio::spawn(serve(listener, app, shutdown_rx.clone()));
    let admin = tokio::spawn(serve(admin_listener, admin_app, shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(DRAIN_TIMEOUT, async { tokio::join!(public, admin) }).await {
        Ok((public, admin)) => {
            for (listener, result) in [("public", public), ("admin", admin)] {
                match result {
                    Ok(Ok(())) => info!(listener, "drained"),
                    Ok(Err(e)) => error!(listener, error = %e, "server error during shutdown"),
                    Err(e) => error!(listener, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

/// Health endpoint: status, store backend, uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "healthy",
            "store": state.store.kind(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        })
        .to_string(),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn route_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "error": "not_found", "message": "no such route" }).to_string(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
