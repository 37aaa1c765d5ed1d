mod admin;
mod admission;
mod audit;
mod backend;
mod config;
mod error;
mod gate;
mod handlers;
mod metrics;
mod models;
mod rate_limit;
mod state;
mod store;
mod watcher;
mod worker;

use anyhow::Context;
use axum::{Router, middleware, routing::{get, post}};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::admin::AdminKey;
use crate::backend::FileBackend;
use crate::config::Args;
use crate::gate::request_gate;
use crate::handlers::{
    bans_handler, health_handler, metrics_handler, stats_handler, status_handler, unban_handler,
};
use crate::rate_limit::{SlidingWindow, sweeper};
use crate::state::AppState;
use crate::store::{AccessStore, StoreOptions};
use crate::watcher::ChangeNotifier;

// Every route sits behind the request gate
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/unban", post(unban_handler))
        .route("/admin/bans", get(bans_handler))
        .route("/admin/stats", get(stats_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), request_gate))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // parse cli arguments
    let args = Args::parse();

    let backend = FileBackend::open(&args.data_dir, &args.log_dir)
        .with_context(|| format!("failed to prepare {}", args.data_dir.display()))?;
    let data_dir = backend.data_dir().to_path_buf();

    let store = AccessStore::init(
        Arc::new(backend),
        StoreOptions::new(&args.operator_ips, args.default_runtime_config()),
    );
    let window = Arc::new(SlidingWindow::new());

    // spawn the background sweeper
    tokio::spawn(sweeper(
        Arc::clone(&window),
        Arc::clone(&store),
        Duration::from_secs(args.sweep_interval.max(1)),
    ));

    // hot reload is optional; the service still runs on its in-memory state
    let _notifier = match ChangeNotifier::start(
        &data_dir,
        Arc::clone(&store),
        Duration::from_millis(args.watch_debounce_ms),
    ) {
        Ok(notifier) => Some(notifier),
        Err(e) => {
            warn!(error = %e, "file watching unavailable, external edits need a restart");
            None
        }
    };

    let admin_key = AdminKey::new(args.admin_key.as_deref());
    if !admin_key.is_configured() {
        warn!("ADMIN_KEY not set, admin endpoints will refuse every request");
    }

    let state = Arc::new(AppState::new(
        Arc::clone(&store),
        window,
        admin_key,
        args.trust_proxy,
    ));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(port = args.port, "gatekeeper running on http://localhost:{}", args.port);
    info!(data_dir = %data_dir.display(), log_dir = %args.log_dir.display(), trust_proxy = args.trust_proxy, "storage");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    store.shutdown().await;
    Ok(())
}
