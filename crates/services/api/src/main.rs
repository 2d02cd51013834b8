//! Crucible API Service.
//!
//! Multi-language sandboxed code execution over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crucible_api::api::create_router;
use crucible_api::{AppState, Config};

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "crucible_api=info,crucible_sandbox=info,crucible_state=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Crucible API");

    let config = Config::from_env();
    let addr = config.socket_addr();

    info!(
        pool_target = config.pool_target,
        sandbox_base_dir = %config.sandbox_base_dir.display(),
        isolation_binary = %config.isolation_binary.display(),
        "Configuration loaded"
    );

    if let Err(e) = tokio::fs::create_dir_all(&config.sandbox_base_dir).await {
        error!(error = %e, "Failed to create sandbox base directory");
        std::process::exit(1);
    }

    let state = AppState::new(config);

    // Start the pool replenisher and pre-warm interpreters.
    state.pool.start();
    let stats = state.pool.warmup(Duration::from_secs(60)).await;
    info!(ready = stats.ready, target = stats.target, "Sandbox pool warmed");

    // Start the archivist.
    let shutdown = Arc::new(Notify::new());
    let archivist_handle = Arc::new(state.archivist()).start(Arc::clone(&shutdown));

    let app = create_router(state.clone());

    let socket_addr: SocketAddr = addr.parse().expect("Invalid socket address");
    info!("Listening on {socket_addr}");

    let listener = tokio::net::TcpListener::bind(socket_addr)
        .await
        .expect("Failed to bind to address");

    let serve_shutdown = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C, initiating graceful shutdown");
            serve_shutdown.notify_waiters();
        })
        .await
        .expect("Server error");

    // Tear down background work and the pre-warmed population.
    shutdown.notify_waiters();
    state.pool.shutdown().await;
    archivist_handle.abort();

    info!("Crucible API shutdown complete");
}
