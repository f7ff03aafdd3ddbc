use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use realtime_gateway::config::Settings;
use realtime_gateway::groups::GroupRegistry;
use realtime_gateway::handlers;
use realtime_gateway::server::{create_app, AppState};
use realtime_gateway::shutdown::{GracefulShutdown, ShutdownConfig};
use realtime_gateway::tasks::{HeartbeatTask, PolicyCleanupTask};
use realtime_gateway::websocket::HandlerRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Register stream endpoints
    let groups = Arc::new(GroupRegistry::new());
    let mut registry = HandlerRegistry::new();
    handlers::register(&mut registry, groups.clone());

    // Create application state
    let state = AppState::new(settings.clone(), registry, groups.clone())?;
    tracing::info!(
        stream_routes = state.dispatcher.route_count(),
        "Application state initialized"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start heartbeat task in background
    let heartbeat_task =
        HeartbeatTask::new(&settings.websocket, groups.clone(), shutdown_tx.subscribe());
    let heartbeat_handle = tokio::spawn(heartbeat_task.run());

    // Start rate limit cleanup in background
    let cleanup_task = PolicyCleanupTask::new(
        &settings.ratelimit,
        state.policies.clone(),
        shutdown_tx.subscribe(),
    );
    let cleanup_handle = tokio::spawn(cleanup_task.run());

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server until a shutdown signal arrives
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_handler())
    .await?;

    let shutdown = GracefulShutdown::with_config(
        groups,
        shutdown_tx,
        ShutdownConfig {
            close_timeout: Duration::from_secs(settings.websocket.shutdown_timeout),
            ..ShutdownConfig::default()
        },
    );
    shutdown.execute().await;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(heartbeat_handle, cleanup_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
