mod handlers;
mod state;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tera::Tera;
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sdnctl::controller::{Controller, RestconfClient};

use crate::state::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!("Using controller at {}", config.controller_url);

    let controller: Arc<dyn Controller> = Arc::new(RestconfClient::new(config.controller())?);
    let tera = Tera::new("templates/**/*.html")?;
    let state = Arc::new(AppState::new(tera, controller));

    if let Err(e) = state.store.refresh(state.controller.as_ref()).await {
        warn!("Initial topology discovery failed: {}", e);
    }

    let mut scheduler = JobScheduler::new().await?;
    let job_state = Arc::clone(&state);
    scheduler
        .add(Job::new_async(config.refresh_cron.as_str(), move |_uuid, _lock| {
            let state = Arc::clone(&job_state);
            Box::pin(async move {
                if let Err(e) = state.store.refresh(state.controller.as_ref()).await {
                    warn!("Scheduled topology refresh failed: {}", e);
                }
            })
        })?)
        .await?;
    scheduler.start().await?;
    info!("Topology refresh scheduled at '{}'", config.refresh_cron);

    let app = Router::new()
        .route("/", get(handlers::index))
        .route("/api/objects", get(handlers::objects))
        .route("/api/live", get(handlers::live_objects))
        .route("/api/path", get(handlers::find_path).post(handlers::install_path))
        .route("/api/weights", post(handlers::set_weights))
        .route("/api/flows", delete(handlers::delete_flows))
        .route("/api/flows/drop", post(handlers::drop_flow))
        .route("/api/reset", post(handlers::reset))
        .route("/api/refresh", post(handlers::refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        warn!("Scheduler shutdown failed: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then cancels in-flight path installs.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received terminate signal, shutting down..."),
    }
    shutdown.cancel();
}
