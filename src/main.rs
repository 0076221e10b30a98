use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telemetry_ingest::bus::publish_channel;
use telemetry_ingest::config::Cli;
use telemetry_ingest::persistence::RecordStore;
use telemetry_ingest::server::{AppState, build_router};
use telemetry_ingest::worker::Supervisor;

/// How long the ingestion task may take to drain after the server stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_ingest=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Cli::parse()
        .into_settings()
        .context("invalid configuration")?;

    info!(
        broker = %format!("{}:{}", settings.bus.host, settings.bus.port),
        transport = %settings.bus.security,
        topic = %settings.bus.subscribe_topic,
        data_file = %settings.store.path.display(),
        mode = %settings.store.mode,
        "Starting telemetry ingest"
    );

    let store = RecordStore::new(settings.store);
    let (slot, publisher) = publish_channel(settings.bus.publish_topic.clone());

    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::new(settings.bus, store.clone(), slot)
        .with_channel_capacity(settings.channel_capacity)
        .with_record_timestamps(settings.record_timestamps)
        .spawn(shutdown.clone());

    let app = build_router(AppState::new(store, publisher));
    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen))?;
    info!("listening on {}", settings.listen);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_GRACE, supervisor).await {
        Ok(Ok(restarts)) => info!(restarts, "Ingestion stopped"),
        Ok(Err(e)) => error!(error = %e, "Ingestion task failed during shutdown"),
        Err(_) => warn!("Ingestion did not stop within the grace period"),
    }

    served.context("HTTP server failed")
}

/// Resolves on Ctrl+C or SIGTERM, or when `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }
    info!("shutting down...");
    shutdown.cancel();
}
