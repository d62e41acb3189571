//! API server entry point.

use std::sync::Arc;

use api::Collaborators;
use api::config::Config;
use domain::MetricsMonitoring;
use instance_store::{InMemoryInstanceStore, InstanceStore, PostgresInstanceStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaWorker;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the instance store
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresInstanceStore::connect(&url).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL instance store");
            serve(store, &config, metrics_handle).await
        }
        None => {
            tracing::info!("using in-memory instance store");
            serve(InMemoryInstanceStore::new(), &config, metrics_handle).await
        }
    }
}

async fn serve<S: InstanceStore + 'static>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    // 4. Wire collaborators, executor and the resume worker
    let collaborators = Collaborators::in_memory();
    if config.seed_demo_data {
        collaborators.seed_demo_data().await?;
    }
    let state = api::create_state(
        store,
        &collaborators,
        Arc::new(MetricsMonitoring),
        config.executor.clone(),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker =
        SagaWorker::new(Arc::clone(&state.executor), config.sweep_interval).spawn(shutdown_rx);

    // 5. Build the application and start serving
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = worker.await {
        tracing::warn!(error = %err, "saga worker did not stop cleanly");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
