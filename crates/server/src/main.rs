//! `marketd` entry point.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use market::{Market, SystemClock, TimeoutSweeper};
use server::{Config, ServerError};
use store::{JsonFileStore, Store};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

async fn run(config: Config) -> server::Result<()> {
    // 1. Metrics exporter
    if let Some(addr) = config.metrics_addr() {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ServerError::Metrics(format!("invalid address {addr}: {e}")))?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| ServerError::Metrics(e.to_string()))?;
        tracing::info!(%addr, "prometheus exporter listening");
    }

    // 2. Load and reconcile persisted state
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::new(&config.data_dir));
    let market = Arc::new(Market::load(store, Arc::new(SystemClock)).await?);

    // 3. Background expiry
    let shutdown = CancellationToken::new();
    let sweeper =
        TimeoutSweeper::new(Arc::clone(&market), config.sweep_interval(), shutdown.clone()).spawn();

    // 4. Signals cancel the shared token
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    // 5. Serve until shutdown
    let listener = TcpListener::bind(config.addr()).await?;
    tracing::info!(addr = %config.addr(), data_dir = %config.data_dir.display(), "starting marketd");
    server::serve(listener, Arc::clone(&market), config.max_frame_bytes, shutdown.clone()).await?;

    // 6. Final flush
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }
    market.save_all().await?;
    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "marketd failed");
            ExitCode::FAILURE
        }
    }
}
