//! TCP accept loop.

use std::sync::Arc;

use market::Market;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::connection::handle_connection;
use crate::error::Result;

/// Accepts connections on `listener` until `shutdown` is cancelled, then
/// waits for every open connection to finish its current request.
pub async fn serve(
    listener: TcpListener,
    market: Arc<Market>,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "accepting connections");
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("listener shutting down");
                break;
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        metrics::counter!("connections_accepted_total").increment(1);
                        let market = Arc::clone(&market);
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, peer, market, max_frame_bytes, shutdown).await
                            {
                                tracing::debug!(%peer, error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    tracing::info!("all connections closed");
    Ok(())
}
