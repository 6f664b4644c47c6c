//! Periodic expiry of pending orders.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::market::Market;

/// Background task that calls [`Market::check_timeout_orders`] on a fixed
/// interval until its token is cancelled.
pub struct TimeoutSweeper {
    market: Arc<Market>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl TimeoutSweeper {
    pub fn new(market: Arc<Market>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            market,
            interval,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "timeout sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("timeout sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.market.check_timeout_orders().await {
                        tracing::error!(error = %e, "timeout sweep failed");
                    }
                }
            }
        }
        tracing::info!("timeout sweeper stopped");
    }
}
