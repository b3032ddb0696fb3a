// Unprocessed-order sweep
//
// Polls that stop without a final status (service did not know the order yet,
// server errors, transport failures, a shutdown in between) are resumed here:
// every pass requests the accrual for each order that is not final.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use loyalty_core::{AccrualTrigger, Ledger, LedgerError};

/// Periodically re-requests accrual for non-final orders
pub struct UnprocessedOrderSweep {
    ledger: Arc<dyn Ledger>,
    trigger: Arc<dyn AccrualTrigger>,
    interval: Duration,
}

impl UnprocessedOrderSweep {
    /// `interval` of zero runs a single pass
    pub fn new(ledger: Arc<dyn Ledger>, trigger: Arc<dyn AccrualTrigger>, interval: Duration) -> Self {
        Self {
            ledger,
            trigger,
            interval,
        }
    }

    /// Request accrual for every non-final order; returns how many were found
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize, LedgerError> {
        let orders = self.ledger.find_unprocessed_orders().await?;
        for order in &orders {
            self.trigger.calculate_accrual(&order.id);
        }

        if orders.is_empty() {
            debug!("No unprocessed orders");
        } else {
            info!(count = orders.len(), "Resumed accrual polling for unprocessed orders");
        }
        Ok(orders.len())
    }

    /// Run a pass now and then every `interval` until `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.interval.is_zero() {
                if let Err(e) = self.run_once().await {
                    error!("Unprocessed-order sweep failed: {}", e);
                }
                return;
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Sweep loop: shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!("Unprocessed-order sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for UnprocessedOrderSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnprocessedOrderSweep")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
