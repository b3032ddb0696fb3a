// Accrual reconciler
//
// Owns the per-order polling state machine. A poll is one job on the accrual
// queue: load the order, ask the accrual service, then decide what happens
// next. The decision is a pure function of the service's answer; the handler
// turns it into ledger writes and a NextAction for the worker.
//
//   REGISTERED              -> poll again in a minute
//   PROCESSING              -> store status, stop
//   PROCESSED / INVALID     -> store reward (if any) and status, stop
//   429                     -> pause the whole queue, poll again after it
//   204 / 5xx / transport   -> stop (the unprocessed-order sweep picks it up)
//   unknown status          -> stop, order untouched

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use loyalty_core::{AccrualTrigger, Ledger, LedgerError, OrderId, OrderStatus};
use loyalty_jobs::{JobContext, JobHandler, JobQueue, JobQueueError, NextAction, RetryPolicy};

use crate::client::{AccrualClientError, AccrualQueryResult, AccrualSource, AccrualStatus};
use crate::job::AccrualJob;

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay before polling a REGISTERED order again
    pub repoll_delay: Duration,

    /// Retries for orders the service does not know yet
    ///
    /// Defaults to no retry; such orders wait for the next sweep.
    pub unregistered_retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            repoll_delay: Duration::from_secs(60),
            unregistered_retry: RetryPolicy::no_retry(),
        }
    }
}

impl ReconcilerConfig {
    pub fn with_repoll_delay(mut self, delay: Duration) -> Self {
        self.repoll_delay = delay;
        self
    }

    pub fn with_unregistered_retry(mut self, policy: RetryPolicy) -> Self {
        self.unregistered_retry = policy;
        self
    }
}

/// Why a poll ends without touching the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    NotRegistered,
    ServerError,
    Transport(String),
    /// Status outside the known taxonomy
    UnknownStatus(String),
}

/// Outcome of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Store the status, and the reward when present, then stop
    Persist {
        status: OrderStatus,
        accrual: Option<f64>,
    },
    /// The service has the order but has not started on it
    Repoll { delay: Duration },
    /// Halt the whole queue, then poll again
    Throttle { pause: Duration },
    /// Ask again about an order the service does not know yet
    RetryUnregistered { delay: Duration },
    Drop(DropReason),
}

/// Decide what follows a poll
///
/// `attempt` is the 1-based count of polls answered with "not registered",
/// consulted only against [`ReconcilerConfig::unregistered_retry`].
pub fn decide(
    result: &Result<AccrualQueryResult, AccrualClientError>,
    attempt: u32,
    config: &ReconcilerConfig,
) -> Decision {
    let result = match result {
        Ok(result) => result,
        Err(e) => return Decision::Drop(DropReason::Transport(e.to_string())),
    };

    match result {
        AccrualQueryResult::RateLimited { retry_after } => Decision::Throttle {
            pause: *retry_after,
        },
        AccrualQueryResult::ServerError => Decision::Drop(DropReason::ServerError),
        AccrualQueryResult::NotRegistered => match config.unregistered_retry.next_delay(attempt) {
            Some(delay) => Decision::RetryUnregistered { delay },
            None => Decision::Drop(DropReason::NotRegistered),
        },
        AccrualQueryResult::Found(response) => match (&response.status, response.status.order_status()) {
            (AccrualStatus::Registered, _) => Decision::Repoll {
                delay: config.repoll_delay,
            },
            (_, Some(status)) => Decision::Persist {
                status,
                accrual: response.accrual.filter(|_| status.is_terminal()),
            },
            (other, None) => Decision::Drop(DropReason::UnknownStatus(other.to_string())),
        },
    }
}

/// Drives accrual polling for orders
///
/// Register it as the queue's handler with [`Reconciler::start`]. Polling is
/// requested through [`Reconciler::calculate_accrual`] (or the
/// [`AccrualTrigger`] impl), which only enqueues.
pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    source: Arc<dyn AccrualSource>,
    queue: JobQueue<AccrualJob>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        source: Arc<dyn AccrualSource>,
        queue: JobQueue<AccrualJob>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            source,
            queue,
            config,
        }
    }

    /// Start the queue's workers with this reconciler as handler
    pub fn start(self: &Arc<Self>) -> Result<(), JobQueueError> {
        self.queue.start(Arc::clone(self))
    }

    /// Request the accrual for an order
    ///
    /// Returns `false` if no poll was enqueued because one is already pending
    /// or the queue is shut down. Safe to call any number of times.
    pub fn calculate_accrual(&self, order_id: &OrderId) -> bool {
        self.queue.enqueue(AccrualJob::poll(order_id.clone()))
    }

    pub fn queue(&self) -> &JobQueue<AccrualJob> {
        &self.queue
    }

    /// Shut the accrual queue down
    pub async fn shutdown(&self) -> Result<(), JobQueueError> {
        self.queue.shutdown().await
    }

    #[instrument(skip(self, order_id, ctx), fields(order_id = %order_id, worker = ctx.worker()))]
    async fn poll_order(
        &self,
        order_id: OrderId,
        attempt: u32,
        ctx: &JobContext,
    ) -> NextAction<AccrualJob> {
        match self.ledger.find_order(&order_id).await {
            Ok(Some(order)) if order.status.is_terminal() => {
                debug!(status = %order.status, "Order already final, skipping poll");
                return NextAction::Done;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Order not found, skipping poll");
                return NextAction::Done;
            }
            Err(e) => {
                error!("Failed to load order: {}", e);
                return NextAction::Done;
            }
        }

        if ctx.is_shutting_down() {
            debug!("Shutting down, skipping poll");
            return NextAction::Done;
        }

        let result = self.source.fetch(&order_id).await;

        match decide(&result, attempt, &self.config) {
            Decision::Persist { status, accrual } => {
                if let Err(e) = self.persist(&order_id, status, accrual).await {
                    error!(status = %status, "Failed to store accrual result: {}", e);
                }
                NextAction::Done
            }
            Decision::Repoll { delay } => {
                info!(delay_ms = delay.as_millis() as u64, "Order registered, polling again later");
                NextAction::Schedule {
                    job: AccrualJob::PollOrder { order_id, attempt },
                    delay,
                }
            }
            Decision::Throttle { pause } => {
                warn!(
                    retry_after_secs = pause.as_secs(),
                    "Accrual service rate limit hit, pausing queue"
                );
                NextAction::PauseThenEnqueue {
                    job: AccrualJob::PollOrder { order_id, attempt },
                    pause,
                }
            }
            Decision::RetryUnregistered { delay } => {
                info!(delay_ms = delay.as_millis() as u64, "Order not registered yet, retrying later");
                NextAction::Schedule {
                    job: AccrualJob::PollOrder {
                        order_id,
                        attempt: attempt + 1,
                    },
                    delay,
                }
            }
            Decision::Drop(reason) => {
                match reason {
                    DropReason::NotRegistered => info!("Order is not registered in the accrual service"),
                    DropReason::ServerError => error!("Accrual service returned a server error"),
                    DropReason::Transport(e) => error!("Failed to fetch accrual data: {}", e),
                    DropReason::UnknownStatus(status) => {
                        warn!(status = %status, "Unknown accrual status, order left untouched")
                    }
                }
                NextAction::Done
            }
        }
    }

    /// Write the reward first so a failed status update is retried by a later
    /// poll instead of leaving a final order without its reward
    async fn persist(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        accrual: Option<f64>,
    ) -> Result<(), LedgerError> {
        if let Some(amount) = accrual {
            match self.ledger.create_accrual(order_id, amount).await {
                Ok(_) => info!(amount, "Accrual recorded"),
                Err(LedgerError::DuplicateAccrual(_)) => debug!("Accrual already recorded"),
                Err(e) => return Err(e),
            }
        }

        if self.ledger.update_order_status(order_id, status).await? {
            info!(status = %status, "Order status updated");
        } else {
            debug!(status = %status, "Stored status is further along, not updated");
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler<AccrualJob> for Reconciler {
    async fn handle(&self, job: AccrualJob, ctx: JobContext) -> NextAction<AccrualJob> {
        match job {
            AccrualJob::PollOrder { order_id, attempt } => {
                self.poll_order(order_id, attempt, &ctx).await
            }
        }
    }
}

impl AccrualTrigger for Reconciler {
    fn calculate_accrual(&self, order_id: &OrderId) {
        Reconciler::calculate_accrual(self, order_id);
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
