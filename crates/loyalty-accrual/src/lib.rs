// Loyalty accrual
//
// Reconciles rewards computed by the external accrual service into the ledger.
// - AccrualClient: HTTP client classifying the service's answers
// - Reconciler: per-order polling state machine on the loyalty-jobs queue
// - UnprocessedOrderSweep: resumes polling for orders left unfinished

pub mod client;
pub mod job;
pub mod reconciler;
pub mod sweep;

pub use client::{
    AccrualClient, AccrualClientConfig, AccrualClientError, AccrualQueryResult, AccrualResponse,
    AccrualSource, AccrualStatus, DEFAULT_RETRY_AFTER, MAX_RETRY_AFTER,
};
pub use job::AccrualJob;
pub use reconciler::{decide, Decision, DropReason, Reconciler, ReconcilerConfig};
pub use sweep::UnprocessedOrderSweep;
