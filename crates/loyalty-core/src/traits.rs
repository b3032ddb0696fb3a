// Core traits for pluggable backends
//
// - Ledger: persistence of orders, accruals and withdrawals (Postgres or in-memory)
// - AccrualTrigger: fire-and-forget request to compute the accrual for an order

use async_trait::async_trait;

use crate::balance::{AccrualRecord, Balance, Withdrawal};
use crate::error::LedgerError;
use crate::ids::{OrderId, UserId};
use crate::order::{Order, OrderStatus, OrderWithAccrual};

// ============================================================================
// Ledger - persistence contract
// ============================================================================

/// Persistence operations for orders, accruals and withdrawals
///
/// Implementations provide their own concurrency control. In particular
/// [`Ledger::create_accrual`] must reject a second record for the same order
/// with [`LedgerError::DuplicateAccrual`], which is what makes repeated accrual
/// polling safe.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a NEW order; [`LedgerError::DuplicateOrder`] if the number exists
    async fn create_order(&self, order_id: &OrderId, user_id: UserId) -> Result<Order, LedgerError>;

    /// Look up an order by number
    async fn find_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError>;

    /// A user's orders with the sum of their accruals
    async fn find_orders_with_accrual(
        &self,
        user_id: UserId,
    ) -> Result<Vec<OrderWithAccrual>, LedgerError>;

    /// All orders whose status is not terminal
    async fn find_unprocessed_orders(&self) -> Result<Vec<Order>, LedgerError>;

    /// Move an order to `status`
    ///
    /// Returns `false` without changing anything when the move would regress the
    /// stored status (see [`OrderStatus::can_transition_to`]).
    async fn update_order_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<bool, LedgerError>;

    /// Record the accrual for an order
    async fn create_accrual(
        &self,
        order_id: &OrderId,
        amount: f64,
    ) -> Result<AccrualRecord, LedgerError>;

    /// Accrued minus withdrawn for a user
    async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError>;

    /// Check the balance and record a withdrawal atomically
    ///
    /// Fails with [`LedgerError::InsufficientFunds`] when `amount` exceeds the
    /// current balance at the time of the insert.
    async fn create_withdrawal(
        &self,
        order_id: &OrderId,
        user_id: UserId,
        amount: f64,
    ) -> Result<Withdrawal, LedgerError>;

    /// A user's withdrawals, oldest first
    async fn find_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError>;
}

// ============================================================================
// AccrualTrigger - hook into accrual polling
// ============================================================================

/// Request that the accrual for an order be calculated
///
/// Implementations must return immediately; the actual work happens in the
/// background. Calling it repeatedly for the same order is safe.
pub trait AccrualTrigger: Send + Sync {
    fn calculate_accrual(&self, order_id: &OrderId);
}

/// Trigger that does nothing, for services used without an accrual worker
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAccrualTrigger;

impl AccrualTrigger for NoopAccrualTrigger {
    fn calculate_accrual(&self, _order_id: &OrderId) {}
}
