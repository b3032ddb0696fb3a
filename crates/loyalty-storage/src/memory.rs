//! In-memory implementation of Ledger for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use loyalty_core::{
    AccrualRecord, Balance, Ledger, LedgerError, Order, OrderId, OrderStatus, OrderWithAccrual,
    UserId, Withdrawal,
};

#[derive(Default)]
struct LedgerState {
    orders: HashMap<OrderId, Order>,
    accruals: HashMap<OrderId, AccrualRecord>,
    withdrawals: HashMap<OrderId, Withdrawal>,
}

impl LedgerState {
    fn accrued(&self, user_id: UserId) -> f64 {
        self.accruals
            .values()
            .filter(|a| {
                self.orders
                    .get(&a.order_id)
                    .is_some_and(|o| o.user_id == user_id)
            })
            .map(|a| a.amount)
            .sum()
    }

    fn withdrawn(&self, user_id: UserId) -> f64 {
        self.withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.amount)
            .sum()
    }

    fn balance(&self, user_id: UserId) -> Balance {
        Balance::from_totals(self.accrued(user_id), self.withdrawn(user_id))
    }
}

/// In-memory implementation of [`Ledger`]
///
/// Holds everything behind a single lock, so the balance check and insert of a
/// withdrawal are atomic, and provides the same uniqueness and status rules as
/// the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use loyalty_storage::InMemoryLedger;
///
/// let ledger = InMemoryLedger::new();
/// assert_eq!(ledger.order_count(), 0);
/// ```
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Get the number of orders
    pub fn order_count(&self) -> usize {
        self.state.read().orders.len()
    }

    /// Get the number of accrual records
    pub fn accrual_count(&self) -> usize {
        self.state.read().accruals.len()
    }

    /// Get the accrual recorded for an order, if any
    pub fn accrual_for(&self, order_id: &OrderId) -> Option<AccrualRecord> {
        self.state.read().accruals.get(order_id).cloned()
    }

    /// Insert an order with an explicit status, bypassing upload rules (for testing)
    pub fn insert_order(&self, order: Order) {
        self.state.write().orders.insert(order.id.clone(), order);
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.orders.clear();
        state.accruals.clear();
        state.withdrawals.clear();
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn create_order(&self, order_id: &OrderId, user_id: UserId) -> Result<Order, LedgerError> {
        let mut state = self.state.write();
        if state.orders.contains_key(order_id) {
            return Err(LedgerError::DuplicateOrder(order_id.clone()));
        }

        let order = Order {
            id: order_id.clone(),
            user_id,
            status: OrderStatus::New,
            uploaded_at: Utc::now(),
        };
        state.orders.insert(order_id.clone(), order.clone());
        Ok(order)
    }

    async fn find_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError> {
        Ok(self.state.read().orders.get(order_id).cloned())
    }

    async fn find_orders_with_accrual(
        &self,
        user_id: UserId,
    ) -> Result<Vec<OrderWithAccrual>, LedgerError> {
        let state = self.state.read();
        let mut orders: Vec<OrderWithAccrual> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .map(|o| OrderWithAccrual {
                order: o.clone(),
                accrual: state.accruals.get(&o.id).map_or(0.0, |a| a.amount),
            })
            .collect();
        orders.sort_by_key(|o| o.order.uploaded_at);
        Ok(orders)
    }

    async fn find_unprocessed_orders(&self) -> Result<Vec<Order>, LedgerError> {
        let state = self.state.read();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.uploaded_at);
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<bool, LedgerError> {
        let mut state = self.state.write();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;

        if !order.status.can_transition_to(status) {
            debug!(%order_id, from = %order.status, to = %status, "Ignoring status regression");
            return Ok(false);
        }

        order.status = status;
        Ok(true)
    }

    async fn create_accrual(
        &self,
        order_id: &OrderId,
        amount: f64,
    ) -> Result<AccrualRecord, LedgerError> {
        let mut state = self.state.write();
        if !state.orders.contains_key(order_id) {
            return Err(LedgerError::OrderNotFound(order_id.clone()));
        }
        if state.accruals.contains_key(order_id) {
            return Err(LedgerError::DuplicateAccrual(order_id.clone()));
        }

        let record = AccrualRecord {
            order_id: order_id.clone(),
            amount,
            processed_at: Utc::now(),
        };
        state.accruals.insert(order_id.clone(), record.clone());
        Ok(record)
    }

    async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        Ok(self.state.read().balance(user_id))
    }

    async fn create_withdrawal(
        &self,
        order_id: &OrderId,
        user_id: UserId,
        amount: f64,
    ) -> Result<Withdrawal, LedgerError> {
        let mut state = self.state.write();
        if state.withdrawals.contains_key(order_id) {
            return Err(LedgerError::DuplicateWithdrawal(order_id.clone()));
        }

        let balance = state.balance(user_id);
        if !balance.covers(amount) {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: balance.current,
            });
        }

        let withdrawal = Withdrawal {
            order_id: order_id.clone(),
            user_id,
            amount,
            processed_at: Utc::now(),
        };
        state.withdrawals.insert(order_id.clone(), withdrawal.clone());
        Ok(withdrawal)
    }

    async fn find_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        let state = self.state.read();
        let mut withdrawals: Vec<Withdrawal> = state
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        withdrawals.sort_by_key(|w| w.processed_at);
        Ok(withdrawals)
    }
}
