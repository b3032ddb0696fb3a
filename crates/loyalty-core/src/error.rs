// Error types for the ledger and the services in front of it

use thiserror::Error;

use crate::ids::OrderId;

/// Errors returned by [`crate::Ledger`] implementations
///
/// The duplicate variants are idempotence signals rather than failures: callers
/// that may run more than once for the same order (accrual polling) treat them
/// as success.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An order with this number already exists
    #[error("order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// An accrual for this order was already recorded
    #[error("accrual already recorded for order {0}")]
    DuplicateAccrual(OrderId),

    /// A withdrawal against this order number already exists
    #[error("withdrawal already recorded for order {0}")]
    DuplicateWithdrawal(OrderId),

    /// Order not found
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// Withdrawal exceeds the current balance
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: f64, available: f64 },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Stored data could not be mapped to domain types
    #[error("data error: {0}")]
    Data(String),
}

impl LedgerError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        LedgerError::Database(msg.into())
    }

    /// Whether this error only reports that the row already exists
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            LedgerError::DuplicateOrder(_)
                | LedgerError::DuplicateAccrual(_)
                | LedgerError::DuplicateWithdrawal(_)
        )
    }
}

/// Outcome of uploading an order that was not created
#[derive(Debug, Error)]
pub enum OrderError {
    /// Empty or failing the Luhn check
    #[error("invalid order number: {0}")]
    InvalidNumber(String),

    /// The same user uploaded this order before
    #[error("order {0} was already uploaded by this user")]
    AlreadyUploadedByUser(OrderId),

    /// Another user owns this order
    #[error("order {0} was uploaded by another user")]
    UploadedByAnotherUser(OrderId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors from balance queries and withdrawals
#[derive(Debug, Error)]
pub enum BalanceError {
    /// Empty or failing the Luhn check
    #[error("invalid order number: {0}")]
    InvalidNumber(String),

    /// Sum is zero, negative or not a number
    #[error("invalid withdrawal sum: {0}")]
    InvalidSum(f64),

    /// Not enough accrued points
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: f64, available: f64 },

    /// A withdrawal was already made against this order number
    #[error("withdrawal already recorded for order {0}")]
    DuplicateWithdrawal(OrderId),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for BalanceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                requested,
                available,
            } => BalanceError::InsufficientFunds {
                requested,
                available,
            },
            LedgerError::DuplicateWithdrawal(order_id) => BalanceError::DuplicateWithdrawal(order_id),
            other => BalanceError::Ledger(other),
        }
    }
}
