// Loyalty core
//
// Domain types and DB-agnostic services for the loyalty backend:
// - Order, accrual and withdrawal entities shared by storage and the accrual worker
// - The Ledger trait, implemented by in-memory and Postgres backends
// - OrderService and BalanceService, the thin business layer in front of the ledger
// - Luhn validation for order numbers
//
// Accrual calculation itself lives in loyalty-accrual; services reach it through
// the AccrualTrigger trait so this crate stays free of queue and HTTP concerns.

pub mod balance;
pub mod error;
pub mod ids;
pub mod luhn;
pub mod order;
pub mod services;
pub mod traits;

pub use balance::{AccrualRecord, Balance, Withdrawal};
pub use error::{BalanceError, LedgerError, OrderError};
pub use ids::{OrderId, UserId};
pub use order::{Order, OrderStatus, OrderWithAccrual, ParseOrderStatusError};
pub use services::{BalanceService, OrderService};
pub use traits::{AccrualTrigger, Ledger, NoopAccrualTrigger};
