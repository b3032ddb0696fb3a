// Business services in front of the ledger

mod balance;
mod order;

pub use balance::BalanceService;
pub use order::OrderService;
