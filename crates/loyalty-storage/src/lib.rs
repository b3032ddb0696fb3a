//! Ledger implementations
//!
//! - [`PostgresLedger`] - production persistence on PostgreSQL via sqlx
//! - [`InMemoryLedger`] - same semantics held in memory, for tests and local runs
//!
//! Both enforce one accrual per order and never let an order status regress,
//! which is what the accrual reconciler relies on for idempotence.
//!
//! The Postgres implementation expects the tables described in `schema.sql`
//! next to this crate's manifest; creating them is left to the deployment.

mod memory;
mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
