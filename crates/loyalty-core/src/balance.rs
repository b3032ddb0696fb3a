// Accrual and withdrawal records, and the balance derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OrderId, UserId};

/// Reward credited for one order
///
/// At most one record exists per order; the ledger rejects a second insert with
/// [`crate::LedgerError::DuplicateAccrual`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualRecord {
    pub order_id: OrderId,
    pub amount: f64,
    pub processed_at: DateTime<Utc>,
}

/// Points spent by a user against an order number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: f64,
    pub processed_at: DateTime<Utc>,
}

/// User balance: `current` is accrued minus withdrawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub current: f64,
    pub withdrawn: f64,
}

impl Balance {
    /// Build a balance from the accrued and withdrawn totals
    pub fn from_totals(accrued: f64, withdrawn: f64) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }

    pub fn covers(&self, amount: f64) -> bool {
        self.current >= amount
    }
}
