// Order domain types
//
// An order is created once when a user uploads its number and afterwards only its
// status changes. Status moves forward only: NEW -> PROCESSING -> {INVALID, PROCESSED}.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OrderId, UserId};

/// Order processing status as stored in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Uploaded, accrual service not asked yet
    New,
    /// Accrual service is computing the reward
    Processing,
    /// Accrual service rejected the order; no reward
    Invalid,
    /// Reward computed and recorded
    Processed,
}

impl OrderStatus {
    /// Terminal orders are never polled again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic
    ///
    /// Re-applying the current status is allowed (repeat polls of a PROCESSING
    /// order), leaving a terminal status is not.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (current, next) if *current == next => true,
            (Self::New, _) => true,
            (Self::Processing, Self::Invalid | Self::Processed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not a known [`OrderStatus`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct ParseOrderStatusError(pub String);

impl std::str::FromStr for OrderStatus {
    type Err = ParseOrderStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "PROCESSING" => Ok(Self::Processing),
            "INVALID" => Ok(Self::Invalid),
            "PROCESSED" => Ok(Self::Processed),
            other => Err(ParseOrderStatusError(other.to_string())),
        }
    }
}

/// Uploaded order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// Order joined with the sum of its accruals, as listed to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWithAccrual {
    #[serde(flatten)]
    pub order: Order,
    pub accrual: f64,
}
