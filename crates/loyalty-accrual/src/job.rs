// Accrual polling jobs

use serde::{Deserialize, Serialize};

use loyalty_core::OrderId;
use loyalty_jobs::Job;

/// Work items for the accrual queue
///
/// At most one poll per order is pending at any time; the queue keys jobs by
/// order number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccrualJob {
    /// Ask the accrual service about one order
    ///
    /// `attempt` counts polls that came back "not registered" and is only
    /// used to bound retries of that case.
    PollOrder { order_id: OrderId, attempt: u32 },
}

impl AccrualJob {
    /// First poll of an order
    pub fn poll(order_id: OrderId) -> Self {
        AccrualJob::PollOrder {
            order_id,
            attempt: 1,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        match self {
            AccrualJob::PollOrder { order_id, .. } => order_id,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            AccrualJob::PollOrder { attempt, .. } => *attempt,
        }
    }
}

impl Job for AccrualJob {
    type Key = OrderId;

    fn key(&self) -> OrderId {
        self.order_id().clone()
    }

    fn kind(&self) -> &'static str {
        match self {
            AccrualJob::PollOrder { .. } => "poll_order",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_starts_at_first_attempt() {
        let job = AccrualJob::poll(OrderId::new("18"));
        assert_eq!(job.attempt(), 1);
        assert_eq!(job.key(), OrderId::new("18"));
        assert_eq!(job.kind(), "poll_order");
    }

    #[test]
    fn test_serialization() {
        let job = AccrualJob::poll(OrderId::new("79927398713"));
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["type"], "poll_order");
        assert_eq!(json["order_id"], "79927398713");
        assert_eq!(json["attempt"], 1);
    }
}
