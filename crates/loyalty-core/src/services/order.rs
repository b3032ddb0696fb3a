// Order upload and listing
//
// Upload validates the number, inserts it and asks for the accrual to be
// calculated. A duplicate insert is resolved into "yours already" or "someone
// else's" by looking up the existing owner.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{LedgerError, OrderError};
use crate::ids::{OrderId, UserId};
use crate::luhn;
use crate::order::{Order, OrderWithAccrual};
use crate::traits::{AccrualTrigger, Ledger, NoopAccrualTrigger};

/// Order upload and listing service
#[derive(Clone)]
pub struct OrderService {
    ledger: Arc<dyn Ledger>,
    accrual: Arc<dyn AccrualTrigger>,
}

impl OrderService {
    /// Create a service that does not trigger accrual calculation
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            accrual: Arc::new(NoopAccrualTrigger),
        }
    }

    /// Create a service that triggers accrual calculation for each new order
    pub fn with_accrual_trigger(ledger: Arc<dyn Ledger>, accrual: Arc<dyn AccrualTrigger>) -> Self {
        Self { ledger, accrual }
    }

    /// Validate an order number with the Luhn check
    pub fn verify_order_number(&self, order_id: &str) -> bool {
        luhn::is_valid(order_id)
    }

    /// Upload an order for `user_id`
    ///
    /// On success the accrual calculation is triggered and the new order is
    /// returned. A repeated upload is reported as
    /// [`OrderError::AlreadyUploadedByUser`] or [`OrderError::UploadedByAnotherUser`].
    pub async fn create_order(&self, order_id: &str, user_id: UserId) -> Result<Order, OrderError> {
        if !self.verify_order_number(order_id) {
            return Err(OrderError::InvalidNumber(order_id.to_string()));
        }

        let order_id = OrderId::new(order_id);

        match self.ledger.create_order(&order_id, user_id).await {
            Ok(order) => {
                info!(order_id = %order.id, user_id = %user_id, "Order uploaded");
                self.accrual.calculate_accrual(&order.id);
                Ok(order)
            }
            Err(LedgerError::DuplicateOrder(_)) => {
                let existing = self
                    .ledger
                    .find_order(&order_id)
                    .await?
                    .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;

                debug!(
                    order_id = %order_id,
                    owner = %existing.user_id,
                    user_id = %user_id,
                    "Duplicate order upload"
                );

                if existing.user_id == user_id {
                    Err(OrderError::AlreadyUploadedByUser(order_id))
                } else {
                    Err(OrderError::UploadedByAnotherUser(order_id))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A user's orders with their accrual, oldest upload first
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderWithAccrual>, OrderError> {
        let mut orders = self.ledger.find_orders_with_accrual(user_id).await?;
        orders.sort_by_key(|o| o.order.uploaded_at);
        Ok(orders)
    }
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService").finish_non_exhaustive()
    }
}
