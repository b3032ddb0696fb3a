// Balance queries and withdrawals

use std::sync::Arc;

use tracing::info;

use crate::balance::{Balance, Withdrawal};
use crate::error::BalanceError;
use crate::ids::{OrderId, UserId};
use crate::luhn;
use crate::traits::Ledger;

/// Balance and withdrawal service
#[derive(Clone)]
pub struct BalanceService {
    ledger: Arc<dyn Ledger>,
}

impl BalanceService {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Current and withdrawn totals for a user
    pub async fn balance(&self, user_id: UserId) -> Result<Balance, BalanceError> {
        Ok(self.ledger.balance(user_id).await?)
    }

    /// Spend `sum` points against `order_id`
    ///
    /// The order number only has to pass the Luhn check; it does not need to be
    /// one of the user's uploaded orders.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        order_id: &str,
        sum: f64,
    ) -> Result<Withdrawal, BalanceError> {
        if !luhn::is_valid(order_id) {
            return Err(BalanceError::InvalidNumber(order_id.to_string()));
        }
        if !sum.is_finite() || sum <= 0.0 {
            return Err(BalanceError::InvalidSum(sum));
        }

        let withdrawal = self
            .ledger
            .create_withdrawal(&OrderId::new(order_id), user_id, sum)
            .await?;

        info!(
            order_id = %withdrawal.order_id,
            user_id = %user_id,
            amount = withdrawal.amount,
            "Withdrawal recorded"
        );
        Ok(withdrawal)
    }

    /// A user's withdrawals, oldest first
    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, BalanceError> {
        let mut withdrawals = self.ledger.find_withdrawals(user_id).await?;
        withdrawals.sort_by_key(|w| w.processed_at);
        Ok(withdrawals)
    }
}

impl std::fmt::Debug for BalanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceService").finish_non_exhaustive()
    }
}
