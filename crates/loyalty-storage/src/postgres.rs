//! PostgreSQL implementation of Ledger
//!
//! - Unique violations (`23505`) surface as the ledger's duplicate errors
//! - An accrual for an unknown order (`23503`) is `OrderNotFound`
//! - Status changes lock the order row and apply the monotonic transition rule
//! - Withdrawals take a per-user advisory lock so the balance check and insert
//!   cannot interleave with a concurrent withdrawal

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use loyalty_core::{
    AccrualRecord, Balance, Ledger, LedgerError, Order, OrderId, OrderStatus, OrderWithAccrual,
    UserId, Withdrawal,
};

/// PostgreSQL implementation of [`Ledger`]
///
/// # Example
///
/// ```ignore
/// use loyalty_storage::PostgresLedger;
///
/// let ledger = PostgresLedger::connect("postgres://localhost/loyalty").await?;
/// ```
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a ledger with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a ledger from a connection URL
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| LedgerError::database(format!("failed to connect: {}", e)))?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx error, turning unique violations into the given duplicate error
fn map_insert_error(err: sqlx::Error, duplicate: LedgerError) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return duplicate;
        }
    }
    error!("Ledger insert failed: {}", err);
    LedgerError::database(err.to_string())
}

fn map_db_error(context: &str, err: sqlx::Error) -> LedgerError {
    error!("Failed to {}: {}", context, err);
    LedgerError::database(err.to_string())
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| LedgerError::Data(format!("column {}: {}", name, e)))
}

fn parse_status(status: &str) -> Result<OrderStatus, LedgerError> {
    status
        .parse()
        .map_err(|e: loyalty_core::ParseOrderStatusError| LedgerError::Data(e.to_string()))
}

fn order_from_row(row: &PgRow) -> Result<Order, LedgerError> {
    let status: String = column(row, "status")?;
    Ok(Order {
        id: OrderId::new(column::<String>(row, "id")?),
        user_id: UserId::from_uuid(column::<Uuid>(row, "user_id")?),
        status: parse_status(&status)?,
        uploaded_at: column::<DateTime<Utc>>(row, "uploaded_at")?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal, LedgerError> {
    Ok(Withdrawal {
        order_id: OrderId::new(column::<String>(row, "order_id")?),
        user_id: UserId::from_uuid(column::<Uuid>(row, "user_id")?),
        amount: column(row, "amount")?,
        processed_at: column(row, "processed_at")?,
    })
}

const BALANCE_QUERY: &str = r#"
    SELECT
        COALESCE((
            SELECT SUM(af.amount)
            FROM accrual_flow af
            JOIN orders o ON o.id = af.order_id
            WHERE o.user_id = $1
        ), 0) AS accrued,
        COALESCE((
            SELECT SUM(amount)
            FROM withdrawal_flow
            WHERE user_id = $1
        ), 0) AS withdrawn
"#;

#[async_trait]
impl Ledger for PostgresLedger {
    #[instrument(skip(self))]
    async fn create_order(&self, order_id: &OrderId, user_id: UserId) -> Result<Order, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status)
            VALUES ($1, $2, 'NEW')
            RETURNING id, user_id, status, uploaded_at
            "#,
        )
        .bind(order_id.as_str())
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, LedgerError::DuplicateOrder(order_id.clone())))?;

        debug!(%order_id, %user_id, "created order");
        order_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn find_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, uploaded_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error("find order", e))?;

        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn find_orders_with_accrual(
        &self,
        user_id: UserId,
    ) -> Result<Vec<OrderWithAccrual>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.user_id, o.status, o.uploaded_at, COALESCE(SUM(af.amount), 0) AS accrual
            FROM orders o
            LEFT JOIN accrual_flow af ON af.order_id = o.id
            WHERE o.user_id = $1
            GROUP BY o.id
            ORDER BY o.uploaded_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error("list orders", e))?;

        rows.iter()
            .map(|row| {
                Ok(OrderWithAccrual {
                    order: order_from_row(row)?,
                    accrual: column(row, "accrual")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn find_unprocessed_orders(&self) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, uploaded_at
            FROM orders
            WHERE status NOT IN ('INVALID', 'PROCESSED')
            ORDER BY uploaded_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error("list unprocessed orders", e))?;

        rows.iter().map(order_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn update_order_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<bool, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_error("begin transaction", e))?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_db_error("lock order", e))?;

        let current = match current {
            Some(s) => parse_status(&s)?,
            None => return Err(LedgerError::OrderNotFound(order_id.clone())),
        };

        if !current.can_transition_to(status) {
            debug!(%order_id, from = %current, to = %status, "Ignoring status regression");
            return Ok(false);
        }

        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id.as_str())
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error("update order status", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_error("commit status update", e))?;

        debug!(%order_id, from = %current, to = %status, "updated order status");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn create_accrual(
        &self,
        order_id: &OrderId,
        amount: f64,
    ) -> Result<AccrualRecord, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accrual_flow (order_id, amount)
            VALUES ($1, $2)
            RETURNING order_id, amount, processed_at
            "#,
        )
        .bind(order_id.as_str())
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                LedgerError::OrderNotFound(order_id.clone())
            }
            _ => map_insert_error(e, LedgerError::DuplicateAccrual(order_id.clone())),
        })?;

        debug!(%order_id, amount, "recorded accrual");
        Ok(AccrualRecord {
            order_id: OrderId::new(column::<String>(&row, "order_id")?),
            amount: column(&row, "amount")?,
            processed_at: column(&row, "processed_at")?,
        })
    }

    #[instrument(skip(self))]
    async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        let row = sqlx::query(BALANCE_QUERY)
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error("compute balance", e))?;

        Ok(Balance::from_totals(
            column(&row, "accrued")?,
            column(&row, "withdrawn")?,
        ))
    }

    #[instrument(skip(self))]
    async fn create_withdrawal(
        &self,
        order_id: &OrderId,
        user_id: UserId,
        amount: f64,
    ) -> Result<Withdrawal, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_error("begin transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error("lock balance", e))?;

        let row = sqlx::query(BALANCE_QUERY)
            .bind(user_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_db_error("compute balance", e))?;
        let balance = Balance::from_totals(column(&row, "accrued")?, column(&row, "withdrawn")?);

        if !balance.covers(amount) {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: balance.current,
            });
        }

        let row = sqlx::query(
            r#"
            INSERT INTO withdrawal_flow (order_id, user_id, amount)
            VALUES ($1, $2, $3)
            RETURNING order_id, user_id, amount, processed_at
            "#,
        )
        .bind(order_id.as_str())
        .bind(user_id.as_uuid())
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, LedgerError::DuplicateWithdrawal(order_id.clone())))?;

        tx.commit()
            .await
            .map_err(|e| map_db_error("commit withdrawal", e))?;

        debug!(%order_id, %user_id, amount, "recorded withdrawal");
        withdrawal_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn find_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, user_id, amount, processed_at
            FROM withdrawal_flow
            WHERE user_id = $1
            ORDER BY processed_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error("list withdrawals", e))?;

        rows.iter().map(withdrawal_from_row).collect()
    }
}
