use async_trait::async_trait;
use common::{Money, OrderId, PaymentId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::Result;
use crate::model::{Payment, PaymentStatus, Settlement};
use crate::store::{Created, PaymentStore};

const PAYMENT_COLUMNS: &str = "id, order_id, client_id, amount_cents, status, payment_method, \
     transaction_id, failure_reason, created_at, completed_at";

/// PostgreSQL-backed payment store.
///
/// A unique index on `order_id` keeps one payment per order, so concurrent
/// inserts for one order cannot both succeed.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let method: String = row.try_get("payment_method")?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::new(row.try_get("order_id")?),
            client_id: UserId::new(row.try_get("client_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            status: status.parse()?,
            payment_method: method.parse()?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            failure_reason: row.try_get("failure_reason")?,
            transaction_id: row.try_get("transaction_id")?,
        })
    }

    async fn order_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1");

        let row = sqlx::query(&sql)
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn list(&self, column: &str, value: i64) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE {column} = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_payment).collect()
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn create(&self, payment: Payment) -> Result<Created> {
        if let Some(existing) = self.order_payment(payment.order_id).await? {
            return Ok(Created::Existing(existing));
        }

        let sql = format!(
            r#"
            INSERT INTO payments ({PAYMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(payment.id.as_uuid())
            .bind(payment.order_id.as_i64())
            .bind(payment.client_id.as_i64())
            .bind(payment.amount.cents())
            .bind(payment.status.as_str())
            .bind(payment.payment_method.as_str())
            .bind(&payment.transaction_id)
            .bind(&payment.failure_reason)
            .bind(payment.created_at)
            .bind(payment.completed_at)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => Ok(Created::New(Self::row_to_payment(row)?)),
            // Lost the race to a concurrent insert for the same order.
            None => match self.order_payment(payment.order_id).await? {
                Some(existing) => Ok(Created::Existing(existing)),
                None => Err(crate::error::SagaError::TransientInfra(format!(
                    "payment insert for order {} conflicted but no payment found",
                    payment.order_id
                ))),
            },
        }
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        self.list("order_id", order_id.as_i64()).await
    }

    async fn for_client(&self, client_id: UserId) -> Result<Vec<Payment>> {
        self.list("client_id", client_id.as_i64()).await
    }

    async fn settle(&self, id: PaymentId, settlement: Settlement) -> Result<Option<Payment>> {
        let (transaction_id, failure_reason) = match &settlement {
            Settlement::Completed { transaction_id } => (Some(transaction_id.as_str()), None),
            Settlement::Failed { reason } => (None, Some(reason.as_str())),
        };

        let sql = format!(
            r#"
            UPDATE payments
            SET status = $2, transaction_id = $3, failure_reason = $4, completed_at = NOW()
            WHERE id = $1 AND status = '{pending}'
            RETURNING {PAYMENT_COLUMNS}
            "#,
            pending = PaymentStatus::Pending.as_str(),
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(settlement.status().as_str())
            .bind(transaction_id)
            .bind(failure_reason)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }
}
