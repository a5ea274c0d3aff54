//! Storage traits for the participants' local aggregates and their
//! in-memory implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, OrderId, PaymentId, ProductId, UserId};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::model::{Order, OrderStatus, Payment, PaymentStatus, Settlement};

/// Outcome of an idempotent payment insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    New(Payment),
    Existing(Payment),
}

impl Created {
    pub fn payment(&self) -> &Payment {
        match self {
            Created::New(p) | Created::Existing(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            Created::New(p) | Created::Existing(p) => p,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }
}

/// Persistence for payments, keyed for idempotency by order id.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts `payment` unless its order already has a payment, in any
    /// status, in which case that payment is returned instead.
    async fn create(&self, payment: Payment) -> Result<Created>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// Returns the payments of an order, newest first.
    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Returns the payments of a client, newest first.
    async fn for_client(&self, client_id: UserId) -> Result<Vec<Payment>>;

    /// Moves a pending payment to its terminal state.
    ///
    /// Returns `None` if the payment does not exist or is no longer pending;
    /// nothing is written in that case.
    async fn settle(&self, id: PaymentId, settlement: Settlement) -> Result<Option<Payment>>;
}

/// Applies a settlement to a payment held in memory.
pub(crate) fn apply_settlement(payment: &mut Payment, settlement: Settlement) {
    payment.status = settlement.status();
    payment.completed_at = Some(Utc::now());
    match settlement {
        Settlement::Completed { transaction_id } => payment.transaction_id = Some(transaction_id),
        Settlement::Failed { reason } => payment.failure_reason = Some(reason),
    }
}

fn newest_first(mut payments: Vec<Payment>) -> Vec<Payment> {
    payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    payments
}

/// In-memory payment store for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a transient error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SagaError::TransientInfra(
                "payment store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: Payment) -> Result<Created> {
        self.ensure_available()?;
        let mut payments = self.payments.write().await;

        let existing = payments
            .values()
            .find(|p| p.order_id == payment.order_id)
            .cloned();
        if let Some(existing) = existing {
            return Ok(Created::Existing(existing));
        }

        payments.insert(payment.id, payment.clone());
        Ok(Created::New(payment))
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.ensure_available()?;
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        self.ensure_available()?;
        let payments = self.payments.read().await;
        Ok(newest_first(
            payments
                .values()
                .filter(|p| p.order_id == order_id)
                .cloned()
                .collect(),
        ))
    }

    async fn for_client(&self, client_id: UserId) -> Result<Vec<Payment>> {
        self.ensure_available()?;
        let payments = self.payments.read().await;
        Ok(newest_first(
            payments
                .values()
                .filter(|p| p.client_id == client_id)
                .cloned()
                .collect(),
        ))
    }

    async fn settle(&self, id: PaymentId, settlement: Settlement) -> Result<Option<Payment>> {
        self.ensure_available()?;
        let mut payments = self.payments.write().await;
        match payments.get_mut(&id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                apply_settlement(payment, settlement);
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }
}

/// Fields of an order before it is stored and given an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub product_id: ProductId,
    pub product_name: String,
    pub supplier_id: UserId,
    pub client_id: UserId,
    pub amount: Money,
}

/// Persistence for the order participant.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new pending order and assigns its id.
    async fn create(&self, order: NewOrder) -> Result<Order>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Returns the updated order, or `None` if it does not exist.
    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Option<Order>>;
}

#[derive(Default)]
struct OrderTable {
    orders: HashMap<OrderId, Order>,
    last_id: i64,
}

/// In-memory order store with sequential ids starting at 1.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<OrderTable>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        let mut table = self.table.write().await;
        table.last_id += 1;

        let order = Order {
            id: OrderId::new(table.last_id),
            product_id: order.product_id,
            product_name: order.product_name,
            supplier_id: order.supplier_id,
            client_id: order.client_id,
            amount: order.amount,
            status: OrderStatus::Pending,
        };
        table.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.table.read().await.orders.get(&id).cloned())
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Option<Order>> {
        let mut table = self.table.write().await;
        Ok(table.orders.get_mut(&id).map(|order| {
            order.status = status;
            order.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PaymentMethod;

    fn pending(order: i64) -> Payment {
        Payment::pending(
            OrderId::new(order),
            UserId::new(7),
            Money::from_cents(10_000),
            PaymentMethod::Card,
        )
    }

    #[tokio::test]
    async fn failed_payment_still_blocks_a_second_one() {
        let store = InMemoryPaymentStore::new();
        let first = store.create(pending(42)).await.unwrap();
        assert!(first.is_new());

        let dup = store.create(pending(42)).await.unwrap();
        assert_eq!(dup, Created::Existing(first.payment().clone()));

        store
            .settle(
                first.payment().id,
                Settlement::Failed {
                    reason: "declined".into(),
                },
            )
            .await
            .unwrap();

        let again = store.create(pending(42)).await.unwrap();
        assert!(!again.is_new());
        assert_eq!(again.payment().id, first.payment().id);
        assert_eq!(again.payment().status, PaymentStatus::Failed);
        assert_eq!(store.for_order(OrderId::new(42)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settle_only_moves_pending_once() {
        let store = InMemoryPaymentStore::new();
        let payment = store.create(pending(1)).await.unwrap().into_payment();

        let settled = store
            .settle(
                payment.id,
                Settlement::Completed {
                    transaction_id: "txn_ab".into(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, PaymentStatus::Completed);
        assert_eq!(settled.transaction_id.as_deref(), Some("txn_ab"));
        assert!(settled.completed_at.is_some());

        let second = store
            .settle(
                payment.id,
                Settlement::Failed {
                    reason: "late".into(),
                },
            )
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(
            store.get(payment.id).await.unwrap().unwrap().status,
            PaymentStatus::Completed
        );
    }

    #[tokio::test]
    async fn payments_listed_by_client() {
        let store = InMemoryPaymentStore::new();
        for order in 1..=3 {
            store.create(pending(order)).await.unwrap();
        }
        assert_eq!(store.for_client(UserId::new(7)).await.unwrap().len(), 3);
        assert!(store.for_client(UserId::new(8)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_is_transient() {
        let store = InMemoryPaymentStore::new();
        store.set_unavailable(true);
        let err = store.get(PaymentId::new()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn orders_get_sequential_ids_and_status_updates() {
        let store = InMemoryOrderStore::new();
        let draft = NewOrder {
            product_id: ProductId::new(3),
            product_name: "Lamp".into(),
            supplier_id: UserId::new(9),
            client_id: UserId::new(7),
            amount: Money::from_cents(10_000),
        };
        let first = store.create(draft.clone()).await.unwrap();
        let second = store.create(draft).await.unwrap();
        assert_eq!(first.id, OrderId::new(1));
        assert_eq!(second.id, OrderId::new(2));
        assert_eq!(first.status, OrderStatus::Pending);

        let shipped = store
            .update_status(first.id, OrderStatus::Shipped)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert!(
            store
                .update_status(OrderId::new(99), OrderStatus::Shipped)
                .await
                .unwrap()
                .is_none()
        );
    }
}
