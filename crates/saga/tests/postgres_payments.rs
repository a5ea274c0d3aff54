//! PostgreSQL payment store integration tests
//!
//! Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_payments
//! ```

use std::sync::Arc;

use common::{Money, OrderId, UserId};
use saga::{
    Created, Payment, PaymentMethod, PaymentStatus, PaymentStore, PostgresPaymentStore, Settlement,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/002_create_payments_table.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresPaymentStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE payments")
        .execute(&pool)
        .await
        .unwrap();

    PostgresPaymentStore::new(pool)
}

fn pending(order: i64) -> Payment {
    Payment::pending(
        OrderId::new(order),
        UserId::new(7),
        Money::from_cents(10_000),
        PaymentMethod::Card,
    )
}

#[tokio::test]
#[serial]
async fn create_then_read_back() {
    let store = get_test_store().await;

    let created = store.create(pending(42)).await.unwrap();
    assert!(created.is_new());

    let fetched = store.get(created.payment().id).await.unwrap().unwrap();
    assert_eq!(fetched.order_id, OrderId::new(42));
    assert_eq!(fetched.amount, Money::from_cents(10_000));
    assert_eq!(fetched.status, PaymentStatus::Pending);
    assert_eq!(fetched.payment_method, PaymentMethod::Card);
}

#[tokio::test]
#[serial]
async fn second_create_for_order_returns_existing() {
    let store = get_test_store().await;

    let first = store.create(pending(42)).await.unwrap();
    let second = store.create(pending(42)).await.unwrap();

    assert!(matches!(second, Created::Existing(ref p) if p.id == first.payment().id));
    assert_eq!(store.for_order(OrderId::new(42)).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn concurrent_creates_store_one_payment() {
    let store = get_test_store().await;

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.create(pending(42)).await.unwrap() })
    });
    let results = futures_util::future::join_all(attempts).await;

    let new = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(Created::is_new)
        .count();
    assert_eq!(new, 1);
    assert_eq!(store.for_order(OrderId::new(42)).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn settle_applies_once() {
    let store = get_test_store().await;
    let payment = store.create(pending(42)).await.unwrap().into_payment();

    let settled = store
        .settle(
            payment.id,
            Settlement::Completed {
                transaction_id: "txn_abc".into(),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, PaymentStatus::Completed);
    assert_eq!(settled.transaction_id.as_deref(), Some("txn_abc"));
    assert!(settled.completed_at.is_some());

    let again = store
        .settle(
            payment.id,
            Settlement::Failed {
                reason: "late".into(),
            },
        )
        .await
        .unwrap();
    assert!(again.is_none());
}

#[tokio::test]
#[serial]
async fn failed_payment_still_owns_its_order() {
    let store = get_test_store().await;
    let failed = store.create(pending(42)).await.unwrap().into_payment();
    store
        .settle(
            failed.id,
            Settlement::Failed {
                reason: "Payment processing failed".into(),
            },
        )
        .await
        .unwrap();

    let again = store.create(pending(42)).await.unwrap();
    assert!(!again.is_new());
    assert_eq!(again.payment().id, failed.id);
    assert_eq!(again.payment().status, PaymentStatus::Failed);

    let history = store.for_client(UserId::new(7)).await.unwrap();
    assert_eq!(history.len(), 1);
}
