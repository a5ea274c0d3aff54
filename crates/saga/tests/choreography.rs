//! End-to-end choreography over the in-memory event log.
//!
//! Each participant runs behind its own consumer group, exactly as the
//! services do in production; the identity service is a local axum stub.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use common::{Money, OrderId, ProductId, UserId};
use event_bus::{
    ConsumerConfig, ConsumerGroup, EventLog, EventPublisher, EventPublisherExt, GroupCoordinator,
    InMemoryEventLog, LogPublisher,
};
use saga::{
    Channel, EventRouter, HttpIdentityClient, IdentityLookup, InMemoryPaymentStore,
    MockCardGateway, NotificationParticipant, Notifier, Order, OrderEvent, OrderStatus,
    PaymentParticipant, PaymentStatus, ProcessPaymentRequest, RecordingSender, SagaEvent,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const STREAM: &str = "order-events";

struct Harness {
    log: InMemoryEventLog,
    publisher: Arc<LogPublisher>,
    payments: Arc<PaymentParticipant>,
    payment_store: InMemoryPaymentStore,
    email: RecordingSender,
    sms: RecordingSender,
    cancel: CancellationToken,
}

impl Harness {
    async fn start(identity: Arc<dyn IdentityLookup>) -> Self {
        let log = InMemoryEventLog::new();
        let shared_log: Arc<dyn EventLog> = Arc::new(log.clone());
        let publisher = Arc::new(LogPublisher::new(Arc::clone(&shared_log)));
        let coordinator = GroupCoordinator::new();
        let cancel = CancellationToken::new();

        let payment_store = InMemoryPaymentStore::new();
        let payments = Arc::new(PaymentParticipant::new(
            Arc::new(payment_store.clone()),
            Arc::new(MockCardGateway),
            publisher.clone(),
            STREAM,
        ));

        let email = RecordingSender::new(Channel::Email);
        let sms = RecordingSender::new(Channel::Sms);
        let notifier = Notifier::new(Duration::from_secs(1))
            .with_sender(Arc::new(email.clone()))
            .with_sender(Arc::new(sms.clone()));
        let notifications = Arc::new(NotificationParticipant::new(identity, notifier));

        for (group, router) in [
            ("payment-service", EventRouter::new(payments.clone())),
            ("notification-service", EventRouter::new(notifications)),
        ] {
            let consumer = ConsumerGroup::new(
                Arc::clone(&shared_log),
                coordinator.clone(),
                ConsumerConfig::new(group, STREAM)
                    .with_workers(2)
                    .with_poll_interval(Duration::from_millis(10)),
                Arc::new(router),
            );
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.start(cancel).await });
        }

        Self {
            log,
            publisher,
            payments,
            payment_store,
            email,
            sms,
            cancel,
        }
    }

    async fn publish_order_created(&self, order: &Order) {
        self.publisher
            .publish_event(STREAM, &SagaEvent::from(OrderEvent::created(order)))
            .await
            .unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Polls an async condition until it holds.
macro_rules! eventually {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..500 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reached, "condition not reached in time: {}", stringify!($cond));
    }};
}

/// Serves supplier 9 and answers 404 for everyone else.
async fn identity_stub() -> String {
    let app = Router::new().route(
        "/user/{id}",
        get(|Path(id): Path<i64>| async move {
            match id {
                9 => Ok(Json(json!({
                    "id": 9,
                    "username": "acme",
                    "email": "orders@acme.test",
                    "role": "supplier"
                }))),
                _ => Err(StatusCode::NOT_FOUND),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}

fn order_42() -> Order {
    Order {
        id: OrderId::new(42),
        product_id: ProductId::new(3),
        product_name: "Lamp".into(),
        supplier_id: UserId::new(9),
        client_id: UserId::new(7),
        amount: Money::from_cents(10_000),
        status: OrderStatus::Pending,
    }
}

fn approved_card() -> ProcessPaymentRequest {
    ProcessPaymentRequest {
        card_number: Some("4111111111111111".into()),
        expiry_month: Some(12),
        expiry_year: Some(2099),
        cvv: Some("123".into()),
        cardholder_name: Some("Test Client".into()),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn order_created_flows_through_payment_to_client_notifications() {
    let base = identity_stub().await;
    let identity = HttpIdentityClient::new(base, Duration::from_secs(1)).unwrap();
    let h = Harness::start(Arc::new(identity)).await;

    h.publish_order_created(&order_42()).await;

    // payment participant opens exactly one pending payment
    eventually!(h.payment_store.len().await == 1);
    let payments = h.payments.payments_for_client(UserId::new(7)).await.unwrap();
    let payment = &payments[0];
    assert_eq!(payment.order_id, OrderId::new(42));
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, Money::from_cents(10_000));

    // payment_required lands on the stream keyed by the order
    eventually!(h.log.record_count(STREAM).await == 2);
    let records = h.log.records(STREAM).await;
    let required = records
        .iter()
        .find_map(|r| match SagaEvent::decode(&r.payload).unwrap() {
            Some(SagaEvent::Payment(p)) => Some((r.key.clone(), p)),
            _ => None,
        })
        .unwrap();
    assert_eq!(required.0, "42");
    assert_eq!(required.1.payment_id, payment.id);

    // supplier resolved through the identity service; client 7 is missing
    // there and falls back to the placeholder contact
    eventually!({
        let emails = h.email.sent().await;
        emails.iter().any(|m| m.recipient == "orders@acme.test")
            && emails
                .iter()
                .filter(|m| m.recipient == "user7@example.com")
                .count()
                == 2
    });
    let client_emails: Vec<_> = h
        .email
        .sent()
        .await
        .into_iter()
        .filter(|m| m.recipient == "user7@example.com")
        .collect();
    assert!(client_emails.iter().all(|m| m.order_id == OrderId::new(42)));
    assert!(
        client_emails
            .iter()
            .any(|m| m.subject == "Payment required for order #42")
    );
    eventually!(
        h.sms
            .sent()
            .await
            .iter()
            .filter(|m| m.recipient == "+79001000007")
            .count()
            == 2
    );

    // settle and see payment_completed reach the client
    let settled = h
        .payments
        .process_payment(payment.id, approved_card())
        .await
        .unwrap();
    assert_eq!(settled.status, PaymentStatus::Completed);

    eventually!(
        h.email
            .sent()
            .await
            .iter()
            .any(|m| m.subject == "Payment received for order #42")
    );
    assert_eq!(h.payment_store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn redelivered_order_created_opens_no_second_payment() {
    let base = identity_stub().await;
    let h = Harness::start(Arc::new(
        HttpIdentityClient::new(base, Duration::from_secs(1)).unwrap(),
    ))
    .await;

    h.publish_order_created(&order_42()).await;
    h.publish_order_created(&order_42()).await;

    // both order_created records plus a single payment_required
    eventually!(h.log.record_count(STREAM).await == 3);
    // let both groups drain before asserting nothing else appears
    eventually!(
        h.email
            .sent()
            .await
            .iter()
            .filter(|m| m.subject == "New order #42")
            .count()
            == 2
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.payment_store.len().await, 1);
    assert_eq!(h.log.record_count(STREAM).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_and_malformed_records_do_not_stall_the_saga() {
    let base = identity_stub().await;
    let h = Harness::start(Arc::new(
        HttpIdentityClient::new(base, Duration::from_secs(1)).unwrap(),
    ))
    .await;

    let publisher: &dyn EventPublisher = h.publisher.as_ref();
    publisher
        .publish(
            STREAM,
            "42",
            &json!({"event_type": "inventory_reserved", "order_id": 42}),
        )
        .await
        .unwrap();
    publisher
        .publish_raw(STREAM, "42", b"not json".to_vec())
        .await
        .unwrap();
    publisher
        .publish(STREAM, "42", &json!({"event_type": "order_created"}))
        .await
        .unwrap();
    h.publish_order_created(&order_42()).await;

    eventually!(h.payment_store.len().await == 1);
    eventually!(
        h.email
            .sent()
            .await
            .iter()
            .any(|m| m.subject == "Payment required for order #42")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn email_outage_still_delivers_sms() {
    let base = identity_stub().await;
    let h = Harness::start(Arc::new(
        HttpIdentityClient::new(base, Duration::from_secs(1)).unwrap(),
    ))
    .await;
    h.email.set_fail(true);

    h.publish_order_created(&order_42()).await;

    eventually!(
        h.sms
            .sent()
            .await
            .iter()
            .any(|m| m.body.contains("Payment required for order #42"))
    );
    assert!(h.email.sent().await.is_empty());
}
