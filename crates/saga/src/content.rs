//! Notification texts per event, audience and channel.

use crate::channels::Channel;
use crate::events::{EventKind, OrderEvent, PaymentEvent, SagaEvent};
use crate::identity::{UserInfo, UserRole};
use crate::model::PaymentStatus;

/// Subject and body of one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub subject: String,
    pub body: String,
}

/// Renders the notification for `event` as seen by `user`.
pub fn render(event: &SagaEvent, user: &UserInfo, channel: Channel) -> Content {
    let content = match event {
        SagaEvent::Order(order) => order_content(order, user),
        SagaEvent::Payment(payment) => payment_content(payment),
    };

    // SMS carries no subject; fold it into the text.
    match channel {
        Channel::Sms => Content {
            subject: String::new(),
            body: format!("{}: {}", content.subject, content.body),
        },
        _ => content,
    }
}

fn order_content(event: &OrderEvent, user: &UserInfo) -> Content {
    let id = event.order_id;
    let product = if event.product_name.is_empty() {
        format!("product #{}", event.product_id)
    } else {
        format!("'{}'", event.product_name)
    };

    match (event.event_type, user.role) {
        (EventKind::OrderCreated, UserRole::Supplier) => Content {
            subject: format!("New order #{id}"),
            body: format!(
                "Hello {}, you have a new order #{id} for {product} worth {}.",
                user.username, event.amount
            ),
        },
        (EventKind::OrderCreated, _) => Content {
            subject: format!("Order #{id} placed"),
            body: format!(
                "Hello {}, your order #{id} for {product} worth {} has been placed.",
                user.username, event.amount
            ),
        },
        (EventKind::OrderStatusUpdated, _) => Content {
            subject: format!("Order #{id} status update"),
            body: format!(
                "Hello {}, the status of order #{id} changed to '{}'.",
                user.username,
                event.status.map(|s| s.as_str()).unwrap_or("unknown")
            ),
        },
        _ => fallback(id),
    }
}

fn payment_content(event: &PaymentEvent) -> Content {
    let id = event.order_id;
    match (event.event_type, event.status) {
        (EventKind::PaymentRequired, _) => Content {
            subject: format!("Payment required for order #{id}"),
            body: format!(
                "Please pay {} for order #{id}. Payment reference: {}.",
                event.amount, event.payment_id
            ),
        },
        (EventKind::PaymentCompleted, PaymentStatus::Completed) => Content {
            subject: format!("Payment received for order #{id}"),
            body: format!("We received your payment of {} for order #{id}.", event.amount),
        },
        (EventKind::PaymentCompleted, _) => Content {
            subject: format!("Payment failed for order #{id}"),
            body: format!(
                "Your payment of {} for order #{id} did not go through. Please try again.",
                event.amount
            ),
        },
        _ => fallback(id),
    }
}

fn fallback(id: common::OrderId) -> Content {
    Content {
        subject: format!("Order #{id} notification"),
        body: format!("Order #{id} has been updated."),
    }
}
