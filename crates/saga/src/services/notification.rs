//! Notification participant: tells clients and suppliers about saga progress.

use std::sync::Arc;

use async_trait::async_trait;
use common::UserId;

use crate::error::Result;
use crate::events::{EventKind, SagaEvent};
use crate::fanout::{ChannelResult, Notifier};
use crate::identity::{IdentityLookup, UserRole, resolve_user};
use crate::router::Participant;

pub struct NotificationParticipant {
    identity: Arc<dyn IdentityLookup>,
    notifier: Notifier,
}

impl NotificationParticipant {
    pub fn new(identity: Arc<dyn IdentityLookup>, notifier: Notifier) -> Self {
        Self { identity, notifier }
    }

    /// Notifies every party interested in `event` and returns all channel results.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.kind(), order_id = %event.order_id()))]
    pub async fn dispatch(&self, event: &SagaEvent) -> Vec<ChannelResult> {
        let mut results = Vec::new();

        if let SagaEvent::Order(order) = event
            && order.event_type == EventKind::OrderCreated
        {
            results.extend(self.notify(event, order.supplier_id, UserRole::Supplier).await);
        }
        results.extend(self.notify(event, event.client_id(), UserRole::Client).await);

        let sent = results.iter().filter(|r| r.is_sent()).count();
        tracing::info!(sent, failed = results.len() - sent, "notifications dispatched");
        results
    }

    async fn notify(&self, event: &SagaEvent, user_id: UserId, role: UserRole) -> Vec<ChannelResult> {
        let mut user = resolve_user(self.identity.as_ref(), user_id).await;
        // The event decides the audience, whatever role the directory reports.
        user.role = role;
        self.notifier.notify(event, &user).await
    }
}

#[async_trait]
impl Participant for NotificationParticipant {
    fn name(&self) -> &str {
        "notification"
    }

    fn produces(&self) -> &[EventKind] {
        &[]
    }

    fn subscribes(&self) -> &[EventKind] {
        &EventKind::ALL
    }

    async fn handle(&self, event: SagaEvent) -> Result<()> {
        self.dispatch(&event).await;
        Ok(())
    }
}
