//! Multi-channel notification fan-out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use futures_util::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::channels::{Channel, ChannelSender, LoggingSender, Message};
use crate::content;
use crate::events::SagaEvent;
use crate::identity::UserInfo;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResult {
    pub channel: Channel,
    pub recipient: String,
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
}

impl ChannelResult {
    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}

/// Log entry for a single delivery attempt. Notifications are not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Notification {
    fn pending(message: &Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: message.channel,
            recipient: message.recipient.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            status: DeliveryStatus::Pending,
            order_id: message.order_id,
            user_id: message.user_id,
            created_at: Utc::now(),
            sent_at: None,
            failure_reason: None,
        }
    }
}

/// Sends one logical notification over every enabled channel the recipient can be reached on.
#[derive(Clone)]
pub struct Notifier {
    senders: Vec<Arc<dyn ChannelSender>>,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            senders: Vec::new(),
            send_timeout,
        }
    }

    /// Notifier with a [`LoggingSender`] for each channel.
    pub fn logging(channels: &[Channel], send_timeout: Duration) -> Self {
        channels.iter().fold(Self::new(send_timeout), |notifier, channel| {
            notifier.with_sender(Arc::new(LoggingSender::new(*channel)))
        })
    }

    /// Registers a sender, replacing any previous sender for the same channel.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.retain(|s| s.channel() != sender.channel());
        self.senders.push(sender);
        self
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.senders.iter().map(|s| s.channel()).collect()
    }

    fn address(channel: Channel, user: &UserInfo) -> Option<String> {
        match channel {
            Channel::Email => Some(user.email.clone()).filter(|e| !e.is_empty()),
            Channel::Sms => user.phone().map(str::to_string),
            Channel::Push => Some(user.id.to_string()),
        }
    }

    /// Attempts every reachable channel concurrently. Failures and timeouts become
    /// `failed` results.
    #[tracing::instrument(skip(self, event, recipient), fields(event_type = %event.kind(), order_id = %event.order_id(), user_id = %recipient.id))]
    pub async fn notify(&self, event: &SagaEvent, recipient: &UserInfo) -> Vec<ChannelResult> {
        let attempts = self.senders.iter().filter_map(|sender| {
            let channel = sender.channel();
            let address = Self::address(channel, recipient)?;
            let content = content::render(event, recipient, channel);
            let message = Message {
                channel,
                recipient: address,
                subject: content.subject,
                body: content.body,
                order_id: event.order_id(),
                user_id: recipient.id,
            };
            Some(self.attempt(Arc::clone(sender), message))
        });

        join_all(attempts).await
    }

    async fn attempt(&self, sender: Arc<dyn ChannelSender>, message: Message) -> ChannelResult {
        let mut notification = Notification::pending(&message);

        let outcome = match tokio::time::timeout(self.send_timeout, sender.send(&message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("send timed out after {:?}", self.send_timeout)),
        };

        match outcome {
            Ok(()) => {
                notification.status = DeliveryStatus::Sent;
                notification.sent_at = Some(Utc::now());
            }
            Err(reason) => {
                notification.status = DeliveryStatus::Failed;
                notification.failure_reason = Some(reason);
            }
        }

        metrics::counter!(
            "notifications_total",
            "channel" => notification.channel.as_str(),
            "status" => notification.status.as_str()
        )
        .increment(1);

        match notification.status {
            DeliveryStatus::Failed => tracing::warn!(
                notification_id = %notification.id,
                channel = %notification.channel,
                recipient = %notification.recipient,
                reason = notification.failure_reason.as_deref().unwrap_or_default(),
                "notification failed"
            ),
            _ => tracing::debug!(
                notification_id = %notification.id,
                channel = %notification.channel,
                recipient = %notification.recipient,
                "notification delivered"
            ),
        }

        ChannelResult {
            channel: notification.channel,
            recipient: notification.recipient,
            status: notification.status,
            failure_reason: notification.failure_reason,
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::logging(&[Channel::Email, Channel::Sms], DEFAULT_SEND_TIMEOUT)
    }
}
