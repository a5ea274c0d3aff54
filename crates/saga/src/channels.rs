//! Delivery channels for notifications.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "push" => Ok(Channel::Push),
            other => Err(SagaError::Validation(format!("unknown channel: {other}"))),
        }
    }
}

/// Parses a comma-separated channel list such as `email,sms`.
pub fn parse_channels(list: &str) -> Result<Vec<Channel>> {
    let mut channels = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(Channel::from_str)
        .collect::<Result<Vec<_>>>()?;
    channels.sort();
    channels.dedup();
    Ok(channels)
}

/// A rendered message addressed to one recipient on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub order_id: OrderId,
    pub user_id: UserId,
}

/// Sends messages over one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, message: &Message) -> Result<()>;
}

/// Sender that only logs what it would deliver.
#[derive(Debug, Clone)]
pub struct LoggingSender {
    channel: Channel,
}

impl LoggingSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LoggingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &Message) -> Result<()> {
        tracing::info!(
            channel = %self.channel,
            recipient = %message.recipient,
            order_id = %message.order_id,
            subject = %message.subject,
            "notification sent"
        );
        Ok(())
    }
}

/// Sender that keeps delivered messages in memory; can be told to fail or stall.
#[derive(Clone)]
pub struct RecordingSender {
    channel: Channel,
    sent: Arc<Mutex<Vec<Message>>>,
    fail: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl RecordingSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sent: Arc::default(),
            fail: Arc::default(),
            delay: None,
        }
    }

    /// Makes every send sleep first, to exercise send timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::DownstreamUnavailable(format!(
                "{} gateway rejected message",
                self.channel
            )));
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}
