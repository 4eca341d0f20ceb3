//! Transport abstraction
//!
//! The runtime only needs three primitives from the messaging layer: publish
//! with an optional reply subject, subscribe with optional queue-group
//! delivery, and a signal telling whether the connection is up. Payloads are
//! opaque bytes.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("transport closed")]
    Closed,

    #[error("invalid subject: {0}")]
    InvalidSubject(String),
}

/// Connection lifecycle as observed by the instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// A message delivered to a subscription
#[derive(Clone, Debug)]
pub struct Message {
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Vec<u8>,
}

/// Stream of messages for one subscription; dropping it unsubscribes
pub struct Subscription {
    subject: String,
    queue_group: Option<String>,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(
        subject: impl Into<String>,
        queue_group: Option<String>,
        receiver: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            subject: subject.into(),
            queue_group,
            receiver,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    /// Next message, or `None` once the transport has dropped the subscription
    pub async fn next(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

/// Publish/subscribe messaging used by every component of an instance.
///
/// Object safe, shared as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish `payload` on `subject`, optionally naming where replies go
    async fn publish(&self, subject: &str, reply_to: Option<&str>, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a subject pattern.
    ///
    /// With a queue group, each message is delivered to exactly one of the
    /// subscriptions sharing that group.
    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription>;

    /// Watch the connection state
    fn connection(&self) -> watch::Receiver<ConnectionState>;

    /// Name this connection presents to the server
    fn name(&self) -> &str;
}
