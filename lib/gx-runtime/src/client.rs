//! Outbound request/reply correlation
//!
//! Every instance owns one inbox subject, `gx.inbox.<instance>`. Each
//! outbound call publishes with a reply subject `gx.inbox.<instance>.<id>` and
//! parks a oneshot sender under `<id>` in the pending map. The inbox listener
//! resolves entries as replies arrive; an entry is removed on completion, on
//! timeout, or when the caller stops waiting, so a late reply finds nothing
//! and is dropped.

use dashmap::DashMap;
use gx_core::error::MALFORMED_REPLY;
use gx_core::{InvocationEnvelope, MeshError, ResponseEnvelope, Result, BROKER_INVOKE_SUBJECT};
use gx_transport::{Message, Subscription, Transport};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

pub struct RpcClient {
    transport: Arc<dyn Transport>,
    inbox: String,
    call_timeout: Duration,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<ResponseEnvelope>>,
}

/// Removes the pending entry when the waiting call goes away, whatever the
/// reason
struct PendingGuard<'a> {
    client: &'a RpcClient,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.client.pending.remove(&self.id);
    }
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, instance_id: &str, call_timeout: Duration) -> Self {
        let token: String = instance_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        Self {
            transport,
            inbox: format!("gx.inbox.{}", token),
            call_timeout,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Subscription pattern covering every reply subject of this client
    pub fn inbox_pattern(&self) -> String {
        format!("{}.*", self.inbox)
    }

    /// Number of calls still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send one envelope to the broker and wait for exactly one reply
    pub async fn request(&self, envelope: &InvocationEnvelope) -> Result<Value> {
        let payload = serde_json::to_vec(envelope)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reply_to = format!("{}.{}", self.inbox, id);

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id, sender);
        let _guard = PendingGuard { client: self, id };

        self.transport
            .publish(BROKER_INVOKE_SUBJECT, Some(&reply_to), payload)
            .await
            .map_err(|e| MeshError::Transport(e.to_string()))?;

        match tokio::time::timeout(self.call_timeout, receiver).await {
            Ok(Ok(ResponseEnvelope::Result(value))) => Ok(value),
            Ok(Ok(ResponseEnvelope::Error(value))) => Err(MeshError::Remote(value)),
            Ok(Err(_)) => Err(MeshError::Internal("client stopped before reply".to_string())),
            Err(_) => {
                debug!(
                    method = %envelope.method,
                    service = %envelope.service,
                    "No reply within {:?}",
                    self.call_timeout
                );
                Err(MeshError::RequestTimeout(self.call_timeout.as_millis() as u64))
            }
        }
    }

    /// Drain the inbox until shutdown, resolving pending calls
    pub async fn run(self: Arc<Self>, mut inbox: Subscription, mut shutdown: watch::Receiver<bool>) {
        debug!("Listening for replies on {}", inbox.subject());
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = inbox.next() => match message {
                    Some(message) => self.resolve(message),
                    None => break,
                },
            }
        }

        // Waiting callers observe a closed channel rather than a timeout
        self.pending.clear();
        debug!("Reply listener on {} stopped", self.inbox);
    }

    fn resolve(&self, message: Message) {
        let id = message
            .subject
            .rsplit('.')
            .next()
            .and_then(|token| token.parse::<u64>().ok());
        let Some(id) = id else {
            warn!("Reply on unexpected subject {}", message.subject);
            return;
        };

        let Some((_, sender)) = self.pending.remove(&id) else {
            debug!("Discarding reply {} with no pending call", id);
            return;
        };

        let response = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(reply) => ResponseEnvelope::from_reply(reply).unwrap_or_else(|| {
                warn!("Reply on {} is not an object", message.subject);
                ResponseEnvelope::error(MALFORMED_REPLY)
            }),
            Err(e) => {
                warn!("Malformed reply on {}: {}", message.subject, e);
                ResponseEnvelope::error(MALFORMED_REPLY)
            }
        };
        // The caller may have given up between removal and send
        let _ = sender.send(response);
    }
}
