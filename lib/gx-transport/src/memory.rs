//! In-process transport
//!
//! Every connection made from one [`InMemoryBus`] shares its subscription
//! table, so services, callers and a development broker can run inside a
//! single process (or test) with the same delivery semantics the runtime
//! expects from a real server: plain subscriptions all receive a message,
//! queue-group subscriptions receive it exactly once per group.

use crate::balancer::{GroupBalancer, GroupMember};
use crate::subject::{matches, validate_pattern, validate_subject};
use crate::{ConnectionState, Message, Result, Subscription, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

struct SubscriberEntry {
    id: u64,
    connection: u64,
    pattern: String,
    queue_group: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<ConnectionState>,
}

impl GroupMember for SubscriberEntry {
    fn ready(&self) -> bool {
        !self.sender.is_closed() && *self.state.borrow() == ConnectionState::Connected
    }
}

#[derive(Default)]
struct BusState {
    subscribers: Vec<SubscriberEntry>,
    balancer: GroupBalancer,
    next_id: u64,
}

impl BusState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Drop dead subscriptions and the rotation of groups left empty
    fn prune(&mut self) {
        self.subscribers.retain(|entry| !entry.sender.is_closed());
        let BusState {
            subscribers,
            balancer,
            ..
        } = self;
        balancer.retain_groups(|group| {
            subscribers
                .iter()
                .any(|entry| entry.queue_group.as_deref() == Some(group))
        });
    }
}

/// Shared in-process message bus
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new, already connected, connection to the bus
    pub fn connect(&self, name: impl Into<String>) -> MemoryConnection {
        let id = self.lock().next_id();
        let (state, _) = watch::channel(ConnectionState::Connected);
        let name = name.into();
        debug!("Connection {} ({}) opened on in-memory bus", name, id);

        MemoryConnection {
            id,
            name,
            bus: self.clone(),
            state: Arc::new(state),
        }
    }

    /// Number of live subscriptions across all connections
    pub fn subscription_count(&self) -> usize {
        let mut state = self.lock();
        state.prune();
        state.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock()
    }

    fn deliver(&self, message: Message) -> usize {
        let mut state = self.lock();
        state.prune();

        let BusState {
            subscribers,
            balancer,
            ..
        } = &mut *state;

        let mut delivered = 0;
        let mut groups: BTreeMap<&str, Vec<&SubscriberEntry>> = BTreeMap::new();

        for entry in subscribers.iter() {
            if !matches(&entry.pattern, &message.subject) {
                continue;
            }
            match entry.queue_group.as_deref() {
                Some(group) => groups.entry(group).or_default().push(entry),
                None => {
                    if entry.ready() && entry.sender.send(message.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        for (group, members) in groups {
            if let Some(entry) = balancer.select(group, &members) {
                if entry.sender.send(message.clone()).is_ok() {
                    trace!(subscription = entry.id, group = group, "Queue group delivery");
                    delivered += 1;
                }
            }
        }

        delivered
    }
}

/// One client connection to an [`InMemoryBus`]
pub struct MemoryConnection {
    id: u64,
    name: String,
    bus: InMemoryBus,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl MemoryConnection {
    /// Simulate losing the server; subscriptions stay but receive nothing
    pub fn disconnect(&self) {
        debug!("Connection {} disconnected", self.name);
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Simulate the connection coming back
    pub fn reconnect(&self) {
        debug!("Connection {} reconnected", self.name);
        self.state.send_replace(ConnectionState::Connected);
    }

    /// Close the connection for good, dropping all of its subscriptions
    pub fn close(&self) {
        self.state.send_replace(ConnectionState::Closed);
        let mut state = self.bus.lock();
        state.subscribers.retain(|entry| entry.connection != self.id);
        state.prune();
        debug!("Connection {} closed", self.name);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closed => Err(TransportError::Closed),
            other => Err(TransportError::ConnectionLost(format!(
                "{} is {:?}",
                self.name, other
            ))),
        }
    }
}

#[async_trait]
impl Transport for MemoryConnection {
    async fn publish(&self, subject: &str, reply_to: Option<&str>, payload: Vec<u8>) -> Result<()> {
        validate_subject(subject)?;
        if let Some(reply_to) = reply_to {
            validate_subject(reply_to)?;
        }
        self.ensure_connected()?;

        let delivered = self.bus.deliver(Message {
            subject: subject.to_string(),
            reply_to: reply_to.map(String::from),
            payload,
        });
        trace!(subject = subject, delivered = delivered, "Published");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription> {
        validate_pattern(subject)?;
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.bus.lock();
        let id = state.next_id();
        state.subscribers.push(SubscriberEntry {
            id,
            connection: self.id,
            pattern: subject.to_string(),
            queue_group: queue_group.map(String::from),
            sender,
            state: self.state.subscribe(),
        });
        debug!(
            connection = %self.name,
            subject = subject,
            queue_group = ?queue_group,
            "Subscribed"
        );

        Ok(Subscription::new(subject, queue_group.map(String::from), receiver))
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
