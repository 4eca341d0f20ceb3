//! NATS transport
//!
//! Wraps an `async_nats::Client`. Each subscription is bridged onto the same
//! [`Subscription`] channel the in-process bus hands out, and connection
//! events from the client drive the [`ConnectionState`] watch so the runtime
//! can hold heartbeats while the server is unreachable.

use crate::subject::{validate_pattern, validate_subject};
use crate::{ConnectionState, Message, Result, Subscription, Transport, TransportError};
use async_nats::{Client, ConnectOptions, Event, ServerAddr};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// A client connection to one or more NATS servers
pub struct NatsConnection {
    name: String,
    client: Client,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl NatsConnection {
    /// Connect to the first reachable server among `endpoints`
    pub async fn connect(endpoints: &[String], name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let servers = parse_endpoints(endpoints)?;

        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);
        let events = state.clone();
        let connection_name = name.clone();

        let client = ConnectOptions::new()
            .name(&name)
            .event_callback(move |event| {
                let events = events.clone();
                let connection_name = connection_name.clone();
                async move {
                    match state_for(&event) {
                        Some(next) => {
                            info!("Connection {} is {:?}", connection_name, next);
                            events.send_replace(next);
                        }
                        None => warn!("Connection {}: {}", connection_name, event),
                    }
                }
            })
            .connect(servers.as_slice())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        state.send_replace(ConnectionState::Connected);
        info!("Connection {} opened to {:?}", name, endpoints);

        Ok(Self {
            name,
            client,
            state,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

fn parse_endpoints(endpoints: &[String]) -> Result<Vec<ServerAddr>> {
    if endpoints.is_empty() {
        return Err(TransportError::Connect("no endpoints configured".to_string()));
    }
    endpoints
        .iter()
        .map(|endpoint| {
            endpoint
                .parse::<ServerAddr>()
                .map_err(|e| TransportError::Connect(format!("{}: {}", endpoint, e)))
        })
        .collect()
}

/// Connection state implied by a client event, if any
fn state_for(event: &Event) -> Option<ConnectionState> {
    match event {
        Event::Connected => Some(ConnectionState::Connected),
        Event::Disconnected => Some(ConnectionState::Disconnected),
        _ => None,
    }
}

#[async_trait]
impl Transport for NatsConnection {
    async fn publish(&self, subject: &str, reply_to: Option<&str>, payload: Vec<u8>) -> Result<()> {
        validate_subject(subject)?;
        let published = match reply_to {
            Some(reply_to) => {
                validate_subject(reply_to)?;
                self.client
                    .publish_with_reply(subject.to_string(), reply_to.to_string(), payload.into())
                    .await
            }
            None => self.client.publish(subject.to_string(), payload.into()).await,
        };
        published.map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        trace!(subject = subject, "Published");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription> {
        validate_pattern(subject)?;
        let subscribed = match queue_group {
            Some(group) => {
                self.client
                    .queue_subscribe(subject.to_string(), group.to_string())
                    .await
            }
            None => self.client.subscribe(subject.to_string()).await,
        };
        let mut subscriber = subscribed.map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let pattern = subject.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sender.closed() => {
                        if let Err(e) = subscriber.unsubscribe().await {
                            debug!("Unsubscribe from {} failed: {}", pattern, e);
                        }
                        break;
                    }
                    message = subscriber.next() => match message {
                        Some(message) => {
                            let message = Message {
                                subject: message.subject.to_string(),
                                reply_to: message.reply.map(|reply| reply.to_string()),
                                payload: message.payload.to_vec(),
                            };
                            if sender.send(message).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!("Subscription to {} ended", pattern);
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
