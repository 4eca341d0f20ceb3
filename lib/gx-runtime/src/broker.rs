//! In-process broker for local development and tests
//!
//! Production deployments run the broker as its own process; this one speaks
//! the same subjects so a whole mesh can run inside one binary. It tracks
//! heartbeats in a [`ServiceRegistry`], evicts services whose heartbeats stop,
//! and forwards invocations to the target's address with the caller's reply
//! subject untouched, so the callee's single reply goes straight back.

use crate::liveness::LivenessConfig;
use crate::registry::ServiceRegistry;
use crate::transport_error;
use chrono::Utc;
use gx_core::error::{MALFORMED_ENVELOPE, SERVICE_UNAVAILABLE};
use gx_core::{
    InvocationEnvelope, RegistrationDescriptor, ResponseEnvelope, Result, BROKER_INVOKE_SUBJECT,
    BROKER_REGISTER_SUBJECT,
};
use gx_transport::{Message, Subscription, Transport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Queue group shared by broker replicas for invocations
pub const BROKER_QUEUE_GROUP: &str = "gx.broker";

pub struct Broker {
    transport: Arc<dyn Transport>,
    registry: Arc<ServiceRegistry>,
    liveness: LivenessConfig,
}

/// Running broker; dropping it leaves the tasks running until the transport
/// closes, [`BrokerHandle::shutdown`] stops them.
pub struct BrokerHandle {
    registry: Arc<ServiceRegistry>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Broker {
    pub fn new(transport: Arc<dyn Transport>, liveness: LivenessConfig) -> Self {
        Self {
            transport,
            registry: Arc::new(ServiceRegistry::new()),
            liveness,
        }
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub async fn start(self) -> Result<BrokerHandle> {
        let heartbeats = self
            .transport
            .subscribe(BROKER_REGISTER_SUBJECT, None)
            .await
            .map_err(transport_error)?;
        let invocations = self
            .transport
            .subscribe(BROKER_INVOKE_SUBJECT, Some(BROKER_QUEUE_GROUP))
            .await
            .map_err(transport_error)?;

        let broker = Arc::new(self);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(broker.clone().consume_heartbeats(heartbeats, shutdown_rx.clone())),
            tokio::spawn(broker.clone().consume_invocations(invocations, shutdown_rx.clone())),
            tokio::spawn(broker.clone().sweep(shutdown_rx)),
        ];

        info!(
            "Broker started (evicting after {} missed heartbeats, {:?} when the interval is unknown)",
            broker.liveness.missed_heartbeats,
            broker.liveness.max_silence()
        );

        Ok(BrokerHandle {
            registry: broker.registry.clone(),
            shutdown,
            tasks,
        })
    }

    async fn consume_heartbeats(self: Arc<Self>, mut heartbeats: Subscription, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = heartbeats.next() => match message {
                    Some(message) => self.record(message).await,
                    None => break,
                },
            }
        }
    }

    async fn consume_invocations(self: Arc<Self>, mut invocations: Subscription, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = invocations.next() => match message {
                    Some(message) => self.route(message).await,
                    None => break,
                },
            }
        }
    }

    async fn sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.liveness.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    for evicted in self.registry.evict_stale(Utc::now(), &self.liveness).await {
                        info!(
                            "Evicted {} after {} heartbeats, last seen {}",
                            evicted.identifier, evicted.heartbeats, evicted.last_seen
                        );
                    }
                }
            }
        }
    }

    async fn record(&self, message: Message) {
        match serde_json::from_slice::<RegistrationDescriptor>(&message.payload) {
            Ok(registration) => {
                self.registry.record_heartbeat(registration, Utc::now()).await;
            }
            Err(e) => warn!("Malformed registration: {}", e),
        }
    }

    /// Forward one invocation to the instances behind its address
    async fn route(&self, message: Message) {
        let envelope = match serde_json::from_slice::<InvocationEnvelope>(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Malformed invocation: {}", e);
                self.reply(message.reply_to.as_deref(), ResponseEnvelope::error(MALFORMED_ENVELOPE))
                    .await;
                return;
            }
        };

        let address = envelope.target_address();
        if let Some(claimed) = &envelope.address {
            if *claimed != address {
                warn!(
                    "Envelope for {} claims address {}; routing to {}",
                    envelope.target(),
                    claimed,
                    address
                );
            }
        }

        let service = match self.registry.get_service(&address).await {
            Ok(service) => service,
            Err(e) => {
                debug!("No live instance: {}", e);
                self.reply(message.reply_to.as_deref(), ResponseEnvelope::error(SERVICE_UNAVAILABLE))
                    .await;
                return;
            }
        };
        if !service.methods.contains_key(&envelope.method) {
            debug!("{} does not announce {}; forwarding anyway", service.identifier, envelope.method);
        }

        debug!(
            service = %envelope.target(),
            method = %envelope.method,
            trace = %envelope.trace_id,
            "Forwarding"
        );
        if let Err(e) = self
            .transport
            .publish(&address.invoke_subject(), message.reply_to.as_deref(), message.payload)
            .await
        {
            warn!("Failed to forward to {}: {}", address, e);
        }
    }

    async fn reply(&self, reply_to: Option<&str>, response: ResponseEnvelope) {
        let Some(reply_to) = reply_to else {
            return;
        };
        match serde_json::to_vec(&response) {
            Ok(payload) => {
                if let Err(e) = self.transport.publish(reply_to, None, payload).await {
                    warn!("Failed to reply on {}: {}", reply_to, e);
                }
            }
            Err(e) => warn!("Failed to encode reply: {}", e),
        }
    }
}

impl BrokerHandle {
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Broker stopped");
    }
}
