//! Periodic discovery heartbeat

use crate::context::CallContext;
use futures::future::BoxFuture;
use gx_core::{RegistrationDescriptor, BROKER_REGISTER_SUBJECT};
use gx_transport::{ConnectionState, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Hook run once, the first time the transport reports a connection
pub type ReadyHook = Box<dyn FnOnce(CallContext) -> BoxFuture<'static, ()> + Send>;

/// Publishes the registration descriptor on `gx.broker.register` every
/// interval while connected.
///
/// There is no deregistration message: the broker infers that an instance is
/// gone once its heartbeats stop, judged against the interval announced in
/// each heartbeat. A ready hook still running when the announcer stops is
/// aborted.
pub struct RegistrationAnnouncer {
    transport: Arc<dyn Transport>,
    registration: RegistrationDescriptor,
    interval: Duration,
    ready: Option<(ReadyHook, CallContext)>,
}

impl RegistrationAnnouncer {
    pub fn new(
        transport: Arc<dyn Transport>,
        registration: RegistrationDescriptor,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            registration: registration.with_interval(interval),
            interval,
            ready: None,
        }
    }

    /// Run `hook` with `ctx` on the first connection
    pub fn with_ready_hook(mut self, hook: ReadyHook, ctx: CallContext) -> Self {
        self.ready = Some((hook, ctx));
        self
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let payload = match serde_json::to_vec(&self.registration) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode registration: {}", e);
                return;
            }
        };

        let mut connection = self.transport.connection();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ready_task: Option<JoinHandle<()>> = None;

        loop {
            let state = *connection.borrow_and_update();
            match state {
                ConnectionState::Closed => break,
                ConnectionState::Connected => {}
                ConnectionState::Connecting | ConnectionState::Disconnected => {
                    debug!("Waiting for transport before announcing");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        changed = connection.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                }
            }

            if let Some((hook, ctx)) = self.ready.take() {
                info!("{}:instance:ready", self.registration.service);
                ready_task = Some(tokio::spawn(hook(ctx)));
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self
                        .transport
                        .publish(BROKER_REGISTER_SUBJECT, None, payload.clone())
                        .await
                    {
                        warn!("Failed to publish registration: {}", e);
                    }
                }
            }
        }

        if let Some(task) = ready_task {
            if !task.is_finished() {
                debug!("Aborting unfinished ready hook of {}", self.registration.service);
                task.abort();
            }
            let _ = task.await;
        }

        debug!("Announcer for {} stopped", self.registration.service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::context::MeshContext;
    use futures::FutureExt;
    use gx_core::{MethodMetadata, ServiceConfig, ServiceDescriptor, TraceContext};
    use gx_transport::{InMemoryBus, MemoryConnection, Subscription};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn registration() -> RegistrationDescriptor {
        let mut methods = BTreeMap::new();
        methods.insert("add".to_string(), MethodMetadata::default());
        methods.insert("multiply".to_string(), MethodMetadata::default());
        RegistrationDescriptor {
            namespace: "tools".to_string(),
            service: "math".to_string(),
            version: "1.0.0".to_string(),
            methods,
            interval: None,
        }
    }

    fn idle_context(transport: Arc<dyn Transport>) -> CallContext {
        let descriptor = Arc::new(ServiceDescriptor::new(ServiceConfig::new("math")).unwrap());
        let client = Arc::new(RpcClient::new(transport.clone(), &descriptor.instance_id, Duration::from_secs(1)));
        CallContext::idle(MeshContext::new(descriptor, transport, client), Arc::new(TraceContext::root()))
    }

    async fn drain(sub: &mut Subscription) -> Vec<RegistrationDescriptor> {
        let mut seen = Vec::new();
        while let Ok(Some(message)) = time::timeout(Duration::from_millis(1), sub.next()).await {
            seen.push(serde_json::from_slice(&message.payload).unwrap());
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence() {
        let bus = InMemoryBus::new();
        let observer = bus.connect("broker");
        let mut sub = observer.subscribe(BROKER_REGISTER_SUBJECT, None).await.unwrap();
        let transport: Arc<dyn Transport> = Arc::new(bus.connect("math"));

        let interval = Duration::from_millis(100);
        let announcer = RegistrationAnnouncer::new(transport, registration(), interval);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(announcer.run(shutdown_rx));

        let window = Duration::from_millis(1000);
        time::sleep(window).await;
        shutdown.send(true).unwrap();
        task.await.unwrap();

        let seen = drain(&mut sub).await;
        let expected = (window.as_millis() / interval.as_millis()) as usize;
        assert!(seen.len() >= expected, "only {} heartbeats", seen.len());
        assert!(seen.iter().all(|r| *r == registration().with_interval(interval)));
        assert!(seen.iter().all(|r| r.interval == Some(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_hook_runs_once_across_reconnects() {
        let bus = InMemoryBus::new();
        let connection = Arc::new(bus.connect("math"));
        let transport: Arc<dyn Transport> = connection.clone();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let hook: ReadyHook = Box::new(move |_ctx: CallContext| {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        let announcer = RegistrationAnnouncer::new(transport.clone(), registration(), Duration::from_millis(50))
            .with_ready_hook(hook, idle_context(transport));
        let (_shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(announcer.run(shutdown_rx));

        time::sleep(Duration::from_millis(120)).await;
        for _ in 0..3 {
            connection.disconnect();
            time::sleep(Duration::from_millis(60)).await;
            connection.reconnect();
            time::sleep(Duration::from_millis(60)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeats_while_disconnected() {
        let bus = InMemoryBus::new();
        let observer = bus.connect("broker");
        let mut sub = observer.subscribe(BROKER_REGISTER_SUBJECT, None).await.unwrap();
        let connection: Arc<MemoryConnection> = Arc::new(bus.connect("math"));
        connection.disconnect();

        let announcer =
            RegistrationAnnouncer::new(connection.clone(), registration(), Duration::from_millis(50));
        let (_shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(announcer.run(shutdown_rx));

        time::sleep(Duration::from_millis(300)).await;
        assert!(drain(&mut sub).await.is_empty());

        connection.reconnect();
        time::sleep(Duration::from_millis(300)).await;
        assert!(!drain(&mut sub).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_transport_closes() {
        let bus = InMemoryBus::new();
        let connection = Arc::new(bus.connect("math"));
        let announcer =
            RegistrationAnnouncer::new(connection.clone(), registration(), Duration::from_millis(50));
        let (_shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(announcer.run(shutdown_rx));

        time::sleep(Duration::from_millis(100)).await;
        connection.close();
        time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfinished_ready_hook_is_aborted_on_shutdown() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let bus = InMemoryBus::new();
        let transport: Arc<dyn Transport> = Arc::new(bus.connect("math"));
        let dropped = Arc::new(AtomicBool::new(false));

        let flag = DropFlag(dropped.clone());
        let hook: ReadyHook = Box::new(move |_ctx: CallContext| {
            async move {
                let _flag = flag;
                std::future::pending::<()>().await;
            }
            .boxed()
        });

        let announcer = RegistrationAnnouncer::new(transport.clone(), registration(), Duration::from_millis(50))
            .with_ready_hook(hook, idle_context(transport));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(announcer.run(shutdown_rx));

        time::sleep(Duration::from_millis(100)).await;
        assert!(!dropped.load(Ordering::SeqCst));

        shutdown.send(true).unwrap();
        task.await.unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }
}
