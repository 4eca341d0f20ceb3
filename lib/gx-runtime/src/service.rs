//! Service instance lifecycle

use crate::announcer::{ReadyHook, RegistrationAnnouncer};
use crate::client::RpcClient;
use crate::context::{CallContext, MeshContext};
use crate::dispatcher::InvocationDispatcher;
use crate::handler::{Args, HandlerError, MethodRegistry};
use crate::proxy::RemoteService;
use crate::transport_error;
use futures::FutureExt;
use gx_core::{AddressKey, Result, ServiceConfig, ServiceDescriptor, TraceContext, TracePath};
use gx_transport::{NatsConnection, Transport};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// A service definition: configuration, exposed methods and an optional
/// ready hook. Nothing touches the transport until [`Service::start`].
pub struct Service {
    config: ServiceConfig,
    methods: MethodRegistry,
    ready: Option<ReadyHook>,
}

/// A running instance
pub struct ServiceHandle {
    mesh: MeshContext,
    trace: Arc<TraceContext>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            methods: MethodRegistry::new(),
            ready: None,
        }
    }

    /// Expose `handler` as `name`
    pub fn method<F, Fut, T>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, HandlerError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        self.methods.insert(name, handler);
        self
    }

    /// Replace the whole method table
    pub fn methods(mut self, methods: MethodRegistry) -> Self {
        self.methods = methods;
        self
    }

    /// Run `hook` once, the first time the transport is connected
    pub fn on_ready<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ready = Some(Box::new(move |ctx: CallContext| hook(ctx).boxed()));
        self
    }

    /// Start on an existing transport connection
    pub async fn start(self, transport: Arc<dyn Transport>) -> Result<ServiceHandle> {
        let descriptor = ServiceDescriptor::new(self.config.clone())?;
        self.launch(Arc::new(descriptor), transport).await
    }

    /// Connect to the configured NATS endpoints under the instance's
    /// connection name, then start
    pub async fn connect(self) -> Result<ServiceHandle> {
        let descriptor = ServiceDescriptor::new(self.config.clone())?;
        let transport =
            NatsConnection::connect(&descriptor.transport_endpoints, descriptor.connection_name())
                .await
                .map_err(transport_error)?;
        self.launch(Arc::new(descriptor), Arc::new(transport)).await
    }

    async fn launch(self, descriptor: Arc<ServiceDescriptor>, transport: Arc<dyn Transport>) -> Result<ServiceHandle> {
        let client = Arc::new(RpcClient::new(
            transport.clone(),
            &descriptor.instance_id,
            descriptor.call_timeout,
        ));

        let inbox = transport
            .subscribe(&client.inbox_pattern(), None)
            .await
            .map_err(transport_error)?;
        let invocations = transport
            .subscribe(
                &descriptor.address.invoke_subject(),
                Some(descriptor.address.queue_group()),
            )
            .await
            .map_err(transport_error)?;

        let mesh = MeshContext::new(descriptor.clone(), transport.clone(), client.clone());
        let trace = Arc::new(TraceContext::root());
        let registration = self.methods.registration(&descriptor.identifier);
        let dispatcher = Arc::new(InvocationDispatcher::new(mesh.clone(), Arc::new(self.methods)));

        let mut announcer =
            RegistrationAnnouncer::new(transport.clone(), registration, descriptor.register_interval);
        if let Some(hook) = self.ready {
            announcer = announcer.with_ready_hook(hook, CallContext::idle(mesh.clone(), trace.clone()));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(client.run(inbox, shutdown_rx.clone())),
            tokio::spawn(dispatcher.run(invocations, shutdown_rx.clone())),
            tokio::spawn(announcer.run(shutdown_rx)),
        ];

        info!(
            service = %descriptor.identifier,
            address = %descriptor.address,
            instance = %descriptor.instance_id,
            transport = transport.name(),
            "Service started"
        );

        Ok(ServiceHandle {
            mesh,
            trace,
            shutdown,
            tasks,
        })
    }
}

impl ServiceHandle {
    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.mesh.descriptor()
    }

    pub fn address(&self) -> &AddressKey {
        &self.mesh.descriptor().address
    }

    /// Proxy for calls made outside any invocation
    pub fn remote(&self, identifier: &str) -> RemoteService {
        self.mesh.remote(identifier, self.trace.clone())
    }

    /// Current path of the instance's idle frame
    pub fn trace_path(&self) -> TracePath {
        self.trace.current()
    }

    pub fn context(&self) -> CallContext {
        CallContext::idle(self.mesh.clone(), self.trace.clone())
    }

    /// Stop listening and announcing; in-flight calls see a closed client
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!(service = %self.mesh.descriptor().identifier, "Service stopped");
    }
}
