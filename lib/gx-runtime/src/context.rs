//! Explicit instance and invocation contexts

use crate::client::RpcClient;
use crate::proxy::RemoteService;
use gx_core::{ServiceDescriptor, TraceContext, TracePath};
use gx_transport::Transport;
use std::sync::Arc;

/// Everything a running instance shares between its components.
///
/// Built once by [`crate::Service::start`] and handed to the announcer, the
/// dispatcher and every proxy; there is no process-wide state.
#[derive(Clone)]
pub struct MeshContext {
    descriptor: Arc<ServiceDescriptor>,
    transport: Arc<dyn Transport>,
    client: Arc<RpcClient>,
}

impl MeshContext {
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        transport: Arc<dyn Transport>,
        client: Arc<RpcClient>,
    ) -> Self {
        Self {
            descriptor,
            transport,
            client,
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Proxy for `identifier` whose calls derive their paths from `trace`
    pub fn remote(&self, identifier: &str, trace: Arc<TraceContext>) -> RemoteService {
        RemoteService::new(identifier, self.client.clone(), trace)
    }
}

/// Context handed to a handler for the duration of one invocation.
///
/// Its trace frame starts at the caller's path, so remote calls made from the
/// handler nest under the call that triggered it.
#[derive(Clone)]
pub struct CallContext {
    mesh: MeshContext,
    trace: Arc<TraceContext>,
    method: Option<String>,
}

impl CallContext {
    /// Context for handling `method` on behalf of a caller at `trace_id`
    pub fn invocation(mesh: MeshContext, trace_id: TracePath, method: impl Into<String>) -> Self {
        Self {
            mesh,
            trace: Arc::new(TraceContext::new(trace_id)),
            method: Some(method.into()),
        }
    }

    /// Context sharing the instance's own idle frame
    pub fn idle(mesh: MeshContext, trace: Arc<TraceContext>) -> Self {
        Self {
            mesh,
            trace,
            method: None,
        }
    }

    pub fn remote(&self, identifier: &str) -> RemoteService {
        self.mesh.remote(identifier, self.trace.clone())
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.mesh.descriptor()
    }

    /// Method being executed, `None` outside an invocation
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Current path of this frame
    pub fn trace_path(&self) -> TracePath {
        self.trace.current()
    }
}
