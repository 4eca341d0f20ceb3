//! Client side of remote services

use crate::client::RpcClient;
use gx_core::{AddressKey, InvocationEnvelope, Result, ServiceIdentifier, TraceContext};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Handle on a remote (namespace, service, version).
///
/// Any method name can be called through [`RemoteService::call`]; each call
/// becomes one request to the broker, stamped with a fresh child path of the
/// frame the proxy was obtained from.
#[derive(Clone)]
pub struct RemoteService {
    target: ServiceIdentifier,
    address: AddressKey,
    client: Arc<RpcClient>,
    trace: Arc<TraceContext>,
}

impl RemoteService {
    pub fn new(identifier: &str, client: Arc<RpcClient>, trace: Arc<TraceContext>) -> Self {
        let target = ServiceIdentifier::parse(identifier);
        let address = target.address();
        debug!("Remote proxy for {} ({})", target, address);

        Self {
            target,
            address,
            client,
            trace,
        }
    }

    pub fn target(&self) -> &ServiceIdentifier {
        &self.target
    }

    pub fn address(&self) -> &AddressKey {
        &self.address
    }

    /// Invoke `method` with positional `args`.
    ///
    /// Fails with [`gx_core::MeshError::RequestTimeout`] when no reply comes in
    /// time and with [`gx_core::MeshError::Remote`] carrying the callee's error
    /// value untouched. Nothing is retried.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let trace_id = self.trace.child_path();
        debug!(
            service = %self.target,
            method = method,
            trace = %trace_id,
            "Remote call"
        );

        let envelope = InvocationEnvelope::new(&self.target, method, args, trace_id);
        self.client.request(&envelope).await
    }

    /// [`RemoteService::call`] with the result decoded into `T`
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self.call(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }
}
