//! Per-instance runtime of a gx mesh service
//!
//! This library provides:
//! - Service lifecycle: subscriptions, heartbeats and the ready hook
//! - Inbound dispatch of invocation envelopes to registered handlers
//! - Remote service proxies with request/reply correlation and timeouts
//! - An in-process development broker with heartbeat-based eviction

pub mod announcer;
pub mod broker;
pub mod client;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod liveness;
pub mod proxy;
pub mod registry;
pub mod service;

pub use announcer::{ReadyHook, RegistrationAnnouncer};
pub use broker::{Broker, BrokerHandle};
pub use client::RpcClient;
pub use context::{CallContext, MeshContext};
pub use dispatcher::InvocationDispatcher;
pub use handler::{Args, HandlerError, MethodRegistry};
pub use liveness::LivenessConfig;
pub use proxy::RemoteService;
pub use registry::{ServiceInfo, ServiceRegistry};
pub use service::{Service, ServiceHandle};

use gx_core::MeshError;
use gx_transport::TransportError;

pub(crate) fn transport_error(err: TransportError) -> MeshError {
    MeshError::Transport(err.to_string())
}
