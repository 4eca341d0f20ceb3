//! Publish/subscribe transport for gx mesh instances
//!
//! This library provides:
//! - The `Transport` trait the runtime is written against
//! - Subject validation and wildcard matching
//! - Queue-group member selection
//! - A NATS client transport and an in-process bus for development and tests

pub mod balancer;
pub mod memory;
pub mod nats;
pub mod subject;
pub mod transport;

pub use memory::{InMemoryBus, MemoryConnection};
pub use nats::NatsConnection;
pub use transport::{ConnectionState, Message, Result, Subscription, Transport, TransportError};
