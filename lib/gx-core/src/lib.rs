//! Core types of the gx mesh invocation protocol
//!
//! This library provides:
//! - Deterministic queue addressing for (namespace, service, version) triples
//! - Invocation, response and registration envelopes
//! - Call-path (trace) propagation
//! - Instance configuration and descriptors

pub mod address;
pub mod config;
pub mod envelope;
pub mod error;
pub mod identifier;
pub mod trace;

pub use address::{AddressKey, BROKER_INVOKE_SUBJECT, BROKER_REGISTER_SUBJECT};
pub use config::{ServiceConfig, ServiceDescriptor};
pub use envelope::{InvocationEnvelope, MethodMetadata, RegistrationDescriptor, ResponseEnvelope};
pub use error::{MeshError, Result};
pub use identifier::{ServiceIdentifier, DEFAULT_VERSION};
pub use trace::{TraceContext, TracePath};
