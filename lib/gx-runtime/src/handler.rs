//! Static method registry and handler plumbing

use crate::context::CallContext;
use futures::future::BoxFuture;
use futures::FutureExt;
use gx_core::error::INVALID_ARGUMENTS;
use gx_core::{MeshError, MethodMetadata, RegistrationDescriptor, ServiceIdentifier};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Methods whose name starts with this marker are never exposed
pub const PRIVATE_PREFIX: char = '$';

pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;
pub type Handler = Arc<dyn Fn(CallContext, Args) -> HandlerFuture + Send + Sync>;

static NULL: Value = Value::Null;

/// Failure reported by a handler; becomes the `error` of the reply
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    #[error("handler error: {0}")]
    Reply(Value),
}

impl HandlerError {
    /// Reply with an arbitrary opaque error value
    pub fn reply(value: impl Into<Value>) -> Self {
        HandlerError::Reply(value.into())
    }

    pub fn to_wire(&self) -> Value {
        match self {
            HandlerError::InvalidArgument { .. } => Value::from(INVALID_ARGUMENTS),
            HandlerError::Reply(value) => value.clone(),
        }
    }
}

/// Errors of nested remote calls surface to our caller unchanged
impl From<MeshError> for HandlerError {
    fn from(err: MeshError) -> Self {
        HandlerError::Reply(err.to_wire())
    }
}

/// Positional arguments of an invocation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Raw argument; missing arguments read as `null`
    pub fn value(&self, index: usize) -> &Value {
        self.0.get(index).unwrap_or(&NULL)
    }

    /// Typed argument
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        T::deserialize(self.value(index)).map_err(|e| HandlerError::InvalidArgument {
            index,
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Name → handler table, assembled once before the service starts
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: BTreeMap<String, Handler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MethodRegistry::insert`]
    pub fn method<F, Fut, T>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        self.insert(name, handler);
        self
    }

    /// Register `handler` under `name`, replacing any previous handler.
    ///
    /// The handler's result is normalized to JSON before it is replied. Names
    /// carrying the private prefix are not exposed and are ignored.
    pub fn insert<F, Fut, T>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let name = name.into();
        if name.starts_with(PRIVATE_PREFIX) {
            warn!("Method {} is private and will not be exposed", name);
            return;
        }

        let boxed: Handler = Arc::new(move |ctx: CallContext, args: Args| -> HandlerFuture {
            let fut = handler(ctx, args);
            async move {
                let value = fut.await?;
                serde_json::to_value(value).map_err(|e| {
                    HandlerError::Reply(Value::from(format!("callee:unserializable_result: {}", e)))
                })
            }
            .boxed()
        });
        self.methods.insert(name, boxed);
    }

    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Exposed method names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Discovery heartbeat describing every exposed method
    pub fn registration(&self, identifier: &ServiceIdentifier) -> RegistrationDescriptor {
        RegistrationDescriptor {
            namespace: identifier.namespace.clone(),
            service: identifier.service.clone(),
            version: identifier.version.clone(),
            methods: self
                .names()
                .map(|name| (name.to_string(), MethodMetadata::default()))
                .collect(),
            interval: None,
        }
    }
}
