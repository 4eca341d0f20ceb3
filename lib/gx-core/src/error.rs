use serde_json::Value;
use thiserror::Error;

/// Wire value replied when an envelope names a method the callee does not expose
pub const UNKNOWN_METHOD: &str = "callee:unknown_method";
/// Wire value a caller rejects with when no reply arrives in time
pub const REQUEST_TIMEOUT: &str = "caller:request_timeout";
/// Wire value replied when a handler panics
pub const HANDLER_FAULT: &str = "callee:handler_fault";
/// Wire value replied when a handler cannot read its positional arguments
pub const INVALID_ARGUMENTS: &str = "callee:invalid_arguments";
/// Wire value replied when an inbound payload is not an invocation envelope
pub const MALFORMED_ENVELOPE: &str = "callee:malformed_envelope";
/// Error a caller observes when a reply cannot be decoded
pub const MALFORMED_REPLY: &str = "caller:malformed_reply";
/// Wire value the development broker replies when no live instance is known
pub const SERVICE_UNAVAILABLE: &str = "broker:service_unavailable";

pub type Result<T> = std::result::Result<T, MeshError>;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("callee does not expose method: {0}")]
    UnknownMethod(String),

    #[error("no reply within {0} ms")]
    RequestTimeout(u64),

    #[error("remote error: {0}")]
    Remote(Value),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("invalid service configuration: {0}")]
    InvalidConfiguration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// The opaque value a caller observes for this error.
    ///
    /// Remote errors pass through untouched; timeouts and unknown methods map to
    /// their wire strings so that nested calls forward what they received.
    pub fn to_wire(&self) -> Value {
        match self {
            MeshError::UnknownMethod(_) => Value::from(UNKNOWN_METHOD),
            MeshError::RequestTimeout(_) => Value::from(REQUEST_TIMEOUT),
            MeshError::Remote(value) => value.clone(),
            other => Value::from(other.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MeshError::RequestTimeout(_))
    }
}
