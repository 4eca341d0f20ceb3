//! Deterministic queue addressing

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Subject every instance publishes its registration heartbeat to
pub const BROKER_REGISTER_SUBJECT: &str = "gx.broker.register";
/// Subject outbound invocations are sent to for routing
pub const BROKER_INVOKE_SUBJECT: &str = "gx.broker.invoke";

/// Content hash identifying a (namespace, service, version) triple.
///
/// The key doubles as the routing subject suffix and the queue group name, so
/// every instance of the same triple competes in one group. The hash input and
/// algorithm are part of the wire contract.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressKey(String);

impl AddressKey {
    /// Hex SHA-256 of `namespace.service@version`
    pub fn derive(namespace: &str, service: &str, version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}.{}@{}", namespace, service, version).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Subject the instances behind this key listen on
    pub fn invoke_subject(&self) -> String {
        format!("gx.{}.invoke", self.0)
    }

    /// Queue group name shared by all instances behind this key
    pub fn queue_group(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
