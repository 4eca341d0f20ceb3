//! Wire messages exchanged over the transport

use crate::{AddressKey, ServiceIdentifier, TracePath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A single outbound call.
///
/// `traceid` is the field name spoken on the wire; `traceId` is accepted on
/// input as well.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub namespace: String,
    pub service: String,
    pub version: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(rename = "traceid", alias = "traceId", default)]
    pub trace_id: TracePath,
    /// Target address, precomputed for the broker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressKey>,
}

impl InvocationEnvelope {
    pub fn new(
        target: &ServiceIdentifier,
        method: impl Into<String>,
        args: Vec<Value>,
        trace_id: TracePath,
    ) -> Self {
        Self {
            namespace: target.namespace.clone(),
            service: target.service.clone(),
            version: target.version.clone(),
            method: method.into(),
            args,
            trace_id,
            address: Some(target.address()),
        }
    }

    pub fn target(&self) -> ServiceIdentifier {
        ServiceIdentifier::new(&self.namespace, &self.service, &self.version)
    }

    /// Address named by the envelope's triple, ignoring any precomputed key
    pub fn target_address(&self) -> AddressKey {
        AddressKey::derive(&self.namespace, &self.service, &self.version)
    }
}

/// Reply to an invocation: exactly one of `{"result": ..}` or `{"error": ..}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Result(Value),
    Error(Value),
}

impl ResponseEnvelope {
    pub fn error(value: impl Into<Value>) -> Self {
        ResponseEnvelope::Error(value.into())
    }

    /// Read a decoded reply object leniently.
    ///
    /// `result` wins over `error` and other keys are ignored. An object with
    /// neither key is a result of `null`, which is what a callee serializing an
    /// absent result sends. Anything but an object yields `None`.
    pub fn from_reply(reply: Value) -> Option<Self> {
        let Value::Object(mut fields) = reply else {
            return None;
        };
        if let Some(result) = fields.remove("result") {
            return Some(ResponseEnvelope::Result(result));
        }
        Some(match fields.remove("error") {
            Some(error) => ResponseEnvelope::Error(error),
            None => ResponseEnvelope::Result(Value::Null),
        })
    }
}

/// Per-method metadata announced to the broker
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMetadata {
    #[serde(default)]
    pub params: Vec<String>,
}

/// Discovery heartbeat published on `gx.broker.register`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDescriptor {
    pub namespace: String,
    pub service: String,
    pub version: String,
    #[serde(default)]
    pub methods: BTreeMap<String, MethodMetadata>,
    /// Heartbeat interval in milliseconds; absent from instances that do not
    /// announce it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

impl RegistrationDescriptor {
    pub fn address(&self) -> AddressKey {
        AddressKey::derive(&self.namespace, &self.service, &self.version)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval.as_millis() as u64);
        self
    }

    pub fn announced_interval(&self) -> Option<Duration> {
        self.interval.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_wire_shape() {
        let target = ServiceIdentifier::parse("a.b.c@2.3.1");
        let envelope = InvocationEnvelope::new(
            &target,
            "add",
            vec![json!(2), json!(3)],
            TracePath::from(vec![1, 1]),
        );

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["namespace"], json!("a.b"));
        assert_eq!(wire["service"], json!("c"));
        assert_eq!(wire["version"], json!("2.3.1"));
        assert_eq!(wire["method"], json!("add"));
        assert_eq!(wire["args"], json!([2, 3]));
        assert_eq!(wire["traceid"], json!([1, 1]));
        assert_eq!(wire["address"], json!(target.address().as_str()));
    }

    #[test]
    fn test_invocation_accepts_camel_case_trace() {
        let raw = r#"{"namespace":"","service":"math","version":"1.0.0","method":"add","args":[1],"traceId":[3,1]}"#;
        let envelope: InvocationEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.trace_id, TracePath::from(vec![3, 1]));
        assert_eq!(envelope.address, None);
        assert_eq!(envelope.target_address(), AddressKey::derive("", "math", "1.0.0"));
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = ResponseEnvelope::Result(json!(5));
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"result":5}"#);

        let err = ResponseEnvelope::error("callee:unknown_method");
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":"callee:unknown_method"}"#
        );
    }

    #[test]
    fn test_reply_decoding_is_lenient() {
        assert_eq!(
            ResponseEnvelope::from_reply(json!({"result": 5, "extra": true})),
            Some(ResponseEnvelope::Result(json!(5)))
        );
        assert_eq!(
            ResponseEnvelope::from_reply(json!({"result": 1, "error": "ignored"})),
            Some(ResponseEnvelope::Result(json!(1)))
        );
        assert_eq!(
            ResponseEnvelope::from_reply(json!({"error": {"code": 42}})),
            Some(ResponseEnvelope::Error(json!({"code": 42})))
        );
        assert_eq!(
            ResponseEnvelope::from_reply(json!({})),
            Some(ResponseEnvelope::Result(Value::Null))
        );
        assert_eq!(ResponseEnvelope::from_reply(json!([1, 2])), None);
    }

    #[test]
    fn test_response_decodes_null_result() {
        let decoded: ResponseEnvelope = serde_json::from_str(r#"{"result":null}"#).unwrap();
        assert_eq!(decoded, ResponseEnvelope::Result(Value::Null));
    }

    #[test]
    fn test_registration_wire_shape() {
        let mut methods = BTreeMap::new();
        methods.insert("add".to_string(), MethodMetadata::default());
        let descriptor = RegistrationDescriptor {
            namespace: "".to_string(),
            service: "math".to_string(),
            version: "1.0.0".to_string(),
            methods,
            interval: None,
        };

        assert_eq!(
            serde_json::to_value(&descriptor).unwrap(),
            json!({"namespace": "", "service": "math", "version": "1.0.0", "methods": {"add": {"params": []}}})
        );

        let announced = descriptor.with_interval(Duration::from_millis(400));
        assert_eq!(serde_json::to_value(&announced).unwrap()["interval"], json!(400));
        assert_eq!(announced.announced_interval(), Some(Duration::from_millis(400)));
    }
}
