//! Inbound invocation handling

use crate::context::{CallContext, MeshContext};
use crate::handler::{Args, MethodRegistry};
use futures::FutureExt;
use gx_core::error::{HANDLER_FAULT, MALFORMED_ENVELOPE, UNKNOWN_METHOD};
use gx_core::{InvocationEnvelope, ResponseEnvelope};
use gx_transport::{Message, Subscription};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Executes inbound envelopes against the local method table and replies.
///
/// Every message is handled on its own task, so a slow handler never holds up
/// the next invocation.
pub struct InvocationDispatcher {
    mesh: MeshContext,
    methods: Arc<MethodRegistry>,
}

impl InvocationDispatcher {
    pub fn new(mesh: MeshContext, methods: Arc<MethodRegistry>) -> Self {
        Self { mesh, methods }
    }

    /// Look up and execute one envelope, producing its reply.
    ///
    /// Unknown methods reply `callee:unknown_method`; a panicking handler is
    /// contained and replies `callee:handler_fault`.
    pub async fn dispatch(&self, envelope: InvocationEnvelope) -> ResponseEnvelope {
        let Some(handler) = self.methods.get(&envelope.method).cloned() else {
            debug!(method = %envelope.method, "Unknown method");
            return ResponseEnvelope::error(UNKNOWN_METHOD);
        };

        debug!(
            method = %envelope.method,
            trace = %envelope.trace_id,
            "Invoking"
        );

        let ctx = CallContext::invocation(self.mesh.clone(), envelope.trace_id, envelope.method.clone());
        let args = Args::from(envelope.args);
        let execution = async move { handler(ctx, args).await };

        match AssertUnwindSafe(execution).catch_unwind().await {
            Ok(Ok(value)) => ResponseEnvelope::Result(value),
            Ok(Err(e)) => {
                debug!(method = %envelope.method, "Handler failed: {}", e);
                ResponseEnvelope::Error(e.to_wire())
            }
            Err(_) => {
                error!(method = %envelope.method, "Handler panicked");
                ResponseEnvelope::error(HANDLER_FAULT)
            }
        }
    }

    /// Decode a raw payload and dispatch it
    pub async fn handle_payload(&self, payload: &[u8]) -> ResponseEnvelope {
        match serde_json::from_slice::<InvocationEnvelope>(payload) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => {
                warn!("Malformed invocation: {}", e);
                ResponseEnvelope::error(MALFORMED_ENVELOPE)
            }
        }
    }

    async fn handle_message(&self, message: Message) {
        let response = self.handle_payload(&message.payload).await;

        let Some(reply_to) = message.reply_to else {
            debug!("Invocation on {} has no reply subject", message.subject);
            return;
        };

        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode reply: {}", e);
                return;
            }
        };

        if let Err(e) = self.mesh.transport().publish(&reply_to, None, payload).await {
            warn!("Failed to reply on {}: {}", reply_to, e);
        }
    }

    /// Consume the invoke subscription until shutdown
    pub async fn run(self: Arc<Self>, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        debug!(
            subject = subscription.subject(),
            queue_group = ?subscription.queue_group(),
            "Dispatcher listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = subscription.next() => match message {
                    Some(message) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move { dispatcher.handle_message(message).await });
                    }
                    None => break,
                },
            }
        }

        debug!("Dispatcher on {} stopped", subscription.subject());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::handler::HandlerError;
    use gx_core::{ServiceConfig, ServiceDescriptor, ServiceIdentifier, TracePath};
    use gx_transport::{InMemoryBus, Transport};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn dispatcher(methods: MethodRegistry) -> InvocationDispatcher {
        let bus = InMemoryBus::new();
        let transport: Arc<dyn Transport> = Arc::new(bus.connect("math"));
        let descriptor = Arc::new(ServiceDescriptor::new(ServiceConfig::new("math")).unwrap());
        let client = Arc::new(RpcClient::new(transport.clone(), &descriptor.instance_id, Duration::from_secs(1)));
        InvocationDispatcher::new(MeshContext::new(descriptor, transport, client), Arc::new(methods))
    }

    fn envelope(method: &str, args: Vec<Value>) -> InvocationEnvelope {
        InvocationEnvelope::new(
            &ServiceIdentifier::parse("math"),
            method,
            args,
            TracePath::from(vec![4, 1]),
        )
    }

    fn math() -> MethodRegistry {
        MethodRegistry::new()
            .method("add", |_ctx, args: Args| async move {
                Ok::<_, HandlerError>(args.get::<i64>(0)? + args.get::<i64>(1)?)
            })
            .method("trace", |ctx: CallContext, _args| async move {
                Ok::<_, HandlerError>(ctx.trace_path())
            })
            .method("fail", |_ctx, _args| async move {
                Err::<Value, _>(HandlerError::reply(json!({"reason": "bad input"})))
            })
            .method("explode", |_ctx, _args| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, HandlerError>(0)
            })
    }

    #[tokio::test]
    async fn test_happy_path() {
        let response = dispatcher(math()).dispatch(envelope("add", vec![json!(2), json!(3)])).await;
        assert_eq!(response, ResponseEnvelope::Result(json!(5)));
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"result":5}"#);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = dispatcher(math()).dispatch(envelope("doesNotExist", vec![])).await;
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"error":"callee:unknown_method"}"#
        );
    }

    #[tokio::test]
    async fn test_handler_runs_in_caller_trace() {
        let response = dispatcher(math()).dispatch(envelope("trace", vec![])).await;
        assert_eq!(response, ResponseEnvelope::Result(json!([4, 1])));
    }

    #[tokio::test]
    async fn test_handler_error_is_replied() {
        let response = dispatcher(math()).dispatch(envelope("fail", vec![])).await;
        assert_eq!(response, ResponseEnvelope::Error(json!({"reason": "bad input"})));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let response = dispatcher(math())
            .dispatch(envelope("add", vec![json!("two"), json!(3)]))
            .await;
        assert_eq!(response, ResponseEnvelope::error("callee:invalid_arguments"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let dispatcher = dispatcher(math());
        let response = dispatcher.dispatch(envelope("explode", vec![])).await;
        assert_eq!(response, ResponseEnvelope::error(HANDLER_FAULT));

        // The dispatcher keeps serving
        let response = dispatcher.dispatch(envelope("add", vec![json!(1), json!(1)])).await;
        assert_eq!(response, ResponseEnvelope::Result(json!(2)));
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let response = dispatcher(math()).handle_payload(b"{\"method\":").await;
        assert_eq!(response, ResponseEnvelope::error(MALFORMED_ENVELOPE));
    }
}
