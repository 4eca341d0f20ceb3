use gx_core::error::{SERVICE_UNAVAILABLE, UNKNOWN_METHOD};
use gx_core::{MeshError, ServiceConfig, TracePath};
use gx_runtime::{Args, Broker, BrokerHandle, CallContext, HandlerError, LivenessConfig, Service, ServiceHandle};
use gx_transport::{InMemoryBus, Transport};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

const INTERVAL: Duration = Duration::from_millis(100);

fn config(service: &str) -> ServiceConfig {
    ServiceConfig::new(service)
        .with_namespace("tools")
        .with_register_interval(INTERVAL)
        .with_call_timeout(Duration::from_secs(2))
}

fn connect(bus: &InMemoryBus, name: &str) -> Arc<dyn Transport> {
    Arc::new(bus.connect(name))
}

async fn start_broker(bus: &InMemoryBus, liveness: LivenessConfig) -> BrokerHandle {
    Broker::new(connect(bus, "broker"), liveness).start().await.unwrap()
}

fn math() -> Service {
    Service::new(config("math"))
        .method("add", |_ctx, args: Args| async move {
            Ok::<_, HandlerError>(args.get::<i64>(0)? + args.get::<i64>(1)?)
        })
        .method("multiply", |_ctx, args: Args| async move {
            Ok::<_, HandlerError>(args.get::<i64>(0)? * args.get::<i64>(1)?)
        })
        .method("fail", |_ctx, _args| async move {
            Err::<Value, _>(HandlerError::reply(json!({"code": 42, "reason": "refused"})))
        })
        .method("whoami", |ctx: CallContext, _args| async move {
            Ok::<_, HandlerError>(ctx.descriptor().instance_id.clone())
        })
        .method("trace", |ctx: CallContext, _args| async move {
            Ok::<_, HandlerError>(ctx.trace_path())
        })
}

fn calculator() -> Service {
    Service::new(config("calculator"))
        .method("sum_of_products", |ctx: CallContext, args: Args| async move {
            let pairs: Vec<(i64, i64)> = args.get(0)?;
            let math = ctx.remote("tools.math");
            let mut total = 0;
            for (a, b) in pairs {
                total += math.call_as::<i64>("multiply", vec![json!(a), json!(b)]).await?;
            }
            Ok::<_, HandlerError>(total)
        })
        .method("nested_trace", |ctx: CallContext, _args| async move {
            let inner = ctx.remote("tools.math").call("trace", vec![]).await?;
            Ok::<_, HandlerError>(json!({ "outer": ctx.trace_path(), "inner": inner }))
        })
}

async fn wait_for_services(broker: &BrokerHandle, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while broker.registry().service_count().await < count {
        assert!(Instant::now() < deadline, "services never registered");
        time::sleep(Duration::from_millis(10)).await;
    }
}

struct Mesh {
    broker: BrokerHandle,
    services: Vec<ServiceHandle>,
    caller: ServiceHandle,
}

impl Mesh {
    async fn start(services: Vec<Service>) -> Self {
        let bus = InMemoryBus::new();
        let broker = start_broker(&bus, LivenessConfig::with_heartbeat_interval(INTERVAL)).await;

        let mut handles = Vec::new();
        for (i, service) in services.into_iter().enumerate() {
            handles.push(service.start(connect(&bus, &format!("svc-{}", i))).await.unwrap());
        }
        let distinct = handles
            .iter()
            .map(|h| h.address().clone())
            .collect::<std::collections::HashSet<_>>()
            .len();

        let caller = Service::new(config("caller")).start(connect(&bus, "caller")).await.unwrap();
        wait_for_services(&broker, distinct + 1).await;

        Self {
            broker,
            services: handles,
            caller,
        }
    }

    async fn shutdown(self) {
        self.caller.shutdown().await;
        for service in self.services {
            service.shutdown().await;
        }
        self.broker.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_call_through_broker() {
    let mesh = Mesh::start(vec![math()]).await;

    let result = mesh
        .caller
        .remote("tools.math@1.0.0")
        .call("add", vec![json!(2), json!(3)])
        .await
        .unwrap();
    assert_eq!(result, json!(5));

    mesh.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_method() {
    let mesh = Mesh::start(vec![math()]).await;

    let err = mesh
        .caller
        .remote("tools.math")
        .call("doesNotExist", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::Remote(ref value) if *value == json!(UNKNOWN_METHOD)));

    mesh.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_error_passes_through_untouched() {
    let mesh = Mesh::start(vec![math()]).await;

    let err = mesh.caller.remote("tools.math").call("fail", vec![]).await.unwrap_err();
    match err {
        MeshError::Remote(value) => assert_eq!(value, json!({"code": 42, "reason": "refused"})),
        other => panic!("unexpected error: {}", other),
    }

    mesh.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_nested_call() {
    let mesh = Mesh::start(vec![math(), calculator()]).await;

    let total = mesh
        .caller
        .remote("tools.calculator")
        .call_as::<i64>("sum_of_products", vec![json!([[2, 3], [4, 5]])])
        .await
        .unwrap();
    assert_eq!(total, 26);

    mesh.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_trace_propagates_through_nested_calls() {
    let mesh = Mesh::start(vec![math(), calculator()]).await;
    assert_eq!(mesh.caller.trace_path(), TracePath::root());

    let traced = mesh
        .caller
        .remote("tools.calculator")
        .call("nested_trace", vec![])
        .await
        .unwrap();

    // The handler frame advances once its own nested call is derived
    assert_eq!(traced["inner"], json!([1, 1, 1]));
    assert_eq!(traced["outer"], json!([1, 2]));
    assert_eq!(mesh.caller.trace_path(), TracePath::from(vec![2]));

    mesh.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_broker() {
    let bus = InMemoryBus::new();
    let timeout = Duration::from_millis(500);
    let caller = Service::new(config("caller").with_call_timeout(timeout))
        .start(connect(&bus, "caller"))
        .await
        .unwrap();

    let started = Instant::now();
    let err = caller
        .remote("tools.math")
        .call("add", vec![json!(1), json!(2)])
        .await
        .unwrap_err();

    assert!(matches!(err, MeshError::RequestTimeout(500)));
    assert!(err.is_timeout());
    assert!(started.elapsed() >= timeout);
    caller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_group_spreads_calls() {
    let mesh = Mesh::start(vec![math(), math()]).await;
    let proxy = mesh.caller.remote("tools.math");

    let mut seen: HashMap<String, usize> = HashMap::new();
    for _ in 0..10 {
        let instance = proxy.call_as::<String>("whoami", vec![]).await.unwrap();
        *seen.entry(instance).or_default() += 1;
    }

    assert_eq!(seen.len(), 2);
    assert!(seen.values().all(|&count| count == 5), "uneven split: {:?}", seen);

    mesh.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_service_is_unavailable() {
    let mesh = Mesh::start(vec![math()]).await;

    let err = mesh
        .caller
        .remote("tools.math@2.0.0")
        .call("add", vec![json!(1), json!(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::Remote(ref value) if *value == json!(SERVICE_UNAVAILABLE)));

    mesh.shutdown().await;
}

// Eviction compares wall-clock timestamps, so this one runs in real time
#[tokio::test]
async fn test_silent_service_is_evicted() {
    let interval = Duration::from_millis(20);
    let bus = InMemoryBus::new();
    let broker = start_broker(&bus, LivenessConfig::with_heartbeat_interval(interval)).await;

    let service = Service::new(config("math").with_register_interval(interval))
        .method("add", |_ctx, args: Args| async move {
            Ok::<_, HandlerError>(args.get::<i64>(0)? + args.get::<i64>(1)?)
        })
        .start(connect(&bus, "math"))
        .await
        .unwrap();
    let address = service.address().clone();
    wait_for_services(&broker, 1).await;

    service.shutdown().await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while broker.registry().get_service(&address).await.is_ok() {
        assert!(Instant::now() < deadline, "service was never evicted");
        time::sleep(interval).await;
    }

    broker.shutdown().await;
}

// Wall-clock timing as above
#[tokio::test]
async fn test_slow_heartbeat_service_stays_routable() {
    let bus = InMemoryBus::new();
    let broker = start_broker(&bus, LivenessConfig::with_heartbeat_interval(Duration::from_millis(20))).await;
    let slow = Service::new(config("math").with_register_interval(Duration::from_millis(400)))
        .method("add", |_ctx, args: Args| async move {
            Ok::<_, HandlerError>(args.get::<i64>(0)? + args.get::<i64>(1)?)
        })
        .start(connect(&bus, "math"))
        .await
        .unwrap();
    let caller = Service::new(config("caller").with_register_interval(Duration::from_millis(400)))
        .start(connect(&bus, "caller"))
        .await
        .unwrap();
    wait_for_services(&broker, 2).await;

    // Well past three broker intervals, well within one of the service's
    time::sleep(Duration::from_millis(150)).await;
    let result = caller
        .remote("tools.math")
        .call("add", vec![json!(1), json!(2)])
        .await
        .unwrap();
    assert_eq!(result, json!(3));

    caller.shutdown().await;
    slow.shutdown().await;
    broker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ready_hook_can_call_remote() {
    let bus = InMemoryBus::new();
    let broker = start_broker(&bus, LivenessConfig::with_heartbeat_interval(INTERVAL)).await;
    let math = math().start(connect(&bus, "math")).await.unwrap();
    wait_for_services(&broker, 1).await;

    let (sender, mut results) = mpsc::unbounded_channel();
    let caller = Service::new(config("caller"))
        .on_ready(move |ctx: CallContext| async move {
            let sum = ctx.remote("tools.math").call("add", vec![json!(20), json!(22)]).await;
            let _ = sender.send(sum.map_err(|e| e.to_string()));
        })
        .start(connect(&bus, "caller"))
        .await
        .unwrap();

    let sum = time::timeout(Duration::from_secs(5), results.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sum, Ok(json!(42)));

    caller.shutdown().await;
    math.shutdown().await;
    broker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_calls_resume_after_reconnect() {
    let bus = InMemoryBus::new();
    let broker = start_broker(&bus, LivenessConfig::with_heartbeat_interval(INTERVAL)).await;
    let connection = Arc::new(bus.connect("math"));
    let math = math().start(connection.clone()).await.unwrap();
    let caller = Service::new(config("caller")).start(connect(&bus, "caller")).await.unwrap();
    wait_for_services(&broker, 2).await;

    connection.disconnect();
    time::sleep(INTERVAL).await;
    connection.reconnect();
    time::sleep(INTERVAL).await;

    let result = caller
        .remote("tools.math")
        .call("add", vec![json!(1), json!(2)])
        .await
        .unwrap();
    assert_eq!(result, json!(3));

    caller.shutdown().await;
    math.shutdown().await;
    broker.shutdown().await;
}
