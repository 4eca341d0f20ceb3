use anyhow::Result;
use gx_core::{ServiceConfig, ServiceIdentifier};
use gx_runtime::{Args, Broker, CallContext, HandlerError, LivenessConfig, Service, ServiceHandle};
use gx_transport::{InMemoryBus, NatsConnection, Transport};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let base = ServiceConfig::from_env();
    info!("Starting gx-node (namespace {:?}, version {})", base.namespace, base.version);

    let bus = if base.in_process() {
        info!("Running on the in-process bus");
        Some(InMemoryBus::new())
    } else {
        info!("Connecting to {:?}", base.endpoints());
        None
    };

    let broker_transport: Arc<dyn Transport> = match &bus {
        Some(bus) => Arc::new(bus.connect("broker")),
        None => Arc::new(NatsConnection::connect(&base.endpoints(), "gx-broker").await?),
    };
    let broker = Broker::new(broker_transport, LivenessConfig::with_heartbeat_interval(base.register_interval))
        .start()
        .await?;
    info!("Broker initialized");

    let math = start_math(bus.as_ref(), &base).await?;
    let calculator = start_calculator(bus.as_ref(), &base).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    calculator.shutdown().await;
    math.shutdown().await;
    broker.shutdown().await;

    Ok(())
}

/// Start `service` on the in-process bus when there is one, otherwise on
/// its configured endpoints
async fn launch(service: Service, bus: Option<&InMemoryBus>, name: &str) -> Result<ServiceHandle> {
    let handle = match bus {
        Some(bus) => service.start(Arc::new(bus.connect(name))).await?,
        None => service.connect().await?,
    };
    Ok(handle)
}

/// Per-service configuration sharing the node's settings but with its own
/// instance id
fn service_config(base: &ServiceConfig, service: &str) -> ServiceConfig {
    ServiceConfig {
        transport: base.transport.clone(),
        namespace: base.namespace.clone(),
        version: base.version.clone(),
        stateful: base.stateful,
        register_interval: base.register_interval,
        call_timeout: base.call_timeout,
        ..ServiceConfig::new(service)
    }
}

async fn start_math(bus: Option<&InMemoryBus>, base: &ServiceConfig) -> Result<ServiceHandle> {
    let config = service_config(base, "math");
    let name = config.service.clone();

    let service = Service::new(config)
        .method("add", |_ctx, args: Args| async move {
            Ok::<_, HandlerError>(args.get::<f64>(0)? + args.get::<f64>(1)?)
        })
        .method("multiply", |_ctx, args: Args| async move {
            Ok::<_, HandlerError>(args.get::<f64>(0)? * args.get::<f64>(1)?)
        });

    launch(service, bus, &name).await
}

async fn start_calculator(bus: Option<&InMemoryBus>, base: &ServiceConfig) -> Result<ServiceHandle> {
    let config = service_config(base, "calculator");
    let name = config.service.clone();
    let math = ServiceIdentifier::new(&base.namespace, "math", &base.version).to_string();
    let own = ServiceIdentifier::new(&base.namespace, "calculator", &base.version).to_string();

    let remote_math = math.clone();
    let settle = base.register_interval;
    let service = Service::new(config)
        .method("sum_of_products", move |ctx: CallContext, args: Args| {
            let math = ctx.remote(&remote_math);
            async move {
                let pairs: Vec<(f64, f64)> = args.get(0)?;
                let mut total = 0.0;
                for (a, b) in pairs {
                    total += math.call_as::<f64>("multiply", vec![json!(a), json!(b)]).await?;
                }
                Ok::<_, HandlerError>(total)
            }
        })
        .on_ready(move |ctx: CallContext| async move {
            // Let the broker see this instance's first heartbeat
            tokio::time::sleep(settle).await;

            match ctx.remote(&math).call("add", vec![json!(2), json!(3)]).await {
                Ok(sum) => info!(trace = %ctx.trace_path(), "{}.add(2, 3) = {}", math, sum),
                Err(e) => error!("Demo call to {} failed: {}", math, e),
            }

            let pairs = json!([[1, 2], [3, 4], [5, 6]]);
            match ctx.remote(&own).call("sum_of_products", vec![pairs.clone()]).await {
                Ok(total) => info!(trace = %ctx.trace_path(), "{}.sum_of_products({}) = {}", own, pairs, total),
                Err(e) => error!("Demo call to {} failed: {}", own, e),
            }
        });

    launch(service, bus, &name).await
}
