//! Helpers shared by the integration tests: downstream stubs, an OTLP collector
//! stub, sample topologies and span-tree assertions.

pub mod collector;
pub mod spans;
pub mod stub;
pub mod topology;

use std::sync::Arc;
use std::time::Duration;

use meshsim_core::config::Config;
use meshsim_core::topology::Topology;
use meshsim_runtime::http::service_router;
use meshsim_runtime::{MemorySink, ServiceRuntime};
use tokio::net::TcpListener;

pub use collector::CollectorStub;
pub use stub::{StubConfig, StubServer};

/// Binds `127.0.0.1:0` and returns the listener with its `host:port`.
pub async fn reserve_listener() -> anyhow::Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    Ok((listener, addr))
}

/// An address nothing listens on; connecting to it is refused.
pub async fn unused_addr() -> anyhow::Result<String> {
    let (listener, addr) = reserve_listener().await?;
    drop(listener);
    Ok(addr)
}

/// Config with chaos off and short timeouts, suitable for in-process meshes.
pub fn test_config() -> Config {
    Config {
        request_timeout: Duration::from_secs(10),
        ..Config::default()
    }
}

/// A runtime over `topology_toml` whose spans land in the returned sink.
pub fn runtime_with_sink(
    topology_toml: &str,
    cfg: &Config,
) -> anyhow::Result<(ServiceRuntime, MemorySink)> {
    let topology = Arc::new(Topology::from_toml_str(topology_toml)?);
    let sink = MemorySink::new();
    let runtime = ServiceRuntime::new(topology, cfg, Arc::new(sink.clone()))?;
    Ok((runtime, sink))
}

/// Serves one hosted service of `runtime` on a pre-bound listener.
pub fn spawn_service(
    runtime: &ServiceRuntime,
    service: &str,
    listener: TcpListener,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let router = service_router(runtime, service)?;
    Ok(tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    }))
}
