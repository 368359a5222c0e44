use std::net::SocketAddr;

use axum::Router;
use futures::future::try_join_all;
use meshsim_core::{MeshError, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::http::{gateway_router, service_router};
use crate::service::ServiceRuntime;

/// A bound listener and the router it serves.
pub struct ServeTarget {
    name: String,
    listener: TcpListener,
    router: Router,
}

impl ServeTarget {
    pub async fn bind(name: impl Into<String>, address: &str, router: Router) -> Result<Self> {
        let name = name.into();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| MeshError::Io(format!("failed to bind {name} on {address}: {e}")))?;
        Ok(Self::from_listener(name, listener, router))
    }

    pub fn from_listener(name: impl Into<String>, listener: TcpListener, router: Router) -> Self {
        Self {
            name: name.into(),
            listener,
            router,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MeshError::Io(format!("{} has no local address: {e}", self.name)))
    }
}

/// Binds every service named in `services` (all services when empty) on its
/// declared address. The gateway is hosted only when every service is.
pub async fn bind_services(runtime: &ServiceRuntime, services: &[String]) -> Result<Vec<ServeTarget>> {
    let topology = runtime.topology();
    let names: Vec<String> = if services.is_empty() {
        topology.services().iter().map(|s| s.name.clone()).collect()
    } else {
        services.to_vec()
    };

    let mut targets = Vec::with_capacity(names.len() + 1);
    for name in &names {
        let descriptor = topology.service(name)?;
        let router = service_router(runtime, name)?;
        targets.push(ServeTarget::bind(name.clone(), descriptor.listen_addr(), router).await?);
    }

    if let Some(gateway) = topology.gateway() {
        let hosts_all = topology
            .services()
            .iter()
            .all(|s| names.iter().any(|n| *n == s.name));
        if hosts_all {
            targets.push(
                ServeTarget::bind("gateway", gateway.listen_addr(), gateway_router(runtime)).await?,
            );
        }
    }
    Ok(targets)
}

/// Serves all targets until `shutdown` flips to true, then drains in-flight
/// requests.
pub async fn serve_targets(targets: Vec<ServeTarget>, shutdown: watch::Receiver<bool>) -> Result<()> {
    let tasks = targets.into_iter().map(|target| {
        let mut shutdown = shutdown.clone();
        let addr = target
            .listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!(service = %target.name, %addr, "serving");
        let name = target.name;
        tokio::spawn(async move {
            axum::serve(target.listener, target.router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await
                .map_err(|e| MeshError::Io(format!("{name} server failed: {e}")))
        })
    });

    for res in try_join_all(tasks)
        .await
        .map_err(|e| MeshError::Internal(format!("server task join failed: {e}")))?
    {
        res?;
    }
    Ok(())
}
