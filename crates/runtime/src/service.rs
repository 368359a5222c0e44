use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshsim_core::chaos::{
    ChaosDecision, ChaosInjector, ChaosMode, ChaosOverride, ChaosProfile, oversized_payload,
};
use meshsim_core::config::Config;
use meshsim_core::model::span::{SpanKind, SpanStatus};
use meshsim_core::topology::{EndpointDescriptor, HttpMethod, Topology};
use meshsim_core::{MeshError, Result};
use tracing::{debug, warn};

use crate::executor::CallExecutor;
use crate::sink::SpanSink;
use crate::trace::{SpanContext, Tracer};

/// What the runtime needs from an inbound HTTP request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: HttpMethod,
    pub traceparent: Option<String>,
    pub payload_size: u64,
}

impl InboundRequest {
    pub fn get() -> Self {
        Self {
            method: HttpMethod::Get,
            traceparent: None,
            payload_size: 0,
        }
    }

    pub fn with_traceparent(mut self, value: impl Into<String>) -> Self {
        self.traceparent = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: String,
}

impl ServiceResponse {
    fn ok(body: String) -> Self {
        Self { status: 200, body }
    }

    fn from_error(err: &MeshError) -> Self {
        Self {
            status: err.status_code(),
            body: err.to_string(),
        }
    }
}

/// Hosts the services of a topology: one tracer per service and the resolved
/// chaos profiles of every endpoint and call, computed once at startup.
#[derive(Clone)]
pub struct ServiceRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    topology: Arc<Topology>,
    executor: CallExecutor,
    chaos: Arc<ChaosInjector>,
    chaos_mode: ChaosMode,
    request_timeout: Duration,
    services: HashMap<String, ServicePlan>,
}

struct ServicePlan {
    tracer: Tracer,
    endpoints: HashMap<String, EndpointPlan>,
}

struct EndpointPlan {
    profile: ChaosProfile,
    calls: Vec<ChaosProfile>,
}

impl ServiceRuntime {
    pub fn new(topology: Arc<Topology>, cfg: &Config, sink: Arc<dyn SpanSink>) -> Result<Self> {
        let chaos = Arc::new(ChaosInjector::new(cfg.chaos_seed));
        let executor = CallExecutor::new(
            Arc::clone(&topology),
            Arc::clone(&chaos),
            cfg.response_preview_bytes,
        )?;

        let mut services = HashMap::new();
        for service in topology.services() {
            let tracer = Tracer::new(&service.name, service.team.clone(), Arc::clone(&sink));
            let mut endpoints = HashMap::new();
            for endpoint in &service.endpoints {
                endpoints.insert(endpoint.path.clone(), plan_endpoint(endpoint, cfg)?);
            }
            services.insert(service.name.clone(), ServicePlan { tracer, endpoints });
        }

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                topology,
                executor,
                chaos,
                chaos_mode: cfg.chaos_mode,
                request_timeout: cfg.request_timeout,
                services,
            }),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    pub fn chaos_mode(&self) -> ChaosMode {
        self.inner.chaos_mode
    }

    /// Deadline the inbound surface applies to each request.
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Runs one inbound request against `service` at `path`: root span, endpoint
    /// chaos, declared calls in order, aggregate text.
    pub async fn handle(
        &self,
        service: &str,
        path: &str,
        inbound: InboundRequest,
    ) -> ServiceResponse {
        let endpoint = match self.inner.topology.resolve(service, path) {
            Ok(endpoint) => endpoint,
            Err(e) => return ServiceResponse::from_error(&e),
        };
        let Some(plan) = self.inner.services.get(service) else {
            return ServiceResponse::from_error(&MeshError::NotFound(format!("service {service}")));
        };
        let Some(endpoint_plan) = plan.endpoints.get(path) else {
            return ServiceResponse::from_error(&MeshError::NotFound(format!(
                "endpoint {service}{path}"
            )));
        };
        if !endpoint.allows(inbound.method) {
            return ServiceResponse {
                status: 405,
                body: format!("method {} not allowed on {service}{path}", inbound.method),
            };
        }

        let remote = inbound
            .traceparent
            .as_deref()
            .and_then(SpanContext::from_traceparent);
        if inbound.traceparent.is_some() && remote.is_none() {
            debug!(service, path, "ignoring malformed traceparent header");
        }
        let scope = plan.tracer.scope(remote);

        let mut root = scope
            .start_span(&format!("{service}:{}", endpoint.name()), None)
            .with_kind(SpanKind::Server);
        root.set_attribute("endpoint.name", endpoint.name());
        root.set_attribute("service.name", service);
        if let Some(team) = plan.tracer.team() {
            root.set_attribute("team", team);
        }
        root.set_attribute("http.method", inbound.method.as_str());
        root.set_attribute("http.payload.size", inbound.payload_size);
        root.set_attribute("chaos.mode", self.inner.chaos_mode.as_str());

        let decision = self.inner.chaos.decide(&endpoint_plan.profile);
        root.set_attribute("chaos.decision", decision.as_str());
        match decision {
            ChaosDecision::Crash => {
                let err = MeshError::SimulatedFault(format!("injected crash in {service}{path}"));
                warn!(service, path, "endpoint crashed by chaos");
                root.record_error(&err);
                root.set_attribute("http.status_code", err.status_code());
                root.close(SpanStatus::Error);
                return ServiceResponse::from_error(&err);
            }
            ChaosDecision::Latency(delay) => {
                root.set_attribute(
                    "chaos.latency_ms",
                    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                );
                tokio::time::sleep(delay).await;
            }
            ChaosDecision::Normal | ChaosDecision::Oversized(_) => {}
        }

        let mut body = format!("Response from {service} at {path}\n");
        let mut critical_failure = None;
        for (call, profile) in endpoint.calls.iter().zip(&endpoint_plan.calls) {
            let result = self.inner.executor.execute(&scope, call, profile).await;
            body.push_str(&result.summary_line(call.target_name(), call.retry.is_some()));
            body.push('\n');
            if call.is_critical() && critical_failure.is_none() {
                critical_failure = result.to_error(call.target_name());
            }
        }

        if let ChaosDecision::Oversized(size) = decision {
            body = oversized_payload(size);
        }

        match critical_failure {
            Some(err) => {
                root.record_error(&err);
                root.set_attribute("http.status_code", err.status_code());
                root.set_attribute("http.response.size", body.len());
                root.close(SpanStatus::Error);
                ServiceResponse {
                    status: err.status_code(),
                    body,
                }
            }
            None => {
                root.set_attribute("http.status_code", 200u16);
                root.set_attribute("http.response.size", body.len());
                root.close(SpanStatus::Ok);
                ServiceResponse::ok(body)
            }
        }
    }
}

fn plan_endpoint(endpoint: &EndpointDescriptor, cfg: &Config) -> Result<EndpointPlan> {
    let defaults = cfg.effective_chaos();
    // Overrides are checked against the process profile even when chaos is off.
    let resolve = |over: Option<&ChaosOverride>, fallback: &ChaosProfile| -> Result<ChaosProfile> {
        let resolved = match over {
            Some(over) => over.resolve(&cfg.chaos)?,
            None => fallback.clone(),
        };
        Ok(if cfg.chaos_mode.is_on() {
            resolved
        } else {
            ChaosProfile::inactive()
        })
    };

    let profile = resolve(endpoint.chaos.as_ref(), &defaults)?;
    let calls = endpoint
        .calls
        .iter()
        .map(|call| resolve(call.chaos.as_ref(), &ChaosProfile::inactive()))
        .collect::<Result<Vec<_>>>()?;
    Ok(EndpointPlan { profile, calls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    const TOPOLOGY: &str = r#"
[[services]]
name = "ledger"
team = "core-banking"
address = "127.0.0.1:1"

[[services.endpoints]]
path = "/get-balance"

[[services.endpoints]]
path = "/post-entry"
methods = ["POST"]
chaos = { oversized_rate = 1.0, oversized_bytes = 64 }
"#;

    fn runtime(cfg: &Config) -> (ServiceRuntime, MemorySink) {
        let topology = Arc::new(Topology::from_toml_str(TOPOLOGY).unwrap());
        let sink = MemorySink::new();
        let runtime = ServiceRuntime::new(topology, cfg, Arc::new(sink.clone())).unwrap();
        (runtime, sink)
    }

    #[tokio::test]
    async fn leaf_endpoint_returns_aggregate_text() {
        let (runtime, sink) = runtime(&Config::default());
        let resp = runtime
            .handle("ledger", "/get-balance", InboundRequest::get())
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "Response from ledger at /get-balance\n");

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "ledger:get-balance");
        assert_eq!(spans[0].kind, SpanKind::Server);
        assert_eq!(spans[0].status, SpanStatus::Ok);
        assert_eq!(
            spans[0].attr("team").and_then(|v| v.as_str()),
            Some("core-banking")
        );
        assert_eq!(
            spans[0].attr("chaos.decision").and_then(|v| v.as_str()),
            Some("normal")
        );
    }

    #[tokio::test]
    async fn unknown_endpoint_is_not_found_without_spans() {
        let (runtime, sink) = runtime(&Config::default());
        let resp = runtime
            .handle("ledger", "/nope", InboundRequest::get())
            .await;
        assert_eq!(resp.status, 404);
        let resp = runtime
            .handle("nope", "/get-balance", InboundRequest::get())
            .await;
        assert_eq!(resp.status, 404);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn undeclared_method_is_rejected() {
        let (runtime, sink) = runtime(&Config::default());
        let resp = runtime
            .handle("ledger", "/post-entry", InboundRequest::get())
            .await;
        assert_eq!(resp.status, 405);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn endpoint_override_ignored_when_chaos_off() {
        let (runtime, _) = runtime(&Config::default());
        let inbound = InboundRequest {
            method: HttpMethod::Post,
            ..InboundRequest::get()
        };
        let resp = runtime.handle("ledger", "/post-entry", inbound).await;
        assert_eq!(resp.status, 200);
        assert!(resp.body.starts_with("Response from ledger"));
    }

    #[tokio::test]
    async fn oversized_endpoint_returns_payload_with_200() {
        let cfg = Config {
            chaos_mode: ChaosMode::On,
            chaos_seed: Some(7),
            ..Config::default()
        };
        let (runtime, sink) = runtime(&cfg);
        let inbound = InboundRequest {
            method: HttpMethod::Post,
            ..InboundRequest::get()
        };
        let resp = runtime.handle("ledger", "/post-entry", inbound).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "A".repeat(64));
        assert_eq!(sink.spans()[0].status, SpanStatus::Ok);
    }

    #[tokio::test]
    async fn endpoint_crash_returns_500_and_error_span() {
        let cfg = Config {
            chaos_mode: ChaosMode::On,
            chaos: ChaosProfile {
                crash_rate: 1.0,
                latency_rate: 0.0,
                oversized_rate: 0.0,
                ..ChaosProfile::default()
            },
            ..Config::default()
        };
        let (runtime, sink) = runtime(&cfg);
        let resp = runtime
            .handle("ledger", "/get-balance", InboundRequest::get())
            .await;
        assert_eq!(resp.status, 500);
        assert!(resp.body.contains("simulated fault"));
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert!(spans[0].exception.is_some());
    }

    #[test]
    fn call_without_override_carries_no_chaos() {
        let topology = Topology::from_toml_str(
            r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/x"
[[services.endpoints.calls]]
service = "a"
endpoint = "/y"
[[services.endpoints.calls]]
service = "a"
endpoint = "/y"
chaos = { crash_rate = 0.5 }
[[services.endpoints]]
path = "/y"
"#,
        )
        .unwrap();
        let cfg = Config {
            chaos_mode: ChaosMode::On,
            ..Config::default()
        };
        let plan = plan_endpoint(topology.resolve("a", "/x").unwrap(), &cfg).unwrap();
        assert_eq!(plan.profile, cfg.chaos);
        assert!(!plan.calls[0].is_active());
        assert_eq!(plan.calls[1].crash_rate, 0.5);
        assert_eq!(plan.calls[1].latency_rate, 0.0);
    }

    #[test]
    fn invalid_override_fails_at_startup() {
        let mut endpoint = Topology::from_toml_str(TOPOLOGY)
            .unwrap()
            .resolve("ledger", "/get-balance")
            .unwrap()
            .clone();
        endpoint.chaos = Some(ChaosOverride {
            crash_rate: Some(0.8),
            latency_rate: Some(0.8),
            ..ChaosOverride::default()
        });
        let cfg = Config {
            chaos_mode: ChaosMode::On,
            ..Config::default()
        };
        assert!(matches!(
            plan_endpoint(&endpoint, &cfg),
            Err(MeshError::Config(_))
        ));
    }

    #[test]
    fn override_latency_resolves_against_process_range() {
        let topology = Topology::from_toml_str(
            r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/x"
chaos = { latency_rate = 1.0, latency_min = "15s" }
"#,
        )
        .unwrap();
        let endpoint = topology.resolve("a", "/x").unwrap();

        let widened = Config {
            chaos_mode: ChaosMode::On,
            chaos: ChaosProfile {
                latency_min: Duration::from_secs(10),
                latency_max: Duration::from_secs(30),
                ..ChaosProfile::default()
            },
            ..Config::default()
        };
        let plan = plan_endpoint(endpoint, &widened).unwrap();
        assert_eq!(plan.profile.latency_min, Duration::from_secs(15));
        assert_eq!(plan.profile.latency_max, Duration::from_secs(30));

        // The default range tops out at 9s, so the same override is inverted there,
        // whether or not chaos is switched on.
        let narrow = Config {
            chaos_mode: ChaosMode::On,
            ..Config::default()
        };
        assert!(matches!(
            plan_endpoint(endpoint, &narrow),
            Err(MeshError::Config(_))
        ));
        assert!(plan_endpoint(endpoint, &Config::default()).is_err());
    }
}
