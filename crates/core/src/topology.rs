//! Static description of the mesh: services, their endpoints, and each endpoint's
//! ordered downstream calls. Loaded once and read-only afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chaos::ChaosOverride;
use crate::error::{MeshError, Result};
use crate::retry::RetryPolicy;
use crate::time::parse_duration_str;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(MeshError::Config(format!("unsupported HTTP method: {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Direct,
    Gateway,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Gateway => "gateway",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criticality {
    #[default]
    BestEffort,
    Critical,
}

impl Criticality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BestEffort => "best-effort",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamCallSpec {
    pub service: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub transport: Transport,
    pub timeout: Duration,
    pub criticality: Criticality,
    pub retry: Option<RetryPolicy>,
    pub chaos: Option<ChaosOverride>,
}

impl DownstreamCallSpec {
    /// Logical call name: the target endpoint without its leading slash, or the
    /// target service for a root path.
    pub fn target_name(&self) -> &str {
        match self.endpoint.trim_start_matches('/') {
            "" => &self.service,
            name => name,
        }
    }

    pub fn span_name(&self, attempt: Option<u32>) -> String {
        match attempt {
            Some(n) => format!("call-{}-attempt-{n}", self.target_name()),
            None => format!("call-{}", self.target_name()),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.criticality == Criticality::Critical
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescriptor {
    pub path: String,
    pub methods: Vec<HttpMethod>,
    pub calls: Vec<DownstreamCallSpec>,
    pub chaos: Option<ChaosOverride>,
}

impl EndpointDescriptor {
    pub fn name(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    pub fn allows(&self, method: HttpMethod) -> bool {
        self.methods.contains(&method)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub team: Option<String>,
    pub address: String,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl ServiceDescriptor {
    pub fn endpoint(&self, path: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.path == path)
    }

    /// `host:port` to bind, with any URL scheme stripped.
    pub fn listen_addr(&self) -> &str {
        listen_addr(&self.address)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayDescriptor {
    pub address: String,
}

impl GatewayDescriptor {
    pub fn listen_addr(&self) -> &str {
        listen_addr(&self.address)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    services: Vec<ServiceDescriptor>,
    gateway: Option<GatewayDescriptor>,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| MeshError::Config(format!("failed reading {}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_toml_str(&raw)
        };
        parsed.map_err(|e| match e {
            MeshError::Config(msg) => MeshError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: RawTopology = toml::from_str(raw)
            .map_err(|e| MeshError::Config(format!("failed parsing topology: {e}")))?;
        Self::from_raw(parsed)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: RawTopology = serde_json::from_str(raw)
            .map_err(|e| MeshError::Config(format!("failed parsing topology: {e}")))?;
        Self::from_raw(parsed)
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn gateway(&self) -> Option<&GatewayDescriptor> {
        self.gateway.as_ref()
    }

    pub fn service(&self, name: &str) -> Result<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| MeshError::NotFound(format!("service {name}")))
    }

    pub fn resolve(&self, service: &str, path: &str) -> Result<&EndpointDescriptor> {
        self.service(service)?
            .endpoint(path)
            .ok_or_else(|| MeshError::NotFound(format!("endpoint {service}{path}")))
    }

    /// Absolute URL a downstream call is issued against.
    pub fn target_url(&self, call: &DownstreamCallSpec) -> Result<String> {
        match call.transport {
            Transport::Direct => {
                let service = self.service(&call.service)?;
                Ok(format!(
                    "{}{}",
                    normalize_base_url(&service.address),
                    call.endpoint
                ))
            }
            Transport::Gateway => {
                let gateway = self.gateway.as_ref().ok_or_else(|| {
                    MeshError::Config("gateway transport used without a gateway".to_string())
                })?;
                Ok(format!(
                    "{}/{}{}",
                    normalize_base_url(&gateway.address),
                    call.service,
                    call.endpoint
                ))
            }
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.services.iter().map(|s| s.endpoints.len()).sum()
    }

    /// Owning team per service, for services that declare one.
    pub fn teams(&self) -> HashMap<String, String> {
        self.services
            .iter()
            .filter_map(|s| s.team.clone().map(|team| (s.name.clone(), team)))
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.services
            .iter()
            .flat_map(|s| &s.endpoints)
            .map(|e| e.calls.len())
            .sum()
    }

    fn from_raw(raw: RawTopology) -> Result<Self> {
        let gateway = raw.gateway.map(|g| GatewayDescriptor { address: g.address });

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        let mut services = Vec::with_capacity(raw.services.len());
        for svc in raw.services {
            if svc.name.trim().is_empty() {
                return Err(MeshError::Config("service name cannot be empty".to_string()));
            }
            if !names.insert(svc.name.clone()) {
                return Err(MeshError::Config(format!("duplicate service {}", svc.name)));
            }
            if !addresses.insert(svc.address.clone()) {
                return Err(MeshError::Config(format!(
                    "service {} reuses address {}",
                    svc.name, svc.address
                )));
            }

            let mut paths = HashSet::new();
            let mut endpoints = Vec::with_capacity(svc.endpoints.len());
            for ep in svc.endpoints {
                validate_path(&ep.path)?;
                if !paths.insert(ep.path.clone()) {
                    return Err(MeshError::Config(format!(
                        "duplicate endpoint {}{}",
                        svc.name, ep.path
                    )));
                }
                endpoints.push(build_endpoint(&svc.name, ep, gateway.is_some())?);
            }

            services.push(ServiceDescriptor {
                name: svc.name,
                team: svc.team,
                address: svc.address,
                endpoints,
            });
        }

        let topology = Self { services, gateway };
        topology.check_references()?;
        topology.check_acyclic()?;
        Ok(topology)
    }

    fn check_references(&self) -> Result<()> {
        for svc in &self.services {
            for ep in &svc.endpoints {
                for call in &ep.calls {
                    let Ok(target) = self.service(&call.service) else {
                        return Err(MeshError::Config(format!(
                            "{}{} calls undeclared service {}",
                            svc.name, ep.path, call.service
                        )));
                    };
                    let Some(target_ep) = target.endpoint(&call.endpoint) else {
                        return Err(MeshError::Config(format!(
                            "{}{} calls undeclared endpoint {}{}",
                            svc.name, ep.path, call.service, call.endpoint
                        )));
                    };
                    if !target_ep.allows(call.method) {
                        return Err(MeshError::Config(format!(
                            "{}{} calls {}{} with {} which it does not accept",
                            svc.name, ep.path, call.service, call.endpoint, call.method
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            topology: &'a Topology,
            node: (&'a str, &'a str),
            marks: &mut HashMap<(&'a str, &'a str), Mark>,
        ) -> Result<()> {
            match marks.get(&node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(MeshError::Config(format!(
                        "call graph cycle through {}{}",
                        node.0, node.1
                    )));
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            let endpoint = topology.resolve(node.0, node.1)?;
            for call in &endpoint.calls {
                visit(topology, (call.service.as_str(), call.endpoint.as_str()), marks)?;
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for svc in &self.services {
            for ep in &svc.endpoints {
                visit(self, (svc.name.as_str(), ep.path.as_str()), &mut marks)?;
            }
        }
        Ok(())
    }
}

fn build_endpoint(
    service: &str,
    raw: RawEndpoint,
    has_gateway: bool,
) -> Result<EndpointDescriptor> {
    let methods = if raw.methods.is_empty() {
        vec![HttpMethod::Get]
    } else {
        let mut methods = Vec::with_capacity(raw.methods.len());
        for m in &raw.methods {
            let method = HttpMethod::parse(m)?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        methods
    };

    if let Some(chaos) = &raw.chaos {
        validate_override(chaos, &format!("{service}{}", raw.path))?;
    }

    let mut calls = Vec::with_capacity(raw.calls.len());
    for call in raw.calls {
        validate_path(&call.endpoint)?;
        let context = format!("{service}{} -> {}{}", raw.path, call.service, call.endpoint);
        if call.transport == Transport::Gateway && !has_gateway {
            return Err(MeshError::Config(format!(
                "{context} uses gateway transport but no gateway is declared"
            )));
        }
        let timeout = match &call.timeout {
            Some(v) => parse_config_duration(v, "timeout", &context)?,
            None => DEFAULT_CALL_TIMEOUT,
        };
        let retry = call
            .retry
            .map(|r| -> Result<RetryPolicy> {
                let backoff = parse_config_duration(&r.backoff, "retry backoff", &context)?;
                let policy = RetryPolicy::new(r.max_attempts, backoff)
                    .map_err(|e| MeshError::Config(format!("{context}: {e}")))?;
                Ok(match r.jitter {
                    Some(j) => policy.with_jitter(parse_config_duration(
                        &j,
                        "retry jitter",
                        &context,
                    )?),
                    None => policy,
                })
            })
            .transpose()?;
        if let Some(chaos) = &call.chaos {
            validate_override(chaos, &context)?;
        }
        calls.push(DownstreamCallSpec {
            service: call.service,
            endpoint: call.endpoint,
            method: call
                .method
                .as_deref()
                .map(HttpMethod::parse)
                .transpose()?
                .unwrap_or(HttpMethod::Get),
            transport: call.transport,
            timeout,
            criticality: call.criticality,
            retry,
            chaos: call.chaos,
        });
    }

    Ok(EndpointDescriptor {
        path: raw.path,
        methods,
        calls,
        chaos: raw.chaos,
    })
}

fn validate_override(chaos: &ChaosOverride, context: &str) -> Result<()> {
    chaos
        .check()
        .map_err(|e| MeshError::Config(format!("{context}: {e}")))
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.contains(char::is_whitespace) {
        return Err(MeshError::Config(format!(
            "endpoint path must start with '/' and contain no whitespace: {path:?}"
        )));
    }
    Ok(())
}

fn parse_config_duration(value: &str, field: &str, context: &str) -> Result<Duration> {
    parse_duration_str(value).map_err(|e| MeshError::Config(format!("{context}: bad {field}: {e}")))
}

fn listen_addr(address: &str) -> &str {
    let trimmed = address.trim_end_matches('/');
    trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed)
}

fn normalize_base_url(address: &str) -> String {
    let trimmed = address.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTopology {
    gateway: Option<RawGateway>,
    #[serde(default)]
    services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGateway {
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    name: String,
    team: Option<String>,
    address: String,
    #[serde(default)]
    endpoints: Vec<RawEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    path: String,
    #[serde(default)]
    methods: Vec<String>,
    chaos: Option<ChaosOverride>,
    #[serde(default)]
    calls: Vec<RawCall>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCall {
    service: String,
    endpoint: String,
    method: Option<String>,
    #[serde(default)]
    transport: Transport,
    timeout: Option<String>,
    #[serde(default)]
    criticality: Criticality,
    retry: Option<RawRetry>,
    chaos: Option<ChaosOverride>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    max_attempts: u32,
    backoff: String,
    jitter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYMENTS: &str = r#"
[gateway]
address = "127.0.0.1:8080"

[[services]]
name = "payments-orchestrator"
team = "payments"
address = "127.0.0.1:5001"

[[services.endpoints]]
path = "/initiate-transfer"
methods = ["GET", "POST"]

[[services.endpoints.calls]]
service = "payments-processor"
endpoint = "/process-gateway"
criticality = "critical"

[[services.endpoints.calls]]
service = "accounting-ledger"
endpoint = "/get-balance"
transport = "gateway"
timeout = "250ms"

[[services]]
name = "payments-processor"
team = "payments"
address = "127.0.0.1:5002"

[[services.endpoints]]
path = "/process-gateway"

[[services.endpoints]]
path = "/settle-payment"
methods = ["POST"]
chaos = { crash_rate = 0.2 }

[[services.endpoints.calls]]
service = "payments-processor"
endpoint = "/process-gateway"
timeout = "2s"
retry = { max_attempts = 3, backoff = "500ms" }

[[services]]
name = "accounting-ledger"
address = "http://127.0.0.1:5003/"

[[services.endpoints]]
path = "/get-balance"
"#;

    #[test]
    fn loads_and_resolves_endpoints() {
        let topology = Topology::from_toml_str(PAYMENTS).unwrap();
        assert_eq!(topology.services().len(), 3);
        assert_eq!(topology.endpoint_count(), 4);
        assert_eq!(topology.call_count(), 3);

        let ep = topology
            .resolve("payments-orchestrator", "/initiate-transfer")
            .unwrap();
        assert_eq!(ep.methods, vec![HttpMethod::Get, HttpMethod::Post]);
        assert_eq!(ep.calls.len(), 2);
        assert!(ep.calls[0].is_critical());
        assert_eq!(ep.calls[0].timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(ep.calls[1].criticality, Criticality::BestEffort);
        assert_eq!(ep.calls[1].timeout, Duration::from_millis(250));

        let settle = topology
            .resolve("payments-processor", "/settle-payment")
            .unwrap();
        let retry = settle.calls[0].retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff, Duration::from_millis(500));
        assert_eq!(settle.calls[0].span_name(Some(2)), "call-process-gateway-attempt-2");
    }

    #[test]
    fn resolve_is_idempotent() {
        let topology = Topology::from_toml_str(PAYMENTS).unwrap();
        let a = topology.resolve("payments-processor", "/process-gateway").unwrap();
        let b = topology.resolve("payments-processor", "/process-gateway").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn resolve_unknown_is_not_found() {
        let topology = Topology::from_toml_str(PAYMENTS).unwrap();
        assert!(matches!(
            topology.resolve("payments-processor", "/nope"),
            Err(MeshError::NotFound(_))
        ));
        assert!(matches!(
            topology.resolve("ghost", "/process-gateway"),
            Err(MeshError::NotFound(_))
        ));
    }

    #[test]
    fn builds_direct_and_gateway_urls() {
        let topology = Topology::from_toml_str(PAYMENTS).unwrap();
        let ep = topology
            .resolve("payments-orchestrator", "/initiate-transfer")
            .unwrap();
        assert_eq!(
            topology.target_url(&ep.calls[0]).unwrap(),
            "http://127.0.0.1:5002/process-gateway"
        );
        assert_eq!(
            topology.target_url(&ep.calls[1]).unwrap(),
            "http://127.0.0.1:8080/accounting-ledger/get-balance"
        );
    }

    #[test]
    fn listen_addr_strips_scheme() {
        let topology = Topology::from_toml_str(PAYMENTS).unwrap();
        let ledger = topology.service("accounting-ledger").unwrap();
        assert_eq!(ledger.address, "http://127.0.0.1:5003/");
        assert_eq!(ledger.listen_addr(), "127.0.0.1:5003");
        assert_eq!(topology.gateway().unwrap().listen_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn teams_skip_services_without_owner() {
        let topology = Topology::from_toml_str(PAYMENTS).unwrap();
        let teams = topology.teams();
        assert_eq!(
            teams.get("payments-orchestrator").map(String::as_str),
            Some("payments")
        );
        assert_eq!(teams.len(), topology.services().iter().filter(|s| s.team.is_some()).count());
    }

    #[test]
    fn rejects_undeclared_targets() {
        let raw = r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/x"
[[services.endpoints.calls]]
service = "b"
endpoint = "/y"
"#;
        let err = Topology::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("undeclared service b"), "{err}");
    }

    #[test]
    fn rejects_gateway_without_gateway() {
        let raw = r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/x"
[[services.endpoints.calls]]
service = "a"
endpoint = "/y"
transport = "gateway"
[[services.endpoints]]
path = "/y"
"#;
        assert!(Topology::from_toml_str(raw).is_err());
    }

    #[test]
    fn rejects_cycles() {
        let raw = r#"
[[services]]
name = "risk"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/generate-report"
[[services.endpoints.calls]]
service = "risk"
endpoint = "/flag-anomaly"
[[services.endpoints]]
path = "/flag-anomaly"
[[services.endpoints.calls]]
service = "risk"
endpoint = "/generate-report"
"#;
        let err = Topology::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn rejects_bad_chaos_and_retry() {
        let raw = r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/x"
chaos = { crash_rate = 0.6, latency_rate = 0.6 }
"#;
        let err = Topology::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("exceeds 1.0"), "{err}");

        let raw = r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/x"
[[services.endpoints.calls]]
service = "a"
endpoint = "/y"
retry = { max_attempts = 0, backoff = "1s" }
[[services.endpoints]]
path = "/y"
"#;
        assert!(Topology::from_toml_str(raw).is_err());
    }

    #[test]
    fn latency_override_defers_to_process_range() {
        let raw = r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "/x"
chaos = { latency_rate = 1.0, latency_min = "15s" }
"#;
        let topology = Topology::from_toml_str(raw).unwrap();
        let over = topology.resolve("a", "/x").unwrap().chaos.clone().unwrap();
        assert_eq!(over.latency_min.as_deref(), Some("15s"));

        let inverted = raw.replace(
            "latency_min = \"15s\"",
            "latency_min = \"15s\", latency_max = \"1s\"",
        );
        let err = Topology::from_toml_str(&inverted).unwrap_err();
        assert!(err.to_string().contains("inverted"), "{err}");
    }

    #[test]
    fn rejects_duplicates_and_bad_paths() {
        let dup = r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services]]
name = "a"
address = "127.0.0.1:2"
"#;
        assert!(Topology::from_toml_str(dup).is_err());

        let path = r#"
[[services]]
name = "a"
address = "127.0.0.1:1"
[[services.endpoints]]
path = "x"
"#;
        assert!(Topology::from_toml_str(path).is_err());
    }

    #[test]
    fn loads_json_topology() {
        let raw = r#"{
            "services": [
                {"name": "service-a", "address": "127.0.0.1:5000",
                 "endpoints": [{"path": "/", "calls": [{"service": "service-b", "endpoint": "/"}]}]},
                {"name": "service-b", "address": "127.0.0.1:5001",
                 "endpoints": [{"path": "/"}]}
            ]
        }"#;
        let topology = Topology::from_json_str(raw).unwrap();
        let ep = topology.resolve("service-a", "/").unwrap();
        assert_eq!(ep.calls[0].target_name(), "service-b");
        assert_eq!(ep.calls[0].span_name(None), "call-service-b");
        assert_eq!(topology.call_count(), 1);
    }

    #[test]
    fn malformed_source_is_config_error() {
        assert!(matches!(
            Topology::from_toml_str("services = 3"),
            Err(MeshError::Config(_))
        ));
    }
}
