use std::collections::HashMap;
use std::io::IsTerminal;

use meshsim_core::model::span::{SpanRecord, SpanStatus};
use meshsim_core::time::format_duration;
use meshsim_core::topology::Topology;
use owo_colors::OwoColorize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RouteView {
    pub service: String,
    pub team: Option<String>,
    pub address: String,
    pub endpoint: String,
    pub methods: Vec<&'static str>,
    pub chaos_override: bool,
    pub calls: Vec<CallView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallView {
    pub service: String,
    pub endpoint: String,
    pub method: &'static str,
    pub transport: &'static str,
    pub url: String,
    pub timeout: String,
    pub criticality: &'static str,
    pub retry: Option<String>,
    pub chaos_override: bool,
}

pub fn route_views(topology: &Topology) -> Vec<RouteView> {
    let mut out = Vec::new();
    for service in topology.services() {
        for endpoint in &service.endpoints {
            let calls = endpoint
                .calls
                .iter()
                .map(|call| CallView {
                    service: call.service.clone(),
                    endpoint: call.endpoint.clone(),
                    method: call.method.as_str(),
                    transport: call.transport.as_str(),
                    url: topology.target_url(call).unwrap_or_default(),
                    timeout: format_duration(call.timeout),
                    criticality: call.criticality.as_str(),
                    retry: call.retry.as_ref().map(|r| {
                        format!("{}x{}", r.max_attempts, format_duration(r.backoff))
                    }),
                    chaos_override: call.chaos.is_some(),
                })
                .collect();
            out.push(RouteView {
                service: service.name.clone(),
                team: service.team.clone(),
                address: service.address.clone(),
                endpoint: endpoint.path.clone(),
                methods: endpoint.methods.iter().map(|m| m.as_str()).collect(),
                chaos_override: endpoint.chaos.is_some(),
                calls,
            });
        }
    }
    out
}

pub fn print_check_human(topology: &Topology) {
    println!(
        "services={} endpoints={} calls={}",
        topology.services().len(),
        topology.endpoint_count(),
        topology.call_count()
    );
    if let Some(gateway) = topology.gateway() {
        println!("gateway={}", gateway.address);
    }
    for service in topology.services() {
        println!(
            "service={} team={} address={} endpoints={}",
            service.name,
            service.team.as_deref().unwrap_or("-"),
            service.address,
            service.endpoints.len()
        );
    }
    println!("-- topology ok --");
}

pub fn print_routes_human(views: &[RouteView]) {
    let color = std::io::stdout().is_terminal();
    let mut last_service: Option<&str> = None;
    for view in views {
        if last_service != Some(view.service.as_str()) {
            let name = if color {
                view.service.cyan().to_string()
            } else {
                view.service.clone()
            };
            println!(
                "{name} ({}) {}",
                view.team.as_deref().unwrap_or("-"),
                view.address
            );
            last_service = Some(view.service.as_str());
        }
        println!("  {} {}", view.methods.join(","), view.endpoint);
        for call in &view.calls {
            let mut tags = vec![
                call.transport.to_string(),
                call.criticality.to_string(),
                format!("timeout {}", call.timeout),
            ];
            if let Some(retry) = &call.retry {
                tags.push(format!("retry {retry}"));
            }
            if call.chaos_override {
                tags.push("chaos".to_string());
            }
            let tags = tags.join(", ");
            let tags = if color && call.criticality == "critical" {
                tags.yellow().to_string()
            } else {
                tags
            };
            println!(
                "    -> {} {}{} [{tags}]",
                call.method, call.service, call.endpoint
            );
        }
    }
    println!("-- {} endpoints --", views.len());
}

pub fn print_span_tree(spans: &[SpanRecord]) {
    let ids: Vec<_> = spans.iter().map(|s| &s.span_id).collect();
    let mut children: HashMap<Option<String>, Vec<&SpanRecord>> = HashMap::new();
    for span in spans {
        let parent = span
            .parent_span_id
            .as_ref()
            .filter(|p| ids.contains(p))
            .map(|p| p.to_string());
        children.entry(parent).or_default().push(span);
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|s| s.start_ts);
    }

    let color = std::io::stdout().is_terminal();
    if let Some(roots) = children.get(&None) {
        for root in roots {
            println!("TRACE {}", root.trace_id);
            print_node(root, &children, 0, color);
        }
    }
}

fn print_node(
    span: &SpanRecord,
    children: &HashMap<Option<String>, Vec<&SpanRecord>>,
    depth: usize,
    color: bool,
) {
    let indent = "  ".repeat(depth);
    let status = match (span.status, color) {
        (SpanStatus::Ok, true) => span.status.green().to_string(),
        (SpanStatus::Error, true) => span.status.red().to_string(),
        _ => span.status.to_string(),
    };
    println!(
        "{}{} {} ({}ms) {}",
        indent,
        span.service,
        span.name,
        span.duration_ms(),
        status
    );
    if let Some(exception) = &span.exception {
        println!("{indent}  ! {exception}");
    }

    if let Some(kids) = children.get(&Some(span.span_id.to_string())) {
        for child in kids {
            print_node(child, children, depth + 1, color);
        }
    }
}
