mod output;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meshsim_core::chaos::ChaosMode;
use meshsim_core::config::Config;
use meshsim_core::model::span::SpanRecord;
use meshsim_core::topology::{HttpMethod, Topology};
use meshsim_runtime::{
    ExportPipeline, ForwardConfig, Forwarder, InboundRequest, LogSink, MemorySink,
    PipelineConfig, ServiceRuntime, SpanSink, bind_services, serve_targets,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::output::{print_check_human, print_routes_human, print_span_tree, route_views};
use crate::telemetry::{LogFormat, init_cli_tracing, init_run_tracing};

#[derive(Parser, Debug)]
#[command(name = "meshsim")]
#[command(about = "Synthetic microservice mesh with chaos injection and tracing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Topology file (TOML or JSON)")]
    topology: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Host services from the topology until ctrl-c")]
    Run {
        #[arg(long = "service", help = "Host only this service (repeatable)")]
        services: Vec<String>,
        #[arg(long, help = "Chaos mode: on or off")]
        chaos: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        export_endpoint: Option<String>,
        #[arg(long)]
        export_protocol: Option<String>,
    },
    #[command(about = "Validate the topology and print a summary")]
    Check,
    #[command(about = "List endpoints and their downstream calls")]
    Routes,
    #[command(about = "Host the whole mesh, send one request and print its trace")]
    Call {
        service: String,
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        chaos: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            services,
            chaos,
            seed,
            export_endpoint,
            export_protocol,
        } => {
            let mut cfg = load_config(cli.topology, chaos, seed)?;
            if let Some(v) = export_endpoint {
                cfg.export_endpoint = Some(v);
            }
            if let Some(v) = export_protocol {
                cfg.export_protocol = v;
            }
            init_run_tracing(LogFormat::from_env());
            run_mesh(cfg, services).await
        }
        Commands::Check => {
            init_cli_tracing();
            let cfg = load_config(cli.topology, None, None)?;
            let topology = load_topology(&cfg)?;
            if cli.json {
                print_json(&CheckSummary {
                    ok: true,
                    services: topology.services().len(),
                    endpoints: topology.endpoint_count(),
                    calls: topology.call_count(),
                    gateway: topology.gateway().map(|g| g.address.clone()),
                })?;
            } else {
                print_check_human(&topology);
            }
            Ok(())
        }
        Commands::Routes => {
            init_cli_tracing();
            let cfg = load_config(cli.topology, None, None)?;
            let topology = load_topology(&cfg)?;
            let views = route_views(&topology);
            if cli.json {
                print_json(&views)?;
            } else {
                print_routes_human(&views);
            }
            Ok(())
        }
        Commands::Call {
            service,
            path,
            method,
            chaos,
            seed,
        } => {
            init_cli_tracing();
            let cfg = load_config(cli.topology, chaos, seed)?;
            let method = HttpMethod::parse(&method)?;
            run_call(cfg, service, path, method, cli.json).await
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckSummary {
    ok: bool,
    services: usize,
    endpoints: usize,
    calls: usize,
    gateway: Option<String>,
}

#[derive(Debug, Serialize)]
struct CallReport {
    status: u16,
    body: String,
    spans: Vec<SpanRecord>,
}

fn load_config(
    topology: Option<PathBuf>,
    chaos: Option<String>,
    seed: Option<u64>,
) -> anyhow::Result<Config> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = topology {
        cfg.topology_path = v;
    }
    if let Some(v) = chaos {
        cfg.chaos_mode = ChaosMode::parse(&v).context("--chaos")?;
    }
    if let Some(v) = seed {
        cfg.chaos_seed = Some(v);
    }
    Ok(cfg)
}

fn load_topology(cfg: &Config) -> anyhow::Result<Topology> {
    Topology::load(&cfg.topology_path)
        .with_context(|| format!("load topology {}", cfg.topology_path.display()))
}

async fn run_mesh(cfg: Config, services: Vec<String>) -> anyhow::Result<()> {
    let topology = Arc::new(load_topology(&cfg)?);

    let pipeline = match ForwardConfig::from_config(&cfg) {
        Some(forward_cfg) => {
            let forwarder = Forwarder::new(&forward_cfg).context("build span exporter")?;
            Some(ExportPipeline::spawn(
                forwarder,
                topology.teams(),
                PipelineConfig::from_config(&cfg),
            ))
        }
        None => None,
    };
    let sink: Arc<dyn SpanSink> = match &pipeline {
        Some(pipeline) => Arc::new(pipeline.clone()),
        None => Arc::new(LogSink),
    };

    let runtime = ServiceRuntime::new(topology.clone(), &cfg, sink)?;
    let targets = bind_services(&runtime, &services).await?;

    eprintln!("meshsim run");
    eprintln!("  topology: {}", cfg.topology_path.display());
    eprintln!("  chaos: {}", cfg.chaos_mode.as_str());
    for target in &targets {
        let addr = target.local_addr()?;
        eprintln!("  {}: http://{addr}", target.name());
    }
    match &cfg.export_endpoint {
        Some(endpoint) => eprintln!("  export: {endpoint} ({})", cfg.export_protocol),
        None => eprintln!("  export: none, closed spans are logged"),
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let serve_task = tokio::spawn(serve_targets(targets, stop_rx));
    tokio::pin!(serve_task);

    tokio::select! {
        res = &mut serve_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            let _ = stop_tx.send(true);
            serve_task.await??;
        }
    }

    if let Some(pipeline) = pipeline {
        pipeline.shutdown().await;
    }
    Ok(())
}

async fn run_call(
    cfg: Config,
    service: String,
    path: String,
    method: HttpMethod,
    json: bool,
) -> anyhow::Result<()> {
    let topology = Arc::new(load_topology(&cfg)?);
    let sink = MemorySink::new();
    let runtime = ServiceRuntime::new(topology, &cfg, Arc::new(sink.clone()))?;
    let targets = bind_services(&runtime, &[]).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let serve_task = tokio::spawn(serve_targets(targets, stop_rx));

    let inbound = InboundRequest {
        method,
        ..InboundRequest::get()
    };
    let response = runtime.handle(&service, &path, inbound).await;

    let _ = stop_tx.send(true);
    serve_task.await??;

    let spans = sink.spans();
    if json {
        print_json(&CallReport {
            status: response.status,
            body: response.body,
            spans,
        })?;
    } else {
        println!("status={}", response.status);
        println!("{}", response.body);
        print_span_tree(&spans);
    }
    if response.status >= 400 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_service_flags() {
        let cli = Cli::try_parse_from([
            "meshsim",
            "--topology",
            "mesh.toml",
            "run",
            "--service",
            "a",
            "--service",
            "b",
            "--chaos",
            "on",
        ])
        .unwrap();
        assert_eq!(cli.topology, Some(PathBuf::from("mesh.toml")));
        match cli.command {
            Commands::Run {
                services, chaos, ..
            } => {
                assert_eq!(services, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(chaos.as_deref(), Some("on"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn call_defaults_to_get() {
        let cli = Cli::try_parse_from(["meshsim", "call", "ledger", "/get-balance", "--json"])
            .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Call { method, .. } => assert_eq!(method, "GET"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
