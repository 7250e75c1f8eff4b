use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use portico_controller::{Controller, ControllerConfig};
use portico_core::{template, ResourceKey};
use portico_kubehub::{convert::ingress_from_derived, get_kube_client, KubeIngressStore, Watchers};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "porticoctl", version, about = "Keep one Ingress per annotated Service")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller until interrupted
    Run {
        /// Watch a single namespace (default: all namespaces)
        #[arg(long = "ns", env = "PORTICO_NAMESPACE")]
        namespace: Option<String>,
        /// Number of reconcile workers
        #[arg(long = "workers", env = "PORTICO_WORKERS")]
        workers: Option<usize>,
        /// Requeues allowed before a failing key is dropped
        #[arg(long = "max-retries", env = "PORTICO_MAX_RETRIES")]
        max_retries: Option<u32>,
    },
    /// Print the Ingress that would be created for a Service
    Template {
        /// Service key, e.g. "default/web"
        key: String,
        /// Print the controller's model instead of the Kubernetes manifest
        #[arg(long = "model")]
        model: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("PORTICO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PORTICO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid PORTICO_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { namespace, workers, max_retries } => {
            init_metrics();
            let mut config = ControllerConfig::from_env();
            if let Some(w) = workers {
                config.workers = w.max(1);
            }
            if let Some(m) = max_retries {
                config.max_retries = m;
            }
            run(config, namespace).await
        }
        Commands::Template { key, model } => template_cmd(&key, cli.output, model),
    }
}

async fn run(config: ControllerConfig, namespace: Option<String>) -> Result<()> {
    let client = get_kube_client().await?;
    let (tx, rx) = mpsc::channel(config.notify_cap);

    let watchers = Watchers::start(client.clone(), namespace.as_deref(), tx);
    info!("waiting for caches to sync");
    if !synced_before(watchers.wait_synced(), signal::ctrl_c()).await? {
        info!("interrupt received before caches synced; exiting");
        watchers.abort();
        return Ok(());
    }

    let controller = Controller::new(
        &config,
        config.build_queue(),
        Arc::new(watchers.cache()),
        Arc::new(KubeIngressStore::new(client)),
    );
    let stop = CancellationToken::new();
    let ctrl = tokio::spawn(controller.run(rx, stop.clone()));

    signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("interrupt received; shutting down");
    stop.cancel();
    ctrl.await.context("controller task")?;
    watchers.abort();
    Ok(())
}

/// Race cache sync against an interrupt. `Ok(false)` when the interrupt came first.
async fn synced_before<S, I>(sync: S, interrupt: I) -> Result<bool>
where
    S: Future<Output = Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        synced = sync => {
            synced.context("waiting for cache sync")?;
            Ok(true)
        }
        interrupted = interrupt => {
            interrupted.context("listening for ctrl-c")?;
            Ok(false)
        }
    }
}

fn template_cmd(raw: &str, output: Output, model: bool) -> Result<()> {
    let key = ResourceKey::from_str(raw).with_context(|| format!("invalid service key {:?}", raw))?;
    let derived = template::derived_for_key(&key);
    match output {
        Output::Human => {
            let s = &derived.spec;
            let ns = if derived.namespace.is_empty() { "-" } else { derived.namespace.as_str() };
            println!("ingress {} • ns {}", s.name, ns);
            println!("  http://{}{} -> service {}:{}", s.host, s.path, s.backend_service, s.backend_port);
        }
        Output::Json if model => println!("{}", serde_json::to_string_pretty(&derived)?),
        Output::Yaml if model => print!("{}", serde_yaml::to_string(&derived)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(&ingress_from_derived(&derived))?),
        Output::Yaml => print!("{}", serde_yaml::to_string(&ingress_from_derived(&derived))?),
    }
    Ok(())
}
