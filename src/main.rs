mod collectors;
mod config;
mod controller;
mod error;
mod http;
mod metrics;
mod probes;
mod report;
mod runner;
mod state;

use axum::serve;
use clap::Parser;
use collectors::system::SysinfoHost;
use config::Config;
use controller::{Controller, ControllerOptions, GpuDiscovery};
use metrics::Metrics;
use probes::Probes;
use report::Reporter;
use state::SnapshotStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hoststatd")]
#[command(version, about = "Collects host telemetry and reports it to a collector")]
struct Cli {
    /// Optional YAML config file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Time between dynamic collection cycles, e.g. 5s or 1m.
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,
    /// Custom agent id; a random UUID is used when omitted.
    #[arg(long)]
    id: Option<String>,
    /// Collector endpoint receiving snapshots.
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    listen: Option<String>,
    #[arg(long, value_parser = humantime::parse_duration)]
    collect_timeout: Option<Duration>,
    /// Do not print snapshots to stdout.
    #[arg(long)]
    no_print: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        interval = %humantime::format_duration(cfg.interval),
        url = %cfg.report_url,
        collect_timeout = %humantime::format_duration(cfg.collect_timeout),
        "starting hoststatd"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };
    let store = SnapshotStore::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = cfg.listen.clone().map(|listen| {
        let metrics = metrics.clone();
        let store = store.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, store);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, listen = %addr, "failed to start status server");
                    return;
                }
            };
            info!(listen = %addr, "status server listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "status server error");
            }
        })
    });

    let collector_task = {
        let probes = Probes::new(
            store.clone(),
            Arc::new(SysinfoHost::new()),
            cfg.probe_timings(),
        );
        let reporter = match Reporter::new(cfg.report_url.clone(), cfg.report_timeout, metrics.clone()) {
            Ok(r) => r,
            Err(err) => {
                error!(error = %err, "failed to initialize reporter");
                std::process::exit(1);
            }
        };
        let controller = Controller::new(
            probes,
            store.clone(),
            metrics.clone(),
            Some(reporter),
            ControllerOptions {
                interval: cfg.interval,
                custom_id: cfg.id.clone(),
                gpu: GpuDiscovery::SearchPath,
                print_snapshot: cfg.print_snapshot,
            },
        );
        tokio::spawn(controller.run(shutdown_rx.clone()))
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

fn load_config(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    if let Some(interval) = cli.interval {
        cfg.interval = interval;
    }
    if let Some(id) = &cli.id {
        cfg.id = Some(id.clone());
    }
    if let Some(url) = &cli.url {
        cfg.report_url = url.clone();
    }
    if let Some(listen) = &cli.listen {
        cfg.listen = Some(listen.clone());
    }
    if let Some(timeout) = cli.collect_timeout {
        cfg.collect_timeout = timeout;
    }
    if cli.no_print {
        cfg.print_snapshot = false;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
