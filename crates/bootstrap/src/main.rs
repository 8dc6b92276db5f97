//! Swarm bootstrap - moves a Swarm cluster onto Consul discovery
//!
//! This binary runs once against a temporary Swarm manager. It starts a
//! Consul instance on every node the manager sees, re-registers the nodes'
//! Swarm agents against Consul and promotes a permanent manager.

use anyhow::{bail, Context, Result};
use bootstrap_lib::docker::DockerApiClient;
use bootstrap_lib::membership::DriverStatusMembership;
use bootstrap_lib::{
    BootstrapMetrics, BootstrapOrchestrator, BootstrapReport, ContainerProvisioner, ServerSet,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

/// Bootstrap a Consul-backed Swarm cluster from a temporary Swarm manager
#[derive(Parser)]
#[command(name = "swarm-bootstrap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Docker API endpoint of the temporary Swarm manager
    #[arg(long, env = "DOCKER_HOST", default_value = "http://127.0.0.1:3376")]
    pub docker_host: String,

    /// Addresses of the nodes that run Consul as servers (comma separated)
    #[arg(long, env = "CONSUL_SERVERS", required = true, value_delimiter = ',')]
    pub consul_servers: Vec<String>,

    /// Publish the permanent manager's port on its host
    #[arg(long)]
    pub public_manager: bool,

    /// Do not fail when the temporary manager reports no nodes
    #[arg(long)]
    pub allow_empty: bool,

    /// Timeout for each container API request, in seconds
    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Settings file with image and container names
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
    }
}

fn log_report(report: &BootstrapReport) {
    for outcome in &report.nodes {
        match &outcome.error {
            None => info!(
                node = %outcome.node.name,
                role = ?outcome.role,
                consul = ?outcome.discovery.as_ref().map(|d| d.id.as_str()),
                agent = ?outcome.agent_container,
                "Node bootstrapped"
            ),
            Some(e) => error!(node = %outcome.node.name, error = %e, "Node bootstrap failed"),
        }
    }
    match &report.manager {
        Ok(id) => info!(container_id = %id, "Permanent Swarm manager running"),
        Err(e) => error!(error = %e, "Permanent Swarm manager not started"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting swarm-bootstrap");

    let mut settings = config::load_settings(cli.config.as_deref())?;
    settings.bind_manager_port |= cli.public_manager;
    settings.require_nodes = !cli.allow_empty;

    let servers = ServerSet::new(&cli.consul_servers);
    if servers.is_empty() {
        bail!("At least one Consul server address is required");
    }
    info!(
        docker_host = %cli.docker_host,
        consul_servers = ?cli.consul_servers,
        temporary_manager = %settings.temporary_manager,
        "Bootstrap configured"
    );

    let client = DockerApiClient::new(
        &cli.docker_host,
        Duration::from_secs(cli.request_timeout_secs),
    )
    .context("Failed to create container API client")?;
    let api = Arc::new(client);

    let membership = Arc::new(DriverStatusMembership::new(
        api.clone(),
        settings.temporary_manager.clone(),
    ));
    let orchestrator =
        BootstrapOrchestrator::new(membership, ContainerProvisioner::new(api), servers, settings);

    let result = orchestrator.run().await;

    if let Some(path) = &cli.metrics_file {
        let text = BootstrapMetrics::new()
            .render()
            .context("Failed to render metrics")?;
        if let Err(e) = std::fs::write(path, text) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics file");
        }
    }

    let report = result.context("Bootstrap aborted before provisioning")?;
    log_report(&report);

    if report.nodes.is_empty() {
        warn!("No nodes discovered, nothing to bootstrap");
        return Ok(());
    }
    if !report.is_complete() {
        bail!(
            "Bootstrap incomplete: {} of {} nodes failed, manager {}",
            report.failed_nodes().count(),
            report.nodes.len(),
            if report.manager.is_ok() { "running" } else { "not started" }
        );
    }

    info!(
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Bootstrap complete, the temporary manager can be removed"
    );
    Ok(())
}
