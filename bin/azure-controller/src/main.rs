use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use azure_core::{ControllerConfig, ControllerMetrics};
use clap::{Parser, ValueEnum};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod controlplane_controller;
mod infrastructure_controller;
mod metrics_server;
mod operation;

use controlplane_controller::ControlPlaneController;
use infrastructure_controller::InfrastructureController;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Azure provider controllers for Infrastructure and ControlPlane resources
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// YAML controller configuration
    #[arg(long, env = "AZURE_CONTROLLER_CONFIG")]
    config: Option<PathBuf>,

    /// Address serving Prometheus metrics
    #[arg(long, default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting azure-controller...");

    let config = match &args.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load controller config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    info!(
        force_nat_gateway = config.feature_gates.force_nat_gateway,
        disable_remedy_controller = config.feature_gates.disable_remedy_controller,
        concurrent_syncs = config.concurrent_syncs,
        "Controller configuration loaded"
    );

    let client = Client::try_default().await?;
    let shutdown = CancellationToken::new();
    let metrics = ControllerMetrics::new()?;
    info!("Metrics collector initialized");

    let metrics_server = {
        let (metrics, shutdown) = (metrics.clone(), shutdown.clone());
        tokio::spawn(async move {
            if let Err(e) = metrics_server::serve(args.metrics_bind_address, metrics, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        })
    };

    let infrastructure = Arc::new(InfrastructureController::new(
        client.clone(),
        &config,
        metrics.clone(),
        shutdown.clone(),
    ));
    let infrastructure = tokio::spawn(async move {
        if let Err(e) = infrastructure.run().await {
            error!("Infrastructure controller error: {}", e);
        }
    });

    let control_plane = Arc::new(ControlPlaneController::new(client, &config, metrics, shutdown.clone()));
    let control_plane = tokio::spawn(async move {
        if let Err(e) = control_plane.run().await {
            error!("ControlPlane controller error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, waiting for running reconciliations...");
    shutdown.cancel();

    let _ = tokio::join!(infrastructure, control_plane, metrics_server);
    Ok(())
}
