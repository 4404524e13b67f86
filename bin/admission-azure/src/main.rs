use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use azure_admission::{handle_request, AdmissionMetrics, ShootMutator, TlsServerConfig, METRICS_PATH, MUTATE_SHOOT_PATH};
use azure_core::ControllerConfig;
use clap::{Parser, ValueEnum};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::tokio::TokioIo;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Mutating admission webhook for Azure shoots
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    bind_address: IpAddr,

    #[arg(long, default_value_t = 10250)]
    port: u16,

    /// PEM certificate chain served to the API server
    #[arg(long, env = "WEBHOOK_TLS_CERT", requires = "tls_key_file")]
    tls_cert_file: Option<PathBuf>,

    /// PEM private key of the certificate
    #[arg(long, env = "WEBHOOK_TLS_KEY", requires = "tls_cert_file")]
    tls_key_file: Option<PathBuf>,

    /// YAML configuration; only the feature gates are used
    #[arg(long, env = "AZURE_CONTROLLER_CONFIG")]
    config: Option<PathBuf>,

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

    info!("Starting admission-azure...");

    let config = match &args.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    info!(
        force_nat_gateway = config.feature_gates.force_nat_gateway,
        "Shoot mutator initialized"
    );
    let metrics = AdmissionMetrics::new()?;
    info!("Metrics collector initialized");
    let mutator = Arc::new(ShootMutator::new(config.feature_gates, metrics));

    let tls_acceptor = match (&args.tls_cert_file, &args.tls_key_file) {
        (Some(cert), Some(key)) => {
            let tls = TlsServerConfig::from_files(cert, key)?;
            info!("TLS configuration loaded from {} and {}", cert.display(), key.display());
            Some(TlsAcceptor::from(tls.config.clone()))
        }
        _ => {
            warn!("TLS not configured - serving plain HTTP, the API server will not call this webhook");
            None
        }
    };

    let addr = SocketAddr::new(args.bind_address, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Webhook listening on {} ({}, {})", addr, MUTATE_SHOOT_PATH, METRICS_PATH);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                info!("Shutdown signal received, exiting...");
                return Ok(());
            }
        };
        let mutator = mutator.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, mutator.clone()));
            let served = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        http1::Builder::new()
                            .serve_connection(TokioIo::new(tls_stream), service)
                            .await
                    }
                    Err(e) => {
                        debug!("TLS handshake with {} failed: {}", peer_addr, e);
                        return;
                    }
                },
                None => {
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                }
            };
            if let Err(e) = served {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }
}
