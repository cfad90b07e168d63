use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fs_audio_exporter::{
    config::Config,
    esl::{EslClient, ReconnectSupervisor},
    exporter::{ExporterMetrics, ScrapeOrchestrator},
    observability::{LoggingConfig, init_tracing},
    web::MetricsServer,
};

#[derive(Parser)]
#[command(name = "fs-audio-exporter")]
#[command(version)]
#[command(about = "Prometheus exporter for FreeSWITCH audio quality in BigBlueButton")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// FreeSWITCH Event Socket host
    #[arg(long, value_name = "HOST")]
    esl_host: Option<String>,

    /// FreeSWITCH Event Socket port
    #[arg(long, value_name = "PORT")]
    esl_port: Option<u16>,

    /// Scrape endpoint port
    #[arg(short = 'p', long, value_name = "PORT")]
    metrics_port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.esl_host {
            config.esl.host = host.clone();
        }
        if let Some(port) = self.esl_port {
            config.esl.port = port;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        if self.debug {
            config.debug = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    init_tracing(&LoggingConfig::new(config.debug));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        esl = %config.esl.address(),
        metrics = %format!("{}:{}{}", config.metrics.host, config.metrics.port, config.metrics.path),
        "Starting fs-audio-exporter"
    );

    let client = EslClient::new(&config.esl)?;

    // Listen for connection loss before the first connection attempt
    let supervisor = ReconnectSupervisor::new(client.clone(), config.esl.reconnect_interval()?);
    let supervisor_task = supervisor.spawn(client.connection_signals());

    client.start().await?;

    let metrics = Arc::new(ExporterMetrics::new(&config.metrics.label_filter())?);
    let orchestrator = ScrapeOrchestrator::new(client.clone(), metrics);
    let server = MetricsServer::new(&config.metrics, Arc::new(orchestrator))?;

    let cancel = CancellationToken::new();
    let mut server_task = tokio::spawn(server.serve(cancel.clone()));

    let result = tokio::select! {
        _ = shutdown_signal() => {
            cancel.cancel();
            server_task.await?
        }
        joined = &mut server_task => match joined? {
            Ok(()) => {
                // The endpoint could not bind; keep the ESL side alive until asked to stop.
                shutdown_signal().await;
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = &result {
        error!(error = %e, "Metrics server failed");
    }

    client.stop().await;
    if let Err(e) = supervisor_task.await {
        warn!(error = %e, "Reconnection supervisor ended abnormally");
    }
    info!("fs-audio-exporter stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
