//! Web layer module
//!
//! Serves the Prometheus scrape endpoint. Each GET on the configured path
//! runs one scrape through the injected [`Collector`] and returns the text
//! exposition; everything else is answered without touching FreeSWITCH.

use std::io::ErrorKind;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::MetricsConfig;
use crate::exporter::Collector;

pub mod handlers;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<dyn Collector>,
}

/// Build the router for the scrape endpoint at `path`
pub fn build_router(path: &str, collector: Arc<dyn Collector>) -> Router {
    Router::new()
        .route(
            path,
            get(handlers::scrape_metrics).fallback(handlers::method_not_implemented),
        )
        .fallback(handlers::fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { collector })
}

/// HTTP server exposing the scrape endpoint
pub struct MetricsServer {
    app: Router,
    bind_addr: String,
}

impl MetricsServer {
    pub fn new(config: &MetricsConfig, collector: Arc<dyn Collector>) -> Result<Self> {
        if !config.path.starts_with('/') {
            bail!("metrics path must start with '/': {}", config.path);
        }

        Ok(Self {
            app: build_router(&config.path, collector),
            bind_addr: format!("{}:{}", config.host, config.port),
        })
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Serve until `cancel` fires.
    ///
    /// An address already in use only stops this server; any other bind or
    /// serve failure is returned.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let listener = match TcpListener::bind(&self.bind_addr).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!(
                    address = %self.bind_addr,
                    error = %e,
                    "Metrics address already in use, scrape endpoint disabled"
                );
                return Ok(());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to bind to {}", self.bind_addr));
            }
        };

        info!(address = %self.bind_addr, "Metrics server listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("Metrics server received cancellation signal, shutting down gracefully");
            })
            .await
            .context("Metrics server failed")?;
        Ok(())
    }
}
