//! Prometheus exporter: channel classification, the scrape pipeline and
//! the metric set it writes into.

use async_trait::async_trait;

use crate::errors::MetricsResult;
use crate::esl::CommandExecutor;

pub mod channel;
pub mod classifier;
pub mod metrics;
pub mod scrape;

pub use channel::ChannelSnapshot;
pub use classifier::{ChannelCategory, classify};
pub use metrics::{ExporterMetrics, LabelFilter};
pub use scrape::{ChannelOutcome, ScrapeOrchestrator, ScrapeReport};

/// Produces a fresh text exposition for one scrape request
#[async_trait]
pub trait Collector: Send + Sync {
    async fn scrape(&self) -> MetricsResult<String>;
}

#[async_trait]
impl<E: CommandExecutor> Collector for ScrapeOrchestrator<E> {
    async fn scrape(&self) -> MetricsResult<String> {
        self.collect_and_render().await
    }
}
