//! Scrape pipeline: list channels, then query media statistics of every
//! channel concurrently and publish them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::channel::{ChannelSnapshot, media_stats_command, parse_media_stats};
use super::classifier::{ChannelCategory, classify};
use super::metrics::{ChannelLabels, ExporterMetrics};
use crate::errors::{MetricsResult, ScrapeError};
use crate::esl::CommandExecutor;

pub const LIST_CHANNELS_COMMAND: &str = "show channels as json";

/// Placeholder used in logs when a failing channel has no usable uuid
const UNKNOWN_UUID: &str = "*Unknown*";

/// Result of one channel's stats lookup
#[derive(Debug)]
pub enum ChannelOutcome {
    Success {
        uuid: String,
        category: ChannelCategory,
        metrics: HashMap<String, f64>,
    },
    Failed {
        uuid: String,
        reason: ScrapeError,
    },
}

impl ChannelOutcome {
    pub fn uuid(&self) -> &str {
        match self {
            ChannelOutcome::Success { uuid, .. } | ChannelOutcome::Failed { uuid, .. } => uuid,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChannelOutcome::Success { .. })
    }
}

/// Verdict of one scrape pass
#[derive(Debug)]
pub struct ScrapeReport {
    /// Why the channel listing failed; `None` when it succeeded
    pub listing_error: Option<ScrapeError>,
    pub channels: Vec<ChannelOutcome>,
    pub duration: Duration,
}

impl ScrapeReport {
    pub fn is_success(&self) -> bool {
        self.listing_error.is_none()
    }

    pub fn failed_channels(&self) -> usize {
        self.channels.iter().filter(|outcome| !outcome.is_success()).count()
    }
}

pub struct ScrapeOrchestrator<E> {
    executor: E,
    metrics: Arc<ExporterMetrics>,
    /// Held for a whole pass so overlapping scrapes never interleave their
    /// reset and writes
    pass: Mutex<()>,
}

impl<E: CommandExecutor> ScrapeOrchestrator<E> {
    pub fn new(executor: E, metrics: Arc<ExporterMetrics>) -> Self {
        Self {
            executor,
            metrics,
            pass: Mutex::new(()),
        }
    }

    pub fn metrics(&self) -> &Arc<ExporterMetrics> {
        &self.metrics
    }

    /// Run one scrape pass. Never fails: the outcome is recorded in the
    /// metrics (`scrape_status`) and returned as a report.
    pub async fn collect(&self) -> ScrapeReport {
        let _pass = self.pass.lock().await;
        self.run_pass().await
    }

    /// Run one scrape pass and encode the result before another pass can
    /// start.
    pub async fn collect_and_render(&self) -> MetricsResult<String> {
        let _pass = self.pass.lock().await;
        self.run_pass().await;
        self.metrics.render()
    }

    async fn run_pass(&self) -> ScrapeReport {
        let started = Instant::now();

        let snapshots = match self.list_channels().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!(error = %e, "Scrape failed");
                self.metrics.set_scrape_status(false);
                return ScrapeReport {
                    listing_error: Some(e),
                    channels: Vec::new(),
                    duration: started.elapsed(),
                };
            }
        };

        self.metrics.reset_channel_metrics();

        let channels = join_all(snapshots.iter().map(|snapshot| self.collect_channel(snapshot))).await;
        self.metrics.set_scrape_status(true);

        let report = ScrapeReport {
            listing_error: None,
            channels,
            duration: started.elapsed(),
        };
        info!(
            channels = report.channels.len(),
            failed = report.failed_channels(),
            duration = ?report.duration,
            "Scrape completed"
        );
        report
    }

    async fn list_channels(&self) -> Result<Vec<ChannelSnapshot>, ScrapeError> {
        let reply = self
            .executor
            .execute_command(LIST_CHANNELS_COMMAND)
            .await
            .map_err(ScrapeError::Listing)?;
        ChannelSnapshot::parse_listing(reply.body())
    }

    async fn collect_channel(&self, snapshot: &ChannelSnapshot) -> ChannelOutcome {
        let category = classify(&snapshot.cid_num, &snapshot.presence_data);

        match self.query_media_stats(&snapshot.uuid).await {
            Ok(stats) => {
                let labels = ChannelLabels {
                    uuid: &snapshot.uuid,
                    dest: &snapshot.dest,
                    callstate: &snapshot.callstate,
                    category,
                };
                self.metrics.increment_channel_count(&labels);

                let mut metrics = HashMap::new();
                for (key, value) in stats {
                    if self.metrics.set_channel_metric(&key, value, &labels) {
                        metrics.insert(key, value);
                    }
                }
                debug!(
                    uuid = %snapshot.uuid,
                    category = %category,
                    written = metrics.len(),
                    "Collected media stats"
                );

                ChannelOutcome::Success {
                    uuid: snapshot.uuid.clone(),
                    category,
                    metrics,
                }
            }
            Err(reason) => {
                let uuid = if snapshot.uuid.is_empty() {
                    UNKNOWN_UUID
                } else {
                    snapshot.uuid.as_str()
                };
                warn!(uuid = %uuid, error = %reason, "mediaStats failed");
                ChannelOutcome::Failed {
                    uuid: uuid.to_string(),
                    reason,
                }
            }
        }
    }

    async fn query_media_stats(&self, uuid: &str) -> Result<HashMap<String, f64>, ScrapeError> {
        let reply = self
            .executor
            .execute_command(&media_stats_command(uuid))
            .await
            .map_err(ScrapeError::Stats)?;
        parse_media_stats(reply.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EslError, EslResult};
    use crate::esl::EslMessage;
    use crate::exporter::LabelFilter;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tracing_test::traced_test;

    /// Answers commands from a fixed table and records what was asked
    #[derive(Default)]
    struct FakeExecutor {
        listing: Option<String>,
        stats: HashMap<String, String>,
        stats_delay: Duration,
        commands: StdMutex<Vec<String>>,
    }

    impl FakeExecutor {
        fn listing(mut self, body: &str) -> Self {
            self.listing = Some(body.to_string());
            self
        }

        fn stats(mut self, uuid: &str, body: &str) -> Self {
            self.stats.insert(uuid.to_string(), body.to_string());
            self
        }

        fn stats_delay(mut self, delay: Duration) -> Self {
            self.stats_delay = delay;
            self
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    fn api_response(body: &str) -> EslMessage {
        let headers = HashMap::from([(
            "Content-Type".to_string(),
            "api/response".to_string(),
        )]);
        EslMessage::new(headers, Some(body.to_string()))
    }

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn execute_command(&self, command: &str) -> EslResult<EslMessage> {
            self.commands.lock().unwrap().push(command.to_string());

            if command == LIST_CHANNELS_COMMAND {
                return match &self.listing {
                    Some(body) => Ok(api_response(body)),
                    None => Err(EslError::not_connected(command)),
                };
            }
            tokio::time::sleep(self.stats_delay).await;

            let uuid = self
                .stats
                .keys()
                .find(|uuid| command.contains(uuid.as_str()))
                .cloned();
            match uuid.and_then(|uuid| self.stats.get(&uuid)) {
                Some(body) => Ok(api_response(body)),
                None => Err(EslError::Command {
                    command: command.to_string(),
                    reply: "-ERR no such channel".to_string(),
                }),
            }
        }
    }

    fn stats_body(mos: f64) -> String {
        format!(r#"{{"response":{{"audio":{{"in_mos":{mos},"in_raw_bytes":1000}}}}}}"#)
    }

    fn orchestrator(executor: FakeExecutor) -> ScrapeOrchestrator<FakeExecutor> {
        let metrics = Arc::new(ExporterMetrics::new(&LabelFilter::default()).unwrap());
        ScrapeOrchestrator::new(executor, metrics)
    }

    const TWO_CHANNELS: &str = r#"{"row_count":2,"rows":[
        {"uuid":"u1","dest":"72013","callstate":"ACTIVE","cid_num":"w_1-bbbID-Ann","presence_data":"from_bbb-webrtc-sfu"},
        {"uuid":"u2","dest":"72013","callstate":"ACTIVE","cid_num":"GLOBAL_AUDIO_72013","presence_data":""}
    ]}"#;

    #[tokio::test]
    async fn test_two_channel_scrape() {
        let executor = FakeExecutor::default()
            .listing(TWO_CHANNELS)
            .stats("u1", &stats_body(4.2))
            .stats("u2", &stats_body(4.4));
        let orchestrator = orchestrator(executor);

        let report = orchestrator.collect().await;
        assert!(report.is_success());
        assert_eq!(report.channels.len(), 2);
        assert_eq!(report.failed_channels(), 0);

        let output = orchestrator.metrics().render().unwrap();
        assert!(output.contains(
            r#"bbb_fs_in_quality_mos{bbbChannelType="sfu-sendrecv",callstate="ACTIVE",dest="72013",uuid="u1"} 4.2"#
        ));
        assert!(output.contains(
            r#"bbb_fs_audio_channels{bbbChannelType="sfu-sendrecv",callstate="ACTIVE"} 1"#
        ));
        assert!(output.contains(
            r#"bbb_fs_audio_channels{bbbChannelType="sfu-global-audio",callstate="ACTIVE"} 1"#
        ));
        assert!(output.contains("bbb_fs_scrape_status 1"));
    }

    #[tokio::test]
    async fn test_listing_failure_keeps_previous_values() {
        let executor = FakeExecutor::default()
            .listing(TWO_CHANNELS)
            .stats("u1", &stats_body(4.2))
            .stats("u2", &stats_body(4.4));
        let orchestrator = orchestrator(executor);
        orchestrator.collect().await;
        let before = orchestrator.metrics().render().unwrap();

        let failing = ScrapeOrchestrator::new(FakeExecutor::default(), Arc::clone(orchestrator.metrics()));
        let report = failing.collect().await;

        assert!(matches!(report.listing_error, Some(ScrapeError::Listing(_))));
        assert!(report.channels.is_empty());
        assert_eq!(failing.executor.commands(), vec![LIST_CHANNELS_COMMAND.to_string()]);

        let after = orchestrator.metrics().render().unwrap();
        assert_eq!(
            after.replace("bbb_fs_scrape_status 0", "bbb_fs_scrape_status 1"),
            before
        );
        assert_eq!(orchestrator.metrics().scrape_status(), 0.0);
    }

    #[tokio::test]
    async fn test_unparseable_listing_is_a_failure() {
        let orchestrator = orchestrator(FakeExecutor::default().listing("not json"));
        let report = orchestrator.collect().await;

        assert!(matches!(report.listing_error, Some(ScrapeError::ListingParse(_))));
        assert_eq!(orchestrator.metrics().scrape_status(), 0.0);
    }

    #[tokio::test]
    async fn test_one_failing_channel_is_isolated() {
        let listing = r#"{"rows":[
            {"uuid":"u1","dest":"1","callstate":"ACTIVE","cid_num":"a-bbbID-x"},
            {"uuid":"u2","dest":"1","callstate":"ACTIVE","cid_num":"b-bbbID-y"},
            {"uuid":"u3","dest":"1","callstate":"ACTIVE","cid_num":"c-bbbID-z"}
        ]}"#;
        let executor = FakeExecutor::default()
            .listing(listing)
            .stats("u1", &stats_body(4.1))
            .stats("u3", &stats_body(4.3));
        let orchestrator = orchestrator(executor);

        let report = orchestrator.collect().await;
        assert!(report.is_success());
        assert_eq!(report.failed_channels(), 1);
        let failed: Vec<_> = report
            .channels
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(ChannelOutcome::uuid)
            .collect();
        assert_eq!(failed, vec!["u2"]);

        let output = orchestrator.metrics().render().unwrap();
        assert!(output.contains(r#"uuid="u1"} 4.1"#));
        assert!(output.contains(r#"uuid="u3"} 4.3"#));
        assert!(!output.contains(r#"uuid="u2""#));
        assert!(output.contains(r#"bbb_fs_audio_channels{bbbChannelType="fs-sendrecv",callstate="ACTIVE"} 2"#));
        assert!(output.contains("bbb_fs_scrape_status 1"));
    }

    #[tokio::test]
    async fn test_vanished_channels_are_cleared() {
        let executor = FakeExecutor::default()
            .listing(TWO_CHANNELS)
            .stats("u1", &stats_body(4.2))
            .stats("u2", &stats_body(4.4));
        let orchestrator = orchestrator(executor);
        orchestrator.collect().await;

        let empty = ScrapeOrchestrator::new(
            FakeExecutor::default().listing(r#"{"row_count":0}"#),
            Arc::clone(orchestrator.metrics()),
        );
        let report = empty.collect().await;
        assert!(report.is_success());

        let output = orchestrator.metrics().render().unwrap();
        assert!(!output.contains("uuid="));
        assert!(!output.contains("bbb_fs_audio_channels{"));
        assert!(output.contains("bbb_fs_scrape_status 1"));
    }

    #[tokio::test]
    async fn test_rows_without_uuid_are_not_queried() {
        let listing = r#"{"rows":[{"dest":"1","callstate":"ACTIVE"},{"uuid":"u1","callstate":"ACTIVE"}]}"#;
        let executor = FakeExecutor::default()
            .listing(listing)
            .stats("u1", &stats_body(3.0));
        let orchestrator = orchestrator(executor);

        let report = orchestrator.collect().await;
        assert_eq!(report.channels.len(), 1);
        assert_eq!(orchestrator.executor.commands().len(), 2);
        assert_eq!(
            orchestrator.executor.commands()[1],
            r#"json {"command":"mediaStats","data":{"uuid":"u1"}}"#
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_completed_scrape_logs_full_duration() {
        let executor = FakeExecutor::default()
            .listing(r#"{"rows":[{"uuid":"u1","dest":"1","callstate":"ACTIVE"}]}"#)
            .stats("u1", &stats_body(4.0))
            .stats_delay(Duration::from_millis(5));
        let report = orchestrator(executor).collect().await;

        assert!(report.duration >= Duration::from_millis(5));
        assert!(logs_contain("Scrape completed"));
        assert!(logs_contain("duration="));
        assert!(logs_contain("ms"));
    }

    #[tokio::test]
    async fn test_overlapping_scrapes_do_not_double_count() {
        let listing = r#"{"rows":[{"uuid":"u1","dest":"1","callstate":"ACTIVE","cid_num":"a-bbbID-x"}]}"#;
        let executor = FakeExecutor::default()
            .listing(listing)
            .stats("u1", &stats_body(4.0))
            .stats_delay(Duration::from_millis(50));
        let orchestrator = orchestrator(executor);

        let (first, second) = tokio::join!(orchestrator.collect(), orchestrator.collect());
        assert!(first.is_success() && second.is_success());

        let output = orchestrator.metrics().render().unwrap();
        assert!(
            output.contains(r#"bbb_fs_audio_channels{bbbChannelType="fs-sendrecv",callstate="ACTIVE"} 1"#),
            "{output}"
        );
    }

    #[tokio::test]
    async fn test_overlapping_renders_see_complete_passes() {
        let executor = FakeExecutor::default()
            .listing(TWO_CHANNELS)
            .stats("u1", &stats_body(4.2))
            .stats("u2", &stats_body(4.4))
            .stats_delay(Duration::from_millis(50));
        let orchestrator = orchestrator(executor);

        let (first, second) = tokio::join!(
            orchestrator.collect_and_render(),
            orchestrator.collect_and_render()
        );
        for output in [first.unwrap(), second.unwrap()] {
            assert!(output.contains(
                r#"bbb_fs_audio_channels{bbbChannelType="sfu-sendrecv",callstate="ACTIVE"} 1"#
            ));
            assert!(output.contains(r#"uuid="u2"} 4.4"#));
        }
    }
}
