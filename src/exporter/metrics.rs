//! Prometheus metric set published on the scrape endpoint
//!
//! Every gauge lives in a private [`Registry`] so the exposition contains
//! exactly the exporter's series. Values are point-in-time: per-channel
//! gauges are wiped before each successful scrape writes fresh ones.

use std::collections::{BTreeSet, HashMap};

use prometheus::{Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use super::classifier::ChannelCategory;
use crate::config::defaults::DEFAULT_METRICS_PREFIX;
use crate::errors::MetricsResult;

pub const LABEL_UUID: &str = "uuid";
pub const LABEL_DEST: &str = "dest";
pub const LABEL_CALLSTATE: &str = "callstate";
pub const LABEL_CHANNEL_TYPE: &str = "bbbChannelType";

const CHANNEL_LABELS: [&str; 4] = [LABEL_UUID, LABEL_DEST, LABEL_CALLSTATE, LABEL_CHANNEL_TYPE];
const COUNT_LABELS: [&str; 2] = [LABEL_CALLSTATE, LABEL_CHANNEL_TYPE];

/// `mediaStats` audio keys exported as per-channel gauges: (key, metric
/// name without prefix, help)
pub const CHANNEL_METRICS: &[(&str, &str, &str)] = &[
    ("in_mos", "in_quality_mos", "Mean opinion score (MOS) of the audio quality"),
    ("in_quality_percentage", "in_quality_percentage", "Percentage of audio quality"),
    ("in_flaw_total", "in_flaw_total", "Total number of inbound flaws"),
    (
        "in_mean_interval",
        "in_mean_interval_ms",
        "Mean interval between inbound packets ~ ptime (ms)",
    ),
    ("in_largest_jb_size", "in_largest_jb_size_bytes", "Largest jitterbuffer size in bytes"),
    ("in_jitter_min_variance", "in_jitter_min_variance_ms", "Min jitter (ms)"),
    ("in_jitter_max_variance", "in_jitter_max_variance_ms", "Max jitter (ms)"),
    ("in_jitter_loss_rate", "in_jitter_loss_rate", "Packet loss rate"),
    ("in_jitter_burst_rate", "in_jitter_burst_rate", "Packet burst rate"),
    (
        "in_jitter_packet_count",
        "in_jitter_packets_total",
        "Total number of packets read from jitterbuffer",
    ),
    (
        "in_flush_packet_count",
        "in_flush_packets_total",
        "Total number of buffered inbound packets flushed by FreeSWITCH",
    ),
    (
        "in_skip_packet_count",
        "in_skip_packets_total",
        "Total skipped inbound audio packets (usually due to CNG)",
    ),
    ("in_raw_bytes", "in_raw_bytes_total", "Total number of bytes received (raw)"),
    ("out_raw_bytes", "out_raw_bytes_total", "Total number of bytes sent (raw)"),
    ("in_media_bytes", "in_media_bytes_total", "Total number of media-only bytes received"),
    ("out_media_bytes", "out_media_bytes_total", "Total number of media-only bytes sent"),
    ("rtcp_octet_count", "rtcp_audio_octets_total", "Total number of RTCP octets/bytes"),
    (
        "in_cng_packet_count",
        "in_cng_packets_total",
        "Total number of inbound comfort noise packets (CNG)",
    ),
    (
        "out_cng_packet_count",
        "out_cng_packets_total",
        "Total number of outbound comfort noise packets (CNG)",
    ),
];

/// Label names removed from every emitted series
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    omitted: BTreeSet<String>,
}

impl LabelFilter {
    /// Parse a comma separated list (`"uuid, dest"`). Entries are trimmed
    /// and empty entries ignored.
    pub fn parse(raw: &str) -> Self {
        let omitted = raw
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect();
        Self { omitted }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.omitted.contains(label)
    }

    pub fn is_empty(&self) -> bool {
        self.omitted.is_empty()
    }

    fn retain(&self, labels: &[&'static str]) -> Vec<&'static str> {
        labels
            .iter()
            .copied()
            .filter(|label| !self.contains(label))
            .collect()
    }
}

/// Label values of one channel
#[derive(Debug, Clone)]
pub struct ChannelLabels<'a> {
    pub uuid: &'a str,
    pub dest: &'a str,
    pub callstate: &'a str,
    pub category: ChannelCategory,
}

impl ChannelLabels<'_> {
    fn value(&self, label: &str) -> &str {
        match label {
            LABEL_UUID => self.uuid,
            LABEL_DEST => self.dest,
            LABEL_CALLSTATE => self.callstate,
            LABEL_CHANNEL_TYPE => self.category.as_str(),
            _ => "",
        }
    }

    fn values_for(&self, labels: &[&'static str]) -> Vec<&str> {
        labels.iter().map(|label| self.value(label)).collect()
    }
}

pub struct ExporterMetrics {
    registry: Registry,
    audio_channels: GaugeVec,
    scrape_status: Gauge,
    channel_gauges: HashMap<&'static str, GaugeVec>,
    channel_labels: Vec<&'static str>,
    count_labels: Vec<&'static str>,
}

impl ExporterMetrics {
    pub fn new(filter: &LabelFilter) -> MetricsResult<Self> {
        Self::with_prefix(DEFAULT_METRICS_PREFIX, filter)
    }

    pub fn with_prefix(prefix: &str, filter: &LabelFilter) -> MetricsResult<Self> {
        let registry = Registry::new();
        let channel_labels = filter.retain(&CHANNEL_LABELS);
        let count_labels = filter.retain(&COUNT_LABELS);

        let audio_channels = GaugeVec::new(
            Opts::new(format!("{prefix}audio_channels"), "Number of audio channels"),
            &count_labels,
        )?;
        registry.register(Box::new(audio_channels.clone()))?;

        let scrape_status = Gauge::with_opts(Opts::new(
            format!("{prefix}scrape_status"),
            "Whether the last scrape reached FreeSWITCH (1) or not (0)",
        ))?;
        registry.register(Box::new(scrape_status.clone()))?;

        let mut channel_gauges = HashMap::with_capacity(CHANNEL_METRICS.len());
        for (key, name, help) in CHANNEL_METRICS {
            let gauge = GaugeVec::new(Opts::new(format!("{prefix}{name}"), *help), &channel_labels)?;
            registry.register(Box::new(gauge.clone()))?;
            channel_gauges.insert(*key, gauge);
        }

        if !filter.is_empty() {
            debug!(
                channel_labels = ?channel_labels,
                count_labels = ?count_labels,
                "Label filter applied to exported series"
            );
        }

        Ok(Self {
            registry,
            audio_channels,
            scrape_status,
            channel_gauges,
            channel_labels,
            count_labels,
        })
    }

    /// Set a per-channel gauge. Unknown keys are ignored; returns whether
    /// a gauge was written.
    pub fn set_channel_metric(&self, key: &str, value: f64, labels: &ChannelLabels<'_>) -> bool {
        let Some(gauge) = self.channel_gauges.get(key) else {
            return false;
        };
        gauge
            .with_label_values(&labels.values_for(&self.channel_labels))
            .set(value);
        true
    }

    pub fn increment_channel_count(&self, labels: &ChannelLabels<'_>) {
        self.audio_channels
            .with_label_values(&labels.values_for(&self.count_labels))
            .inc();
    }

    /// Drop every per-channel series and the channel counts
    pub fn reset_channel_metrics(&self) {
        self.audio_channels.reset();
        for gauge in self.channel_gauges.values() {
            gauge.reset();
        }
    }

    pub fn set_scrape_status(&self, success: bool) {
        self.scrape_status.set(if success { 1.0 } else { 0.0 });
    }

    pub fn scrape_status(&self) -> f64 {
        self.scrape_status.get()
    }

    /// Encode the current values in the Prometheus text format
    pub fn render(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics")
            .field("channel_labels", &self.channel_labels)
            .field("count_labels", &self.count_labels)
            .field("channel_gauges", &self.channel_gauges.len())
            .finish()
    }
}
