//! Parsing of `show channels as json` and `mediaStats` replies

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::ScrapeError;

/// One active call as reported by `show channels`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub uuid: String,
    pub dest: String,
    pub callstate: String,
    pub cid_num: String,
    pub presence_data: String,
}

#[derive(Debug, Deserialize)]
struct ChannelListing {
    #[serde(default)]
    rows: Option<Vec<ChannelRow>>,
}

#[derive(Debug, Deserialize)]
struct ChannelRow {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    dest: Option<String>,
    #[serde(default)]
    callstate: Option<String>,
    #[serde(default)]
    cid_num: Option<String>,
    #[serde(default)]
    presence_data: Option<String>,
}

impl ChannelSnapshot {
    /// Parse the listing body into snapshots.
    ///
    /// An empty table comes back without `rows` (only `row_count: 0`). Rows
    /// without a uuid cannot be queried and are dropped.
    pub fn parse_listing(body: &str) -> Result<Vec<ChannelSnapshot>, ScrapeError> {
        let listing: ChannelListing =
            serde_json::from_str(body.trim()).map_err(ScrapeError::ListingParse)?;

        let rows = listing.rows.unwrap_or_default();
        let total = rows.len();
        let snapshots: Vec<_> = rows.into_iter().filter_map(ChannelRow::into_snapshot).collect();

        if snapshots.len() < total {
            debug!(
                dropped = total - snapshots.len(),
                "Dropped channel rows without uuid"
            );
        }
        Ok(snapshots)
    }
}

impl ChannelRow {
    fn into_snapshot(self) -> Option<ChannelSnapshot> {
        let uuid = self.uuid.filter(|uuid| !uuid.is_empty())?;
        Some(ChannelSnapshot {
            uuid,
            dest: self.dest.unwrap_or_default(),
            callstate: self.callstate.unwrap_or_default(),
            cid_num: self.cid_num.unwrap_or_default(),
            presence_data: self.presence_data.unwrap_or_default(),
        })
    }
}

/// Build the API command querying media statistics of one channel
pub fn media_stats_command(uuid: &str) -> String {
    let request = serde_json::json!({
        "command": "mediaStats",
        "data": { "uuid": uuid },
    });
    format!("json {request}")
}

/// Extract the numeric fields of `response.audio` from a `mediaStats` reply.
///
/// Non-numeric values are skipped. Numbers sent as strings are accepted.
pub fn parse_media_stats(body: &str) -> Result<HashMap<String, f64>, ScrapeError> {
    let reply: Value = serde_json::from_str(body.trim()).map_err(|e| ScrapeError::StatsParse {
        message: e.to_string(),
    })?;

    let audio = reply
        .get("response")
        .and_then(|response| response.get("audio"))
        .and_then(Value::as_object)
        .ok_or_else(|| ScrapeError::StatsParse {
            message: "missing response.audio object".to_string(),
        })?;

    let mut stats = HashMap::with_capacity(audio.len());
    for (key, value) in audio {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match number {
            Some(number) => {
                stats.insert(key.clone(), number);
            }
            None => debug!(key = %key, value = %value, "Ignoring non-numeric media stat"),
        }
    }
    Ok(stats)
}
