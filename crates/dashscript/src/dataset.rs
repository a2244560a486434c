//! Dataset snapshots handed to script runs.
//!
//! A [`DatasetSnapshot`] is an owned, point-in-time copy of every connected
//! channel's records. The host pulls a fresh one from a [`SnapshotProvider`]
//! for each run and the engine materializes it into brand-new script
//! objects, so nothing a script does to `dataset` can reach the provider.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A connected data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Commerce platform daily records (revenue, orders, AOV, ...).
    Shopify,
    /// Ad platform A.
    Meta,
    /// Ad platform B.
    Google,
    /// Email marketing.
    Klaviyo,
    /// Web analytics.
    Ga4,
}

impl Channel {
    /// Every channel, in the order they appear on `dataset`.
    pub const ALL: [Channel; 5] = [
        Channel::Shopify,
        Channel::Meta,
        Channel::Google,
        Channel::Klaviyo,
        Channel::Ga4,
    ];

    /// Property name on the script's `dataset` object.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Channel::Shopify => "shopify",
            Channel::Meta => "meta",
            Channel::Google => "google",
            Channel::Klaviyo => "klaviyo",
            Channel::Ga4 => "ga4",
        }
    }

    /// Parse a channel name (case-insensitive).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of the analytics dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    /// Records per channel. Missing channels are exposed as empty arrays.
    #[serde(default)]
    pub channels: BTreeMap<Channel, Vec<Value>>,
    /// Filter state the data was selected under (date range, store, ...).
    #[serde(default = "empty_object")]
    pub filters: Value,
    /// When the snapshot was taken.
    #[serde(default = "Utc::now")]
    pub taken_at: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Default for DatasetSnapshot {
    fn default() -> Self {
        Self {
            channels: BTreeMap::new(),
            filters: empty_object(),
            taken_at: Utc::now(),
        }
    }
}

impl DatasetSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the records for one channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel, records: Vec<Value>) -> Self {
        self.channels.insert(channel, records);
        self
    }

    /// Set the filter state.
    #[must_use]
    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = filters;
        self
    }

    /// Records for one channel (empty if the channel is not connected).
    #[must_use]
    pub fn records(&self, channel: Channel) -> &[Value] {
        self.channels.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The value bound to `dataset` in the script: one array per channel,
    /// always including every channel.
    #[must_use]
    pub fn to_script_value(&self) -> Value {
        let object = Channel::ALL
            .into_iter()
            .map(|channel| {
                (
                    channel.as_str().to_string(),
                    Value::Array(self.records(channel).to_vec()),
                )
            })
            .collect::<Map<_, _>>();
        Value::Object(object)
    }

    /// Total number of records across channels.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }
}

/// Supplies the live dataset on demand.
///
/// Filtering and normalization happen upstream; implementations return what
/// the dashboard currently shows. Each call must return an independent copy.
pub trait SnapshotProvider: Send + Sync {
    /// Take a snapshot of the current data.
    fn snapshot(&self) -> DatasetSnapshot;
}

/// In-memory provider holding the dashboard's current data.
#[derive(Debug, Default)]
pub struct InMemoryDataset {
    live: RwLock<DatasetSnapshot>,
}

impl InMemoryDataset {
    /// Create a provider seeded with `initial`.
    #[must_use]
    pub fn new(initial: DatasetSnapshot) -> Self {
        Self {
            live: RwLock::new(initial),
        }
    }

    /// Replace one channel's live records.
    pub fn set_channel(&self, channel: Channel, records: Vec<Value>) {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        live.channels.insert(channel, records);
    }

    /// Replace the live filter state.
    pub fn set_filters(&self, filters: Value) {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        live.filters = filters;
    }
}

impl SnapshotProvider for InMemoryDataset {
    fn snapshot(&self) -> DatasetSnapshot {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        DatasetSnapshot {
            taken_at: Utc::now(),
            ..live.clone()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_value_has_every_channel() {
        let snapshot =
            DatasetSnapshot::new().with_channel(Channel::Shopify, vec![json!({"revenue": 10})]);
        let value = snapshot.to_script_value();

        for channel in Channel::ALL {
            assert!(value.get(channel.as_str()).is_some_and(Value::is_array));
        }
        assert_eq!(value["shopify"][0]["revenue"], json!(10));
        assert_eq!(value["meta"], json!([]));
    }

    #[test]
    fn channel_parse_is_case_insensitive() {
        assert_eq!(Channel::parse("GA4"), Some(Channel::Ga4));
        assert_eq!(Channel::parse("Klaviyo"), Some(Channel::Klaviyo));
        assert_eq!(Channel::parse("tiktok"), None);
    }

    #[test]
    fn provider_snapshots_are_independent_copies() {
        let provider = InMemoryDataset::new(
            DatasetSnapshot::new().with_channel(Channel::Meta, vec![json!({"spend": 5})]),
        );

        let mut first = provider.snapshot();
        first.channels.insert(Channel::Meta, vec![]);

        let second = provider.snapshot();
        assert_eq!(second.records(Channel::Meta), &[json!({"spend": 5})]);
    }

    #[test]
    fn snapshot_deserializes_with_defaults() {
        let snapshot: DatasetSnapshot =
            serde_json::from_value(json!({"channels": {"google": [{"clicks": 3}]}})).unwrap();
        assert_eq!(snapshot.records(Channel::Google).len(), 1);
        assert_eq!(snapshot.filters, json!({}));
        assert_eq!(snapshot.record_count(), 1);
    }
}
