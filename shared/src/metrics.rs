//! Metric entity and the time-series store interface.
//!
//! `MetricFilter::query_string` is the byte-for-byte deterministic query
//! renderer; the field-map shape follows
//! `RawMetricData`/`AggregatedMetrics`, generalized to string-keyed
//! `fields`/`tags` maps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One time-series data point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub bucket: String,
    pub measurement: String,
    #[serde(default)]
    pub fields: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Metric {
    pub fn new(bucket: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            measurement: measurement.into(),
            fields: BTreeMap::new(),
            tags: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Selects a slice of the time-series store. `since` is a relative
/// duration string such as `-600s` (600 seconds before now).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricFilter {
    pub bucket: String,
    pub measurement: String,
    pub since: String,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub detector_id: Option<String>,
}

impl MetricFilter {
    /// Byte-for-byte deterministic query-string rendering:
    /// identical filter field values always render identically, field
    /// order is fixed, and absent optional tags are simply omitted.
    pub fn query_string(&self) -> String {
        let mut parts = vec![
            format!("bucket={}", self.bucket),
            format!("measurement={}", self.measurement),
            format!("since={}", self.since),
        ];
        if let Some(host_id) = &self.host_id {
            parts.push(format!("host_id={host_id}"));
        }
        if let Some(detector_id) = &self.detector_id {
            parts.push(format!("detector_id={detector_id}"));
        }
        parts.join("&")
    }
}

/// A single point returned by a time-series read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub time: chrono::DateTime<chrono::Utc>,
    pub fields: BTreeMap<String, f64>,
}

/// Out-of-scope external collaborator: writes and reads
/// time-series points. Consumed only; no concrete durable implementation
/// ships in this repository.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn write(&self, metric: Metric) -> crate::Result<()>;
    async fn read(&self, filter: MetricFilter) -> crate::Result<Vec<MetricPoint>>;
}

/// In-memory store sufficient to exercise the scheduler and result
/// pipeline in tests and the demo binary; not a production time-series
/// engine.
#[derive(Default)]
pub struct InMemoryTimeSeriesStore {
    points: tokio::sync::RwLock<Vec<Metric>>,
}

impl InMemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryTimeSeriesStore {
    async fn write(&self, metric: Metric) -> crate::Result<()> {
        self.points.write().await.push(metric);
        Ok(())
    }

    async fn read(&self, filter: MetricFilter) -> crate::Result<Vec<MetricPoint>> {
        let points = self.points.read().await;
        let mut matched: Vec<MetricPoint> = points
            .iter()
            .filter(|m| m.bucket == filter.bucket && m.measurement == filter.measurement)
            .filter(|m| {
                filter
                    .host_id
                    .as_ref()
                    .map(|h| m.tags.get("host_id") == Some(h))
                    .unwrap_or(true)
            })
            .filter(|m| {
                filter
                    .detector_id
                    .as_ref()
                    .map(|d| m.tags.get("detector_id") == Some(d))
                    .unwrap_or(true)
            })
            .map(|m| MetricPoint {
                time: m.timestamp,
                fields: m.fields.clone(),
            })
            .collect();
        matched.sort_by_key(|p| p.time);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_is_deterministic_for_equal_filters() {
        let a = MetricFilter {
            bucket: "host_metrics".into(),
            measurement: "http".into(),
            since: "-600s".into(),
            host_id: Some("h1".into()),
            detector_id: Some("d1".into()),
        };
        let b = a.clone();
        assert_eq!(a.query_string(), b.query_string());
        assert_eq!(
            a.query_string(),
            "bucket=host_metrics&measurement=http&since=-600s&host_id=h1&detector_id=d1"
        );
    }

    #[test]
    fn query_string_omits_absent_tags() {
        let f = MetricFilter {
            bucket: "b".into(),
            measurement: "m".into(),
            since: "-60s".into(),
            host_id: None,
            detector_id: None,
        };
        assert_eq!(f.query_string(), "bucket=b&measurement=m&since=-60s");
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_a_write() {
        let store = InMemoryTimeSeriesStore::new();
        let metric = Metric::new("host_metrics", "http")
            .with_field("response_time", 12.5)
            .with_tag("host_id", "h1")
            .with_tag("detector_id", "d1");
        store.write(metric).await.unwrap();

        let points = store
            .read(MetricFilter {
                bucket: "host_metrics".into(),
                measurement: "http".into(),
                since: "-600s".into(),
                host_id: Some("h1".into()),
                detector_id: None,
            })
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].fields.get("response_time"), Some(&12.5));
    }
}
