//! Metric Record - unversioned time-series side-channel

use super::Labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric Record represents a single metric data point.
///
/// Metrics are not versioned entities: they have no uid or tag and are
/// never pruned by the retention engine.
///
/// ## Time-Series Layout
///
/// - `key` selects the series
/// - `labels` narrow a read with label predicates
/// - `timestamp` is the sort key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    key: String,
    value: f64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    labels: Labels,
}

impl MetricRecord {
    /// Create a new metric record with the current timestamp.
    ///
    /// # Arguments
    ///
    /// * `key` - Metric name/key (e.g., "loss", "accuracy")
    /// * `value` - Metric value
    #[must_use]
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: Utc::now(),
            labels: Labels::new(),
        }
    }

    /// Create a builder for constructing a metric record with optional fields.
    #[must_use]
    pub fn builder(key: impl Into<String>, value: f64) -> MetricRecordBuilder {
        MetricRecordBuilder::new(key, value)
    }

    /// Get the metric key/name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the timestamp when the metric was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Get the labels.
    #[must_use]
    pub const fn labels(&self) -> &Labels {
        &self.labels
    }
}

/// Builder for `MetricRecord`.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    key: String,
    value: f64,
    timestamp: DateTime<Utc>,
    labels: Labels,
}

impl MetricRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: Utc::now(),
            labels: Labels::new(),
        }
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the labels.
    #[must_use]
    pub fn labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        MetricRecord {
            key: self.key,
            value: self.value,
            timestamp: self.timestamp,
            labels: self.labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_record_new() {
        let metric = MetricRecord::new("loss", 0.5);
        assert_eq!(metric.key(), "loss");
        assert!((metric.value() - 0.5).abs() < f64::EPSILON);
        assert!(metric.labels().is_empty());
    }

    #[test]
    fn test_metric_record_builder_timestamp() {
        let at = Utc::now() - chrono::Duration::hours(1);
        let metric = MetricRecord::builder("accuracy", 0.9).timestamp(at).build();
        assert_eq!(metric.timestamp(), at);
    }
}
