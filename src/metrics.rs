//! Metric Log - unversioned time-series side-channel
//!
//! Metrics bypass uid/tag versioning entirely: each `store_metric` call
//! appends one [`MetricRecord`] per key, and reads filter by key and label
//! predicates, returning points in timestamp order.

use crate::entity::{LabelPredicate, Labels, MetricRecord};
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Append-only metric storage.
///
/// ## Example
///
/// ```rust
/// use mlmeta::metrics::MetricLog;
/// use std::collections::BTreeMap;
///
/// let log = MetricLog::new();
/// for step in 0..10 {
///     let loss = 1.0 / (f64::from(step) + 1.0);
///     log.append(&BTreeMap::from([("loss".to_string(), loss)]), None, &BTreeMap::new());
/// }
///
/// let curve = log.read(&["loss"], "").unwrap();
/// assert_eq!(curve.len(), 10);
/// ```
#[derive(Debug, Default)]
pub struct MetricLog {
    records: RwLock<Vec<MetricRecord>>,
}

impl MetricLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record per `(key, value)`, all sharing `timestamp`
    /// (now when `None`) and `labels`.
    pub fn append(
        &self,
        key_values: &BTreeMap<String, f64>,
        timestamp: Option<DateTime<Utc>>,
        labels: &Labels,
    ) {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let mut records = self.records.write();
        records.extend(key_values.iter().map(|(key, value)| {
            MetricRecord::builder(key.clone(), *value)
                .timestamp(timestamp)
                .labels(labels.clone())
                .build()
        }));
    }

    /// Records whose key is in `keys` (empty = every key) and whose labels
    /// satisfy the comma-separated predicate list `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for a malformed predicate in `query`.
    pub fn read(&self, keys: &[&str], query: &str) -> Result<Vec<MetricRecord>> {
        let predicates = LabelPredicate::parse_list(query)?;
        let mut metrics: Vec<MetricRecord> = self
            .records
            .read()
            .iter()
            .filter(|m| keys.is_empty() || keys.contains(&m.key()))
            .filter(|m| LabelPredicate::all_match(&predicates, m.labels()))
            .cloned()
            .collect();

        // Stable sort keeps append order for equal timestamps
        metrics.sort_by_key(MetricRecord::timestamp);

        Ok(metrics)
    }

    /// Number of stored points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no point has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use chrono::Duration;

    fn point(key: &str, value: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([(key.to_string(), value)])
    }

    #[test]
    fn test_read_orders_by_timestamp() {
        let log = MetricLog::new();
        let t0 = Utc::now();

        log.append(&point("loss", 0.2), Some(t0 + Duration::seconds(2)), &Labels::new());
        log.append(&point("loss", 0.0), Some(t0), &Labels::new());
        log.append(&point("loss", 0.1), Some(t0 + Duration::seconds(1)), &Labels::new());

        let values: Vec<f64> = log.read(&["loss"], "").unwrap().iter().map(MetricRecord::value).collect();
        assert_eq!(values, vec![0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_read_filters_keys_and_labels() {
        let log = MetricLog::new();
        let prod = Labels::from([("env".to_string(), "prod".to_string())]);
        let both = BTreeMap::from([("loss".to_string(), 0.5), ("acc".to_string(), 0.9)]);

        log.append(&both, None, &prod);
        log.append(&point("loss", 0.7), None, &Labels::new());

        assert_eq!(log.len(), 3);
        assert_eq!(log.read(&[], "").unwrap().len(), 3);
        assert_eq!(log.read(&["loss"], "").unwrap().len(), 2);
        assert_eq!(log.read(&["loss"], "env=prod").unwrap().len(), 1);
        assert_eq!(log.read(&[], "env").unwrap().len(), 2);
        assert!(log.read(&["missing"], "").unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_bad_query() {
        let log = MetricLog::new();
        assert!(matches!(log.read(&[], "=prod"), Err(Error::InvalidFilter(_))));
    }
}
