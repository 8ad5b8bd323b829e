//! Feature-set - schema of entity and feature columns

use super::{Entity, EntityKind, Labels};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State assigned when a status mapping carries none.
pub const DEFAULT_FEATURE_SET_STATE: &str = "created";

/// A named, typed column of a feature-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    /// Column name
    pub name: String,
    /// Value type (e.g., "int", "float", "str")
    pub value_type: String,
}

impl Feature {
    /// Create a feature column.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
        }
    }
}

/// Feature-set status.
///
/// The status is a free-form mapping with a required `state` entry. `state`
/// is held as a typed field and flattened back into the mapping on
/// serialization, so the indexed state and the mapping cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSetStatus {
    state: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for FeatureSetStatus {
    fn default() -> Self {
        Self {
            state: DEFAULT_FEATURE_SET_STATE.to_string(),
            extra: Map::new(),
        }
    }
}

impl FeatureSetStatus {
    /// Build a status from a free-form mapping, extracting `state`.
    ///
    /// A missing or non-string `state` becomes [`DEFAULT_FEATURE_SET_STATE`].
    #[must_use]
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let state = match map.remove("state") {
            Some(Value::String(state)) => state,
            _ => DEFAULT_FEATURE_SET_STATE.to_string(),
        };
        Self { state, extra: map }
    }

    /// The status as a single mapping, `state` included.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert("state".to_string(), Value::String(self.state.clone()));
        map
    }

    /// Get the state.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Get a non-state status entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FeatureSetMetadata {
    name: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    labels: Labels,
    updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct FeatureSetSpec {
    #[serde(default)]
    entities: Vec<Feature>,
    #[serde(default)]
    features: Vec<Feature>,
}

/// Feature-set record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    metadata: FeatureSetMetadata,
    #[serde(default)]
    spec: FeatureSetSpec,
    #[serde(default)]
    status: FeatureSetStatus,
}

impl FeatureSet {
    /// Create an empty feature-set in the default state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: FeatureSetMetadata {
                name: name.into(),
                project: String::new(),
                uid: String::new(),
                labels: Labels::new(),
                updated: None,
            },
            spec: FeatureSetSpec::default(),
            status: FeatureSetStatus::default(),
        }
    }

    /// Create a builder for constructing a feature-set with optional fields.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> FeatureSetBuilder {
        FeatureSetBuilder::new(name)
    }

    /// Get the feature-set name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Get the project namespace.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.metadata.project
    }

    /// Get the version uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    /// Get the labels.
    #[must_use]
    pub const fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    /// Get the last update timestamp.
    #[must_use]
    pub const fn updated(&self) -> Option<DateTime<Utc>> {
        self.metadata.updated
    }

    /// Get the entity (key) columns in order.
    #[must_use]
    pub fn entities(&self) -> &[Feature] {
        &self.spec.entities
    }

    /// Get the feature columns in order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.spec.features
    }

    /// Get the status.
    #[must_use]
    pub const fn status(&self) -> &FeatureSetStatus {
        &self.status
    }

    /// Get the state projected from the status.
    #[must_use]
    pub fn state(&self) -> &str {
        self.status.state()
    }

    /// Replace the status mapping; `state` is re-extracted from it.
    pub fn set_status(&mut self, status: Map<String, Value>) {
        self.status = FeatureSetStatus::from_map(status);
    }

    /// Apply a partial update, producing the content of the next version.
    ///
    /// The uid is cleared so the store assigns a new one.
    #[must_use]
    pub fn patched(&self, update: FeatureSetUpdate) -> Self {
        let mut next = self.clone();
        if let Some(features) = update.features {
            next.spec.features = features;
        }
        if let Some(entities) = update.entities {
            next.spec.entities = entities;
        }
        if let Some(status) = update.status {
            next.set_status(status);
        }
        if let Some(labels) = update.labels {
            next.metadata.labels = labels;
        }
        next.metadata.uid.clear();
        next.metadata.updated = None;
        next
    }

    pub(crate) fn set_identity(&mut self, project: impl Into<String>, uid: impl Into<String>) {
        self.metadata.project = project.into();
        self.metadata.uid = uid.into();
    }

    pub(crate) fn touch(&mut self) {
        if self.metadata.updated.is_none() {
            self.metadata.updated = Some(Utc::now());
        }
    }
}

impl Entity for FeatureSet {
    const KIND: EntityKind = EntityKind::FeatureSet;

    fn project(&self) -> &str {
        Self::project(self)
    }

    fn name(&self) -> &str {
        Self::name(self)
    }

    fn uid(&self) -> &str {
        Self::uid(self)
    }

    fn labels(&self) -> &Labels {
        Self::labels(self)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata.updated
    }

    fn state(&self) -> Option<&str> {
        Some(self.status.state())
    }
}

/// Partial update applied by `patch_feature_set`. `None` keeps the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSetUpdate {
    /// Replacement feature columns
    pub features: Option<Vec<Feature>>,
    /// Replacement entity columns
    pub entities: Option<Vec<Feature>>,
    /// Replacement status mapping
    pub status: Option<Map<String, Value>>,
    /// Replacement labels
    pub labels: Option<Labels>,
}

/// Builder for `FeatureSet`.
#[derive(Debug)]
pub struct FeatureSetBuilder {
    feature_set: FeatureSet,
}

impl FeatureSetBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            feature_set: FeatureSet::new(name),
        }
    }

    /// Append an entity column.
    #[must_use]
    pub fn entity(mut self, name: impl Into<String>, value_type: impl Into<String>) -> Self {
        self.feature_set
            .spec
            .entities
            .push(Feature::new(name, value_type));
        self
    }

    /// Append a feature column.
    #[must_use]
    pub fn feature(mut self, name: impl Into<String>, value_type: impl Into<String>) -> Self {
        self.feature_set
            .spec
            .features
            .push(Feature::new(name, value_type));
        self
    }

    /// Add a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.feature_set
            .metadata
            .labels
            .insert(key.into(), value.into());
        self
    }

    /// Set the status mapping.
    #[must_use]
    pub fn status(mut self, status: Map<String, Value>) -> Self {
        self.feature_set.set_status(status);
        self
    }

    /// Set only the state.
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.feature_set.status.state = state.into();
        self
    }

    /// Set an explicit update timestamp.
    #[must_use]
    pub const fn updated(mut self, updated: DateTime<Utc>) -> Self {
        self.feature_set.metadata.updated = Some(updated);
        self
    }

    /// Build the `FeatureSet`.
    #[must_use]
    pub fn build(self) -> FeatureSet {
        self.feature_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_state_extracted_from_status() {
        let fs = FeatureSet::builder("stocks")
            .status(map(json!({"state": "ready", "stats": {"rows": 10}})))
            .build();
        assert_eq!(fs.state(), "ready");
        assert_eq!(fs.status().get("stats"), Some(&json!({"rows": 10})));
        assert_eq!(fs.status().to_map()["state"], "ready");
    }

    #[test]
    fn test_missing_state_defaults() {
        let status = FeatureSetStatus::from_map(map(json!({"state": 3})));
        assert_eq!(status.state(), DEFAULT_FEATURE_SET_STATE);
    }

    #[test]
    fn test_status_serializes_flat() {
        let fs = FeatureSet::builder("stocks")
            .status(map(json!({"state": "ready", "rows": 10})))
            .build();
        let json = serde_json::to_value(&fs).unwrap();
        assert_eq!(json["status"], json!({"state": "ready", "rows": 10}));
        let back: FeatureSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, fs);
    }

    #[test]
    fn test_patched_clears_uid_and_keeps_columns() {
        let mut fs = FeatureSet::builder("stocks")
            .entity("ticker", "str")
            .feature("price", "float")
            .build();
        fs.set_identity("p", "u1");
        let next = fs.patched(FeatureSetUpdate {
            features: Some(vec![Feature::new("volume", "int")]),
            ..FeatureSetUpdate::default()
        });
        assert_eq!(next.uid(), "");
        assert_eq!(next.entities(), fs.entities());
        assert_eq!(next.features()[0].name, "volume");
    }
}
