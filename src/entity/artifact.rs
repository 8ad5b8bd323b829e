//! Artifact - data produced or consumed by runs

use super::{Entity, EntityKind, Labels};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named input an artifact was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSource {
    /// Source name
    pub name: String,
    /// Source path or URI
    pub path: String,
}

/// Artifact record.
///
/// Identity is `(project, key, tree)`, where `tree` is the version uid
/// (usually the uid of the producing run). Tags are held by the store, not
/// by the record.
///
/// The `hash` field follows the format `algorithm:hex_digest`, e.g.
/// `sha256:e3b0c442...` or `blake3:af1349b9...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    key: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    tree: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    target_path: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    viewer: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    producer: Map<String, Value>,
    #[serde(default)]
    sources: Vec<ArtifactSource>,
    #[serde(default)]
    labels: Labels,
    updated: Option<DateTime<Utc>>,
}

impl Artifact {
    /// Create an artifact record.
    ///
    /// # Arguments
    ///
    /// * `key` - Artifact key (e.g., "model", "dataset")
    /// * `kind` - Artifact kind (e.g., "model", "dataset", "plot")
    #[must_use]
    pub fn new(key: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            project: String::new(),
            tree: String::new(),
            kind: kind.into(),
            target_path: String::new(),
            hash: String::new(),
            viewer: String::new(),
            description: String::new(),
            producer: Map::new(),
            sources: Vec::new(),
            labels: Labels::new(),
            updated: None,
        }
    }

    /// Create a builder for constructing an artifact with optional fields.
    #[must_use]
    pub fn builder(key: impl Into<String>, kind: impl Into<String>) -> ArtifactBuilder {
        ArtifactBuilder::new(key, kind)
    }

    /// Get the artifact key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the project namespace.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Get the tree (version uid).
    #[must_use]
    pub fn tree(&self) -> &str {
        &self.tree
    }

    /// Get the artifact kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Get the target path.
    #[must_use]
    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    /// Get the content hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Get the viewer hint.
    #[must_use]
    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the producer reference.
    #[must_use]
    pub const fn producer(&self) -> &Map<String, Value> {
        &self.producer
    }

    /// Get the source references.
    #[must_use]
    pub fn sources(&self) -> &[ArtifactSource] {
        &self.sources
    }

    /// Get the labels.
    #[must_use]
    pub const fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Get the last update timestamp.
    #[must_use]
    pub const fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub(crate) fn set_identity(&mut self, project: impl Into<String>, tree: impl Into<String>) {
        self.project = project.into();
        self.tree = tree.into();
    }

    pub(crate) fn touch(&mut self) {
        if self.updated.is_none() {
            self.updated = Some(Utc::now());
        }
    }
}

impl Entity for Artifact {
    const KIND: EntityKind = EntityKind::Artifact;

    fn project(&self) -> &str {
        Self::project(self)
    }

    fn name(&self) -> &str {
        &self.key
    }

    fn uid(&self) -> &str {
        &self.tree
    }

    fn labels(&self) -> &Labels {
        Self::labels(self)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    fn state(&self) -> Option<&str> {
        None
    }
}

/// Builder for `Artifact`.
#[derive(Debug)]
pub struct ArtifactBuilder {
    artifact: Artifact,
}

impl ArtifactBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            artifact: Artifact::new(key, kind),
        }
    }

    /// Set the target path.
    #[must_use]
    pub fn target_path(mut self, path: impl Into<String>) -> Self {
        self.artifact.target_path = path.into();
        self
    }

    /// Set the content hash (`algorithm:hex_digest`).
    #[must_use]
    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.artifact.hash = hash.into();
        self
    }

    /// Set the viewer hint.
    #[must_use]
    pub fn viewer(mut self, viewer: impl Into<String>) -> Self {
        self.artifact.viewer = viewer.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.artifact.description = description.into();
        self
    }

    /// Add a producer attribute (e.g., `kind`, `name`, `uri`).
    #[must_use]
    pub fn producer(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.artifact.producer.insert(key.into(), value.into());
        self
    }

    /// Append a source reference.
    #[must_use]
    pub fn source(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.artifact.sources.push(ArtifactSource {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    /// Add a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.artifact.labels.insert(key.into(), value.into());
        self
    }

    /// Set an explicit update timestamp.
    #[must_use]
    pub const fn updated(mut self, updated: DateTime<Utc>) -> Self {
        self.artifact.updated = Some(updated);
        self
    }

    /// Build the `Artifact`.
    #[must_use]
    pub fn build(self) -> Artifact {
        self.artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_new() {
        let artifact = Artifact::new("model", "model");
        assert_eq!(artifact.key(), "model");
        assert_eq!(artifact.tree(), "");
        assert!(artifact.updated().is_none());
        assert_eq!(Entity::state(&artifact), None);
    }

    #[test]
    fn test_artifact_builder() {
        let artifact = Artifact::builder("dataset", "dataset")
            .target_path("s3://bucket/data.parquet")
            .hash("sha256:e3b0c44298fc1c14")
            .producer("kind", "run")
            .producer("name", "prep")
            .source("raw", "s3://bucket/raw.csv")
            .label("stage", "clean")
            .build();
        assert!(artifact.hash().starts_with("sha256:"));
        assert_eq!(artifact.producer().len(), 2);
        assert_eq!(artifact.sources()[0].name, "raw");
        assert_eq!(artifact.labels().get("stage").map(String::as_str), Some("clean"));
    }

    #[test]
    fn test_touch_keeps_explicit_timestamp() {
        let at = Utc::now() - chrono::Duration::days(3);
        let mut artifact = Artifact::builder("k", "model").updated(at).build();
        artifact.touch();
        assert_eq!(artifact.updated(), Some(at));
    }
}
