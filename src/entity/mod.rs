//! Entity Model
//!
//! Typed records for the three versioned entity kinds plus the metric
//! side-channel.
//!
//! ## Identity
//!
//! ```text
//! (project, name, uid)   immutable version identity
//! (project, name, tag)   mutable pointer → uid  (see `tags`)
//! ```
//!
//! Runs are addressed by uid alone inside a project (their name is data, not
//! part of the address), so their [`RecordKey`] carries an empty name.
//!
//! ## Usage
//!
//! ```rust
//! use mlmeta::entity::{Entity, Run, RunState};
//!
//! let mut run = Run::builder("train", "u1")
//!     .project("p")
//!     .label("env", "prod")
//!     .build();
//! run.start();
//! assert_eq!(run.state(), Some("running"));
//! assert_eq!(run.record_key().storage_key(), "run/p//u1");
//! # let _ = RunState::Completed;
//! ```

mod artifact;
mod feature_set;
mod labels;
mod metric;
mod run;

pub use artifact::{Artifact, ArtifactBuilder, ArtifactSource};
pub use feature_set::{Feature, FeatureSet, FeatureSetBuilder, FeatureSetStatus, FeatureSetUpdate};
pub use labels::{LabelPredicate, Labels};
pub use metric::{MetricRecord, MetricRecordBuilder};
pub use run::{ArtifactRef, Run, RunBuilder, RunState, RunUpdate};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The versioned entity kinds held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Execution of a pipeline step
    Run,
    /// Data artifact produced or consumed by runs
    Artifact,
    /// Feature-set definition
    FeatureSet,
}

impl EntityKind {
    /// Storage-key prefix for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Artifact => "artifact",
            Self::FeatureSet => "feature_set",
        }
    }

    /// Whether versions of this kind are addressed by `(name, uid)`.
    ///
    /// Runs are addressed by uid only.
    #[must_use]
    pub const fn addressed_by_name(&self) -> bool {
        !matches!(self, Self::Run)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one stored version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Entity kind
    pub kind: EntityKind,
    /// Project namespace
    pub project: String,
    /// Entity name; empty for runs
    pub name: String,
    /// Version uid
    pub uid: String,
}

impl RecordKey {
    /// Build a key, dropping the name for kinds not addressed by name.
    #[must_use]
    pub fn new(
        kind: EntityKind,
        project: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        let name = if kind.addressed_by_name() {
            name.into()
        } else {
            String::new()
        };
        Self {
            kind,
            project: project.into(),
            name,
            uid: uid.into(),
        }
    }

    /// Key under which the serialized record lives in the KV store.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}",
            name_prefix(self.kind, &self.project, &self.name),
            escape(&self.uid)
        )
    }

    /// Write-serialization partition this version belongs to.
    #[must_use]
    pub fn partition(&self) -> PartitionKey {
        let name = if self.kind.addressed_by_name() {
            self.name.clone()
        } else {
            self.uid.clone()
        };
        PartitionKey {
            kind: self.kind,
            project: self.project.clone(),
            name,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}@{}", self.kind, self.project, self.name, self.uid)
    }
}

/// Unit of write serialization: `(kind, project, name)`.
///
/// Runs use their uid in the name slot since they carry no tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// Entity kind
    pub kind: EntityKind,
    /// Project namespace
    pub project: String,
    /// Entity name (uid for runs)
    pub name: String,
}

impl PartitionKey {
    /// Partition for a named entity.
    #[must_use]
    pub fn new(kind: EntityKind, project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            project: project.into(),
            name: name.into(),
        }
    }
}

/// Storage-key prefix covering every version of `kind` in `project`.
#[must_use]
pub fn project_prefix(kind: EntityKind, project: &str) -> String {
    format!("{}/{}/", kind.as_str(), escape(project))
}

/// Storage-key prefix covering every version of one named entity.
#[must_use]
pub fn name_prefix(kind: EntityKind, project: &str, name: &str) -> String {
    format!("{}{}/", project_prefix(kind, project), escape(name))
}

// '/' separates key segments, so it must never appear inside one.
pub(crate) fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

/// Common view over versioned records used by the index, query and
/// retention layers.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Kind of this record type.
    const KIND: EntityKind;

    /// Project namespace.
    fn project(&self) -> &str;

    /// Entity name (run name, artifact key, feature-set name).
    fn name(&self) -> &str;

    /// Version uid.
    fn uid(&self) -> &str;

    /// Label mapping.
    fn labels(&self) -> &Labels;

    /// Timestamp used for ordering and age-based retention.
    fn timestamp(&self) -> Option<DateTime<Utc>>;

    /// Denormalized state projection, if the kind has one.
    fn state(&self) -> Option<&str>;

    /// Address of this version.
    fn record_key(&self) -> RecordKey {
        RecordKey::new(Self::KIND, self.project(), self.name(), self.uid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_key_drops_name() {
        let key = RecordKey::new(EntityKind::Run, "p", "train", "u1");
        assert_eq!(key.name, "");
        assert_eq!(key.storage_key(), "run/p//u1");
        assert_eq!(key.partition().name, "u1");
    }

    #[test]
    fn test_artifact_key_partitions_by_name() {
        let key = RecordKey::new(EntityKind::Artifact, "p", "model", "u1");
        assert_eq!(key.storage_key(), "artifact/p/model/u1");
        assert_eq!(key.partition(), PartitionKey::new(EntityKind::Artifact, "p", "model"));
    }

    #[test]
    fn test_segments_are_escaped() {
        let key = RecordKey::new(EntityKind::Artifact, "p", "data/raw", "u%1");
        assert_eq!(key.storage_key(), "artifact/p/data%2Fraw/u%251");
        assert!(key
            .storage_key()
            .starts_with(&name_prefix(EntityKind::Artifact, "p", "data/raw")));
        assert!(!key
            .storage_key()
            .starts_with(&name_prefix(EntityKind::Artifact, "p", "data")));
    }
}
