//! Error types for mlmeta
//!
//! Every error that concerns a stored entity carries enough identity
//! (kind, project, name, uid or tag) for the caller to act on it.

use crate::entity::EntityKind;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// mlmeta error types
#[derive(Error, Debug)]
pub enum Error {
    /// Read or resolve on an absent or deleted identity
    #[error("{kind} not found: project={project} name={name} ref={reference}")]
    NotFound {
        /// Entity kind that was looked up
        kind: EntityKind,
        /// Project namespace
        project: String,
        /// Entity name (artifact key, feature-set name, empty for runs)
        name: String,
        /// Tag or uid used for the lookup
        reference: String,
    },

    /// Write that contradicts an existing version or the call's identity
    #[error("{kind} conflict: project={project} uid={uid}: {reason}")]
    Conflict {
        /// Entity kind being written
        kind: EntityKind,
        /// Project namespace
        project: String,
        /// Uid of the version in conflict
        uid: String,
        /// Human-readable cause
        reason: String,
    },

    /// Malformed label predicate, negative age or inverted time window
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Backing medium unreachable (never retried by the store)
    #[error("Store unavailable: {0}\nThe operation was not retried; retry from the caller if it is safe to do so")]
    StoreUnavailable(String),

    /// Record (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Arrow error while rendering a result set
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Record compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),
}

impl Error {
    /// Build a `NotFound` error.
    pub fn not_found(
        kind: EntityKind,
        project: impl Into<String>,
        name: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind,
            project: project.into(),
            name: name.into(),
            reference: reference.into(),
        }
    }

    /// Build a `Conflict` error.
    pub fn conflict(
        kind: EntityKind,
        project: impl Into<String>,
        uid: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind,
            project: project.into(),
            uid: uid.into(),
            reason: reason.into(),
        }
    }

    /// True for `NotFound`; idempotent deletes absorb these.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
