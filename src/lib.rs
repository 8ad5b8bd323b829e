//! # mlmeta: Versioned Metadata Store for ML Experiments
//!
//! **Version**: 0.1.0
//!
//! mlmeta keeps runs, data artifacts and feature-sets as immutable versions
//! addressed by `(project, name, uid)`, with mutable tags pointing at
//! versions and an inverted label index for filtering. Callers register,
//! update, query and prune these entities concurrently through one store
//! handle.
//!
//! ## Design Principles
//!
//! - **Append-only versions**: an update writes a new uid, a tag moves
//! - **No dangling tags**: tags are removed before the version they point at
//! - **Read-through listing**: every result is re-validated against storage
//! - **Resumable pruning**: bulk deletes are per-version and idempotent
//!
//! ## Example Usage
//!
//! ```rust
//! use mlmeta::entity::{Artifact, LabelPredicate, Run};
//! use mlmeta::MetadataStore;
//!
//! # fn main() -> mlmeta::Result<()> {
//! let store = MetadataStore::builder().default_project("vision").build()?;
//!
//! let mut run = Run::builder("train", "u1").label("env", "prod").build();
//! run.start();
//! store.store_run(run, "u1", "", false)?;
//!
//! let model = Artifact::builder("model", "model").target_path("s3://m/1").build();
//! store.store_artifact("model", model, "u1", "latest", "")?;
//!
//! let runs = store.list_runs("", "", &[LabelPredicate::parse("env=prod")?], "", true, 0)?;
//! assert_eq!(runs.len(), 1);
//! assert_eq!(store.read_artifact("model", "latest", "")?.target_path(), "s3://m/1");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod entity;
pub mod error;
pub mod index;
pub mod kv;
pub mod locks;
pub mod metrics;
pub mod query;
pub mod render;
pub mod retention;
pub mod store;
pub mod tags;
pub mod telemetry;

pub use error::{Error, Result};
pub use store::{FeatureSetQuery, MetadataStore, MetadataStoreBuilder};
