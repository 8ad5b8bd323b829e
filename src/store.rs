//! Store Facade
//!
//! The operation contract callers use. Composes the KV store (source of
//! truth), the tag resolver, the label index and the query and retention
//! engines behind one explicitly owned handle.
//!
//! ## Write path
//!
//! ```text
//! store_*  → lock partition → check identity → kv.set(record)
//!          → index.index(labels) → persist tag → tags.assign → unlock
//! del_*    → lock partition → retention::remove_version → unlock
//! ```
//!
//! Records are written before any tag points at them and tags are removed
//! before records, so a tag never resolves to missing data.
//!
//! ## Per-entity lifecycle
//!
//! `absent → created → {updated}* → deleted`. Storing never fails on first
//! write, storing an existing uid overwrites that version, reading an absent
//! version is `NotFound`, deleting an absent version succeeds.

use crate::config::{StoreConfig, UidStrategy};
use crate::entity::{
    Artifact, Entity, EntityKind, Feature, FeatureSet, FeatureSetUpdate, LabelPredicate, Labels,
    MetricRecord, PartitionKey, RecordKey, Run, RunUpdate,
};
use crate::index::LabelIndex;
use crate::kv::{KvStore, MemoryKvStore};
use crate::locks::PartitionLocks;
use crate::metrics::MetricLog;
use crate::query::{Query, QueryEngine};
use crate::retention::{remove_version, Pruner};
use crate::tags::{tag_storage_key, TagAssignment, TagEntry, TagResolver, TAG_KEY_PREFIX};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Versioned, label-indexed metadata store.
///
/// ## Example
///
/// ```rust
/// use mlmeta::entity::{LabelPredicate, Run};
/// use mlmeta::MetadataStore;
///
/// # fn example() -> mlmeta::Result<()> {
/// let store = MetadataStore::new();
///
/// let run = Run::builder("train", "u1").label("env", "prod").build();
/// store.store_run(run, "u1", "p", false)?;
///
/// let prod = store.list_runs("", "p", &[LabelPredicate::equals("env", "prod")], "", true, 0)?;
/// assert_eq!(prod.len(), 1);
///
/// store.del_run("u1", "p")?;
/// assert!(store.read_run("u1", "p").unwrap_err().is_not_found());
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug)]
pub struct MetadataStore<K: KvStore = MemoryKvStore> {
    config: StoreConfig,
    kv: K,
    tags: TagResolver,
    index: LabelIndex,
    locks: PartitionLocks,
    metrics: MetricLog,
}

impl MetadataStore<MemoryKvStore> {
    /// Create a store builder over an in-memory backend.
    #[must_use]
    pub fn builder() -> MetadataStoreBuilder<MemoryKvStore> {
        MetadataStoreBuilder::default()
    }

    /// Empty in-memory store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(StoreConfig::default(), MemoryKvStore::new())
    }
}

impl Default for MetadataStore<MemoryKvStore> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`MetadataStore`].
#[derive(Debug)]
pub struct MetadataStoreBuilder<K: KvStore = MemoryKvStore> {
    config: StoreConfig,
    backend: K,
}

impl Default for MetadataStoreBuilder<MemoryKvStore> {
    fn default() -> Self {
        Self {
            config: StoreConfig::default(),
            backend: MemoryKvStore::new(),
        }
    }
}

impl<K: KvStore> MetadataStoreBuilder<K> {
    /// Replace the whole configuration
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Project used when a call passes `""`
    #[must_use]
    pub fn default_project(mut self, project: impl Into<String>) -> Self {
        self.config.default_project = project.into();
        self
    }

    /// Tag used when a call passes `""`
    #[must_use]
    pub fn default_tag(mut self, tag: impl Into<String>) -> Self {
        self.config.default_tag = tag.into();
        self
    }

    /// Uid assignment for records stored without one
    #[must_use]
    pub const fn uid_strategy(mut self, strategy: UidStrategy) -> Self {
        self.config.uid_strategy = strategy;
        self
    }

    /// Past assignments remembered per tag
    #[must_use]
    pub const fn tag_history_limit(mut self, limit: usize) -> Self {
        self.config.tag_history_limit = limit;
        self
    }

    /// Back the store with `backend` instead of a fresh in-memory map
    #[must_use]
    pub fn backend<K2: KvStore>(self, backend: K2) -> MetadataStoreBuilder<K2> {
        MetadataStoreBuilder {
            config: self.config,
            backend,
        }
    }

    /// Build the store, rebuilding the label index and tag tables from
    /// whatever the backend already holds.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the backend cannot be scanned, or a
    /// serialization error for a corrupt record.
    pub fn build(self) -> Result<MetadataStore<K>> {
        let store = MetadataStore::from_parts(self.config, self.backend);
        store.recover()?;
        Ok(store)
    }
}

/// Filters for [`MetadataStore::list_feature_sets_by`].
///
/// Empty strings and empty lists are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSetQuery {
    /// Name filter (exact, or `~part` for substring)
    pub name: String,
    /// Tag filter (`""`/`"*"` = all versions)
    pub tag: String,
    /// Required state
    pub state: String,
    /// Label predicates, AND-ed
    pub labels: Vec<LabelPredicate>,
    /// Entity columns that must all be present
    pub entities: Vec<String>,
    /// Feature columns that must all be present
    pub features: Vec<String>,
}

impl FeatureSetQuery {
    /// Query matching every feature-set version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name filter
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Tag filter
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// State filter
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    /// Add a label predicate
    #[must_use]
    pub fn label(mut self, predicate: LabelPredicate) -> Self {
        self.labels.push(predicate);
        self
    }

    /// Require an entity column
    #[must_use]
    pub fn entity(mut self, name: impl Into<String>) -> Self {
        self.entities.push(name.into());
        self
    }

    /// Require a feature column
    #[must_use]
    pub fn feature(mut self, name: impl Into<String>) -> Self {
        self.features.push(name.into());
        self
    }

    fn columns_match(&self, feature_set: &FeatureSet) -> bool {
        let has = |columns: &[Feature], wanted: &str| columns.iter().any(|c| c.name == wanted);
        self.entities.iter().all(|e| has(feature_set.entities(), e))
            && self.features.iter().all(|f| has(feature_set.features(), f))
    }
}

impl<K: KvStore> MetadataStore<K> {
    fn from_parts(config: StoreConfig, kv: K) -> Self {
        let tags = TagResolver::new(config.tag_history_limit);
        Self {
            config,
            kv,
            tags,
            index: LabelIndex::new(),
            locks: PartitionLocks::new(),
            metrics: MetricLog::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The backing KV store.
    #[must_use]
    pub const fn backend(&self) -> &K {
        &self.kv
    }

    // ---------------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------------

    /// Store a run version and return its uid.
    ///
    /// `uid` (or the run's own uid) addresses the version; when both are
    /// blank one is generated. With `commit`, the backend is flushed after
    /// the write.
    ///
    /// # Errors
    ///
    /// `Conflict` if the uid already belongs to a run with another name, or
    /// if the run's embedded project or uid contradicts the arguments.
    pub fn store_run(&self, mut run: Run, uid: &str, project: &str, commit: bool) -> Result<String> {
        let project = self.embedded_project(EntityKind::Run, run.project(), project, run.uid())?;
        run.set_project(&project);
        let uid = self.version_uid(EntityKind::Run, &project, run.uid(), uid, &run)?;
        run.set_uid(&uid);
        run.touch();

        let key = run.record_key();
        self.with_partition(&key.partition(), || {
            if let Some(existing) = self.engine().load::<Run>(&key)? {
                if existing.name() != run.name() {
                    return Err(Error::conflict(
                        EntityKind::Run,
                        &project,
                        &uid,
                        format!(
                            "uid already stores run '{}', refusing to store '{}'",
                            existing.name(),
                            run.name()
                        ),
                    ));
                }
            }
            self.put(&run)?;
            if commit {
                self.kv.flush()?;
            }
            Ok(())
        })?;

        debug!(project = %project, name = %run.name(), uid = %uid, "stored run");
        Ok(uid)
    }

    /// Read a run by uid.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such run exists.
    pub fn read_run(&self, uid: &str, project: &str) -> Result<Run> {
        let project = self.config.project(project);
        let key = RecordKey::new(EntityKind::Run, project, "", uid);
        self.engine()
            .load(&key)?
            .ok_or_else(|| Error::not_found(EntityKind::Run, project, "", uid))
    }

    /// Apply a status patch to a stored run in place (same uid).
    ///
    /// # Errors
    ///
    /// `NotFound` if no such run exists.
    pub fn update_run(&self, uid: &str, project: &str, update: RunUpdate) -> Result<Run> {
        let project = self.config.project(project);
        let key = RecordKey::new(EntityKind::Run, project, "", uid);
        self.with_partition(&key.partition(), || {
            let mut run: Run = self
                .engine()
                .load(&key)?
                .ok_or_else(|| Error::not_found(EntityKind::Run, project, "", uid))?;
            run.apply(update);
            self.put(&run)?;
            debug!(project = %project, uid = %uid, state = %run.run_state().as_str(), "updated run");
            Ok(run)
        })
    }

    /// List runs. `last` caps the number returned (0 = all).
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate.
    pub fn list_runs(
        &self,
        name: &str,
        project: &str,
        labels: &[LabelPredicate],
        state: &str,
        sort: bool,
        last: usize,
    ) -> Result<Vec<Run>> {
        let query = Query::new(self.config.project(project))
            .name(name)
            .labels(labels)
            .state(state)
            .sort_by_time(sort)
            .limit(last);
        self.query(&query)
    }

    /// Delete one run. Deleting an absent run succeeds.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn del_run(&self, uid: &str, project: &str) -> Result<()> {
        let project = self.config.project(project);
        let key = RecordKey::new(EntityKind::Run, project, "", uid);
        self.delete_version(&key)
    }

    /// Delete every matching run started strictly before `older_than`
    /// (`None` = no age restriction). Returns the number deleted.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate; backend failures stop the
    /// batch with progress kept.
    pub fn del_runs(
        &self,
        name: &str,
        project: &str,
        labels: &[LabelPredicate],
        state: &str,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let query = Query::new(self.config.project(project))
            .name(name)
            .labels(labels)
            .state(state);
        self.pruner().delete_many::<Run>(&query, older_than)
    }

    // ---------------------------------------------------------------------
    // Artifacts
    // ---------------------------------------------------------------------

    /// Store an artifact version under `key` and point `tag` (default tag
    /// when blank) at it. Returns the version uid.
    ///
    /// # Errors
    ///
    /// `Conflict` if the artifact's own key, project or tree contradicts the
    /// arguments.
    pub fn store_artifact(
        &self,
        key: &str,
        mut artifact: Artifact,
        uid: &str,
        tag: &str,
        project: &str,
    ) -> Result<String> {
        let project =
            self.embedded_project(EntityKind::Artifact, artifact.project(), project, artifact.tree())?;
        if artifact.key() != key {
            return Err(Error::conflict(
                EntityKind::Artifact,
                &project,
                uid,
                format!("artifact key '{}' does not match '{key}'", artifact.key()),
            ));
        }
        let supplied = artifact.tree().to_string();
        artifact.set_identity(&project, "");
        let uid = self.version_uid(EntityKind::Artifact, &project, &supplied, uid, &artifact)?;
        artifact.set_identity(&project, &uid);
        artifact.touch();

        let tag = self.config.tag(tag);
        let partition = PartitionKey::new(EntityKind::Artifact, &project, key);
        self.with_partition(&partition, || {
            self.put(&artifact)?;
            self.assign_tag(&partition, tag, &uid)
        })?;

        debug!(project = %project, key = %key, uid = %uid, tag = %tag, "stored artifact");
        Ok(uid)
    }

    /// Read the artifact version behind `tag` (default tag when blank).
    ///
    /// If no such tag exists but a version with uid `tag` does, that version
    /// is returned.
    ///
    /// # Errors
    ///
    /// `NotFound` if neither a tag nor a version matches.
    pub fn read_artifact(&self, key: &str, tag: &str, project: &str) -> Result<Artifact> {
        self.read_versioned(key, tag, project)
    }

    /// List artifact versions, most recent first.
    ///
    /// `tag` selects the version a tag points at; `""` or `"*"` lists all.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate.
    pub fn list_artifacts(
        &self,
        name: &str,
        project: &str,
        tag: &str,
        labels: &[LabelPredicate],
    ) -> Result<Vec<Artifact>> {
        let query = Query::new(self.config.project(project))
            .name(name)
            .tag(tag)
            .labels(labels)
            .sort_by_time(true);
        self.query(&query)
    }

    /// Delete the artifact version behind `tag` together with every tag
    /// pointing at it. Deleting an absent version succeeds.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn del_artifact(&self, key: &str, tag: &str, project: &str) -> Result<()> {
        self.delete_tagged(EntityKind::Artifact, key, tag, project)
    }

    /// Delete every matching artifact version updated strictly before
    /// `older_than` (`None` = no age restriction). Returns the number deleted.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate; backend failures stop the
    /// batch with progress kept.
    pub fn del_artifacts(
        &self,
        name: &str,
        project: &str,
        tag: &str,
        labels: &[LabelPredicate],
        older_than: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let query = Query::new(self.config.project(project))
            .name(name)
            .tag(tag)
            .labels(labels);
        self.pruner().delete_many::<Artifact>(&query, older_than)
    }

    /// Point `tag` at an existing artifact version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the version does not exist.
    pub fn tag_artifact(&self, key: &str, uid: &str, tag: &str, project: &str) -> Result<()> {
        self.retag(EntityKind::Artifact, key, uid, tag, project)
    }

    /// Remove a single artifact tag, keeping the version. Returns the uid it
    /// pointed at.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn untag_artifact(&self, key: &str, tag: &str, project: &str) -> Result<Option<String>> {
        let project = self.config.project(project);
        let partition = PartitionKey::new(EntityKind::Artifact, project, key);
        self.with_partition(&partition, || {
            self.kv.delete(&tag_storage_key(&partition, tag))?;
            Ok(self.tags.unassign(&partition, tag))
        })
    }

    // ---------------------------------------------------------------------
    // Feature sets
    // ---------------------------------------------------------------------

    /// Store a feature-set version and point `tag` (default tag when blank)
    /// at it. Returns the version uid.
    ///
    /// # Errors
    ///
    /// `Conflict` if the feature-set's own project or uid contradicts the
    /// arguments.
    pub fn store_feature_set(
        &self,
        feature_set: FeatureSet,
        project: &str,
        tag: &str,
        uid: &str,
    ) -> Result<String> {
        let tag = self.config.tag(tag);
        let partition = PartitionKey::new(
            EntityKind::FeatureSet,
            self.config.project(if project.is_empty() { feature_set.project() } else { project }),
            feature_set.name(),
        );
        self.with_partition(&partition, || self.write_feature_set(feature_set, project, tag, uid))
    }

    /// Read the feature-set version behind `tag` (default tag when blank),
    /// falling back to a version with uid `tag`.
    ///
    /// # Errors
    ///
    /// `NotFound` if neither a tag nor a version matches.
    pub fn read_feature_set(&self, name: &str, project: &str, tag: &str) -> Result<FeatureSet> {
        self.read_versioned(name, tag, project)
    }

    /// List feature-set versions, most recent first.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate.
    pub fn list_feature_sets(
        &self,
        name: &str,
        project: &str,
        tag: &str,
        state: &str,
        labels: &[LabelPredicate],
    ) -> Result<Vec<FeatureSet>> {
        let query = FeatureSetQuery {
            name: name.to_string(),
            tag: tag.to_string(),
            state: state.to_string(),
            labels: labels.to_vec(),
            ..FeatureSetQuery::default()
        };
        self.list_feature_sets_by(project, &query)
    }

    /// List feature-set versions with column filters, most recent first.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate.
    pub fn list_feature_sets_by(&self, project: &str, filter: &FeatureSetQuery) -> Result<Vec<FeatureSet>> {
        let query = Query::new(self.config.project(project))
            .name(&filter.name)
            .tag(&filter.tag)
            .state(&filter.state)
            .labels(&filter.labels)
            .sort_by_time(true);
        self.engine()
            .list_where(&query, |fs: &FeatureSet| filter.columns_match(fs))
    }

    /// Apply `update` to the version behind `tag`, store the result as a new
    /// version and re-point `tag` at it. Returns the new uid.
    ///
    /// # Errors
    ///
    /// `NotFound` if the tag does not resolve.
    pub fn patch_feature_set(
        &self,
        name: &str,
        project: &str,
        tag: &str,
        update: FeatureSetUpdate,
    ) -> Result<String> {
        let project = self.config.project(project);
        let tag = self.config.tag(tag);
        let partition = PartitionKey::new(EntityKind::FeatureSet, project, name);
        self.with_partition(&partition, || {
            let current: FeatureSet = self.load_tagged(&partition, tag)?;
            let next = current.patched(update);
            let uid = self.write_feature_set(next, project, tag, "")?;
            debug!(project = %project, name = %name, tag = %tag, from = %current.uid(), to = %uid, "patched feature set");
            Ok(uid)
        })
    }

    /// Delete the feature-set version behind `tag` with all its tags.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn del_feature_set(&self, name: &str, project: &str, tag: &str) -> Result<()> {
        self.delete_tagged(EntityKind::FeatureSet, name, tag, project)
    }

    /// Delete every matching feature-set version updated strictly before
    /// `older_than`. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate; backend failures stop the
    /// batch with progress kept.
    pub fn del_feature_sets(
        &self,
        name: &str,
        project: &str,
        tag: &str,
        labels: &[LabelPredicate],
        older_than: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let query = Query::new(self.config.project(project))
            .name(name)
            .tag(tag)
            .labels(labels);
        self.pruner().delete_many::<FeatureSet>(&query, older_than)
    }

    /// Point `tag` at an existing feature-set version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the version does not exist.
    pub fn tag_feature_set(&self, name: &str, uid: &str, tag: &str, project: &str) -> Result<()> {
        self.retag(EntityKind::FeatureSet, name, uid, tag, project)
    }

    // ---------------------------------------------------------------------
    // Generic queries and tags
    // ---------------------------------------------------------------------

    /// Evaluate an arbitrary query over one entity kind.
    ///
    /// A blank query project means the default project.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed query.
    pub fn query<E: Entity>(&self, query: &Query) -> Result<Vec<E>> {
        if query.project.is_empty() {
            let mut scoped = query.clone();
            scoped.project.clone_from(&self.config.default_project);
            return self.engine().list(&scoped);
        }
        self.engine().list(query)
    }

    /// Delete every version of `E` matching `query` and older than
    /// `older_than`.
    ///
    /// # Errors
    ///
    /// Same as the `del_*s` operations.
    pub fn delete_where<E: Entity>(&self, query: &Query, older_than: Option<DateTime<Utc>>) -> Result<usize> {
        let mut scoped = query.clone();
        if scoped.project.is_empty() {
            scoped.project.clone_from(&self.config.default_project);
        }
        self.pruner().delete_many::<E>(&scoped, older_than)
    }

    /// Past assignments of a tag, oldest first.
    #[must_use]
    pub fn tag_history(&self, kind: EntityKind, name: &str, project: &str, tag: &str) -> Vec<TagAssignment> {
        let partition = PartitionKey::new(kind, self.config.project(project), name);
        self.tags.history(&partition, self.config.tag(tag))
    }

    /// Tags currently pointing at a version.
    #[must_use]
    pub fn tags_of(&self, kind: EntityKind, name: &str, project: &str, uid: &str) -> BTreeSet<String> {
        let partition = PartitionKey::new(kind, self.config.project(project), name);
        self.tags.tags_for(&partition, uid)
    }

    // ---------------------------------------------------------------------
    // Metrics
    // ---------------------------------------------------------------------

    /// Append one metric point per key (timestamp defaults to now).
    pub fn store_metric(
        &self,
        key_values: &BTreeMap<String, f64>,
        timestamp: Option<DateTime<Utc>>,
        labels: &Labels,
    ) {
        self.metrics.append(key_values, timestamp, labels);
    }

    /// Metric points for `keys` (empty = all) whose labels satisfy the
    /// comma-separated predicate list `query`, oldest first.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed predicate.
    pub fn read_metric(&self, keys: &[&str], query: &str) -> Result<Vec<MetricRecord>> {
        self.metrics.read(keys, query)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn engine(&self) -> QueryEngine<'_, K> {
        QueryEngine::new(&self.kv, &self.index, &self.tags)
    }

    fn pruner(&self) -> Pruner<'_, K> {
        Pruner::new(&self.kv, &self.index, &self.tags, &self.locks)
    }

    fn with_partition<T>(&self, partition: &PartitionKey, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.locks.lock(partition);
        let result = f();
        drop(guard);
        self.locks.release(partition);
        result
    }

    // Caller holds the partition lock.
    fn put<E: Entity>(&self, record: &E) -> Result<()> {
        let key = record.record_key();
        self.kv.set(&key.storage_key(), serde_json::to_vec(record)?)?;
        self.index.index(&key, record.labels());
        Ok(())
    }

    // Caller holds the partition lock. Persisted first so a failed write
    // leaves the in-memory table untouched.
    fn assign_tag(&self, partition: &PartitionKey, tag: &str, uid: &str) -> Result<()> {
        let entry = TagEntry::new(partition, tag, uid);
        self.kv
            .set(&tag_storage_key(partition, tag), serde_json::to_vec(&entry)?)?;
        self.tags.assign(partition, tag, uid);
        Ok(())
    }

    // Caller holds the partition lock.
    fn write_feature_set(&self, mut feature_set: FeatureSet, project: &str, tag: &str, uid: &str) -> Result<String> {
        let project = self.embedded_project(
            EntityKind::FeatureSet,
            feature_set.project(),
            project,
            feature_set.uid(),
        )?;
        let supplied = feature_set.uid().to_string();
        feature_set.set_identity(&project, "");
        let uid = self.version_uid(EntityKind::FeatureSet, &project, &supplied, uid, &feature_set)?;
        feature_set.set_identity(&project, &uid);
        feature_set.touch();

        let partition = PartitionKey::new(EntityKind::FeatureSet, &project, feature_set.name());
        self.put(&feature_set)?;
        self.assign_tag(&partition, tag, &uid)?;

        debug!(project = %project, name = %feature_set.name(), uid = %uid, tag = %tag, "stored feature set");
        Ok(uid)
    }

    /// Project a write lands in: the argument, else the record's own
    /// project, else the default. Both set and different is a conflict.
    fn embedded_project(&self, kind: EntityKind, embedded: &str, argument: &str, uid: &str) -> Result<String> {
        match (embedded.is_empty(), argument.is_empty()) {
            (false, false) if embedded != argument => Err(Error::conflict(
                kind,
                argument,
                uid,
                format!("record belongs to project '{embedded}'"),
            )),
            (false, true) => Ok(embedded.to_string()),
            _ => Ok(self.config.project(argument).to_string()),
        }
    }

    /// Uid a write lands on: the argument, else the record's own uid, else a
    /// generated one. Both set and different is a conflict.
    fn version_uid<T: serde::Serialize>(
        &self,
        kind: EntityKind,
        project: &str,
        embedded: &str,
        argument: &str,
        record: &T,
    ) -> Result<String> {
        match (embedded.is_empty(), argument.is_empty()) {
            (false, false) if embedded != argument => Err(Error::conflict(
                kind,
                project,
                argument,
                format!("record carries uid '{embedded}'"),
            )),
            (false, _) => Ok(embedded.to_string()),
            (true, false) => Ok(argument.to_string()),
            (true, true) => self.config.uid_strategy.generate(record),
        }
    }

    /// Uid behind `reference`: a tag if one exists, else a uid if that
    /// version exists.
    fn resolve_reference(&self, partition: &PartitionKey, reference: &str) -> Result<Option<String>> {
        match self.tags.resolve(partition, reference) {
            Ok(uid) => Ok(Some(uid)),
            Err(e) if e.is_not_found() => {
                let key = RecordKey::new(partition.kind, &partition.project, &partition.name, reference);
                Ok(self.kv.exists(&key.storage_key())?.then(|| reference.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn load_tagged<E: Entity>(&self, partition: &PartitionKey, reference: &str) -> Result<E> {
        let not_found =
            || Error::not_found(partition.kind, &partition.project, &partition.name, reference);
        let uid = self.resolve_reference(partition, reference)?.ok_or_else(not_found)?;
        let key = RecordKey::new(partition.kind, &partition.project, &partition.name, &uid);
        match self.engine().load(&key)? {
            Some(record) => Ok(record),
            None => {
                warn!(record = %key, tag = %reference, "tag points at a missing version");
                Err(not_found())
            }
        }
    }

    fn read_versioned<E: Entity>(&self, name: &str, tag: &str, project: &str) -> Result<E> {
        let partition = PartitionKey::new(E::KIND, self.config.project(project), name);
        let record = self.load_tagged(&partition, self.config.tag(tag))?;
        debug!(kind = %E::KIND, project = %partition.project, name = %name, tag = %tag, "read");
        Ok(record)
    }

    fn delete_version(&self, key: &RecordKey) -> Result<()> {
        let partition = key.partition();
        let removed = self.with_partition(&partition, || remove_version(&self.kv, &self.index, &self.tags, key))?;
        debug!(record = %key, tags = ?removed, "deleted");
        Ok(())
    }

    fn delete_tagged(&self, kind: EntityKind, name: &str, tag: &str, project: &str) -> Result<()> {
        let partition = PartitionKey::new(kind, self.config.project(project), name);
        let tag = self.config.tag(tag);
        self.with_partition(&partition, || {
            let Some(uid) = self.resolve_reference(&partition, tag)? else {
                debug!(kind = %kind, project = %partition.project, name = %name, tag = %tag, "delete of absent version");
                return Ok(());
            };
            let key = RecordKey::new(kind, &partition.project, name, uid);
            let removed = remove_version(&self.kv, &self.index, &self.tags, &key)?;
            debug!(record = %key, tags = ?removed, "deleted");
            Ok(())
        })
    }

    fn retag(&self, kind: EntityKind, name: &str, uid: &str, tag: &str, project: &str) -> Result<()> {
        let project = self.config.project(project);
        let partition = PartitionKey::new(kind, project, name);
        let key = RecordKey::new(kind, project, name, uid);
        self.with_partition(&partition, || {
            if !self.kv.exists(&key.storage_key())? {
                return Err(Error::not_found(kind, project, name, uid));
            }
            self.assign_tag(&partition, tag, uid)
        })?;
        debug!(kind = %kind, project = %project, name = %name, uid = %uid, tag = %tag, "tagged");
        Ok(())
    }

    /// Rebuild the label index and tag tables from the backend. Persisted
    /// tags whose version is gone are dropped.
    fn recover(&self) -> Result<()> {
        let records = self.reindex::<Run>()? + self.reindex::<Artifact>()? + self.reindex::<FeatureSet>()?;

        let mut restored = 0;
        for (storage_key, bytes) in self.kv.scan_prefix(TAG_KEY_PREFIX)? {
            let entry: TagEntry = serde_json::from_slice(&bytes)?;
            let target = RecordKey::new(entry.kind, &entry.project, &entry.name, &entry.uid);
            if self.kv.exists(&target.storage_key())? {
                self.tags.assign(&entry.partition(), &entry.tag, &entry.uid);
                restored += 1;
            } else {
                warn!(record = %target, tag = %entry.tag, "dropping persisted tag of a missing version");
                self.kv.delete(&storage_key)?;
            }
        }

        if records > 0 || restored > 0 {
            info!(records, tags = restored, "recovered store state from backend");
        }
        Ok(())
    }

    fn reindex<E: Entity>(&self) -> Result<usize> {
        let entries = self.kv.scan_prefix(&format!("{}/", E::KIND.as_str()))?;
        for (_, bytes) in &entries {
            let record: E = serde_json::from_slice(bytes)?;
            self.index.index(&record.record_key(), record.labels());
        }
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{FeatureSet, RunState};
    use std::sync::Arc;

    #[test]
    fn test_run_uid_is_generated_when_blank() {
        let store = MetadataStore::new();
        let uid = store.store_run(Run::new("train", ""), "", "p", false).unwrap();
        assert!(!uid.is_empty());
        assert_eq!(store.read_run(&uid, "p").unwrap().uid(), uid);
    }

    #[test]
    fn test_blank_project_uses_default() {
        let store = MetadataStore::builder().default_project("vision").build().unwrap();
        store.store_run(Run::new("train", "u1"), "u1", "", false).unwrap();
        assert_eq!(store.read_run("u1", "vision").unwrap().project(), "vision");
        assert!(store.read_run("u1", "other").unwrap_err().is_not_found());
    }

    #[test]
    fn test_run_name_conflict() {
        let store = MetadataStore::new();
        store.store_run(Run::new("train", "u1"), "u1", "p", false).unwrap();
        let err = store.store_run(Run::new("eval", "u1"), "u1", "p", false).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn test_embedded_project_conflict() {
        let store = MetadataStore::new();
        let run = Run::builder("train", "u1").project("a").build();
        assert!(matches!(
            store.store_run(run, "u1", "b", false),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn test_update_run_keeps_uid() {
        let store = MetadataStore::new();
        store.store_run(Run::new("train", "u1"), "u1", "p", false).unwrap();
        let run = store
            .update_run("u1", "p", RunUpdate::state(RunState::Completed).output("acc", 0.9))
            .unwrap();
        assert_eq!(run.run_state(), RunState::Completed);
        assert_eq!(store.read_run("u1", "p").unwrap(), run);
        assert!(store.update_run("u9", "p", RunUpdate::default()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_locks_are_released_after_writes() {
        let store = MetadataStore::new();
        store.store_run(Run::new("train", "u1"), "u1", "p", true).unwrap();
        store
            .store_artifact("model", Artifact::new("model", "model"), "t1", "", "p")
            .unwrap();
        store.del_artifact("model", "latest", "p").unwrap();
        assert!(store.locks.is_empty());
    }

    #[test]
    fn test_recover_rebuilds_index_and_tags() {
        let kv = Arc::new(MemoryKvStore::new());
        {
            let store = MetadataStore::builder().backend(Arc::clone(&kv)).build().unwrap();
            let fs = FeatureSet::builder("users").label("team", "ads").build();
            store.store_feature_set(fs, "p", "v1", "").unwrap();
        }

        let reopened = MetadataStore::builder().backend(kv).build().unwrap();
        let fs = reopened.read_feature_set("users", "p", "v1").unwrap();
        let by_label = reopened
            .list_feature_sets("", "p", "", "", &[LabelPredicate::equals("team", "ads")])
            .unwrap();
        assert_eq!(by_label, vec![fs]);
    }

    #[test]
    fn test_recover_drops_tags_of_missing_versions() {
        let kv = Arc::new(MemoryKvStore::new());
        let partition = PartitionKey::new(EntityKind::Artifact, "p", "model");
        let entry = TagEntry::new(&partition, "latest", "gone");
        kv.set(&tag_storage_key(&partition, "latest"), serde_json::to_vec(&entry).unwrap())
            .unwrap();

        let store = MetadataStore::builder().backend(Arc::clone(&kv)).build().unwrap();
        assert!(store.read_artifact("model", "latest", "p").unwrap_err().is_not_found());
        assert!(kv.is_empty());
    }
}
