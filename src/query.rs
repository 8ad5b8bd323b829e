//! Query Engine
//!
//! Evaluates conjunctive filters (name AND labels AND state AND tag AND time
//! window) over one entity kind in one project.
//!
//! ## Candidate selection
//!
//! ```text
//! labels given            → label index postings (scoped to kind+project)
//! exact name + exact tag  → tag resolution, single record
//! exact name              → storage prefix scan of that name
//! otherwise               → storage prefix scan of the project
//! ```
//!
//! Every candidate is then re-read from the KV store and every filter is
//! re-evaluated against the decoded record. A key that the index still lists
//! but whose record is gone is skipped, so a listing never returns a deleted
//! version even if the index lags behind.

use crate::entity::{name_prefix, project_prefix, Entity, LabelPredicate, PartitionKey, RecordKey};
use crate::index::LabelIndex;
use crate::kv::KvStore;
use crate::tags::TagResolver;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Name dimension of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NameFilter {
    /// Every name matches
    #[default]
    Any,
    /// Name equals the string exactly
    Exact(String),
    /// Name contains the string, ignoring case
    Contains(String),
}

impl NameFilter {
    /// Parse caller syntax: `""` matches all, `"~part"` is a case-insensitive
    /// substring match, anything else is exact.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            Self::Any
        } else if let Some(part) = text.strip_prefix('~') {
            Self::Contains(part.to_lowercase())
        } else {
            Self::Exact(text.to_string())
        }
    }

    /// Whether `name` passes this filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => name == exact,
            Self::Contains(part) => name.to_lowercase().contains(part.as_str()),
        }
    }

    fn exact(&self) -> Option<&str> {
        match self {
            Self::Exact(name) => Some(name),
            _ => None,
        }
    }
}

/// Tag dimension of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TagFilter {
    /// Every version, tagged or not
    #[default]
    Any,
    /// Only the version a tag currently points at
    Tag(String),
}

impl TagFilter {
    /// `""` and `"*"` select all versions; anything else is a tag name.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if text.is_empty() || text == "*" {
            Self::Any
        } else {
            Self::Tag(text.to_string())
        }
    }
}

/// Half-open time window `[since, until)` over an entity's timestamp.
///
/// Unset bounds are no-ops. Entities without a timestamp only match a window
/// with no bounds at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Window covering everything strictly before `cutoff`.
    #[must_use]
    pub const fn before(cutoff: DateTime<Utc>) -> Self {
        Self {
            since: None,
            until: Some(cutoff),
        }
    }

    /// Whether both bounds are unset.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    /// Whether `timestamp` falls in the window.
    #[must_use]
    pub fn contains(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(ts) = timestamp else {
            return false;
        };
        self.since.map_or(true, |since| ts >= since) && self.until.map_or(true, |until| ts < until)
    }

    /// # Errors
    ///
    /// Returns `InvalidFilter` when `since` is after `until`.
    pub fn validate(&self) -> Result<()> {
        match (self.since, self.until) {
            (Some(since), Some(until)) if since > until => Err(Error::InvalidFilter(format!(
                "time window starts ({since}) after it ends ({until})"
            ))),
            _ => Ok(()),
        }
    }
}

/// A compound list filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Project namespace (already resolved to a concrete project)
    pub project: String,
    /// Name dimension
    pub name: NameFilter,
    /// Label predicates, AND-ed
    pub labels: Vec<LabelPredicate>,
    /// Required state; `None` matches every state
    pub state: Option<String>,
    /// Tag dimension
    pub tag: TagFilter,
    /// Time window
    pub time: TimeRange,
    /// Most recent first, ties by uid ascending
    pub sort_by_time: bool,
    /// Maximum results; 0 means unlimited
    pub limit: usize,
}

impl Query {
    /// Query matching every version in `project`.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Set the name filter from caller syntax (see [`NameFilter::parse`]).
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = NameFilter::parse(name);
        self
    }

    /// Add a label predicate.
    #[must_use]
    pub fn label(mut self, predicate: LabelPredicate) -> Self {
        self.labels.push(predicate);
        self
    }

    /// Add several label predicates.
    #[must_use]
    pub fn labels(mut self, predicates: &[LabelPredicate]) -> Self {
        self.labels.extend_from_slice(predicates);
        self
    }

    /// Require a state; `""` leaves the dimension open.
    #[must_use]
    pub fn state(mut self, state: &str) -> Self {
        self.state = (!state.is_empty()).then(|| state.to_string());
        self
    }

    /// Set the tag filter from caller syntax (see [`TagFilter::parse`]).
    #[must_use]
    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = TagFilter::parse(tag);
        self
    }

    /// Inclusive lower time bound.
    #[must_use]
    pub const fn since(mut self, since: DateTime<Utc>) -> Self {
        self.time.since = Some(since);
        self
    }

    /// Exclusive upper time bound.
    #[must_use]
    pub const fn until(mut self, until: DateTime<Utc>) -> Self {
        self.time.until = Some(until);
        self
    }

    /// Order by timestamp, most recent first.
    #[must_use]
    pub const fn sort_by_time(mut self, sort: bool) -> Self {
        self.sort_by_time = sort;
        self
    }

    /// Cap the number of results (0 = unlimited).
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// # Errors
    ///
    /// Returns `InvalidFilter` for malformed predicates or time windows.
    pub fn validate(&self) -> Result<()> {
        for predicate in &self.labels {
            predicate.validate()?;
        }
        self.time.validate()
    }
}

/// Read-only evaluator over the store's state.
pub struct QueryEngine<'a, K: KvStore> {
    kv: &'a K,
    index: &'a LabelIndex,
    tags: &'a TagResolver,
    bypass_index: bool,
}

impl<'a, K: KvStore> QueryEngine<'a, K> {
    /// Borrow the structures a query needs.
    #[must_use]
    pub const fn new(kv: &'a K, index: &'a LabelIndex, tags: &'a TagResolver) -> Self {
        Self {
            kv,
            index,
            tags,
            bypass_index: false,
        }
    }

    /// Select candidates by storage scan even when label predicates are
    /// given. Labels are still checked against each record.
    #[must_use]
    pub const fn bypass_index(mut self) -> Self {
        self.bypass_index = true;
        self
    }

    /// Read one version from the source of truth.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` from the backend or a serialization error
    /// for a corrupt record.
    pub fn load<E: Entity>(&self, key: &RecordKey) -> Result<Option<E>> {
        self.kv
            .get(&key.storage_key())?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
            .transpose()
    }

    /// Evaluate `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for a malformed query, or any backend or
    /// decoding failure.
    pub fn list<E: Entity>(&self, query: &Query) -> Result<Vec<E>> {
        self.list_where(query, |_: &E| true)
    }

    /// Evaluate `query` with an extra per-record predicate (applied before
    /// sorting and limiting).
    ///
    /// # Errors
    ///
    /// Same as [`Self::list`].
    pub fn list_where<E, F>(&self, query: &Query, extra: F) -> Result<Vec<E>>
    where
        E: Entity,
        F: Fn(&E) -> bool,
    {
        query.validate()?;

        let raw = self.candidates::<E>(query)?;
        let scanned = raw.len();
        let mut records: Vec<E> = decode_all(raw)?
            .into_iter()
            .filter(|record: &E| self.matches(query, record))
            .filter(|record| extra(record))
            .collect();

        if query.sort_by_time {
            records.sort_by(compare_recent_first);
        } else {
            records.sort_by(|a, b| (a.name(), a.uid()).cmp(&(b.name(), b.uid())));
        }
        if query.limit > 0 {
            records.truncate(query.limit);
        }

        debug!(
            kind = %E::KIND,
            project = %query.project,
            scanned,
            returned = records.len(),
            "list"
        );
        Ok(records)
    }

    /// Whether `record` passes every dimension of `query`.
    pub fn matches<E: Entity>(&self, query: &Query, record: &E) -> bool {
        if record.project() != query.project {
            return false;
        }
        if !query.name.matches(record.name()) {
            return false;
        }
        if !LabelPredicate::all_match(&query.labels, record.labels()) {
            return false;
        }
        if let Some(state) = &query.state {
            if record.state() != Some(state.as_str()) {
                return false;
            }
        }
        if !query.time.contains(record.timestamp()) {
            return false;
        }
        match &query.tag {
            TagFilter::Any => true,
            TagFilter::Tag(tag) => {
                let partition = PartitionKey::new(E::KIND, record.project(), record.name());
                self.tags
                    .resolve(&partition, tag)
                    .is_ok_and(|uid| uid == record.uid())
            }
        }
    }

    fn candidates<E: Entity>(&self, query: &Query) -> Result<Vec<Vec<u8>>> {
        let kind = E::KIND;

        if !query.labels.is_empty() && !self.bypass_index {
            let mut keys: Vec<RecordKey> = self
                .index
                .match_scoped(kind, &query.project, &query.labels)
                .into_iter()
                .collect();
            keys.sort();
            return self.read_through(keys);
        }

        if let (Some(name), true) = (query.name.exact(), kind.addressed_by_name()) {
            if let TagFilter::Tag(tag) = &query.tag {
                let partition = PartitionKey::new(kind, &query.project, name);
                return match self.tags.resolve(&partition, tag) {
                    Ok(uid) => self.read_through(vec![RecordKey::new(kind, &query.project, name, uid)]),
                    Err(e) if e.is_not_found() => Ok(Vec::new()),
                    Err(e) => Err(e),
                };
            }
            return Ok(values(self.kv.scan_prefix(&name_prefix(kind, &query.project, name))?));
        }

        Ok(values(self.kv.scan_prefix(&project_prefix(kind, &query.project))?))
    }

    fn read_through(&self, keys: Vec<RecordKey>) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.kv.get(&key.storage_key())? {
                Some(bytes) => out.push(bytes),
                None => warn!(record = %key, "skipping index entry without a stored record"),
            }
        }
        Ok(out)
    }
}

fn values(entries: Vec<(String, Vec<u8>)>) -> Vec<Vec<u8>> {
    entries.into_iter().map(|(_, value)| value).collect()
}

#[cfg(feature = "rayon")]
fn decode_all<E: Entity>(raw: Vec<Vec<u8>>) -> Result<Vec<E>> {
    use rayon::prelude::*;

    raw.par_iter()
        .map(|bytes| serde_json::from_slice(bytes).map_err(Error::from))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn decode_all<E: Entity>(raw: Vec<Vec<u8>>) -> Result<Vec<E>> {
    raw.iter()
        .map(|bytes| serde_json::from_slice(bytes).map_err(Error::from))
        .collect()
}

/// Timestamp descending, missing timestamps last, ties by uid ascending.
pub fn compare_recent_first<E: Entity>(a: &E, b: &E) -> Ordering {
    match (a.timestamp(), b.timestamp()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.uid().cmp(b.uid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_name_filter_parse() {
        assert_eq!(NameFilter::parse(""), NameFilter::Any);
        assert_eq!(NameFilter::parse("train"), NameFilter::Exact("train".into()));
        assert!(NameFilter::parse("~TRAIN").matches("nightly-training"));
        assert!(!NameFilter::parse("train").matches("training"));
    }

    #[test]
    fn test_tag_filter_parse() {
        assert_eq!(TagFilter::parse(""), TagFilter::Any);
        assert_eq!(TagFilter::parse("*"), TagFilter::Any);
        assert_eq!(TagFilter::parse("latest"), TagFilter::Tag("latest".into()));
    }

    #[test]
    fn test_time_range_half_open() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let window = TimeRange::before(t1);
        assert!(window.contains(Some(t0)));
        assert!(!window.contains(Some(t1)));
        assert!(!window.contains(None));
        assert!(TimeRange::default().contains(None));
    }

    #[test]
    fn test_inverted_window_is_invalid() {
        let t0 = Utc::now();
        let query = Query::new("p").since(t0).until(t0 - Duration::seconds(1));
        assert!(matches!(query.validate(), Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn test_query_state_blank_is_open() {
        assert_eq!(Query::new("p").state("").state, None);
        assert_eq!(Query::new("p").state("ready").state.as_deref(), Some("ready"));
    }
}
