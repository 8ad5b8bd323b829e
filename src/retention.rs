//! Retention/Pruning Engine
//!
//! Age- and filter-scoped bulk deletion.
//!
//! ## Per-version removal order
//!
//! ```text
//! 1. tags.unassign_all   no tag can point at the version any more
//!                        (in memory, then the persisted tag entries)
//! 2. index.unindex       label queries stop finding it
//! 3. kv.delete           the record itself disappears
//! ```
//!
//! A failure between steps leaves at worst an untagged, unindexed record:
//! unreachable by tag, never a tag pointing at missing data.
//!
//! ## Batch semantics
//!
//! A bulk delete is NOT atomic. Candidates are selected with a storage scan
//! (never through the label index, so versions whose index entries were
//! already removed by an interrupted run are still found), then removed one
//! at a time, each under its own partition lock and after re-checking that
//! the record still exists and still matches. An error stops the batch and
//! keeps the progress made so far; re-running the same call finishes the
//! remaining work and returns only what it removed.

use crate::entity::{Entity, RecordKey};
use crate::index::LabelIndex;
use crate::kv::KvStore;
use crate::locks::PartitionLocks;
use crate::query::{Query, QueryEngine};
use crate::tags::{tag_storage_key, TagResolver};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Cutoff timestamp `days` before now.
///
/// # Errors
///
/// Returns `InvalidFilter` for a negative number of days.
pub fn older_than_days(days: i64) -> Result<DateTime<Utc>> {
    if days < 0 {
        return Err(Error::InvalidFilter(format!(
            "age threshold must not be negative, got {days} days"
        )));
    }
    Duration::try_days(days)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| Error::InvalidFilter(format!("age threshold of {days} days is out of range")))
}

/// Remove one version in the order tags → index → record.
///
/// The caller must hold the version's partition lock. Returns the tags that
/// pointed at the version.
///
/// # Errors
///
/// Propagates backend failures from the record removal.
pub fn remove_version<K: KvStore>(
    kv: &K,
    index: &LabelIndex,
    tags: &TagResolver,
    key: &RecordKey,
) -> Result<BTreeSet<String>> {
    let partition = key.partition();
    let removed_tags = tags.unassign_all(&partition, &key.uid);
    for tag in &removed_tags {
        kv.delete(&tag_storage_key(&partition, tag))?;
    }
    index.unindex(key);
    kv.delete(&key.storage_key())?;
    debug!(record = %key, tags = ?removed_tags, "removed version");
    Ok(removed_tags)
}

/// Bulk deleter over the store's state.
pub struct Pruner<'a, K: KvStore> {
    kv: &'a K,
    index: &'a LabelIndex,
    tags: &'a TagResolver,
    locks: &'a PartitionLocks,
}

impl<'a, K: KvStore> Pruner<'a, K> {
    /// Borrow the structures a prune needs.
    #[must_use]
    pub const fn new(
        kv: &'a K,
        index: &'a LabelIndex,
        tags: &'a TagResolver,
        locks: &'a PartitionLocks,
    ) -> Self {
        Self {
            kv,
            index,
            tags,
            locks,
        }
    }

    /// Delete every version matching `query` whose timestamp is strictly
    /// before `older_than`. `None` applies no age restriction and deletes
    /// every match.
    ///
    /// The age bound is AND-ed with the query's filters. Returns the number
    /// of versions this call removed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for a malformed query; backend failures stop
    /// the batch and are returned as-is.
    pub fn delete_many<E: Entity>(
        &self,
        query: &Query,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let mut scoped = query.clone();
        scoped.sort_by_time = false;
        scoped.limit = 0;
        if let Some(cutoff) = older_than {
            scoped.time.until = Some(scoped.time.until.map_or(cutoff, |until| until.min(cutoff)));
        }

        let engine = QueryEngine::new(self.kv, self.index, self.tags).bypass_index();
        let candidates: Vec<E> = engine.list(&scoped)?;
        let total = candidates.len();

        let mut deleted = 0;
        for candidate in candidates {
            let key = candidate.record_key();
            let partition = key.partition();
            let guard = self.locks.lock(&partition);
            let removed = engine.load::<E>(&key).and_then(|current| {
                if current.is_some_and(|record| engine.matches(&scoped, &record)) {
                    remove_version(self.kv, self.index, self.tags, &key)?;
                    return Ok(true);
                }
                Ok(false)
            });
            drop(guard);
            self.locks.release(&partition);

            if removed? {
                deleted += 1;
            }
        }

        info!(
            kind = %E::KIND,
            project = %query.project,
            older_than = ?older_than,
            candidates = total,
            deleted,
            "bulk delete"
        );
        Ok(deleted)
    }
}
