//! Tag Resolver
//!
//! Maps the mutable key `(kind, project, name, tag)` to exactly one uid.
//! Each `(kind, project, name)` partition keeps a forward table
//! (tag → uid), a reverse table (uid → tags) and a bounded assignment
//! history per tag. A partition's tables are only ever touched through a
//! single `DashMap` entry guard, so forward and reverse tables change
//! together and concurrent `assign` calls on one key are applied in the
//! order they acquire the guard (last writer wins).

use crate::entity::{escape, name_prefix, EntityKind, PartitionKey};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Default number of past assignments remembered per tag.
pub const DEFAULT_TAG_HISTORY_LIMIT: usize = 32;

/// Storage-key prefix of persisted tag assignments.
pub const TAG_KEY_PREFIX: &str = "tag/";

/// Persisted form of one live tag assignment, so tags survive a reopen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Entity kind
    pub kind: EntityKind,
    /// Project namespace
    pub project: String,
    /// Entity name
    pub name: String,
    /// Tag
    pub tag: String,
    /// Uid the tag points at
    pub uid: String,
}

impl TagEntry {
    /// Entry for `tag` → `uid` in `partition`.
    #[must_use]
    pub fn new(partition: &PartitionKey, tag: &str, uid: &str) -> Self {
        Self {
            kind: partition.kind,
            project: partition.project.clone(),
            name: partition.name.clone(),
            tag: tag.to_string(),
            uid: uid.to_string(),
        }
    }

    /// Partition the entry belongs to.
    #[must_use]
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.kind, &self.project, &self.name)
    }
}

/// Key under which a tag assignment is persisted.
#[must_use]
pub fn tag_storage_key(partition: &PartitionKey, tag: &str) -> String {
    format!(
        "{TAG_KEY_PREFIX}{}{}",
        name_prefix(partition.kind, &partition.project, &partition.name),
        escape(tag)
    )
}

/// One past or current assignment of a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAssignment {
    /// Uid the tag pointed to
    pub uid: String,
    /// When the assignment was made
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TagPartition {
    by_tag: FxHashMap<String, String>,
    by_uid: FxHashMap<String, BTreeSet<String>>,
    history: FxHashMap<String, VecDeque<TagAssignment>>,
}

impl TagPartition {
    fn detach(&mut self, tag: &str, uid: &str) {
        if let Some(tags) = self.by_uid.get_mut(uid) {
            tags.remove(tag);
            if tags.is_empty() {
                self.by_uid.remove(uid);
            }
        }
    }
}

/// Store-owned tag tables.
#[derive(Debug)]
pub struct TagResolver {
    partitions: DashMap<PartitionKey, TagPartition>,
    history_limit: usize,
}

impl Default for TagResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_HISTORY_LIMIT)
    }
}

impl TagResolver {
    /// Create an empty resolver keeping `history_limit` assignments per tag.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            partitions: DashMap::new(),
            history_limit,
        }
    }

    /// Current uid behind `tag`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the tag is not assigned.
    pub fn resolve(&self, partition: &PartitionKey, tag: &str) -> Result<String> {
        self.partitions
            .get(partition)
            .and_then(|p| p.by_tag.get(tag).cloned())
            .ok_or_else(|| {
                Error::not_found(partition.kind, &partition.project, &partition.name, tag)
            })
    }

    /// Point `tag` at `uid`, replacing any previous mapping for the tag.
    pub fn assign(&self, partition: &PartitionKey, tag: &str, uid: &str) {
        let mut p = self.partitions.entry(partition.clone()).or_default();
        if let Some(previous) = p.by_tag.insert(tag.to_string(), uid.to_string()) {
            if previous != uid {
                p.detach(tag, &previous);
            }
        }
        p.by_uid
            .entry(uid.to_string())
            .or_default()
            .insert(tag.to_string());

        if self.history_limit > 0 {
            let limit = self.history_limit;
            let history = p.history.entry(tag.to_string()).or_default();
            history.push_back(TagAssignment {
                uid: uid.to_string(),
                assigned_at: Utc::now(),
            });
            while history.len() > limit {
                history.pop_front();
            }
        }
    }

    /// Remove a single tag. Returns the uid it pointed to, if any.
    pub fn unassign(&self, partition: &PartitionKey, tag: &str) -> Option<String> {
        let mut p = self.partitions.get_mut(partition)?;
        let uid = p.by_tag.remove(tag)?;
        p.detach(tag, &uid);
        Some(uid)
    }

    /// Remove every tag pointing at `uid`. Returns the removed tags.
    pub fn unassign_all(&self, partition: &PartitionKey, uid: &str) -> BTreeSet<String> {
        let Some(mut p) = self.partitions.get_mut(partition) else {
            return BTreeSet::new();
        };
        let removed = p.by_uid.remove(uid).unwrap_or_default();
        for tag in &removed {
            p.by_tag.remove(tag);
        }
        removed
    }

    /// Tags currently pointing at `uid`.
    #[must_use]
    pub fn tags_for(&self, partition: &PartitionKey, uid: &str) -> BTreeSet<String> {
        self.partitions
            .get(partition)
            .and_then(|p| p.by_uid.get(uid).cloned())
            .unwrap_or_default()
    }

    /// Past assignments of `tag`, oldest first, including the current one.
    #[must_use]
    pub fn history(&self, partition: &PartitionKey, tag: &str) -> Vec<TagAssignment> {
        self.partitions
            .get(partition)
            .and_then(|p| p.history.get(tag).map(|h| h.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Number of live tag mappings across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.by_tag.len()).sum()
    }

    /// Whether no tag is assigned anywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
