//! Label Index
//!
//! Inverted index from label `key` and `(key, value)` to the set of record
//! keys carrying them. A predicate set is evaluated by intersecting posting
//! lists, smallest first, stopping as soon as the intersection is empty.
//!
//! The index is a derived structure: the entity records remain the source of
//! truth and the query engine re-validates every match against them.
//! Writers for one record key must be serialized by the caller (the store
//! holds the partition lock around `index`/`unindex`).

use crate::entity::{EntityKind, LabelPredicate, Labels, RecordKey};
use dashmap::DashMap;
use rustc_hash::FxHashSet;

/// Store-owned inverted label index.
#[derive(Debug, Default)]
pub struct LabelIndex {
    by_key: DashMap<String, FxHashSet<RecordKey>>,
    by_pair: DashMap<(String, String), FxHashSet<RecordKey>>,
    labels_of: DashMap<RecordKey, Labels>,
}

impl LabelIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `labels` for `id`, replacing whatever was indexed for it before.
    ///
    /// New postings are added before stale ones are removed, so a label the
    /// record keeps across the update stays matchable throughout.
    pub fn index(&self, id: &RecordKey, labels: &Labels) {
        for (key, value) in labels {
            self.by_key.entry(key.clone()).or_default().insert(id.clone());
            self.by_pair
                .entry((key.clone(), value.clone()))
                .or_default()
                .insert(id.clone());
        }
        let Some(previous) = self.labels_of.insert(id.clone(), labels.clone()) else {
            return;
        };
        for (key, value) in previous {
            match labels.get(&key) {
                Some(current) if *current == value => {}
                Some(_) => self.remove_pair(id, key, value),
                None => {
                    self.remove_key(id, &key);
                    self.remove_pair(id, key, value);
                }
            }
        }
    }

    /// Drop every posting for `id`. Returns whether it was indexed.
    pub fn unindex(&self, id: &RecordKey) -> bool {
        let Some((_, labels)) = self.labels_of.remove(id) else {
            return false;
        };
        for (key, value) in labels {
            self.remove_key(id, &key);
            self.remove_pair(id, key, value);
        }
        true
    }

    fn remove_key(&self, id: &RecordKey, key: &str) {
        self.by_key.remove_if_mut(key, |_, ids| {
            ids.remove(id);
            ids.is_empty()
        });
    }

    fn remove_pair(&self, id: &RecordKey, key: String, value: String) {
        self.by_pair.remove_if_mut(&(key, value), |_, ids| {
            ids.remove(id);
            ids.is_empty()
        });
    }

    /// Record keys whose labels satisfy every predicate.
    ///
    /// An empty predicate set matches every indexed record.
    #[must_use]
    pub fn match_all(&self, predicates: &[LabelPredicate]) -> FxHashSet<RecordKey> {
        if predicates.is_empty() {
            return self.labels_of.iter().map(|e| e.key().clone()).collect();
        }

        let mut sized: Vec<(usize, &LabelPredicate)> = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            let size = self.posting_len(predicate);
            if size == 0 {
                return FxHashSet::default();
            }
            sized.push((size, predicate));
        }
        sized.sort_by_key(|(size, _)| *size);

        let mut result = self.posting(sized[0].1);
        for (_, predicate) in &sized[1..] {
            let posting = self.posting(predicate);
            result.retain(|id| posting.contains(id));
            if result.is_empty() {
                break;
            }
        }
        result
    }

    /// Like [`Self::match_all`], restricted to one kind and project.
    #[must_use]
    pub fn match_scoped(
        &self,
        kind: EntityKind,
        project: &str,
        predicates: &[LabelPredicate],
    ) -> FxHashSet<RecordKey> {
        let mut ids = self.match_all(predicates);
        ids.retain(|id| id.kind == kind && id.project == project);
        ids
    }

    /// Labels currently indexed for `id`.
    #[must_use]
    pub fn labels(&self, id: &RecordKey) -> Option<Labels> {
        self.labels_of.get(id).map(|l| l.value().clone())
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels_of.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels_of.is_empty()
    }

    fn posting_len(&self, predicate: &LabelPredicate) -> usize {
        match predicate {
            LabelPredicate::Exists(key) => self.by_key.get(key).map_or(0, |ids| ids.len()),
            LabelPredicate::Equals(key, value) => self
                .by_pair
                .get(&(key.clone(), value.clone()))
                .map_or(0, |ids| ids.len()),
        }
    }

    fn posting(&self, predicate: &LabelPredicate) -> FxHashSet<RecordKey> {
        let ids = match predicate {
            LabelPredicate::Exists(key) => self.by_key.get(key).map(|ids| ids.value().clone()),
            LabelPredicate::Equals(key, value) => self
                .by_pair
                .get(&(key.clone(), value.clone()))
                .map(|ids| ids.value().clone()),
        };
        ids.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(uid: &str) -> RecordKey {
        RecordKey::new(EntityKind::Run, "p", "", uid)
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_equality_and_presence() {
        let index = LabelIndex::new();
        index.index(&key("u1"), &labels(&[("env", "prod")]));
        index.index(&key("u2"), &labels(&[("env", "dev"), ("gpu", "a100")]));

        let prod = index.match_all(&[LabelPredicate::equals("env", "prod")]);
        assert_eq!(prod.len(), 1);
        assert!(prod.contains(&key("u1")));

        assert_eq!(index.match_all(&[LabelPredicate::exists("env")]).len(), 2);
        assert_eq!(
            index
                .match_all(&[LabelPredicate::exists("env"), LabelPredicate::exists("gpu")])
                .len(),
            1
        );
        assert!(index
            .match_all(&[LabelPredicate::equals("env", "staging")])
            .is_empty());
    }

    #[test]
    fn test_reindex_replaces_postings() {
        let index = LabelIndex::new();
        index.index(&key("u1"), &labels(&[("env", "prod")]));
        index.index(&key("u1"), &labels(&[("env", "dev")]));

        assert!(index
            .match_all(&[LabelPredicate::equals("env", "prod")])
            .is_empty());
        assert_eq!(index.match_all(&[LabelPredicate::equals("env", "dev")]).len(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_reindex_keeps_shared_postings_and_drops_stale_keys() {
        let index = LabelIndex::new();
        index.index(&key("u1"), &labels(&[("env", "prod"), ("gpu", "a100")]));
        index.index(&key("u1"), &labels(&[("env", "prod"), ("team", "vision")]));

        assert_eq!(index.match_all(&[LabelPredicate::equals("env", "prod")]).len(), 1);
        assert_eq!(index.match_all(&[LabelPredicate::exists("team")]).len(), 1);
        assert!(index.match_all(&[LabelPredicate::exists("gpu")]).is_empty());
        assert!(!index.by_key.contains_key("gpu"));
        assert_eq!(index.labels(&key("u1")), Some(labels(&[("env", "prod"), ("team", "vision")])));
    }

    #[test]
    fn test_unindex_cleans_empty_postings() {
        let index = LabelIndex::new();
        index.index(&key("u1"), &labels(&[("env", "prod")]));

        assert!(index.unindex(&key("u1")));
        assert!(!index.unindex(&key("u1")));
        assert!(index.is_empty());
        assert!(index.by_key.is_empty());
        assert!(index.by_pair.is_empty());
    }

    #[test]
    fn test_empty_predicates_match_all_indexed() {
        let index = LabelIndex::new();
        index.index(&key("u1"), &Labels::new());
        index.index(&key("u2"), &labels(&[("env", "prod")]));
        assert_eq!(index.match_all(&[]).len(), 2);
    }

    #[test]
    fn test_match_scoped_filters_project() {
        let index = LabelIndex::new();
        index.index(&key("u1"), &labels(&[("env", "prod")]));
        index.index(
            &RecordKey::new(EntityKind::Run, "other", "", "u2"),
            &labels(&[("env", "prod")]),
        );
        let ids = index.match_scoped(EntityKind::Run, "p", &[LabelPredicate::exists("env")]);
        assert_eq!(ids.len(), 1);
    }
}
