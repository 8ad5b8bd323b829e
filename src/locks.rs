//! Per-partition write locks
//!
//! Mutations on one `(kind, project, name)` partition are serialized by a
//! dedicated mutex; distinct partitions never contend. The lock map only
//! hands out `Arc`s, so a guard stays valid while the map is modified.

use crate::entity::PartitionKey;
use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;

/// Guard held for the duration of one partition mutation.
pub type PartitionGuard = parking_lot::ArcMutexGuard<RawMutex, ()>;

/// Store-owned map of partition mutexes.
#[derive(Debug, Default)]
pub struct PartitionLocks {
    locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
}

impl PartitionLocks {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the partition's lock is held.
    #[must_use]
    pub fn lock(&self, partition: &PartitionKey) -> PartitionGuard {
        // Clone the Arc out before locking so the map shard is released.
        let mutex = Arc::clone(
            self.locks
                .entry(partition.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        mutex.lock_arc()
    }

    /// Drop the mutex of a partition nobody holds or waits on.
    ///
    /// Keeps the map from growing with every partition ever written.
    pub fn release(&self, partition: &PartitionKey) {
        self.locks
            .remove_if(partition, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of partitions with a live mutex.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no partition has a live mutex.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_partition_is_serialized() {
        let locks = PartitionLocks::new();
        let part = PartitionKey::new(EntityKind::Artifact, "p", "model");
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let _guard = locks.lock(&part);
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_skips_held_lock() {
        let locks = PartitionLocks::new();
        let part = PartitionKey::new(EntityKind::Run, "p", "u1");

        let guard = locks.lock(&part);
        locks.release(&part);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.release(&part);
        assert!(locks.is_empty());
    }
}
