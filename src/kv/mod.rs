//! Key-value persistence contract
//!
//! The store keeps every entity version as one serialized value under its
//! storage key (see [`crate::entity::RecordKey::storage_key`]). Any medium
//! that implements [`KvStore`] can back the store:
//! - [`MemoryKvStore`]: in-process `DashMap` (default)
//! - [`CompressedKvStore`]: transparent LZ4/ZSTD wrapper (feature `compression`)
//!
//! A single `set` must replace a value atomically; readers never observe a
//! partially written record. Backend failures are reported as
//! [`crate::Error::StoreUnavailable`].
//!
//! # Example
//!
//! ```rust
//! use mlmeta::kv::{KvStore, MemoryKvStore};
//!
//! # fn example() -> mlmeta::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! store.set("run/p//u1", b"{}".to_vec())?;
//! assert_eq!(store.get("run/p//u1")?, Some(b"{}".to_vec()));
//! assert_eq!(store.scan_prefix("run/p/")?.len(), 1);
//!
//! store.delete("run/p//u1")?;
//! assert!(!store.exists("run/p//u1")?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#[cfg(feature = "compression")]
mod compressed;
mod memory;

#[cfg(feature = "compression")]
pub use compressed::{CompressedKvStore, Compression};
pub use memory::MemoryKvStore;

use crate::Result;

/// Synchronous key-value backend.
pub trait KvStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value for a key.
    ///
    /// Overwrites any existing value.
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a key.
    ///
    /// No-op if the key doesn't exist.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Make prior writes durable. In-memory backends have nothing to do.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<S: KvStore + ?Sized> KvStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        (**self).scan_prefix(prefix)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_kv_set_get() {
        let store = MemoryKvStore::new();

        store.set("key1", b"value1".to_vec()).unwrap();
        let value = store.get("key1").unwrap();

        assert_eq!(value, Some(b"value1".to_vec()));
    }

    #[test]
    fn test_memory_kv_get_nonexistent() {
        let store = MemoryKvStore::new();

        assert_eq!(store.get("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_memory_kv_overwrite() {
        let store = MemoryKvStore::new();

        store.set("key", b"value1".to_vec()).unwrap();
        store.set("key", b"value2".to_vec()).unwrap();

        assert_eq!(store.get("key").unwrap(), Some(b"value2".to_vec()));
    }

    #[test]
    fn test_memory_kv_delete_nonexistent() {
        let store = MemoryKvStore::new();

        // Should not error
        store.delete("nonexistent").unwrap();
    }

    #[test]
    fn test_memory_kv_exists() {
        let store = MemoryKvStore::new();

        assert!(!store.exists("key").unwrap());
        store.set("key", b"value".to_vec()).unwrap();
        assert!(store.exists("key").unwrap());
        store.delete("key").unwrap();
        assert!(!store.exists("key").unwrap());
    }

    #[test]
    fn test_memory_kv_scan_prefix_is_ordered_and_bounded() {
        let store = MemoryKvStore::new();

        store.set("artifact/p/b/2", b"b2".to_vec()).unwrap();
        store.set("artifact/p/a/1", b"a1".to_vec()).unwrap();
        store.set("artifact/p/ab/1", b"ab1".to_vec()).unwrap();
        store.set("run/p//1", b"r1".to_vec()).unwrap();

        let keys: Vec<String> = store
            .scan_prefix("artifact/p/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["artifact/p/a/1", "artifact/p/ab/1", "artifact/p/b/2"]);

        assert_eq!(store.scan_prefix("artifact/p/a/").unwrap().len(), 1);
    }

    #[test]
    fn test_memory_kv_concurrent_access() {
        let store = Arc::new(MemoryKvStore::new());

        std::thread::scope(|scope| {
            for i in 0..16 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    let key = format!("key{i}");
                    store.set(&key, format!("value{i}").into_bytes()).unwrap();
                });
            }
        });

        for i in 0..16 {
            let expected = format!("value{i}").into_bytes();
            assert_eq!(store.get(&format!("key{i}")).unwrap(), Some(expected));
        }
    }

    #[test]
    fn test_arc_store_delegates() {
        let store: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new());
        KvStore::set(&store, "k", vec![1]).unwrap();
        assert!(KvStore::exists(&store, "k").unwrap());
        assert_eq!(store.len(), 1);
    }
}
