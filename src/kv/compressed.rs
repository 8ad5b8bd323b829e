//! Compressed KV Store wrapper
//!
//! Provides transparent LZ4/ZSTD compression for any `KvStore` backend.
//! Serialized records are JSON and compress well, which keeps large
//! histories of feature-set and run versions small.

use crate::kv::KvStore;
use crate::{Error, Result};

/// Compression algorithm for stored records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// LZ4 - Fast compression, good for hot metadata (default)
    #[default]
    Lz4,
    /// ZSTD - Better ratio, slower
    Zstd,
}

impl Compression {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns error if compression fails (e.g., ZSTD internal error)
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Compression(format!("ZSTD compression failed: {e}"))),
        }
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Compression(format!("LZ4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::Compression(format!("ZSTD decompression failed: {e}"))),
        }
    }
}

/// Compressed KV store wrapper
///
/// Wraps any `KvStore` implementation and transparently compresses values.
/// Keys are left as-is so prefix scans keep working.
///
/// # Example
///
/// ```rust
/// use mlmeta::kv::{CompressedKvStore, Compression, KvStore, MemoryKvStore};
/// use mlmeta::MetadataStore;
///
/// let backend = CompressedKvStore::new(MemoryKvStore::new(), Compression::Zstd);
/// let store = MetadataStore::builder().backend(backend).build();
/// # let _ = store;
/// ```
#[derive(Debug)]
pub struct CompressedKvStore<S: KvStore> {
    inner: S,
    compression: Compression,
}

impl<S: KvStore> CompressedKvStore<S> {
    /// Create a new compressed KV store wrapping the given store
    #[must_use]
    pub const fn new(inner: S, compression: Compression) -> Self {
        Self { inner, compression }
    }

    /// Get reference to inner store (for inspection/testing)
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Get compression algorithm
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }
}

impl<S: KvStore> KvStore for CompressedKvStore<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner
            .get(key)?
            .map(|compressed| self.compression.decompress(&compressed))
            .transpose()
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let compressed = self.compression.compress(&value)?;
        self.inner.set(key, compressed)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.inner
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, compressed)| Ok((key, self.compression.decompress(&compressed)?)))
            .collect()
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}
