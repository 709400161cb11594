//! Content-addressed dual-tier caching.
//!
//! An in-memory tier in front of an optional persistent key-value tier,
//! with age expiry and oldest-first budget eviction. One generic store
//! backs both the audio-blob cache and the job-message cache.

pub mod store;

pub use store::{
    CacheBounds, CacheEntry, CacheError, CacheMetrics, CachePayload, CacheStats,
    EntryMetadata, FilesystemBackend, PersistentBackend, RecordMeta, Result, TieredCache,
};
