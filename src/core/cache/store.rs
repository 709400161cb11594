//! Dual-tier cache store: an in-memory map in front of a persistent
//! key-value tier.
//!
//! One generic component serves both cache instances (audio blobs and
//! job messages); the instances differ only in payload type and bounds.
//! Lookups promote persistent entries into memory, puts mirror down,
//! and a two-pass sweep (age expiry, then oldest-first byte/count
//! budget) runs synchronously after every put. Persistent-tier failures
//! degrade the store to memory-only operation and are never surfaced to
//! callers.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_128;

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error during persistent-tier operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistent tier cannot be initialized or read.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Stored record cannot be decoded back into its payload type.
    #[error("Corrupt cache record: {0}")]
    Corrupt(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// Payloads and entries
// =============================================================================

/// Payload types storable in a tiered cache.
///
/// The persistent tier holds payloads as raw bytes; implementations
/// define the byte form and how to rebuild the in-memory form from it.
pub trait CachePayload: Clone + Send + Sync + 'static {
    /// Size used for budget accounting.
    fn size_bytes(&self) -> u64;

    /// Byte form written to the persistent tier.
    fn to_bytes(&self) -> Bytes;

    /// Rebuilds the payload from its stored byte form.
    fn from_bytes(bytes: Bytes) -> Result<Self>
    where
        Self: Sized;
}

impl CachePayload for Bytes {
    fn size_bytes(&self) -> u64 {
        self.len() as u64
    }

    fn to_bytes(&self) -> Bytes {
        self.clone()
    }

    fn from_bytes(bytes: Bytes) -> Result<Self> {
        Ok(bytes)
    }
}

impl CachePayload for String {
    fn size_bytes(&self) -> u64 {
        self.len() as u64
    }

    fn to_bytes(&self) -> Bytes {
        Bytes::from(self.clone().into_bytes())
    }

    fn from_bytes(bytes: Bytes) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CacheError::Corrupt(e.to_string()))
    }
}

/// Auxiliary per-entry fields carried alongside the payload.
///
/// Not every instance fills every field: the audio cache records the
/// synthesis duration, the message cache records the owning user and
/// the content hash of the message text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Milliseconds the remote service took to produce the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Times this entry has been served from cache.
    #[serde(default)]
    pub replay_count: u64,

    /// Last time this entry was served, ms since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_replayed_at: Option<u64>,

    /// Content hash of the source text, for hash lookups when the
    /// primary key is a caller-supplied identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Owning user, for per-user listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Free-form source tag ("tts", "import", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One cached record.
#[derive(Debug, Clone)]
pub struct CacheEntry<P> {
    /// Primary key: the content hash for the audio instance, the job
    /// identifier for the message instance.
    pub key: String,
    pub payload: P,
    /// Insertion time, ms since the epoch. Drives expiry and eviction
    /// order.
    pub created_at: u64,
    /// Payload size used for budget accounting.
    pub size_bytes: u64,
    pub metadata: EntryMetadata,
}

/// Entry fields mirrored to the persistent tier next to the payload.
///
/// Carries the key because on-disk file names are derived hashes and
/// cannot be reversed during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    pub key: String,
    pub created_at: u64,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl RecordMeta {
    fn from_entry<P>(entry: &CacheEntry<P>) -> Self {
        Self {
            key: entry.key.clone(),
            created_at: entry.created_at,
            size_bytes: entry.size_bytes,
            metadata: entry.metadata.clone(),
        }
    }
}

// =============================================================================
// Persistent tier
// =============================================================================

/// Interface to the persistent key-value tier.
#[async_trait]
pub trait PersistentBackend: Send + Sync {
    /// Writes a record and its payload, replacing any previous version.
    async fn store(&self, record: &RecordMeta, payload: Bytes) -> Result<()>;

    /// Rewrites only the record metadata (replay bumps).
    async fn update_meta(&self, record: &RecordMeta) -> Result<()>;

    /// Loads a record and its payload by key.
    async fn load(&self, key: &str) -> Result<Option<(RecordMeta, Bytes)>>;

    /// Deletes a record by key. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every record.
    async fn clear(&self) -> Result<()>;

    /// Lists the metadata of every stored record.
    async fn scan(&self) -> Result<Vec<RecordMeta>>;

    /// Returns the backend type as a string identifier.
    fn backend_type(&self) -> &str;
}

/// Filesystem-based persistent tier.
///
/// Records fan out over two-character subdirectories named by the xxh3
/// hash of the key; the payload lives in the hash-named file and the
/// metadata in a JSON sidecar next to it. Writes go through a temp file
/// and rename so readers never observe a partial record.
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    /// Creates the backend, ensuring the base directory exists.
    pub async fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn data_path(&self, key: &str) -> PathBuf {
        let hash = format!("{:032x}", xxh3_128(key.as_bytes()));
        let dir = &hash[0..2];
        self.base_path.join(dir).join(hash)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let mut path = self.data_path(key);
        path.set_extension("meta");
        path
    }

    async fn write_meta(&self, record: &RecordMeta) -> Result<()> {
        let meta_path = self.meta_path(&record.key);
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let meta_json = serde_json::to_vec(record)?;
        // Distinct temp suffix: a replay bump may race a payload write
        // for the same key.
        let temp_path = meta_path.with_extension("meta.tmp");
        let mut meta_file = fs::File::create(&temp_path).await?;
        meta_file.write_all(&meta_json).await?;
        meta_file.sync_all().await?;
        drop(meta_file);

        fs::rename(&temp_path, &meta_path).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistentBackend for FilesystemBackend {
    async fn store(&self, record: &RecordMeta, payload: Bytes) -> Result<()> {
        let data_path = self.data_path(&record.key);
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write using temp file
        let temp_path = data_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &data_path).await?;

        self.write_meta(record).await
    }

    async fn update_meta(&self, record: &RecordMeta) -> Result<()> {
        self.write_meta(record).await
    }

    async fn load(&self, key: &str) -> Result<Option<(RecordMeta, Bytes)>> {
        let data_path = self.data_path(key);
        let meta_path = self.meta_path(key);

        let meta_data = match fs::read(&meta_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: RecordMeta = serde_json::from_slice(&meta_data)?;

        match fs::read(&data_path).await {
            Ok(data) => Ok(Some((record, Bytes::from(data)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Orphaned metadata, drop it
                let _ = fs::remove_file(&meta_path).await;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _ = fs::remove_file(&self.data_path(key)).await;
        let _ = fs::remove_file(&self.meta_path(key)).await;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        warn!("Clearing persistent cache tier at {:?}", self.base_path);
        let _ = fs::remove_dir_all(&self.base_path).await;
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<RecordMeta>> {
        let mut records = Vec::new();

        let mut dirs = fs::read_dir(&self.base_path).await?;
        while let Some(dir_entry) = dirs.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(dir_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let path = file_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                match fs::read(&path).await {
                    Ok(bytes) => match serde_json::from_slice::<RecordMeta>(&bytes) {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            debug!("Skipping unreadable cache metadata {:?}: {}", path, e)
                        }
                    },
                    Err(e) => debug!("Skipping unreadable cache metadata {:?}: {}", path, e),
                }
            }
        }

        Ok(records)
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Metrics tracking for cache operations.
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    hits: Arc<RwLock<u64>>,
    misses: Arc<RwLock<u64>>,
    puts: Arc<RwLock<u64>>,
    expired: Arc<RwLock<u64>>,
    evicted: Arc<RwLock<u64>>,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            hits: Arc::new(RwLock::new(0)),
            misses: Arc::new(RwLock::new(0)),
            puts: Arc::new(RwLock::new(0)),
            expired: Arc::new(RwLock::new(0)),
            evicted: Arc::new(RwLock::new(0)),
        }
    }

    /// Records a cache hit.
    pub fn record_hit(&self) {
        *self.hits.write() += 1;
    }

    /// Records a cache miss.
    pub fn record_miss(&self) {
        *self.misses.write() += 1;
    }

    /// Records a put operation.
    pub fn record_put(&self) {
        *self.puts.write() += 1;
    }

    /// Records an entry removed by the expiry pass.
    pub fn record_expired(&self) {
        *self.expired.write() += 1;
    }

    /// Records an entry removed by the budget pass.
    pub fn record_evicted(&self) {
        *self.evicted.write() += 1;
    }

    /// Returns current counters as (hits, misses, puts, expired, evicted).
    pub fn get_stats(&self) -> (u64, u64, u64, u64, u64) {
        (
            *self.hits.read(),
            *self.misses.read(),
            *self.puts.read(),
            *self.expired.read(),
            *self.evicted.read(),
        )
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        *self.hits.write() = 0;
        *self.misses.write() = 0;
        *self.puts.write() = 0;
        *self.expired.write() = 0;
        *self.evicted.write() = 0;
    }
}

/// Read-only stats snapshot for observability; not authoritative state.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub expired: u64,
    pub evicted: u64,
    /// Entries currently in the memory tier.
    pub entry_count: usize,
    /// Sum of payload sizes in the memory tier.
    pub total_bytes: u64,
    /// Entries known to the persistent tier (including promoted ones).
    pub persisted_entries: usize,
    pub hit_rate: f64,
}

// =============================================================================
// Bounds
// =============================================================================

/// Size and age bounds for one cache instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheBounds {
    /// Total payload byte budget.
    pub max_bytes: u64,
    /// Entry lifetime in milliseconds.
    pub max_age_ms: u64,
    /// Optional cap on entry count.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl CacheBounds {
    /// Defaults for the audio-blob instance: 50 MB, 7 days, no count cap.
    pub fn audio() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            max_age_ms: 7 * 24 * 60 * 60 * 1000,
            max_entries: None,
        }
    }

    /// Defaults for the job-message instance: 10 MB, 30 days, 1000 entries.
    pub fn messages() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_age_ms: 30 * 24 * 60 * 60 * 1000,
            max_entries: Some(1000),
        }
    }

    /// Rejects bounds that would make the store useless.
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(CacheError::InvalidConfig("max_bytes must be > 0".into()));
        }
        if self.max_age_ms == 0 {
            return Err(CacheError::InvalidConfig("max_age_ms must be > 0".into()));
        }
        if self.max_entries == Some(0) {
            return Err(CacheError::InvalidConfig("max_entries must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Memory tier
// =============================================================================

/// In-memory tier: key map plus a creation-time index for eviction
/// order and a running byte total.
struct MemoryTier<P> {
    entries: HashMap<String, CacheEntry<P>>,
    /// created_at -> keys inserted at that millisecond, in insertion order.
    by_age: BTreeMap<u64, Vec<String>>,
    total_bytes: u64,
}

impl<P: CachePayload> MemoryTier<P> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_age: BTreeMap::new(),
            total_bytes: 0,
        }
    }

    fn insert(&mut self, entry: CacheEntry<P>) {
        self.remove(&entry.key);
        self.total_bytes += entry.size_bytes;
        self.by_age
            .entry(entry.created_at)
            .or_default()
            .push(entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<P>> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        if let Some(keys) = self.by_age.get_mut(&entry.created_at) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.by_age.remove(&entry.created_at);
            }
        }
        Some(entry)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.by_age.clear();
        self.total_bytes = 0;
    }

    /// (created_at, key, size) oldest first, FIFO within a millisecond.
    fn oldest_first(&self) -> Vec<(u64, String, u64)> {
        self.by_age
            .iter()
            .flat_map(|(created_at, keys)| {
                keys.iter().filter_map(|k| {
                    self.entries
                        .get(k)
                        .map(|e| (*created_at, k.clone(), e.size_bytes))
                })
            })
            .collect()
    }
}

struct TierState<P> {
    memory: MemoryTier<P>,
    /// Index of everything the persistent tier holds, keyed by entry key.
    /// Maintained so eviction and listings never need a disk scan.
    persisted: HashMap<String, RecordMeta>,
}

// =============================================================================
// Tiered cache store
// =============================================================================

/// The dual-tier cache store, generic over payload type.
pub struct TieredCache<P: CachePayload> {
    name: String,
    bounds: CacheBounds,
    state: Mutex<TierState<P>>,
    backend: Option<Arc<dyn PersistentBackend>>,
    metrics: CacheMetrics,
}

impl<P: CachePayload> TieredCache<P> {
    /// Creates a memory-only store (no persistence across restarts).
    pub fn new_in_memory(name: impl Into<String>, bounds: CacheBounds) -> Self {
        Self {
            name: name.into(),
            bounds,
            state: Mutex::new(TierState {
                memory: MemoryTier::new(),
                persisted: HashMap::new(),
            }),
            backend: None,
            metrics: CacheMetrics::new(),
        }
    }

    /// Creates a store over the given persistent backend.
    ///
    /// Loads the persistent index and applies the bounds to what was
    /// found. If the backend cannot be read the store degrades to
    /// memory-only; that is logged once and never returned as an error.
    pub async fn with_backend(
        name: impl Into<String>,
        bounds: CacheBounds,
        backend: Arc<dyn PersistentBackend>,
    ) -> Self {
        let name = name.into();
        let mut cache = Self {
            name: name.clone(),
            bounds,
            state: Mutex::new(TierState {
                memory: MemoryTier::new(),
                persisted: HashMap::new(),
            }),
            backend: Some(backend.clone()),
            metrics: CacheMetrics::new(),
        };

        match backend.scan().await {
            Ok(records) => {
                let count = records.len();
                let mut state = cache.state.lock().await;
                for record in records {
                    state.persisted.insert(record.key.clone(), record);
                }
                let removed = cache.run_eviction(&mut state, now_ms());
                drop(state);
                cache.delete_persisted(removed);
                info!(
                    "Cache '{}' loaded {} persisted entries ({})",
                    name,
                    count,
                    backend.backend_type()
                );
            }
            Err(e) => {
                let e = CacheError::StorageUnavailable(e.to_string());
                warn!("Cache '{}' running memory-only: {}", name, e);
                cache.backend = None;
            }
        }

        cache
    }

    /// Opens a store at `dir`, or memory-only when `dir` is `None` or
    /// unusable. Never fails: persistence is an optimization.
    pub async fn open(name: impl Into<String>, bounds: CacheBounds, dir: Option<PathBuf>) -> Self {
        let name = name.into();
        match dir {
            None => Self::new_in_memory(name, bounds),
            Some(dir) => match FilesystemBackend::new(dir).await {
                Ok(backend) => Self::with_backend(name, bounds, Arc::new(backend)).await,
                Err(e) => {
                    warn!("Cache '{}' running memory-only: {}", name, e);
                    Self::new_in_memory(name, bounds)
                }
            },
        }
    }

    fn is_expired(&self, created_at: u64, now: u64) -> bool {
        now.saturating_sub(created_at) >= self.bounds.max_age_ms
    }

    /// Looks up an entry: memory tier first, then the persistent tier
    /// with promotion into memory on a hit. Expired entries are purged
    /// from both tiers on encounter. Hits bump the replay counter.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry<P>> {
        let now = now_ms();
        let mut state = self.state.lock().await;

        if let Some(created_at) = state.memory.entries.get(key).map(|e| e.created_at) {
            if self.is_expired(created_at, now) {
                state.memory.remove(key);
                state.persisted.remove(key);
                drop(state);
                self.metrics.record_expired();
                self.metrics.record_miss();
                self.delete_persisted(vec![key.to_string()]);
                debug!("Cache '{}': entry {} expired on lookup", self.name, key);
                return None;
            }

            let snapshot = state.memory.entries.get_mut(key).map(|entry| {
                entry.metadata.replay_count += 1;
                entry.metadata.last_replayed_at = Some(now);
                entry.clone()
            })?;
            if self.backend.is_some() {
                let record = RecordMeta::from_entry(&snapshot);
                state.persisted.insert(key.to_string(), record.clone());
                self.spawn_meta_update(record);
            }
            drop(state);
            self.metrics.record_hit();
            debug!("Cache '{}': memory hit for {}", self.name, key);
            return Some(snapshot);
        }

        let Some(meta) = state.persisted.get(key).cloned() else {
            drop(state);
            self.metrics.record_miss();
            debug!("Cache '{}': miss for {}", self.name, key);
            return None;
        };

        if self.is_expired(meta.created_at, now) {
            state.persisted.remove(key);
            drop(state);
            self.metrics.record_expired();
            self.metrics.record_miss();
            self.delete_persisted(vec![key.to_string()]);
            debug!("Cache '{}': entry {} expired on lookup", self.name, key);
            return None;
        }

        let Some(backend) = self.backend.clone() else {
            drop(state);
            self.metrics.record_miss();
            return None;
        };

        match backend.load(key).await {
            Ok(Some((record, bytes))) => match P::from_bytes(bytes) {
                Ok(payload) => {
                    let mut entry = CacheEntry {
                        key: key.to_string(),
                        payload,
                        created_at: record.created_at,
                        size_bytes: record.size_bytes,
                        metadata: record.metadata,
                    };
                    entry.metadata.replay_count += 1;
                    entry.metadata.last_replayed_at = Some(now);

                    let updated = RecordMeta::from_entry(&entry);
                    state.memory.insert(entry.clone());
                    state.persisted.insert(key.to_string(), updated.clone());
                    self.spawn_meta_update(updated);
                    drop(state);
                    self.metrics.record_hit();
                    debug!(
                        "Cache '{}': promoted {} from persistent tier",
                        self.name, key
                    );
                    Some(entry)
                }
                Err(e) => {
                    state.persisted.remove(key);
                    drop(state);
                    self.metrics.record_miss();
                    self.delete_persisted(vec![key.to_string()]);
                    warn!("Cache '{}': dropping corrupt entry {}: {}", self.name, key, e);
                    None
                }
            },
            Ok(None) => {
                // Index was stale (record vanished underneath us)
                state.persisted.remove(key);
                drop(state);
                self.metrics.record_miss();
                None
            }
            Err(e) => {
                drop(state);
                self.metrics.record_miss();
                warn!(
                    "Cache '{}': persistent read for {} failed: {}",
                    self.name, key, e
                );
                None
            }
        }
    }

    /// Finds the entry whose metadata content-hash matches `hash`.
    pub async fn lookup_by_content_hash(&self, hash: &str) -> Option<CacheEntry<P>> {
        let key = {
            let state = self.state.lock().await;
            state
                .memory
                .entries
                .values()
                .find(|e| e.metadata.content_hash.as_deref() == Some(hash))
                .map(|e| e.key.clone())
                .or_else(|| {
                    state
                        .persisted
                        .values()
                        .find(|m| m.metadata.content_hash.as_deref() == Some(hash))
                        .map(|m| m.key.clone())
                })
        }?;
        self.lookup(&key).await
    }

    /// Inserts an entry under `key`, overwriting any previous one, then
    /// runs the eviction sweep. Mirror and eviction failures are logged,
    /// never returned: caching is an optimization.
    pub async fn put(&self, key: &str, payload: P, metadata: EntryMetadata) {
        self.put_at(key, payload, metadata, now_ms()).await;
    }

    async fn put_at(&self, key: &str, payload: P, metadata: EntryMetadata, created_at: u64) {
        let payload_bytes = payload.to_bytes();
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            created_at,
            size_bytes: payload_bytes.len() as u64,
            metadata,
        };
        let record = RecordMeta::from_entry(&entry);

        let mut state = self.state.lock().await;
        state.memory.insert(entry);

        if let Some(backend) = &self.backend {
            state.persisted.insert(key.to_string(), record.clone());
            if let Err(e) = backend.store(&record, payload_bytes).await {
                // Memory stays correct; only durability is lost.
                state.persisted.remove(key);
                warn!(
                    "Cache '{}': persistent write for {} failed: {}",
                    self.name, key, e
                );
            }
        }

        self.metrics.record_put();
        debug!(
            "Cache '{}': stored {} ({} bytes)",
            self.name, key, record.size_bytes
        );

        let removed = self.run_eviction(&mut state, now_ms());
        drop(state);
        self.delete_persisted(removed);
    }

    /// Deletes from both tiers; no-op on an absent key.
    pub async fn remove(&self, key: &str) {
        let mut state = self.state.lock().await;
        let in_memory = state.memory.remove(key).is_some();
        let in_persisted = state.persisted.remove(key).is_some();
        drop(state);

        if in_memory || in_persisted {
            debug!("Cache '{}': removed {}", self.name, key);
        }
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.delete(key).await {
                debug!(
                    "Cache '{}': persistent delete for {} failed: {}",
                    self.name, key, e
                );
            }
        }
    }

    /// Empties both tiers and resets the analytics counters.
    pub async fn clear(&self) {
        warn!("Cache '{}': clearing all entries", self.name);
        let mut state = self.state.lock().await;
        state.memory.clear();
        state.persisted.clear();
        drop(state);

        self.metrics.reset();
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.clear().await {
                warn!("Cache '{}': persistent clear failed: {}", self.name, e);
            }
        }
    }

    /// Read-only stats snapshot.
    pub async fn stats(&self) -> CacheStats {
        let (hits, misses, puts, expired, evicted) = self.metrics.get_stats();
        let state = self.state.lock().await;
        let lookups = hits + misses;
        CacheStats {
            name: self.name.clone(),
            hits,
            misses,
            puts,
            expired,
            evicted,
            entry_count: state.memory.entries.len(),
            total_bytes: state.memory.total_bytes,
            persisted_entries: state.persisted.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Unexpired entries newest-first across both tiers, optionally
    /// filtered by owning user. Does not promote or bump replay counts.
    pub async fn list_recent(&self, user: Option<&str>, limit: usize) -> Vec<CacheEntry<P>> {
        let now = now_ms();
        let user_matches = |candidate: &Option<String>| match user {
            Some(u) => candidate.as_deref() == Some(u),
            None => true,
        };

        let (mut out, persisted_only) = {
            let state = self.state.lock().await;
            let mem: Vec<CacheEntry<P>> = state
                .memory
                .entries
                .values()
                .filter(|e| !self.is_expired(e.created_at, now))
                .filter(|e| user_matches(&e.metadata.user_id))
                .cloned()
                .collect();
            let persisted_only: Vec<RecordMeta> = state
                .persisted
                .values()
                .filter(|m| !state.memory.entries.contains_key(&m.key))
                .filter(|m| !self.is_expired(m.created_at, now))
                .filter(|m| user_matches(&m.metadata.user_id))
                .cloned()
                .collect();
            (mem, persisted_only)
        };

        if let Some(backend) = &self.backend {
            for meta in persisted_only {
                match backend.load(&meta.key).await {
                    Ok(Some((record, bytes))) => {
                        if let Ok(payload) = P::from_bytes(bytes) {
                            out.push(CacheEntry {
                                key: record.key.clone(),
                                payload,
                                created_at: record.created_at,
                                size_bytes: record.size_bytes,
                                metadata: record.metadata,
                            });
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(
                        "Cache '{}': skipping unreadable entry {}: {}",
                        self.name, meta.key, e
                    ),
                }
            }
        }

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        out
    }

    /// Most-replayed entries as (key, replay count), highest first.
    pub async fn top_replayed(&self, limit: usize) -> Vec<(String, u64)> {
        let state = self.state.lock().await;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for meta in state.persisted.values() {
            counts.insert(meta.key.clone(), meta.metadata.replay_count);
        }
        // Memory copies are fresher
        for entry in state.memory.entries.values() {
            counts.insert(entry.key.clone(), entry.metadata.replay_count);
        }
        drop(state);

        let mut ranked: Vec<(String, u64)> = counts.into_iter().filter(|(_, c)| *c > 0).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }

    /// Returns the metrics handle.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Backend type identifier, "memory" when running without one.
    pub fn backend_type(&self) -> &str {
        self.backend
            .as_deref()
            .map(|b| b.backend_type())
            .unwrap_or("memory")
    }

    /// Two-pass sweep: unconditional age expiry, then oldest-first
    /// eviction until both the byte and count budgets hold over the
    /// union of the tiers. Returns the keys whose persistent records
    /// still need deleting; the caller fires those off.
    fn run_eviction(&self, state: &mut TierState<P>, now: u64) -> Vec<String> {
        let mut removed = Vec::new();

        // Expiry pass
        if let Some(cutoff) = now.checked_sub(self.bounds.max_age_ms) {
            let mut expired: Vec<String> = state
                .memory
                .by_age
                .range(..=cutoff)
                .flat_map(|(_, keys)| keys.clone())
                .collect();
            expired.extend(
                state
                    .persisted
                    .values()
                    .filter(|m| !state.memory.entries.contains_key(&m.key))
                    .filter(|m| m.created_at <= cutoff)
                    .map(|m| m.key.clone()),
            );
            for key in expired {
                state.memory.remove(&key);
                state.persisted.remove(&key);
                self.metrics.record_expired();
                removed.push(key);
            }
        }

        // Budget pass over the union of both tiers, each key counted once
        let mut union = state.memory.oldest_first();
        union.extend(
            state
                .persisted
                .values()
                .filter(|m| !state.memory.entries.contains_key(&m.key))
                .map(|m| (m.created_at, m.key.clone(), m.size_bytes)),
        );
        union.sort_by_key(|(created_at, _, _)| *created_at);

        let mut total: u64 = union.iter().map(|(_, _, size)| size).sum();
        let mut count = union.len();
        let over = |total: u64, count: usize, bounds: &CacheBounds| {
            total > bounds.max_bytes || bounds.max_entries.is_some_and(|m| count > m)
        };

        let mut oldest = union.into_iter();
        while over(total, count, &self.bounds) {
            let Some((_, key, size)) = oldest.next() else {
                break;
            };
            state.memory.remove(&key);
            state.persisted.remove(&key);
            total -= size;
            count -= 1;
            self.metrics.record_evicted();
            debug!("Cache '{}': evicted {} ({} bytes)", self.name, key, size);
            removed.push(key);
        }

        removed
    }

    fn spawn_meta_update(&self, record: RecordMeta) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = backend.update_meta(&record).await {
                debug!("Replay metadata update for {} failed: {}", record.key, e);
            }
        });
    }

    /// Deletes persistent records without blocking the caller; failures
    /// are logged and dropped.
    fn delete_persisted(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let Some(backend) = self.backend.clone() else {
            return;
        };
        tokio::spawn(async move {
            for key in keys {
                if let Err(e) = backend.delete(&key).await {
                    debug!("Persistent delete for {} failed: {}", key, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::{Duration, sleep};

    fn wide_bounds() -> CacheBounds {
        CacheBounds {
            max_bytes: 1024 * 1024,
            max_age_ms: 60 * 60 * 1000,
            max_entries: None,
        }
    }

    fn meta_for_user(user: &str) -> EntryMetadata {
        EntryMetadata {
            user_id: Some(user.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_then_lookup_round_trip() {
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", wide_bounds());

        cache
            .put("key1", Bytes::from("value1"), EntryMetadata::default())
            .await;

        let entry = cache.lookup("key1").await.unwrap();
        assert_eq!(entry.payload, Bytes::from("value1"));
        assert_eq!(entry.size_bytes, 6);
        assert!(cache.lookup("key2").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 6);
    }

    #[tokio::test]
    async fn test_overwrite_same_key_updates_total() {
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", wide_bounds());

        cache
            .put("key1", Bytes::from(vec![0u8; 40]), EntryMetadata::default())
            .await;
        cache
            .put("key1", Bytes::from(vec![0u8; 10]), EntryMetadata::default())
            .await;

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 10);
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let bounds = CacheBounds {
            max_age_ms: 1000,
            ..wide_bounds()
        };
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", bounds);
        let now = now_ms();

        // Inserted 1001 ms ago with max age 1000: gone
        cache
            .put_at("old", Bytes::from("x"), EntryMetadata::default(), now - 1001)
            .await;
        // Inserted 999 ms ago: still present
        cache
            .put_at("fresh", Bytes::from("y"), EntryMetadata::default(), now - 999)
            .await;

        assert!(cache.lookup("old").await.is_none());
        assert!(cache.lookup("fresh").await.is_some());

        let stats = cache.stats().await;
        assert!(stats.expired >= 1);
    }

    #[tokio::test]
    async fn test_exact_expiry_age_is_absent() {
        let bounds = CacheBounds {
            max_age_ms: 1000,
            ..wide_bounds()
        };
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", bounds);
        let now = now_ms();

        cache
            .put_at("edge", Bytes::from("x"), EntryMetadata::default(), now - 1000)
            .await;
        assert!(cache.lookup("edge").await.is_none());
    }

    #[tokio::test]
    async fn test_budget_eviction_evicts_oldest_until_bound_holds() {
        let bounds = CacheBounds {
            max_bytes: 100,
            max_age_ms: 60 * 60 * 1000,
            max_entries: None,
        };
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", bounds);
        let now = now_ms();

        cache
            .put_at(
                "a",
                Bytes::from(vec![0u8; 40]),
                EntryMetadata::default(),
                now - 3000,
            )
            .await;
        cache
            .put_at(
                "b",
                Bytes::from(vec![0u8; 40]),
                EntryMetadata::default(),
                now - 2000,
            )
            .await;
        // Third insert pushes the total to 120 > 100: the oldest goes
        cache
            .put_at(
                "c",
                Bytes::from(vec![0u8; 40]),
                EntryMetadata::default(),
                now - 1000,
            )
            .await;

        assert!(cache.lookup("a").await.is_none());
        assert!(cache.lookup("b").await.is_some());
        assert!(cache.lookup("c").await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_bytes, 80);
        assert_eq!(stats.evicted, 1);
    }

    #[tokio::test]
    async fn test_eviction_order_ignores_insertion_order() {
        let bounds = CacheBounds {
            max_bytes: 100,
            max_age_ms: 60 * 60 * 1000,
            max_entries: None,
        };
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", bounds);
        let now = now_ms();

        // Inserted out of chronological order; "older" has the smallest
        // created_at and must still be the first evicted.
        cache
            .put_at(
                "mid",
                Bytes::from(vec![0u8; 40]),
                EntryMetadata::default(),
                now - 2000,
            )
            .await;
        cache
            .put_at(
                "older",
                Bytes::from(vec![0u8; 40]),
                EntryMetadata::default(),
                now - 5000,
            )
            .await;
        cache
            .put_at(
                "newest",
                Bytes::from(vec![0u8; 40]),
                EntryMetadata::default(),
                now - 100,
            )
            .await;

        assert!(cache.lookup("older").await.is_none());
        assert!(cache.lookup("mid").await.is_some());
        assert!(cache.lookup("newest").await.is_some());
    }

    #[tokio::test]
    async fn test_max_entries_bound() {
        let bounds = CacheBounds {
            max_bytes: 1024 * 1024,
            max_age_ms: 60 * 60 * 1000,
            max_entries: Some(2),
        };
        let cache: TieredCache<String> = TieredCache::new_in_memory("test", bounds);
        let now = now_ms();

        cache
            .put_at("j1", "first".to_string(), EntryMetadata::default(), now - 300)
            .await;
        cache
            .put_at("j2", "second".to_string(), EntryMetadata::default(), now - 200)
            .await;
        cache
            .put_at("j3", "third".to_string(), EntryMetadata::default(), now - 100)
            .await;

        assert!(cache.lookup("j1").await.is_none());
        assert!(cache.lookup("j2").await.is_some());
        assert!(cache.lookup("j3").await.is_some());
        assert_eq!(cache.stats().await.entry_count, 2);
    }

    #[tokio::test]
    async fn test_remove_is_noop_on_absent_key() {
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", wide_bounds());

        cache.remove("missing").await;

        cache
            .put("key1", Bytes::from("value1"), EntryMetadata::default())
            .await;
        cache.remove("key1").await;
        assert!(cache.lookup("key1").await.is_none());
        assert_eq!(cache.stats().await.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_clear_resets_state_and_counters() {
        let cache: TieredCache<Bytes> = TieredCache::new_in_memory("test", wide_bounds());

        cache
            .put("key1", Bytes::from("value1"), EntryMetadata::default())
            .await;
        cache
            .put("key2", Bytes::from("value2"), EntryMetadata::default())
            .await;
        let _ = cache.lookup("key1").await;

        cache.clear().await;

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.puts, 0);
        assert!(cache.lookup("key1").await.is_none());
    }

    #[tokio::test]
    async fn test_replay_count_bumped_on_hit() {
        let cache: TieredCache<String> = TieredCache::new_in_memory("test", wide_bounds());

        cache
            .put("j1", "done".to_string(), EntryMetadata::default())
            .await;

        let first = cache.lookup("j1").await.unwrap();
        assert_eq!(first.metadata.replay_count, 1);
        let second = cache.lookup("j1").await.unwrap();
        assert_eq!(second.metadata.replay_count, 2);
        assert!(second.metadata.last_replayed_at.is_some());

        let top = cache.top_replayed(5).await;
        assert_eq!(top, vec![("j1".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_filesystem_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();

        {
            let cache: TieredCache<Bytes> =
                TieredCache::open("audio", wide_bounds(), Some(dir.clone())).await;
            assert_eq!(cache.backend_type(), "filesystem");
            cache
                .put("hash1", Bytes::from("mp3 bytes"), EntryMetadata::default())
                .await;
        }

        let cache: TieredCache<Bytes> = TieredCache::open("audio", wide_bounds(), Some(dir)).await;
        let stats = cache.stats().await;
        assert_eq!(stats.persisted_entries, 1);
        assert_eq!(stats.entry_count, 0);

        // Promotion from the persistent tier
        let entry = cache.lookup("hash1").await.unwrap();
        assert_eq!(entry.payload, Bytes::from("mp3 bytes"));
        assert!(entry.metadata.replay_count >= 1);
        assert_eq!(cache.stats().await.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_purged_from_both_tiers() {
        let temp_dir = TempDir::new().unwrap();
        let bounds = CacheBounds {
            max_age_ms: 50,
            ..wide_bounds()
        };
        let cache: TieredCache<Bytes> =
            TieredCache::open("audio", bounds, Some(temp_dir.path().to_path_buf())).await;

        cache
            .put("hash1", Bytes::from("short-lived"), EntryMetadata::default())
            .await;
        sleep(Duration::from_millis(80)).await;

        assert!(cache.lookup("hash1").await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.persisted_entries, 0);

        // Give the fire-and-forget delete a chance, then confirm the
        // record is gone from disk as well.
        sleep(Duration::from_millis(50)).await;
        let backend = FilesystemBackend::new(temp_dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(backend.load("hash1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_degrades_to_memory_only_when_dir_unusable() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("taken");
        tokio::fs::write(&blocker, b"not a directory").await.unwrap();

        let cache: TieredCache<Bytes> =
            TieredCache::open("audio", wide_bounds(), Some(blocker)).await;
        assert_eq!(cache.backend_type(), "memory");

        cache
            .put("key1", Bytes::from("value1"), EntryMetadata::default())
            .await;
        assert!(cache.lookup("key1").await.is_some());
    }

    #[tokio::test]
    async fn test_lookup_by_content_hash() {
        let cache: TieredCache<String> = TieredCache::new_in_memory("messages", wide_bounds());

        let metadata = EntryMetadata {
            content_hash: Some("abc123".to_string()),
            ..Default::default()
        };
        cache
            .put("job-7", "job 7 finished".to_string(), metadata)
            .await;

        let entry = cache.lookup_by_content_hash("abc123").await.unwrap();
        assert_eq!(entry.key, "job-7");
        assert!(cache.lookup_by_content_hash("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_list_recent_newest_first_with_user_filter() {
        let cache: TieredCache<String> = TieredCache::new_in_memory("messages", wide_bounds());
        let now = now_ms();

        cache
            .put_at("j1", "oldest".to_string(), meta_for_user("ada"), now - 3000)
            .await;
        cache
            .put_at("j2", "middle".to_string(), meta_for_user("grace"), now - 2000)
            .await;
        cache
            .put_at("j3", "newest".to_string(), meta_for_user("ada"), now - 1000)
            .await;

        let all = cache.list_recent(None, 10).await;
        let keys: Vec<&str> = all.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["j3", "j2", "j1"]);

        let ada = cache.list_recent(Some("ada"), 10).await;
        let keys: Vec<&str> = ada.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["j3", "j1"]);

        let limited = cache.list_recent(None, 1).await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].key, "j3");
    }

    #[tokio::test]
    async fn test_string_payload_round_trip_through_disk() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();

        {
            let cache: TieredCache<String> =
                TieredCache::open("messages", wide_bounds(), Some(dir.clone())).await;
            cache
                .put("job-1", "all tests passed".to_string(), EntryMetadata::default())
                .await;
        }

        let cache: TieredCache<String> =
            TieredCache::open("messages", wide_bounds(), Some(dir)).await;
        let entry = cache.lookup("job-1").await.unwrap();
        assert_eq!(entry.payload, "all tests passed");
    }

    #[tokio::test]
    async fn test_bounds_validation() {
        assert!(CacheBounds::audio().validate().is_ok());
        assert!(CacheBounds::messages().validate().is_ok());

        let bad = CacheBounds {
            max_bytes: 0,
            max_age_ms: 1000,
            max_entries: None,
        };
        assert!(bad.validate().is_err());

        let bad = CacheBounds {
            max_bytes: 10,
            max_age_ms: 1000,
            max_entries: Some(0),
        };
        assert!(bad.validate().is_err());
    }
}
