//! Cache persistence tests across simulated restarts
//!
//! The store's own unit tests cover single-process behavior; these tests
//! cover what only shows up when a second process opens the same cache
//! directory. Tests verify:
//! - A synthesized phrase survives a restart and skips re-synthesis
//! - Tighter bounds on reopen evict the oldest persisted entries
//! - ClientState finds messages and replay analytics recorded before a
//!   restart

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use crier::config::{ClientConfig, SoundTable};
use crier::core::cache::{CacheBounds, EntryMetadata, TieredCache};
use crier::core::playback::LogSink;
use crier::core::speech::{CachedSpeaker, Speaker, SpeechError, SpokenAudio};
use crier::core::state::ClientState;

/// Deterministic synthesis stub counting how often it was called.
#[derive(Default)]
struct CountingSpeaker {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl Speaker for CountingSpeaker {
    async fn speak(&self, text: &str) -> Result<SpokenAudio, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SpeechError::RemoteFailure("synthesis refused".to_string()));
        }
        Ok(SpokenAudio {
            bytes: Bytes::from(format!("pcm:{text}")),
            elapsed: Duration::from_millis(3),
            cached: false,
        })
    }
}

fn hour_bounds() -> CacheBounds {
    CacheBounds {
        max_bytes: 1024 * 1024,
        max_age_ms: 60 * 60 * 1000,
        max_entries: None,
    }
}

// =============================================================================
// Test 1: Synthesized audio survives a restart
// =============================================================================

#[tokio::test]
async fn test_cached_phrase_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_path_buf();
    let speaker = Arc::new(CountingSpeaker::default());

    // First run: synthesize and cache.
    {
        let cache = Arc::new(TieredCache::open("audio", hour_bounds(), Some(dir.clone())).await);
        let cached = CachedSpeaker::new(speaker.clone(), cache);

        let spoken = cached.speak("deploy done").await.unwrap();
        assert!(!spoken.cached);
        assert_eq!(spoken.bytes, Bytes::from("pcm:deploy done"));
    }

    // Second run: fresh memory tier over the same directory. Even if the
    // synthesis service is down now, the phrase plays from disk.
    speaker.fail.store(true, Ordering::SeqCst);
    let cache = Arc::new(TieredCache::open("audio", hour_bounds(), Some(dir)).await);
    let cached = CachedSpeaker::new(speaker.clone(), cache.clone());

    let spoken = cached.speak("deploy done").await.unwrap();
    assert!(spoken.cached, "phrase should be served from the persistent tier");
    assert_eq!(spoken.bytes, Bytes::from("pcm:deploy done"));
    assert_eq!(
        speaker.calls.load(Ordering::SeqCst),
        1,
        "restart must not trigger re-synthesis"
    );

    // The hit promoted the entry into memory.
    let stats = cache.stats().await;
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.hits, 1);
}

// =============================================================================
// Test 2: Tighter bounds on reopen evict the oldest entries
// =============================================================================

#[tokio::test]
async fn test_reopen_with_tighter_bounds_evicts_oldest() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_path_buf();

    {
        let cache: TieredCache<Bytes> =
            TieredCache::open("audio", hour_bounds(), Some(dir.clone())).await;
        for key in ["a", "b", "c"] {
            cache
                .put(key, Bytes::from(vec![0u8; 40]), EntryMetadata::default())
                .await;
            // Distinct created_at timestamps so eviction order is stable.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // 120 persisted bytes against a 100-byte budget: the oldest entry
    // goes during the load scan.
    let tight = CacheBounds {
        max_bytes: 100,
        ..hour_bounds()
    };
    let cache: TieredCache<Bytes> = TieredCache::open("audio", tight, Some(dir)).await;

    let stats = cache.stats().await;
    assert_eq!(stats.persisted_entries, 2);
    assert_eq!(stats.evicted, 1);

    assert!(cache.lookup("a").await.is_none(), "oldest entry should be gone");
    assert!(cache.lookup("b").await.is_some());
    assert!(cache.lookup("c").await.is_some());
}

// =============================================================================
// Test 3: ClientState picks up messages and analytics after a restart
// =============================================================================

#[tokio::test]
async fn test_client_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();

    let mut config = ClientConfig::default();
    config.cache_dir = Some(temp_dir.path().to_path_buf());
    config.inter_clip_pause_ms = 1;
    // Local paths only, so the fallback path never fetches anything.
    config.sounds = SoundTable {
        low_priority: "sounds/low.mp3".to_string(),
        high_priority: "sounds/high.mp3".to_string(),
        error: "sounds/error.mp3".to_string(),
        chime: "sounds/chime.mp3".to_string(),
    };

    {
        let client = ClientState::new(config.clone(), Arc::new(LogSink)).await;
        client
            .record_message("job_1", "weekly report built", Some("ada".to_string()))
            .await;
        assert!(client.replay_message("job_1").await.unwrap());
        client.shutdown().await;
    }
    // Let the fire-and-forget replay metadata write land on disk.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = ClientState::new(config, Arc::new(LogSink)).await;

    let recent = client.recent_messages(None, 10).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].key, "job_1");
    assert_eq!(recent[0].payload, "weekly report built");
    assert_eq!(recent[0].metadata.user_id.as_deref(), Some("ada"));

    // The replay count recorded before the restart is still there.
    let top = client.top_replayed(5).await;
    assert_eq!(top, vec![("job_1".to_string(), 1)]);

    let stats = client.stats().await.unwrap();
    assert_eq!(stats.messages.persisted_entries, 1);

    client.shutdown().await;
}
