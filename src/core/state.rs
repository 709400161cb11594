use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::ClientConfig;
use crate::core::cache::{CacheEntry, CacheStats, EntryMetadata, TieredCache};
use crate::core::events::{
    resolve_location, EventChannel, EventChannelConfig, EventDispatcher,
};
use crate::core::hash::content_hash;
use crate::core::playback::{
    AudioSink, PlaybackConfig, PlaybackQueue, Priority, QueueStatus,
};
use crate::core::speech::{CachedSpeaker, Speaker, SpeechSession};
use crate::errors::client_error::{ClientError, ClientResult};
use bytes::Bytes;

/// The wired-up client: both cache instances, the speech session, the
/// playback queue, and the dashboard event channel, built from one
/// [`ClientConfig`].
///
/// Construction does not touch the network; [`connect`](Self::connect)
/// establishes the speech session and starts the event channel.
/// [`shutdown`](Self::shutdown) tears everything down in reverse order.
pub struct ClientState {
    config: ClientConfig,
    /// Synthesized audio keyed by content hash.
    audio_cache: Arc<TieredCache<Bytes>>,
    /// Job completion messages keyed by job id.
    message_cache: Arc<TieredCache<String>>,
    speech: Arc<SpeechSession>,
    queue: Arc<PlaybackQueue>,
    dispatcher: Arc<EventDispatcher>,
    /// Live event channel, present between connect and shutdown.
    events: parking_lot::Mutex<Option<EventChannel>>,
}

impl ClientState {
    /// Build the client around the given output sink.
    ///
    /// Opens both cache instances (persistent when `cache_dir` is set,
    /// memory-only otherwise) and spawns the playback worker.
    pub async fn new(config: ClientConfig, sink: Arc<dyn AudioSink>) -> Arc<Self> {
        let audio_cache = Arc::new(
            TieredCache::open(
                "audio",
                config.audio_cache.clone(),
                config.cache_dir.as_ref().map(|dir| dir.join("audio")),
            )
            .await,
        );
        let message_cache = Arc::new(
            TieredCache::open(
                "messages",
                config.message_cache.clone(),
                config.cache_dir.as_ref().map(|dir| dir.join("messages")),
            )
            .await,
        );

        let speech = Arc::new(SpeechSession::new(config.speech()));
        let speaker = Arc::new(CachedSpeaker::new(
            Arc::clone(&speech) as Arc<dyn Speaker>,
            Arc::clone(&audio_cache),
        ));

        let queue = Arc::new(PlaybackQueue::start(
            speaker,
            sink,
            PlaybackConfig {
                error_sound: Some(resolve_location(&config.base_url, &config.sounds.error)),
                inter_clip_pause: Duration::from_millis(config.inter_clip_pause_ms),
            },
        ));

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&message_cache),
            config.sounds.clone(),
            config.base_url.clone(),
            config.quiet,
        ));

        Arc::new(Self {
            config,
            audio_cache,
            message_cache,
            speech,
            queue,
            dispatcher,
            events: parking_lot::Mutex::new(None),
        })
    }

    /// Establish the speech session and start the dashboard event channel.
    ///
    /// Safe to call again after a failure; an already-running event
    /// channel is replaced. Returns the server-assigned session id.
    pub async fn connect(&self) -> ClientResult<String> {
        self.speech.connect().await?;
        let session_id = self
            .speech
            .session_id()
            .ok_or_else(|| ClientError::NotConnected("no session id after connect".to_string()))?;

        let previous = self.events.lock().take();
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        let channel = EventChannel::start(
            EventChannelConfig {
                url: self.config.events_endpoint(&session_id),
                auth_token: self.config.auth_token.clone(),
                session_id: session_id.clone(),
            },
            Arc::clone(&self.dispatcher),
        );
        *self.events.lock() = Some(channel);

        info!("client connected, session {session_id}");
        Ok(session_id)
    }

    /// Whether the dashboard event socket is currently established.
    pub fn is_connected(&self) -> bool {
        self.events
            .lock()
            .as_ref()
            .map(|channel| channel.is_connected())
            .unwrap_or(false)
    }

    /// Queue text for synthesis and playback.
    pub async fn speak(&self, text: impl Into<String>, priority: Priority) -> ClientResult<()> {
        self.queue.speak(text, priority).await?;
        Ok(())
    }

    /// Queue a notification sound. Dashboard-relative paths are resolved
    /// against the configured base URL; full URLs and local paths pass
    /// through.
    pub async fn play_sound(&self, location: &str, priority: Priority) -> ClientResult<()> {
        let resolved = resolve_location(&self.config.base_url, location);
        self.queue.play_sound(resolved, priority).await?;
        Ok(())
    }

    /// Pause the clip currently rendering.
    pub fn pause(&self) {
        self.queue.pause();
    }

    /// Drop all pending items and stop the active clip. Returns how many
    /// pending items were dropped.
    pub async fn clear_queue(&self) -> ClientResult<usize> {
        Ok(self.queue.clear().await?)
    }

    /// Store a job completion message for later replay.
    ///
    /// Skips the write when a message with identical text is already
    /// cached under another job id.
    pub async fn record_message(
        &self,
        job_id: &str,
        text: impl Into<String>,
        user: Option<String>,
    ) {
        let text = text.into();
        let hash = content_hash(&text);
        if self.message_cache.lookup_by_content_hash(&hash).await.is_some() {
            return;
        }
        let metadata = EntryMetadata {
            content_hash: Some(hash),
            user_id: user,
            source: Some("manual".to_string()),
            ..Default::default()
        };
        self.message_cache.put(job_id, text, metadata).await;
    }

    /// Speak a cached job message again at medium priority.
    ///
    /// Returns `false` when no message is cached under `job_id`. A replay
    /// bumps the entry's replay counter.
    pub async fn replay_message(&self, job_id: &str) -> ClientResult<bool> {
        match self.message_cache.lookup(job_id).await {
            Some(entry) => {
                self.queue.speak(entry.payload, Priority::Medium).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Newest-first message listing, optionally filtered by owning user.
    pub async fn recent_messages(
        &self,
        user: Option<&str>,
        limit: usize,
    ) -> Vec<CacheEntry<String>> {
        self.message_cache.list_recent(user, limit).await
    }

    /// Most-replayed job messages, `(job_id, replay_count)` descending.
    pub async fn top_replayed(&self, limit: usize) -> Vec<(String, u64)> {
        self.message_cache.top_replayed(limit).await
    }

    /// Point-in-time counters across both caches and the queue.
    pub async fn stats(&self) -> ClientResult<ClientStats> {
        Ok(ClientStats {
            audio: self.audio_cache.stats().await,
            messages: self.message_cache.stats().await,
            playback: self.queue.status().await?,
        })
    }

    /// Stop the event channel, the playback worker, and the speech
    /// session, in that order.
    pub async fn shutdown(&self) {
        let events = self.events.lock().take();
        if let Some(events) = events {
            events.shutdown().await;
        }
        self.queue.shutdown().await;
        self.speech.shutdown().await;
        info!("client shut down");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn audio_cache(&self) -> Arc<TieredCache<Bytes>> {
        Arc::clone(&self.audio_cache)
    }

    pub fn message_cache(&self) -> Arc<TieredCache<String>> {
        Arc::clone(&self.message_cache)
    }

    pub fn queue(&self) -> Arc<PlaybackQueue> {
        Arc::clone(&self.queue)
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        Arc::clone(&self.dispatcher)
    }
}

/// Snapshot returned by [`ClientState::stats`].
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub audio: CacheStats,
    pub messages: CacheStats,
    pub playback: QueueStatus,
}
