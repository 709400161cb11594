//! Cache-aware synthesis seam.
//!
//! [`Speaker`] is the trait the playback queue speaks through. The production
//! wiring is [`CachedSpeaker`] around a [`SpeechSession`]: repeated phrases
//! are served from the audio cache and only misses reach the remote service.
//! The synthesized artifact is written back to the cache before the caller
//! sees it, so a replay never races the insert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::session::{SpeechError, SpeechSession, SynthesizedAudio};
use crate::core::cache::{EntryMetadata, TieredCache};
use crate::core::hash::content_hash;

/// One playable synthesis result.
#[derive(Debug, Clone)]
pub struct SpokenAudio {
    /// Assembled audio bytes.
    pub bytes: Bytes,
    /// Wall time spent synthesizing; zero for cache hits.
    pub elapsed: Duration,
    /// Whether the audio came from the cache.
    pub cached: bool,
}

/// Turns text into playable audio bytes.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<SpokenAudio, SpeechError>;
}

#[async_trait]
impl Speaker for SpeechSession {
    async fn speak(&self, text: &str) -> Result<SpokenAudio, SpeechError> {
        let SynthesizedAudio { bytes, elapsed, .. } = self.synthesize(text).await?;
        Ok(SpokenAudio {
            bytes,
            elapsed,
            cached: false,
        })
    }
}

/// Serves repeated phrases from the audio cache, synthesizing on miss.
pub struct CachedSpeaker {
    inner: Arc<dyn Speaker>,
    cache: Arc<TieredCache<Bytes>>,
}

impl CachedSpeaker {
    pub fn new(inner: Arc<dyn Speaker>, cache: Arc<TieredCache<Bytes>>) -> Self {
        Self { inner, cache }
    }

    /// The audio cache behind this speaker.
    pub fn cache(&self) -> &Arc<TieredCache<Bytes>> {
        &self.cache
    }
}

#[async_trait]
impl Speaker for CachedSpeaker {
    async fn speak(&self, text: &str) -> Result<SpokenAudio, SpeechError> {
        let key = content_hash(text);

        if let Some(entry) = self.cache.lookup(&key).await {
            debug!("serving cached audio for \"{}\"", preview(text));
            return Ok(SpokenAudio {
                bytes: entry.payload,
                elapsed: Duration::ZERO,
                cached: true,
            });
        }

        debug!("audio cache miss for \"{}\"", preview(text));
        let spoken = self.inner.speak(text).await?;

        let metadata = EntryMetadata {
            duration_ms: Some(spoken.elapsed.as_millis() as u64),
            source: Some("synthesis".to_string()),
            ..Default::default()
        };
        self.cache.put(&key, spoken.bytes.clone(), metadata).await;

        Ok(spoken)
    }
}

/// Shorten a phrase for log lines.
fn preview(text: &str) -> String {
    if text.chars().count() > 30 {
        let head: String = text.chars().take(30).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
