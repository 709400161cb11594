pub mod cache;
pub mod events;
pub mod hash;
pub mod playback;
pub mod speech;
pub mod state;

// Re-export commonly used types for convenience
pub use cache::{CacheBounds, CacheEntry, CacheError, CacheStats, EntryMetadata, TieredCache};

pub use events::{DashboardEvent, EventChannel, EventChannelConfig, EventDispatcher};

pub use playback::{
    AudioSink, LogSink, PlaybackConfig, PlaybackError, PlaybackItem, PlaybackQueue, Priority,
    QueueStatus,
};
#[cfg(feature = "rodio")]
pub use playback::RodioSink;

pub use speech::{
    CachedSpeaker, Speaker, SpeechError, SpeechSession, SpeechSessionConfig, SpokenAudio,
};

pub use hash::content_hash;

// Re-export ClientState for external use
pub use state::{ClientState, ClientStats};
