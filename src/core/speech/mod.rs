//! Streaming speech synthesis.
//!
//! This module turns one text string into one playable audio artifact via the
//! remote synthesis service:
//!
//! - [`session`]: the [`SpeechSession`] client (bootstrap, duplex channel,
//!   fragment assembly, deadlines)
//! - [`messages`]: wire types for both legs of the exchange
//! - [`speaker`]: the [`Speaker`] seam and the cache-first [`CachedSpeaker`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crier::core::cache::{CacheBounds, TieredCache};
//! use crier::core::speech::{CachedSpeaker, Speaker, SpeechSession, SpeechSessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = SpeechSession::new(SpeechSessionConfig::default());
//!     session.connect().await?;
//!
//!     let cache = Arc::new(TieredCache::new_in_memory("audio", CacheBounds::audio()));
//!     let speaker = CachedSpeaker::new(Arc::new(session), cache);
//!
//!     let spoken = speaker.speak("All jobs finished").await?;
//!     println!("{} bytes (cached: {})", spoken.bytes.len(), spoken.cached);
//!     Ok(())
//! }
//! ```

mod messages;
mod session;
mod speaker;


// Re-export public types
pub use messages::{ControlFrame, SessionIdResponse, SynthesisRequest};
pub use session::{SpeechError, SpeechSession, SpeechSessionConfig, SynthesizedAudio};
pub use speaker::{CachedSpeaker, Speaker, SpokenAudio};
