use thiserror::Error;

use crate::core::cache::CacheError;
use crate::core::playback::PlaybackError;
use crate::core::speech::SpeechError;

/// Any failure surfaced by the client's public operations.
///
/// Wraps the per-component errors so glue code can hold one error type.
/// Cache failures rarely reach this level; the store swallows them and
/// degrades instead.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// Operation needs a live session but none is established.
    #[error("not connected: {0}")]
    NotConnected(String),
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
