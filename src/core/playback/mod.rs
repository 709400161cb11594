//! Prioritized audio playback.
//!
//! [`PlaybackQueue`] serializes speech and notification sounds through a
//! single worker so clips never overlap, with two-tier priority ordering
//! and fallback substitution when synthesis fails. [`AudioSink`] is the
//! output seam: [`LogSink`] for headless runs and tests, [`RodioSink`]
//! for a real output device when the `rodio` feature is enabled.

mod item;
mod queue;
mod sink;

pub use item::{ItemKind, PlaybackItem, Priority};
pub use queue::{PlaybackConfig, PlaybackQueue, QueueStatus};
pub use sink::{AudioSink, LogSink, PlaybackError};

#[cfg(feature = "rodio")]
pub use sink::RodioSink;
