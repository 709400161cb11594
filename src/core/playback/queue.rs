//! Sequential playback queue.
//!
//! This module provides the ordered, event-driven queue that serializes
//! heterogeneous playback work: synthesize-and-speak items and static sound
//! items drain one at a time through a dedicated worker task, so at most one
//! clip renders at any moment.
//!
//! # Ordering
//!
//! Within a tier items are FIFO. Enqueuing an urgent/high item promotes it
//! ahead of all pending medium/low items but behind earlier elevated items
//! (a stable two-tier partition, not a full sort), and never preempts the
//! clip already rendering.
//!
//! # Failure
//!
//! A failed speak item substitutes the configured error sound; if that fails
//! too the queue simply moves on. A single item can never halt the drain.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::item::{ItemKind, PlaybackItem};
use super::sink::{AudioSink, PlaybackError};
use crate::core::speech::Speaker;

/// Default pause between adjacent speech clips.
const DEFAULT_INTER_CLIP_PAUSE: Duration = Duration::from_millis(300);

/// Command channel depth; enqueues beyond this apply backpressure.
const COMMAND_BUFFER: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Playback queue tuning.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Local sound substituted when a speak item fails. `None` skips the
    /// substitution and the queue just advances.
    pub error_sound: Option<String>,

    /// Pause inserted after a successful speech clip when more items remain,
    /// so adjacent clips do not abut.
    pub inter_clip_pause: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            error_sound: None,
            inter_clip_pause: DEFAULT_INTER_CLIP_PAUSE,
        }
    }
}

// =============================================================================
// Commands and Status
// =============================================================================

/// Worker commands.
enum QueueCommand {
    Enqueue(PlaybackItem),
    Clear {
        ack_tx: oneshot::Sender<usize>,
    },
    Status {
        response_tx: oneshot::Sender<QueueStatus>,
    },
    Shutdown {
        ack_tx: Option<oneshot::Sender<()>>,
    },
}

/// Read-only queue snapshot.
#[derive(Debug, Clone, Copy)]
pub struct QueueStatus {
    /// Items waiting to play.
    pub pending: usize,
    /// Items that played to completion.
    pub played: u64,
    /// Speak items that ended in the fallback path.
    pub fallbacks: u64,
}

// =============================================================================
// Playback Queue Handle
// =============================================================================

/// Handle to the playback worker task.
///
/// Cloning is not supported; share it behind an [`Arc`].
pub struct PlaybackQueue {
    cmd_tx: mpsc::Sender<QueueCommand>,
    sink: Arc<dyn AudioSink>,
    worker_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PlaybackQueue {
    /// Spawn the worker and return the handle.
    pub fn start(
        speaker: Arc<dyn Speaker>,
        sink: Arc<dyn AudioSink>,
        config: PlaybackConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

        let context = WorkerContext {
            speaker,
            sink: Arc::clone(&sink),
            http: reqwest::Client::new(),
            config,
        };

        let worker_handle = tokio::spawn(run_worker(cmd_rx, context));

        Self {
            cmd_tx,
            sink,
            worker_handle: parking_lot::Mutex::new(Some(worker_handle)),
        }
    }

    /// Queue one item for playback.
    pub async fn enqueue(&self, item: PlaybackItem) -> Result<(), PlaybackError> {
        self.cmd_tx
            .send(QueueCommand::Enqueue(item))
            .await
            .map_err(|_| PlaybackError::QueueClosed)
    }

    /// Queue a synthesize-and-speak item.
    pub async fn speak(
        &self,
        text: impl Into<String>,
        priority: super::item::Priority,
    ) -> Result<(), PlaybackError> {
        self.enqueue(PlaybackItem::speak(text, priority)).await
    }

    /// Queue a static sound.
    pub async fn play_sound(
        &self,
        location: impl Into<String>,
        priority: super::item::Priority,
    ) -> Result<(), PlaybackError> {
        self.enqueue(PlaybackItem::sound(location, priority)).await
    }

    /// Pause the clip currently rendering. Queue contents are untouched.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Drop all pending items and stop the active clip.
    ///
    /// Returns how many pending items were dropped.
    pub async fn clear(&self) -> Result<usize, PlaybackError> {
        // Queue the purge before stopping the active clip, so the worker
        // applies it before it can start the next pending item.
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(QueueCommand::Clear { ack_tx })
            .await
            .map_err(|_| PlaybackError::QueueClosed)?;

        self.sink.stop();

        ack_rx.await.map_err(|_| PlaybackError::QueueClosed)
    }

    /// Snapshot of queue counters.
    ///
    /// Answered between clips, so a response may wait for the active clip.
    pub async fn status(&self) -> Result<QueueStatus, PlaybackError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(QueueCommand::Status { response_tx })
            .await
            .map_err(|_| PlaybackError::QueueClosed)?;
        response_rx.await.map_err(|_| PlaybackError::QueueClosed)
    }

    /// Stop the worker after the active clip finishes.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(QueueCommand::Shutdown {
                ack_tx: Some(ack_tx),
            })
            .await
            .is_ok()
        {
            self.sink.stop();
            let _ = ack_rx.await;
        }

        let handle = self.worker_handle.lock().take();
        if let Some(handle) = handle {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        if let Some(handle) = self.worker_handle.lock().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Everything the worker needs to play one item.
struct WorkerContext {
    speaker: Arc<dyn Speaker>,
    sink: Arc<dyn AudioSink>,
    http: reqwest::Client,
    config: PlaybackConfig,
}

/// Worker-local queue state.
struct WorkerState {
    pending: VecDeque<PlaybackItem>,
    played: u64,
    fallbacks: u64,
}

enum Flow {
    Continue,
    Stop,
}

/// How one item ended.
enum ItemOutcome {
    /// Synthesized speech played to completion.
    Spoke,
    /// Static sound finished, successfully or not.
    Sounded,
    /// Speech failed and the error sound was substituted (or skipped).
    FellBack,
}

async fn run_worker(mut cmd_rx: mpsc::Receiver<QueueCommand>, context: WorkerContext) {
    info!("playback worker started");

    let mut state = WorkerState {
        pending: VecDeque::new(),
        played: 0,
        fallbacks: 0,
    };

    'outer: loop {
        // Apply every command already waiting before starting the next clip,
        // so a burst of enqueues is ordered as one batch.
        loop {
            match cmd_rx.try_recv() {
                Ok(command) => {
                    if matches!(apply_command(&mut state, command), Flow::Stop) {
                        break 'outer;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => break 'outer,
            }
        }

        let Some(item) = state.pending.pop_front() else {
            // Idle; park until the next command.
            match cmd_rx.recv().await {
                Some(command) => {
                    if matches!(apply_command(&mut state, command), Flow::Stop) {
                        break;
                    }
                    continue;
                }
                None => break,
            }
        };

        debug!(
            "playing {} ({}) after {:?} queued, {} still pending",
            item.kind.label(),
            item.priority.as_str(),
            item.enqueued_at.elapsed(),
            state.pending.len()
        );

        match play_item(item, &context).await {
            ItemOutcome::Spoke => {
                state.played += 1;
                if !state.pending.is_empty() {
                    sleep(context.config.inter_clip_pause).await;
                }
            }
            ItemOutcome::Sounded => state.played += 1,
            ItemOutcome::FellBack => state.fallbacks += 1,
        }
    }

    info!(
        "playback worker stopped ({} played, {} fallbacks)",
        state.played, state.fallbacks
    );
}

fn apply_command(state: &mut WorkerState, command: QueueCommand) -> Flow {
    match command {
        QueueCommand::Enqueue(item) => {
            debug!(
                "queued {} ({}), {} pending",
                item.kind.label(),
                item.priority.as_str(),
                state.pending.len() + 1
            );
            insert_item(&mut state.pending, item);
            Flow::Continue
        }
        QueueCommand::Clear { ack_tx } => {
            let dropped = state.pending.len();
            state.pending.clear();
            info!("playback queue cleared, {dropped} pending items dropped");
            let _ = ack_tx.send(dropped);
            Flow::Continue
        }
        QueueCommand::Status { response_tx } => {
            let _ = response_tx.send(QueueStatus {
                pending: state.pending.len(),
                played: state.played,
                fallbacks: state.fallbacks,
            });
            Flow::Continue
        }
        QueueCommand::Shutdown { ack_tx } => {
            info!("playback worker shutting down");
            if let Some(ack_tx) = ack_tx {
                let _ = ack_tx.send(());
            }
            Flow::Stop
        }
    }
}

/// Stable two-tier insert: elevated items go behind earlier elevated items
/// but ahead of every medium/low item; the rest append.
pub(crate) fn insert_item(pending: &mut VecDeque<PlaybackItem>, item: PlaybackItem) {
    if item.priority.is_elevated() {
        let position = pending
            .iter()
            .position(|queued| !queued.priority.is_elevated())
            .unwrap_or(pending.len());
        pending.insert(position, item);
    } else {
        pending.push_back(item);
    }
}

async fn play_item(item: PlaybackItem, context: &WorkerContext) -> ItemOutcome {
    match item.kind {
        ItemKind::Speak { text } => match context.speaker.speak(&text).await {
            Ok(spoken) => {
                debug!(
                    "speaking {} bytes (cached: {})",
                    spoken.bytes.len(),
                    spoken.cached
                );
                match context.sink.play_bytes(spoken.bytes).await {
                    Ok(()) => ItemOutcome::Spoke,
                    Err(e) => {
                        warn!("speech playback failed: {e}");
                        play_fallback(context).await;
                        ItemOutcome::FellBack
                    }
                }
            }
            Err(e) => {
                warn!("synthesis failed, substituting error sound: {e}");
                play_fallback(context).await;
                ItemOutcome::FellBack
            }
        },
        ItemKind::Sound { location } => {
            if let Err(e) = play_location(context, &location).await {
                warn!("sound playback failed for {location}: {e}");
            }
            ItemOutcome::Sounded
        }
    }
}

/// The fallback failing must never wedge the queue.
async fn play_fallback(context: &WorkerContext) {
    let Some(error_sound) = &context.config.error_sound else {
        return;
    };
    if let Err(e) = play_location(context, error_sound).await {
        warn!("error sound failed too, continuing: {e}");
    }
}

/// Remote locations are fetched and fed to the sink as bytes; everything
/// else is treated as a local path.
async fn play_location(context: &WorkerContext, location: &str) -> Result<(), PlaybackError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let response = context
            .http
            .get(location)
            .send()
            .await
            .map_err(|e| PlaybackError::NotFound(format!("{location}: {e}")))?
            .error_for_status()
            .map_err(|e| PlaybackError::NotFound(format!("{location}: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::Unplayable(format!("{location}: {e}")))?;
        context.sink.play_bytes(bytes).await
    } else {
        context.sink.play_sound(location).await
    }
}

// =============================================================================
// Tests
// =============================================================================
