//! Audio output seam.
//!
//! [`AudioSink`] is the one place rendered audio leaves the process. The
//! default [`LogSink`] just logs, which keeps headless runs and tests free of
//! any audio device. With the `rodio` feature enabled, [`RodioSink`] plays
//! through the default output device.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

/// Errors from rendering audio.
#[derive(Error, Debug, Clone)]
pub enum PlaybackError {
    /// No usable output device, or the device went away.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The bytes could not be decoded into something playable.
    #[error("unplayable audio: {0}")]
    Unplayable(String),

    /// A static sound could not be located.
    #[error("sound not found: {0}")]
    NotFound(String),

    /// The playback queue worker is gone.
    #[error("playback queue closed")]
    QueueClosed,
}

/// Where rendered audio goes.
///
/// Both play methods resolve when the clip has finished (or failed), so the
/// playback queue can serialize clips by simply awaiting them.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play assembled audio bytes to completion.
    async fn play_bytes(&self, audio: Bytes) -> Result<(), PlaybackError>;

    /// Play a static sound from a local path to completion.
    async fn play_sound(&self, location: &str) -> Result<(), PlaybackError>;

    /// Pause whatever is currently rendering.
    fn pause(&self);

    /// Stop and discard the current clip.
    fn stop(&self);
}

/// Logs playback instead of rendering it.
///
/// The default sink for headless runs.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl AudioSink for LogSink {
    async fn play_bytes(&self, audio: Bytes) -> Result<(), PlaybackError> {
        info!("audio: would play {} bytes", audio.len());
        Ok(())
    }

    async fn play_sound(&self, location: &str) -> Result<(), PlaybackError> {
        info!("audio: would play {location}");
        Ok(())
    }

    fn pause(&self) {}

    fn stop(&self) {}
}

#[cfg(feature = "rodio")]
pub use rodio_sink::RodioSink;

#[cfg(feature = "rodio")]
mod rodio_sink {
    use std::io::Cursor;
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::{mpsc, oneshot};
    use tracing::debug;

    use super::{AudioSink, PlaybackError};

    enum PlayRequest {
        Bytes(Bytes, oneshot::Sender<Result<(), PlaybackError>>),
        File(String, oneshot::Sender<Result<(), PlaybackError>>),
    }

    /// Plays through the default output device.
    ///
    /// The output stream is not `Send`, so a dedicated audio thread owns it
    /// and works through requests sequentially. The active sink handle is
    /// shared out so `pause`/`stop` take effect mid-clip.
    pub struct RodioSink {
        request_tx: mpsc::UnboundedSender<PlayRequest>,
        active: Arc<Mutex<Option<rodio::Sink>>>,
    }

    impl RodioSink {
        /// Open the default output device.
        pub fn new() -> Result<Self, PlaybackError> {
            let (request_tx, mut request_rx) = mpsc::unbounded_channel::<PlayRequest>();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
            let active: Arc<Mutex<Option<rodio::Sink>>> = Arc::new(Mutex::new(None));
            let active_for_thread = Arc::clone(&active);

            std::thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || {
                    let stream = match rodio::OutputStreamBuilder::open_default_stream() {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };

                    while let Some(request) = request_rx.blocking_recv() {
                        match request {
                            PlayRequest::Bytes(bytes, done_tx) => {
                                let result =
                                    play_source(&stream, &active_for_thread, Cursor::new(bytes));
                                let _ = done_tx.send(result);
                            }
                            PlayRequest::File(path, done_tx) => {
                                let result = match std::fs::File::open(&path) {
                                    Ok(file) => play_source(
                                        &stream,
                                        &active_for_thread,
                                        std::io::BufReader::new(file),
                                    ),
                                    Err(e) => {
                                        Err(PlaybackError::NotFound(format!("{path}: {e}")))
                                    }
                                };
                                let _ = done_tx.send(result);
                            }
                        }
                    }
                    debug!("audio output thread stopped");
                })
                .map_err(|e| {
                    PlaybackError::DeviceUnavailable(format!("audio thread failed: {e}"))
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self { request_tx, active }),
                Ok(Err(e)) => Err(PlaybackError::DeviceUnavailable(e)),
                Err(_) => Err(PlaybackError::DeviceUnavailable(
                    "audio output thread died".to_string(),
                )),
            }
        }

        async fn submit(&self, request: PlayRequest, done_rx: oneshot::Receiver<Result<(), PlaybackError>>) -> Result<(), PlaybackError> {
            self.request_tx.send(request).map_err(|_| {
                PlaybackError::DeviceUnavailable("audio output thread gone".to_string())
            })?;
            match done_rx.await {
                Ok(result) => result,
                Err(_) => Err(PlaybackError::DeviceUnavailable(
                    "audio output thread gone".to_string(),
                )),
            }
        }
    }

    /// Decode and play one source, polling so `stop()` is honored mid-clip.
    fn play_source<R>(
        stream: &rodio::OutputStream,
        active: &Mutex<Option<rodio::Sink>>,
        input: R,
    ) -> Result<(), PlaybackError>
    where
        R: std::io::Read + std::io::Seek + Send + Sync + 'static,
    {
        let source = rodio::Decoder::new(input)
            .map_err(|e| PlaybackError::Unplayable(format!("undecodable audio: {e}")))?;

        let sink = rodio::Sink::connect_new(stream.mixer());
        sink.append(source);
        *active.lock() = Some(sink);

        loop {
            let is_empty = match active.lock().as_ref() {
                Some(sink) => sink.empty(),
                // stop() took the sink
                None => break,
            };
            if is_empty {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        *active.lock() = None;
        Ok(())
    }

    #[async_trait]
    impl AudioSink for RodioSink {
        async fn play_bytes(&self, audio: Bytes) -> Result<(), PlaybackError> {
            let (done_tx, done_rx) = oneshot::channel();
            self.submit(PlayRequest::Bytes(audio, done_tx), done_rx).await
        }

        async fn play_sound(&self, location: &str) -> Result<(), PlaybackError> {
            let (done_tx, done_rx) = oneshot::channel();
            self.submit(PlayRequest::File(location.to_string(), done_tx), done_rx)
                .await
        }

        fn pause(&self) {
            if let Some(sink) = self.active.lock().as_ref() {
                sink.pause();
            }
        }

        fn stop(&self) {
            if let Some(sink) = self.active.lock().take() {
                sink.stop();
            }
        }
    }
}
