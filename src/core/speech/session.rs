//! Streaming speech synthesis client.
//!
//! This module contains the [`SpeechSession`] client that turns one text
//! string into one assembled audio artifact via the remote synthesis service.
//!
//! # Architecture
//!
//! The exchange is split across two legs sharing a session identifier:
//! - Session bootstrap and the synthesis request itself go over HTTP
//! - Audio fragments and control frames arrive over a persistent WebSocket
//!
//! A single event loop owns the WebSocket and handles fragment assembly,
//! control frames, and the request deadline. The session holds exactly one
//! pending request at a time; a second request while one is in flight is
//! rejected with [`SpeechError::Busy`] rather than queued. Callers that need
//! ordering go through the playback queue instead.
//!
//! # Deadlines
//!
//! Each request carries one deadline. It is armed at submission with the
//! overall request timeout, tightened to the first-fragment window when the
//! server reports `loading` before any audio has arrived (silence after
//! `loading` means failure, not a slow success), and restored to the
//! submission deadline once the first fragment lands.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::messages::{ControlFrame, SessionIdResponse, SynthesisRequest};

/// How long to wait for the WebSocket handshake before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default overall window from request submission to resolution.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default window for the first fragment after a `loading` status.
const DEFAULT_FIRST_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by the synthesis exchange.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SpeechError {
    /// The session is not connected, or the connection dropped mid-request.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Network-level trouble while the connection itself is intact.
    #[error("network error: {0}")]
    TransientIo(String),

    /// The synthesis service reported a failure.
    #[error("synthesis failed: {0}")]
    RemoteFailure(String),

    /// No result arrived within the request deadline.
    #[error("synthesis request timed out")]
    Timeout,

    /// A synthesis request is already in flight.
    #[error("synthesis request already in progress")]
    Busy,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the synthesis exchange.
#[derive(Debug, Clone)]
pub struct SpeechSessionConfig {
    /// Base HTTP URL of the synthesis service, e.g. `http://localhost:8000`.
    pub base_url: String,

    /// Explicit WebSocket root, e.g. `ws://localhost:8000/ws`.
    ///
    /// Derived from `base_url` when unset.
    pub ws_url: Option<String>,

    /// Overall window from request submission to resolution.
    pub request_timeout: Duration,

    /// Window for the first fragment after a `loading` status.
    pub first_fragment_timeout: Duration,
}

impl Default for SpeechSessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            ws_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            first_fragment_timeout: DEFAULT_FIRST_FRAGMENT_TIMEOUT,
        }
    }
}

impl SpeechSessionConfig {
    /// URL of the session bootstrap endpoint.
    pub fn session_endpoint(&self) -> String {
        format!("{}/api/get-session-id", self.base_url.trim_end_matches('/'))
    }

    /// URL of the synthesis request endpoint.
    pub fn audio_endpoint(&self) -> String {
        format!("{}/api/get-audio", self.base_url.trim_end_matches('/'))
    }

    /// URL of the duplex channel for the given session.
    pub fn ws_endpoint(&self, session_id: &str) -> String {
        let root = match &self.ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let base = self.base_url.trim_end_matches('/');
                let derived = if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    base.to_string()
                };
                format!("{derived}/ws")
            }
        };
        format!("{root}/{session_id}")
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// Assembled output of one synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Fragments concatenated in arrival order.
    pub bytes: Bytes,
    /// Number of fragments received.
    pub fragments: usize,
    /// Wall time from submission to assembly.
    pub elapsed: Duration,
}

/// The single outstanding request slot.
struct Pending {
    responder: oneshot::Sender<Result<SynthesizedAudio, SpeechError>>,
    started_at: Instant,
}

/// Deadline control messages from `synthesize()` to the event loop.
enum LoopSignal {
    /// A request was submitted; reset fragment state and arm the deadline.
    Arm,
    /// The request failed before the server saw it; stand down.
    Disarm,
}

/// What the event loop should do with a parsed control frame.
#[derive(Debug)]
pub(crate) enum FrameAction {
    /// Tighten the deadline to the first-fragment window.
    Tighten,
    /// Assemble fragments and resolve the pending request.
    Complete,
    /// Reject the pending request.
    Reject(SpeechError),
    /// Nothing to do.
    Ignore,
}

/// Map a control frame to the loop action it requires.
///
/// Pure so the frame protocol can be tested without a connection.
pub(crate) fn classify_frame(frame: &ControlFrame, have_fragments: bool) -> FrameAction {
    match frame {
        ControlFrame::Status { status, text } => match status.as_str() {
            "loading" if !have_fragments => FrameAction::Tighten,
            "error" => FrameAction::Reject(SpeechError::RemoteFailure(
                text.clone().unwrap_or_else(|| "synthesis failed".to_string()),
            )),
            _ => FrameAction::Ignore,
        },
        ControlFrame::AudioComplete => FrameAction::Complete,
        ControlFrame::Error { message } => {
            FrameAction::Reject(SpeechError::RemoteFailure(message.clone()))
        }
        ControlFrame::Unknown(_) => FrameAction::Ignore,
    }
}

// =============================================================================
// SpeechSession Client
// =============================================================================

/// Client for the remote streaming synthesis service.
///
/// Construct with [`SpeechSession::new`], then [`connect`](Self::connect)
/// once before the first request. All request-time methods take `&self` so
/// the session can be shared behind an [`Arc`].
///
/// # Example
///
/// ```rust,no_run
/// use crier::core::speech::{SpeechSession, SpeechSessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = SpeechSession::new(SpeechSessionConfig {
///         base_url: "http://localhost:8000".to_string(),
///         ..Default::default()
///     });
///     session.connect().await?;
///
///     let audio = session.synthesize("The nightly build finished").await?;
///     println!("got {} bytes in {:?}", audio.bytes.len(), audio.elapsed);
///     Ok(())
/// }
/// ```
pub struct SpeechSession {
    /// Exchange configuration.
    config: SpeechSessionConfig,

    /// HTTP client for bootstrap and synthesis requests.
    http: reqwest::Client,

    /// Session identifier, bootstrapped by `connect` unless provided.
    session_id: Mutex<Option<String>>,

    /// Single-slot pending request, shared with the event loop.
    pending: Arc<Mutex<Option<Pending>>>,

    /// Deadline control channel into the event loop.
    signal_tx: Mutex<Option<mpsc::UnboundedSender<LoopSignal>>>,

    /// Shutdown signal sender.
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,

    /// Event loop task handle.
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SpeechSession {
    /// Create a disconnected session.
    pub fn new(config: SpeechSessionConfig) -> Self {
        Self::with_session_id(config, None)
    }

    /// Create a disconnected session reusing an identifier obtained elsewhere,
    /// so the synthesis channel and the dashboard event channel share one
    /// server-side session.
    pub fn with_session_id(config: SpeechSessionConfig, session_id: Option<String>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            session_id: Mutex::new(session_id),
            pending: Arc::new(Mutex::new(None)),
            signal_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            loop_handle: Mutex::new(None),
        }
    }

    /// The session identifier, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Whether the duplex channel is up and requests can be submitted.
    pub fn is_ready(&self) -> bool {
        self.connection().is_some()
    }

    fn connection(&self) -> Option<(String, mpsc::UnboundedSender<LoopSignal>)> {
        let session_id = self.session_id.lock().clone()?;
        let signal_tx = self.signal_tx.lock().clone()?;
        if signal_tx.is_closed() {
            return None;
        }
        Some((session_id, signal_tx))
    }

    /// Bootstrap a session identifier (unless one was provided) and open the
    /// duplex channel.
    ///
    /// Idempotent while connected.
    pub async fn connect(&self) -> Result<(), SpeechError> {
        if self.is_ready() {
            debug!("speech session already connected");
            return Ok(());
        }

        let session_id = match self.session_id.lock().clone() {
            Some(id) => {
                debug!("using provided session id: {id}");
                id
            }
            None => {
                let response = self
                    .http
                    .get(self.config.session_endpoint())
                    .send()
                    .await
                    .map_err(|e| {
                        SpeechError::ConnectionFailed(format!("session bootstrap failed: {e}"))
                    })?
                    .error_for_status()
                    .map_err(|e| {
                        SpeechError::ConnectionFailed(format!("session bootstrap rejected: {e}"))
                    })?;

                let body: SessionIdResponse = response.json().await.map_err(|e| {
                    SpeechError::ConnectionFailed(format!("malformed session response: {e}"))
                })?;

                info!("obtained speech session id: {}", body.session_id);
                *self.session_id.lock() = Some(body.session_id.clone());
                body.session_id
            }
        };

        let ws_url = self.config.ws_endpoint(&session_id);
        debug!("connecting synthesis channel: {ws_url}");

        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<LoopSignal>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (connected_tx, connected_rx) = oneshot::channel::<()>();

        let pending = Arc::clone(&self.pending);
        let request_timeout = self.config.request_timeout;
        let first_fragment_timeout = self.config.first_fragment_timeout;

        let loop_handle = tokio::spawn(async move {
            run_session_loop(
                ws_url,
                pending,
                signal_rx,
                shutdown_rx,
                connected_tx,
                request_timeout,
                first_fragment_timeout,
            )
            .await;
        });

        *self.signal_tx.lock() = Some(signal_tx);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.loop_handle.lock() = Some(loop_handle);

        // Wait for the handshake before reporting the session usable.
        match timeout(CONNECT_TIMEOUT, connected_rx).await {
            Ok(Ok(())) => {
                info!("speech session connected");
                Ok(())
            }
            Ok(Err(_)) => {
                self.teardown_channels();
                Err(SpeechError::ConnectionFailed(
                    "synthesis channel closed during handshake".to_string(),
                ))
            }
            Err(_) => {
                self.teardown_channels();
                Err(SpeechError::ConnectionFailed(
                    "synthesis channel connection timeout".to_string(),
                ))
            }
        }
    }

    /// Submit one synthesis request and wait for the assembled audio.
    ///
    /// Rejects immediately with [`SpeechError::Busy`] while another request
    /// is in flight. A response arriving after the deadline has fired is
    /// ignored because the pending slot has already been cleared.
    pub async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SpeechError> {
        // Claim the single request slot before anything else.
        let (result_tx, result_rx) = oneshot::channel();
        {
            let mut slot = self.pending.lock();
            if slot.is_some() {
                return Err(SpeechError::Busy);
            }
            *slot = Some(Pending {
                responder: result_tx,
                started_at: Instant::now(),
            });
        }

        let Some((session_id, signal_tx)) = self.connection() else {
            self.pending.lock().take();
            return Err(SpeechError::ConnectionFailed(
                "speech session not connected".to_string(),
            ));
        };

        // Arm before the POST so fragments racing the HTTP response still
        // land in a clean buffer.
        if signal_tx.send(LoopSignal::Arm).is_err() {
            self.pending.lock().take();
            return Err(SpeechError::ConnectionFailed(
                "synthesis channel closed".to_string(),
            ));
        }

        let request = SynthesisRequest {
            session_id,
            text: text.to_string(),
        };

        match self
            .http
            .post(self.config.audio_endpoint())
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("synthesis request accepted, awaiting fragments");
            }
            Ok(response) => {
                let _ = signal_tx.send(LoopSignal::Disarm);
                self.pending.lock().take();
                return Err(SpeechError::RemoteFailure(format!(
                    "synthesis request rejected: HTTP {}",
                    response.status()
                )));
            }
            Err(e) => {
                let _ = signal_tx.send(LoopSignal::Disarm);
                self.pending.lock().take();
                return Err(SpeechError::TransientIo(format!(
                    "synthesis request failed: {e}"
                )));
            }
        }

        match result_rx.await {
            Ok(result) => result,
            Err(_) => Err(SpeechError::ConnectionFailed(
                "session closed while awaiting audio".to_string(),
            )),
        }
    }

    /// Close the duplex channel and release the loop task.
    pub async fn shutdown(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(());
        }

        let loop_handle = self.loop_handle.lock().take();
        if let Some(handle) = loop_handle {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }

        *self.signal_tx.lock() = None;
        info!("speech session closed");
    }

    fn teardown_channels(&self) {
        *self.signal_tx.lock() = None;
        *self.shutdown_tx.lock() = None;
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn occupy_slot_for_test(
        &self,
    ) -> oneshot::Receiver<Result<SynthesizedAudio, SpeechError>> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(Pending {
            responder: tx,
            started_at: Instant::now(),
        });
        rx
    }
}

impl Drop for SpeechSession {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Event Loop
// =============================================================================

/// Owns the WebSocket and the request deadline.
///
/// The loop never sends on the socket; requests travel over HTTP and only
/// fragments and control frames come back here.
async fn run_session_loop(
    ws_url: String,
    pending: Arc<Mutex<Option<Pending>>>,
    mut signal_rx: mpsc::UnboundedReceiver<LoopSignal>,
    mut shutdown_rx: oneshot::Receiver<()>,
    connected_tx: oneshot::Sender<()>,
    request_timeout: Duration,
    first_fragment_timeout: Duration,
) {
    let (mut ws_stream, _) = match connect_async(&ws_url).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("failed to connect synthesis channel: {e}");
            return;
        }
    };

    info!("synthesis channel connected");
    let _ = connected_tx.send(());

    let mut fragments: Vec<Bytes> = Vec::new();
    // One deadline per request: armed at submission, tightened after a
    // pre-fragment `loading` status, restored by the first fragment.
    let mut overall_deadline: Option<Instant> = None;
    let mut active_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            Some(signal) = signal_rx.recv() => match signal {
                LoopSignal::Arm => {
                    fragments.clear();
                    let deadline = Instant::now() + request_timeout;
                    overall_deadline = Some(deadline);
                    active_deadline = Some(deadline);
                }
                LoopSignal::Disarm => {
                    fragments.clear();
                    overall_deadline = None;
                    active_deadline = None;
                }
            },

            message = ws_stream.next() => {
                match message {
                    Some(Ok(Message::Binary(data))) => {
                        if pending.lock().is_some() {
                            if fragments.is_empty() {
                                active_deadline = overall_deadline;
                            }
                            fragments.push(Bytes::from(data));
                            debug!("received audio fragment {} ({} bytes)",
                                fragments.len(),
                                fragments.last().map(|f| f.len()).unwrap_or(0));
                        } else {
                            debug!("ignoring {} byte fragment with no request pending", data.len());
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        match ControlFrame::parse(&text) {
                            Ok(frame) => match classify_frame(&frame, !fragments.is_empty()) {
                                FrameAction::Tighten => {
                                    if let Some(overall) = overall_deadline {
                                        let cap = Instant::now() + first_fragment_timeout;
                                        active_deadline = Some(overall.min(cap));
                                        debug!("synthesis loading, expecting first fragment within {:?}",
                                            first_fragment_timeout);
                                    }
                                }
                                FrameAction::Complete => {
                                    finish_pending(&pending, &mut fragments);
                                    overall_deadline = None;
                                    active_deadline = None;
                                }
                                FrameAction::Reject(err) => {
                                    warn!("synthesis service reported failure: {err}");
                                    reject_pending(&pending, err);
                                    fragments.clear();
                                    overall_deadline = None;
                                    active_deadline = None;
                                }
                                FrameAction::Ignore => {
                                    debug!("ignoring synthesis frame: {text}");
                                }
                            },
                            Err(e) => {
                                warn!("failed to parse synthesis frame: {e} - raw: {text}");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("synthesis channel closed: {frame:?}");
                        reject_pending(&pending, SpeechError::ConnectionFailed(
                            "synthesis channel closed".to_string(),
                        ));
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong handled by tokio-tungstenite, raw frames ignored
                    }
                    Some(Err(e)) => {
                        error!("synthesis channel error: {e}");
                        reject_pending(&pending, SpeechError::TransientIo(format!(
                            "synthesis channel error: {e}"
                        )));
                        break;
                    }
                    None => {
                        info!("synthesis channel stream ended");
                        reject_pending(&pending, SpeechError::ConnectionFailed(
                            "synthesis channel stream ended".to_string(),
                        ));
                        break;
                    }
                }
            }

            // Guard evaluates first, so the placeholder instant is never slept on.
            _ = sleep_until(active_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))),
                if active_deadline.is_some() =>
            {
                warn!("synthesis deadline elapsed with no result");
                reject_pending(&pending, SpeechError::Timeout);
                fragments.clear();
                overall_deadline = None;
                active_deadline = None;
            }

            _ = &mut shutdown_rx => {
                info!("speech session shutting down");
                reject_pending(&pending, SpeechError::ConnectionFailed(
                    "session closed".to_string(),
                ));
                let _ = ws_stream.close(None).await;
                break;
            }
        }
    }

    info!("synthesis channel loop stopped");
}

/// Assemble collected fragments and resolve the pending request.
fn finish_pending(pending: &Mutex<Option<Pending>>, fragments: &mut Vec<Bytes>) {
    let Some(slot) = pending.lock().take() else {
        debug!("audio complete with no request pending");
        fragments.clear();
        return;
    };

    if fragments.is_empty() {
        let _ = slot.responder.send(Err(SpeechError::RemoteFailure(
            "no audio data received".to_string(),
        )));
        return;
    }

    let count = fragments.len();
    let total: usize = fragments.iter().map(|f| f.len()).sum();
    let mut assembled = BytesMut::with_capacity(total);
    for fragment in fragments.drain(..) {
        assembled.extend_from_slice(&fragment);
    }

    let elapsed = slot.started_at.elapsed();
    info!(
        "assembled {count} fragments ({total} bytes) in {:.1}s",
        elapsed.as_secs_f64()
    );

    let _ = slot.responder.send(Ok(SynthesizedAudio {
        bytes: assembled.freeze(),
        fragments: count,
        elapsed,
    }));
}

/// Reject the pending request, if any.
fn reject_pending(pending: &Mutex<Option<Pending>>, error: SpeechError) {
    if let Some(slot) = pending.lock().take() {
        let _ = slot.responder.send(Err(error));
    }
}
