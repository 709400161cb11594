//! Dashboard event WebSocket connection.
//!
//! [`EventChannel`] owns a background task that keeps one socket to the
//! dashboard's event endpoint alive: it authenticates on open, feeds every
//! parsed frame to the [`EventDispatcher`], and reconnects with doubling
//! backoff when the connection drops. The backoff resets after each
//! successful connection, so a flaky link recovers quickly while a dead
//! dashboard is retried at the capped interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use super::dispatcher::EventDispatcher;
use super::messages::{AuthFrame, DashboardEvent};

/// First retry delay after a dropped connection.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Retry delay ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Connection settings for the event socket.
#[derive(Debug, Clone)]
pub struct EventChannelConfig {
    /// Full event endpoint, including the session id path segment.
    pub url: String,
    /// Token for the auth frame. Sent empty when unset; the server decides
    /// whether anonymous connections are acceptable.
    pub auth_token: Option<String>,
    /// Session id shared with the speech connection.
    pub session_id: String,
}

/// How one established connection ended.
enum ConnectionEnd {
    /// Shutdown was requested; do not reconnect.
    Shutdown,
    /// The connection dropped or was rejected; reconnect after backoff.
    Lost,
}

/// Handle to the background connection task.
pub struct EventChannel {
    shutdown_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    task_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl EventChannel {
    /// Spawn the connection task. Returns immediately; the task keeps
    /// retrying in the background until [`shutdown`](Self::shutdown).
    pub fn start(config: EventChannelConfig, dispatcher: Arc<EventDispatcher>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let task_handle = tokio::spawn(run_channel(
            config,
            dispatcher,
            shutdown_rx,
            Arc::clone(&connected),
        ));

        Self {
            shutdown_tx: parking_lot::Mutex::new(Some(shutdown_tx)),
            task_handle: parking_lot::Mutex::new(Some(task_handle)),
            connected,
        }
    }

    /// Whether a socket is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the connection task and close any open socket.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }

        let handle = self.task_handle.lock().take();
        if let Some(handle) = handle {
            if timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("event channel task did not stop in time");
            }
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.lock().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

async fn run_channel(
    config: EventChannelConfig,
    dispatcher: Arc<EventDispatcher>,
    mut shutdown_rx: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let attempt = tokio::select! {
            _ = &mut shutdown_rx => break,
            result = connect_async(&config.url) => result,
        };

        match attempt {
            Ok((ws, _response)) => {
                info!("event channel connected to {}", config.url);
                backoff = INITIAL_BACKOFF;
                connected.store(true, Ordering::SeqCst);

                let end = drive_connection(ws, &config, &dispatcher, &mut shutdown_rx).await;
                connected.store(false, Ordering::SeqCst);

                if matches!(end, ConnectionEnd::Shutdown) {
                    break;
                }
            }
            Err(e) => {
                warn!("event channel connection to {} failed: {e}", config.url);
            }
        }

        debug!("event channel reconnecting in {backoff:?}");
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);
    }

    info!("event channel stopped");
}

/// Doubling backoff, capped.
fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Authenticate, then pump frames to the dispatcher until the connection
/// ends one way or another.
async fn drive_connection(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &EventChannelConfig,
    dispatcher: &Arc<EventDispatcher>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> ConnectionEnd {
    let (mut write, mut read) = ws.split();

    // The server drops sockets that do not authenticate first.
    let auth = AuthFrame::new(
        config.auth_token.clone().unwrap_or_default(),
        config.session_id.clone(),
    );
    let frame = match serde_json::to_string(&auth) {
        Ok(frame) => frame,
        Err(e) => {
            error!("failed to encode auth frame: {e}");
            return ConnectionEnd::Lost;
        }
    };
    if let Err(e) = write.send(Message::Text(frame)).await {
        warn!("failed to send auth frame: {e}");
        return ConnectionEnd::Lost;
    }

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                let _ = write.close().await;
                return ConnectionEnd::Shutdown;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match DashboardEvent::parse(&text) {
                        Ok(event) => {
                            let rejected = event.is_auth_error();
                            dispatcher.dispatch(event).await;
                            if rejected {
                                warn!("closing event channel after auth rejection");
                                let _ = write.close().await;
                                return ConnectionEnd::Lost;
                            }
                        }
                        Err(e) => {
                            warn!("unparseable event frame: {e}");
                            debug!("offending frame: {text}");
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Binary(payload))) => {
                    debug!("ignoring {} byte binary frame on event channel", payload.len());
                }
                Some(Ok(Message::Close(_))) => {
                    info!("event channel closed by server");
                    return ConnectionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("event channel read error: {e}");
                    return ConnectionEnd::Lost;
                }
                None => {
                    info!("event channel stream ended");
                    return ConnectionEnd::Lost;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }
}
