//! Dashboard event stream consumption.
//!
//! Three pieces: [`DashboardEvent`] parsing for the JSON frames the
//! dashboard pushes, the [`EventChannel`] that keeps the socket alive with
//! reconnect backoff, and the [`EventDispatcher`] that turns events into
//! playback items and cache writes.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crier::core::events::{EventChannel, EventChannelConfig, EventDispatcher};
//! # async fn connect(dispatcher: Arc<EventDispatcher>) {
//! let channel = EventChannel::start(
//!     EventChannelConfig {
//!         url: "ws://localhost:8000/ws/queue/sess-1".to_string(),
//!         auth_token: None,
//!         session_id: "sess-1".to_string(),
//!     },
//!     dispatcher,
//! );
//! // ... runs until shutdown
//! channel.shutdown().await;
//! # }
//! ```

mod channel;
mod dispatcher;
mod messages;


pub use channel::{EventChannel, EventChannelConfig};
pub use dispatcher::EventDispatcher;
pub(crate) use dispatcher::resolve_location;
pub use messages::{AuthFrame, DashboardEvent, JobLane, Notification, UserNotification};
