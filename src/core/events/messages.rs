//! Message types for the dashboard event WebSocket.
//!
//! The dashboard pushes JSON frames with a `type` discriminator. This module
//! contains:
//!
//! - **Outgoing messages**: the [`AuthFrame`] sent once when a connection
//!   opens.
//! - **Incoming messages**: [`DashboardEvent`], parsed from text frames with
//!   [`DashboardEvent::parse()`].
//!
//! Unrecognized `type` values (including the retired `task` / `progress` /
//! `alert` / `custom` kinds) parse to [`DashboardEvent::Unknown`] so new
//! server-side events never break the client.

use serde::{Deserialize, Serialize};

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Authentication frame sent immediately after the event socket opens.
///
/// The server answers with an `auth_success` or `auth_error` event.
#[derive(Debug, Clone, Serialize)]
pub struct AuthFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    pub token: String,
    pub session_id: String,
}

impl AuthFrame {
    pub fn new(token: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            kind: "auth",
            token: token.into(),
            session_id: session_id.into(),
        }
    }
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// Which job list a count update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobLane {
    Todo,
    Running,
    Done,
    Dead,
}

impl JobLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobLane::Todo => "todo",
            JobLane::Running => "running",
            JobLane::Done => "done",
            JobLane::Dead => "dead",
        }
    }
}

/// A notification pushed to the client over an in-band event.
///
/// Speech and display text come from `message`; `id_hash` deduplicates
/// redeliveries of the same notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id_hash: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub priority: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A direct notification addressed to this user.
#[derive(Debug, Clone, Deserialize)]
pub struct UserNotification {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Enum of all dashboard events the client reacts to.
///
/// | JSON `type` | Variant |
/// |-------------|---------|
/// | `"connect"` | `Connect` |
/// | `"auth_success"` | `AuthSuccess` |
/// | `"auth_error"` | `AuthError` |
/// | `"time_update"` | `TimeUpdate` |
/// | `"todo_update"`, `"run_update"`, `"done_update"`, `"dead_update"` | `CountUpdate` |
/// | `"notification_sound_update"` | `NotificationSound` |
/// | `"audio_update"` | `AudioUpdate` |
/// | `"user_notification"` | `UserNotification` |
/// | `"notification_update"` | `NotificationUpdate` |
/// | anything else | `Unknown` |
#[derive(Debug, Clone)]
pub enum DashboardEvent {
    /// Connection acknowledged by the server.
    Connect { message: Option<String> },

    /// Authentication accepted; carries the server-side user id.
    AuthSuccess { user_id: String },

    /// Authentication rejected. The connection attempt is abandoned.
    AuthError { message: String },

    /// Server clock tick.
    TimeUpdate { date: String },

    /// Depth change on one of the job lists.
    ///
    /// The value is kept as raw JSON: the server sends counts today but
    /// has sent preformatted strings in the past.
    CountUpdate {
        lane: JobLane,
        value: serde_json::Value,
    },

    /// Play a specific notification sound.
    NotificationSound { sound_file: String },

    /// Speak a completion message, or play a referenced sound when no
    /// text is attached.
    AudioUpdate {
        text: Option<String>,
        audio_url: Option<String>,
    },

    /// Direct notification for this user, spoken aloud.
    UserNotification(UserNotification),

    /// Notification pushed from the server-side notification queue.
    ///
    /// The payload is optional because the server has been observed to
    /// emit the envelope without a body.
    NotificationUpdate { notification: Option<Notification> },

    /// Unrecognized event type (forward compatibility).
    Unknown { kind: String },
}

impl DashboardEvent {
    /// Parse a WebSocket text frame into an event.
    ///
    /// Frames without a string `type` field and frames whose payload does
    /// not match the expected shape return the underlying serde error;
    /// unknown `type` values succeed as [`DashboardEvent::Unknown`].
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct EventTypePeek {
            #[serde(rename = "type")]
            kind: String,
        }

        let peek: EventTypePeek = serde_json::from_str(raw)?;

        match peek.kind.as_str() {
            "connect" => {
                #[derive(Deserialize)]
                struct ConnectEvent {
                    #[serde(default)]
                    message: Option<String>,
                }

                let event: ConnectEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::Connect {
                    message: event.message,
                })
            }
            "auth_success" => {
                #[derive(Deserialize)]
                struct AuthSuccessEvent {
                    user_id: String,
                }

                let event: AuthSuccessEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::AuthSuccess {
                    user_id: event.user_id,
                })
            }
            "auth_error" => {
                #[derive(Deserialize)]
                struct AuthErrorEvent {
                    #[serde(default)]
                    message: Option<String>,
                }

                let event: AuthErrorEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::AuthError {
                    message: event
                        .message
                        .unwrap_or_else(|| "authentication failed".to_string()),
                })
            }
            "time_update" => {
                #[derive(Deserialize)]
                struct TimeUpdateEvent {
                    #[serde(default)]
                    date: String,
                }

                let event: TimeUpdateEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::TimeUpdate { date: event.date })
            }
            "todo_update" | "run_update" | "done_update" | "dead_update" => {
                #[derive(Deserialize)]
                struct CountUpdateEvent {
                    #[serde(default)]
                    value: serde_json::Value,
                }

                let lane = match peek.kind.as_str() {
                    "todo_update" => JobLane::Todo,
                    "run_update" => JobLane::Running,
                    "done_update" => JobLane::Done,
                    _ => JobLane::Dead,
                };
                let event: CountUpdateEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::CountUpdate {
                    lane,
                    value: event.value,
                })
            }
            "notification_sound_update" => {
                #[derive(Deserialize)]
                struct NotificationSoundEvent {
                    #[serde(rename = "soundFile")]
                    sound_file: String,
                }

                let event: NotificationSoundEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::NotificationSound {
                    sound_file: event.sound_file,
                })
            }
            "audio_update" => {
                #[derive(Deserialize)]
                struct AudioUpdateEvent {
                    #[serde(default)]
                    text: Option<String>,
                    #[serde(rename = "audioURL", default)]
                    audio_url: Option<String>,
                }

                let event: AudioUpdateEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::AudioUpdate {
                    text: event.text,
                    audio_url: event.audio_url,
                })
            }
            "user_notification" => {
                let event: UserNotification = serde_json::from_str(raw)?;
                Ok(DashboardEvent::UserNotification(event))
            }
            "notification_update" => {
                #[derive(Deserialize)]
                struct NotificationUpdateEvent {
                    #[serde(default)]
                    notification: Option<Notification>,
                }

                let event: NotificationUpdateEvent = serde_json::from_str(raw)?;
                Ok(DashboardEvent::NotificationUpdate {
                    notification: event.notification,
                })
            }
            _ => Ok(DashboardEvent::Unknown { kind: peek.kind }),
        }
    }

    /// Check if this event terminates the connection attempt.
    #[inline]
    pub fn is_auth_error(&self) -> bool {
        matches!(self, DashboardEvent::AuthError { .. })
    }
}
