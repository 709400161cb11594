//! Wire types for the synthesis exchange.
//!
//! The synthesis service is driven over two legs:
//!
//! - **HTTP**: [`SessionIdResponse`] from the session bootstrap endpoint, then
//!   [`SynthesisRequest`] posted to start one synthesis. A 2xx response means
//!   "accepted" only; audio arrives over the duplex channel.
//! - **WebSocket**: binary frames carry raw audio fragments; text frames carry
//!   JSON control messages parsed into [`ControlFrame`].
//!
//! # Control Frame Types
//!
//! | JSON `type` | Variant | Description |
//! |-------------|---------|-------------|
//! | `"status"` | `Status` | Progress report (`loading`, `error`, ...) |
//! | `"audio_complete"` | `AudioComplete` | All fragments sent, assemble now |
//! | `"error"` | `Error` | Synthesis failed |

use serde::{Deserialize, Serialize};

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Body of the synthesis request POST.
///
/// The server correlates the request with the duplex channel via `session_id`
/// and streams the resulting audio there.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    /// Session identifier shared with the duplex channel.
    pub session_id: String,
    /// Text to synthesize.
    pub text: String,
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// Response of the session bootstrap endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionIdResponse {
    /// Identifier to use for both the request POST and the duplex channel URL.
    pub session_id: String,
}

/// Control frames received as text messages on the duplex channel.
///
/// Use [`ControlFrame::parse()`] to deserialize incoming text frames. Binary
/// frames are audio fragments and never pass through this type.
#[derive(Debug, Clone)]
pub enum ControlFrame {
    /// Progress report from the server.
    ///
    /// `status == "loading"` announces that synthesis has started and
    /// fragments should follow shortly. `status == "error"` is an error
    /// report in status clothing; `text` carries the message.
    Status {
        /// Status keyword (`loading`, `error`, `success`, ...).
        status: String,
        /// Human-readable detail, when present.
        text: Option<String>,
    },

    /// All fragments for the current request have been sent.
    AudioComplete,

    /// Synthesis failed.
    Error {
        /// Failure description from the server.
        message: String,
    },

    /// Unknown frame type (for forward compatibility).
    Unknown(String),
}

impl ControlFrame {
    /// Parse a text frame into the appropriate variant.
    ///
    /// # Arguments
    /// * `text` - Raw JSON text from the WebSocket message
    ///
    /// # Returns
    /// * `Result<Self, serde_json::Error>` - Parsed frame or parse error
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        // First, peek at the type field
        #[derive(Deserialize)]
        struct FrameTypePeek {
            #[serde(rename = "type")]
            frame_type: String,
        }

        let peek: FrameTypePeek = serde_json::from_str(text)?;

        match peek.frame_type.as_str() {
            "status" => {
                #[derive(Deserialize)]
                struct StatusFrame {
                    status: String,
                    #[serde(default)]
                    text: Option<String>,
                }

                let frame: StatusFrame = serde_json::from_str(text)?;
                Ok(ControlFrame::Status {
                    status: frame.status,
                    text: frame.text,
                })
            }
            "audio_complete" => Ok(ControlFrame::AudioComplete),
            "error" => {
                // The server is inconsistent about the field name here.
                #[derive(Deserialize)]
                struct ErrorFrame {
                    #[serde(default)]
                    text: Option<String>,
                    #[serde(default)]
                    error: Option<String>,
                }

                let frame: ErrorFrame = serde_json::from_str(text)?;
                Ok(ControlFrame::Error {
                    message: frame
                        .text
                        .or(frame.error)
                        .unwrap_or_else(|| "synthesis failed".to_string()),
                })
            }
            _ => Ok(ControlFrame::Unknown(text.to_string())),
        }
    }

    /// Check if this frame reports a failure, in either encoding.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, ControlFrame::Error { .. })
            || matches!(self, ControlFrame::Status { status, .. } if status == "error")
    }
}
