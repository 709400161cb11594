//! Event-to-action dispatch.
//!
//! [`EventDispatcher`] turns parsed [`DashboardEvent`]s into playback queue
//! items and message-cache writes. It owns the small amount of state the
//! event stream needs between frames: the authenticated user id, the set of
//! already-processed notification ids, and the last played audio reference
//! for duplicate suppression.
//!
//! Dispatch is side-effect only. Connection lifecycle (reconnects, auth
//! rejection) is the channel's business; everything here is unit-testable
//! by feeding events directly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use super::messages::{DashboardEvent, Notification, UserNotification};
use crate::config::SoundTable;
use crate::core::cache::{EntryMetadata, TieredCache};
use crate::core::hash::content_hash;
use crate::core::playback::{PlaybackQueue, Priority};

/// Routes dashboard events into the playback queue and the message cache.
pub struct EventDispatcher {
    queue: Arc<PlaybackQueue>,
    messages: Arc<TieredCache<String>>,
    sounds: SoundTable,
    base_url: String,
    quiet: bool,
    user_id: parking_lot::Mutex<Option<String>>,
    seen_notifications: parking_lot::Mutex<HashSet<String>>,
    last_audio_url: parking_lot::Mutex<Option<String>>,
}

impl EventDispatcher {
    pub fn new(
        queue: Arc<PlaybackQueue>,
        messages: Arc<TieredCache<String>>,
        sounds: SoundTable,
        base_url: impl Into<String>,
        quiet: bool,
    ) -> Self {
        Self {
            queue,
            messages,
            sounds,
            base_url: base_url.into(),
            quiet,
            user_id: parking_lot::Mutex::new(None),
            seen_notifications: parking_lot::Mutex::new(HashSet::new()),
            last_audio_url: parking_lot::Mutex::new(None),
        }
    }

    /// Server-assigned user id, once authentication has succeeded.
    pub fn user_id(&self) -> Option<String> {
        self.user_id.lock().clone()
    }

    /// Apply one event.
    pub async fn dispatch(&self, event: DashboardEvent) {
        match event {
            DashboardEvent::Connect { message } => match message {
                Some(message) => info!("dashboard connection confirmed: {message}"),
                None => info!("dashboard connection confirmed"),
            },
            DashboardEvent::AuthSuccess { user_id } => {
                info!("authenticated as {user_id}");
                *self.user_id.lock() = Some(user_id);
            }
            DashboardEvent::AuthError { message } => {
                error!("dashboard authentication failed: {message}");
            }
            DashboardEvent::TimeUpdate { date } => {
                debug!("server time: {date}");
            }
            DashboardEvent::CountUpdate { lane, value } => {
                debug!("jobs {}: {}", lane.as_str(), value);
            }
            DashboardEvent::NotificationSound { sound_file } => {
                self.play_sound(&sound_file, Priority::Medium).await;
            }
            DashboardEvent::AudioUpdate { text, audio_url } => {
                self.handle_audio_update(text, audio_url).await;
            }
            DashboardEvent::UserNotification(notification) => {
                self.handle_user_notification(notification).await;
            }
            DashboardEvent::NotificationUpdate { notification } => match notification {
                Some(notification) => self.handle_notification(notification).await,
                None => debug!("notification_update without payload"),
            },
            DashboardEvent::Unknown { kind } => {
                debug!("ignoring unknown event type: {kind}");
            }
        }
    }

    /// Completion messages are cached for replay, then spoken. Bare sound
    /// references play directly, with consecutive duplicates suppressed and
    /// the chime substituted in quiet mode.
    async fn handle_audio_update(&self, text: Option<String>, audio_url: Option<String>) {
        if let Some(text) = text {
            let job_id = format!("job_{}", epoch_ms());
            let metadata = EntryMetadata {
                content_hash: Some(content_hash(&text)),
                user_id: self.user_id(),
                source: Some("audio_update".to_string()),
                ..Default::default()
            };
            self.messages.put(&job_id, text.clone(), metadata).await;
            debug!("stored completion message as {job_id}");

            if let Err(e) = self.queue.speak(text, Priority::Medium).await {
                warn!("failed to queue completion speech: {e}");
            }
            return;
        }

        let location = if self.quiet {
            debug!("quiet mode, substituting chime");
            self.sounds.chime.clone()
        } else {
            audio_url.unwrap_or_else(|| self.sounds.chime.clone())
        };

        {
            let mut last = self.last_audio_url.lock();
            if last.as_deref() == Some(location.as_str()) {
                debug!("duplicate audio reference, skipping");
                return;
            }
            *last = Some(location.clone());
        }

        self.play_sound(&location, Priority::Medium).await;
    }

    /// Direct notifications are spoken at their mapped priority; the queue
    /// provides the fallback sound if synthesis fails.
    async fn handle_user_notification(&self, notification: UserNotification) {
        info!(
            "user notification {}/{}",
            notification.kind, notification.priority
        );

        let speech = notification_speech(
            &notification.kind,
            &notification.message,
            &notification.priority,
        );
        let priority = Priority::from_label(&notification.priority);
        if let Err(e) = self.queue.speak(speech, priority).await {
            warn!("failed to queue user notification: {e}");
        }
    }

    /// Queue-pushed notifications play their priority sound, then the
    /// elevated ones are also spoken. Redeliveries of an id are dropped.
    async fn handle_notification(&self, notification: Notification) {
        {
            let mut seen = self.seen_notifications.lock();
            if !seen.insert(notification.id_hash.clone()) {
                debug!("notification {} already processed", notification.id_hash);
                return;
            }
        }

        info!(
            "notification {} ({}/{})",
            notification.id_hash, notification.kind, notification.priority
        );

        let priority = Priority::from_label(&notification.priority);
        let sound = self.sounds.for_priority(&notification.priority).to_string();
        self.play_sound(&sound, priority).await;

        if priority.is_elevated() {
            let speech = notification_speech(
                &notification.kind,
                &notification.message,
                &notification.priority,
            );
            if let Err(e) = self.queue.speak(speech, priority).await {
                warn!("failed to queue notification speech: {e}");
            }
        }
    }

    async fn play_sound(&self, location: &str, priority: Priority) {
        let resolved = resolve_location(&self.base_url, location);
        if let Err(e) = self.queue.play_sound(resolved, priority).await {
            warn!("failed to queue sound {location}: {e}");
        }
    }
}

/// Spoken form of a notification: `"<kind> notification: <message>"`, with
/// an urgency prefix for the elevated priorities.
pub(crate) fn notification_speech(kind: &str, message: &str, priority: &str) -> String {
    let base = format!("{kind} notification: {message}");
    match priority {
        "urgent" => format!("Urgent! {base}"),
        "high" => format!("Important! {base}"),
        _ => base,
    }
}

/// Server-relative sound paths resolve against the dashboard base URL;
/// absolute URLs and local paths pass through.
pub(crate) fn resolve_location(base_url: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else if location.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), location)
    } else {
        location.to_string()
    }
}

fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
