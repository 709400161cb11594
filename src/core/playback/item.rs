//! Queued playback units and their priority tiers.

use std::time::Instant;

/// Priority tiers for queued playback.
///
/// Ordering is by urgency, so `Urgent < Low` in the derived [`Ord`] and a
/// smaller value means "plays sooner".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Urgent = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    /// Whether this priority belongs to the elevated tier that overtakes
    /// pending medium/low items.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Priority::Urgent | Priority::High)
    }

    /// Map a dashboard priority label to a tier.
    ///
    /// Unknown labels fall back to [`Priority::Medium`], the default the
    /// dashboard uses for unlabeled work.
    pub fn from_label(label: &str) -> Self {
        match label {
            "urgent" => Priority::Urgent,
            "high" => Priority::High,
            "medium" => Priority::Medium,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// What a queued item plays.
#[derive(Debug, Clone)]
pub enum ItemKind {
    /// Synthesize this text and play the result.
    Speak { text: String },
    /// Play a static sound from a local path or URL.
    Sound { location: String },
}

impl ItemKind {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Speak { .. } => "speak",
            ItemKind::Sound { .. } => "sound",
        }
    }
}

/// One unit of queued audio work.
///
/// Items live only in memory: created on enqueue, consumed when they become
/// the active item, discarded after playback succeeds or fails.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub kind: ItemKind,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

impl PlaybackItem {
    /// A synthesize-and-speak item.
    pub fn speak(text: impl Into<String>, priority: Priority) -> Self {
        Self {
            kind: ItemKind::Speak { text: text.into() },
            priority,
            enqueued_at: Instant::now(),
        }
    }

    /// A static sound item.
    pub fn sound(location: impl Into<String>, priority: Priority) -> Self {
        Self {
            kind: ItemKind::Sound {
                location: location.into(),
            },
            priority,
            enqueued_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_tiers() {
        assert!(Priority::Urgent.is_elevated());
        assert!(Priority::High.is_elevated());
        assert!(!Priority::Medium.is_elevated());
        assert!(!Priority::Low.is_elevated());
    }

    #[test]
    fn test_from_label() {
        assert_eq!(Priority::from_label("urgent"), Priority::Urgent);
        assert_eq!(Priority::from_label("high"), Priority::High);
        assert_eq!(Priority::from_label("medium"), Priority::Medium);
        assert_eq!(Priority::from_label("low"), Priority::Low);
        assert_eq!(Priority::from_label("whatever"), Priority::Medium);
    }

    #[test]
    fn test_priority_orders_by_urgency() {
        assert!(Priority::Urgent < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }
}
