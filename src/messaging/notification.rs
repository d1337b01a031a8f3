// Notifications - Non-fatal problems reported to the host
// Device failures, unreadable audio files, realtime faults. Playback keeps going.

use std::fmt;
use std::time::{Duration, SystemTime};

use ringbuf::traits::Producer;

use crate::messaging::channels::NotificationProducer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Which part of the session raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Audio,
    Midi,
    Sync,
    Project,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub message: String,
    pub raised_at: SystemTime,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        category: NotificationCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            category,
            message: message.into(),
            raised_at: SystemTime::now(),
        }
    }

    pub fn info(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, category, message)
    }

    pub fn warning(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, category, message)
    }

    pub fn error(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, category, message)
    }

    /// Time since it was raised (zero if the wall clock went backwards)
    pub fn age(&self) -> Duration {
        self.raised_at.elapsed().unwrap_or_default()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.category, self.level, self.message)
    }
}

/// Push without blocking; a full channel drops the notification
pub fn notify(tx: &mut NotificationProducer, notification: Notification) {
    if let Err(dropped) = tx.try_push(notification) {
        log::debug!("Notification channel full, dropped: {}", dropped);
    }
}
