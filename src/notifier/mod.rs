//! Desktop notifications
//!
//! `Notifier` is the capability the poll cycle fires through; the desktop
//! implementation uses the platform notification daemon via notify-rust.

use notify_rust::{Notification, Timeout};
use tracing::debug;

use crate::types::error::{MonitorError, Result};

/// Application name shown by the notification daemon
pub const APP_NAME: &str = "Mail Monitor";

const SUBJECT_DISPLAY_LIMIT: usize = 50;
const NOTIFICATION_TIMEOUT_MS: u32 = 5000;
/// Sound theme name for audible notifications
const SOUND_NAME: &str = "message-new-email";

/// Notification capability
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str, play_sound: bool) -> Result<()>;
}

/// Notifier backed by the platform notification daemon
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str, play_sound: bool) -> Result<()> {
        let mut notification = Notification::new();
        notification
            .appname(APP_NAME)
            .summary(title)
            .body(body)
            .icon("mail-unread")
            .timeout(Timeout::Milliseconds(NOTIFICATION_TIMEOUT_MS));
        if play_sound {
            notification.sound_name(SOUND_NAME);
        }

        notification
            .show()
            .map_err(|e| MonitorError::Notification(e.to_string()))?;
        debug!("Notification shown: {}", title);
        Ok(())
    }
}

/// Title and body of a new-mail notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailNotice {
    pub title: String,
    pub body: String,
}

impl MailNotice {
    /// Build the notice for a message
    ///
    /// `location` is the folder name, or the protocol tag for inbox-only
    /// accounts. Subjects longer than 50 characters are cut to 47 plus "...".
    pub fn new(account: &str, location: &str, sender: &str, subject: &str) -> Self {
        let sender = if sender.trim().is_empty() {
            "Unknown"
        } else {
            sender
        };
        let subject = if subject.trim().is_empty() {
            "(No Subject)"
        } else {
            subject
        };

        Self {
            title: format!("📧 {} [{}]", account, location),
            body: format!("From: {}\nSubject: {}", sender, display_subject(subject)),
        }
    }
}

fn display_subject(subject: &str) -> String {
    if subject.chars().count() > SUBJECT_DISPLAY_LIMIT {
        let cut: String = subject.chars().take(SUBJECT_DISPLAY_LIMIT - 3).collect();
        format!("{}...", cut)
    } else {
        subject.to_string()
    }
}
