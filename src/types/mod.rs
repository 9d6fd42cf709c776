pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote mail access protocol of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Folder-capable protocol
    #[default]
    Imap,
    /// Inbox-only protocol
    Pop3,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Imap => "imap",
            Protocol::Pop3 => "pop3",
        }
    }

    /// Whether the protocol exposes named folders
    pub fn has_folders(&self) -> bool {
        matches!(self, Protocol::Imap)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reported by a folder selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStatus {
    pub message_count: u32,
    pub unseen_count: u32,
}

/// Envelope data fetched from a folder-capable session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedEnvelope {
    /// Provider UID of the message within its folder
    pub uid: u32,
    /// `mailbox@host` of the first From address, empty if unavailable
    pub sender_address: String,
    /// Display name of the first From address
    pub sender_name: Option<String>,
    pub subject: String,
    /// Message-ID header value, empty if the message has none
    pub message_id: String,
}

/// Header data fetched from an inbox-only session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedHeaders {
    /// Position of the message in the mailbox (1-based)
    pub index: u32,
    /// Server unique-id listing for the message, when supported
    pub uidl: Option<String>,
    /// Raw From header value
    pub from: String,
    pub subject: String,
    /// Message-ID header value, empty if the message has none
    pub message_id: String,
    /// Message size in octets as reported by the server
    pub size: u64,
}

/// Account status for display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountStatus {
    pub email: String,
    pub protocol: Protocol,
    pub check_interval: u64,
    pub running: bool,
    pub unread_count: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub remembered: usize,
}

/// Event emitted by monitors as status changes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StatusEvent {
    MonitorStarted {
        email: String,
    },
    MonitorStopped {
        email: String,
    },
    CycleCompleted {
        email: String,
        unread_count: u32,
        new_notifications: u32,
        checked_at: DateTime<Utc>,
    },
    CycleFailed {
        email: String,
        error: String,
    },
    HistoryCleared {
        email: String,
    },
}
