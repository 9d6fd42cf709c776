//! Message identity used for notification deduplication
//!
//! Identities are plain strings so history files stay readable and compatible
//! across versions:
//! - IMAP: `{folder}-{uid}-{message_id}` or `{folder}-{uid}` without Message-ID
//! - POP3: `pop3-{uidl or index}-{message_id or content digest}`

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::{FetchedHeaders, Protocol};

/// Deduplication key of a fetched message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageIdentity(String);

impl MessageIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the identity of a message
///
/// `seq` is the provider UID for folder protocols and the positional index for
/// inbox-only ones. An empty `message_id` is treated as absent.
pub fn build_identity(
    protocol: Protocol,
    folder: Option<&str>,
    seq: u32,
    message_id: Option<&str>,
) -> MessageIdentity {
    let message_id = message_id.map(str::trim).filter(|id| !id.is_empty());
    let key = match (protocol, folder, message_id) {
        (Protocol::Imap, Some(folder), Some(id)) => format!("{}-{}-{}", folder, seq, id),
        (Protocol::Imap, Some(folder), None) => format!("{}-{}", folder, seq),
        (Protocol::Imap, None, Some(id)) => format!("{}-{}", seq, id),
        (Protocol::Imap, None, None) => seq.to_string(),
        (Protocol::Pop3, _, Some(id)) => format!("pop3-{}-{}", seq, id),
        (Protocol::Pop3, _, None) => format!("pop3-{}", seq),
    };
    MessageIdentity(key)
}

/// Identity of a message fetched from an inbox-only mailbox
///
/// The server's UIDL replaces the positional index when available, since
/// indexes shift after deletions. Without a Message-ID the identity falls back
/// to a digest of sender, subject and size so repeated fetches of the same
/// message agree, including across restarts.
pub fn inbox_identity(headers: &FetchedHeaders) -> MessageIdentity {
    let locator = headers
        .uidl
        .as_deref()
        .map(str::trim)
        .filter(|uidl| !uidl.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| headers.index.to_string());

    let message_id = headers.message_id.trim();
    let tail = if message_id.is_empty() {
        content_digest(&headers.from, &headers.subject, headers.size)
    } else {
        message_id.to_string()
    };

    MessageIdentity(format!("pop3-{}-{}", locator, tail))
}

fn content_digest(from: &str, subject: &str, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from.as_bytes());
    hasher.update([0u8]);
    hasher.update(subject.as_bytes());
    hasher.update([0u8]);
    hasher.update(size.to_be_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", &hex[..16])
}
