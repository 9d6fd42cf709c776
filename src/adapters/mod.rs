//! Remote mailbox adapters
//!
//! The poll cycle talks to mail servers through two session capabilities:
//! folder-capable sessions (IMAP) and inbox-only sessions (POP3). A
//! `Connector` opens the right kind of session for an account, which keeps
//! the cycle testable with scripted sessions.

pub mod imap;
pub mod pop3;

use async_trait::async_trait;

use crate::config::AccountConfig;
use crate::types::error::Result;
use crate::types::{FetchedEnvelope, FetchedHeaders, FolderStatus, Protocol};

/// Session against a server exposing named folders
#[async_trait]
pub trait FolderSession: Send {
    /// Names of every folder on the server
    async fn list_folders(&mut self) -> Result<Vec<String>>;

    /// Open `folder` read-only and report its counts
    async fn select_folder(&mut self, folder: &str) -> Result<FolderStatus>;

    /// UIDs of unseen messages in the selected folder, ascending
    async fn search_unseen(&mut self) -> Result<Vec<u32>>;

    /// Envelopes for `uids` in the selected folder
    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedEnvelope>>;

    async fn logout(&mut self) -> Result<()>;
}

/// Session against a server exposing a single inbox
#[async_trait]
pub trait InboxSession: Send {
    /// Number of messages in the mailbox
    async fn stat(&mut self) -> Result<u32>;

    /// Headers of the message at `index` (1-based)
    async fn retrieve(&mut self, index: u32) -> Result<FetchedHeaders>;

    async fn quit(&mut self) -> Result<()>;
}

/// An authenticated session of either kind
pub enum MailSession {
    Folders(Box<dyn FolderSession>),
    Inbox(Box<dyn InboxSession>),
}

impl MailSession {
    /// Close the session; errors are logged, never returned
    pub async fn close(self) {
        let result = match self {
            MailSession::Folders(mut session) => session.logout().await,
            MailSession::Inbox(mut session) => session.quit().await,
        };
        if let Err(e) = result {
            tracing::debug!("Error closing session: {}", e);
        }
    }
}

/// Opens authenticated sessions for accounts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, account: &AccountConfig, secret: &str) -> Result<MailSession>;
}

/// Connector using TLS connections to real servers
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkConnector;

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(&self, account: &AccountConfig, secret: &str) -> Result<MailSession> {
        match account.protocol {
            Protocol::Imap => {
                let conn =
                    imap::connect(&account.server, account.port, &account.username, secret)
                        .await?;
                Ok(MailSession::Folders(Box::new(conn)))
            }
            Protocol::Pop3 => {
                let conn =
                    pop3::connect(&account.server, account.port, &account.username, secret)
                        .await?;
                Ok(MailSession::Inbox(Box::new(conn)))
            }
        }
    }
}
