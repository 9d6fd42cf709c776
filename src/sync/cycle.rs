//! Poll cycle
//!
//! One complete check of an account: connect with the stored secret, walk the
//! resolved folders (or the single POP3 inbox), notify once per new message
//! that passes the filters, then record status and persist the history.
//!
//! Connection-level failures abort the cycle and leave the last status in
//! place. Failures on a single folder or message are logged and skipped.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{Connector, FolderSession, InboxSession, MailSession};
use crate::config::AccountConfig;
use crate::credentials::SecretStore;
use crate::notifier::{MailNotice, Notifier};
use crate::state::AccountHandle;
use crate::sync::filter::{extract_email_address, should_notify};
use crate::sync::folders::resolve_folders;
use crate::sync::history::{HistoryStore, NotificationHistory};
use crate::sync::identity::{build_identity, inbox_identity, MessageIdentity};
use crate::types::error::{MonitorError, Result};
use crate::types::{FetchedEnvelope, Protocol, StatusEvent};

/// Notification location shown for inbox-only accounts
const INBOX_LOCATION: &str = "POP3";

/// Most UIDs requested by a single envelope fetch
const FETCH_BATCH: usize = 500;

/// Collaborators shared by every account's poll cycles
pub struct MonitorContext {
    pub connector: Arc<dyn Connector>,
    pub secrets: Arc<dyn SecretStore>,
    pub notifier: Arc<dyn Notifier>,
    pub history: Arc<dyn HistoryStore>,
    /// Upper bound for a single network operation
    pub network_timeout: Duration,
    events: flume::Sender<StatusEvent>,
}

impl MonitorContext {
    pub fn new(
        connector: Arc<dyn Connector>,
        secrets: Arc<dyn SecretStore>,
        notifier: Arc<dyn Notifier>,
        history: Arc<dyn HistoryStore>,
        network_timeout: Duration,
        events: flume::Sender<StatusEvent>,
    ) -> Self {
        Self {
            connector,
            secrets,
            notifier,
            history,
            network_timeout,
            events,
        }
    }

    /// Publish a status event; dropped when no one keeps up
    pub fn emit(&self, event: StatusEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Status event dropped: {}", e);
        }
    }

    /// Save a history snapshot; failures are logged and the in-memory copy kept
    pub fn persist_history(&self, email: &str, history: &NotificationHistory) {
        if let Err(e) = self.history.save(email, history) {
            warn!(account = %email, "Failed to save notification history: {}", e);
        }
    }
}

/// Result of a successful poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub unread_count: u32,
    pub new_notifications: u32,
}

/// Run one poll cycle for `handle`
///
/// Waits for any cycle already running on the same account. `token` aborts
/// in-flight network operations.
pub async fn run_poll_cycle(
    handle: &AccountHandle,
    ctx: &MonitorContext,
    token: &CancellationToken,
) -> Result<CycleOutcome> {
    let _cycle = handle.lock_cycle().await;
    let account = handle.config().await;
    let email = account.email.as_str();
    let cycle_start = handle.runtime().await.history.stamp();
    debug!(account = %email, "Starting poll cycle");

    let mut scan = Scan {
        account: &account,
        handle,
        ctx,
        token,
        new_notifications: 0,
    };
    let result = scan.run().await;
    let new_notifications = scan.new_notifications;

    match result {
        Ok(unread_count) => {
            let snapshot = {
                let mut runtime = handle.runtime().await;
                runtime.unread_count = unread_count;
                runtime.last_check = Some(Utc::now());
                runtime.last_error = None;

                let before = runtime.history.len();
                // Identities seen by this cycle are still unread on the server
                let evicted = runtime
                    .history
                    .enforce_cap_before(account.check_history, cycle_start);
                if evicted > 0 {
                    info!(
                        "[{}] Cleanup history (current: {}, max: {}, evicted: {})",
                        email, before, account.check_history, evicted
                    );
                }
                (new_notifications > 0 || evicted > 0).then(|| runtime.history.clone())
            };
            if let Some(history) = snapshot {
                ctx.persist_history(email, &history);
            }

            info!(
                account = %email,
                unread = unread_count,
                new = new_notifications,
                "Poll cycle completed"
            );
            ctx.emit(StatusEvent::CycleCompleted {
                email: email.to_string(),
                unread_count,
                new_notifications,
                checked_at: Utc::now(),
            });
            Ok(CycleOutcome {
                unread_count,
                new_notifications,
            })
        }
        Err(e) => {
            // Notifications already shown must stay remembered
            if new_notifications > 0 {
                let history = handle.runtime().await.history.clone();
                ctx.persist_history(email, &history);
            }

            if e == MonitorError::Cancelled {
                debug!(account = %email, "Poll cycle cancelled");
                return Err(e);
            }

            warn!(account = %email, "Poll cycle failed: {}", e);
            handle.runtime().await.last_error = Some(e.to_string());
            ctx.emit(StatusEvent::CycleFailed {
                email: email.to_string(),
                error: e.to_string(),
            });
            Err(e)
        }
    }
}

/// Run `fut` unless cancelled, bounded by `limit`
pub async fn guarded<T, F>(
    token: &CancellationToken,
    limit: Duration,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MonitorError::Cancelled),
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(MonitorError::Timeout(format!("{} after {:?}", operation, limit))),
        },
    }
}

/// Secret for `account`, falling back to a not yet migrated config password
pub fn account_secret(account: &AccountConfig, secrets: &dyn SecretStore) -> Result<String> {
    match secrets.get(&account.email) {
        Ok(secret) => Ok(secret),
        Err(e) => match account.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => {
                debug!(account = %account.email, "Using password from config: {}", e);
                Ok(password.to_string())
            }
            None => Err(e.into()),
        },
    }
}

struct Scan<'a> {
    account: &'a AccountConfig,
    handle: &'a AccountHandle,
    ctx: &'a MonitorContext,
    token: &'a CancellationToken,
    new_notifications: u32,
}

impl Scan<'_> {
    async fn guarded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        guarded(self.token, self.ctx.network_timeout, operation, fut).await
    }

    /// Scan the mailbox and return the unread count
    async fn run(&mut self) -> Result<u32> {
        let secret = account_secret(self.account, self.ctx.secrets.as_ref())?;
        let session = self
            .guarded("connect", self.ctx.connector.connect(self.account, &secret))
            .await?;

        match session {
            MailSession::Folders(mut session) => {
                let result = self.scan_folders(session.as_mut()).await;
                if let Err(e) = self.guarded("logout", session.logout()).await {
                    debug!(account = %self.account.email, "Logout failed: {}", e);
                }
                result
            }
            MailSession::Inbox(mut session) => {
                let result = self.scan_inbox(session.as_mut()).await;
                if let Err(e) = self.guarded("quit", session.quit()).await {
                    debug!(account = %self.account.email, "Quit failed: {}", e);
                }
                result
            }
        }
    }

    async fn scan_folders(&mut self, session: &mut dyn FolderSession) -> Result<u32> {
        let policy = &self.account.folders;
        let live = if policy.needs_listing() {
            self.guarded("list folders", session.list_folders()).await?
        } else {
            Vec::new()
        };
        let folders = resolve_folders(policy, &live);
        debug!(account = %self.account.email, "Checking folders: {:?}", folders);

        let mut unread: u32 = 0;
        for folder in &folders {
            let status = match self.guarded("select", session.select_folder(folder)).await {
                Ok(status) => status,
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    warn!(account = %self.account.email, folder = %folder, "Skipping folder: {}", e);
                    continue;
                }
            };
            unread = unread.saturating_add(status.unseen_count);

            if status.message_count == 0 {
                continue;
            }
            match self.scan_folder(session, folder).await {
                Ok(()) => {}
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    warn!(account = %self.account.email, folder = %folder, "Skipping folder: {}", e);
                }
            }
        }
        Ok(unread)
    }

    async fn scan_folder(&mut self, session: &mut dyn FolderSession, folder: &str) -> Result<()> {
        let uids = self.guarded("search", session.search_unseen()).await?;
        if uids.is_empty() {
            return Ok(());
        }

        for batch in uids.chunks(FETCH_BATCH) {
            let envelopes = self.guarded("fetch", session.fetch(batch)).await?;
            self.consider_envelopes(folder, envelopes).await;
        }
        Ok(())
    }

    async fn consider_envelopes(&mut self, folder: &str, envelopes: Vec<FetchedEnvelope>) {
        for envelope in envelopes {
            let identity = build_identity(
                Protocol::Imap,
                Some(folder),
                envelope.uid,
                Some(&envelope.message_id),
            );
            let sender = match &envelope.sender_name {
                Some(name) if !envelope.sender_address.is_empty() => {
                    format!("{} <{}>", name, envelope.sender_address)
                }
                Some(name) => name.clone(),
                None => envelope.sender_address.clone(),
            };
            self.consider(
                identity,
                folder,
                &envelope.sender_address,
                &sender,
                &envelope.subject,
            )
            .await;
        }
    }

    async fn scan_inbox(&mut self, session: &mut dyn InboxSession) -> Result<u32> {
        let count = self.guarded("stat", session.stat()).await?;

        for index in 1..=count {
            let headers = match self.guarded("retrieve", session.retrieve(index)).await {
                Ok(headers) => headers,
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    warn!(account = %self.account.email, index = index, "Skipping message: {}", e);
                    continue;
                }
            };
            let identity = inbox_identity(&headers);
            let address = extract_email_address(&headers.from);
            self.consider(
                identity,
                INBOX_LOCATION,
                &address,
                &headers.from,
                &headers.subject,
            )
            .await;
        }

        // No unseen flag on inbox-only servers
        Ok(count)
    }

    /// Notify for a fetched message unless already remembered or filtered out
    async fn consider(
        &mut self,
        identity: MessageIdentity,
        location: &str,
        sender_address: &str,
        sender_display: &str,
        subject: &str,
    ) {
        {
            let mut runtime = self.handle.runtime().await;
            if runtime.history.contains(&identity) {
                runtime.history.touch(&identity);
                return;
            }
        }

        if !should_notify(&self.account.filters, sender_address, subject) {
            debug!(account = %self.account.email, "Filtered out: {}", identity);
            return;
        }

        let notice = MailNotice::new(&self.account.email, location, sender_display, subject);
        if let Err(e) = self.ctx.notifier.notify(
            &notice.title,
            &notice.body,
            self.account.enable_notification_sound,
        ) {
            warn!(account = %self.account.email, "Failed to show notification: {}", e);
        }

        self.handle.runtime().await.history.insert(identity);
        self.new_notifications += 1;
    }
}
