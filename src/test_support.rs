//! Scripted collaborators for engine tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::adapters::{Connector, FolderSession, InboxSession, MailSession};
use crate::config::{AccountConfig, AppConfig, ConfigStore, MemoryConfigStore, Settings};
use crate::credentials::{CredentialError, MemorySecretStore, SecretStore};
use crate::notifier::Notifier;
use crate::state::{AccountHandle, FleetServices};
use crate::sync::cycle::{run_poll_cycle, CycleOutcome, MonitorContext};
use crate::sync::history::{HistoryStore, NotificationHistory};
use crate::sync::identity::MessageIdentity;
use crate::sync::supervisor::AccountSupervisor;
use crate::types::error::{MonitorError, Result};
use crate::types::{FetchedEnvelope, FetchedHeaders, FolderStatus, Protocol, StatusEvent};

pub const EMAIL: &str = "me@example.com";
pub const SECRET: &str = "secret";

pub fn envelope(uid: u32, from: &str, subject: &str, message_id: &str) -> FetchedEnvelope {
    FetchedEnvelope {
        uid,
        sender_address: from.to_string(),
        sender_name: None,
        subject: subject.to_string(),
        message_id: message_id.to_string(),
    }
}

pub fn named_envelope(
    uid: u32,
    name: &str,
    from: &str,
    subject: &str,
    message_id: &str,
) -> FetchedEnvelope {
    FetchedEnvelope {
        sender_name: Some(name.to_string()),
        ..envelope(uid, from, subject, message_id)
    }
}

pub fn headers(
    index: u32,
    uidl: Option<&str>,
    from: &str,
    subject: &str,
    message_id: &str,
) -> FetchedHeaders {
    FetchedHeaders {
        index,
        uidl: uidl.map(str::to_string),
        from: from.to_string(),
        subject: subject.to_string(),
        message_id: message_id.to_string(),
        size: 100 + index as u64,
    }
}

pub fn account(email: &str, protocol: Protocol) -> AccountConfig {
    AccountConfig::new(email, "mail.example.com", protocol)
}

#[derive(Debug, Clone)]
pub struct FakeFolder {
    pub name: String,
    pub total: u32,
    pub unseen: Vec<FetchedEnvelope>,
}

impl FakeFolder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total: 0,
            unseen: Vec::new(),
        }
    }

    pub fn with_unseen(mut self, envelope: FetchedEnvelope) -> Self {
        self.total += 1;
        self.unseen.push(envelope);
        self
    }

    pub fn with_seen(mut self, count: u32) -> Self {
        self.total += count;
        self
    }
}

/// Remote mailbox state shared by a connector and its sessions
#[derive(Debug, Default)]
pub struct FakeServer {
    pub folders: Vec<FakeFolder>,
    pub inbox: Vec<FetchedHeaders>,
    pub connect_error: Option<MonitorError>,
    pub hang_connect: bool,
    pub broken_listing: bool,
    pub broken_folders: Vec<String>,
    pub broken_searches: Vec<String>,
    pub connects: u32,
    pub last_secret: Option<String>,
    /// UID count of every fetch request, in order
    pub fetch_batches: Vec<usize>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    server: Arc<Mutex<FakeServer>>,
}

impl FakeConnector {
    pub fn new(server: FakeServer) -> Self {
        Self {
            server: Arc::new(Mutex::new(server)),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeServer)) {
        f(&mut self.server.lock().unwrap());
    }

    pub fn connects(&self) -> u32 {
        self.server.lock().unwrap().connects
    }

    pub fn last_secret(&self) -> Option<String> {
        self.server.lock().unwrap().last_secret.clone()
    }

    pub fn fetch_batches(&self) -> Vec<usize> {
        self.server.lock().unwrap().fetch_batches.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, account: &AccountConfig, secret: &str) -> Result<MailSession> {
        let hang = {
            let mut server = self.server.lock().unwrap();
            server.connects += 1;
            server.last_secret = Some(secret.to_string());
            if let Some(e) = server.connect_error.clone() {
                return Err(e);
            }
            server.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }

        Ok(match account.protocol {
            Protocol::Imap => MailSession::Folders(Box::new(FakeFolderSession {
                server: self.server.clone(),
                selected: None,
            })),
            Protocol::Pop3 => MailSession::Inbox(Box::new(FakeInboxSession {
                server: self.server.clone(),
            })),
        })
    }
}

struct FakeFolderSession {
    server: Arc<Mutex<FakeServer>>,
    selected: Option<String>,
}

impl FakeFolderSession {
    fn selected_folder(&self) -> Result<FakeFolder> {
        let name = self
            .selected
            .as_ref()
            .ok_or_else(|| MonitorError::Mailbox("no folder selected".into()))?;
        let server = self.server.lock().unwrap();
        if server.broken_searches.contains(name) {
            return Err(MonitorError::Mailbox(format!("SEARCH failed in {}", name)));
        }
        server
            .folders
            .iter()
            .find(|f| &f.name == name)
            .cloned()
            .ok_or_else(|| MonitorError::Mailbox(format!("no such folder: {}", name)))
    }
}

#[async_trait]
impl FolderSession for FakeFolderSession {
    async fn list_folders(&mut self) -> Result<Vec<String>> {
        let server = self.server.lock().unwrap();
        if server.broken_listing {
            return Err(MonitorError::Mailbox("LIST failed".into()));
        }
        Ok(server.folders.iter().map(|f| f.name.clone()).collect())
    }

    async fn select_folder(&mut self, folder: &str) -> Result<FolderStatus> {
        let status = {
            let server = self.server.lock().unwrap();
            if server.broken_folders.iter().any(|f| f == folder) {
                return Err(MonitorError::Mailbox(format!("EXAMINE {} failed", folder)));
            }
            server
                .folders
                .iter()
                .find(|f| f.name == folder)
                .map(|f| FolderStatus {
                    message_count: f.total,
                    unseen_count: f.unseen.len() as u32,
                })
                .ok_or_else(|| MonitorError::Mailbox(format!("no such folder: {}", folder)))?
        };
        self.selected = Some(folder.to_string());
        Ok(status)
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>> {
        Ok(self.selected_folder()?.unseen.iter().map(|e| e.uid).collect())
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedEnvelope>> {
        self.server.lock().unwrap().fetch_batches.push(uids.len());
        Ok(self
            .selected_folder()?
            .unseen
            .into_iter()
            .filter(|e| uids.contains(&e.uid))
            .collect())
    }

    async fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

struct FakeInboxSession {
    server: Arc<Mutex<FakeServer>>,
}

#[async_trait]
impl InboxSession for FakeInboxSession {
    async fn stat(&mut self) -> Result<u32> {
        Ok(self.server.lock().unwrap().inbox.len() as u32)
    }

    async fn retrieve(&mut self, index: u32) -> Result<FetchedHeaders> {
        let server = self.server.lock().unwrap();
        index
            .checked_sub(1)
            .and_then(|i| server.inbox.get(i as usize))
            .cloned()
            .ok_or_else(|| MonitorError::Mailbox(format!("no message {}", index)))
    }

    async fn quit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotice {
    pub title: String,
    pub body: String,
    pub play_sound: bool,
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<RecordedNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<RecordedNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.notices.lock().unwrap().len()
    }

    pub fn titles(&self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.title).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str, play_sound: bool) -> Result<()> {
        self.notices.lock().unwrap().push(RecordedNotice {
            title: title.to_string(),
            body: body.to_string(),
            play_sound,
        });
        Ok(())
    }
}

/// History store kept in memory, with a switch to make saves fail
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<HashMap<String, Vec<MessageIdentity>>>,
    saves: AtomicU32,
    failing: AtomicBool,
}

impl MemoryHistoryStore {
    pub fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self, key: &str) -> Option<Vec<MessageIdentity>> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn seed(&self, key: &str, identities: Vec<MessageIdentity>) {
        self.records.lock().unwrap().insert(key.to_string(), identities);
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self, key: &str) -> Result<NotificationHistory> {
        Ok(NotificationHistory::from_ordered(
            self.stored(key).unwrap_or_default(),
        ))
    }

    fn save(&self, key: &str, history: &NotificationHistory) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Io("disk full".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), history.ordered());
        Ok(())
    }
}

/// Secret store whose writes and deletes can be made to fail
#[derive(Default)]
pub struct FlakySecretStore {
    inner: MemorySecretStore,
    failing: AtomicBool,
}

impl FlakySecretStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> std::result::Result<(), CredentialError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CredentialError::Keyring("keyring locked".into()));
        }
        Ok(())
    }
}

impl SecretStore for FlakySecretStore {
    fn get(&self, key: &str) -> std::result::Result<String, CredentialError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, secret: &str) -> std::result::Result<(), CredentialError> {
        self.check()?;
        self.inner.set(key, secret)
    }

    fn delete(&self, key: &str) -> std::result::Result<(), CredentialError> {
        self.check()?;
        self.inner.delete(key)
    }
}

/// Config store that can be switched to fail every write
#[derive(Default)]
pub struct FlakyConfigStore {
    inner: MemoryConfigStore,
    failing: AtomicBool,
}

impl FlakyConfigStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Option<AppConfig> {
        self.inner.snapshot()
    }
}

impl ConfigStore for FlakyConfigStore {
    fn load(&self) -> Result<AppConfig> {
        self.inner.load()
    }

    fn persist(&self, config: &AppConfig) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Io("disk full".into()));
        }
        self.inner.persist(config)
    }
}

/// Single account wired to scripted collaborators
pub struct Fixture {
    pub handle: Arc<AccountHandle>,
    pub ctx: Arc<MonitorContext>,
    pub connector: FakeConnector,
    pub secrets: Arc<MemorySecretStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub history: Arc<MemoryHistoryStore>,
    pub events: flume::Receiver<StatusEvent>,
}

impl Fixture {
    pub fn imap(folders: Vec<FakeFolder>) -> Self {
        Self::imap_with(folders, |_| {})
    }

    pub fn imap_with(folders: Vec<FakeFolder>, edit: impl FnOnce(&mut AccountConfig)) -> Self {
        let server = FakeServer {
            folders,
            ..Default::default()
        };
        Self::build(Protocol::Imap, server, edit)
    }

    pub fn pop3(inbox: Vec<FetchedHeaders>) -> Self {
        Self::pop3_with(inbox, |_| {})
    }

    pub fn pop3_with(inbox: Vec<FetchedHeaders>, edit: impl FnOnce(&mut AccountConfig)) -> Self {
        let server = FakeServer {
            inbox,
            ..Default::default()
        };
        Self::build(Protocol::Pop3, server, edit)
    }

    fn build(protocol: Protocol, server: FakeServer, edit: impl FnOnce(&mut AccountConfig)) -> Self {
        let mut config = account(EMAIL, protocol);
        edit(&mut config);

        let connector = FakeConnector::new(server);
        let secrets = Arc::new(MemorySecretStore::new());
        secrets.set(EMAIL, SECRET).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let history = Arc::new(MemoryHistoryStore::default());
        let (tx, events) = flume::bounded(64);

        let ctx = Arc::new(MonitorContext::new(
            Arc::new(connector.clone()),
            secrets.clone(),
            notifier.clone(),
            history.clone(),
            Duration::from_secs(30),
            tx,
        ));

        Self {
            handle: Arc::new(AccountHandle::new(config, NotificationHistory::new())),
            ctx,
            connector,
            secrets,
            notifier,
            history,
            events,
        }
    }

    pub async fn cycle(&self) -> Result<CycleOutcome> {
        run_poll_cycle(&self.handle, &self.ctx, &CancellationToken::new()).await
    }

    pub fn start(&self) -> AccountSupervisor {
        AccountSupervisor::start(
            self.handle.clone(),
            self.ctx.clone(),
            CancellationToken::new(),
        )
    }
}

/// Collaborators for fleet tests, kept so tests can inspect them
pub struct FleetFixture {
    pub connector: FakeConnector,
    pub secrets: Arc<FlakySecretStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub history: Arc<MemoryHistoryStore>,
    pub config_store: Arc<FlakyConfigStore>,
}

impl FleetFixture {
    pub fn new(server: FakeServer) -> Self {
        Self {
            connector: FakeConnector::new(server),
            secrets: Arc::new(FlakySecretStore::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            history: Arc::new(MemoryHistoryStore::default()),
            config_store: Arc::new(FlakyConfigStore::default()),
        }
    }

    /// Configuration for `emails`, with every secret stored
    pub fn config(&self, accounts: Vec<AccountConfig>) -> AppConfig {
        for account in &accounts {
            self.secrets.set(&account.email, SECRET).unwrap();
        }
        AppConfig {
            settings: Settings::default(),
            accounts,
        }
    }

    pub fn services(&self) -> FleetServices {
        FleetServices {
            connector: Arc::new(self.connector.clone()),
            secrets: self.secrets.clone(),
            notifier: self.notifier.clone(),
            history: self.history.clone(),
            config_store: self.config_store.clone(),
        }
    }
}
