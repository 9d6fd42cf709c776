//! Fleet controller
//!
//! Owns every monitored account, keyed by lowercase email. Structural changes
//! (add, update, remove) and lifecycle changes (start, stop, restart) go
//! through a single mutation gate. The registry lock itself is only held to
//! read or swap handles, never across I/O.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{Connector, MailSession};
use crate::config::{AccountConfig, AppConfig, ConfigStore, Settings};
use crate::credentials::{CredentialError, SecretStore};
use crate::notifier::{Notifier, APP_NAME};
use crate::state::AccountHandle;
use crate::sync::cycle::{account_secret, guarded, run_poll_cycle, CycleOutcome, MonitorContext};
use crate::sync::history::{load_with_cleanup, HistoryStore, NotificationHistory};
use crate::sync::supervisor::AccountSupervisor;
use crate::types::error::{MonitorError, Result};
use crate::types::{AccountStatus, Protocol, StatusEvent};

/// Capacity of the status event channel
const EVENT_CAPACITY: usize = 256;

/// Collaborators the fleet runs against
pub struct FleetServices {
    pub connector: Arc<dyn Connector>,
    pub secrets: Arc<dyn SecretStore>,
    pub notifier: Arc<dyn Notifier>,
    pub history: Arc<dyn HistoryStore>,
    pub config_store: Arc<dyn ConfigStore>,
}

/// What a connection test found on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionReport {
    /// Folder-capable server with this many folders
    Folders(usize),
    /// Inbox-only server holding this many messages
    Messages(u32),
}

#[derive(Default)]
struct Registry {
    handles: HashMap<String, Arc<AccountHandle>>,
    /// Keys in configuration order
    order: Vec<String>,
}

impl Registry {
    fn ordered(&self) -> Vec<Arc<AccountHandle>> {
        self.order
            .iter()
            .filter_map(|key| self.handles.get(key).cloned())
            .collect()
    }
}

fn account_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Fleet controller - manages the monitors of every configured account
pub struct FleetController {
    registry: RwLock<Registry>,
    gate: Mutex<()>,
    ctx: Arc<MonitorContext>,
    config_store: Arc<dyn ConfigStore>,
    settings: Settings,
    shutdown: CancellationToken,
    events: flume::Receiver<StatusEvent>,
}

impl FleetController {
    /// Build the fleet from a normalized configuration
    ///
    /// Each account's history is loaded and trimmed to its cap. A history that
    /// cannot be read is logged and replaced by an empty one.
    pub fn new(config: AppConfig, services: FleetServices) -> Result<Self> {
        let (tx, events) = flume::bounded(EVENT_CAPACITY);
        let ctx = Arc::new(MonitorContext::new(
            services.connector,
            services.secrets,
            services.notifier,
            services.history,
            Duration::from_secs(config.settings.network_timeout_seconds.max(1)),
            tx,
        ));

        let mut registry = Registry::default();
        for mut account in config.accounts {
            account.apply_defaults();
            account.validate()?;
            let key = account_key(&account.email);
            if registry.handles.contains_key(&key) {
                return Err(MonitorError::DuplicateAccount(account.email));
            }
            let history = load_history(ctx.history.as_ref(), &account);
            registry
                .handles
                .insert(key.clone(), Arc::new(AccountHandle::new(account, history)));
            registry.order.push(key);
        }

        info!("Fleet created with {} accounts", registry.order.len());
        Ok(Self {
            registry: RwLock::new(registry),
            gate: Mutex::new(()),
            ctx,
            config_store: services.config_store,
            settings: config.settings,
            shutdown: CancellationToken::new(),
            events,
        })
    }

    /// Receiver of status events from every monitor
    pub fn events(&self) -> flume::Receiver<StatusEvent> {
        self.events.clone()
    }

    async fn handles(&self) -> Vec<Arc<AccountHandle>> {
        self.registry.read().await.ordered()
    }

    async fn handle(&self, email: &str) -> Result<Arc<AccountHandle>> {
        self.registry
            .read()
            .await
            .handles
            .get(&account_key(email))
            .cloned()
            .ok_or_else(|| MonitorError::AccountNotFound(email.to_string()))
    }

    /// Emails of all accounts, in configuration order
    pub async fn emails(&self) -> Vec<String> {
        self.handles()
            .await
            .iter()
            .map(|h| h.email().to_string())
            .collect()
    }

    /// Current configuration, as it would be persisted
    pub async fn config_snapshot(&self) -> AppConfig {
        let mut accounts = Vec::new();
        for handle in self.handles().await {
            accounts.push(handle.config().await.as_ref().clone());
        }
        AppConfig {
            settings: self.settings.clone(),
            accounts,
        }
    }

    fn start_monitor(&self, handle: &Arc<AccountHandle>, slot: &mut Option<AccountSupervisor>) {
        if slot.as_ref().is_some_and(|s| !s.is_finished()) {
            return;
        }
        *slot = Some(AccountSupervisor::start(
            handle.clone(),
            self.ctx.clone(),
            self.shutdown.child_token(),
        ));
    }

    async fn start_handle(&self, handle: &Arc<AccountHandle>) {
        let mut slot = handle.supervisor().await;
        self.start_monitor(handle, &mut slot);
    }

    /// Stop a monitor and wait for it; returns whether one was running
    async fn stop_handle(handle: &AccountHandle) -> bool {
        let supervisor = handle.supervisor().await.take();
        match supervisor {
            Some(supervisor) => {
                supervisor.stop().await;
                true
            }
            None => false,
        }
    }

    /// Start every account's monitor; already running ones are left alone
    pub async fn start_all(&self) {
        let _gate = self.gate.lock().await;
        let handles = self.handles().await;
        for handle in &handles {
            self.start_handle(handle).await;
        }
        info!("Started {} monitors", handles.len());
    }

    /// Stop every monitor and wait until all have stopped
    pub async fn stop_all(&self) {
        let _gate = self.gate.lock().await;
        self.stop_handles().await;
    }

    async fn stop_handles(&self) {
        let handles = self.handles().await;
        join_all(handles.iter().map(|h| Self::stop_handle(h))).await;
        info!("Stopped all monitors");
    }

    pub async fn restart_all(&self) {
        {
            let _gate = self.gate.lock().await;
            self.stop_handles().await;
            for handle in self.handles().await {
                self.start_handle(&handle).await;
            }
        }
        self.fleet_notice("Monitors restarted");
    }

    pub async fn start(&self, email: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        let handle = self.handle(email).await?;
        self.start_handle(&handle).await;
        Ok(())
    }

    pub async fn stop(&self, email: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        let handle = self.handle(email).await?;
        Self::stop_handle(&handle).await;
        Ok(())
    }

    pub async fn restart(&self, email: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        let handle = self.handle(email).await?;
        Self::stop_handle(&handle).await;
        self.start_handle(&handle).await;
        Ok(())
    }

    /// Stop all monitors and abort anything still in flight
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop_all().await;
    }

    /// Poll every account now, concurrently, and wait for all of them
    pub async fn check_all(&self) -> Vec<(String, Result<CycleOutcome>)> {
        let handles = self.handles().await;
        let token = self.shutdown.child_token();
        let results = join_all(handles.iter().map(|handle| {
            let token = &token;
            async move {
                let result = run_poll_cycle(handle, &self.ctx, token).await;
                (handle.email().to_string(), result)
            }
        }))
        .await;

        let new: u32 = results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(|o| o.new_notifications)
            .sum();
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            "Manual check completed ({} accounts, {} new, {} failed)",
            results.len(),
            new,
            failed
        );
        self.fleet_notice("Manual check completed");
        results
    }

    /// Poll one account now
    pub async fn check(&self, email: &str) -> Result<CycleOutcome> {
        let handle = self.handle(email).await?;
        run_poll_cycle(&handle, &self.ctx, &self.shutdown.child_token()).await
    }

    /// Forget every notified message of every account
    pub async fn clear_history_all(&self) {
        for handle in self.handles().await {
            self.clear_handle_history(&handle).await;
        }
        self.fleet_notice("History cleared");
    }

    pub async fn clear_history(&self, email: &str) -> Result<()> {
        let handle = self.handle(email).await?;
        self.clear_handle_history(&handle).await;
        Ok(())
    }

    async fn clear_handle_history(&self, handle: &AccountHandle) {
        // A cycle in flight would save its older snapshot after ours
        let _cycle = handle.lock_cycle().await;
        let snapshot = {
            let mut runtime = handle.runtime().await;
            runtime.history.clear();
            runtime.history.clone()
        };
        self.ctx.persist_history(handle.email(), &snapshot);
        info!(account = %handle.email(), "Notification history cleared");
        self.ctx.emit(StatusEvent::HistoryCleared {
            email: handle.email().to_string(),
        });
    }

    /// Add and start a new account
    ///
    /// The secret is stored first; if persisting the configuration fails the
    /// secret is removed again and the collection is left unchanged.
    pub async fn add_account(&self, mut account: AccountConfig, secret: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        account.password = None;
        account.apply_defaults();
        account.validate()?;

        let key = account_key(&account.email);
        if self.registry.read().await.handles.contains_key(&key) {
            return Err(MonitorError::DuplicateAccount(account.email));
        }

        self.ctx.secrets.set(&account.email, secret)?;

        let mut config = self.config_snapshot().await;
        config.accounts.push(account.clone());
        if let Err(e) = self.config_store.persist(&config) {
            if let Err(cleanup) = self.ctx.secrets.delete(&account.email) {
                warn!(account = %account.email, "Failed to roll back secret: {}", cleanup);
            }
            return Err(e);
        }

        let history = load_history(self.ctx.history.as_ref(), &account);
        let email = account.email.clone();
        let handle = Arc::new(AccountHandle::new(account, history));
        {
            let mut registry = self.registry.write().await;
            registry.handles.insert(key.clone(), handle.clone());
            registry.order.push(key);
        }
        self.start_handle(&handle).await;

        info!(account = %email, "Account added");
        Ok(())
    }

    /// Replace an account's configuration, and optionally its secret
    ///
    /// The monitor is stopped before the swap and started again afterwards if
    /// it was running, so no cycle observes a half-applied change. On error
    /// neither the stored secret nor the persisted configuration changes.
    pub async fn update_account(&self, mut account: AccountConfig, secret: Option<&str>) -> Result<()> {
        let _gate = self.gate.lock().await;
        let handle = self.handle(&account.email).await?;
        account.password = None;
        account.apply_defaults();
        account.validate()?;

        let key = account_key(&account.email);
        let mut config = self.config_snapshot().await;
        for existing in &mut config.accounts {
            if account_key(&existing.email) == key {
                *existing = account.clone();
            }
        }
        let previous = match secret {
            Some(secret) => {
                let previous = match self.ctx.secrets.get(&account.email) {
                    Ok(previous) => Some(previous),
                    Err(CredentialError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                self.ctx.secrets.set(&account.email, secret)?;
                Some(previous)
            }
            None => None,
        };

        if let Err(e) = self.config_store.persist(&config) {
            if let Some(previous) = previous {
                self.restore_secret(&account.email, previous.as_deref());
            }
            return Err(e);
        }

        let was_running = Self::stop_handle(&handle).await;
        handle.replace_config(account).await;
        if was_running {
            self.start_handle(&handle).await;
        }

        info!(account = %handle.email(), "Account updated");
        Ok(())
    }

    /// Stop and remove an account, deleting its secret
    ///
    /// The configuration is persisted first; if that fails the account keeps
    /// running unchanged. A secret that cannot be deleted afterwards is only
    /// logged, the account is gone either way.
    pub async fn remove_account(&self, email: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        let handle = self.handle(email).await?;
        let key = account_key(email);

        let mut config = self.config_snapshot().await;
        config.accounts.retain(|a| account_key(&a.email) != key);

        let was_running = Self::stop_handle(&handle).await;

        if let Err(e) = self.config_store.persist(&config) {
            warn!(account = %handle.email(), "Failed to persist removal: {}", e);
            if was_running {
                self.start_handle(&handle).await;
            }
            return Err(e);
        }

        {
            let mut registry = self.registry.write().await;
            registry.handles.remove(&key);
            registry.order.retain(|k| k != &key);
        }

        match self.ctx.secrets.delete(handle.email()) {
            Ok(()) | Err(CredentialError::NotFound(_)) => {}
            Err(e) => warn!(account = %handle.email(), "Failed to delete secret: {}", e),
        }

        info!(account = %handle.email(), "Account removed");
        Ok(())
    }

    /// Put back the secret an update replaced
    fn restore_secret(&self, email: &str, previous: Option<&str>) {
        let result = match previous {
            Some(secret) => self.ctx.secrets.set(email, secret),
            None => self.ctx.secrets.delete(email),
        };
        if let Err(e) = result {
            warn!(account = %email, "Failed to roll back secret: {}", e);
        }
    }

    pub async fn status(&self, email: &str) -> Result<AccountStatus> {
        Ok(self.handle(email).await?.status().await)
    }

    /// Status of every account, in configuration order
    pub async fn statuses(&self) -> Vec<AccountStatus> {
        let mut statuses = Vec::new();
        for handle in self.handles().await {
            statuses.push(handle.status().await);
        }
        statuses
    }

    /// Sum of the last known unread counts
    pub async fn total_unread(&self) -> u32 {
        let mut total: u32 = 0;
        for handle in self.handles().await {
            total = total.saturating_add(handle.runtime().await.unread_count);
        }
        total
    }

    /// Live folder names of a folder-capable account
    pub async fn list_remote_folders(&self, email: &str) -> Result<Vec<String>> {
        let account = self.handle(email).await?.config().await;
        if !account.protocol.has_folders() {
            return Err(MonitorError::NotSupported(format!(
                "{} accounts have no folders",
                account.protocol
            )));
        }

        let secret = account_secret(&account, self.ctx.secrets.as_ref())?;
        match self.connect(&account, &secret).await? {
            MailSession::Folders(mut session) => {
                let result = self
                    .guarded("list folders", session.list_folders())
                    .await;
                MailSession::Folders(session).close().await;
                result
            }
            other => {
                other.close().await;
                Err(MonitorError::NotSupported("server has no folders".into()))
            }
        }
    }

    /// Log in with the given settings and report what the server holds
    ///
    /// Touches neither the account collection nor any stored secret.
    pub async fn test_connection(
        &self,
        protocol: Protocol,
        server: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<ConnectionReport> {
        let mut account = AccountConfig::new(username, server, protocol);
        account.port = port;
        account.apply_defaults();
        account.validate()?;

        let report = match self.connect(&account, password).await? {
            MailSession::Folders(mut session) => {
                let result = self.guarded("list folders", session.list_folders()).await;
                MailSession::Folders(session).close().await;
                ConnectionReport::Folders(result?.len())
            }
            MailSession::Inbox(mut session) => {
                let result = self.guarded("stat", session.stat()).await;
                MailSession::Inbox(session).close().await;
                ConnectionReport::Messages(result?)
            }
        };
        info!("Connection test to {}:{} succeeded: {:?}", server, account.port, report);
        Ok(report)
    }

    async fn connect(&self, account: &AccountConfig, secret: &str) -> Result<MailSession> {
        self.guarded("connect", self.ctx.connector.connect(account, secret))
            .await
    }

    async fn guarded<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        guarded(&self.shutdown, self.ctx.network_timeout, operation, fut).await
    }

    fn fleet_notice(&self, body: &str) {
        if let Err(e) = self.ctx.notifier.notify(APP_NAME, body, false) {
            warn!("Failed to show notification: {}", e);
        }
    }
}

fn load_history(store: &dyn HistoryStore, account: &AccountConfig) -> NotificationHistory {
    match load_with_cleanup(store, &account.email, account.check_history) {
        Ok(history) => history,
        Err(e) => {
            warn!(account = %account.email, "Failed to load notification history: {}", e);
            NotificationHistory::new()
        }
    }
}
