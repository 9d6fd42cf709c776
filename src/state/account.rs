//! Per-account handle
//!
//! Configuration and runtime state are owned separately: the configuration is
//! an immutable `Arc<AccountConfig>` swapped as a whole on reconfiguration,
//! while status and history live behind their own lock that is never held
//! across network I/O.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::config::AccountConfig;
use crate::sync::history::NotificationHistory;
use crate::sync::supervisor::AccountSupervisor;
use crate::types::AccountStatus;

/// Mutable per-account state written by poll cycles
#[derive(Debug, Default)]
pub struct AccountRuntime {
    pub history: NotificationHistory,
    pub unread_count: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Stable handle to one monitored account
pub struct AccountHandle {
    email: String,
    config: RwLock<Arc<AccountConfig>>,
    runtime: Mutex<AccountRuntime>,
    cycle: Mutex<()>,
    supervisor: Mutex<Option<AccountSupervisor>>,
}

impl AccountHandle {
    pub fn new(config: AccountConfig, history: NotificationHistory) -> Self {
        Self {
            email: config.email.clone(),
            config: RwLock::new(Arc::new(config)),
            runtime: Mutex::new(AccountRuntime {
                history,
                ..Default::default()
            }),
            cycle: Mutex::new(()),
            supervisor: Mutex::new(None),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Snapshot of the current configuration
    pub async fn config(&self) -> Arc<AccountConfig> {
        self.config.read().await.clone()
    }

    /// Swap in a new configuration; cycles already running keep their snapshot
    pub async fn replace_config(&self, config: AccountConfig) {
        *self.config.write().await = Arc::new(config);
    }

    pub async fn runtime(&self) -> MutexGuard<'_, AccountRuntime> {
        self.runtime.lock().await
    }

    /// Held for the duration of a poll cycle so cycles never overlap
    pub(crate) async fn lock_cycle(&self) -> MutexGuard<'_, ()> {
        self.cycle.lock().await
    }

    pub(crate) async fn supervisor(&self) -> MutexGuard<'_, Option<AccountSupervisor>> {
        self.supervisor.lock().await
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .map(|s| !s.is_finished())
            .unwrap_or(false)
    }

    pub async fn status(&self) -> AccountStatus {
        let config = self.config().await;
        let running = self.is_running().await;
        let runtime = self.runtime.lock().await;
        AccountStatus {
            email: self.email.clone(),
            protocol: config.protocol,
            check_interval: config.check_interval,
            running,
            unread_count: runtime.unread_count,
            last_check: runtime.last_check,
            last_error: runtime.last_error.clone(),
            remembered: runtime.history.len(),
        }
    }
}
