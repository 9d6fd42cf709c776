use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::credentials::SecretStore;
use crate::types::error::{MonitorError, Result};
use crate::types::Protocol;

/// Directory name used under the platform config directory
pub const APP_DIR_NAME: &str = "mailwatch";

const DEFAULT_CHECK_INTERVAL: u64 = 120;
const DEFAULT_CHECK_HISTORY: usize = 1000;
const DEFAULT_NETWORK_TIMEOUT: u64 = 30;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine-wide settings
    #[serde(default)]
    pub settings: Settings,

    /// Monitored accounts, in configuration order
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Upper bound for a single network operation (connect, select, search, fetch)
    #[serde(default = "default_network_timeout")]
    pub network_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network_timeout_seconds: DEFAULT_NETWORK_TIMEOUT,
        }
    }
}

/// Account configuration
///
/// Immutable once loaded; reconfiguration swaps the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Email address; also the secret-store key and history-file key
    pub email: String,

    /// Mail server hostname
    pub server: String,

    /// Mail server port (default: 993 for IMAP, 995 for POP3)
    #[serde(default)]
    pub port: u16,

    /// Login name (defaults to the email address)
    #[serde(default)]
    pub username: String,

    /// Access protocol
    #[serde(default)]
    pub protocol: Protocol,

    /// Legacy plaintext password, moved into the secret store on startup
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Poll interval in seconds
    #[serde(default)]
    pub check_interval: u64,

    /// Maximum number of remembered notification identities
    #[serde(default)]
    pub check_history: usize,

    /// Play a sound with each notification
    #[serde(default = "default_true")]
    pub enable_notification_sound: bool,

    /// Sender and subject filters
    #[serde(default)]
    pub filters: FilterPolicy,

    /// Folders to scan (ignored for POP3)
    #[serde(default)]
    pub folders: FolderPolicy,
}

/// Include/exclude filter policy of an account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    /// Sender addresses that always pass (switches the policy to selective)
    pub include_senders: Vec<String>,
    /// Sender addresses that never pass
    pub exclude_senders: Vec<String>,
    /// Subject keywords that pass (switches the policy to selective)
    pub include_keywords: Vec<String>,
    /// Subject keywords that never pass
    pub exclude_keywords: Vec<String>,
}

/// Folder selection mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderMode {
    #[default]
    All,
    Include,
    Exclude,
}

/// Folder policy of an account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderPolicy {
    pub mode: FolderMode,
    /// Folders scanned in include mode, in this order
    pub include: Vec<String>,
    /// Folders skipped in exclude mode
    pub exclude: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_network_timeout() -> u64 {
    DEFAULT_NETWORK_TIMEOUT
}

impl AccountConfig {
    /// Create an account with default tunables
    pub fn new(email: &str, server: &str, protocol: Protocol) -> Self {
        let mut account = Self {
            email: email.to_string(),
            server: server.to_string(),
            port: 0,
            username: String::new(),
            protocol,
            password: None,
            check_interval: 0,
            check_history: 0,
            enable_notification_sound: true,
            filters: FilterPolicy::default(),
            folders: FolderPolicy::default(),
        };
        account.apply_defaults();
        account
    }

    /// Fill in zero/empty tunables
    pub fn apply_defaults(&mut self) {
        if self.check_interval == 0 {
            self.check_interval = DEFAULT_CHECK_INTERVAL;
        }
        if self.check_history == 0 {
            self.check_history = DEFAULT_CHECK_HISTORY;
        }
        if self.port == 0 {
            self.port = match self.protocol {
                Protocol::Imap => 993,
                Protocol::Pop3 => 995,
            };
        }
        if self.username.is_empty() {
            self.username = self.email.clone();
        }
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            return Err(MonitorError::Config("account email is required".into()));
        }
        if self.server.trim().is_empty() {
            return Err(MonitorError::Config(format!(
                "[{}] server is required",
                self.email
            )));
        }
        if self.port == 0 {
            return Err(MonitorError::Config(format!("[{}] port is required", self.email)));
        }
        if self.check_interval < 1 {
            return Err(MonitorError::Config(format!(
                "[{}] check interval must be at least 1 second",
                self.email
            )));
        }
        if self.protocol.has_folders()
            && self.folders.mode == FolderMode::Include
            && self.folders.include.is_empty()
        {
            warn!(
                "[{}] folder mode is 'include' but no folders are listed; nothing will be checked",
                self.email
            );
        }
        Ok(())
    }
}

impl AppConfig {
    /// Apply defaults to every account and validate the whole configuration
    pub fn normalize(&mut self) -> Result<()> {
        if self.accounts.is_empty() {
            return Err(MonitorError::Config("no accounts configured".into()));
        }
        if self.settings.network_timeout_seconds == 0 {
            self.settings.network_timeout_seconds = DEFAULT_NETWORK_TIMEOUT;
        }

        let mut seen = HashSet::new();
        for account in &mut self.accounts {
            account.apply_defaults();
            account.validate()?;
            if !seen.insert(account.email.to_lowercase()) {
                return Err(MonitorError::DuplicateAccount(account.email.clone()));
            }
        }
        Ok(())
    }

    /// Configuration written when no config file exists yet
    pub fn sample() -> Self {
        let mut account = AccountConfig::new("user@example.com", "imap.example.com", Protocol::Imap);
        account.username = "user@example.com".into();
        Self {
            settings: Settings::default(),
            accounts: vec![account],
        }
    }
}

/// Application directory (`<config_dir>/mailwatch`)
pub fn app_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| MonitorError::Config("unable to determine user config directory".into()))
}

/// Default config file path
pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_dir()?.join("config.toml"))
}

/// Directory holding one history file per account
pub fn default_history_dir() -> Result<PathBuf> {
    Ok(app_dir()?.join("notification_history"))
}

/// Load and normalize the configuration at `path`
///
/// A missing file is replaced by a sample configuration and reported as a
/// configuration error so the caller can stop and ask for edits.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        save_config(path, &AppConfig::sample())?;
        info!("Created sample config file: {:?}", path);
        return Err(MonitorError::Config(format!(
            "sample configuration created at {}; edit it and restart",
            path.display()
        )));
    }

    info!("Loading configuration from: {:?}", path);
    let content = fs::read_to_string(path)
        .map_err(|e| MonitorError::Config(format!("Failed to read config: {}", e)))?;
    let mut config: AppConfig = toml::from_str(&content)
        .map_err(|e| MonitorError::Config(format!("Failed to parse config: {}", e)))?;
    config.normalize()?;
    Ok(config)
}

/// Write the configuration to `path`; passwords are never written
pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Move legacy plaintext passwords into the secret store
///
/// Returns true when at least one password was migrated, in which case the
/// configuration should be persisted again.
pub fn migrate_legacy_passwords(config: &mut AppConfig, secrets: &dyn SecretStore) -> bool {
    let mut migrated = false;
    for account in &mut config.accounts {
        let Some(password) = account.password.take() else {
            continue;
        };
        if password.is_empty() {
            continue;
        }
        match secrets.set(&account.email, &password) {
            Ok(()) => {
                info!("[{}] Migrated password to keyring", account.email);
                migrated = true;
            }
            Err(e) => {
                warn!("[{}] Failed to migrate password to keyring: {}", account.email, e);
                account.password = Some(password);
            }
        }
    }
    migrated
}

/// Load/persist collaborator for the account collection
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<AppConfig>;
    fn persist(&self, config: &AppConfig) -> Result<()>;
}

/// Config store backed by a TOML file
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<AppConfig> {
        load_config(&self.path)
    }

    fn persist(&self, config: &AppConfig) -> Result<()> {
        save_config(&self.path, config)
    }
}

/// Config store that keeps the last persisted value in memory
#[derive(Default)]
pub struct MemoryConfigStore {
    config: Mutex<Option<AppConfig>>,
}

impl MemoryConfigStore {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
        }
    }

    /// Last persisted configuration
    pub fn snapshot(&self) -> Option<AppConfig> {
        self.config.lock().ok().and_then(|guard| guard.clone())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<AppConfig> {
        self.snapshot()
            .ok_or_else(|| MonitorError::Config("no configuration stored".into()))
    }

    fn persist(&self, config: &AppConfig) -> Result<()> {
        let mut guard = self
            .config
            .lock()
            .map_err(|e| MonitorError::Config(format!("Failed to lock config: {}", e)))?;
        *guard = Some(config.clone());
        Ok(())
    }
}
