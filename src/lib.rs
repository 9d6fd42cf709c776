//! mailwatch - new mail notifier for IMAP and POP3 accounts
//!
//! Polls every configured account on its own interval and raises a desktop
//! notification once per new message that passes the account's filters.
//!
//! ## Module Organization
//!
//! - `adapters/`: IMAP and POP3 sessions behind protocol-agnostic traits
//! - `sync/`: poll cycle, supervisor loop, identities, filters, history
//! - `state/`: per-account handles and the fleet controller
//! - `config/`: TOML configuration and defaults
//! - `credentials/`: secret storage in the platform keyring
//! - `notifier/`: desktop notifications
//! - `types/`: shared data structures and errors

pub mod adapters;
pub mod config;
pub mod credentials;
pub mod notifier;
pub mod state;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::NetworkConnector;
use crate::config::{ConfigStore, FileConfigStore};
use crate::credentials::KeyringStore;
use crate::notifier::DesktopNotifier;
use crate::state::{FleetController, FleetServices};
use crate::sync::history::FileHistoryStore;
use crate::types::error::Result;

/// Run the monitor until Ctrl-C
///
/// Loads the configuration, moves plaintext passwords into the keyring, then
/// starts one monitor per account.
pub async fn run() -> Result<()> {
    let config_store = Arc::new(FileConfigStore::new(config::default_config_path()?));
    let mut app_config = config_store.load()?;

    let secrets = Arc::new(KeyringStore::new());
    if config::migrate_legacy_passwords(&mut app_config, secrets.as_ref()) {
        if app_config.accounts.iter().all(|a| a.password.is_none()) {
            config_store.persist(&app_config)?;
            info!("Removed plaintext passwords from {:?}", config_store.path());
        } else {
            warn!("Some passwords could not be moved to the keyring; config file left as is");
        }
    }

    let fleet = FleetController::new(
        app_config,
        FleetServices {
            connector: Arc::new(NetworkConnector),
            secrets,
            notifier: Arc::new(DesktopNotifier),
            history: Arc::new(FileHistoryStore::new(config::default_history_dir()?)),
            config_store,
        },
    )?;

    let events = fleet.events();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            debug!(?event, "Status event");
        }
    });

    fleet.start_all().await;
    info!(
        "Monitoring {} accounts, press Ctrl-C to stop",
        fleet.emails().await.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    fleet.shutdown().await;
    event_log.abort();

    info!("Total unread at shutdown: {}", fleet.total_unread().await);
    Ok(())
}
