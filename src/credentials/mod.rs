//! Secure credential storage module
//!
//! Uses platform-native secure storage:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring, KDE Wallet)
//!
//! Secrets are keyed by account email and looked up on every connection
//! attempt; nothing here caches them.

use keyring::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Service name for keyring entries
const SERVICE_NAME: &str = "mailwatch";

/// Errors that can occur during credential operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Credential not found: {0}")]
    NotFound(String),
}

impl From<keyring::Error> for CredentialError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => CredentialError::NotFound("No entry found".to_string()),
            _ => CredentialError::Keyring(err.to_string()),
        }
    }
}

/// Secret storage capability
pub trait SecretStore: Send + Sync {
    /// Secret stored for `key`, or `CredentialError::NotFound`
    fn get(&self, key: &str) -> Result<String, CredentialError>;

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError>;

    fn delete(&self, key: &str) -> Result<(), CredentialError>;
}

/// Secret store backed by the platform keyring
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Create a new credential store
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Create a credential store with a custom service name
    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, CredentialError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Result<String, CredentialError> {
        let password = self.entry(key)?.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => CredentialError::NotFound(key.to_string()),
            other => CredentialError::from(other),
        })?;
        debug!("Retrieved password for {}", key);
        Ok(password)
    }

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError> {
        self.entry(key)?.set_password(secret)?;
        info!("Stored password for {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.entry(key)?.delete_credential().map_err(|e| match e {
            keyring::Error::NoEntry => CredentialError::NotFound(key.to_string()),
            other => CredentialError::from(other),
        })?;
        info!("Deleted password for {}", key);
        Ok(())
    }
}

/// In-process secret store, for embedding without a platform keyring
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, CredentialError> {
        self.secrets
            .lock()
            .map_err(|e| CredentialError::Keyring(format!("secret map poisoned: {}", e)))
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<String, CredentialError> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(key.to_string()))
    }

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError> {
        self.lock()?.insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.lock()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| CredentialError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemorySecretStore::new();
        assert_eq!(
            store.get("a@example.com"),
            Err(CredentialError::NotFound("a@example.com".into()))
        );

        store.set("a@example.com", "secret").unwrap();
        assert_eq!(store.get("a@example.com").unwrap(), "secret");

        store.delete("a@example.com").unwrap();
        assert!(store.get("a@example.com").is_err());
        assert!(matches!(
            store.delete("a@example.com"),
            Err(CredentialError::NotFound(_))
        ));
    }
}
