//! Unified error types for the monitoring engine
//!
//! This module defines error types that:
//! - Are serializable so a presentation layer can show them
//! - Separate per-cycle failures (connection, folder) from fatal ones (config)
//! - Map collaborator errors (keyring, filesystem, parsers) to one enum

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::CredentialError;

/// Error type shared by the monitor core and its adapters
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MonitorError {
    /// Whether the error ends the whole poll cycle rather than a single folder
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            MonitorError::Connection(_)
                | MonitorError::Auth(_)
                | MonitorError::Credential(_)
                | MonitorError::Timeout(_)
                | MonitorError::Cancelled
        )
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(err: toml::de::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MonitorError {
    fn from(err: toml::ser::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Parse(err.to_string())
    }
}

impl From<CredentialError> for MonitorError {
    fn from(err: CredentialError) -> Self {
        MonitorError::Credential(err.to_string())
    }
}

/// Result type alias using MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;
