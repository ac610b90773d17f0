//! Error handling for the AIoD bridge
//!
//! This module provides a centralized error type covering ledger storage,
//! configuration loading, HTTP transport, and translation failures. Errors
//! that are fatal to a run (login, platform registration, ledger I/O)
//! propagate as `Err`; record-level failures are reported through the sync
//! ledger instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide result type
pub type AppResult<T> = Result<T, AppError>;

/// Main application error enum covering all error categories
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    // Ledger Errors
    #[error("Ledger operation failed: {message}")]
    Ledger { message: String },

    #[error("Ledger connection failed: {reason}")]
    LedgerConnection { reason: String },

    #[error("Unsupported ledger connection string: {connection_string}")]
    LedgerConnectionString { connection_string: String },

    // Configuration Errors
    #[error("Configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("Configuration file not found: {path}")]
    ConfigurationNotFound { path: String },

    #[error("Invalid format: {field} - expected {expected}, got {actual}")]
    InvalidFormat {
        field: String,
        expected: String,
        actual: String,
    },

    // File System Errors
    #[error("File operation failed: {path} - {reason}")]
    FileSystem { path: String, reason: String },

    // Network Errors
    #[error("Network request failed: {url} - {message}")]
    NetworkRequest { url: String, message: String },

    #[error("Connection timeout: {url}")]
    ConnectionTimeout { url: String },

    // Security Errors
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    // Translation Errors
    #[error("Translator error: {translator_type} - {reason}")]
    Translator {
        translator_type: String,
        reason: String,
    },

    // Generic Errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a ledger error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create a translator error
    pub fn translator(translator_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Translator {
            translator_type: translator_type.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Ledger { .. }
            | Self::LedgerConnection { .. }
            | Self::LedgerConnectionString { .. } => "ledger",

            Self::Configuration { .. }
            | Self::ConfigurationNotFound { .. }
            | Self::InvalidFormat { .. } => "configuration",

            Self::FileSystem { .. } => "filesystem",

            Self::NetworkRequest { .. } | Self::ConnectionTimeout { .. } => "network",

            Self::Authentication { .. } => "security",

            Self::Translator { .. } => "translation",

            Self::Internal { .. } => "system",
        }
    }

    /// Check if a failed record should be retried on the next run
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkRequest { .. } | Self::ConnectionTimeout { .. }
        )
    }
}

// Implement conversions from common error types
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => Self::Ledger {
                message: format!("SQLite error: {}", msg),
            },
            _ => Self::Ledger {
                message: err.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_timeout() {
            Self::ConnectionTimeout { url }
        } else {
            Self::NetworkRequest {
                url,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat {
            field: "json".to_string(),
            expected: "valid JSON".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for AppError {
    fn from(err: chrono::ParseError) -> Self {
        Self::InvalidFormat {
            field: "datetime".to_string(),
            expected: "valid datetime".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> Self {
        err.to_string()
    }
}
