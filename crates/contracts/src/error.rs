//! Layered error definitions
//!
//! Categorized by source: config / receiver / general

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Receiver Errors =====
    /// Receiver lifecycle error (create/start/configure)
    #[error("receiver error: {message}")]
    Receiver { message: String },

    /// Peer (input) setup error
    #[error("input '{url}' setup error: {message}")]
    PeerSetup { url: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create receiver error
    pub fn receiver(message: impl Into<String>) -> Self {
        Self::Receiver {
            message: message.into(),
        }
    }

    /// Create peer setup error
    pub fn peer_setup(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PeerSetup {
            url: url.into(),
            message: message.into(),
        }
    }
}
