//! Fan-out error types

use thiserror::Error;

/// Output setup errors
#[derive(Debug, Error)]
pub enum FanoutError {
    /// Output could not be created
    #[error("failed to set up output '{url}': {message}")]
    OutputSetup { url: String, message: String },

    /// URL scheme without an output implementation
    #[error("output url scheme '{0}' not implemented")]
    UnsupportedScheme(String),

    /// Missing or malformed URL parameter
    #[error("invalid parameter '{name}' in '{url}': {message}")]
    InvalidParam {
        url: String,
        name: String,
        message: String,
    },

    /// Contract error
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FanoutError {
    /// Create an output setup error
    pub fn output_setup(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputSetup {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(
        url: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParam {
            url: url.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}
