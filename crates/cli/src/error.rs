//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Neither a config file nor inputs were given
    #[error("No configuration: pass --config or at least one --input")]
    NoConfigSource,

    /// Configuration load or validation error
    #[error(transparent)]
    Config(#[from] contracts::ContractError),

    /// Supervisor failure
    #[error(transparent)]
    Flow(#[from] flow::FlowError),

    /// Signal handler could not be installed
    #[error("Failed to install {signal} handler: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn signal(signal: &'static str, source: std::io::Error) -> Self {
        Self::Signal { signal, source }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
