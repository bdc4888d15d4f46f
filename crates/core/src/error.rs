//! Core error types

use thiserror::Error;

/// Core error type for Convoy
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
