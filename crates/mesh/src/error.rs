//! Error types for Convoy peer links.

use thiserror::Error;

use crate::link::LinkId;

/// Errors that can occur while managing peer links.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Address is empty after normalization
    #[error("Invalid peer host: {0:?}")]
    InvalidHost(String),

    /// Peer not found
    #[error("Peer not found: {host}")]
    PeerNotFound { host: String },

    /// Connect or socket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Link task is gone
    #[error("Link closed: {0}")]
    LinkClosed(LinkId),
}

impl From<tokio_tungstenite::tungstenite::Error> for MeshError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MeshError::Transport(err.to_string())
    }
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
