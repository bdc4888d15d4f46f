//! Formation errors
//!
//! Transport, protocol and validation problems never surface here; they are
//! logged and absorbed. These errors report operator requests that cannot be
//! honored in the current state.

use convoy_mesh::MeshError;
use thiserror::Error;

/// Formation coordination errors
#[derive(Debug, Error)]
pub enum FormationError {
    /// No invite is being shown
    #[error("No pending invite")]
    NoPendingInvite,

    /// No join request is latched
    #[error("No pending join request")]
    NoPendingRequest,

    /// Operation requires the leader role
    #[error("Local node is not the group leader")]
    NotLeader,

    /// The runtime task has exited
    #[error("Fleet runtime stopped")]
    RuntimeStopped,

    /// Peer management failure
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

/// Result type for formation operations.
pub type FormationResult<T> = Result<T, FormationError>;
