//! Store errors.

use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The session was logged out or never existed.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A node or its parent does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// A node already exists at the path.
    #[error("Item exists: {0}")]
    ItemExists(String),

    /// The node is locked by another session.
    #[error("Node is locked: {0}")]
    Locked(String),

    /// The lock token does not match the node's current lock.
    #[error("Not lock owner: {0}")]
    NotLockOwner(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
