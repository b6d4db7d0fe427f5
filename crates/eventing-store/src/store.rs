//! The durable store capability.

use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::node::{Node, NodeProperties, NodeQuery};
use crate::observation::{ChangeMask, ChangeSubscription};

/// Identifies a logged-in session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof of a held node lock, required to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub path: String,
    pub session: SessionId,
    pub token: Uuid,
}

/// Hierarchical durable store with session-scoped locks.
///
/// Locks are exclusive and owned by the session that took them. A lock
/// lives until it is unlocked, broken, or its session ends; the locks of a
/// session that vanished without logging out become acquirable again.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Open a new session.
    async fn login(&self) -> StoreResult<SessionId>;

    /// Close a session, releasing every lock it holds.
    async fn logout(&self, session: &SessionId) -> StoreResult<()>;

    /// Ensure `path` exists, creating intermediate container nodes.
    async fn create_path(&self, session: &SessionId, path: &str) -> StoreResult<()>;

    async fn get_node(&self, session: &SessionId, path: &str) -> StoreResult<Option<Node>>;

    /// Add a node below an existing parent.
    async fn add_node(
        &self,
        session: &SessionId,
        path: &str,
        properties: NodeProperties,
    ) -> StoreResult<Node>;

    /// Set and remove properties on a node not locked by another session.
    async fn set_properties(
        &self,
        session: &SessionId,
        path: &str,
        set: NodeProperties,
        remove: &[&str],
    ) -> StoreResult<()>;

    /// Remove a node and its subtree.
    async fn remove_node(&self, session: &SessionId, path: &str) -> StoreResult<()>;

    /// Try to take the exclusive lock on a node.
    ///
    /// Returns `Ok(None)` when another live session holds it.
    async fn try_lock(&self, session: &SessionId, path: &str) -> StoreResult<Option<LockToken>>;

    async fn unlock(&self, token: &LockToken) -> StoreResult<()>;

    /// Release whatever lock a node carries. Returns whether one was held.
    async fn break_lock(&self, session: &SessionId, path: &str) -> StoreResult<bool>;

    async fn query(&self, session: &SessionId, query: &NodeQuery) -> StoreResult<Vec<Node>>;

    /// Subscribe to changes at or below `prefix`.
    fn subscribe(&self, prefix: &str, mask: ChangeMask) -> ChangeSubscription;
}
