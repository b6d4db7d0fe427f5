//! In-memory store shared by every session of a process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::node::{Node, NodeProperties, NodeQuery};
use crate::observation::{ChangeEvent, ChangeKind, ChangeMask, ChangeSubscription};
use crate::path;
use crate::store::{DurableStore, LockToken, SessionId};

const CHANGE_CHANNEL_CAPACITY: usize = 4096;

struct NodeEntry {
    properties: NodeProperties,
    lock: Option<LockToken>,
    created: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    nodes: BTreeMap<String, NodeEntry>,
    sessions: HashSet<SessionId>,
}

impl StoreState {
    fn check_session(&self, session: &SessionId) -> StoreResult<()> {
        if self.sessions.contains(session) {
            Ok(())
        } else {
            Err(StoreError::SessionClosed(session.to_string()))
        }
    }

    /// The lock on a node if its owning session is still alive.
    fn live_lock<'a>(&self, entry: &'a NodeEntry) -> Option<&'a LockToken> {
        entry
            .lock
            .as_ref()
            .filter(|lock| self.sessions.contains(&lock.session))
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn snapshot(&self, path: &str, entry: &NodeEntry) -> Node {
        Node {
            path: path.to_string(),
            properties: entry.properties.clone(),
            lock_owner: self.live_lock(entry).map(|l| l.session),
            created: entry.created,
        }
    }

    fn ensure_writable(&self, session: &SessionId, path: &str) -> StoreResult<()> {
        let entry = self
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;
        match self.live_lock(entry) {
            Some(lock) if lock.session != *session => Err(StoreError::Locked(path.to_string())),
            _ => Ok(()),
        }
    }
}

/// In-memory [`DurableStore`].
///
/// Every coordinator of a single-process cluster shares one instance; each
/// opens its own sessions, so lock ownership behaves as it would across
/// processes.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    changes: broadcast::Sender<ChangeEvent>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            changes,
            available: AtomicBool::new(true),
        }
    }

    /// Make subsequent logins fail, as if the store could not be reached.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// End a session without releasing its locks or emitting events,
    /// the way a crashed cluster member disappears.
    pub fn crash_session(&self, session: &SessionId) {
        self.state.write().sessions.remove(session);
        debug!("Session {} crashed", session);
    }

    /// Number of nodes currently stored.
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // no subscribers is fine
            let _ = self.changes.send(event);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn change(kind: ChangeKind, path: &str, property: Option<&str>, session: SessionId) -> ChangeEvent {
    ChangeEvent {
        kind,
        path: path.to_string(),
        property: property.map(str::to_string),
        session,
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn login(&self) -> StoreResult<SessionId> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        let session = SessionId::new();
        self.state.write().sessions.insert(session);
        debug!("Session {} opened", session);
        Ok(session)
    }

    async fn logout(&self, session: &SessionId) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            if !state.sessions.remove(session) {
                return Ok(());
            }
            for (path, entry) in state.nodes.iter_mut() {
                if entry.lock.as_ref().is_some_and(|l| l.session == *session) {
                    entry.lock = None;
                    events.push(change(ChangeKind::LockReleased, path, None, *session));
                }
            }
        }
        debug!("Session {} closed, released {} locks", session, events.len());
        self.emit(events);
        Ok(())
    }

    async fn create_path(&self, session: &SessionId, path: &str) -> StoreResult<()> {
        path::validate(path)?;
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            state.check_session(session)?;

            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                if !state.nodes.contains_key(&current) {
                    state.nodes.insert(
                        current.clone(),
                        NodeEntry {
                            properties: NodeProperties::new(),
                            lock: None,
                            created: Utc::now(),
                        },
                    );
                    events.push(change(ChangeKind::NodeAdded, &current, None, *session));
                }
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn get_node(&self, session: &SessionId, path: &str) -> StoreResult<Option<Node>> {
        let state = self.state.read();
        state.check_session(session)?;
        Ok(state.nodes.get(path).map(|entry| state.snapshot(path, entry)))
    }

    async fn add_node(
        &self,
        session: &SessionId,
        path: &str,
        properties: NodeProperties,
    ) -> StoreResult<Node> {
        path::validate(path)?;
        let node = {
            let mut state = self.state.write();
            state.check_session(session)?;

            if state.exists(path) {
                return Err(StoreError::ItemExists(path.to_string()));
            }
            let parent = path::parent(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
            if !state.exists(parent) {
                return Err(StoreError::PathNotFound(parent.to_string()));
            }

            let entry = NodeEntry {
                properties,
                lock: None,
                created: Utc::now(),
            };
            let node = state.snapshot(path, &entry);
            state.nodes.insert(path.to_string(), entry);
            node
        };
        self.emit(vec![change(ChangeKind::NodeAdded, path, None, *session)]);
        Ok(node)
    }

    async fn set_properties(
        &self,
        session: &SessionId,
        path: &str,
        set: NodeProperties,
        remove: &[&str],
    ) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            state.check_session(session)?;
            state.ensure_writable(session, path)?;

            let Some(entry) = state.nodes.get_mut(path) else {
                return Err(StoreError::PathNotFound(path.to_string()));
            };
            for (name, value) in set {
                events.push(change(ChangeKind::PropertyChanged, path, Some(name.as_str()), *session));
                entry.properties.insert(name, value);
            }
            for name in remove {
                if entry.properties.remove(*name).is_some() {
                    events.push(change(ChangeKind::PropertyRemoved, path, Some(*name), *session));
                }
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn remove_node(&self, session: &SessionId, path: &str) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            state.check_session(session)?;
            state.ensure_writable(session, path)?;

            let subtree: Vec<String> = state
                .nodes
                .range(path.to_string()..)
                .map(|(p, _)| p)
                .take_while(|p| p.starts_with(path))
                .filter(|p| path::is_within(p, path))
                .cloned()
                .collect();
            for removed in subtree {
                state.nodes.remove(&removed);
                events.push(change(ChangeKind::NodeRemoved, &removed, None, *session));
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn try_lock(&self, session: &SessionId, path: &str) -> StoreResult<Option<LockToken>> {
        let mut state = self.state.write();
        state.check_session(session)?;

        let entry = state
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;
        if state.live_lock(entry).is_some() {
            return Ok(None);
        }

        let token = LockToken {
            path: path.to_string(),
            session: *session,
            token: Uuid::new_v4(),
        };
        if let Some(entry) = state.nodes.get_mut(path) {
            entry.lock = Some(token.clone());
        }
        Ok(Some(token))
    }

    async fn unlock(&self, token: &LockToken) -> StoreResult<()> {
        {
            let mut state = self.state.write();
            state.check_session(&token.session)?;

            let entry = state
                .nodes
                .get_mut(&token.path)
                .ok_or_else(|| StoreError::PathNotFound(token.path.clone()))?;
            if entry.lock.as_ref() != Some(token) {
                return Err(StoreError::NotLockOwner(token.path.clone()));
            }
            entry.lock = None;
        }
        self.emit(vec![change(ChangeKind::LockReleased, &token.path, None, token.session)]);
        Ok(())
    }

    async fn break_lock(&self, session: &SessionId, path: &str) -> StoreResult<bool> {
        let released = {
            let mut state = self.state.write();
            state.check_session(session)?;

            let entry = state
                .nodes
                .get_mut(path)
                .ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;
            entry.lock.take().is_some()
        };
        if released {
            self.emit(vec![change(ChangeKind::LockReleased, path, None, *session)]);
        }
        Ok(released)
    }

    async fn query(&self, session: &SessionId, query: &NodeQuery) -> StoreResult<Vec<Node>> {
        let state = self.state.read();
        state.check_session(session)?;

        let mut nodes: Vec<Node> = state
            .nodes
            .iter()
            .filter(|(p, _)| path::is_within(p, &query.path))
            .map(|(p, entry)| state.snapshot(p, entry))
            .filter(|node| query.matches(node))
            .collect();
        nodes.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
        if let Some(limit) = query.limit {
            nodes.truncate(limit);
        }
        Ok(nodes)
    }

    fn subscribe(&self, prefix: &str, mask: ChangeMask) -> ChangeSubscription {
        ChangeSubscription::new(self.changes.subscribe(), prefix, mask)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
