//! Change feed types.

use std::ops::BitOr;
use tokio::sync::broadcast;
use tracing::warn;

use crate::path;
use crate::store::SessionId;

/// Kind of change reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    NodeAdded,
    NodeRemoved,
    PropertyChanged,
    PropertyRemoved,
    LockReleased,
}

/// Bit mask selecting change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeMask(u32);

impl ChangeMask {
    pub const NODE_ADDED: Self = Self(1);
    pub const NODE_REMOVED: Self = Self(1 << 1);
    pub const PROPERTY_CHANGED: Self = Self(1 << 2);
    pub const PROPERTY_REMOVED: Self = Self(1 << 3);
    pub const LOCK_RELEASED: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);

    pub fn contains(self, kind: ChangeKind) -> bool {
        let bit = match kind {
            ChangeKind::NodeAdded => Self::NODE_ADDED,
            ChangeKind::NodeRemoved => Self::NODE_REMOVED,
            ChangeKind::PropertyChanged => Self::PROPERTY_CHANGED,
            ChangeKind::PropertyRemoved => Self::PROPERTY_REMOVED,
            ChangeKind::LockReleased => Self::LOCK_RELEASED,
        };
        self.0 & bit.0 != 0
    }
}

impl BitOr for ChangeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A single change notification.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: String,
    /// Property name for property changes.
    pub property: Option<String>,
    /// Session that caused the change.
    pub session: SessionId,
}

/// Receiving half of a change feed, filtered by path prefix and mask.
pub struct ChangeSubscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    prefix: String,
    mask: ChangeMask,
}

impl ChangeSubscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<ChangeEvent>,
        prefix: impl Into<String>,
        mask: ChangeMask,
    ) -> Self {
        Self {
            receiver,
            prefix: prefix.into(),
            mask,
        }
    }

    /// Wait for the next matching change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.mask.contains(event.kind) && path::is_within(&event.path, &self.prefix) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Change subscription on {} lagged, skipped {} events", self.prefix, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
