//! # Eventing Store
//!
//! The durable store capability the job system coordinates through: a
//! hierarchical node tree with session-scoped advisory locks, a change
//! feed and a small property query language.
//!
//! [`MemoryStore`] is the in-process implementation shared by every
//! coordinator in a test or single-process cluster.

mod error;
mod memory;
mod node;
mod observation;
pub mod path;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use node::{Condition, Node, NodeProperties, NodeQuery, PropertyValue};
pub use observation::{ChangeEvent, ChangeKind, ChangeMask, ChangeSubscription};
pub use store::{DurableStore, LockToken, SessionId};
