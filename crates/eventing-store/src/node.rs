//! Nodes, property values and queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::path;
use crate::store::SessionId;

/// A typed node property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

pub type NodeProperties = BTreeMap<String, PropertyValue>;

/// A snapshot of a stored node.
#[derive(Debug, Clone)]
pub struct Node {
    pub path: String,
    pub properties: NodeProperties,
    /// Session currently holding the node's lock, if any.
    pub lock_owner: Option<SessionId>,
    pub created: DateTime<Utc>,
}

impl Node {
    pub fn name(&self) -> &str {
        path::name(&self.path)
    }

    pub fn is_locked(&self) -> bool {
        self.lock_owner.is_some()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }
}

/// A single predicate over node properties.
#[derive(Debug, Clone)]
pub enum Condition {
    Equals(String, PropertyValue),
    Exists(String),
    NotExists(String),
    /// Date property strictly earlier than the given instant.
    Before(String, DateTime<Utc>),
}

impl Condition {
    pub fn matches(&self, properties: &NodeProperties) -> bool {
        match self {
            Self::Equals(name, value) => properties.get(name) == Some(value),
            Self::Exists(name) => properties.contains_key(name),
            Self::NotExists(name) => !properties.contains_key(name),
            Self::Before(name, instant) => properties
                .get(name)
                .and_then(PropertyValue::as_date)
                .is_some_and(|d| d < *instant),
        }
    }
}

/// Query over the descendants of a path.
///
/// Results are ordered by creation time, oldest first.
#[derive(Debug, Clone)]
pub struct NodeQuery {
    pub path: String,
    pub conditions: Vec<Condition>,
    /// Restrict to locked (`Some(true)`) or unlocked (`Some(false)`) nodes.
    pub locked: Option<bool>,
    pub limit: Option<usize>,
}

impl NodeQuery {
    pub fn descendants_of(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            conditions: Vec::new(),
            locked: None,
            limit: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn where_eq(self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.with_condition(Condition::Equals(name.into(), value.into()))
    }

    pub fn where_exists(self, name: impl Into<String>) -> Self {
        self.with_condition(Condition::Exists(name.into()))
    }

    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        if node.path == self.path || !path::is_within(&node.path, &self.path) {
            return false;
        }
        if let Some(locked) = self.locked {
            if node.is_locked() != locked {
                return false;
            }
        }
        self.conditions.iter().all(|c| c.matches(&node.properties))
    }
}
