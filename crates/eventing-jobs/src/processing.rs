//! Topics currently executing exclusively on this coordinator.

use parking_lot::Mutex;
use std::collections::HashSet;

/// Local bookkeeping of busy topics.
///
/// Owned by one coordinator and cleared when it stops. Cluster-wide
/// exclusivity comes from store locks, not from this map.
#[derive(Debug, Default)]
pub struct ProcessingMap {
    busy: Mutex<HashSet<String>>,
}

impl ProcessingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a topic busy. Returns false if it already was.
    pub fn try_acquire(&self, topic: &str) -> bool {
        self.busy.lock().insert(topic.to_string())
    }

    pub fn release(&self, topic: &str) {
        self.busy.lock().remove(topic);
    }

    pub fn is_busy(&self, topic: &str) -> bool {
        self.busy.lock().contains(topic)
    }

    pub fn clear(&self) {
        self.busy.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.busy.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.busy.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_exclusive_per_topic() {
        let map = ProcessingMap::new();
        assert!(map.try_acquire("a"));
        assert!(!map.try_acquire("a"));
        assert!(map.try_acquire("b"));
        assert!(map.is_busy("a"));

        map.release("a");
        assert!(!map.is_busy("a"));
        assert!(map.try_acquire("a"));
    }

    #[test]
    fn test_clear() {
        let map = ProcessingMap::new();
        map.try_acquire("a");
        map.try_acquire("b");
        assert_eq!(map.len(), 2);
        map.clear();
        assert!(map.is_empty());
    }
}
