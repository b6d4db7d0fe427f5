//! Executor registry mapping topic patterns to job executors.

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::error::{JobError, Result};
use crate::job::{Job, JobResult};

/// Processes jobs of the topics it is registered for.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn process(&self, job: &Job) -> JobResult;
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

struct Registration {
    pattern: String,
    matcher: Pattern,
    executor: Arc<dyn JobExecutor>,
}

/// Resolves the executor for a topic.
///
/// An exact pattern wins; otherwise the longest matching glob does.
/// `*` does not cross `/`.
#[derive(Default)]
pub struct ExecutorRegistry {
    entries: RwLock<Vec<Registration>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any earlier one for the same pattern.
    pub fn register(&self, pattern: &str, executor: Arc<dyn JobExecutor>) -> Result<()> {
        let matcher = Pattern::new(pattern)
            .map_err(|e| JobError::InvalidTopic(format!("{}: {}", pattern, e)))?;

        let mut entries = self.entries.write();
        entries.retain(|r| r.pattern != pattern);
        entries.push(Registration {
            pattern: pattern.to_string(),
            matcher,
            executor,
        });
        debug!("Executor registered for {}", pattern);
        Ok(())
    }

    pub fn unregister(&self, pattern: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|r| r.pattern != pattern);
        entries.len() != before
    }

    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn JobExecutor>> {
        let entries = self.entries.read();
        if let Some(exact) = entries.iter().find(|r| r.pattern == topic) {
            return Some(exact.executor.clone());
        }
        entries
            .iter()
            .filter(|r| r.matcher.matches_with(topic, MATCH_OPTIONS))
            .max_by_key(|r| r.pattern.len())
            .map(|r| r.executor.clone())
    }

    pub fn has_executor(&self, topic: &str) -> bool {
        self.resolve(topic).is_some()
    }

    /// Whether `pattern` would route `topic` to its executor.
    pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
        pattern == topic
            || Pattern::new(pattern).is_ok_and(|p| p.matches_with(topic, MATCH_OPTIONS))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(JobResult);

    #[async_trait]
    impl JobExecutor for Fixed {
        async fn process(&self, _job: &Job) -> JobResult {
            self.0
        }
    }

    async fn resolved(registry: &ExecutorRegistry, topic: &str) -> Option<JobResult> {
        match registry.resolve(topic) {
            Some(executor) => Some(executor.process(&Job::new(topic)).await),
            None => None,
        }
    }

    #[tokio::test]
    async fn test_exact_match_wins() {
        let registry = ExecutorRegistry::new();
        registry.register("org/*", Arc::new(Fixed(JobResult::Failed))).unwrap();
        registry.register("org/shop", Arc::new(Fixed(JobResult::Ok))).unwrap();

        assert_eq!(resolved(&registry, "org/shop").await, Some(JobResult::Ok));
        assert_eq!(resolved(&registry, "org/mail").await, Some(JobResult::Failed));
    }

    #[tokio::test]
    async fn test_longest_pattern_wins() {
        let registry = ExecutorRegistry::new();
        registry.register("org/*/*", Arc::new(Fixed(JobResult::Failed))).unwrap();
        registry.register("org/shop/*", Arc::new(Fixed(JobResult::Cancelled))).unwrap();

        assert_eq!(resolved(&registry, "org/shop/order").await, Some(JobResult::Cancelled));
        assert_eq!(resolved(&registry, "org/mail/out").await, Some(JobResult::Failed));
    }

    #[tokio::test]
    async fn test_star_does_not_cross_separator() {
        let registry = ExecutorRegistry::new();
        registry.register("org/*", Arc::new(Fixed(JobResult::Ok))).unwrap();

        assert!(registry.has_executor("org/shop"));
        assert!(!registry.has_executor("org/shop/order"));
        assert!(!registry.has_executor("other"));
    }

    #[test]
    fn test_register_replaces_and_unregister() {
        let registry = ExecutorRegistry::new();
        registry.register("t", Arc::new(Fixed(JobResult::Ok))).unwrap();
        registry.register("t", Arc::new(Fixed(JobResult::Failed))).unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("t"));
        assert!(!registry.unregister("t"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let registry = ExecutorRegistry::new();
        let result = registry.register("a/[", Arc::new(Fixed(JobResult::Ok)));
        assert!(matches!(result, Err(JobError::InvalidTopic(_))));
    }
}
