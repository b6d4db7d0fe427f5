//! Job processing configuration types (jobs, scheduled jobs, named queues).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Store path under which job nodes are persisted.
    #[serde(default = "default_jobs_root")]
    pub root_path: String,

    /// Default maximum attempts for a job that does not set its own.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default delay before a failed job is dispatched again.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Backoff applied when a job's topic is already busy on this node.
    #[serde(default = "default_busy_requeue_delay_ms")]
    pub busy_requeue_delay_ms: u64,

    /// Delay before persisted jobs are reloaded after start.
    #[serde(default = "default_background_load_delay_ms")]
    pub background_load_delay_ms: u64,

    /// Size of the worker pool executing job bodies.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Finished jobs older than this are removed from history.
    #[serde(default = "default_cleanup_period_mins")]
    pub cleanup_period_mins: u64,

    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// How long `stop` waits for in-flight jobs.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_jobs_root() -> String {
    "/sling/jobs".to_string()
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_busy_requeue_delay_ms() -> u64 {
    20
}

fn default_background_load_delay_ms() -> u64 {
    30_000
}

fn default_max_workers() -> usize {
    35
}

fn default_cleanup_period_mins() -> u64 {
    10
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            root_path: default_jobs_root(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            busy_requeue_delay_ms: default_busy_requeue_delay_ms(),
            background_load_delay_ms: default_background_load_delay_ms(),
            max_workers: default_max_workers(),
            cleanup_period_mins: default_cleanup_period_mins(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl JobsConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn busy_requeue_delay(&self) -> Duration {
        Duration::from_millis(self.busy_requeue_delay_ms)
    }

    pub fn background_load_delay(&self) -> Duration {
        Duration::from_millis(self.background_load_delay_ms)
    }

    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_period_mins * 60)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Scheduled (timed) job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledConfig {
    #[serde(default = "default_scheduled_root")]
    pub root_path: String,
}

fn default_scheduled_root() -> String {
    "/sling/events".to_string()
}

impl Default for ScheduledConfig {
    fn default() -> Self {
        Self {
            root_path: default_scheduled_root(),
        }
    }
}

/// How a named queue runs the jobs routed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// One job at a time, in order.
    Ordered,
    /// Up to `max_parallel` jobs at once.
    Unordered,
    /// Like unordered, rotating between topics on take.
    TopicRoundRobin,
    /// Reject jobs instead of queueing them.
    Drop,
}

/// A named job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,

    /// Glob patterns of the topics routed to this queue.
    #[serde(default)]
    pub topics: Vec<String>,

    pub queue_type: QueueType,

    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Overrides the job's own retry count when set.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Overrides the job's own retry delay when set.
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

fn default_max_parallel() -> usize {
    1
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, queue_type: QueueType) -> Self {
        Self {
            name: name.into(),
            topics: Vec::new(),
            queue_type,
            max_parallel: default_max_parallel(),
            max_retries: None,
            retry_delay_ms: None,
        }
    }

    pub fn with_topic(mut self, pattern: impl Into<String>) -> Self {
        self.topics.push(pattern.into());
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }
}
