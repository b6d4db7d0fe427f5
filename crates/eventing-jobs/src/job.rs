//! Job definition and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Default number of attempts for a job.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Published when a job starts executing.
pub const TOPIC_JOB_STARTED: &str = "org/apache/sling/event/notification/job/START";
/// Published when a job finished successfully.
pub const TOPIC_JOB_FINISHED: &str = "org/apache/sling/event/notification/job/FINISHED";
/// Published when a job failed for the last time.
pub const TOPIC_JOB_FAILED: &str = "org/apache/sling/event/notification/job/FAILED";
/// Published when a job was cancelled.
pub const TOPIC_JOB_CANCELLED: &str = "org/apache/sling/event/notification/job/CANCELLED";

/// Notification property carrying the job topic.
pub const NOTIFICATION_PROPERTY_JOB_TOPIC: &str = "event.job.topic";
/// Notification property carrying the job id.
pub const NOTIFICATION_PROPERTY_JOB_ID: &str = "event.job.id";
/// Notification property carrying the retry count.
pub const NOTIFICATION_PROPERTY_RETRY_COUNT: &str = "event.job.retrycount";

/// Outcome reported by an executor, also the terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Ok,
    Failed,
    Cancelled,
}

impl JobResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects jobs for `find_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobQueryType {
    /// Every job, queued, active or finished.
    All,
    /// Jobs currently locked by a processor.
    Active,
    /// Jobs waiting to be processed.
    Queued,
    /// Finished jobs kept in history.
    History,
}

/// Identifies a job by topic and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub topic: String,
    pub id: String,
}

impl JobKey {
    pub fn new(topic: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.id)
    }
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Unique within the topic. Generated when the producer gave none.
    pub id: String,
    /// Whether `id` was generated.
    pub synthetic_id: bool,
    /// Slash-delimited topic, never empty.
    pub topic: String,
    pub properties: Map<String, Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Allow jobs of the same topic to run concurrently.
    pub parallel_allowed: bool,
    /// True while queued or executing; false once terminal.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal result, set together with `finished_at`.
    pub result: Option<JobResult>,
    /// Application id of the node that created the job.
    pub application_id: Option<String>,
}

impl Job {
    /// Create a job with a generated id.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            synthetic_id: true,
            topic: topic.into(),
            properties: Map::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            parallel_allowed: false,
            active: true,
            created_at: Utc::now(),
            finished_at: None,
            result: None,
            application_id: None,
        }
    }

    /// Use a caller-supplied id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.synthetic_id = false;
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel_allowed = parallel;
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.topic, &self.id)
    }

    /// Whether another attempt is allowed after the current one.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
