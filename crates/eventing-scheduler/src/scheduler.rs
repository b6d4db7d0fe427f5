//! Scheduler traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SchedulerError;

/// Free-form configuration handed back to a task when it fires.
pub type ScheduleConfig = serde_json::Map<String, serde_json::Value>;

/// Passed to a [`ScheduledTask`] on every firing.
#[derive(Debug, Clone)]
pub struct ScheduleContext {
    pub name: String,
    pub config: ScheduleConfig,
    pub fired_at: DateTime<Utc>,
    /// One-based count of firings for this registration.
    pub fire_count: u64,
}

/// Work run by the scheduler.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn execute(&self, ctx: ScheduleContext);
}

/// How a registered job fires.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleKind {
    Cron(String),
    Periodic(Duration),
    Once(DateTime<Utc>),
}

/// A named-job scheduler.
///
/// Registering a name that already exists replaces the earlier job.
pub trait Scheduler: Send + Sync {
    /// Fire `task` on every match of a cron expression
    /// (`sec min hour day-of-month month day-of-week [year]`).
    fn add_job(
        &self,
        name: &str,
        task: Arc<dyn ScheduledTask>,
        config: ScheduleConfig,
        cron_expr: &str,
    ) -> Result<(), SchedulerError>;

    /// Fire `task` every `period`, first after one period.
    fn add_periodic_job(
        &self,
        name: &str,
        task: Arc<dyn ScheduledTask>,
        config: ScheduleConfig,
        period: Duration,
    ) -> Result<(), SchedulerError>;

    /// Fire `task` once at `at`, immediately if `at` is past. Returns the job name,
    /// generated when `name` is `None`.
    fn fire_job_at(
        &self,
        name: Option<&str>,
        task: Arc<dyn ScheduledTask>,
        config: ScheduleConfig,
        at: DateTime<Utc>,
    ) -> Result<String, SchedulerError>;

    fn remove_job(&self, name: &str) -> Result<(), SchedulerError>;

    fn schedule_of(&self, name: &str) -> Option<ScheduleKind>;

    fn job_names(&self) -> Vec<String>;
}
