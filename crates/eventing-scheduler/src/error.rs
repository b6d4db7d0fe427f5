//! Scheduler errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidExpression { expr: String, message: String },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// No job is registered under the name.
    #[error("No such scheduled job: {0}")]
    NoSuchJob(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),
}
