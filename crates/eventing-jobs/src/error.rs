//! Job system errors.

use eventing_store::StoreError;
use thiserror::Error;

/// Job error types.
#[derive(Debug, Error)]
pub enum JobError {
    /// Topic is empty or malformed.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// The topic is routed to a queue that discards jobs.
    #[error("Job dropped by queue configuration: {0}")]
    Dropped(String),

    /// A scheduled-job request is malformed. Never persisted.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A store session could not be opened at start.
    #[error("Cannot open store session: {0}")]
    FatalSession(String),

    /// Transient store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A persisted node could not be decoded into a job.
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] eventing_scheduler::SchedulerError),

    /// The coordinator is not running.
    #[error("Coordinator is shut down")]
    Shutdown,

    #[error("Coordinator already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_conversion() {
        let err: JobError = StoreError::Locked("/sling/jobs/a".to_string()).into();
        assert!(matches!(err, JobError::Store(_)));
        assert!(err.to_string().contains("/sling/jobs/a"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            JobError::Dropped("mail/out".to_string()).to_string(),
            "Job dropped by queue configuration: mail/out"
        );
        assert!(JobError::InvalidSchedule("two triggers".to_string())
            .to_string()
            .contains("two triggers"));
    }
}
