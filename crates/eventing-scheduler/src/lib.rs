//! # Eventing Scheduler
//!
//! The scheduler capability used by timed jobs: named jobs fired by a cron
//! expression, a fixed period, or once at an instant. Schedules live only in
//! memory; callers that need them to survive a restart persist them
//! elsewhere and register them again on start.

mod error;
mod scheduler;
mod tokio_scheduler;

pub use error::SchedulerError;
pub use scheduler::{ScheduleConfig, ScheduleContext, ScheduleKind, ScheduledTask, Scheduler};
pub use tokio_scheduler::TokioScheduler;
