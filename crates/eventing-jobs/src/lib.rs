//! # Eventing Jobs
//!
//! Durable, cluster-coordinated job processing on top of a shared
//! [`DurableStore`](eventing_store::DurableStore).
//!
//! ## Architecture
//!
//! ```text
//!   submit ──► write-queue ──► writer loop ──► store node ──► dispatch-queue
//!                                                                   │
//!             ┌────────────────── background loop ◄─────────────────┘
//!             │   try_lock(node)
//!             ├──► named queue runner ──┐
//!             └──► topic-exclusive ─────┴──► worker pool ──► JobExecutor
//!                                                  │
//!                               retry / finish ◄───┘──► notifications
//! ```
//!
//! Every cluster member runs the same loops against the same store. The
//! node lock decides which member executes a job; a member that goes away
//! releases its locks and the others pick the jobs up.
//!
//! ## Key Components
//!
//! - [`JobCoordinator`]: submission, dispatch, retries, queries
//! - [`ScheduledJobCoordinator`]: cron, periodic and one-shot schedules
//! - [`PersistenceEngine`]: writer and background loops shared by both
//! - [`EventCodec`]: job ⇄ node property mapping
//! - [`JobExecutor`]: the processing seam for applications
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use eventing_config::Config;
//! use eventing_jobs::{Job, JobCoordinator, JobExecutor, JobResult, LocalEventBus};
//! use eventing_store::MemoryStore;
//!
//! struct Mailer;
//!
//! #[async_trait]
//! impl JobExecutor for Mailer {
//!     async fn process(&self, _job: &Job) -> JobResult {
//!         JobResult::Ok
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let bus = Arc::new(LocalEventBus::new());
//!     let coordinator = JobCoordinator::new(store, bus, &Config::default());
//!     coordinator.register_executor("mail/*", Arc::new(Mailer))?;
//!     coordinator.start().await?;
//!     coordinator.submit("mail/send", None, Default::default())?;
//!     coordinator.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
mod coordinator;
mod coordinator_dispatch;
mod coordinator_maintenance;
mod coordinator_queues;
mod engine;
mod error;
mod event_bus;
mod job;
mod processing;
mod queue;
mod registry;
mod schedule_info;
mod scheduled;
mod stats;
mod worker;

pub use codec::EventCodec;
pub use coordinator::JobCoordinator;
pub use engine::{EngineHandler, EventInfo, PersistenceEngine};
pub use error::{JobError, Result};
pub use event_bus::{Event, EventBus, EventSubscription, LocalEventBus};
pub use job::{
    DEFAULT_MAX_RETRIES, Job, JobKey, JobQueryType, JobResult, NOTIFICATION_PROPERTY_JOB_ID,
    NOTIFICATION_PROPERTY_JOB_TOPIC, NOTIFICATION_PROPERTY_RETRY_COUNT, TOPIC_JOB_CANCELLED, TOPIC_JOB_FAILED,
    TOPIC_JOB_FINISHED, TOPIC_JOB_STARTED,
};
pub use processing::ProcessingMap;
pub use queue::{ClaimedJob, JobBlockingQueue};
pub use registry::{ExecutorRegistry, JobExecutor};
pub use schedule_info::{
    PROPERTY_TIMED_DATE, PROPERTY_TIMED_PERIOD, PROPERTY_TIMED_SCHEDULE, ScheduleInfo, Trigger, event_properties,
};
pub use scheduled::ScheduledJobCoordinator;
pub use stats::{JobStatistics, StatisticsSnapshot};
pub use worker::WorkerPool;
