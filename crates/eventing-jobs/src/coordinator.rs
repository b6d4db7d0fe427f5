//! Cluster-wide job coordinator.
//!
//! Jobs are persisted under the jobs root by the writer loop of a
//! [`PersistenceEngine`], then claimed through a node lock by whichever
//! cluster member's background loop gets there first. Claimed jobs run on
//! the worker pool, either directly (with per-topic exclusivity) or through
//! a named queue.
//!
//! The implementation is split across files:
//! - `coordinator.rs`: construction, public API, lifecycle
//! - `coordinator_dispatch.rs`: claiming, execution and completion
//! - `coordinator_queues.rs`: named queue runners
//! - `coordinator_maintenance.rs`: change feed, recovery and cleanup

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use eventing_config::{Config, JobsConfig, QueueConfig, QueueType};
use eventing_store::{ChangeMask, DurableStore, Node, NodeQuery, StoreError};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{EventCodec, PROPERTY_ACTIVE, PROPERTY_ID, PROPERTY_TOPIC};
use crate::coordinator_queues::QueueHandle;
use crate::engine::PersistenceEngine;
use crate::error::{JobError, Result};
use crate::event_bus::{Event, EventBus};
use crate::job::{
    Job, JobKey, JobQueryType, NOTIFICATION_PROPERTY_JOB_ID, NOTIFICATION_PROPERTY_JOB_TOPIC,
    NOTIFICATION_PROPERTY_RETRY_COUNT, TOPIC_JOB_CANCELLED,
};
use crate::processing::ProcessingMap;
use crate::registry::{ExecutorRegistry, JobExecutor};
use crate::stats::{JobStatistics, StatisticsSnapshot};
use crate::worker::WorkerPool;

/// Poll interval of [`JobCoordinator::force_cancel`].
const FORCE_CANCEL_POLL: Duration = Duration::from_millis(50);

/// Coordinates job execution for one cluster member.
pub struct JobCoordinator {
    pub(crate) engine: PersistenceEngine,
    pub(crate) config: JobsConfig,
    pub(crate) queue_configs: Vec<QueueConfig>,
    pub(crate) registry: ExecutorRegistry,
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) processing: ProcessingMap,
    pub(crate) workers: WorkerPool,
    pub(crate) stats: JobStatistics,
    /// Persisted paths waiting to be claimed here.
    pub(crate) waiting: DashMap<String, ()>,
    /// Paths locked by this member, queued in a named queue or executing.
    pub(crate) claimed: DashMap<String, ()>,
    /// Active jobs without an executor, by path. Value is the topic.
    pub(crate) unloaded: DashMap<String, String>,
    pub(crate) queues: DashMap<String, QueueHandle>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl JobCoordinator {
    pub fn new(store: Arc<dyn DurableStore>, bus: Arc<dyn EventBus>, config: &Config) -> Arc<Self> {
        let engine = PersistenceEngine::new(store, &config.jobs.root_path, &config.node.application_id);
        Arc::new(Self {
            engine,
            config: config.jobs.clone(),
            queue_configs: config.queues.clone(),
            registry: ExecutorRegistry::new(),
            bus,
            processing: ProcessingMap::new(),
            workers: WorkerPool::new(config.jobs.max_workers),
            stats: JobStatistics::new(),
            waiting: DashMap::new(),
            claimed: DashMap::new(),
            unloaded: DashMap::new(),
            queues: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn application_id(&self) -> &str {
        self.engine.application_id()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub(crate) fn store(&self) -> &Arc<dyn DurableStore> {
        self.engine.store()
    }

    /// Open the store sessions and start the loops, the change listener,
    /// startup recovery and periodic maintenance.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyStarted);
        }
        self.engine.start(self.clone()).await?;

        let changes = self
            .store()
            .subscribe(self.engine.root_path(), ChangeMask::LOCK_RELEASED);
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(self.clone().watch_changes(changes)));
        tasks.push(tokio::spawn(self.clone().recover_after(self.config.background_load_delay())));
        tasks.push(tokio::spawn(self.clone().maintenance_loop()));
        drop(tasks);

        info!(
            "Job coordinator {} started with {} workers",
            self.application_id(),
            self.workers.max_workers()
        );
        Ok(())
    }

    /// Stop accepting work, wait for running jobs up to the shutdown
    /// timeout and release every lock this member holds. Idempotent.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping job coordinator {}", self.application_id());

        self.shutdown.cancel();
        self.engine.shutdown().await;

        let handles: Vec<QueueHandle> = self.queues.iter().map(|e| e.value().clone()).collect();
        self.queues.clear();
        for handle in handles {
            for leftover in handle.queue.set_finished() {
                self.release_claimed(leftover).await;
            }
        }

        if !self.workers.drain(self.config.shutdown_timeout()).await {
            warn!(
                "Jobs still running after {:?}, their locks are released with the session",
                self.config.shutdown_timeout()
            );
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }

        self.processing.clear();
        self.waiting.clear();
        self.claimed.clear();
        self.unloaded.clear();
        self.engine.close_sessions().await;
        info!("Job coordinator {} stopped", self.application_id());
    }

    /// Submit a job with the configured retry defaults.
    ///
    /// Returns as soon as the job is queued for persistence.
    pub fn submit(&self, topic: &str, id: Option<&str>, properties: Map<String, Value>) -> Result<Job> {
        let mut job = Job::new(topic)
            .with_properties(properties)
            .with_max_retries(self.config.max_retries)
            .with_retry_delay(self.config.retry_delay());
        if let Some(id) = id {
            job = job.with_id(id);
        }
        self.submit_job(job)
    }

    /// Submit a fully built job. Queue-level retry settings win over the job's.
    pub fn submit_job(&self, mut job: Job) -> Result<Job> {
        validate_topic(&job.topic)?;

        if let Some(queue) = self.queue_config_for(&job.topic) {
            if queue.queue_type == QueueType::Drop {
                debug!("Dropping job {} routed to queue {}", job.key(), queue.name);
                return Err(JobError::Dropped(job.topic));
            }
            if let Some(max) = queue.max_retries {
                job.max_retries = max;
            }
            if let Some(delay) = queue.retry_delay() {
                job.retry_delay = delay;
            }
        }

        job.active = true;
        job.application_id = Some(self.application_id().to_string());
        self.engine.submit(job.clone())?;
        debug!("Submitted job {}", job.key());
        Ok(job)
    }

    /// Remove a job that is not currently running.
    ///
    /// Returns false if the job is locked or does not exist.
    pub async fn cancel(&self, key: &JobKey) -> Result<bool> {
        let session = self.engine.background_session()?;
        let Some(node) = self.find_node(key).await? else {
            return Ok(false);
        };
        if node.is_locked() {
            return Ok(false);
        }
        let job = EventCodec::decode(&node)?;

        match self.store().remove_node(&session, &node.path).await {
            Ok(()) => {}
            Err(StoreError::Locked(_)) | Err(StoreError::PathNotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.waiting.remove(&node.path);
        self.unloaded.remove(&node.path);

        if job.active {
            self.stats.record_cancelled();
        }
        self.bus.publish(notification(TOPIC_JOB_CANCELLED, &job));
        info!("Cancelled job {}", key);
        Ok(true)
    }

    /// Cancel a job, waiting for a running execution to let go of it first.
    pub async fn force_cancel(&self, key: &JobKey) -> Result<()> {
        loop {
            if self.cancel(key).await? || self.find_node(key).await?.is_none() {
                return Ok(());
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(JobError::Shutdown),
                _ = tokio::time::sleep(FORCE_CANCEL_POLL) => {}
            }
        }
    }

    /// Query jobs by state, topic and exact-match property filters.
    ///
    /// Jobs still waiting to be written count as queued.
    pub async fn find_jobs(
        &self,
        query_type: JobQueryType,
        topic: Option<&str>,
        limit: Option<usize>,
        filters: &Map<String, Value>,
    ) -> Result<Vec<Job>> {
        let session = self.engine.background_session()?;

        let mut query = NodeQuery::descendants_of(self.engine.root_path()).where_exists(PROPERTY_TOPIC);
        if let Some(topic) = topic {
            query = query.where_eq(PROPERTY_TOPIC, topic);
        }
        query = match query_type {
            JobQueryType::All => query,
            JobQueryType::Active => query.where_eq(PROPERTY_ACTIVE, true).locked(true),
            JobQueryType::Queued => query.where_eq(PROPERTY_ACTIVE, true).locked(false),
            JobQueryType::History => query.where_eq(PROPERTY_ACTIVE, false),
        };

        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for node in self.store().query(&session, &query).await? {
            match EventCodec::decode(&node) {
                Ok(job) => {
                    if matches_filters(&job, filters) && seen.insert(job.key()) {
                        jobs.push(job);
                    }
                }
                Err(e) => warn!("Skipping undecodable job at {}: {}", node.path, e),
            }
        }

        if matches!(query_type, JobQueryType::All | JobQueryType::Queued) {
            for job in self.engine.pending_jobs() {
                if topic.is_some_and(|t| t != job.topic) || !matches_filters(&job, filters) {
                    continue;
                }
                if seen.insert(job.key()) {
                    jobs.push(job);
                }
            }
        }

        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        let in_queues: usize = self.queues.iter().map(|e| e.value().queue.len()).sum();
        let queued = self.engine.pending_count() + self.waiting.len() + in_queues;
        let active = self.claimed.len().saturating_sub(in_queues);
        self.stats.snapshot(queued as u64, active as u64)
    }

    /// Register an executor for a topic or glob pattern.
    ///
    /// Jobs previously left unloaded for want of an executor are
    /// dispatched again if the pattern covers them.
    pub fn register_executor(self: &Arc<Self>, pattern: &str, executor: Arc<dyn JobExecutor>) -> Result<()> {
        self.registry.register(pattern, executor)?;
        info!("Registered executor for {}", pattern);
        if self.engine.is_running() {
            self.reload_unloaded(pattern);
        }
        Ok(())
    }

    pub fn unregister_executor(&self, pattern: &str) -> bool {
        self.registry.unregister(pattern)
    }

    /// Cut short the retry sleep of a named queue.
    ///
    /// Returns false for an unknown queue or one that is not sleeping.
    pub fn wake_up_queue(&self, name: &str) -> bool {
        match self.queues.get(name) {
            Some(handle) => handle.queue.wake_up(),
            None => false,
        }
    }

    /// Names of the named queues currently running.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn queue_config_for(&self, topic: &str) -> Option<&QueueConfig> {
        self.queue_configs
            .iter()
            .find(|q| q.topics.iter().any(|p| ExecutorRegistry::pattern_matches(p, topic)))
    }

    pub(crate) async fn find_node(&self, key: &JobKey) -> Result<Option<Node>> {
        let session = self.engine.background_session()?;
        let query = NodeQuery::descendants_of(self.engine.root_path())
            .where_eq(PROPERTY_TOPIC, key.topic.as_str())
            .where_eq(PROPERTY_ID, key.id.as_str())
            .with_limit(1);
        Ok(self.store().query(&session, &query).await?.into_iter().next())
    }
}

/// Notification event describing a job.
pub(crate) fn notification(topic: &str, job: &Job) -> Event {
    let mut properties = job.properties.clone();
    properties.insert(NOTIFICATION_PROPERTY_JOB_TOPIC.to_string(), Value::from(job.topic.clone()));
    properties.insert(NOTIFICATION_PROPERTY_JOB_ID.to_string(), Value::from(job.id.clone()));
    properties.insert(NOTIFICATION_PROPERTY_RETRY_COUNT.to_string(), Value::from(job.retry_count));
    Event::new(topic, properties)
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.starts_with('/') || topic.ends_with('/') || topic.contains("//") {
        return Err(JobError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn matches_filters(job: &Job, filters: &Map<String, Value>) -> bool {
    filters.iter().all(|(k, v)| job.properties.get(k) == Some(v))
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
