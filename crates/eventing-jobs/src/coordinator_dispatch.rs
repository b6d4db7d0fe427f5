//! Claiming, executing and completing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use eventing_config::QueueType;
use eventing_store::{LockToken, NodeProperties, PropertyValue, StoreError};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::codec::{EventCodec, PROPERTY_PROCESSOR};
use crate::coordinator::{JobCoordinator, notification};
use crate::coordinator_queues::QueueHandle;
use crate::engine::{EngineHandler, EventInfo, PersistenceEngine};
use crate::error::Result;
use crate::job::{Job, JobResult, TOPIC_JOB_CANCELLED, TOPIC_JOB_FAILED, TOPIC_JOB_FINISHED, TOPIC_JOB_STARTED};
use crate::queue::ClaimedJob;
use crate::registry::JobExecutor;

/// A claimed job on its way through an executor.
pub(crate) struct Execution {
    pub(crate) claimed: ClaimedJob,
    /// Whether the job holds its topic in the processing map.
    pub(crate) exclusive: bool,
    pub(crate) queue: Option<QueueHandle>,
}

#[async_trait]
impl EngineHandler for JobCoordinator {
    fn engine(&self) -> &PersistenceEngine {
        &self.engine
    }

    async fn persist(&self, job: &Job) -> Result<Option<String>> {
        let node_path = self.node_path(job);
        let persisted = self.engine.write_job(job, &node_path).await?;
        if let Some(path) = &persisted {
            self.waiting.insert(path.clone(), ());
        }
        Ok(persisted)
    }

    async fn on_dispatch(self: Arc<Self>, info: EventInfo) -> Result<()> {
        self.dispatch_job(info).await
    }
}

impl JobCoordinator {
    /// Push a persisted job onto the dispatch-queue after `delay`.
    pub(crate) fn enqueue(&self, info: EventInfo, delay: Duration) {
        if let Some(path) = &info.node_path {
            self.waiting.insert(path.clone(), ());
        }
        self.engine.dispatch_after(info, delay);
    }

    /// Try to claim a persisted job and hand it to a queue or a worker.
    pub(crate) async fn dispatch_job(self: Arc<Self>, info: EventInfo) -> Result<()> {
        let Some(node_path) = info.node_path.clone() else {
            warn!("Dispatched job {} was never persisted", info.job.key());
            return Ok(());
        };
        if self.claimed.contains_key(&node_path) {
            self.waiting.remove(&node_path);
            return Ok(());
        }

        let queue_config = self.queue_config_for(&info.job.topic).cloned();
        let exclusive = queue_config.is_none() && !info.job.parallel_allowed;
        if exclusive && self.processing.is_busy(&info.job.topic) {
            self.engine.dispatch_after(info, self.config.busy_requeue_delay());
            return Ok(());
        }

        let (token, job) = match self.claim(&node_path).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                self.waiting.remove(&node_path);
                return Ok(());
            }
            Err(e) => {
                self.waiting.remove(&node_path);
                return Err(e);
            }
        };

        let Some(executor) = self.registry.resolve(&job.topic) else {
            debug!("No executor for job {}, keeping it for later", job.key());
            self.release_lock(&token).await;
            self.unloaded.insert(node_path.clone(), job.topic);
            self.waiting.remove(&node_path);
            return Ok(());
        };

        self.claimed.insert(node_path.clone(), ());
        self.waiting.remove(&node_path);
        let claimed = ClaimedJob {
            info: EventInfo::persisted(job, node_path.clone()),
            node_path,
            token,
        };

        match queue_config {
            Some(config) if config.queue_type == QueueType::Drop => {
                debug!("Queue {} drops job {}", config.name, claimed.info.job.key());
                let execution = Execution {
                    claimed,
                    exclusive: false,
                    queue: None,
                };
                self.finished_job(execution, JobResult::Cancelled).await;
            }
            Some(config) => self.enqueue_named(&config, claimed).await,
            None => {
                if exclusive && !self.processing.try_acquire(claimed.topic()) {
                    let info = claimed.info.clone();
                    self.release_claimed(claimed).await;
                    self.enqueue(info, self.config.busy_requeue_delay());
                    return Ok(());
                }
                let execution = Execution {
                    claimed,
                    exclusive,
                    queue: None,
                };
                self.execute(execution, executor).await;
            }
        }
        Ok(())
    }

    /// Lock a job node and read it back. Yields nothing if another member
    /// holds it, it is gone, or it already finished.
    async fn claim(&self, node_path: &str) -> Result<Option<(LockToken, Job)>> {
        let session = self.engine.background_session()?;
        let token = match self.store().try_lock(&session, node_path).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("Job at {} is claimed elsewhere", node_path);
                return Ok(None);
            }
            Err(StoreError::PathNotFound(_)) => {
                debug!("Job at {} is gone", node_path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let job = match self.store().get_node(&session, node_path).await {
            Ok(Some(node)) => EventCodec::decode(&node),
            Ok(None) => return Ok(None),
            Err(e) => Err(e.into()),
        };
        match job {
            Ok(job) if job.active => Ok(Some((token, job))),
            Ok(job) => {
                debug!("Job {} already finished", job.key());
                self.release_lock(&token).await;
                Ok(None)
            }
            Err(e) => {
                self.release_lock(&token).await;
                Err(e)
            }
        }
    }

    /// Run a claimed job on the worker pool. Returns false if the pool no
    /// longer accepts work.
    pub(crate) async fn execute(self: &Arc<Self>, execution: Execution, executor: Arc<dyn JobExecutor>) -> bool {
        let key = execution.claimed.info.job.key();
        let this = self.clone();
        let spawned = self
            .workers
            .spawn(async move {
                let job = execution.claimed.info.job.clone();
                this.mark_processor(&execution.claimed).await;
                this.stats.record_started();
                this.bus.publish(notification(TOPIC_JOB_STARTED, &job));
                debug!("Starting job {} (attempt {})", job.key(), job.retry_count + 1);

                let result = match AssertUnwindSafe(executor.process(&job)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        error!("Executor for job {} panicked", job.key());
                        JobResult::Failed
                    }
                };
                this.finished_job(execution, result).await;
            })
            .await;

        match spawned {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to start job {}: {}", key, e);
                false
            }
        }
    }

    async fn mark_processor(&self, claimed: &ClaimedJob) {
        let Ok(session) = self.engine.background_session() else {
            return;
        };
        let mut props = NodeProperties::new();
        props.insert(PROPERTY_PROCESSOR.into(), PropertyValue::from(self.application_id()));
        if let Err(e) = self.store().set_properties(&session, &claimed.node_path, props, &[]).await {
            warn!("Unable to mark job {} as processed here: {}", claimed.info.job.key(), e);
        }
    }

    /// Record the outcome of an execution: retry, or finish and notify.
    pub(crate) async fn finished_job(&self, execution: Execution, result: JobResult) {
        let Execution {
            claimed,
            exclusive,
            queue,
        } = execution;
        let ClaimedJob {
            info,
            node_path,
            token,
        } = claimed;
        let mut job = info.job;
        let key = job.key();

        let Ok(session) = self.engine.background_session() else {
            warn!("Job {} finished after shutdown, its lock goes with the session", key);
            return;
        };

        if result == JobResult::Failed {
            job.retry_count += 1;
            if job.can_retry() {
                self.stats.record_retry();
                let props = EventCodec::retry_properties(job.retry_count);
                if let Err(e) = self.store().set_properties(&session, &node_path, props, &[]).await {
                    warn!("Unable to record retry of job {}: {}", key, e);
                }
                info!(
                    "Job {} failed, retry {} of {} in {:?}",
                    key, job.retry_count, job.max_retries, job.retry_delay
                );

                if let Some(handle) = queue.as_ref().filter(|h| h.is_ordered()) {
                    // the ordered runner keeps the lock and runs it again in place
                    handle.queue.notify_finish(Some(ClaimedJob {
                        info: EventInfo::persisted(job, node_path.clone()),
                        node_path,
                        token,
                    }));
                    return;
                }

                self.release_lock(&token).await;
                if exclusive {
                    self.processing.release(&job.topic);
                }
                self.claimed.remove(&node_path);
                if let Some(handle) = &queue {
                    handle.queue.free_slot();
                }
                let delay = job.retry_delay;
                self.enqueue(EventInfo::persisted(job, node_path), delay);
                return;
            }
            info!("Job {} failed after {} attempts", key, job.retry_count);
        }

        if result == JobResult::Ok && job.synthetic_id {
            if let Err(e) = self.store().remove_node(&session, &node_path).await {
                warn!("Unable to remove finished job {}: {}", key, e);
                self.release_lock(&token).await;
            }
        } else {
            let props = EventCodec::finished_properties(result, job.retry_count);
            if let Err(e) = self.store().set_properties(&session, &node_path, props, &[]).await {
                warn!("Unable to record result of job {}: {}", key, e);
            }
            self.release_lock(&token).await;
        }

        if exclusive {
            self.processing.release(&job.topic);
        }
        self.claimed.remove(&node_path);

        job.active = false;
        job.result = Some(result);
        job.finished_at = Some(Utc::now());
        let topic = match result {
            JobResult::Ok => {
                self.stats.record_finished();
                TOPIC_JOB_FINISHED
            }
            JobResult::Failed => {
                self.stats.record_failed();
                TOPIC_JOB_FAILED
            }
            JobResult::Cancelled => {
                self.stats.record_cancelled();
                TOPIC_JOB_CANCELLED
            }
        };
        self.bus.publish(notification(topic, &job));
        debug!("Job {} finished: {}", key, result);

        if let Some(handle) = queue {
            if handle.is_ordered() {
                handle.queue.notify_finish(None);
            } else {
                handle.queue.free_slot();
            }
        }
    }

    pub(crate) async fn release_lock(&self, token: &LockToken) {
        if let Err(e) = self.store().unlock(token).await {
            warn!("Unable to unlock {}: {}", token.path, e);
        }
    }

    /// Give up a claimed job without running it.
    pub(crate) async fn release_claimed(&self, claimed: ClaimedJob) {
        self.release_lock(&claimed.token).await;
        self.claimed.remove(&claimed.node_path);
    }

    /// Give up a claimed job whose executor went away.
    pub(crate) async fn unload_claimed(&self, claimed: ClaimedJob) {
        debug!("No executor for job {}, keeping it for later", claimed.info.job.key());
        let topic = claimed.topic().to_string();
        let node_path = claimed.node_path.clone();
        self.release_claimed(claimed).await;
        self.unloaded.insert(node_path, topic);
    }
}
