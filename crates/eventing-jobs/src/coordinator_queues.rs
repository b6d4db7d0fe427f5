//! Named queue runners.
//!
//! A queue is created on first use and gets one runner task. An ordered
//! runner executes one job at a time and waits for its result, re-running
//! a failed job in place after its retry delay. Unordered and round-robin
//! runners start jobs as long as the queue has free slots.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use eventing_config::{QueueConfig, QueueType};
use tracing::{debug, info};

use crate::coordinator::JobCoordinator;
use crate::coordinator_dispatch::Execution;
use crate::queue::{ClaimedJob, JobBlockingQueue};

/// A running named queue and the configuration it was created from.
#[derive(Clone)]
pub(crate) struct QueueHandle {
    pub(crate) queue: Arc<JobBlockingQueue>,
    pub(crate) config: QueueConfig,
}

impl QueueHandle {
    pub(crate) fn is_ordered(&self) -> bool {
        self.config.queue_type == QueueType::Ordered
    }
}

impl JobCoordinator {
    /// Hand a claimed job to its named queue, starting the queue if needed.
    pub(crate) async fn enqueue_named(self: &Arc<Self>, config: &QueueConfig, claimed: ClaimedJob) {
        let mut claimed = claimed;
        loop {
            if self.shutdown.is_cancelled() {
                self.release_claimed(claimed).await;
                return;
            }
            let handle = self.queue_handle(config);
            match handle.queue.put(claimed) {
                Ok(()) => return,
                Err(rejected) => {
                    // reaped between lookup and put
                    self.queues.remove_if(&config.name, |_, h| h.queue.is_finished());
                    claimed = rejected;
                }
            }
        }
    }

    pub(crate) fn queue_handle(self: &Arc<Self>, config: &QueueConfig) -> QueueHandle {
        if let Some(existing) = self.queues.get(&config.name) {
            return existing.value().clone();
        }

        let (handle, created) = match self.queues.entry(config.name.clone()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let round_robin = config.queue_type == QueueType::TopicRoundRobin;
                let handle = QueueHandle {
                    queue: Arc::new(JobBlockingQueue::new(&config.name, round_robin)),
                    config: config.clone(),
                };
                e.insert(handle.clone());
                (handle, true)
            }
        };

        if created {
            info!("Starting {:?} queue {}", config.queue_type, config.name);
            let task = tokio::spawn(self.clone().run_queue(handle.clone()));
            let mut tasks = self.tasks.lock();
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
        handle
    }

    async fn run_queue(self: Arc<Self>, handle: QueueHandle) {
        match handle.config.queue_type {
            QueueType::Ordered => self.run_ordered(&handle).await,
            QueueType::Unordered | QueueType::TopicRoundRobin => self.run_parallel(&handle).await,
            QueueType::Drop => {}
        }
        debug!("Queue {} stopped", handle.queue.name());
    }

    async fn run_ordered(self: &Arc<Self>, handle: &QueueHandle) {
        while let Some(first) = handle.queue.take().await {
            let mut next = Some(first);
            while let Some(claimed) = next.take() {
                let Some(executor) = self.registry.resolve(claimed.topic()) else {
                    self.unload_claimed(claimed).await;
                    break;
                };
                let execution = Execution {
                    claimed,
                    exclusive: false,
                    queue: Some(handle.clone()),
                };
                if !self.execute(execution, executor).await {
                    return;
                }

                let Some(retry) = handle.queue.wait_for_finish().await else {
                    break;
                };
                self.sleep_before_retry(handle, retry.info.job.retry_delay).await;
                if self.shutdown.is_cancelled() {
                    self.release_claimed(retry).await;
                    return;
                }
                next = Some(retry);
            }
        }
    }

    async fn run_parallel(self: &Arc<Self>, handle: &QueueHandle) {
        let max = handle.config.max_parallel.max(1);
        while let Some(claimed) = handle.queue.take().await {
            if !handle.queue.acquire_slot(max).await {
                self.release_claimed(claimed).await;
                break;
            }
            let Some(executor) = self.registry.resolve(claimed.topic()) else {
                self.unload_claimed(claimed).await;
                handle.queue.free_slot();
                continue;
            };
            let execution = Execution {
                claimed,
                exclusive: false,
                queue: Some(handle.clone()),
            };
            if !self.execute(execution, executor).await {
                handle.queue.free_slot();
            }
        }
    }

    /// Suspend an ordered runner for a retry delay. `wake_up_queue` or
    /// shutdown cut the sleep short.
    async fn sleep_before_retry(&self, handle: &QueueHandle, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let token = self.shutdown.child_token();
        handle.queue.set_sleeping(true, Some(token.clone()));
        tokio::select! {
            _ = token.cancelled() => debug!("Queue {} woken up", handle.queue.name()),
            _ = tokio::time::sleep(delay) => {}
        }
        handle.queue.set_sleeping(false, None);
    }
}
