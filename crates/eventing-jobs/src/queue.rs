//! Blocking job queue backing a named queue runner.
//!
//! A FIFO of claimed jobs plus a single-slot result cell. The runner of an
//! ordered queue parks in [`JobBlockingQueue::wait_for_finish`] until the
//! job it started reports back, and gets the job back when it has to be
//! retried.

use eventing_store::LockToken;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::EventInfo;

/// A job whose node is locked by this coordinator.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub info: EventInfo,
    pub node_path: String,
    pub token: LockToken,
}

impl ClaimedJob {
    pub fn topic(&self) -> &str {
        &self.info.job.topic
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<ClaimedJob>,
    finish_result: Option<Option<ClaimedJob>>,
    waiting: bool,
    marked_for_cleanup: bool,
    sleeping: Option<CancellationToken>,
    finished: bool,
    running_slots: usize,
    last_topic: Option<String>,
}

pub struct JobBlockingQueue {
    name: String,
    round_robin: bool,
    state: Mutex<QueueState>,
    items_ready: Notify,
    finish_ready: Notify,
    slot_ready: Notify,
}

impl JobBlockingQueue {
    pub fn new(name: impl Into<String>, round_robin: bool) -> Self {
        Self {
            name: name.into(),
            round_robin,
            state: Mutex::new(QueueState::default()),
            items_ready: Notify::new(),
            finish_ready: Notify::new(),
            slot_ready: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a job. A finished queue hands the job back.
    pub fn put(&self, job: ClaimedJob) -> Result<(), ClaimedJob> {
        {
            let mut state = self.state.lock();
            if state.finished {
                return Err(job);
            }
            state.items.push_back(job);
            state.marked_for_cleanup = false;
        }
        self.items_ready.notify_one();
        Ok(())
    }

    /// Wait for the next job. Returns `None` once the queue is finished.
    ///
    /// A round-robin queue prefers a topic other than the last one taken.
    pub async fn take(&self) -> Option<ClaimedJob> {
        loop {
            {
                let mut state = self.state.lock();
                if state.finished {
                    return None;
                }
                let idx = if self.round_robin {
                    let last = state.last_topic.clone();
                    state
                        .items
                        .iter()
                        .position(|j| Some(j.topic()) != last.as_deref())
                        .or(if state.items.is_empty() { None } else { Some(0) })
                } else if state.items.is_empty() {
                    None
                } else {
                    Some(0)
                };
                if let Some(job) = idx.and_then(|i| state.items.remove(i)) {
                    state.last_topic = Some(job.topic().to_string());
                    return Some(job);
                }
            }
            self.items_ready.notified().await;
        }
    }

    /// Block until [`notify_finish`](Self::notify_finish) is called and
    /// return its result once. `Some` carries a job to retry.
    pub async fn wait_for_finish(&self) -> Option<ClaimedJob> {
        self.state.lock().waiting = true;
        loop {
            {
                let mut state = self.state.lock();
                if let Some(result) = state.finish_result.take() {
                    state.waiting = false;
                    return result;
                }
                if state.finished {
                    state.waiting = false;
                    return None;
                }
            }
            self.finish_ready.notified().await;
        }
    }

    pub fn notify_finish(&self, retry: Option<ClaimedJob>) {
        self.state.lock().finish_result = Some(retry);
        self.finish_ready.notify_one();
    }

    /// Mark the queue as a reclaim candidate. No-op while a runner is waiting
    /// for a result.
    pub fn mark_for_cleanup(&self) {
        let mut state = self.state.lock();
        if !state.waiting {
            state.marked_for_cleanup = true;
        }
    }

    /// Whether a runner is parked in [`wait_for_finish`](Self::wait_for_finish).
    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }

    pub fn is_marked_for_cleanup(&self) -> bool {
        self.state.lock().marked_for_cleanup
    }

    /// Record that the runner suspended itself and the token that wakes it.
    pub fn set_sleeping(&self, sleeping: bool, token: Option<CancellationToken>) {
        self.state.lock().sleeping = if sleeping { token } else { None };
    }

    pub fn is_sleeping(&self) -> bool {
        self.state.lock().sleeping.is_some()
    }

    /// Cut a runner's sleep short. Returns whether it was sleeping.
    pub fn wake_up(&self) -> bool {
        match self.state.lock().sleeping.take() {
            Some(token) => {
                token.cancel();
                debug!("Woke up queue {}", self.name);
                true
            }
            None => false,
        }
    }

    /// Wait for one of `max` execution slots. Returns false once finished.
    pub async fn acquire_slot(&self, max: usize) -> bool {
        loop {
            {
                let mut state = self.state.lock();
                if state.finished {
                    return false;
                }
                if state.running_slots < max.max(1) {
                    state.running_slots += 1;
                    return true;
                }
            }
            self.slot_ready.notified().await;
        }
    }

    pub fn free_slot(&self) {
        {
            let mut state = self.state.lock();
            state.running_slots = state.running_slots.saturating_sub(1);
        }
        self.slot_ready.notify_one();
    }

    pub fn running_slots(&self) -> usize {
        self.state.lock().running_slots
    }

    /// Stop the queue and wake every waiter. Returns the jobs still queued.
    pub fn set_finished(&self) -> Vec<ClaimedJob> {
        let remaining = {
            let mut state = self.state.lock();
            state.finished = true;
            if let Some(token) = state.sleeping.take() {
                token.cancel();
            }
            state.items.drain(..).collect()
        };
        self.items_ready.notify_one();
        self.finish_ready.notify_one();
        self.slot_ready.notify_one();
        remaining
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
