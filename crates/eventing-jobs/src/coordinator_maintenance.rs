//! Change feed, recovery and periodic upkeep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventing_store::{ChangeSubscription, Condition, NodeQuery, StoreError};
use tracing::{debug, error, info, warn};

use crate::codec::{EventCodec, PROPERTY_ACTIVE, PROPERTY_FINISHED, PROPERTY_TOPIC};
use crate::coordinator::JobCoordinator;
use crate::engine::EventInfo;
use crate::error::Result;
use crate::registry::ExecutorRegistry;

impl JobCoordinator {
    /// Pick up jobs released by other members: a retry handed back, or the
    /// locks of a member that logged out.
    pub(crate) async fn watch_changes(self: Arc<Self>, mut changes: ChangeSubscription) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = changes.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if self.engine.owns_session(&event.session) {
                continue;
            }
            if let Err(e) = self.reload_node(&event.path).await {
                debug!("Unable to reload job at {}: {}", event.path, e);
            }
        }
        debug!("Change listener of {} finished", self.application_id());
    }

    /// Dispatch an unlocked active job node unless it is already known here.
    async fn reload_node(&self, node_path: &str) -> Result<bool> {
        if self.claimed.contains_key(node_path) || self.waiting.contains_key(node_path) {
            return Ok(false);
        }
        let session = self.engine.background_session()?;
        let Some(node) = self.store().get_node(&session, node_path).await? else {
            return Ok(false);
        };
        if node.is_locked() || !node.has_property(PROPERTY_TOPIC) {
            return Ok(false);
        }

        let job = EventCodec::decode(&node)?;
        if !job.active {
            return Ok(false);
        }
        if !self.registry.has_executor(&job.topic) {
            self.unloaded.insert(node.path, job.topic);
            return Ok(false);
        }
        self.enqueue(EventInfo::persisted(job, node.path), Duration::ZERO);
        Ok(true)
    }

    pub(crate) async fn recover_after(self: Arc<Self>, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        match self.rescan().await {
            Ok(count) => info!("Loaded {} persisted jobs", count),
            Err(e) => error!("Unable to load persisted jobs: {}", e),
        }
    }

    /// Dispatch every active, unlocked job in the store that this member
    /// does not already know about.
    pub(crate) async fn rescan(&self) -> Result<usize> {
        let session = self.engine.background_session()?;
        let query = NodeQuery::descendants_of(self.engine.root_path())
            .where_exists(PROPERTY_TOPIC)
            .where_eq(PROPERTY_ACTIVE, true)
            .locked(false);

        let mut count = 0;
        for node in self.store().query(&session, &query).await? {
            if self.claimed.contains_key(&node.path) || self.waiting.contains_key(&node.path) {
                continue;
            }
            let job = match EventCodec::decode(&node) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Skipping undecodable job at {}: {}", node.path, e);
                    continue;
                }
            };
            if !self.registry.has_executor(&job.topic) {
                self.unloaded.insert(node.path, job.topic);
                continue;
            }
            self.unloaded.remove(&node.path);
            self.enqueue(EventInfo::persisted(job, node.path), Duration::ZERO);
            count += 1;
        }
        Ok(count)
    }

    /// Dispatch unloaded jobs whose topic `pattern` now covers.
    pub(crate) fn reload_unloaded(self: &Arc<Self>, pattern: &str) {
        let paths: Vec<String> = self
            .unloaded
            .iter()
            .filter(|e| ExecutorRegistry::pattern_matches(pattern, e.value()))
            .map(|e| e.key().clone())
            .collect();
        if paths.is_empty() {
            return;
        }
        for path in &paths {
            self.unloaded.remove(path);
        }

        debug!("Reloading {} jobs for {}", paths.len(), pattern);
        let this = self.clone();
        tokio::spawn(async move {
            for path in paths {
                if let Err(e) = this.reload_node(&path).await {
                    warn!("Unable to reload job at {}: {}", path, e);
                }
            }
        });
    }

    pub(crate) async fn maintenance_loop(self: Arc<Self>) {
        let period = self.config.maintenance_interval();
        if period.is_zero() {
            warn!("Maintenance disabled for {}", self.application_id());
            return;
        }
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => self.run_maintenance().await,
            }
        }
    }

    /// One maintenance pass: drop old history, pick up orphaned jobs and
    /// reclaim idle queues.
    pub async fn run_maintenance(&self) {
        match self.cleanup_history().await {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} finished jobs from history", removed),
            Err(e) => warn!("History cleanup failed: {}", e),
        }
        match self.rescan().await {
            Ok(0) => {}
            Ok(found) => info!("Picked up {} orphaned jobs", found),
            Err(e) => warn!("Orphan rescan failed: {}", e),
        }
        self.reap_idle_queues();
    }

    /// Remove finished jobs older than the cleanup period.
    pub(crate) async fn cleanup_history(&self) -> Result<usize> {
        let Ok(period) = chrono::Duration::from_std(self.config.cleanup_period()) else {
            return Ok(0);
        };
        let session = self.engine.background_session()?;
        let query = NodeQuery::descendants_of(self.engine.root_path())
            .where_exists(PROPERTY_TOPIC)
            .where_eq(PROPERTY_ACTIVE, false)
            .with_condition(Condition::Before(PROPERTY_FINISHED.to_string(), Utc::now() - period))
            .locked(false);

        let mut removed = 0;
        for node in self.store().query(&session, &query).await? {
            match self.store().remove_node(&session, &node.path).await {
                Ok(()) => removed += 1,
                Err(StoreError::Locked(_)) | Err(StoreError::PathNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Mark idle queues, and stop queues that stayed idle since the last pass.
    pub(crate) fn reap_idle_queues(&self) {
        let names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let reaped = self.queues.remove_if(&name, |_, h| {
                h.queue.is_marked_for_cleanup()
                    && h.queue.is_empty()
                    && h.queue.running_slots() == 0
                    && !h.queue.is_waiting()
                    && !h.queue.is_sleeping()
            });
            if let Some((_, handle)) = reaped {
                // empty by the check above
                let _ = handle.queue.set_finished();
                debug!("Stopped idle queue {}", name);
                continue;
            }
            if let Some(handle) = self.queues.get(&name) {
                if handle.queue.is_empty() && handle.queue.running_slots() == 0 {
                    handle.queue.mark_for_cleanup();
                }
            }
        }
    }
}
