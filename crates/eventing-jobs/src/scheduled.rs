//! Scheduled-job coordinator.
//!
//! Schedules are persisted under their own root through the same
//! writer/background pipeline as jobs. Each schedule node is locked by
//! exactly one cluster member, which registers it with its local
//! [`Scheduler`] and publishes the job's topic on every firing. When that
//! member goes away its locks are released and another member takes the
//! schedule over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use eventing_config::Config;
use eventing_scheduler::{ScheduleConfig, ScheduleContext, ScheduledTask, Scheduler, SchedulerError};
use eventing_store::{ChangeKind, ChangeMask, ChangeSubscription, DurableStore, LockToken, NodeQuery, SessionId, StoreError, path};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{EventCodec, PROPERTY_TOPIC, unique_name};
use crate::engine::{EngineHandler, EventInfo, PersistenceEngine};
use crate::error::{JobError, Result};
use crate::event_bus::{Event, EventBus};
use crate::job::Job;
use crate::schedule_info::{ScheduleInfo, Trigger, event_properties};

const ROOT_LOCK_ATTEMPTS: usize = 100;
const ROOT_LOCK_RETRY: Duration = Duration::from_millis(20);
const REMOVE_ATTEMPTS: usize = 3;

/// A schedule this member owns.
struct Registration {
    schedule_id: String,
    token: LockToken,
}

/// Publishes a scheduled job's topic when the scheduler fires it.
struct FireTask {
    coordinator: Weak<ScheduledJobCoordinator>,
    topic: String,
    properties: Map<String, Value>,
    node_path: String,
    one_shot: bool,
}

#[async_trait]
impl ScheduledTask for FireTask {
    async fn execute(&self, ctx: ScheduleContext) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        debug!("Schedule {} fired ({})", ctx.name, ctx.fire_count);
        coordinator
            .bus
            .publish(Event::new(self.topic.clone(), self.properties.clone()));
        if self.one_shot {
            coordinator.complete_one_shot(&self.node_path).await;
        }
    }
}

/// Persists schedules and fires them on exactly one cluster member.
pub struct ScheduledJobCoordinator {
    engine: PersistenceEngine,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<dyn EventBus>,
    /// Schedules registered locally, by node path.
    registered: DashMap<String, Registration>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ScheduledJobCoordinator {
    pub fn new(
        store: Arc<dyn DurableStore>,
        scheduler: Arc<dyn Scheduler>,
        bus: Arc<dyn EventBus>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine: PersistenceEngine::new(store, &config.scheduled.root_path, &config.node.application_id),
            scheduler,
            bus,
            registered: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Schedule ids registered with this member's scheduler.
    pub fn local_schedules(&self) -> Vec<String> {
        self.registered.iter().map(|e| e.value().schedule_id.clone()).collect()
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyStarted);
        }
        self.engine.start(self.clone()).await?;

        let changes = self.engine.store().subscribe(
            self.engine.root_path(),
            ChangeMask::LOCK_RELEASED | ChangeMask::NODE_REMOVED,
        );
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(self.clone().watch_changes(changes)));
        tasks.push(tokio::spawn(self.clone().recover()));
        drop(tasks);

        info!("Scheduled job coordinator started on {}", self.engine.root_path());
        Ok(())
    }

    /// Unregister local schedules and release their nodes to other members.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.engine.shutdown().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }

        let owned: Vec<String> = self.registered.iter().map(|e| e.key().clone()).collect();
        for node_path in owned {
            let Some((_, registration)) = self.registered.remove(&node_path) else {
                continue;
            };
            self.unregister_local(&registration.schedule_id);
            if let Err(e) = self.engine.store().unlock(&registration.token).await {
                debug!("Schedule lock on {} goes with the session: {}", node_path, e);
            }
        }

        self.engine.close_sessions().await;
        info!("Scheduled job coordinator stopped");
    }

    /// Validate and queue a schedule request.
    ///
    /// A job carrying one trigger property starts a schedule; a job with
    /// none stops the schedule with the same id. Malformed requests are
    /// rejected here and never persisted.
    pub fn schedule(&self, job: Job) -> Result<()> {
        let info = ScheduleInfo::from_job(&job)?;
        debug!(
            "Queueing {} request for {}",
            if info.is_stop() { "stop" } else { "start" },
            info.schedule_id
        );
        self.engine.submit(job)
    }

    /// Stop the schedule of `topic` with caller-supplied `id`, if any.
    pub fn unschedule(&self, topic: &str, id: Option<&str>) -> Result<()> {
        let mut job = Job::new(topic);
        if let Some(id) = id {
            job = job.with_id(id);
        }
        self.schedule(job)
    }

    async fn lock_root(&self, session: &SessionId) -> Result<LockToken> {
        let root = self.engine.root_path();
        for _ in 0..ROOT_LOCK_ATTEMPTS {
            if let Some(token) = self.engine.store().try_lock(session, root).await? {
                return Ok(token);
            }
            tokio::time::sleep(ROOT_LOCK_RETRY).await;
        }
        Err(StoreError::Locked(root.to_string()).into())
    }

    async fn persist_locked(&self, session: &SessionId, job: &Job, info: &ScheduleInfo, node_path: &str) -> Result<Option<String>> {
        let store = self.engine.store();
        let exists = store.get_node(session, node_path).await?.is_some();

        if info.is_stop() {
            if exists {
                self.remove_schedule_node(session, node_path).await?;
                info!("Stopped schedule {}", info.schedule_id);
            }
            self.unregister_local(&info.schedule_id);
            return Ok(None);
        }

        if exists {
            error!("Schedule {} already exists, ignoring request", info.schedule_id);
            return Ok(None);
        }
        let props = EventCodec::encode(job, self.engine.application_id())?;
        store.add_node(session, node_path, props).await?;
        info!("Persisted schedule {}", info.schedule_id);
        Ok(Some(node_path.to_string()))
    }

    /// Break whatever lock a schedule node carries and remove it.
    async fn remove_schedule_node(&self, session: &SessionId, node_path: &str) -> Result<()> {
        let store = self.engine.store();
        let mut attempt = 0;
        loop {
            attempt += 1;
            store.break_lock(session, node_path).await?;
            match store.remove_node(session, node_path).await {
                Ok(()) | Err(StoreError::PathNotFound(_)) => return Ok(()),
                // re-locked by a member picking up the released node
                Err(StoreError::Locked(_)) if attempt < REMOVE_ATTEMPTS => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn unregister_local(&self, schedule_id: &str) {
        match self.scheduler.remove_job(schedule_id) {
            Ok(()) => debug!("Unregistered schedule {}", schedule_id),
            Err(SchedulerError::NoSuchJob(_)) => {}
            Err(e) => warn!("Unable to unregister schedule {}: {}", schedule_id, e),
        }
    }

    /// Lock a persisted schedule and register it with the local scheduler.
    async fn claim_schedule(self: Arc<Self>, node_path: &str) -> Result<()> {
        if self.registered.contains_key(node_path) {
            return Ok(());
        }
        let session = self.engine.background_session()?;
        let store = self.engine.store();
        let token = match store.try_lock(&session, node_path).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("Schedule at {} is owned elsewhere", node_path);
                return Ok(());
            }
            Err(StoreError::PathNotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let Some(node) = store.get_node(&session, node_path).await? else {
            return Ok(());
        };
        let registered = EventCodec::decode(&node)
            .and_then(|job| ScheduleInfo::from_job(&job).map(|info| (job, info)))
            .and_then(|(job, info)| self.register(node_path, &job, &info).map(|()| info));

        match registered {
            Ok(info) => {
                info!("Registered schedule {}", info.schedule_id);
                self.registered.insert(
                    node_path.to_string(),
                    Registration {
                        schedule_id: info.schedule_id,
                        token,
                    },
                );
            }
            Err(e) => {
                error!("Unable to register schedule at {}: {}", node_path, e);
                if let Err(e) = store.unlock(&token).await {
                    warn!("Unable to unlock {}: {}", node_path, e);
                }
            }
        }
        Ok(())
    }

    fn register(self: &Arc<Self>, node_path: &str, job: &Job, info: &ScheduleInfo) -> Result<()> {
        let Some(trigger) = &info.trigger else {
            return Err(JobError::InvalidSchedule(format!("{} has no trigger", info.schedule_id)));
        };
        let task = Arc::new(FireTask {
            coordinator: Arc::downgrade(self),
            topic: info.topic.clone(),
            properties: event_properties(&job.properties),
            node_path: node_path.to_string(),
            one_shot: matches!(trigger, Trigger::Date(_)),
        });
        let config = ScheduleConfig::new();
        match trigger {
            Trigger::Cron(expr) => self.scheduler.add_job(&info.schedule_id, task, config, expr)?,
            Trigger::Period(period) => self.scheduler.add_periodic_job(&info.schedule_id, task, config, *period)?,
            Trigger::Date(at) => {
                self.scheduler.fire_job_at(Some(&info.schedule_id), task, config, *at)?;
            }
        }
        Ok(())
    }

    /// A one-shot schedule is removed once it fired.
    async fn complete_one_shot(&self, node_path: &str) {
        if self.registered.remove(node_path).is_none() {
            return;
        }
        let Ok(session) = self.engine.background_session() else {
            return;
        };
        if let Err(e) = self.engine.store().remove_node(&session, node_path).await {
            warn!("Unable to remove fired schedule at {}: {}", node_path, e);
        }
    }

    async fn recover(self: Arc<Self>) {
        let session = match self.engine.background_session() {
            Ok(session) => session,
            Err(_) => return,
        };
        let query = NodeQuery::descendants_of(self.engine.root_path())
            .where_exists(PROPERTY_TOPIC)
            .locked(false);
        let nodes = match self.engine.store().query(&session, &query).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("Unable to load persisted schedules: {}", e);
                return;
            }
        };
        info!("Loading {} persisted schedules", nodes.len());
        for node in nodes {
            if let Err(e) = self.clone().claim_schedule(&node.path).await {
                warn!("Unable to load schedule at {}: {}", node.path, e);
            }
        }
    }

    async fn watch_changes(self: Arc<Self>, mut changes: ChangeSubscription) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = changes.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if event.path == self.engine.root_path() {
                continue;
            }
            match event.kind {
                ChangeKind::NodeRemoved => {
                    if let Some((_, registration)) = self.registered.remove(&event.path) {
                        info!("Schedule {} was removed, unregistering", registration.schedule_id);
                        self.unregister_local(&registration.schedule_id);
                    }
                }
                ChangeKind::LockReleased if !self.engine.owns_session(&event.session) => {
                    if let Err(e) = self.clone().claim_schedule(&event.path).await {
                        debug!("Unable to take over schedule at {}: {}", event.path, e);
                    }
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl EngineHandler for ScheduledJobCoordinator {
    fn engine(&self) -> &PersistenceEngine {
        &self.engine
    }

    fn node_path(&self, job: &Job) -> String {
        path::join(self.engine.root_path(), &unique_name(&ScheduleInfo::schedule_id_for(job)))
    }

    /// Writes happen under a lock on the root so that two members cannot
    /// both create the same schedule.
    async fn persist(&self, job: &Job) -> Result<Option<String>> {
        let info = ScheduleInfo::from_job(job)?;
        let session = self.engine.writer_session()?;
        let node_path = self.node_path(job);

        let root_lock = self.lock_root(&session).await?;
        let outcome = self.persist_locked(&session, job, &info, &node_path).await;
        if let Err(e) = self.engine.store().unlock(&root_lock).await {
            warn!("Unable to unlock {}: {}", root_lock.path, e);
        }
        outcome
    }

    async fn on_dispatch(self: Arc<Self>, info: EventInfo) -> Result<()> {
        let Some(node_path) = info.node_path else {
            return Ok(());
        };
        self.claim_schedule(&node_path).await
    }
}

#[cfg(test)]
#[path = "scheduled_tests.rs"]
mod tests;
