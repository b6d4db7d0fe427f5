//! Persistence engine shared by job and scheduled-job coordinators.
//!
//! The engine owns a writer session and a background session against the
//! store and two unbounded FIFO queues. The writer loop drains the
//! write-queue and persists each job through [`EngineHandler::persist`];
//! every successful write is pushed onto the dispatch-queue, which the
//! background loop drains into [`EngineHandler::on_dispatch`].
//!
//! Store errors are logged and abandon the item; a panic inside a loop
//! stops the subsystem.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use eventing_store::{path, DurableStore, SessionId};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::codec::EventCodec;
use crate::error::{JobError, Result};
use crate::job::Job;

/// Work moving between the write-queue and the dispatch-queue.
///
/// `node_path` is empty for a job not yet persisted.
#[derive(Debug, Clone)]
pub struct EventInfo {
    pub job: Job,
    pub node_path: Option<String>,
}

impl EventInfo {
    pub fn fresh(job: Job) -> Self {
        Self { job, node_path: None }
    }

    pub fn persisted(job: Job, node_path: impl Into<String>) -> Self {
        Self {
            job,
            node_path: Some(node_path.into()),
        }
    }
}

enum QueueItem<T> {
    Item(T),
    Stop,
}

struct WriteRequest {
    ticket: u64,
    job: Job,
}

/// Hooks a coordinator plugs into the engine.
#[async_trait]
pub trait EngineHandler: Send + Sync + 'static {
    fn engine(&self) -> &PersistenceEngine;

    /// Node path a job is written to.
    fn node_path(&self, job: &Job) -> String {
        EventCodec::node_path(self.engine().root_path(), job)
    }

    /// Write a job. Returns the path to dispatch, or `None` to drop it.
    async fn persist(&self, job: &Job) -> Result<Option<String>> {
        let node_path = self.node_path(job);
        self.engine().write_job(job, &node_path).await
    }

    /// Handle one item from the dispatch-queue.
    async fn on_dispatch(self: Arc<Self>, info: EventInfo) -> Result<()>;
}

/// Writer/background loop pair over a store root.
pub struct PersistenceEngine {
    store: Arc<dyn DurableStore>,
    root_path: String,
    application_id: String,
    running: Arc<AtomicBool>,
    writer_session: RwLock<Option<SessionId>>,
    background_session: RwLock<Option<SessionId>>,
    write_tx: mpsc::UnboundedSender<QueueItem<WriteRequest>>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<QueueItem<WriteRequest>>>>,
    dispatch_tx: mpsc::UnboundedSender<QueueItem<EventInfo>>,
    dispatch_rx: Mutex<Option<mpsc::UnboundedReceiver<QueueItem<EventInfo>>>>,
    pending: DashMap<u64, Job>,
    next_ticket: AtomicU64,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl PersistenceEngine {
    pub fn new(
        store: Arc<dyn DurableStore>,
        root_path: impl Into<String>,
        application_id: impl Into<String>,
    ) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        Self {
            store,
            root_path: root_path.into(),
            application_id: application_id.into(),
            running: Arc::new(AtomicBool::new(false)),
            writer_session: RwLock::new(None),
            background_session: RwLock::new(None),
            write_tx,
            write_rx: Mutex::new(Some(write_rx)),
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            pending: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn writer_session(&self) -> Result<SessionId> {
        (*self.writer_session.read()).ok_or(JobError::Shutdown)
    }

    pub fn background_session(&self) -> Result<SessionId> {
        (*self.background_session.read()).ok_or(JobError::Shutdown)
    }

    /// Whether a session belongs to this engine.
    pub fn owns_session(&self, session: &SessionId) -> bool {
        *self.writer_session.read() == Some(*session) || *self.background_session.read() == Some(*session)
    }

    /// Open both sessions, ensure the root exists and start the loops.
    ///
    /// A session that cannot be opened is fatal; there is no retry.
    pub async fn start<H: EngineHandler>(&self, handler: Arc<H>) -> Result<()> {
        let (write_rx, dispatch_rx) = match (self.write_rx.lock().take(), self.dispatch_rx.lock().take()) {
            (Some(w), Some(d)) => (w, d),
            _ => return Err(JobError::AlreadyStarted),
        };

        let writer = self.open_session("writer").await?;
        *self.writer_session.write() = Some(writer);
        self.store.create_path(&writer, &self.root_path).await.map_err(|e| {
            error!("Unable to create root {}: {}", self.root_path, e);
            JobError::FatalSession(e.to_string())
        })?;

        let background = self.open_session("background").await?;
        *self.background_session.write() = Some(background);

        self.running.store(true, Ordering::SeqCst);
        self.supervise("writer", writer_loop(handler.clone(), write_rx));
        self.supervise("background", background_loop(handler, dispatch_rx));

        info!("Persistence engine started on {}", self.root_path);
        Ok(())
    }

    async fn open_session(&self, role: &str) -> Result<SessionId> {
        self.store.login().await.map_err(|e| {
            error!("Unable to open {} session for {}: {}", role, self.root_path, e);
            self.running.store(false, Ordering::SeqCst);
            JobError::FatalSession(e.to_string())
        })
    }

    fn supervise<F>(&self, name: &'static str, work: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let running = self.running.clone();
        let inner = tokio::spawn(work);
        let watcher = tokio::spawn(async move {
            if let Err(e) = inner.await {
                if e.is_panic() {
                    error!("Fatal error in {} loop, stopping: {}", name, e);
                    running.store(false, Ordering::SeqCst);
                }
            }
        });
        self.loops.lock().push(watcher);
    }

    /// Queue a job for persistence.
    pub fn submit(&self, job: Job) -> Result<()> {
        if !self.is_running() {
            return Err(JobError::Shutdown);
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.pending.insert(ticket, job.clone());
        if self.write_tx.send(QueueItem::Item(WriteRequest { ticket, job })).is_err() {
            self.pending.remove(&ticket);
            return Err(JobError::Shutdown);
        }
        Ok(())
    }

    /// Jobs submitted but not yet written.
    pub fn pending_jobs(&self) -> Vec<Job> {
        self.pending.iter().map(|e| e.value().clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Push work onto the dispatch-queue.
    pub fn dispatch(&self, info: EventInfo) {
        if !self.is_running() {
            return;
        }
        if self.dispatch_tx.send(QueueItem::Item(info)).is_err() {
            debug!("Dispatch queue closed, item dropped");
        }
    }

    /// Push work onto the dispatch-queue after `delay`.
    pub fn dispatch_after(&self, info: EventInfo, delay: Duration) {
        if delay.is_zero() {
            self.dispatch(info);
            return;
        }
        let tx = self.dispatch_tx.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if running.load(Ordering::SeqCst) {
                let _ = tx.send(QueueItem::Item(info));
            }
        });
    }

    /// Default write: a job with an explicit id replaces an unlocked node
    /// with the same id and is dropped if that node is locked.
    pub async fn write_job(&self, job: &Job, node_path: &str) -> Result<Option<String>> {
        let session = self.writer_session()?;

        if let Some(parent) = path::parent(node_path) {
            self.store.create_path(&session, parent).await?;
        }

        if !job.synthetic_id {
            if let Some(existing) = self.store.get_node(&session, node_path).await? {
                if existing.is_locked() {
                    debug!("Job {} is already being processed elsewhere, dropping", job.key());
                    return Ok(None);
                }
                self.store.remove_node(&session, node_path).await?;
                debug!("Replacing queued job {}", job.key());
            }
        }

        let props = EventCodec::encode(job, &self.application_id)?;
        self.store.add_node(&session, node_path, props).await?;
        Ok(Some(node_path.to_string()))
    }

    /// Flip the running flag, wake both loops with a sentinel and wait for them.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.write_tx.send(QueueItem::Stop);
        let _ = self.dispatch_tx.send(QueueItem::Stop);

        let loops: Vec<JoinHandle<()>> = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            let _ = handle.await;
        }
        debug!("Persistence engine loops on {} stopped", self.root_path);
    }

    /// Log out both sessions, releasing their locks.
    pub async fn close_sessions(&self) {
        let sessions = [self.writer_session.write().take(), self.background_session.write().take()];
        for session in sessions.into_iter().flatten() {
            if let Err(e) = self.store.logout(&session).await {
                error!("Error closing session: {}", e);
            }
        }
        self.pending.clear();
        info!("Persistence engine on {} stopped", self.root_path);
    }
}

async fn writer_loop<H: EngineHandler>(
    handler: Arc<H>,
    mut rx: mpsc::UnboundedReceiver<QueueItem<WriteRequest>>,
) {
    while let Some(QueueItem::Item(request)) = rx.recv().await {
        let engine = handler.engine();
        if !engine.is_running() {
            break;
        }
        let persisted = handler.persist(&request.job).await;
        engine.pending.remove(&request.ticket);
        match persisted {
            Ok(Some(node_path)) => engine.dispatch(EventInfo::persisted(request.job, node_path)),
            Ok(None) => {}
            Err(e) => error!("Unable to persist job {}: {}", request.job.key(), e),
        }
    }
    debug!("Writer loop finished");
}

async fn background_loop<H: EngineHandler>(
    handler: Arc<H>,
    mut rx: mpsc::UnboundedReceiver<QueueItem<EventInfo>>,
) {
    while let Some(QueueItem::Item(info)) = rx.recv().await {
        if !handler.engine().is_running() {
            break;
        }
        let key = info.job.key();
        if let Err(e) = handler.clone().on_dispatch(info).await {
            error!("Unable to dispatch job {}: {}", key, e);
        }
    }
    debug!("Background loop finished");
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
