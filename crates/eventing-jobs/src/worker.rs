//! Worker pool executing job bodies.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{JobError, Result};

/// Bounded pool of concurrently running jobs.
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    running: AtomicBool,
    total_processed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            running: AtomicBool::new(true),
            total_processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::SeqCst)
    }

    /// Workers not currently busy.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `work` on a worker, waiting for one to become free.
    pub async fn spawn<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_running() {
            return Err(JobError::Shutdown);
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::Shutdown)?;
        let total_processed = self.total_processed.clone();

        tokio::spawn(async move {
            work.await;
            total_processed.fetch_add(1, Ordering::SeqCst);
            drop(permit);
        });
        Ok(())
    }

    /// Stop accepting work and wait up to `timeout` for running jobs.
    ///
    /// Returns whether every worker finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let permits = u32::try_from(self.max_workers).unwrap_or(u32::MAX);

        let drained = match tokio::time::timeout(timeout, self.semaphore.acquire_many(permits)).await {
            Ok(Ok(permit)) => {
                permit.forget();
                true
            }
            Ok(Err(_)) => true,
            Err(_) => {
                warn!(
                    "Worker pool drain timed out with {} jobs still running",
                    self.max_workers - self.available_workers()
                );
                false
            }
        };
        self.semaphore.close();
        info!("Worker pool stopped after {} jobs", self.total_processed());
        drained
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .field("available", &self.available_workers())
            .finish()
    }
}
