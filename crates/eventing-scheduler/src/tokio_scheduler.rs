//! TokioScheduler - scheduler backed by tokio timers.
//!
//! Each registered job runs as its own task that sleeps until the next fire
//! time and stops when its cancellation token fires.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::scheduler::{ScheduleConfig, ScheduleContext, ScheduleKind, ScheduledTask, Scheduler};

struct ScheduledEntry {
    id: Uuid,
    kind: ScheduleKind,
    token: CancellationToken,
}

struct JobRun {
    name: String,
    id: Uuid,
    task: Arc<dyn ScheduledTask>,
    config: ScheduleConfig,
    token: CancellationToken,
    fire_count: AtomicU64,
}

impl JobRun {
    async fn fire(&self) {
        let count = self.fire_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Scheduled job {} firing (#{})", self.name, count);
        self.task
            .execute(ScheduleContext {
                name: self.name.clone(),
                config: self.config.clone(),
                fired_at: Utc::now(),
                fire_count: count,
            })
            .await;
    }

    /// Sleep until `at`. Returns false if cancelled first.
    async fn sleep_until(&self, at: DateTime<Utc>) -> bool {
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

/// Scheduler running every job on the current tokio runtime.
#[derive(Default)]
pub struct TokioScheduler {
    entries: Arc<DashMap<String, ScheduledEntry>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancel every registered job.
    pub fn shutdown(&self) {
        for entry in self.entries.iter() {
            entry.token.cancel();
        }
        self.entries.clear();
        info!("Scheduler shut down");
    }

    fn register(
        &self,
        name: String,
        kind: ScheduleKind,
        task: Arc<dyn ScheduledTask>,
        config: ScheduleConfig,
    ) -> Result<Arc<JobRun>, SchedulerError> {
        // fail before touching the entry map
        tokio::runtime::Handle::try_current().map_err(|e| SchedulerError::Runtime(e.to_string()))?;

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let run = Arc::new(JobRun {
            name: name.clone(),
            id,
            task,
            config,
            token: token.clone(),
            fire_count: AtomicU64::new(0),
        });

        let previous = self.entries.insert(name.clone(), ScheduledEntry { id, kind, token });
        if let Some(previous) = previous {
            previous.token.cancel();
            debug!("Scheduled job {} replaced", name);
        }
        Ok(run)
    }
}

impl Scheduler for TokioScheduler {
    fn add_job(
        &self,
        name: &str,
        task: Arc<dyn ScheduledTask>,
        config: ScheduleConfig,
        cron_expr: &str,
    ) -> Result<(), SchedulerError> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidExpression {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        let run = self.register(
            name.to_string(),
            ScheduleKind::Cron(cron_expr.to_string()),
            task,
            config,
        )?;
        let entries = self.entries.clone();
        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                if !run.sleep_until(next).await {
                    return;
                }
                run.fire().await;
            }
            debug!("Cron job {} has no upcoming schedule", run.name);
            entries.remove_if(&run.name, |_, e| e.id == run.id);
        });
        debug!("Cron job {} registered with '{}'", name, cron_expr);
        Ok(())
    }

    fn add_periodic_job(
        &self,
        name: &str,
        task: Arc<dyn ScheduledTask>,
        config: ScheduleConfig,
        period: Duration,
    ) -> Result<(), SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod(format!("{} has a zero period", name)));
        }

        let first = tokio::time::Instant::now()
            .checked_add(period)
            .ok_or_else(|| SchedulerError::InvalidPeriod(format!("{} has a period of {:?}, out of range", name, period)))?;

        let run = self.register(name.to_string(), ScheduleKind::Periodic(period), task, config)?;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(first, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = run.token.cancelled() => return,
                    _ = interval.tick() => run.fire().await,
                }
            }
        });
        debug!("Periodic job {} registered every {:?}", name, period);
        Ok(())
    }

    fn fire_job_at(
        &self,
        name: Option<&str>,
        task: Arc<dyn ScheduledTask>,
        config: ScheduleConfig,
        at: DateTime<Utc>,
    ) -> Result<String, SchedulerError> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("once-{}", Uuid::new_v4()));

        let run = self.register(name.clone(), ScheduleKind::Once(at), task, config)?;
        let entries = self.entries.clone();
        tokio::spawn(async move {
            if run.sleep_until(at).await {
                entries.remove_if(&run.name, |_, e| e.id == run.id);
                run.fire().await;
            }
        });
        debug!("One-shot job {} registered for {}", name, at.to_rfc3339());
        Ok(name)
    }

    fn remove_job(&self, name: &str) -> Result<(), SchedulerError> {
        match self.entries.remove(name) {
            Some((_, entry)) => {
                entry.token.cancel();
                debug!("Scheduled job {} removed", name);
                Ok(())
            }
            None => Err(SchedulerError::NoSuchJob(name.to_string())),
        }
    }

    fn schedule_of(&self, name: &str) -> Option<ScheduleKind> {
        self.entries.get(name).map(|e| e.kind.clone())
    }

    fn job_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.token.cancel();
        }
    }
}

#[cfg(test)]
#[path = "tokio_scheduler_tests.rs"]
mod tests;
