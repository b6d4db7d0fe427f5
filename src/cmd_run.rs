//! The `run` command: an in-process cluster sharing one memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, json};
use tracing::{info, warn};

use eventing_config::Config;
use eventing_jobs::{
    EventBus, Job, JobCoordinator, JobExecutor, JobResult, LocalEventBus, PROPERTY_TIMED_PERIOD,
    ScheduledJobCoordinator, StatisticsSnapshot,
};
use eventing_scheduler::TokioScheduler;
use eventing_store::MemoryStore;

const HEARTBEAT_TOPIC: &str = "demo/heartbeat";

/// Executor that sleeps briefly and fails every k-th attempt.
struct DemoExecutor {
    attempts: Arc<AtomicU64>,
    fail_every: u64,
}

#[async_trait]
impl JobExecutor for DemoExecutor {
    async fn process(&self, job: &Job) -> JobResult {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.fail_every > 0 && attempt % self.fail_every == 0 {
            warn!("Demo attempt {} of job {} fails", attempt, job.key());
            return JobResult::Failed;
        }
        JobResult::Ok
    }
}

struct Member {
    jobs: Arc<JobCoordinator>,
    timed: Arc<ScheduledJobCoordinator>,
}

pub(crate) struct RunOptions {
    pub nodes: usize,
    pub jobs: usize,
    pub topic: String,
    pub fail_every: u64,
    pub timeout: Duration,
}

pub(crate) async fn handle_run_command(config: Config, options: RunOptions) -> Result<()> {
    let nodes = options.nodes.max(1);
    info!(
        "Starting {} members, {} jobs on {}",
        nodes, options.jobs, options.topic
    );

    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(LocalEventBus::new());
    let mut heartbeats = bus.subscribe(HEARTBEAT_TOPIC)?;
    let attempts = Arc::new(AtomicU64::new(0));

    let mut members = Vec::with_capacity(nodes);
    for i in 0..nodes {
        let mut member_config = config.clone();
        member_config.node.application_id = format!("{}-{}", config.node.application_id, i);

        let jobs = JobCoordinator::new(store.clone(), bus.clone(), &member_config);
        jobs.register_executor(
            &options.topic,
            Arc::new(DemoExecutor {
                attempts: attempts.clone(),
                fail_every: options.fail_every,
            }),
        )?;
        jobs.start()
            .await
            .with_context(|| format!("starting job coordinator {}", i))?;

        let timed = ScheduledJobCoordinator::new(
            store.clone(),
            Arc::new(TokioScheduler::new()),
            bus.clone(),
            &member_config,
        );
        timed
            .start()
            .await
            .with_context(|| format!("starting scheduled coordinator {}", i))?;

        members.push(Member { jobs, timed });
    }

    let heartbeat = Job::new(HEARTBEAT_TOPIC)
        .with_id("cluster")
        .with_property(PROPERTY_TIMED_PERIOD, 1);
    members[0].timed.schedule(heartbeat)?;

    for n in 0..options.jobs {
        let member = &members[n % nodes];
        let mut props = Map::new();
        props.insert("seq".into(), json!(n));
        member.jobs.submit(&options.topic, None, props)?;
    }

    let started = Instant::now();
    let mut settled = false;
    while started.elapsed() < options.timeout {
        let done: u64 = members
            .iter()
            .map(|m| {
                let stats = m.jobs.get_statistics();
                stats.finished + stats.failed
            })
            .sum();
        if done >= options.jobs as u64 {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !settled {
        warn!("Jobs did not settle within {:?}", options.timeout);
    }

    let mut beats = 0usize;
    while heartbeats.try_recv().is_some() {
        beats += 1;
    }

    let per_member: Vec<_> = members
        .iter()
        .map(|m| {
            json!({
                "application_id": m.jobs.application_id(),
                "statistics": m.jobs.get_statistics(),
                "schedules": m.timed.local_schedules(),
            })
        })
        .collect();
    let total = members
        .iter()
        .map(|m| m.jobs.get_statistics())
        .fold(StatisticsSnapshot::default(), add);
    let report = json!({
        "elapsed_ms": started.elapsed().as_millis() as u64,
        "attempts": attempts.load(Ordering::SeqCst),
        "heartbeats": beats,
        "total": total,
        "members": per_member,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    for member in &members {
        member.timed.stop().await;
        member.jobs.stop().await;
    }
    info!("Cluster stopped");
    Ok(())
}

fn add(a: StatisticsSnapshot, b: StatisticsSnapshot) -> StatisticsSnapshot {
    StatisticsSnapshot {
        queued: a.queued + b.queued,
        active: a.active + b.active,
        started: a.started + b.started,
        finished: a.finished + b.finished,
        failed: a.failed + b.failed,
        cancelled: a.cancelled + b.cancelled,
        retried: a.retried + b.retried,
    }
}
