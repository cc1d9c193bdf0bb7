//! Worker pool draining a shared job queue.
//!
//! [`WorkerPool::start`] spawns a fixed number of loops that pull jobs from a
//! [`flume`] channel until it is closed and drained, or until the services'
//! cancellation token fires. A job already running when cancellation fires
//! fails and is recorded; jobs still queued are left untouched.

use crate::helm::worker::{Job, JobOutcome, Worker};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

/// Creates a bounded job queue. Dropping every sender closes it.
pub fn job_queue(capacity: usize) -> (flume::Sender<Job>, flume::Receiver<Job>) {
    flume::bounded(capacity)
}

/// Counters of a pool run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PoolStats {
    /// Jobs taken from the queue, whatever their outcome.
    pub processed: usize,
    pub registered: usize,
    pub unregistered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_duration: Duration,
}

impl PoolStats {
    fn record(&mut self, outcome: JobOutcome) {
        self.processed += 1;
        match outcome {
            JobOutcome::Registered => self.registered += 1,
            JobOutcome::Unregistered => self.unregistered += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: PoolStats) {
        self.processed += other.processed;
        self.registered += other.registered;
        self.unregistered += other.unregistered;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Starts the workers. Jobs are processed by at most `workers` tasks at a
    /// time, in no particular order.
    #[instrument(skip_all, fields(repository = %worker.repository().name, workers = self.workers))]
    pub fn start(&self, worker: Worker, queue: flume::Receiver<Job>) -> PoolHandle {
        let worker = Arc::new(worker);
        let mut tasks = JoinSet::new();

        for id in 0..self.workers {
            let worker = worker.clone();
            let queue = queue.clone();
            tasks.spawn(async move {
                let cancel = worker.cancellation().clone();
                let mut stats = PoolStats::default();
                loop {
                    let job = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        job = queue.recv_async() => match job {
                            Ok(job) => job,
                            Err(flume::RecvError::Disconnected) => break,
                        },
                    };
                    stats.record(worker.process(job).await);
                }
                debug!(worker = id, processed = stats.processed, "Worker stopped");
                stats
            });
        }

        info!("Worker pool started");
        PoolHandle {
            tasks,
            started: Instant::now(),
        }
    }
}

/// Handle on a running pool.
pub struct PoolHandle {
    tasks: JoinSet<PoolStats>,
    started: Instant,
}

impl PoolHandle {
    /// Waits for every worker to stop and returns the aggregated stats.
    pub async fn wait(mut self) -> PoolStats {
        let mut stats = PoolStats::default();
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }
        stats.total_duration = self.started.elapsed();

        info!(
            processed = stats.processed,
            registered = stats.registered,
            unregistered = stats.unregistered,
            skipped = stats.skipped,
            failed = stats.failed,
            duration_ms = stats.total_duration.as_millis() as u64,
            "Worker pool finished"
        );
        stats
    }
}
