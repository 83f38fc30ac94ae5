//! Priority work pool for job execution
//!
//! A fixed number of workers drain a min-heap of job ids, so older jobs run
//! first. A concurrent set of job ids coalesces repeated requests: a job is
//! queued or running at most once at any moment.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Runs the execution loop of one job
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn run_job(&self, job_id: i64);
}

/// Work pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkPoolStatus {
    /// Created, workers not spawned
    Idle,
    /// Workers are draining the queue
    Running,
    /// Shutdown requested or finished
    Stopped,
}

/// Work pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkPoolError {
    #[error("work pool is already running")]
    AlreadyRunning,

    #[error("work pool has been stopped")]
    Stopped,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

struct PoolQueue {
    heap: Mutex<BinaryHeap<Reverse<i64>>>,
    /// Job ids queued or executing
    tracked: DashSet<i64>,
    notify: Notify,
}

/// Fixed-size pool executing jobs in ascending job id order
///
/// # Example
///
/// ```ignore
/// let pool = PriorityWorkPool::new(2);
/// pool.start(executor)?;
/// pool.enqueue(job.id);
/// // ... later
/// pool.shutdown(Duration::from_secs(30)).await?;
/// ```
pub struct PriorityWorkPool {
    queue: Arc<PoolQueue>,
    worker_count: usize,
    status: Mutex<WorkPoolStatus>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PriorityWorkPool {
    pub fn new(worker_count: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue: Arc::new(PoolQueue {
                heap: Mutex::new(BinaryHeap::new()),
                tracked: DashSet::new(),
                notify: Notify::new(),
            }),
            worker_count: worker_count.max(1),
            status: Mutex::new(WorkPoolStatus::Idle),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> WorkPoolStatus {
        *self.status.lock()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.queue.heap.lock().len()
    }

    /// Whether a job is queued or executing
    pub fn is_tracked(&self, job_id: i64) -> bool {
        self.queue.tracked.contains(&job_id)
    }

    /// Request execution of a job; false when the request was coalesced
    pub fn enqueue(&self, job_id: i64) -> bool {
        if !self.queue.tracked.insert(job_id) {
            debug!(job_id, "Job already queued or running, coalesced");
            return false;
        }
        self.queue.heap.lock().push(Reverse(job_id));
        self.queue.notify.notify_one();
        debug!(job_id, "Job enqueued");
        true
    }

    /// Spawn the workers
    #[instrument(skip(self, executor), fields(workers = self.worker_count))]
    pub fn start(&self, executor: Arc<dyn JobExecutor>) -> Result<(), WorkPoolError> {
        {
            let mut status = self.status.lock();
            match *status {
                WorkPoolStatus::Running => return Err(WorkPoolError::AlreadyRunning),
                WorkPoolStatus::Stopped => return Err(WorkPoolError::Stopped),
                WorkPoolStatus::Idle => *status = WorkPoolStatus::Running,
            }
        }

        info!(workers = self.worker_count, "Starting work pool");
        let mut handles = self.handles.lock();
        for worker in 0..self.worker_count {
            let queue = self.queue.clone();
            let executor = executor.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker_loop(worker, queue, executor, shutdown_rx)));
        }
        Ok(())
    }

    /// Stop taking jobs and wait for running ones to finish
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), WorkPoolError> {
        {
            let mut status = self.status.lock();
            if *status == WorkPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkPoolStatus::Stopped;
        }

        info!("Stopping work pool");
        let _ = self.shutdown_tx.send(true);
        self.queue.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!("Work pool shutdown timed out");
            return Err(WorkPoolError::ShutdownTimeout);
        }
        info!("Work pool stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<PoolQueue>,
    executor: Arc<dyn JobExecutor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker, "Worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = queue.heap.lock().pop();
        let Some(Reverse(job_id)) = next else {
            tokio::select! {
                _ = queue.notify.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        debug!(worker, job_id, "Running job");
        let run = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.run_job(job_id).await })
        };
        if let Err(e) = run.await {
            error!(worker, job_id, error = %e, "Job execution aborted");
        }
        queue.tracked.remove(&job_id);
    }
    debug!(worker, "Worker stopped");
}
