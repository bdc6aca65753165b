//! Background job execution.
//!
//! A fixed pool of workers drains a FIFO queue of job ids. Workers own every
//! status transition: they start jobs, emit heartbeats while the executor
//! runs, enforce the per-job timeout, and record the outcome. A cancelled
//! pending job is dropped at pickup and never starts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::executors::{StageExecutor, StageFailure};
use crate::store::{JobStore, JobType, StoreError};

/// Errors from runner control operations.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Runner is already running")]
    AlreadyRunning,

    #[error("Runner is not running")]
    NotRunning,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub workers: usize,
    pub job_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout: Duration::from_secs(1800),
            heartbeat_interval: Duration::from_secs(15),
            stale_after: Duration::from_secs(3600),
        }
    }
}

impl RunnerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// The executor for each stage.
#[derive(Clone)]
pub struct Executors {
    pub ingest: Arc<dyn StageExecutor>,
    pub create: Arc<dyn StageExecutor>,
    pub curate: Arc<dyn StageExecutor>,
    pub save_as: Arc<dyn StageExecutor>,
}

impl Executors {
    fn for_type(&self, job_type: JobType) -> Arc<dyn StageExecutor> {
        match job_type {
            JobType::Ingest => Arc::clone(&self.ingest),
            JobType::Create => Arc::clone(&self.create),
            JobType::Curate => Arc::clone(&self.curate),
            JobType::SaveAs => Arc::clone(&self.save_as),
        }
    }
}

/// Counters shared across workers.
#[derive(Debug, Default)]
pub struct SharedRunnerStats {
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub timed_out: AtomicU64,
}

/// Point-in-time snapshot of the shared counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
}

/// What crash-recovery reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Stale resumable jobs returned to the queue.
    pub requeued: usize,
    /// Stale non-resumable jobs marked failed.
    pub abandoned: usize,
}

/// Executes pending jobs on a worker pool.
pub struct TaskRunner {
    store: JobStore,
    executors: Executors,
    config: RunnerConfig,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    cancelled: Arc<std::sync::Mutex<HashSet<Uuid>>>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<SharedRunnerStats>,
    running: AtomicBool,
}

impl TaskRunner {
    pub fn new(store: JobStore, executors: Executors, config: RunnerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            executors,
            config,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            cancelled: Arc::new(std::sync::Mutex::new(HashSet::new())),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            stats: Arc::new(SharedRunnerStats::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Adds a pending job to the queue.
    pub fn enqueue(&self, job_id: Uuid) {
        // Send only fails when all receivers are gone, i.e. after shutdown.
        if self.queue_tx.send(job_id).is_err() {
            warn!(job_id = %job_id, "enqueue after shutdown dropped");
        }
    }

    /// Marks a job cancelled. If it is still pending it will never start;
    /// a job already running is unaffected.
    pub fn cancel(&self, job_id: Uuid) {
        self.cancelled.lock().unwrap_or_else(|e| e.into_inner()).insert(job_id);
        debug!(job_id = %job_id, "job marked cancelled");
    }

    /// Reconciles stale running jobs, then spawns the worker pool.
    pub async fn start(self: &Arc<Self>) -> Result<ReconcileReport, RunnerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RunnerError::AlreadyRunning);
        }

        let report = self.reconcile().await?;

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.workers.max(1) {
            let runner = Arc::clone(self);
            // Subscribe before spawning: a broadcast send only reaches
            // receivers that already exist, so a worker must hold its
            // receiver before shutdown() can possibly fire.
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                runner.worker_loop(worker_id, shutdown_rx).await;
            }));
        }
        info!(workers = handles.len(), "runner started");
        Ok(report)
    }

    /// Finds running jobs with expired heartbeats and either requeues them
    /// (resumable stages) or marks them failed (save-as).
    pub async fn reconcile(&self) -> Result<ReconcileReport, RunnerError> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.stale_after)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let stale = self.store.find_stale_running(cutoff).await?;

        let mut report = ReconcileReport::default();
        for job in stale {
            if job.job_type.is_resumable() {
                if self.store.requeue_stale(job.id).await? {
                    self.enqueue(job.id);
                    report.requeued += 1;
                }
            } else if self
                .store
                .fail_stale(job.id, "StaleJobAbandoned: worker heartbeat expired")
                .await?
            {
                report.abandoned += 1;
            }
        }

        if report != ReconcileReport::default() {
            info!(
                requeued = report.requeued,
                abandoned = report.abandoned,
                "stale jobs reconciled"
            );
        }
        Ok(report)
    }

    /// Signals shutdown and waits for the workers to drain.
    pub async fn shutdown(&self) -> Result<(), RunnerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RunnerError::NotRunning);
        }

        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("runner stopped");
        Ok(())
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
        }
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!(worker_id, "worker started");

        loop {
            let job_id = {
                let mut rx = self.queue_rx.lock().await;
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    job_id = rx.recv() => match job_id {
                        Some(id) => id,
                        None => break,
                    },
                }
            };

            self.process(worker_id, job_id).await;
        }

        debug!(worker_id, "worker stopped");
    }

    async fn process(&self, worker_id: usize, job_id: Uuid) {
        // Cancelled while pending: drop without starting.
        if self
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id)
        {
            info!(worker_id, job_id = %job_id, "cancelled job skipped");
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let job = match self.store.start(job_id).await {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { from, .. }) => {
                // Another worker or a reconcile pass got here first.
                debug!(job_id = %job_id, status = %from, "job not pending, skipping");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to start job");
                return;
            }
        };

        info!(worker_id, job_id = %job_id, job_type = %job.job_type, "job started");
        let executor = self.executors.for_type(job.job_type);

        let result = {
            let work = executor.execute(&job);
            tokio::pin!(work);

            let deadline = tokio::time::sleep(self.config.job_timeout);
            tokio::pin!(deadline);

            let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
            heartbeat.tick().await; // first tick fires immediately

            loop {
                tokio::select! {
                    result = &mut work => break result,
                    _ = &mut deadline => {
                        self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                        break Err(StageFailure::Timeout(format!(
                            "job exceeded {:?}", self.config.job_timeout
                        )));
                    }
                    _ = heartbeat.tick() => {
                        if let Err(e) = self.store.touch_heartbeat(job_id).await {
                            warn!(job_id = %job_id, error = %e, "heartbeat update failed");
                        }
                    }
                }
            }
        };

        match result {
            Ok(outcome) => {
                match self
                    .store
                    .complete(job_id, &outcome.output_file, Some(outcome.stats))
                    .await
                {
                    Ok(_) => {
                        self.stats.completed.fetch_add(1, Ordering::Relaxed);
                        info!(worker_id, job_id = %job_id, output = %outcome.output_file, "job completed");
                    }
                    Err(e) => error!(job_id = %job_id, error = %e, "failed to record completion"),
                }
            }
            Err(failure) => {
                let message = failure.to_string();
                match self.store.fail(job_id, &message).await {
                    Ok(_) => {
                        self.stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(worker_id, job_id = %job_id, error = %message, "job failed");
                    }
                    Err(e) => error!(job_id = %job_id, error = %e, "failed to record failure"),
                }
            }
        }
    }
}
