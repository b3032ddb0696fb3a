//! Job queue with a fixed worker pool
//!
//! Workers are long-lived tasks pulling from one shared FIFO backlog. Before
//! dequeuing, a worker waits on the [`PauseGate`]; the gate is re-checked under
//! the backlog lock so no job leaves the backlog while a pause is in effect.
//! Delayed jobs wait on a timer task and join the backlog when it fires.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::job::{Job, JobContext, JobHandler, NextAction};
use crate::pause::PauseGate;
use crate::retry::duration_millis;

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueueConfig {
    /// Name used in logs
    pub name: String,

    /// Number of workers
    pub worker_count: usize,

    /// How long shutdown waits for in-flight jobs
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            name: "jobs".to_string(),
            worker_count: 2,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl JobQueueConfig {
    /// Create a configuration with the given queue name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the number of workers (at least one)
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Job queue status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobQueueStatus {
    /// Accepting jobs, workers not started yet
    Created,
    /// Workers are dispatching jobs
    Running,
    /// Shutdown requested, waiting for in-flight jobs
    Draining,
    /// All workers have exited
    Stopped,
}

/// Job queue errors
#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    /// Workers already started
    #[error("job queue is already running")]
    AlreadyRunning,

    /// The queue was shut down and cannot be restarted
    #[error("job queue has been shut down")]
    Stopped,

    /// In-flight jobs did not finish within the grace period
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

struct Backlog<J: Job> {
    jobs: VecDeque<J>,
    /// Keys of jobs that are queued or waiting on a timer
    pending: HashSet<J::Key>,
}

struct Inner<J: Job> {
    config: JobQueueConfig,
    backlog: Mutex<Backlog<J>>,
    available: Notify,
    pause: PauseGate,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    status: Mutex<JobQueueStatus>,
}

/// Bounded-concurrency job queue
///
/// Cloning the queue yields another handle to the same backlog and workers.
///
/// # Example
///
/// ```ignore
/// use loyalty_jobs::{JobQueue, JobQueueConfig};
///
/// let queue = JobQueue::new(JobQueueConfig::new("accrual").with_worker_count(2));
/// queue.start(Arc::new(handler))?;
///
/// queue.enqueue(job);
/// queue.schedule(other_job, Duration::from_secs(60));
///
/// // ... later, graceful shutdown
/// queue.shutdown().await?;
/// ```
pub struct JobQueue<J: Job> {
    inner: Arc<Inner<J>>,
}

impl<J: Job> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<J: Job> std::fmt::Debug for JobQueue<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.inner.config.name)
            .field("status", &self.status())
            .field("backlog", &self.backlog_len())
            .finish()
    }
}

impl<J: Job> JobQueue<J> {
    /// Create a queue; jobs submitted before [`JobQueue::start`] wait in the backlog
    pub fn new(config: JobQueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                backlog: Mutex::new(Backlog {
                    jobs: VecDeque::new(),
                    pending: HashSet::new(),
                }),
                available: Notify::new(),
                pause: PauseGate::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                status: Mutex::new(JobQueueStatus::Created),
            }),
        }
    }

    /// Spawn the workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<H>(&self, handler: Arc<H>) -> Result<(), JobQueueError>
    where
        H: JobHandler<J> + ?Sized,
    {
        {
            let mut status = self.inner.status.lock();
            match *status {
                JobQueueStatus::Created => *status = JobQueueStatus::Running,
                JobQueueStatus::Running => return Err(JobQueueError::AlreadyRunning),
                JobQueueStatus::Draining | JobQueueStatus::Stopped => {
                    return Err(JobQueueError::Stopped)
                }
            }
        }

        info!(
            queue = %self.inner.config.name,
            worker_count = self.inner.config.worker_count,
            "Starting job queue"
        );

        for worker in 0..self.inner.config.worker_count {
            let inner = Arc::clone(&self.inner);
            let handler = Arc::clone(&handler);
            self.inner
                .tracker
                .spawn(async move { inner.run_worker(handler, worker).await });
        }

        Ok(())
    }

    /// Append a job to the backlog
    ///
    /// Returns `false` if the job was discarded: the queue is shut down or a
    /// job with the same key is already pending.
    pub fn enqueue(&self, job: J) -> bool {
        self.inner.enqueue(job)
    }

    /// Submit a job once `delay` has elapsed
    ///
    /// Returns immediately; `false` under the same conditions as
    /// [`JobQueue::enqueue`]. Must be called from within a Tokio runtime.
    pub fn schedule(&self, job: J, delay: Duration) -> bool {
        self.inner.schedule(job, delay)
    }

    /// Halt dispatch for `delay`, replacing any current pause
    ///
    /// Running jobs are not interrupted and the backlog is kept.
    pub fn pause_and_resume(&self, delay: Duration) {
        self.inner.pause.pause_for(delay);
    }

    pub fn pause_gate(&self) -> &PauseGate {
        &self.inner.pause
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.is_paused()
    }

    /// Jobs waiting in the backlog (scheduled jobs not yet due are not counted)
    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.lock().jobs.len()
    }

    /// Whether a job with this key is queued or scheduled
    pub fn is_pending(&self, key: &J::Key) -> bool {
        self.inner.backlog.lock().pending.contains(key)
    }

    pub fn status(&self) -> JobQueueStatus {
        *self.inner.status.lock()
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.inner.config
    }

    /// Stop dispatching and wait for in-flight jobs
    ///
    /// Queued and scheduled jobs are discarded. Afterwards every submission is
    /// a no-op. Returns [`JobQueueError::ShutdownTimeout`] if running jobs
    /// outlive the configured grace period.
    #[instrument(skip(self), fields(queue = %self.inner.config.name))]
    pub async fn shutdown(&self) -> Result<(), JobQueueError> {
        {
            let mut status = self.inner.status.lock();
            if *status == JobQueueStatus::Stopped {
                return Ok(());
            }
            *status = JobQueueStatus::Draining;
        }

        info!("Initiating graceful shutdown");
        self.inner.shutdown.cancel();

        let discarded = {
            let mut backlog = self.inner.backlog.lock();
            let discarded = backlog.jobs.len();
            backlog.jobs.clear();
            backlog.pending.clear();
            discarded
        };
        if discarded > 0 {
            warn!(discarded, "Discarding queued jobs");
        }

        self.inner.tracker.close();
        let result =
            tokio::time::timeout(self.inner.config.shutdown_timeout, self.inner.tracker.wait())
                .await;

        *self.inner.status.lock() = JobQueueStatus::Stopped;

        match result {
            Ok(()) => {
                info!("Job queue stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    remaining_tasks = self.inner.tracker.len(),
                    "Shutdown timeout reached"
                );
                Err(JobQueueError::ShutdownTimeout)
            }
        }
    }
}

impl<J: Job> Inner<J> {
    fn enqueue(&self, job: J) -> bool {
        let key = job.key();
        {
            let mut backlog = self.backlog.lock();
            if self.shutdown.is_cancelled() {
                warn!(queue = %self.config.name, kind = job.kind(), ?key, "Queue is shut down, discarding job");
                return false;
            }
            if !backlog.pending.insert(key.clone()) {
                debug!(queue = %self.config.name, kind = job.kind(), ?key, "Job already pending, skipping");
                return false;
            }
            backlog.jobs.push_back(job);
        }

        trace!(queue = %self.config.name, ?key, "Job enqueued");
        self.available.notify_one();
        true
    }

    fn schedule(self: &Arc<Self>, job: J, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.enqueue(job);
        }

        let key = job.key();
        {
            let mut backlog = self.backlog.lock();
            if self.shutdown.is_cancelled() {
                warn!(queue = %self.config.name, kind = job.kind(), ?key, "Queue is shut down, discarding job");
                return false;
            }
            if !backlog.pending.insert(key.clone()) {
                debug!(queue = %self.config.name, kind = job.kind(), ?key, "Job already pending, skipping");
                return false;
            }
        }

        debug!(
            queue = %self.config.name,
            kind = job.kind(),
            ?key,
            delay_ms = delay.as_millis() as u64,
            "Job scheduled"
        );

        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {
                    trace!(queue = %inner.config.name, ?key, "Scheduled job dropped on shutdown");
                }
                _ = tokio::time::sleep(delay) => inner.push_claimed(job),
            }
        });
        true
    }

    /// Push a job whose key was claimed when it was scheduled
    fn push_claimed(&self, job: J) {
        {
            let mut backlog = self.backlog.lock();
            if self.shutdown.is_cancelled() {
                return;
            }
            backlog.jobs.push_back(job);
        }
        self.available.notify_one();
    }

    async fn run_worker<H>(self: Arc<Self>, handler: Arc<H>, worker: usize)
    where
        H: JobHandler<J> + ?Sized,
    {
        debug!(queue = %self.config.name, worker, "Worker started");

        while let Some(job) = self.next_job().await {
            let next = self.execute(&handler, job, worker).await;
            self.apply(next);
        }

        debug!(queue = %self.config.name, worker, "Worker exited");
    }

    /// Wait for the gate to open and a job to become available
    ///
    /// Returns `None` once shutdown is requested.
    async fn next_job(&self) -> Option<J> {
        loop {
            if !self.pause.wait_open(&self.shutdown).await {
                return None;
            }

            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (job, more) = {
                let mut backlog = self.backlog.lock();
                if self.shutdown.is_cancelled() {
                    return None;
                }
                if self.pause.is_paused() {
                    continue;
                }
                let job = backlog.jobs.pop_front();
                if let Some(job) = &job {
                    backlog.pending.remove(&job.key());
                }
                (job, !backlog.jobs.is_empty())
            };

            if let Some(job) = job {
                if more {
                    self.available.notify_one();
                }
                return Some(job);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    /// Run the handler on its own task so a panic only loses this job
    async fn execute<H>(&self, handler: &Arc<H>, job: J, worker: usize) -> NextAction<J>
    where
        H: JobHandler<J> + ?Sized,
    {
        let kind = job.kind();
        let key = job.key();
        trace!(queue = %self.config.name, worker, kind, ?key, "Dispatching job");

        let ctx = JobContext::new(worker, self.shutdown.clone());
        let handler = Arc::clone(handler);
        match tokio::spawn(async move { handler.handle(job, ctx).await }).await {
            Ok(next) => next,
            Err(e) => {
                error!(queue = %self.config.name, worker, kind, ?key, "Job failed: {}", e);
                NextAction::Done
            }
        }
    }

    fn apply(self: &Arc<Self>, next: NextAction<J>) {
        match next {
            NextAction::Done => {}
            NextAction::Enqueue(job) => {
                self.enqueue(job);
            }
            NextAction::Schedule { job, delay } => {
                self.schedule(job, delay);
            }
            NextAction::PauseThenEnqueue { job, pause } => {
                self.pause.pause_for(pause);
                self.enqueue(job);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = JobQueueConfig::default();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder() {
        let config = JobQueueConfig::new("accrual")
            .with_worker_count(0)
            .with_shutdown_timeout(Duration::from_secs(5));

        assert_eq!(config.name, "accrual");
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_serialization() {
        let config = JobQueueConfig::new("accrual").with_worker_count(4);
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["worker_count"], 4);
        assert_eq!(json["shutdown_timeout"], 30_000);
    }
}
