//! Job and handler contracts

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A unit of work carried by the queue
///
/// Jobs are plain data. The queue keeps at most one pending copy per
/// [`Job::key`]; a second submission while the first is still waiting is
/// dropped.
pub trait Job: Clone + Send + Sync + fmt::Debug + 'static {
    /// Identity used for de-duplication of pending jobs
    type Key: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static;

    fn key(&self) -> Self::Key;

    /// Short label for logs
    fn kind(&self) -> &'static str;
}

/// What the worker should do once a handler returns
///
/// Handlers never touch the queue themselves; they describe the follow-up and
/// the worker applies it.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction<J> {
    /// Nothing further
    Done,

    /// Put the job at the back of the backlog
    Enqueue(J),

    /// Submit the job after `delay`
    Schedule { job: J, delay: Duration },

    /// Halt all dispatch for `pause`, then enqueue the job
    ///
    /// The job sits in the backlog and runs once the pause lifts.
    PauseThenEnqueue { job: J, pause: Duration },
}

/// Per-execution context handed to a handler
#[derive(Debug, Clone)]
pub struct JobContext {
    worker: usize,
    shutdown: CancellationToken,
}

impl JobContext {
    /// Create a context outside a queue, e.g. to drive a handler directly
    pub fn new(worker: usize, shutdown: CancellationToken) -> Self {
        Self { worker, shutdown }
    }

    /// Index of the worker running the job
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Whether the queue has started shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves when the queue starts shutting down
    pub fn shutdown_requested(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }
}

/// Executes jobs of type `J`
#[async_trait]
pub trait JobHandler<J: Job>: Send + Sync + 'static {
    async fn handle(&self, job: J, ctx: JobContext) -> NextAction<J>;
}
