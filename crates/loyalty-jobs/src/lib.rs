//! # Loyalty Jobs
//!
//! In-process job queue with a fixed pool of workers.
//!
//! ## Features
//!
//! - **Immediate and delayed submission**: `enqueue` appends to a shared FIFO
//!   backlog, `schedule` hands the job over once a timer fires
//! - **Global pause**: `pause_and_resume` halts all dispatch for a window;
//!   running jobs finish, the backlog is kept
//! - **De-duplication**: at most one pending job per key
//! - **Trampolining**: handlers return a [`NextAction`] and the worker applies
//!   it, so handlers never hold a reference to the queue
//! - **Graceful shutdown**: cooperative cancellation with a bounded grace period
//!
//! ## Example
//!
//! ```ignore
//! use loyalty_jobs::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct Ping(u32);
//!
//! impl Job for Ping {
//!     type Key = u32;
//!     fn key(&self) -> u32 { self.0 }
//!     fn kind(&self) -> &'static str { "ping" }
//! }
//!
//! struct PingHandler;
//!
//! #[async_trait]
//! impl JobHandler<Ping> for PingHandler {
//!     async fn handle(&self, job: Ping, _ctx: JobContext) -> NextAction<Ping> {
//!         NextAction::Schedule { job, delay: Duration::from_secs(1) }
//!     }
//! }
//!
//! let queue = JobQueue::new(JobQueueConfig::new("ping"));
//! queue.start(Arc::new(PingHandler))?;
//! queue.enqueue(Ping(1));
//! ```

pub mod job;
pub mod pause;
pub mod queue;
pub mod retry;

pub use job::{Job, JobContext, JobHandler, NextAction};
pub use pause::{PauseGate, PauseState};
pub use queue::{JobQueue, JobQueueConfig, JobQueueError, JobQueueStatus};
pub use retry::RetryPolicy;

/// Prelude for common imports
pub mod prelude {
    pub use crate::job::{Job, JobContext, JobHandler, NextAction};
    pub use crate::queue::{JobQueue, JobQueueConfig, JobQueueError};
    pub use crate::retry::RetryPolicy;
    pub use async_trait::async_trait;
}
