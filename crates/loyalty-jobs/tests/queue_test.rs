// Job queue integration tests
//
// Time-dependent tests run with a paused clock so pause windows and delays are
// exercised without sleeping for real.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use loyalty_jobs::{
    Job, JobContext, JobHandler, JobQueue, JobQueueConfig, JobQueueError, JobQueueStatus,
    NextAction,
};

#[derive(Debug, Clone, PartialEq)]
enum TestJob {
    /// Decrement the shared counter
    Count(u32),
    /// Sleep, ignoring shutdown
    Sleep { id: u32, duration: Duration },
    /// Sleep until shutdown is requested
    UntilShutdown(u32),
    Panic(u32),
    /// First run asks for a global pause, second run finishes
    RateLimited { id: u32, attempt: u32 },
    /// Re-schedules itself until `remaining` reaches zero
    Repeat { id: u32, remaining: u32 },
    /// Asks for the longest representable pause, then counts
    Throttled(u32),
}

impl Job for TestJob {
    type Key = u32;

    fn key(&self) -> u32 {
        match self {
            TestJob::Count(id)
            | TestJob::Sleep { id, .. }
            | TestJob::UntilShutdown(id)
            | TestJob::Panic(id)
            | TestJob::RateLimited { id, .. }
            | TestJob::Repeat { id, .. }
            | TestJob::Throttled(id) => *id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            TestJob::Count(_) => "count",
            TestJob::Sleep { .. } => "sleep",
            TestJob::UntilShutdown(_) => "until_shutdown",
            TestJob::Panic(_) => "panic",
            TestJob::RateLimited { .. } => "rate_limited",
            TestJob::Repeat { .. } => "repeat",
            TestJob::Throttled(_) => "throttled",
        }
    }
}

#[derive(Default)]
struct Recorder {
    counter: AtomicI64,
    runs: Mutex<Vec<(TestJob, Instant)>>,
}

impl Recorder {
    fn with_counter(value: i64) -> Arc<Self> {
        let recorder = Self::default();
        recorder.counter.store(value, Ordering::SeqCst);
        Arc::new(recorder)
    }

    fn runs(&self) -> Vec<(TestJob, Instant)> {
        self.runs.lock().clone()
    }

    fn runs_of(&self, id: u32) -> Vec<Instant> {
        self.runs
            .lock()
            .iter()
            .filter(|(job, _)| job.key() == id)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl JobHandler<TestJob> for Recorder {
    async fn handle(&self, job: TestJob, ctx: JobContext) -> NextAction<TestJob> {
        self.runs.lock().push((job.clone(), Instant::now()));

        match job {
            TestJob::Count(_) => {
                tokio::task::yield_now().await;
                self.counter.fetch_sub(1, Ordering::SeqCst);
                NextAction::Done
            }
            TestJob::Sleep { duration, .. } => {
                tokio::time::sleep(duration).await;
                NextAction::Done
            }
            TestJob::UntilShutdown(_) => {
                ctx.shutdown_requested().await;
                NextAction::Done
            }
            TestJob::Panic(id) => panic!("job {id} exploded"),
            TestJob::RateLimited { id, attempt: 0 } => NextAction::PauseThenEnqueue {
                job: TestJob::RateLimited { id, attempt: 1 },
                pause: Duration::from_secs(30),
            },
            TestJob::RateLimited { .. } => NextAction::Done,
            TestJob::Repeat { remaining: 0, .. } => NextAction::Done,
            TestJob::Repeat { id, remaining } => NextAction::Schedule {
                job: TestJob::Repeat {
                    id,
                    remaining: remaining - 1,
                },
                delay: Duration::from_secs(60),
            },
            TestJob::Throttled(id) => NextAction::PauseThenEnqueue {
                job: TestJob::Count(id),
                pause: Duration::MAX,
            },
        }
    }
}

fn queue(workers: usize) -> JobQueue<TestJob> {
    JobQueue::new(JobQueueConfig::new("test").with_worker_count(workers))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn drain_counter(workers: usize, jobs: u32) {
    let recorder = Recorder::with_counter(jobs as i64);
    let queue = queue(workers);
    queue.start(recorder.clone()).unwrap();

    for id in 0..jobs {
        assert!(queue.enqueue(TestJob::Count(id)));
    }

    wait_for(|| recorder.counter.load(Ordering::SeqCst) == 0).await;
    queue.shutdown().await.unwrap();

    assert_eq!(recorder.counter.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.runs().len(), jobs as usize);
}

#[test_log::test(tokio::test)]
async fn test_counter_drains_with_single_worker() {
    drain_counter(1, 200).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counter_drains_with_many_workers() {
    drain_counter(4, 1_000).await;
}

#[tokio::test]
async fn test_fifo_order_with_single_worker() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(1);

    for id in 0..20 {
        queue.enqueue(TestJob::Count(id));
    }
    queue.start(recorder.clone()).unwrap();

    wait_for(|| recorder.runs().len() == 20).await;
    let order: Vec<u32> = recorder.runs().iter().map(|(job, _)| job.key()).collect();
    assert_eq!(order, (0..20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_flight_waits_for_running_jobs() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(2);
    queue.start(recorder.clone()).unwrap();

    for id in 0..10 {
        queue.enqueue(TestJob::Sleep {
            id,
            duration: Duration::from_secs(1),
        });
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    queue.shutdown().await.unwrap();

    assert_eq!(queue.status(), JobQueueStatus::Stopped);
    assert_eq!(queue.backlog_len(), 0);
    assert_eq!(recorder.runs().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_cooperative_jobs() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(2);
    queue.start(recorder.clone()).unwrap();

    queue.enqueue(TestJob::UntilShutdown(1));
    queue.enqueue(TestJob::UntilShutdown(2));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let start = Instant::now();
    queue.shutdown().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_times_out_on_stuck_job() {
    let recorder = Arc::new(Recorder::default());
    let queue = JobQueue::new(
        JobQueueConfig::new("test")
            .with_worker_count(1)
            .with_shutdown_timeout(Duration::from_secs(1)),
    );
    queue.start(recorder.clone()).unwrap();

    queue.enqueue(TestJob::Sleep {
        id: 1,
        duration: Duration::from_secs(3600),
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let result = queue.shutdown().await;
    assert!(matches!(result, Err(JobQueueError::ShutdownTimeout)));
    assert_eq!(queue.status(), JobQueueStatus::Stopped);
}

#[tokio::test]
async fn test_shutdown_with_idle_workers() {
    let queue = queue(4);
    queue.start(Arc::new(Recorder::default())).unwrap();

    tokio::time::timeout(Duration::from_secs(5), queue.shutdown())
        .await
        .expect("shutdown deadlocked")
        .unwrap();
}

#[tokio::test]
async fn test_submissions_after_shutdown_are_discarded() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(1);
    queue.start(recorder.clone()).unwrap();
    queue.shutdown().await.unwrap();

    assert!(!queue.enqueue(TestJob::Count(1)));
    assert!(!queue.schedule(TestJob::Count(2), Duration::from_secs(1)));
    assert_eq!(queue.backlog_len(), 0);
    assert!(matches!(
        queue.start(recorder.clone()),
        Err(JobQueueError::Stopped)
    ));
}

#[tokio::test]
async fn test_start_twice_fails() {
    let queue = queue(1);
    queue.start(Arc::new(Recorder::default())).unwrap();

    assert!(matches!(
        queue.start(Arc::new(Recorder::default())),
        Err(JobQueueError::AlreadyRunning)
    ));
    queue.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pause_blocks_dispatch_for_window() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(2);
    queue.start(recorder.clone()).unwrap();

    let start = Instant::now();
    queue.pause_and_resume(Duration::from_secs(30));
    for id in 0..3 {
        queue.enqueue(TestJob::Count(id));
    }

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(recorder.runs().is_empty());
    assert_eq!(queue.backlog_len(), 3);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let runs = recorder.runs();
    assert_eq!(runs.len(), 3);
    assert!(runs
        .iter()
        .all(|(_, at)| at.duration_since(start) >= Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_later_pause_overrides_earlier() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(1);
    queue.start(recorder.clone()).unwrap();

    let start = Instant::now();
    queue.pause_and_resume(Duration::from_secs(60));
    queue.pause_and_resume(Duration::from_secs(10));
    queue.enqueue(TestJob::Count(1));

    tokio::time::sleep(Duration::from_secs(11)).await;
    let runs = recorder.runs_of(1);
    assert_eq!(runs.len(), 1);
    assert!(runs[0].duration_since(start) >= Duration::from_secs(10));
    assert!(runs[0].duration_since(start) < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_pause_then_enqueue_retries_once_after_window() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(2);
    queue.start(recorder.clone()).unwrap();

    let start = Instant::now();
    queue.enqueue(TestJob::RateLimited { id: 1, attempt: 0 });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(queue.is_paused());

    // Submitted during the window: must wait as well
    queue.enqueue(TestJob::Count(2));

    tokio::time::sleep(Duration::from_secs(60)).await;

    let first = recorder.runs_of(1);
    assert_eq!(first.len(), 2);
    assert!(first[1].duration_since(start) >= Duration::from_secs(30));

    let second = recorder.runs_of(2);
    assert_eq!(second.len(), 1);
    assert!(second[0].duration_since(start) >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_huge_pause_keeps_worker_alive() {
    let recorder = Recorder::with_counter(2);
    let queue = queue(1);
    queue.start(recorder.clone()).unwrap();

    queue.enqueue(TestJob::Throttled(1));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(queue.is_paused());

    queue.enqueue(TestJob::Count(2));
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(queue.backlog_len(), 2);

    queue.pause_gate().resume();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(recorder.counter.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.runs_of(1).len(), 2);
    assert_eq!(recorder.runs_of(2).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_fires_after_delay() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(1);
    queue.start(recorder.clone()).unwrap();

    assert!(queue.schedule(TestJob::Count(7), Duration::from_secs(60)));
    assert!(queue.is_pending(&7));

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(recorder.runs().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(recorder.runs_of(7).len(), 1);
    assert!(!queue.is_pending(&7));
}

#[tokio::test(start_paused = true)]
async fn test_schedule_trampoline_repeats() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(1);
    queue.start(recorder.clone()).unwrap();

    let start = Instant::now();
    queue.enqueue(TestJob::Repeat {
        id: 1,
        remaining: 3,
    });

    tokio::time::sleep(Duration::from_secs(300)).await;
    let runs = recorder.runs_of(1);
    assert_eq!(runs.len(), 4);
    for (n, at) in runs.iter().enumerate() {
        assert!(at.duration_since(start) >= Duration::from_secs(60 * n as u64));
    }
}

#[tokio::test]
async fn test_pending_duplicates_are_dropped() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(1);

    assert!(queue.enqueue(TestJob::Count(1)));
    assert!(!queue.enqueue(TestJob::Count(1)));
    assert!(!queue.schedule(TestJob::Count(1), Duration::from_secs(5)));
    assert!(queue.enqueue(TestJob::Count(2)));
    assert_eq!(queue.backlog_len(), 2);

    queue.start(recorder.clone()).unwrap();
    wait_for(|| recorder.runs().len() == 2).await;

    // Once dispatched, the key is free again
    assert!(queue.enqueue(TestJob::Count(1)));
    wait_for(|| recorder.runs_of(1).len() == 2).await;
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_job_does_not_kill_worker() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue(1);
    queue.start(recorder.clone()).unwrap();

    queue.enqueue(TestJob::Panic(1));
    queue.enqueue(TestJob::Count(2));

    wait_for(|| recorder.runs_of(2).len() == 1).await;
    queue.shutdown().await.unwrap();
}
