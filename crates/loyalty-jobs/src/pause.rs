//! Global pause gate
//!
//! A single versioned value (resume deadline + version) shared by every worker.
//! Each update replaces the whole value in one transition, so concurrent
//! callers never leave a half-written state behind. The last caller wins: a
//! later, shorter pause shortens the window.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest pause window, the same horizon tokio uses for a far-future instant
const MAX_PAUSE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Snapshot of the pause gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseState {
    resume_at: Option<Instant>,
    version: u64,
}

impl PauseState {
    /// Deadline of the current pause window, if one was ever set
    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    /// Number of updates applied to the gate
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether dispatch is halted at `now`
    pub fn is_paused_at(&self, now: Instant) -> bool {
        self.resume_at.is_some_and(|deadline| now < deadline)
    }

    /// Time left in the window at `now`
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.resume_at
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

/// Process-wide gate checked by workers before they dequeue
///
/// Waiters are woken on every update and when the window elapses.
#[derive(Debug)]
pub struct PauseGate {
    state: watch::Sender<PauseState>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(PauseState::default()),
        }
    }

    /// Halt dispatch for `delay` from now, replacing any current window
    ///
    /// Delays longer than thirty years are capped.
    pub fn pause_for(&self, delay: Duration) -> PauseState {
        let resume_at = Instant::now() + delay.min(MAX_PAUSE);
        let mut snapshot = PauseState::default();
        self.state.send_modify(|state| {
            state.resume_at = Some(resume_at);
            state.version += 1;
            snapshot = *state;
        });
        debug!(
            delay_ms = delay.as_millis() as u64,
            version = snapshot.version,
            "Dispatch paused"
        );
        snapshot
    }

    /// Lift the current window immediately
    pub fn resume(&self) -> PauseState {
        let mut snapshot = PauseState::default();
        self.state.send_modify(|state| {
            state.resume_at = None;
            state.version += 1;
            snapshot = *state;
        });
        debug!(version = snapshot.version, "Dispatch resumed");
        snapshot
    }

    /// Current snapshot
    pub fn state(&self) -> PauseState {
        *self.state.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.state().is_paused_at(Instant::now())
    }

    /// Wait until the gate is open
    ///
    /// Returns `false` if `shutdown` fires first.
    pub async fn wait_open(&self, shutdown: &CancellationToken) -> bool {
        let mut updates = self.state.subscribe();
        loop {
            let state = *updates.borrow_and_update();
            let deadline = match state.resume_at {
                Some(deadline) if Instant::now() < deadline => deadline,
                _ => return true,
            };

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => {}
                changed = updates.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pause_window_elapses() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());

        let state = gate.pause_for(Duration::from_secs(30));
        assert_eq!(state.version(), 1);
        assert!(gate.is_paused());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(gate.is_paused());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!gate.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_writer_wins() {
        let gate = PauseGate::new();
        gate.pause_for(Duration::from_secs(60));
        let state = gate.pause_for(Duration::from_secs(5));

        assert_eq!(state.version(), 2);
        assert_eq!(state.remaining_at(Instant::now()), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!gate.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_saturates() {
        let gate = PauseGate::new();
        let state = gate.pause_for(Duration::MAX);

        assert!(gate.is_paused());
        assert_eq!(state.remaining_at(Instant::now()), MAX_PAUSE);

        gate.resume();
        assert!(!gate.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_open_blocks_for_window() {
        let gate = PauseGate::new();
        let shutdown = CancellationToken::new();
        gate.pause_for(Duration::from_secs(10));

        let start = Instant::now();
        assert!(gate.wait_open(&shutdown).await);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_open_follows_resume() {
        let gate = std::sync::Arc::new(PauseGate::new());
        let shutdown = CancellationToken::new();
        let start = Instant::now();
        gate.pause_for(Duration::from_secs(3600));

        let waiter = {
            let gate = gate.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { gate.wait_open(&shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.resume();

        assert!(waiter.await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_open_interrupted_by_shutdown() {
        let gate = PauseGate::new();
        let shutdown = CancellationToken::new();
        gate.pause_for(Duration::from_secs(60));
        shutdown.cancel();

        assert!(!gate.wait_open(&shutdown).await);
    }
}
