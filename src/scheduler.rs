// Timer scheduling behind a trait so retry waits can run on a virtual clock.
//
// `TokioScheduler` is what the binary uses. `VirtualScheduler` only moves
// when told to, which makes backoff traces deterministic in tests.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Work to run once a timer fires.
pub type Task = BoxFuture<'static, ()>;

/// Cancellation handle for one scheduled task.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the task from running if it has not fired yet. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub trait Scheduler: Send + Sync {
    /// Runs `task` after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Wall-clock timers on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let token = handle.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::trace!("Scheduled task cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    task.await;
                }
            }
        });

        handle
    }
}

struct PendingTimer {
    due: Duration,
    seq: u64,
    token: CancellationToken,
    task: Task,
}

#[derive(Default)]
struct VirtualClock {
    now: Duration,
    seq: u64,
    pending: Vec<PendingTimer>,
}

/// Manually advanced clock.
///
/// Fired tasks are spawned on the current tokio runtime, so `advance` must be
/// called from inside one. A timer scheduled by a task that fired during an
/// `advance` is picked up by the next `advance`.
#[derive(Default)]
pub struct VirtualScheduler {
    clock: Mutex<VirtualClock>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Timers that are still waiting and not cancelled.
    pub fn pending(&self) -> usize {
        self.clock
            .lock()
            .pending
            .iter()
            .filter(|t| !t.token.is_cancelled())
            .count()
    }

    /// Deadline of the earliest live timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.clock
            .lock()
            .pending
            .iter()
            .filter(|t| !t.token.is_cancelled())
            .map(|t| t.due)
            .min()
    }

    /// Moves the clock forward, firing every live timer due on the way in
    /// deadline order. Returns how many tasks fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        let mut fired = 0;

        loop {
            let next = {
                let mut clock = self.clock.lock();
                clock.pending.retain(|t| !t.token.is_cancelled());

                let earliest = clock
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i);

                earliest.map(|i| {
                    let timer = clock.pending.swap_remove(i);
                    clock.now = timer.due;
                    timer
                })
            };

            match next {
                Some(timer) => {
                    tokio::spawn(timer.task);
                    fired += 1;
                }
                None => break,
            }
        }

        self.clock.lock().now = target;
        fired
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut clock = self.clock.lock();
        clock.seq += 1;
        let timer = PendingTimer {
            due: clock.now.saturating_add(delay),
            seq: clock.seq,
            token: handle.token.clone(),
            task,
        };
        clock.pending.push(timer);
        handle
    }
}
