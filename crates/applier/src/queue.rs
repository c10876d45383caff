//! In-memory apply queue.
//!
//! An unbounded FIFO of [`QueueEntry`] shared between the callback handler
//! (producer) and the apply worker (consumer). Entries are never evicted. A
//! run id that is already waiting is not appended a second time; a run id
//! that is being processed may be queued again by a fresh callback.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use autoapply::{ApplyScheduler, RunId, ScheduleOutcome, Timestamp};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound on how long [`ApplyQueue::dequeue`] parks while only delayed
/// entries are waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A run id waiting for the apply worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub run_id: RunId,
    /// Earliest instant the worker may pick this entry up. `None` on first enqueue.
    pub not_before: Option<Instant>,
    /// Number of times this run has been deferred since it was first queued.
    pub deferrals: u32,
    /// When the callback first queued the run.
    pub first_queued_at: Timestamp,
}

impl QueueEntry {
    fn fresh(run_id: RunId) -> Self {
        Self {
            run_id,
            not_before: None,
            deferrals: 0,
            first_queued_at: Timestamp::now(),
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

#[derive(Default)]
struct State {
    entries: VecDeque<QueueEntry>,
    waiting: HashSet<RunId>,
}

struct Inner {
    state: Mutex<State>,
    available: Notify,
    poll_interval: Duration,
}

/// Shared handle to the apply queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct ApplyQueue {
    inner: Arc<Inner>,
}

impl Default for ApplyQueue {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ApplyQueue {
    /// Creates an empty queue. Waiting consumers re-check delayed entries at
    /// least every `poll_interval`.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                available: Notify::new(),
                poll_interval,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `run_id` for immediate processing.
    pub fn enqueue(&self, run_id: RunId) -> ScheduleOutcome {
        self.push(QueueEntry::fresh(run_id))
    }

    /// Appends `run_id` so that it is not picked up before `now + delay`.
    pub fn enqueue_delayed(&self, run_id: RunId, delay: Duration) -> ScheduleOutcome {
        self.requeue(QueueEntry::fresh(run_id), delay)
    }

    /// Puts a processed entry back with a deferral, keeping its history.
    pub fn requeue(&self, mut entry: QueueEntry, delay: Duration) -> ScheduleOutcome {
        entry.not_before = Some(Instant::now() + delay);
        entry.deferrals = entry.deferrals.saturating_add(1);
        self.push(entry)
    }

    fn push(&self, entry: QueueEntry) -> ScheduleOutcome {
        {
            let mut state = self.lock();
            if !state.waiting.insert(entry.run_id.clone()) {
                debug!(run_id = %entry.run_id, "run already queued");
                return ScheduleOutcome::AlreadyQueued;
            }
            state.entries.push_back(entry);
        }
        self.inner.available.notify_one();
        ScheduleOutcome::Queued
    }

    /// Removes and returns the oldest entry whose deadline has passed,
    /// suspending until one exists.
    pub async fn dequeue(&self) -> QueueEntry {
        loop {
            let park = {
                let mut state = self.lock();
                let now = Instant::now();
                if let Some(index) = state.entries.iter().position(|e| e.is_ready(now)) {
                    if let Some(entry) = state.entries.remove(index) {
                        state.waiting.remove(&entry.run_id);
                        return entry;
                    }
                }
                state
                    .entries
                    .iter()
                    .filter_map(|e| e.not_before)
                    .min()
                    .map(|at| at.saturating_duration_since(now).min(self.inner.poll_interval))
            };

            match park {
                // Only delayed entries: sleep until the earliest is due or a new
                // entry arrives.
                Some(delay) => {
                    let _ = tokio::time::timeout(delay, self.inner.available.notified()).await;
                }
                None => self.inner.available.notified().await,
            }
        }
    }

    /// Number of entries waiting, delayed or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no entries are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `run_id` is waiting in the queue.
    pub fn contains(&self, run_id: &RunId) -> bool {
        self.lock().waiting.contains(run_id)
    }
}

impl ApplyScheduler for ApplyQueue {
    fn schedule(&self, run_id: RunId) -> ScheduleOutcome {
        self.enqueue(run_id)
    }
}
