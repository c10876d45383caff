//! Background apply worker.
//!
//! The worker drains the [`ApplyQueue`] and drives each entry through a small
//! state machine:
//!
//! ```text
//! Fetch ──finished──────────────────────────► Done
//!   │  ──not ready / transient error────────► Defer
//!   └──confirmable──► Apply ──accepted──────► Done
//!                       │  ──409 / transient─► Defer
//!                       └──404 / rejected───► Done
//! ```
//!
//! `Defer` puts the entry back with the retry interval. There is no attempt
//! cap: a run stays queued until it is applied, reaches a terminal status, or
//! disappears.

use std::sync::Arc;
use std::time::Duration;

use autoapply::{
    ApplyResult, AutoApplyError, OrchestrationApi, RetryPolicy, RunReadiness, RunStatus,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::queue::{ApplyQueue, QueueEntry};

/// Default delay before a deferred run is polled again.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Why an entry was deferred.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    /// The run has not reached a confirmable status yet.
    NotReady(RunStatus),
    /// The platform answered the apply with 409.
    NotConfirmable,
    /// A transient platform failure.
    Transient(AutoApplyError),
}

/// How processing of an entry ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DoneOutcome {
    /// The platform accepted the apply.
    Applied,
    /// The run was already in a terminal status; nothing was applied.
    AlreadyFinished(RunStatus),
    /// The run no longer exists.
    Vanished,
    /// A non-retryable failure; the entry is dropped.
    Abandoned(AutoApplyError),
}

/// Per-entry state of the apply state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    Fetch(QueueEntry),
    Apply(QueueEntry),
    Defer {
        entry: QueueEntry,
        delay: Duration,
        reason: DeferReason,
    },
    Done {
        entry: QueueEntry,
        outcome: DoneOutcome,
    },
}

impl WorkerState {
    /// Returns `true` for `Defer` and `Done`, which [`ApplyWorker::advance`]
    /// leaves unchanged.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Defer { .. } | Self::Done { .. })
    }
}

/// Drains the apply queue against the platform API.
pub struct ApplyWorker {
    api: Arc<dyn OrchestrationApi>,
    queue: ApplyQueue,
    retry_interval: Duration,
}

impl ApplyWorker {
    /// Creates a worker consuming `queue`.
    pub fn new(api: Arc<dyn OrchestrationApi>, queue: ApplyQueue) -> Self {
        Self {
            api,
            queue,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Overrides the delay applied on every deferral.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Spawns the worker loop on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Processes entries until the task is aborted.
    pub async fn run(self) {
        info!(retry_interval_secs = self.retry_interval.as_secs(), "apply worker started");
        loop {
            self.run_once().await;
        }
    }

    /// Dequeues one entry, drives it to `Defer` or `Done`, and re-queues it
    /// when deferred. Returns the settled state.
    pub async fn run_once(&self) -> WorkerState {
        let entry = self.queue.dequeue().await;
        self.process(entry).await
    }

    #[instrument(skip(self, entry), fields(run_id = %entry.run_id, deferrals = entry.deferrals))]
    async fn process(&self, entry: QueueEntry) -> WorkerState {
        let mut state = WorkerState::Fetch(entry);
        while !state.is_settled() {
            state = self.advance(state).await;
        }

        match &state {
            WorkerState::Defer {
                entry,
                delay,
                reason,
            } => {
                debug!(?reason, delay_secs = delay.as_secs(), "deferring run");
                self.queue.requeue(entry.clone(), *delay);
            }
            WorkerState::Done { entry, outcome } => match outcome {
                DoneOutcome::Applied => info!(
                    first_queued_at = %entry.first_queued_at,
                    "successfully applied run"
                ),
                DoneOutcome::AlreadyFinished(status) => {
                    info!(%status, "run already finished; removing from queue")
                }
                DoneOutcome::Vanished => warn!("run no longer exists; removing from queue"),
                DoneOutcome::Abandoned(err) => {
                    warn!(error = %err, "unrecoverable failure; removing from queue")
                }
            },
            WorkerState::Fetch(_) | WorkerState::Apply(_) => {}
        }
        state
    }

    /// Performs one transition. `Defer` and `Done` are returned unchanged.
    pub async fn advance(&self, state: WorkerState) -> WorkerState {
        match state {
            WorkerState::Fetch(entry) => self.fetch(entry).await,
            WorkerState::Apply(entry) => self.apply(entry).await,
            settled => settled,
        }
    }

    async fn fetch(&self, entry: QueueEntry) -> WorkerState {
        match self.api.get_run(&entry.run_id).await {
            Ok(run) => match run.readiness() {
                RunReadiness::Finished => WorkerState::Done {
                    entry,
                    outcome: DoneOutcome::AlreadyFinished(run.status),
                },
                RunReadiness::Confirmable => WorkerState::Apply(entry),
                RunReadiness::NotReady => self.defer(entry, DeferReason::NotReady(run.status), None),
            },
            Err(AutoApplyError::UpstreamNotFound { .. }) => WorkerState::Done {
                entry,
                outcome: DoneOutcome::Vanished,
            },
            Err(err) => self.on_error(entry, err),
        }
    }

    async fn apply(&self, entry: QueueEntry) -> WorkerState {
        match self.api.apply_run(&entry.run_id).await {
            Ok(ApplyResult::Accepted) => WorkerState::Done {
                entry,
                outcome: DoneOutcome::Applied,
            },
            Ok(ApplyResult::NotConfirmable) => self.defer(entry, DeferReason::NotConfirmable, None),
            Ok(ApplyResult::NotFound) => WorkerState::Done {
                entry,
                outcome: DoneOutcome::Vanished,
            },
            Err(err) => self.on_error(entry, err),
        }
    }

    fn on_error(&self, entry: QueueEntry, err: AutoApplyError) -> WorkerState {
        match err.retry_policy() {
            RetryPolicy::Retryable { after } => {
                self.defer(entry, DeferReason::Transient(err), after)
            }
            RetryPolicy::NonRetryable => WorkerState::Done {
                entry,
                outcome: DoneOutcome::Abandoned(err),
            },
        }
    }

    fn defer(&self, entry: QueueEntry, reason: DeferReason, after: Option<Duration>) -> WorkerState {
        let delay = after.map_or(self.retry_interval, |after| after.max(self.retry_interval));
        WorkerState::Defer {
            entry,
            delay,
            reason,
        }
    }
}
