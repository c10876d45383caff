//! Port traits implemented by infrastructure crates.
//!
//! The domain only depends on these traits. `tfc` implements
//! [`OrchestrationApi`] and [`TaskResultReporter`] over HTTP; `applier`
//! implements [`ApplyScheduler`] with its in-memory queue. Tests substitute
//! fakes for all three.

use async_trait::async_trait;

use crate::{
    ApplyResult, AutoApplyError, RunDetail, RunId, RunTriggerDetail, RunTriggerId, TaskCallback,
    TaskResult, WorkspaceDetail, WorkspaceId,
};

/// Authenticated access to the orchestration platform's API.
///
/// Implementations never interpret run status; they return it raw inside
/// [`RunDetail`] for the domain to classify.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    /// Reads a run.
    ///
    /// # Errors
    ///
    /// - [`AutoApplyError::UpstreamUnavailable`] on network failures and 5xx.
    /// - [`AutoApplyError::UpstreamNotFound`] if the run id is unknown.
    /// - [`AutoApplyError::UpstreamRejected`] on other failures.
    async fn get_run(&self, run_id: &RunId) -> Result<RunDetail, AutoApplyError>;

    /// Reads a run-trigger connection. Same error mapping as [`Self::get_run`].
    async fn get_run_trigger(
        &self,
        trigger_id: &RunTriggerId,
    ) -> Result<RunTriggerDetail, AutoApplyError>;

    /// Reads a workspace. Same error mapping as [`Self::get_run`].
    async fn get_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<WorkspaceDetail, AutoApplyError>;

    /// Requests an apply of a run.
    ///
    /// Accepted, 409 and 404 are reported as [`ApplyResult`] values.
    ///
    /// # Errors
    ///
    /// - [`AutoApplyError::UpstreamUnavailable`] on network failures and 5xx.
    /// - [`AutoApplyError::ApplyRejected`] for any other unexpected status.
    async fn apply_run(&self, run_id: &RunId) -> Result<ApplyResult, AutoApplyError>;
}

/// Reports run-task results back to the platform's callback URL.
#[async_trait]
pub trait TaskResultReporter: Send + Sync {
    /// Sends `result` to `callback`.
    ///
    /// # Errors
    ///
    /// [`AutoApplyError::UpstreamUnavailable`] or
    /// [`AutoApplyError::UpstreamRejected`] when the platform does not accept
    /// the result.
    async fn report(
        &self,
        callback: &TaskCallback,
        result: &TaskResult,
    ) -> Result<(), AutoApplyError>;
}

/// Whether [`ApplyScheduler::schedule`] added a new queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new entry was appended.
    Queued,
    /// The run id was already waiting; nothing was appended.
    AlreadyQueued,
}

/// Accepts run ids for eventual apply.
///
/// Scheduling never blocks and never fails: the backing queue is unbounded.
pub trait ApplyScheduler: Send + Sync {
    /// Schedules `run_id` for apply as soon as the worker picks it up.
    fn schedule(&self, run_id: RunId) -> ScheduleOutcome;
}
