//! Shared value types for the auto-apply domain.
//!
//! Snapshots fetched from the platform ([`RunDetail`], [`WorkspaceDetail`],
//! [`RunTriggerDetail`]) are immutable and never cached: every decision and
//! every worker poll re-fetches them. [`CallbackPayload`] is the inbound
//! run-task message; it lives only for the duration of one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AutoApplyError, RunId, RunTriggerId, WorkspaceId};

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// A credential (API token, HMAC key, callback access token).
///
/// `Debug` output is redacted so secrets never reach logs through `{:?}`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the secret is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::str::FromStr for SecretString {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

// ---------------------------------------------------------------------------
// Run status and source
// ---------------------------------------------------------------------------

/// Status of a run as reported by the platform's `status` attribute.
///
/// Unknown values are kept verbatim in [`RunStatus::Other`] and classified as
/// not ready, so a new platform state never causes an apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Pending,
    FetchingConfiguration,
    PrePlanRunning,
    Queuing,
    PlanQueued,
    Planning,
    Planned,
    CostEstimating,
    CostEstimated,
    PolicyChecking,
    PolicyOverride,
    PolicySoftFailed,
    PolicyChecked,
    PostPlanRunning,
    PostPlanCompleted,
    /// The plan produced no changes; there is nothing to apply.
    PlannedAndFinished,
    Confirmed,
    ApplyQueued,
    Applying,
    Applied,
    Discarded,
    Errored,
    Canceled,
    ForceCanceled,
    Other(String),
}

impl RunStatus {
    /// Parses the platform's status string.
    pub fn from_api(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "fetching" => Self::FetchingConfiguration,
            "pre_plan_running" => Self::PrePlanRunning,
            "queuing" => Self::Queuing,
            "plan_queued" => Self::PlanQueued,
            "planning" => Self::Planning,
            "planned" => Self::Planned,
            "cost_estimating" => Self::CostEstimating,
            "cost_estimated" => Self::CostEstimated,
            "policy_checking" => Self::PolicyChecking,
            "policy_override" => Self::PolicyOverride,
            "policy_soft_failed" => Self::PolicySoftFailed,
            "policy_checked" => Self::PolicyChecked,
            "post_plan_running" => Self::PostPlanRunning,
            "post_plan_completed" => Self::PostPlanCompleted,
            "planned_and_finished" => Self::PlannedAndFinished,
            "confirmed" => Self::Confirmed,
            "apply_queued" => Self::ApplyQueued,
            "applying" => Self::Applying,
            "applied" => Self::Applied,
            "discarded" => Self::Discarded,
            "errored" => Self::Errored,
            "canceled" => Self::Canceled,
            "force_canceled" => Self::ForceCanceled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the platform's string form of this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::FetchingConfiguration => "fetching",
            Self::PrePlanRunning => "pre_plan_running",
            Self::Queuing => "queuing",
            Self::PlanQueued => "plan_queued",
            Self::Planning => "planning",
            Self::Planned => "planned",
            Self::CostEstimating => "cost_estimating",
            Self::CostEstimated => "cost_estimated",
            Self::PolicyChecking => "policy_checking",
            Self::PolicyOverride => "policy_override",
            Self::PolicySoftFailed => "policy_soft_failed",
            Self::PolicyChecked => "policy_checked",
            Self::PostPlanRunning => "post_plan_running",
            Self::PostPlanCompleted => "post_plan_completed",
            Self::PlannedAndFinished => "planned_and_finished",
            Self::Confirmed => "confirmed",
            Self::ApplyQueued => "apply_queued",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Discarded => "discarded",
            Self::Errored => "errored",
            Self::Canceled => "canceled",
            Self::ForceCanceled => "force_canceled",
            Self::Other(s) => s,
        }
    }

    /// Returns `true` if the run can never become confirmable again.
    ///
    /// `policy_soft_failed` is included: it needs an override, which this
    /// service never performs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PlannedAndFinished
                | Self::Applied
                | Self::Discarded
                | Self::Errored
                | Self::Canceled
                | Self::ForceCanceled
                | Self::PolicySoftFailed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------

/// How a run was initiated, from the platform's `source` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunSource {
    /// Queued by a run trigger after a source workspace applied.
    RunTrigger,
    /// Queued by a VCS push or a configuration-version upload.
    ConfigurationVersion,
    /// Started from the web UI.
    Ui,
    /// Started through the API.
    Api,
    /// Started from the Terraform CLI (`terraform plan/apply` with a cloud backend).
    Cli,
    Other(String),
}

impl RunSource {
    /// Parses the platform's source string.
    pub fn from_api(value: &str) -> Self {
        match value {
            "tfe-run-trigger" => Self::RunTrigger,
            "tfe-configuration-version" => Self::ConfigurationVersion,
            "tfe-ui" => Self::Ui,
            "tfe-api" => Self::Api,
            "terraform" | "terraform+cloud" => Self::Cli,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns a string form of this source (the canonical platform tag).
    pub fn as_str(&self) -> &str {
        match self {
            Self::RunTrigger => "tfe-run-trigger",
            Self::ConfigurationVersion => "tfe-configuration-version",
            Self::Ui => "tfe-ui",
            Self::Api => "tfe-api",
            Self::Cli => "terraform",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for RunSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Platform snapshots
// ---------------------------------------------------------------------------

/// What the apply worker should do with a run, derived from a [`RunDetail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReadiness {
    /// The run reached a terminal state; nothing to apply.
    Finished,
    /// The platform reports the run as confirmable; apply is permitted.
    Confirmable,
    /// The run is still progressing; poll again later.
    NotReady,
}

/// Snapshot of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDetail {
    pub id: RunId,
    pub status: RunStatus,
    pub source: RunSource,
    pub workspace_id: WorkspaceId,
    /// The `actions.is-confirmable` flag.
    pub is_confirmable: bool,
    /// Run trigger that queued this run, when the platform links one.
    pub run_trigger_id: Option<RunTriggerId>,
}

impl RunDetail {
    /// Classifies this snapshot. Terminal statuses win over the confirmable flag.
    pub fn readiness(&self) -> RunReadiness {
        if self.status.is_terminal() {
            RunReadiness::Finished
        } else if self.is_confirmable {
            RunReadiness::Confirmable
        } else {
            RunReadiness::NotReady
        }
    }
}

/// Snapshot of a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceDetail {
    pub id: WorkspaceId,
    pub name: Option<String>,
    /// The workspace's `auto-apply` setting.
    pub auto_apply_enabled: bool,
}

/// Snapshot of a run-trigger connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTriggerDetail {
    pub id: RunTriggerId,
    /// The upstream workspace whose apply queued the triggered run.
    pub source_workspace_id: WorkspaceId,
    pub source_workspace_name: Option<String>,
    /// The downstream workspace that receives triggered runs.
    pub workspace_id: WorkspaceId,
}

/// Outcome of the apply mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// 202: the platform accepted the apply.
    Accepted,
    /// 409: the run is not yet confirmable.
    NotConfirmable,
    /// 404: the run is gone.
    NotFound,
}

// ---------------------------------------------------------------------------
// Inbound callback
// ---------------------------------------------------------------------------

/// Enforcement level sent on the registration test call.
pub const TEST_ENFORCEMENT_LEVEL: &str = "test";

/// The run-task stage this service acts on.
pub const POST_PLAN_STAGE: &str = "post_plan";

/// Run-task request body sent by the platform.
///
/// Every field is optional at parse time: the registration test call omits
/// most of them. [`CallbackPayload::require_run_id`] enforces what evaluation
/// needs.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub payload_version: Option<u32>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub access_token: Option<SecretString>,
    #[serde(default)]
    pub task_result_enforcement_level: Option<String>,
    #[serde(default)]
    pub task_result_callback_url: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
}

impl CallbackPayload {
    /// Parses a raw request body.
    ///
    /// # Errors
    ///
    /// [`AutoApplyError::PayloadMalformed`] if the body is not a JSON object
    /// of the expected shape.
    pub fn parse(raw_body: &[u8]) -> Result<Self, AutoApplyError> {
        serde_json::from_slice(raw_body).map_err(AutoApplyError::malformed)
    }

    /// Returns `true` for the call the platform makes when the run task is registered.
    pub fn is_registration_test(&self) -> bool {
        self.task_result_enforcement_level.as_deref() == Some(TEST_ENFORCEMENT_LEVEL)
    }

    /// Returns `true` if the callback was sent for the post-plan stage.
    pub fn is_post_plan(&self) -> bool {
        self.stage.as_deref() == Some(POST_PLAN_STAGE)
    }

    /// Returns the run id, or [`AutoApplyError::PayloadMalformed`] if it is
    /// absent or empty.
    pub fn require_run_id(&self) -> Result<RunId, AutoApplyError> {
        self.run_id
            .as_deref()
            .and_then(RunId::new)
            .ok_or_else(|| AutoApplyError::malformed("run_id is missing or empty"))
    }

    /// Returns where to report the task result, when the payload carries both
    /// the callback URL and its access token.
    pub fn task_callback(&self) -> Option<TaskCallback> {
        match (&self.task_result_callback_url, &self.access_token) {
            (Some(url), Some(token)) if !url.is_empty() => Some(TaskCallback {
                url: url.clone(),
                access_token: token.clone(),
            }),
            _ => None,
        }
    }
}

/// Where and how to report a run-task result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCallback {
    pub url: String,
    /// Token scoped to this one callback; distinct from the service's API token.
    pub access_token: SecretString,
}

/// Run-task result status accepted by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    Passed,
    Failed,
}

/// A run-task result reported back to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub status: TaskResultStatus,
    pub message: String,
}

impl TaskResult {
    /// Creates a `passed` result.
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            status: TaskResultStatus::Passed,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Used for log fields only; scheduling deadlines use the runtime's monotonic
/// clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: &str, confirmable: bool) -> RunDetail {
        RunDetail {
            id: RunId::new("run-1").unwrap(),
            status: RunStatus::from_api(status),
            source: RunSource::RunTrigger,
            workspace_id: WorkspaceId::new("ws-1").unwrap(),
            is_confirmable: confirmable,
            run_trigger_id: None,
        }
    }

    #[test]
    fn readiness_classification() {
        assert_eq!(run("planned_and_finished", false).readiness(), RunReadiness::Finished);
        assert_eq!(run("applied", false).readiness(), RunReadiness::Finished);
        assert_eq!(run("planned", true).readiness(), RunReadiness::Confirmable);
        assert_eq!(run("planning", false).readiness(), RunReadiness::NotReady);
        assert_eq!(run("post_plan_running", false).readiness(), RunReadiness::NotReady);
        assert_eq!(run("brand_new_state", false).readiness(), RunReadiness::NotReady);
    }

    #[test]
    fn status_round_trips_unknown_values() {
        let status = RunStatus::from_api("brand_new_state");
        assert_eq!(status, RunStatus::Other("brand_new_state".into()));
        assert_eq!(status.as_str(), "brand_new_state");
        assert_eq!(RunStatus::from_api("planned_and_finished").as_str(), "planned_and_finished");
    }

    #[test]
    fn source_parsing() {
        assert_eq!(RunSource::from_api("tfe-run-trigger"), RunSource::RunTrigger);
        assert_eq!(RunSource::from_api("terraform+cloud"), RunSource::Cli);
        assert_eq!(
            RunSource::from_api("tfe-configuration-version"),
            RunSource::ConfigurationVersion
        );
    }

    #[test]
    fn payload_parsing_and_accessors() {
        let body = br#"{
            "payload_version": 1,
            "stage": "post_plan",
            "access_token": "scoped-token",
            "task_result_enforcement_level": "advisory",
            "task_result_callback_url": "https://app.terraform.io/api/v2/task-results/tr-1/callback",
            "run_id": "run-abc123",
            "organization_name": "acme",
            "workspace_name": "network",
            "extra_field": {"ignored": true}
        }"#;
        let payload = CallbackPayload::parse(body).unwrap();
        assert!(payload.is_post_plan());
        assert!(!payload.is_registration_test());
        assert_eq!(payload.require_run_id().unwrap().as_str(), "run-abc123");
        let callback = payload.task_callback().unwrap();
        assert_eq!(callback.access_token.expose(), "scoped-token");
        assert_eq!(format!("{:?}", callback.access_token), "[REDACTED]");
    }

    #[test]
    fn payload_without_run_id_is_malformed() {
        let payload = CallbackPayload::parse(br#"{"stage": "post_plan", "run_id": ""}"#).unwrap();
        assert!(matches!(
            payload.require_run_id(),
            Err(AutoApplyError::PayloadMalformed { .. })
        ));
        assert!(payload.task_callback().is_none());
    }

    #[test]
    fn non_object_body_is_malformed() {
        assert!(matches!(
            CallbackPayload::parse(b"not json"),
            Err(AutoApplyError::PayloadMalformed { .. })
        ));
        assert!(CallbackPayload::parse(br#"{"run_id": 42}"#).is_err());
    }
}
