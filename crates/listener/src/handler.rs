//! Run-task callback decision flow.
//!
//! Verify signature, parse payload, evaluate provenance, schedule, report.
//! Once the signature and payload are accepted the response is always `200`:
//! anything else makes the platform fail the run task and block the plan.
//! The task-result PATCH runs on its own task after the decision is made, so
//! a slow callback URL never delays the acknowledgment.

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, info, instrument, warn, Instrument};

use autoapply::signature;
use autoapply::{
    ApplyScheduler, AutoApplyError, CallbackPayload, Eligibility, IneligibleReason,
    ProvenanceEvaluator, RunId, ScheduleOutcome, SecretString, TaskResult, TaskResultReporter,
};

/// What the handler did with one callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Signature or payload rejected; nothing else happened.
    Rejected(AutoApplyError),
    /// The platform's registration test call.
    RegistrationTest,
    /// Callback for a stage other than post-plan.
    IgnoredStage(Option<String>),
    /// The run was handed to the apply queue.
    Scheduled {
        run_id: RunId,
        outcome: ScheduleOutcome,
    },
    /// The run does not qualify for auto-apply.
    Ineligible {
        run_id: RunId,
        reason: IneligibleReason,
    },
    /// Eligibility could not be determined; auto-apply skipped.
    EvaluationFailed {
        run_id: RunId,
        error: AutoApplyError,
    },
}

impl CallbackOutcome {
    /// HTTP status returned to the platform.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Rejected(AutoApplyError::SignatureInvalid) => StatusCode::UNAUTHORIZED,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        }
    }

    fn task_result(&self) -> Option<TaskResult> {
        let message = match self {
            Self::Rejected(_) | Self::RegistrationTest => return None,
            Self::IgnoredStage(_) => {
                "Nothing to do. This is not a post_plan phase.".to_string()
            }
            Self::Scheduled {
                run_id,
                outcome: ScheduleOutcome::Queued,
            } => format!("Added {run_id} to the queue to be auto-applied when ready."),
            Self::Scheduled {
                run_id,
                outcome: ScheduleOutcome::AlreadyQueued,
            } => format!("{run_id} is already queued to be auto-applied when ready."),
            Self::Ineligible { reason, .. } => reason.to_string(),
            Self::EvaluationFailed { error, .. } => {
                format!("Skipping auto-apply: eligibility could not be determined ({error}).")
            }
        };
        Some(TaskResult::passed(message))
    }
}

/// Handles inbound run-task callbacks.
pub struct CallbackHandler {
    secret: SecretString,
    evaluator: ProvenanceEvaluator,
    scheduler: Arc<dyn ApplyScheduler>,
    reporter: Arc<dyn TaskResultReporter>,
}

impl CallbackHandler {
    /// Creates a handler verifying callbacks against `secret`.
    pub fn new(
        secret: SecretString,
        evaluator: ProvenanceEvaluator,
        scheduler: Arc<dyn ApplyScheduler>,
        reporter: Arc<dyn TaskResultReporter>,
    ) -> Self {
        Self {
            secret,
            evaluator,
            scheduler,
            reporter,
        }
    }

    /// Processes one callback and starts reporting the task result in the
    /// background. Waits for neither the report nor the apply.
    #[instrument(skip_all)]
    pub async fn handle(&self, raw_body: &[u8], signature_header: Option<&str>) -> CallbackOutcome {
        if !signature::verify(raw_body, signature_header, self.secret.expose().as_bytes()) {
            warn!(
                signature_present = signature_header.is_some(),
                body_len = raw_body.len(),
                "callback signature mismatch"
            );
            return CallbackOutcome::Rejected(AutoApplyError::SignatureInvalid);
        }

        let payload = match CallbackPayload::parse(raw_body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "rejecting malformed callback");
                return CallbackOutcome::Rejected(err);
            }
        };

        let outcome = self.decide(&payload).await;
        if let Some(result) = outcome.task_result() {
            self.spawn_report(&payload, result);
        }
        outcome
    }

    async fn decide(&self, payload: &CallbackPayload) -> CallbackOutcome {
        if payload.is_registration_test() {
            info!("acknowledging run task registration test");
            return CallbackOutcome::RegistrationTest;
        }
        if !payload.is_post_plan() {
            debug!(stage = ?payload.stage, "ignoring callback for non post-plan stage");
            return CallbackOutcome::IgnoredStage(payload.stage.clone());
        }
        let run_id = match payload.require_run_id() {
            Ok(run_id) => run_id,
            Err(err) => return CallbackOutcome::Rejected(err),
        };

        info!(
            %run_id,
            payload_version = payload.payload_version,
            organization = payload.organization_name.as_deref().unwrap_or_default(),
            workspace = payload.workspace_name.as_deref().unwrap_or_default(),
            "processing run task callback"
        );

        match self.evaluator.should_auto_apply(&run_id).await {
            Eligibility::Eligible {
                workspace_id,
                source_workspace_id,
            } => {
                let outcome = self.scheduler.schedule(run_id.clone());
                info!(
                    %run_id,
                    %workspace_id,
                    source_workspace_id = source_workspace_id.as_ref().map(|s| s.as_str()),
                    ?outcome,
                    "run scheduled for auto-apply"
                );
                CallbackOutcome::Scheduled { run_id, outcome }
            }
            Eligibility::Ineligible(reason) => {
                info!(%run_id, %reason, "run not eligible for auto-apply");
                CallbackOutcome::Ineligible { run_id, reason }
            }
            Eligibility::EvaluationFailed(error) => {
                warn!(%run_id, %error, "skipping auto-apply after evaluation failure");
                CallbackOutcome::EvaluationFailed { run_id, error }
            }
        }
    }

    fn spawn_report(&self, payload: &CallbackPayload, result: TaskResult) {
        let Some(callback) = payload.task_callback() else {
            debug!("payload has no task result callback; not reporting");
            return;
        };
        let reporter = Arc::clone(&self.reporter);
        tokio::spawn(
            async move {
                match reporter.report(&callback, &result).await {
                    Ok(()) => debug!("task result reported"),
                    Err(err) => warn!(error = %err, "failed to report task result"),
                }
            }
            .in_current_span(),
        );
    }
}
