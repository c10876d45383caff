//! Auto-apply eligibility rules.
//!
//! A run is eligible only when a run trigger queued it and its workspace has
//! auto-apply enabled. Any upstream failure yields
//! [`Eligibility::EvaluationFailed`]; it is never resolved toward applying.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::{
    AutoApplyError, OrchestrationApi, RunId, RunSource, RunTriggerId, WorkspaceId,
};

/// Why a run is not auto-applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    /// The run was not queued by a run trigger.
    NotRunTriggered {
        /// The source the platform reported.
        source: RunSource,
    },
    /// The workspace requires manual confirmation.
    ManualApplyWorkspace {
        workspace_id: WorkspaceId,
    },
    /// A source-workspace allow-list is configured but the run carries no
    /// run-trigger reference to check it against, or the referenced trigger
    /// does not feed the run's workspace.
    SourceNotTraceable,
    /// The run trigger's source workspace is not in the allow-list.
    SourceWorkspaceNotAllowed {
        source_workspace_id: WorkspaceId,
    },
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRunTriggered { source } => write!(
                f,
                "Nothing to do. This is not a run triggered run (source '{source}')."
            ),
            Self::ManualApplyWorkspace { workspace_id } => write!(
                f,
                "Nothing to do. Workspace {workspace_id} is not configured for auto-apply."
            ),
            Self::SourceNotTraceable => f.write_str(
                "Nothing to do. The run cannot be traced to a run trigger feeding its workspace.",
            ),
            Self::SourceWorkspaceNotAllowed {
                source_workspace_id,
            } => write!(
                f,
                "Nothing to do. Source workspace {source_workspace_id} is not allowed to trigger auto-apply."
            ),
        }
    }
}

/// Result of [`ProvenanceEvaluator::should_auto_apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    /// Both the source and the workspace checks passed.
    Eligible {
        workspace_id: WorkspaceId,
        /// Upstream workspace, when the run trigger was traced.
        source_workspace_id: Option<WorkspaceId>,
    },
    Ineligible(IneligibleReason),
    /// A platform read failed; the decision could not be made.
    EvaluationFailed(AutoApplyError),
}

impl Eligibility {
    /// Returns `true` for [`Eligibility::Eligible`].
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }
}

/// Decides whether a run may be auto-applied.
pub struct ProvenanceEvaluator {
    api: Arc<dyn OrchestrationApi>,
    allowed_sources: Option<HashSet<WorkspaceId>>,
}

impl ProvenanceEvaluator {
    /// Creates an evaluator with no source-workspace restriction.
    pub fn new(api: Arc<dyn OrchestrationApi>) -> Self {
        Self {
            api,
            allowed_sources: None,
        }
    }

    /// Restricts eligibility to runs triggered from one of `workspaces`.
    ///
    /// An empty list disables the restriction.
    #[must_use]
    pub fn with_source_allowlist(mut self, workspaces: impl IntoIterator<Item = WorkspaceId>) -> Self {
        let set: HashSet<_> = workspaces.into_iter().collect();
        self.allowed_sources = if set.is_empty() { None } else { Some(set) };
        self
    }

    /// Evaluates `run_id` against the eligibility rules.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn should_auto_apply(&self, run_id: &RunId) -> Eligibility {
        match self.evaluate(run_id).await {
            Ok(eligibility) => eligibility,
            Err(err) => {
                info!(error = %err, "eligibility evaluation failed");
                Eligibility::EvaluationFailed(err)
            }
        }
    }

    async fn evaluate(&self, run_id: &RunId) -> Result<Eligibility, AutoApplyError> {
        let run = self.api.get_run(run_id).await?;
        debug!(status = %run.status, source = %run.source, workspace_id = %run.workspace_id, "fetched run");

        if run.source != RunSource::RunTrigger {
            return Ok(Eligibility::Ineligible(IneligibleReason::NotRunTriggered {
                source: run.source,
            }));
        }

        let source_workspace_id = match &self.allowed_sources {
            None => None,
            Some(allowed) => match &run.run_trigger_id {
                None => return Ok(Eligibility::Ineligible(IneligibleReason::SourceNotTraceable)),
                Some(trigger_id) => {
                    let Some(source) = self.trace_source(trigger_id, &run.workspace_id).await?
                    else {
                        return Ok(Eligibility::Ineligible(IneligibleReason::SourceNotTraceable));
                    };
                    if !allowed.contains(&source) {
                        return Ok(Eligibility::Ineligible(
                            IneligibleReason::SourceWorkspaceNotAllowed {
                                source_workspace_id: source,
                            },
                        ));
                    }
                    Some(source)
                }
            },
        };

        let workspace = self.api.get_workspace(&run.workspace_id).await?;
        if !workspace.auto_apply_enabled {
            return Ok(Eligibility::Ineligible(
                IneligibleReason::ManualApplyWorkspace {
                    workspace_id: workspace.id,
                },
            ));
        }

        Ok(Eligibility::Eligible {
            workspace_id: workspace.id,
            source_workspace_id,
        })
    }

    /// Resolves the source workspace of `trigger_id`. `None` when the trigger
    /// feeds a workspace other than `destination`.
    async fn trace_source(
        &self,
        trigger_id: &RunTriggerId,
        destination: &WorkspaceId,
    ) -> Result<Option<WorkspaceId>, AutoApplyError> {
        let trigger = self.api.get_run_trigger(trigger_id).await?;
        debug!(
            trigger_id = %trigger.id,
            source_workspace_id = %trigger.source_workspace_id,
            source_workspace = trigger.source_workspace_name.as_deref().unwrap_or_default(),
            "traced run trigger"
        );
        if trigger.workspace_id != *destination {
            warn!(
                trigger_id = %trigger.id,
                trigger_workspace_id = %trigger.workspace_id,
                run_workspace_id = %destination,
                "run trigger does not feed the run's workspace"
            );
            return Ok(None);
        }
        Ok(Some(trigger.source_workspace_id))
    }
}
