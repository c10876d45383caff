//! HTTP client for the platform's v2 API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use autoapply::{
    ApplyResult, AutoApplyError, OrchestrationApi, RunDetail, RunId, RunSource, RunStatus,
    RunTriggerDetail, RunTriggerId, SecretString, TaskCallback, TaskResult, TaskResultReporter,
    WorkspaceDetail, WorkspaceId,
};

use crate::wire::{
    ApplyRequest, Document, RunResource, RunTriggerResource, TaskResultDocument,
    WorkspaceResource,
};

/// API root of Terraform Cloud.
pub const DEFAULT_BASE_URL: &str = "https://app.terraform.io/api/v2";

/// Comment attached to every apply this service requests.
pub const APPLY_COMMENT: &str = "Automatically applying run triggered run";

const JSON_API: &str = "application/vnd.api+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("tfc-autoapply/", env!("CARGO_PKG_VERSION"));

/// Typed client for the reads and the apply mutation this service needs.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct TfcClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl TfcClient {
    /// Creates a client for `base_url` (e.g. [`DEFAULT_BASE_URL`]) that
    /// authenticates with `token`.
    ///
    /// # Errors
    ///
    /// [`AutoApplyError::Configuration`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Result<Self, AutoApplyError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AutoApplyError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_http_client(http, base_url, token))
    }

    /// Creates a client around an existing [`reqwest::Client`].
    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: SecretString,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            token,
        }
    }

    /// Returns the API root this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    async fn get_document<T: DeserializeOwned>(&self, resource: &str) -> Result<T, AutoApplyError> {
        let response = self
            .http
            .get(self.url(resource))
            .bearer_auth(self.token.expose())
            .header(ACCEPT, JSON_API)
            .send()
            .await
            .map_err(|e| transport_error(resource, &e))?;

        let status = response.status();
        debug!(resource, %status, "platform response");
        if !status.is_success() {
            return Err(read_error(resource, response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(resource, &e))?;
        let document: Document<T> =
            serde_json::from_slice(&body).map_err(|e| AutoApplyError::UpstreamRejected {
                resource: resource.to_string(),
                status: 0,
                message: format!("undecodable response: {e}"),
            })?;
        Ok(document.data)
    }
}

#[async_trait]
impl OrchestrationApi for TfcClient {
    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn get_run(&self, run_id: &RunId) -> Result<RunDetail, AutoApplyError> {
        let resource = format!("runs/{run_id}");
        let run: RunResource = self.get_document(&resource).await?;

        let id = RunId::new(run.id).ok_or_else(|| missing(&resource, "data.id"))?;
        let workspace_id = run
            .relationships
            .workspace
            .id()
            .and_then(WorkspaceId::new)
            .ok_or_else(|| missing(&resource, "relationships.workspace"))?;
        let run_trigger_id = run.relationships.run_trigger.id().and_then(RunTriggerId::new);

        Ok(RunDetail {
            id,
            status: RunStatus::from_api(&run.attributes.status),
            source: RunSource::from_api(&run.attributes.source),
            workspace_id,
            is_confirmable: run.attributes.actions.is_confirmable,
            run_trigger_id,
        })
    }

    #[instrument(skip(self), fields(trigger_id = %trigger_id))]
    async fn get_run_trigger(
        &self,
        trigger_id: &RunTriggerId,
    ) -> Result<RunTriggerDetail, AutoApplyError> {
        let resource = format!("run-triggers/{trigger_id}");
        let trigger: RunTriggerResource = self.get_document(&resource).await?;

        let id = RunTriggerId::new(trigger.id).ok_or_else(|| missing(&resource, "data.id"))?;
        let source_workspace_id = trigger
            .relationships
            .sourceable
            .id()
            .and_then(WorkspaceId::new)
            .ok_or_else(|| missing(&resource, "relationships.sourceable"))?;
        let workspace_id = trigger
            .relationships
            .workspace
            .id()
            .and_then(WorkspaceId::new)
            .ok_or_else(|| missing(&resource, "relationships.workspace"))?;

        Ok(RunTriggerDetail {
            id,
            source_workspace_id,
            source_workspace_name: trigger.attributes.sourceable_name,
            workspace_id,
        })
    }

    #[instrument(skip(self), fields(workspace_id = %workspace_id))]
    async fn get_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<WorkspaceDetail, AutoApplyError> {
        let resource = format!("workspaces/{workspace_id}");
        let workspace: WorkspaceResource = self.get_document(&resource).await?;

        Ok(WorkspaceDetail {
            id: WorkspaceId::new(workspace.id).ok_or_else(|| missing(&resource, "data.id"))?,
            name: workspace.attributes.name,
            auto_apply_enabled: workspace.attributes.auto_apply,
        })
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn apply_run(&self, run_id: &RunId) -> Result<ApplyResult, AutoApplyError> {
        let resource = format!("runs/{run_id}/actions/apply");
        let body = serde_json::to_vec(&ApplyRequest {
            comment: APPLY_COMMENT,
        })
        .map_err(|e| AutoApplyError::ApplyRejected {
            status: 0,
            message: format!("unserialisable apply request: {e}"),
        })?;
        let response = self
            .http
            .post(self.url(&resource))
            .bearer_auth(self.token.expose())
            .header(ACCEPT, JSON_API)
            .header(CONTENT_TYPE, JSON_API)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(&resource, &e))?;

        let status = response.status();
        debug!(%status, "apply response");
        match status {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(ApplyResult::Accepted),
            StatusCode::CONFLICT => Ok(ApplyResult::NotConfirmable),
            StatusCode::NOT_FOUND => Ok(ApplyResult::NotFound),
            s if is_transient(s) => Err(unavailable(&resource, s, response.headers())),
            s => Err(AutoApplyError::ApplyRejected {
                status: s.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl TaskResultReporter for TfcClient {
    #[instrument(skip_all, fields(status = ?result.status))]
    async fn report(
        &self,
        callback: &TaskCallback,
        result: &TaskResult,
    ) -> Result<(), AutoApplyError> {
        let resource = "task-result callback";
        let body = serde_json::to_vec(&TaskResultDocument::from(result)).map_err(|e| {
            AutoApplyError::UpstreamRejected {
                resource: resource.to_string(),
                status: 0,
                message: format!("unserialisable task result: {e}"),
            }
        })?;
        let response = self
            .http
            .patch(&callback.url)
            .bearer_auth(callback.access_token.expose())
            .header(CONTENT_TYPE, JSON_API)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(resource, &e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(read_error(resource, response).await)
        }
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn transport_error(resource: &str, err: &reqwest::Error) -> AutoApplyError {
    AutoApplyError::UpstreamUnavailable {
        message: format!("{resource}: {err}"),
        retry_after: None,
    }
}

fn unavailable(resource: &str, status: StatusCode, headers: &HeaderMap) -> AutoApplyError {
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    AutoApplyError::UpstreamUnavailable {
        message: format!("{resource}: status {status}"),
        retry_after,
    }
}

async fn read_error(resource: &str, response: Response) -> AutoApplyError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return AutoApplyError::UpstreamNotFound {
            resource: resource.to_string(),
        };
    }
    if is_transient(status) {
        return unavailable(resource, status, response.headers());
    }
    AutoApplyError::UpstreamRejected {
        resource: resource.to_string(),
        status: status.as_u16(),
        message: response.text().await.unwrap_or_default(),
    }
}

fn missing(resource: &str, field: &str) -> AutoApplyError {
    AutoApplyError::UpstreamRejected {
        resource: resource.to_string(),
        status: 0,
        message: format!("response is missing {field}"),
    }
}
