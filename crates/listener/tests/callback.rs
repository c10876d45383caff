//! End-to-end callback handling through the router with fake platform ports.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use applier::ApplyQueue;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use autoapply::signature::sign;
use autoapply::{
    ApplyResult, AutoApplyError, OrchestrationApi, ProvenanceEvaluator, RunDetail, RunId,
    RunSource, RunStatus, RunTriggerDetail, RunTriggerId, SecretString, TaskCallback, TaskResult,
    TaskResultReporter, TaskResultStatus, WorkspaceDetail, WorkspaceId, SIGNATURE_HEADER,
};
use listener::{router, CallbackHandler, HEALTH_PATH};

const SECRET: &str = "run-task-hmac-key";

#[derive(Default)]
struct FakePlatform {
    runs: HashMap<String, (&'static str, bool)>,
    auto_apply: HashMap<String, bool>,
    reads: Mutex<u32>,
}

#[async_trait]
impl OrchestrationApi for FakePlatform {
    async fn get_run(&self, run_id: &RunId) -> Result<RunDetail, AutoApplyError> {
        *self.reads.lock().unwrap() += 1;
        let (source, _) = self.runs.get(run_id.as_str()).ok_or_else(|| {
            AutoApplyError::UpstreamUnavailable {
                message: "connection refused".into(),
                retry_after: None,
            }
        })?;
        Ok(RunDetail {
            id: run_id.clone(),
            status: RunStatus::PostPlanRunning,
            source: RunSource::from_api(source),
            workspace_id: WorkspaceId::new(format!("ws-{run_id}")).unwrap(),
            is_confirmable: false,
            run_trigger_id: None,
        })
    }

    async fn get_run_trigger(
        &self,
        _trigger_id: &RunTriggerId,
    ) -> Result<RunTriggerDetail, AutoApplyError> {
        unreachable!("no allow-list configured")
    }

    async fn get_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<WorkspaceDetail, AutoApplyError> {
        *self.reads.lock().unwrap() += 1;
        let run = workspace_id.as_str().trim_start_matches("ws-");
        Ok(WorkspaceDetail {
            id: workspace_id.clone(),
            name: None,
            auto_apply_enabled: self.auto_apply.get(run).copied().unwrap_or(false),
        })
    }

    async fn apply_run(&self, _run_id: &RunId) -> Result<ApplyResult, AutoApplyError> {
        unreachable!("the handler never applies")
    }
}

#[derive(Default)]
struct RecordingReporter {
    reports: Mutex<Vec<(TaskCallback, TaskResult)>>,
}

#[async_trait]
impl TaskResultReporter for RecordingReporter {
    async fn report(
        &self,
        callback: &TaskCallback,
        result: &TaskResult,
    ) -> Result<(), AutoApplyError> {
        self.reports
            .lock()
            .unwrap()
            .push((callback.clone(), result.clone()));
        Ok(())
    }
}

/// Accepts a report and never completes it, like a callback URL that stalls.
#[derive(Default)]
struct StalledReporter {
    started: AtomicBool,
}

#[async_trait]
impl TaskResultReporter for StalledReporter {
    async fn report(
        &self,
        _callback: &TaskCallback,
        _result: &TaskResult,
    ) -> Result<(), AutoApplyError> {
        self.started.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

struct Harness {
    router: axum::Router,
    queue: ApplyQueue,
    platform: Arc<FakePlatform>,
    reporter: Arc<RecordingReporter>,
}

fn platform() -> Arc<FakePlatform> {
    let mut platform = FakePlatform::default();
    platform.runs.insert("run-abc123".into(), ("tfe-run-trigger", false));
    platform.auto_apply.insert("run-abc123".into(), true);
    platform.runs.insert("run-manual".into(), ("tfe-run-trigger", false));
    platform.auto_apply.insert("run-manual".into(), false);
    platform.runs.insert("run-vcs".into(), ("tfe-configuration-version", false));
    platform.auto_apply.insert("run-vcs".into(), true);
    Arc::new(platform)
}

fn harness() -> Harness {
    let platform = platform();
    let queue = ApplyQueue::default();
    let reporter = Arc::new(RecordingReporter::default());
    let handler = CallbackHandler::new(
        SecretString::new(SECRET),
        ProvenanceEvaluator::new(platform.clone()),
        Arc::new(queue.clone()),
        reporter.clone(),
    );
    Harness {
        router: router(Arc::new(handler), "/"),
        queue,
        platform,
        reporter,
    }
}

fn payload(run_id: &str) -> String {
    json!({
        "payload_version": 1,
        "stage": "post_plan",
        "access_token": "callback-token",
        "task_result_enforcement_level": "mandatory",
        "task_result_callback_url": "https://app.terraform.io/api/v2/task-results/tr-1/callback",
        "run_id": run_id,
        "organization_name": "acme",
        "workspace_name": "app"
    })
    .to_string()
}

async fn post(router: &axum::Router, body: &str, signature: Option<String>) -> StatusCode {
    let mut builder = Request::builder().method(Method::POST).uri("/");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let request = builder.body(Body::from(body.to_string())).expect("request");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("response")
        .status()
}

async fn post_signed(router: &axum::Router, body: &str) -> StatusCode {
    post(router, body, Some(sign(body.as_bytes(), SECRET.as_bytes()))).await
}

fn reported_so_far(h: &Harness) -> Vec<(TaskCallback, TaskResult)> {
    h.reporter.reports.lock().unwrap().clone()
}

/// Waits for `count` task results; reports are sent off the response path.
async fn reported(h: &Harness, count: usize) -> Vec<(TaskCallback, TaskResult)> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let reports = reported_so_far(h);
            if reports.len() >= count {
                return reports;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task results reported")
}

#[tokio::test]
async fn eligible_run_is_queued_and_acknowledged() {
    let h = harness();

    let status = post_signed(&h.router, &payload("run-abc123")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(h.queue.contains(&RunId::new("run-abc123").unwrap()));
    let reports = reported(&h, 1).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0.access_token.expose(), "callback-token");
    assert_eq!(reports[0].1.status, TaskResultStatus::Passed);
    assert_eq!(
        reports[0].1.message,
        "Added run-abc123 to the queue to be auto-applied when ready."
    );
}

#[tokio::test]
async fn duplicate_callback_does_not_queue_twice() {
    let h = harness();
    let body = payload("run-abc123");

    assert_eq!(post_signed(&h.router, &body).await, StatusCode::OK);
    assert_eq!(post_signed(&h.router, &body).await, StatusCode::OK);

    assert_eq!(h.queue.len(), 1);
    let reports = reported(&h, 2).await;
    assert!(reports.iter().any(|(_, r)| r.message.contains("already queued")));
}

#[tokio::test]
async fn ineligible_runs_are_acknowledged_without_queueing() {
    let h = harness();

    assert_eq!(post_signed(&h.router, &payload("run-manual")).await, StatusCode::OK);
    assert_eq!(post_signed(&h.router, &payload("run-vcs")).await, StatusCode::OK);

    assert!(h.queue.is_empty());
    let reports = reported(&h, 2).await;
    assert!(reports
        .iter()
        .any(|(_, r)| r.message.contains("not configured for auto-apply")));
    assert!(reports
        .iter()
        .any(|(_, r)| r.message.contains("not a run triggered run")));
    assert!(reports.iter().all(|(_, r)| r.status == TaskResultStatus::Passed));
}

#[tokio::test]
async fn evaluation_failure_still_passes_the_task() {
    let h = harness();

    let status = post_signed(&h.router, &payload("run-unreachable")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(h.queue.is_empty());
    let reports = reported(&h, 1).await;
    assert_eq!(reports[0].1.status, TaskResultStatus::Passed);
    assert!(reports[0].1.message.starts_with("Skipping auto-apply"));
}

#[tokio::test]
async fn bad_signature_is_unauthorized_and_inert() {
    let h = harness();
    let body = payload("run-abc123");

    assert_eq!(post(&h.router, &body, None).await, StatusCode::UNAUTHORIZED);
    assert_eq!(
        post(&h.router, &body, Some("deadbeef".into())).await,
        StatusCode::UNAUTHORIZED
    );
    let tampered = body.replace("run-abc123", "run-abc124");
    let signature = sign(body.as_bytes(), SECRET.as_bytes());
    assert_eq!(
        post(&h.router, &tampered, Some(signature)).await,
        StatusCode::UNAUTHORIZED
    );

    assert!(h.queue.is_empty());
    assert!(reported_so_far(&h).is_empty());
    assert_eq!(*h.platform.reads.lock().unwrap(), 0);
}

#[tokio::test]
async fn malformed_json_with_valid_signature_is_bad_request() {
    let h = harness();

    assert_eq!(post_signed(&h.router, "{not json").await, StatusCode::BAD_REQUEST);
    let missing_run = json!({"stage": "post_plan", "task_result_enforcement_level": "advisory"})
        .to_string();
    assert_eq!(post_signed(&h.router, &missing_run).await, StatusCode::BAD_REQUEST);

    assert!(h.queue.is_empty());
    assert!(reported_so_far(&h).is_empty());
}

#[tokio::test]
async fn registration_test_call_is_acknowledged_only() {
    let h = harness();
    let body = json!({
        "payload_version": 1,
        "stage": "test",
        "access_token": "callback-token",
        "task_result_enforcement_level": "test",
        "task_result_callback_url": "https://app.terraform.io/api/v2/task-results/tr-0/callback"
    })
    .to_string();

    assert_eq!(post_signed(&h.router, &body).await, StatusCode::OK);
    assert!(reported_so_far(&h).is_empty());
    assert_eq!(*h.platform.reads.lock().unwrap(), 0);
}

#[tokio::test]
async fn other_stages_pass_without_evaluation() {
    let h = harness();
    let body = payload("run-abc123").replace("post_plan", "pre_apply");

    assert_eq!(post_signed(&h.router, &body).await, StatusCode::OK);
    assert!(h.queue.is_empty());
    assert_eq!(*h.platform.reads.lock().unwrap(), 0);
    assert_eq!(
        reported(&h, 1).await[0].1.message,
        "Nothing to do. This is not a post_plan phase."
    );
}

#[tokio::test]
async fn health_probe_responds() {
    let h = harness();
    let request = Request::builder()
        .uri(HEALTH_PATH)
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn acknowledgment_does_not_wait_for_task_result_report() {
    let queue = ApplyQueue::default();
    let reporter = Arc::new(StalledReporter::default());
    let handler = CallbackHandler::new(
        SecretString::new(SECRET),
        ProvenanceEvaluator::new(platform()),
        Arc::new(queue.clone()),
        reporter.clone(),
    );
    let app = router(Arc::new(handler), "/");

    let status = tokio::time::timeout(
        Duration::from_secs(1),
        post_signed(&app, &payload("run-abc123")),
    )
    .await
    .expect("callback acknowledged while the report is still pending");

    assert_eq!(status, StatusCode::OK);
    assert!(queue.contains(&RunId::new("run-abc123").unwrap()));
    tokio::time::timeout(Duration::from_secs(1), async {
        while !reporter.started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("report started in the background");
}
