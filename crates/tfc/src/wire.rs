//! JSON:API documents returned by the platform, reduced to the fields this
//! service reads.

use serde::{Deserialize, Serialize};

use autoapply::{TaskResult, TaskResultStatus};

#[derive(Debug, Deserialize)]
pub(crate) struct Document<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceRef {
    pub id: String,
}

/// A to-one relationship. `data` is `null` when nothing is linked.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Relationship {
    #[serde(default)]
    pub data: Option<ResourceRef>,
}

impl Relationship {
    pub fn id(&self) -> Option<&str> {
        self.data.as_ref().map(|r| r.id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RunResource {
    pub id: String,
    pub attributes: RunAttributes,
    pub relationships: RunRelationships,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunAttributes {
    pub status: String,
    pub source: String,
    #[serde(default)]
    pub actions: RunActions,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RunActions {
    #[serde(rename = "is-confirmable", default)]
    pub is_confirmable: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunRelationships {
    pub workspace: Relationship,
    #[serde(rename = "run-trigger", default)]
    pub run_trigger: Relationship,
}

// ---------------------------------------------------------------------------
// Workspaces
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceResource {
    pub id: String,
    pub attributes: WorkspaceAttributes,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceAttributes {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "auto-apply")]
    pub auto_apply: bool,
}

// ---------------------------------------------------------------------------
// Run triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RunTriggerResource {
    pub id: String,
    #[serde(default)]
    pub attributes: RunTriggerAttributes,
    pub relationships: RunTriggerRelationships,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RunTriggerAttributes {
    #[serde(rename = "sourceable-name", default)]
    pub sourceable_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunTriggerRelationships {
    pub workspace: Relationship,
    pub sourceable: Relationship,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct ApplyRequest<'a> {
    pub comment: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskResultDocument<'a> {
    pub data: TaskResultData<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskResultData<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: TaskResultAttributes<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskResultAttributes<'a> {
    pub status: TaskResultStatus,
    pub message: &'a str,
}

impl<'a> From<&'a TaskResult> for TaskResultDocument<'a> {
    fn from(result: &'a TaskResult) -> Self {
        Self {
            data: TaskResultData {
                kind: "task-results",
                attributes: TaskResultAttributes {
                    status: result.status,
                    message: &result.message,
                },
            },
        }
    }
}
