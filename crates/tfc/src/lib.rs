//! Terraform Cloud / Enterprise infrastructure adapter.
//!
//! Implements [`autoapply::OrchestrationApi`] and
//! [`autoapply::TaskResultReporter`] over the platform's JSON:API v2
//! endpoints using `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Status-code
//! mapping, authentication, and JSON:API decoding live here; the domain only
//! sees typed snapshots and [`autoapply::AutoApplyError`] values.
//!
//! ## Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `get_run` | `GET /runs/{id}` |
//! | `get_run_trigger` | `GET /run-triggers/{id}` |
//! | `get_workspace` | `GET /workspaces/{id}` |
//! | `apply_run` | `POST /runs/{id}/actions/apply` |
//! | `report` | `PATCH {task_result_callback_url}` with the callback's own token |

pub mod client;
mod wire;

pub use client::{TfcClient, APPLY_COMMENT, DEFAULT_BASE_URL};
