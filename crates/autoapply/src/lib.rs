//! Core domain for the run-task auto-apply service.
//!
//! This crate holds every domain concept used by the decision-and-apply
//! pipeline: identifiers for platform objects, the run and workspace snapshots,
//! the inbound run-task payload, the error taxonomy, and the eligibility rules.
//! Infrastructure crates implement the port traits defined here; they never
//! add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no network I/O.
//! It defines *what* the service needs from the platform; `tfc` defines *how*
//! to get it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RunId`, `WorkspaceId`, `RunTriggerId`, `DeliveryId`) |
//! | [`types`] | Platform snapshots, run status classification, callback payload |
//! | [`errors`] | [`AutoApplyError`] and [`RetryPolicy`] |
//! | [`ports`] | [`OrchestrationApi`], [`TaskResultReporter`], [`ApplyScheduler`] |
//! | [`signature`] | HMAC verification of inbound callbacks |
//! | [`provenance`] | [`ProvenanceEvaluator`] eligibility rules |

pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod provenance;
pub mod signature;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{AutoApplyError, RetryPolicy};
pub use identifiers::{DeliveryId, RunId, RunTriggerId, WorkspaceId};
pub use ports::{ApplyScheduler, OrchestrationApi, ScheduleOutcome, TaskResultReporter};
pub use provenance::{Eligibility, IneligibleReason, ProvenanceEvaluator};
pub use signature::SIGNATURE_HEADER;
pub use types::{
    ApplyResult, CallbackPayload, RunDetail, RunReadiness, RunSource, RunStatus,
    RunTriggerDetail, SecretString, TaskCallback, TaskResult, TaskResultStatus, Timestamp,
    WorkspaceDetail,
};
