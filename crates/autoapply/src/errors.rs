//! Error and retry-policy types for the auto-apply domain.
//!
//! [`AutoApplyError`] covers every failure the callback path and the apply
//! worker can observe. Infrastructure adapters map their transport failures
//! onto these variants so the domain logic never sees HTTP types.
//!
//! [`RetryPolicy`] is the cross-cutting classifier: the apply worker re-queues
//! an entry when the error is `Retryable` and drops it otherwise.

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// ## Rules
///
/// - `Retryable` errors: network failures, 5xx responses, rate limiting, and
///   the 409 the platform returns while a run is still held by its run-task
///   phase.
/// - `NonRetryable` errors: unknown runs, rejected requests, undecodable
///   responses, invalid signatures or payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt (e.g. from `Retry-After`).
        /// `None` means apply the caller's own back-off interval.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Domain errors
// ---------------------------------------------------------------------------

/// Errors produced while verifying, evaluating, or applying a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutoApplyError {
    /// The callback's HMAC signature is missing or does not match the body.
    #[error("Callback signature is missing or invalid")]
    SignatureInvalid,

    /// The callback body is not a well-formed run-task payload.
    #[error("Callback payload is malformed: {message}")]
    PayloadMalformed {
        /// Description of the parse or validation failure.
        message: String,
    },

    /// The platform could not be reached or answered with a transient failure
    /// (network error, timeout, 5xx, 429).
    #[error("Platform unavailable: {message}")]
    UpstreamUnavailable {
        /// Description of the transport failure or response status.
        message: String,
        /// Delay requested by the platform via `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The requested run, workspace, or run trigger does not exist.
    #[error("Platform resource not found: {resource}")]
    UpstreamNotFound {
        /// The resource path that returned 404 (e.g. `"runs/run-abc123"`).
        resource: String,
    },

    /// The platform rejected a read or returned a body that could not be decoded.
    ///
    /// Typical causes are an expired API token (401/403) or an API shape change.
    #[error("Platform rejected request for {resource} (status {status}): {message}")]
    UpstreamRejected {
        /// The resource path that was requested.
        resource: String,
        /// HTTP status code, or `0` when the failure was a decode error.
        status: u16,
        /// Response text or decoder message.
        message: String,
    },

    /// The platform answered the apply mutation with 409: the run has not yet
    /// been released for confirmation. Expected while the run-task phase is
    /// still completing.
    #[error("Run is not yet confirmable")]
    ApplyNotConfirmable,

    /// The apply mutation failed with an unexpected status other than 404/409.
    #[error("Apply rejected (status {status}): {message}")]
    ApplyRejected {
        /// HTTP status code returned by the platform.
        status: u16,
        /// Response text.
        message: String,
    },

    /// Runtime configuration is invalid. Produced at startup only.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl AutoApplyError {
    /// Creates a [`AutoApplyError::PayloadMalformed`] from any displayable cause.
    pub fn malformed(message: impl std::fmt::Display) -> Self {
        Self::PayloadMalformed {
            message: message.to_string(),
        }
    }

    /// Classifies this error for the apply worker.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::UpstreamUnavailable { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::ApplyNotConfirmable => RetryPolicy::Retryable { after: None },
            Self::SignatureInvalid
            | Self::PayloadMalformed { .. }
            | Self::UpstreamNotFound { .. }
            | Self::UpstreamRejected { .. }
            | Self::ApplyRejected { .. }
            | Self::Configuration { .. } => RetryPolicy::NonRetryable,
        }
    }
}
