//! Deferred apply machinery.
//!
//! The callback handler cannot apply a run directly: while the post-plan run
//! task is still in progress the platform answers the apply mutation with 409.
//! Instead, eligible run ids go into an [`ApplyQueue`] and a single
//! [`ApplyWorker`] polls each run until it can be applied or no longer needs
//! to be.
//!
//! ## Architectural Layer
//!
//! **Business logic.** The worker only talks to the platform through
//! [`autoapply::OrchestrationApi`]; the queue implements
//! [`autoapply::ApplyScheduler`] for the listener.

pub mod queue;
pub mod worker;

pub use queue::{ApplyQueue, QueueEntry, DEFAULT_POLL_INTERVAL};
pub use worker::{
    ApplyWorker, DeferReason, DoneOutcome, WorkerState, DEFAULT_RETRY_INTERVAL,
};
