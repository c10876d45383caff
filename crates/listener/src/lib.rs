//! Run-task callback receiver.
//!
//! Exposes an axum [`Router`] with two routes:
//!
//! - `POST {callback_path}`: the run-task callback. The raw body is kept
//!   intact for HMAC verification against the [`autoapply::SIGNATURE_HEADER`]
//!   header, then handed to [`CallbackHandler`].
//! - `GET /healthz`: liveness probe.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP framing lives here; the decision flow in
//! [`handler`] depends only on `autoapply` ports.

pub mod handler;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tracing::{info_span, Instrument};

use autoapply::{DeliveryId, SIGNATURE_HEADER};

pub use handler::{CallbackHandler, CallbackOutcome};

/// Path of the liveness probe.
pub const HEALTH_PATH: &str = "/healthz";

/// Builds the listener's router.
pub fn router(handler: Arc<CallbackHandler>, callback_path: &str) -> Router {
    Router::new()
        .route(callback_path, post(receive_callback))
        .route(HEALTH_PATH, get(health))
        .with_state(handler)
}

async fn receive_callback(
    State(handler): State<Arc<CallbackHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let delivery_id = DeliveryId::new_random();
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = handler
        .handle(&body, signature)
        .instrument(info_span!("callback", %delivery_id))
        .await;
    outcome.status_code()
}

async fn health() -> &'static str {
    "ok"
}
