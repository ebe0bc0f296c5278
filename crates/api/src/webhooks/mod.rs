//! Identity-provider webhooks
//!
//! `POST /webhooks/auth` verifies the Svix signature over the raw body,
//! dispatches the event to the reconciler and flushes analytics before
//! answering.

pub mod events;
pub mod reconciler;
#[cfg(test)]
mod reconciler_tests;
pub mod signature;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub use events::WebhookEvent;
pub use reconciler::{Outcome, Reconciler};
pub use signature::{SignatureError, SignatureHeaders, SignatureVerifier};

use crate::state::AppState;

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn rejected(body: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, body).into_response()
}

/// Receive an identity-provider event
pub async fn auth_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(verifier) = state.webhook_verifier.as_ref() else {
        return Json(json!({ "message": "Not configured", "ok": false })).into_response();
    };

    let (Some(id), Some(timestamp), Some(signature)) = (
        header_value(&headers, signature::HEADER_ID),
        header_value(&headers, signature::HEADER_TIMESTAMP),
        header_value(&headers, signature::HEADER_SIGNATURE),
    ) else {
        return rejected("Error occured -- no svix headers");
    };

    let signed = SignatureHeaders {
        id,
        timestamp,
        signature,
    };
    if let Err(e) = verifier.verify(&signed, &body) {
        tracing::error!(svix_id = %id, error = %e, "Error verifying webhook");
        return rejected("Error occured");
    }

    let event = match WebhookEvent::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(svix_id = %id, error = %e, "Error parsing webhook payload");
            return rejected("Error occured");
        }
    };

    tracing::info!(
        id = ?event.data_id(),
        event_type = %event.event_type(),
        body = %String::from_utf8_lossy(&body),
        "Webhook"
    );

    let reconciler = Reconciler::new(state.store.clone(), state.analytics.clone());
    let outcome = reconciler.dispatch(&event).await;

    if let Err(e) = state.analytics.flush().await {
        tracing::warn!(event_type = %event.event_type(), error = %e, "Failed to flush analytics");
    }

    outcome.into_response()
}
