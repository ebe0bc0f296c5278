//! HTTP routes

pub mod health;
pub mod image;
pub mod ingest;
pub mod me;

use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};

use crate::auth::{require_session, session_gate};
use crate::state::AppState;
use crate::webhooks;

pub fn create_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/api/me", get(me::get_me))
        .route_layer(middleware::from_fn(require_session));

    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/auth", post(webhooks::auth_webhook))
        .route("/image", get(image::proxy_image))
        // Trailing slashes are distinct routes, never redirected
        .route("/ingest", any(ingest::proxy_ingest))
        .route("/ingest/", any(ingest::proxy_ingest))
        .route("/ingest/{*path}", any(ingest::proxy_ingest))
        .merge(session_routes)
        .layer(middleware::from_fn_with_state(
            state.gate_state(),
            session_gate,
        ))
        .with_state(state)
}
