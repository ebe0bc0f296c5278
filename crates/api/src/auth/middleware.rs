//! Session gate middleware for Axum
//!
//! Resolves the identity-provider session of page and API requests, sends
//! signed-in users without an active organization to onboarding, and adds
//! the security headers to everything it lets through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE, LOCATION},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::sessions::{Session, SessionVerifier, SESSION_COOKIE};
use crate::error::ApiError;
use crate::security::SecurityHeaders;

pub const ONBOARDING_PATH: &str = "/onboarding";

/// Prefixes served without a session check
const PUBLIC_PREFIXES: &[&str] = &["/_next", "/favicon", "/ingest", ONBOARDING_PATH];

/// Prefixes the gate always runs for, static-looking or not
const ALWAYS_GATED_PREFIXES: &[&str] = &["/api", "/trpc"];

/// File extensions that mark a static asset. Matched as a prefix of the text
/// after any `.` in the path, so `htm` also covers `html`.
const STATIC_EXTENSIONS: &[&str] = &[
    "htm",
    "css",
    "js",
    "jpg",
    "jpeg",
    "webp",
    "png",
    "gif",
    "svg",
    "ttf",
    "woff",
    "ico",
    "csv",
    "doc",
    "xls",
    "zip",
    "webmanifest",
];

/// State needed by the session gate
#[derive(Clone)]
pub struct GateState {
    pub sessions: Option<Arc<SessionVerifier>>,
    pub security_headers: Arc<SecurityHeaders>,
}

/// Whether the gate handles this path at all
pub fn gate_applies(path: &str) -> bool {
    if ALWAYS_GATED_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return true;
    }
    !(path.starts_with("/_next") || looks_static(path))
}

fn looks_static(path: &str) -> bool {
    path.match_indices('.').any(|(i, _)| {
        let rest = &path[i + 1..];
        STATIC_EXTENSIONS.iter().any(|ext| {
            rest.strip_prefix(ext)
                .is_some_and(|after| *ext != "js" || !after.starts_with("on"))
        })
    })
}

fn is_public(path: &str) -> bool {
    PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

fn extract_session_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(String::from)
            })
        })
}

/// Session token from the Authorization header, falling back to the cookie
fn extract_session_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    extract_session_cookie(request)
}

fn resolve_session(state: &GateState, request: &Request) -> Option<Session> {
    let token = extract_session_token(request)?;
    let Some(verifier) = state.sessions.as_ref() else {
        tracing::debug!("session token present but no verification key configured");
        return None;
    };

    match verifier.verify(&token) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::debug!(error = %e, "session token rejected, treating request as signed out");
            None
        }
    }
}

fn onboarding_redirect() -> Response {
    (
        StatusCode::TEMPORARY_REDIRECT,
        [(LOCATION, HeaderValue::from_static(ONBOARDING_PATH))],
    )
        .into_response()
}

/// Middleware that resolves the session and enforces organization onboarding
pub async fn session_gate(
    State(state): State<GateState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if !gate_applies(&path) {
        return next.run(request).await;
    }

    if !is_public(&path) {
        if let Some(session) = resolve_session(&state, &request) {
            if !session.has_organization() {
                tracing::info!(
                    path = %path,
                    user_id = %session.user_id,
                    "session_gate: signed in without an organization, redirecting to onboarding"
                );
                return onboarding_redirect();
            }
            request.extensions_mut().insert(session);
        }
    }

    let mut response = next.run(request).await;
    state.security_headers.apply(response.headers_mut());
    response
}

/// Middleware that rejects requests the session gate left signed out
pub async fn require_session(request: Request, next: Next) -> Response {
    if request.extensions().get::<Session>().is_none() {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}
