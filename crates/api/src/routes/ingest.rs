//! `/ingest` reverse proxy for analytics traffic
//!
//! Browser analytics calls go to our own origin and are forwarded to the
//! PostHog hosts. Trailing slashes are forwarded untouched; the upstream API
//! distinguishes `/e` from `/e/`.

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderMap, HeaderName},
    response::Response,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const INGEST_PREFIX: &str = "/ingest";

const MAX_INGEST_BODY: usize = 10 * 1024 * 1024;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Request headers passed through to the upstream
const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "content-type",
    "content-encoding",
    "user-agent",
    "origin",
    "referer",
];

/// Response headers passed back to the browser
const FORWARDED_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-encoding",
    "cache-control",
    "etag",
    "last-modified",
];

/// Upstream URL (without query) for an `/ingest` path. First match wins:
/// static assets, then `decide`, then everything else to the API host.
pub fn rewrite_target(path: &str, api_host: &str, assets_host: &str) -> Option<String> {
    let rest = path.strip_prefix(INGEST_PREFIX)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }

    if let Some(asset) = rest.strip_prefix("/static/") {
        return Some(format!("{}/static/{}", assets_host, asset));
    }
    if rest == "/decide" {
        return Some(format!("{}/decide", api_host));
    }

    let rest = if rest.is_empty() { "/" } else { rest };
    Some(format!("{}{}", api_host, rest))
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap, names: &[&'static str]) {
    for &name in names {
        if let Some(value) = from.get(name) {
            to.insert(HeaderName::from_static(name), value.clone());
        }
    }
}

/// Forward an `/ingest` request to the analytics hosts
pub async fn proxy_ingest(State(state): State<AppState>, request: Request) -> ApiResult<Response> {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let mut target = rewrite_target(
        &path,
        &state.config.posthog_host,
        &state.config.posthog_assets_host,
    )
    .ok_or_else(|| ApiError::NotFound(format!("Route {}", path)))?;
    if let Some(query) = query {
        target.push('?');
        target.push_str(&query);
    }

    let method = request.method().clone();
    let mut upstream_headers = HeaderMap::new();
    copy_headers(request.headers(), &mut upstream_headers, FORWARDED_REQUEST_HEADERS);

    let body = to_bytes(request.into_body(), MAX_INGEST_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Unreadable request body: {}", e)))?;

    tracing::debug!(method = %method, path = %path, upstream_url = %target, "Forwarding ingest request");

    let upstream = state
        .http_client
        .request(method, &target)
        .headers(upstream_headers)
        .timeout(UPSTREAM_TIMEOUT)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(upstream_url = %target, error = %e, "Ingest upstream unreachable");
            ApiError::Upstream(e.to_string())
        })?;

    let status = upstream.status();
    let mut headers = HeaderMap::new();
    copy_headers(upstream.headers(), &mut headers, FORWARDED_RESPONSE_HEADERS);
    let bytes = upstream.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
