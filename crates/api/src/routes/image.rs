//! Remote image proxy with a host allow-list
//!
//! `GET /image?url=...` serves images from configured remote origins only.
//! Patterns are written as URLs: `https://img.clerk.com`,
//! `https://*.example.com`, `https://cdn.example.com:8443/avatars/**`.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use reqwest::{redirect, Client};
use serde::Deserialize;
use url::Url;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_CONTROL: &str = "public, max-age=60, must-revalidate";
const MAX_IMAGE_BODY: usize = 10 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// `*.suffix`: exactly one extra label
    OneLabel(String),
    /// `**.suffix`: one or more extra labels
    AnyLabels(String),
}

/// An allowed remote image origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePattern {
    protocol: String,
    host: HostPattern,
    port: Option<u16>,
    /// Exact path, or a prefix when written with a trailing `/**`
    pathname: Option<String>,
}

impl RemotePattern {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let (protocol, rest) = pattern
            .split_once("://")
            .ok_or_else(|| format!("`{pattern}` has no protocol"))?;
        let protocol = protocol.to_ascii_lowercase();
        if protocol != "http" && protocol != "https" {
            return Err(format!("`{pattern}` must use http or https"));
        }

        let (authority, pathname) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(&rest[i..])),
            None => (rest, None),
        };

        let (hostname, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("`{pattern}` has an invalid port"))?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        if hostname.is_empty() {
            return Err(format!("`{pattern}` has no hostname"));
        }

        let hostname = hostname.to_ascii_lowercase();
        let host = if let Some(suffix) = hostname.strip_prefix("**.") {
            HostPattern::AnyLabels(suffix.to_string())
        } else if let Some(suffix) = hostname.strip_prefix("*.") {
            HostPattern::OneLabel(suffix.to_string())
        } else {
            HostPattern::Exact(hostname)
        };

        Ok(Self {
            protocol,
            host,
            port,
            pathname: pathname.filter(|p| *p != "/" && *p != "/**").map(str::to_string),
        })
    }

    pub fn matches(&self, url: &Url) -> bool {
        if url.scheme() != self.protocol || url.port() != self.port {
            return false;
        }

        let Some(host) = url.host_str() else {
            return false;
        };
        let host_ok = match &self.host {
            HostPattern::Exact(expected) => host == expected,
            HostPattern::OneLabel(suffix) => host
                .strip_suffix(suffix.as_str())
                .and_then(|label| label.strip_suffix('.'))
                .is_some_and(|label| !label.is_empty() && !label.contains('.')),
            HostPattern::AnyLabels(suffix) => host
                .strip_suffix(suffix.as_str())
                .and_then(|label| label.strip_suffix('.'))
                .is_some_and(|label| !label.is_empty()),
        };
        if !host_ok {
            return false;
        }

        match self.pathname.as_deref() {
            None => true,
            Some(pattern) => match pattern.strip_suffix("**") {
                Some(prefix) => url.path().starts_with(prefix),
                None => url.path() == pattern,
            },
        }
    }
}

/// Parse `raw` and check it against the allow-list
pub fn allowed_url(raw: &str, patterns: &[RemotePattern]) -> ApiResult<Url> {
    let url = Url::parse(raw)
        .map_err(|_| ApiError::BadRequest("\"url\" parameter is invalid".to_string()))?;
    if !patterns.iter().any(|p| p.matches(&url)) {
        return Err(ApiError::BadRequest(
            "\"url\" parameter is not allowed".to_string(),
        ));
    }
    Ok(url)
}

/// Client for image fetches. Redirects are followed only while every hop
/// stays on the allow-list; anything else stops at the redirect response.
pub fn image_client(patterns: &[RemotePattern]) -> reqwest::Result<Client> {
    let patterns = patterns.to_vec();
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.stop()
        } else if patterns.iter().any(|p| p.matches(attempt.url())) {
            attempt.follow()
        } else {
            tracing::warn!(location = %attempt.url(), "Image redirect left the allow-list");
            attempt.stop()
        }
    });

    Client::builder().redirect(policy).build()
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
}

/// Fetch an allowed remote image and relay it
pub async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> ApiResult<Response> {
    let raw = query
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("\"url\" parameter is required".to_string()))?;
    let url = allowed_url(&raw, &state.config.image_remote_patterns)?;

    let mut upstream = state
        .image_client
        .get(url.clone())
        .timeout(UPSTREAM_TIMEOUT)
        .send()
        .await?;

    if upstream.status().is_redirection() {
        return Err(ApiError::BadRequest(
            "\"url\" parameter is not allowed".to_string(),
        ));
    }
    if !upstream.status().is_success() {
        tracing::warn!(url = %url, status = %upstream.status(), "Remote image fetch failed");
        return Err(ApiError::Upstream(format!(
            "{} answered {}",
            url,
            upstream.status()
        )));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .filter(|v| v.to_str().is_ok_and(|ct| ct.starts_with("image/")))
        .ok_or_else(|| {
            ApiError::BadRequest("The requested resource isn't a valid image.".to_string())
        })?;
    let cache_control = upstream
        .headers()
        .get(header::CACHE_CONTROL)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CACHE_CONTROL));

    if upstream
        .content_length()
        .is_some_and(|len| len > MAX_IMAGE_BODY as u64)
    {
        return Err(ApiError::Upstream(format!("{} is too large", url)));
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = upstream.chunk().await? {
        if bytes.len() + chunk.len() > MAX_IMAGE_BODY {
            return Err(ApiError::Upstream(format!("{} is too large", url)));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
            (header::VARY, HeaderValue::from_static("Accept")),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use eventdesk_shared::MemoryIdentityStore;
    use tower::ServiceExt;

    use super::*;
    use crate::routes::create_router;
    use crate::state::test_support::state;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn image_uri(target: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
        format!("/image?url={}", encoded)
    }

    #[test]
    fn test_exact_host_pattern() {
        let pattern = RemotePattern::parse("https://img.clerk.com").unwrap();
        assert!(pattern.matches(&url("https://img.clerk.com/eyJ0eXBlIjoi.png")));
        assert!(!pattern.matches(&url("http://img.clerk.com/a.png")));
        assert!(!pattern.matches(&url("https://img.clerk.com.evil.example/a.png")));
        assert!(!pattern.matches(&url("https://img.clerk.com:8443/a.png")));
    }

    #[test]
    fn test_wildcard_host_patterns() {
        let one = RemotePattern::parse("https://*.example.com").unwrap();
        assert!(one.matches(&url("https://cdn.example.com/a.png")));
        assert!(!one.matches(&url("https://a.b.example.com/a.png")));
        assert!(!one.matches(&url("https://example.com/a.png")));

        let any = RemotePattern::parse("https://**.example.com").unwrap();
        assert!(any.matches(&url("https://a.b.example.com/a.png")));
        assert!(!any.matches(&url("https://badexample.com/a.png")));
    }

    #[test]
    fn test_pathname_and_port_patterns() {
        let pattern = RemotePattern::parse("https://cdn.example.com:8443/avatars/**").unwrap();
        assert!(pattern.matches(&url("https://cdn.example.com:8443/avatars/1.png")));
        assert!(!pattern.matches(&url("https://cdn.example.com:8443/private/1.png")));
        assert!(!pattern.matches(&url("https://cdn.example.com/avatars/1.png")));
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(RemotePattern::parse("img.clerk.com").is_err());
        assert!(RemotePattern::parse("ftp://img.clerk.com").is_err());
        assert!(RemotePattern::parse("https://img.clerk.com:port").is_err());
    }

    #[test]
    fn test_allowed_url_rejects_unlisted_hosts() {
        let patterns = vec![RemotePattern::parse("https://img.clerk.com").unwrap()];
        assert!(allowed_url("https://img.clerk.com/a.png", &patterns).is_ok());
        assert!(matches!(
            allowed_url("https://tracker.example/a.png", &patterns),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            allowed_url("not a url", &patterns),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_relays_allowed_image() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/avatar.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body([0x89, b'P', b'N', b'G'])
            .create_async()
            .await;

        let origin = server.url();
        let app = create_router(state(
            &[("IMAGE_REMOTE_PATTERNS", origin.as_str())],
            Arc::new(MemoryIdentityStore::new()),
        ));

        let target = format!("{}/avatar.png", origin);
        let response = app
            .oneshot(Request::builder().uri(image_uri(&target)).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::VARY], "Accept");
        assert_eq!(response.headers()[header::CACHE_CONTROL], DEFAULT_CACHE_CONTROL);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_redirect_off_the_allow_list_is_400() {
        let mut allowed = mockito::Server::new_async().await;
        let mut other = mockito::Server::new_async().await;
        let hidden = other
            .mock("GET", "/secret.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("INTERNAL")
            .expect(0)
            .create_async()
            .await;
        allowed
            .mock("GET", "/avatar.png")
            .with_status(302)
            .with_header("location", &format!("{}/secret.png", other.url()))
            .create_async()
            .await;

        let origin = allowed.url();
        let app = create_router(state(
            &[("IMAGE_REMOTE_PATTERNS", origin.as_str())],
            Arc::new(MemoryIdentityStore::new()),
        ));

        let target = format!("{}/avatar.png", origin);
        let response = app
            .oneshot(Request::builder().uri(image_uri(&target)).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        hidden.assert_async().await;
    }

    #[tokio::test]
    async fn test_redirect_within_the_allow_list_is_followed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/old.png")
            .with_status(301)
            .with_header("location", &format!("{}/new.png", server.url()))
            .create_async()
            .await;
        server
            .mock("GET", "/new.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("PNG")
            .create_async()
            .await;

        let origin = server.url();
        let app = create_router(state(
            &[("IMAGE_REMOTE_PATTERNS", origin.as_str())],
            Arc::new(MemoryIdentityStore::new()),
        ));

        let target = format!("{}/old.png", origin);
        let response = app
            .oneshot(Request::builder().uri(image_uri(&target)).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"PNG");
    }

    #[tokio::test]
    async fn test_oversized_image_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/huge.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![0u8; MAX_IMAGE_BODY + 1])
            .create_async()
            .await;

        let origin = server.url();
        let app = create_router(state(
            &[("IMAGE_REMOTE_PATTERNS", origin.as_str())],
            Arc::new(MemoryIdentityStore::new()),
        ));

        let target = format!("{}/huge.png", origin);
        let response = app
            .oneshot(Request::builder().uri(image_uri(&target)).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_unlisted_origin_is_400() {
        let app = create_router(state(&[], Arc::new(MemoryIdentityStore::new())));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/image?url=https%3A%2F%2Ftracker.example%2Fpixel.gif")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
