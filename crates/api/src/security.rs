//! Security response headers
//!
//! Applied by the session gate to every response it lets through. The
//! toolbar variant, enabled when a feature-flag secret is configured, opens
//! the CSP to the preview toolbar origin.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

const TOOLBAR_ORIGIN: &str = "https://vercel.live";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeaders {
    csp: HeaderValue,
}

impl SecurityHeaders {
    pub fn new(with_toolbar: bool) -> Self {
        Self {
            csp: HeaderValue::from_str(&build_csp(with_toolbar))
                .unwrap_or_else(|_| HeaderValue::from_static("default-src 'self'")),
        }
    }

    pub fn content_security_policy(&self) -> &HeaderValue {
        &self.csp
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
        headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
        headers.insert(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(header::X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("off"));
        headers.insert(
            HeaderName::from_static("x-permitted-cross-domain-policies"),
            HeaderValue::from_static("none"),
        );
        headers.insert(
            HeaderName::from_static("origin-agent-cluster"),
            HeaderValue::from_static("?1"),
        );
        headers.insert(
            HeaderName::from_static("x-download-options"),
            HeaderValue::from_static("noopen"),
        );
        headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("0"));
        headers.insert(header::CONTENT_SECURITY_POLICY, self.csp.clone());
    }
}

fn build_csp(with_toolbar: bool) -> String {
    let extra = |base: &str| {
        if with_toolbar {
            format!("{} {}", base, TOOLBAR_ORIGIN)
        } else {
            base.to_string()
        }
    };

    let frame_src = if with_toolbar {
        format!("frame-src {}", TOOLBAR_ORIGIN)
    } else {
        "frame-src 'none'".to_string()
    };

    [
        "base-uri 'none'".to_string(),
        "child-src 'none'".to_string(),
        extra("connect-src 'self'"),
        "default-src 'self'".to_string(),
        "font-src 'self'".to_string(),
        "form-action 'self'".to_string(),
        "frame-ancestors 'none'".to_string(),
        frame_src,
        extra("img-src 'self' blob: data:"),
        "manifest-src 'self'".to_string(),
        "media-src 'self'".to_string(),
        "object-src 'none'".to_string(),
        extra("script-src 'self'"),
        "style-src 'self'".to_string(),
        "worker-src 'self'".to_string(),
        "upgrade-insecure-requests".to_string(),
    ]
    .join("; ")
}
