//! Application state

use std::sync::Arc;

use eventdesk_shared::IdentityStore;
use reqwest::Client;

use crate::{
    analytics::{AnalyticsSink, NoopAnalytics, PostHogClient},
    auth::{GateState, SessionVerifier},
    config::{Config, ConfigError},
    routes::image::image_client,
    security::SecurityHeaders,
    webhooks::SignatureVerifier,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn IdentityStore>,
    /// Process-wide analytics sink, flushed once per webhook request
    pub analytics: Arc<dyn AnalyticsSink>,
    /// Absent when no webhook secret is configured
    pub webhook_verifier: Option<Arc<SignatureVerifier>>,
    pub sessions: Option<Arc<SessionVerifier>>,
    pub security_headers: Arc<SecurityHeaders>,
    /// Client for analytics delivery and the ingest proxy
    pub http_client: Client,
    /// Client for `/image`, redirects restricted to the allow-list
    pub image_client: Client,
    /// Payments client (only available when billing feature is enabled)
    #[cfg(feature = "billing")]
    pub billing: Option<Arc<eventdesk_billing::StripeClient>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn IdentityStore>) -> Result<Self, ConfigError> {
        let http_client = Client::new();
        let image_client =
            image_client(&config.image_remote_patterns).map_err(|e| ConfigError::Invalid {
                name: "IMAGE_REMOTE_PATTERNS",
                reason: e.to_string(),
            })?;

        let webhook_verifier = match config.clerk_webhook_secret.as_deref() {
            Some(secret) => {
                let verifier =
                    SignatureVerifier::new(secret).map_err(|e| ConfigError::Invalid {
                        name: "CLERK_WEBHOOK_SECRET",
                        reason: e.to_string(),
                    })?;
                tracing::info!("Identity webhook verification enabled");
                Some(Arc::new(verifier))
            }
            None => {
                tracing::warn!("CLERK_WEBHOOK_SECRET not set, /webhooks/auth will answer \"Not configured\"");
                None
            }
        };

        let sessions = match config.clerk_jwt_key.as_deref() {
            Some(pem) => {
                let verifier = SessionVerifier::from_rsa_pem(pem).map_err(|e| ConfigError::Invalid {
                    name: "CLERK_JWT_KEY",
                    reason: e.to_string(),
                })?;
                tracing::info!("Session verification enabled");
                Some(Arc::new(verifier))
            }
            None => {
                tracing::warn!("CLERK_JWT_KEY not set, every request is treated as signed out");
                None
            }
        };

        let analytics: Arc<dyn AnalyticsSink> = match config.posthog_key.as_deref() {
            Some(key) => {
                tracing::info!(host = %config.posthog_host, "PostHog analytics enabled");
                Arc::new(PostHogClient::new(
                    http_client.clone(),
                    config.posthog_host.clone(),
                    key,
                ))
            }
            None => {
                tracing::warn!("Analytics not configured (missing POSTHOG_KEY)");
                Arc::new(NoopAnalytics)
            }
        };

        let security_headers = Arc::new(SecurityHeaders::new(config.flags_secret.is_some()));

        #[cfg(feature = "billing")]
        let billing = if config.enable_billing {
            match eventdesk_billing::StripeClient::from_env() {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        #[cfg(not(feature = "billing"))]
        tracing::info!("Billing feature not compiled in (build without --features billing)");

        Ok(Self {
            config,
            store,
            analytics,
            webhook_verifier,
            sessions,
            security_headers,
            http_client,
            image_client,
            #[cfg(feature = "billing")]
            billing,
        })
    }

    /// Replace the analytics sink
    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Replace the session verifier
    pub fn with_sessions(mut self, sessions: SessionVerifier) -> Self {
        self.sessions = Some(Arc::new(sessions));
        self
    }

    pub fn gate_state(&self) -> GateState {
        GateState {
            sessions: self.sessions.clone(),
            security_headers: self.security_headers.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use eventdesk_shared::MemoryIdentityStore;

    use super::*;

    pub const TEST_WEBHOOK_SECRET: &str = "whsec_dGVzdC1zaWduaW5nLWtleS0wMTIzNDU2Nzg5";

    pub fn config(vars: &[(&str, &str)]) -> Config {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("DATABASE_URL".to_string())
            .or_insert_with(|| "postgres://localhost/eventdesk_test".to_string());
        Config::from_lookup(move |name| map.get(name).cloned()).unwrap()
    }

    pub fn state(vars: &[(&str, &str)], store: Arc<MemoryIdentityStore>) -> AppState {
        AppState::new(config(vars), store).unwrap()
    }
}
