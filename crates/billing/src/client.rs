//! Stripe client initialization

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};

/// Stripe API version the integration was written against.
///
/// Recorded in config and startup logs only. `async-stripe` sends the
/// `Stripe-Version` its generated types were built for and offers no
/// per-client override, so this value never reaches the wire.
pub const STRIPE_API_VERSION: &str = "2025-10-29.clover";

/// Stripe credentials and pinned settings
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Always [`STRIPE_API_VERSION`]; informational
    pub api_version: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &redact(&self.secret_key))
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl StripeConfig {
    /// Build a config from a secret key, rejecting keys that are clearly not
    /// Stripe secret or restricted keys.
    pub fn new(secret_key: impl Into<String>) -> BillingResult<Self> {
        let secret_key = secret_key.into();
        let secret_key = secret_key.trim().to_string();

        if secret_key.is_empty() {
            return Err(BillingError::Config(
                "STRIPE_SECRET_KEY is empty".to_string(),
            ));
        }
        if !(secret_key.starts_with("sk_") || secret_key.starts_with("rk_")) {
            return Err(BillingError::Config(
                "STRIPE_SECRET_KEY must be a secret (sk_) or restricted (rk_) key".to_string(),
            ));
        }

        Ok(Self {
            secret_key,
            api_version: STRIPE_API_VERSION.to_string(),
        })
    }

    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        Self::new(secret_key)
    }

    /// True for `sk_live_` / `rk_live_` keys
    pub fn is_live_mode(&self) -> bool {
        self.secret_key.contains("_live_")
    }
}

/// Shared handle to the Stripe API
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        tracing::info!(
            api_version = %config.api_version,
            live_mode = config.is_live_mode(),
            "Stripe client initialized"
        );
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// Raw client for `stripe::*` resource calls
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(8).collect();
    format!("{prefix}…")
}
