//! Environment configuration

use std::net::SocketAddr;

use thiserror::Error;

use crate::routes::image::RemotePattern;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3002";
pub const DEFAULT_POSTHOG_HOST: &str = "https://us.i.posthog.com";
pub const DEFAULT_POSTHOG_ASSETS_HOST: &str = "https://us-assets.i.posthog.com";
pub const DEFAULT_IMAGE_REMOTE_PATTERNS: &str = "https://img.clerk.com";
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub run_migrations: bool,
    /// Svix signing secret for identity-provider webhooks. Absent means the
    /// webhook endpoint answers "Not configured".
    pub clerk_webhook_secret: Option<String>,
    /// PEM public key used to verify session tokens
    pub clerk_jwt_key: Option<String>,
    /// Enables the feature-flag toolbar variant of the security headers
    pub flags_secret: Option<String>,
    pub posthog_key: Option<String>,
    pub posthog_host: String,
    pub posthog_assets_host: String,
    pub image_remote_patterns: Vec<RemotePattern>,
    pub allowed_origins: Vec<String>,
    pub enable_billing: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_address = var("BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "BIND_ADDRESS",
                reason: e.to_string(),
            })?;

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let image_remote_patterns = var("IMAGE_REMOTE_PATTERNS")
            .unwrap_or_else(|| DEFAULT_IMAGE_REMOTE_PATTERNS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                RemotePattern::parse(s).map_err(|reason| ConfigError::Invalid {
                    name: "IMAGE_REMOTE_PATTERNS",
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected `pretty` or `json`, got `{other}`"),
                })
            }
        };

        Ok(Self {
            bind_address,
            database_url,
            run_migrations: parse_flag(var("RUN_MIGRATIONS"), true, "RUN_MIGRATIONS")?,
            clerk_webhook_secret: var("CLERK_WEBHOOK_SECRET"),
            clerk_jwt_key: var("CLERK_JWT_KEY").map(|pem| pem.replace("\\n", "\n")),
            flags_secret: var("FLAGS_SECRET"),
            posthog_key: var("POSTHOG_KEY").or_else(|| var("NEXT_PUBLIC_POSTHOG_KEY")),
            posthog_host: trim_host(var("POSTHOG_HOST"), DEFAULT_POSTHOG_HOST),
            posthog_assets_host: trim_host(var("POSTHOG_ASSETS_HOST"), DEFAULT_POSTHOG_ASSETS_HOST),
            image_remote_patterns,
            allowed_origins,
            enable_billing: parse_flag(var("ENABLE_BILLING"), false, "ENABLE_BILLING")?,
            log_format,
        })
    }
}

fn trim_host(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_flag(
    value: Option<String>,
    default: bool,
    name: &'static str,
) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/db")]))
            .unwrap();

        assert_eq!(config.bind_address.port(), 3002);
        assert!(config.clerk_webhook_secret.is_none());
        assert_eq!(config.posthog_host, DEFAULT_POSTHOG_HOST);
        assert_eq!(config.posthog_assets_host, DEFAULT_POSTHOG_ASSETS_HOST);
        assert_eq!(config.image_remote_patterns.len(), 1);
        assert!(config.run_migrations);
        assert!(!config.enable_billing);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_database_url_required() {
        let result = Config::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_empty_secret_counts_as_unset() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("CLERK_WEBHOOK_SECRET", "  "),
        ]))
        .unwrap();
        assert!(config.clerk_webhook_secret.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("BIND_ADDRESS", "not-an-address"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "BIND_ADDRESS", .. })
        ));

        let result = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("ENABLE_BILLING", "maybe"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "ENABLE_BILLING", .. })
        ));
    }

    #[test]
    fn test_posthog_host_trailing_slash_trimmed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("POSTHOG_HOST", "https://eu.i.posthog.com/"),
        ]))
        .unwrap();
        assert_eq!(config.posthog_host, "https://eu.i.posthog.com");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("DATABASE_URL", "postgres://env/db");
        std::env::set_var("LOG_FORMAT", "json");
        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "postgres://env/db");
        assert_eq!(config.log_format, LogFormat::Json);
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("LOG_FORMAT");
    }
}
