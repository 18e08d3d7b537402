//! Service configuration loaded once from the environment.
//!
//! # Environment Variables
//!
//! ## Required
//! - `JWT_SECRET` - HS256 secret used to verify identity tokens
//!
//! ## Optional
//! - `HOST` / `PORT` - Bind address (default: 0.0.0.0:8083)
//! - `DATABASE_URL` - `PostgreSQL` connection string; in-memory store when unset
//! - `CLIENT_URL` - Public storefront URL used for checkout return pages
//! - `API_PUBLIC_URL` - Public URL of this service, enables gateway webhooks
//! - `MP_ACCESS_TOKEN` - Gateway access token; mock gateway when unset
//! - `MP_API_BASE` - Gateway REST base (default: https://api.mercadopago.com)
//! - `GATEWAY_TIMEOUT_SECS` - Bound on outbound gateway calls (default: 10)
//! - `CHECKOUT_CURRENCY` - Currency id for preference items (default: ARS)
//! - `MAIL_API_URL`, `MAIL_API_KEY`, `MAIL_FROM` - Transactional email API; log-only when unset
//! - `NATS_URL` - Domain event publishing

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    /// In-memory store when absent.
    pub database_url: Option<SecretString>,
    pub jwt_secret: SecretString,
    pub checkout: CheckoutConfig,
    /// Mock gateway when absent.
    pub gateway: Option<GatewayConfig>,
    /// Log-only notifier when absent.
    pub mail: Option<MailConfig>,
    pub nats_url: Option<String>,
}

/// What checkout needs to talk about URLs and money.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Normalised storefront URL, no trailing slash.
    pub public_base_url: String,
    pub currency: String,
    /// Where the gateway should post payment notifications.
    pub notification_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub access_token: SecretString,
    pub api_base: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub from: String,
}

impl AppConfig {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let host = or_default("HOST", "0.0.0.0")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("HOST".to_string(), e.to_string()))?;
        let port = or_default("PORT", "8083")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("PORT".to_string(), e.to_string()))?;
        let timeout_secs = or_default("GATEWAY_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| ConfigError::InvalidEnvVar("GATEWAY_TIMEOUT_SECS".to_string(), "expected a positive integer".to_string()))?;

        let public_base_url = normalize_base_url(&or_default("CLIENT_URL", "http://localhost:5173"));
        let notification_url = get("API_PUBLIC_URL").map(|api| format!("{}/api/payments/webhook", normalize_base_url(&api)));

        let gateway = get("MP_ACCESS_TOKEN").map(|token| GatewayConfig {
            access_token: SecretString::from(token),
            api_base: get("MP_API_BASE").unwrap_or_else(|| "https://api.mercadopago.com".to_string()),
            timeout: Duration::from_secs(timeout_secs),
        });

        let mail = match get("MAIL_API_URL") {
            Some(api_url) => Some(MailConfig {
                api_url,
                api_key: SecretString::from(required("MAIL_API_KEY")?),
                from: required("MAIL_FROM")?,
            }),
            None => None,
        };

        Ok(Self {
            host,
            port,
            database_url: get("DATABASE_URL").map(SecretString::from),
            jwt_secret: SecretString::from(required("JWT_SECRET")?),
            checkout: CheckoutConfig { public_base_url, currency: or_default("CHECKOUT_CURRENCY", "ARS"), notification_url },
            gateway,
            mail,
            nats_url: get("NATS_URL"),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr { SocketAddr::new(self.host, self.port) }
}

/// Trims, drops trailing slashes and adds `http://` when no scheme is given.
pub fn normalize_base_url(raw: &str) -> String {
    let url = raw.trim().trim_end_matches('/');
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(" https://shop.example.com// "), "https://shop.example.com");
        assert_eq!(normalize_base_url("shop.example.com/"), "http://shop.example.com");
        assert_eq!(normalize_base_url("HTTP://Shop"), "HTTP://Shop");
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "s3cr3t-value")])).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.checkout.public_base_url, "http://localhost:5173");
        assert_eq!(config.checkout.currency, "ARS");
        assert!(config.gateway.is_none());
        assert!(config.database_url.is_none());
        assert!(config.checkout.notification_url.is_none());
    }

    #[test]
    fn test_missing_jwt_secret() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "JWT_SECRET"));
    }

    #[test]
    fn test_gateway_and_webhook_url() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "x"),
            ("MP_ACCESS_TOKEN", "APP_USR-1"),
            ("GATEWAY_TIMEOUT_SECS", "4"),
            ("API_PUBLIC_URL", "api.example.com/"),
        ]))
        .unwrap();
        let gateway = config.gateway.unwrap();
        assert_eq!(gateway.timeout, Duration::from_secs(4));
        assert_eq!(config.checkout.notification_url.as_deref(), Some("http://api.example.com/api/payments/webhook"));
    }

    #[test]
    fn test_invalid_port() {
        let err = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "x"), ("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref k, _) if k == "PORT"));
    }

    #[test]
    fn test_mail_requires_key() {
        let err = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "x"), ("MAIL_API_URL", "https://mail")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "MAIL_API_KEY"));
    }
}
