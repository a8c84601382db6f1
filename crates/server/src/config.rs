//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ECOMETAL_BASE_URL` - Public URL of the shop (payment redirects)
//! - `SANITY_PROJECT_ID` - Content store project id
//! - `SANITY_DATASET` - Content store dataset (e.g. production)
//! - `SANITY_API_TOKEN` - Content store write token
//! - `STRIPE_SECRET_KEY` - Stripe API secret key
//! - `STRIPE_WEBHOOK_SECRET` - Stripe webhook signing secret
//!
//! ## Optional
//! - `ECOMETAL_HOST` - Bind address (default: 127.0.0.1)
//! - `ECOMETAL_PORT` - Listen port (default: 3000)
//! - `SANITY_API_VERSION` - Content store API version (default: 2021-10-21)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::net::IpAddr;

use secrecy::SecretString;
use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Server application configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of the shop
    pub base_url: String,
    /// Content store configuration
    pub sanity: SanityConfig,
    /// Payment processor configuration
    pub stripe: StripeConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Sanity content store configuration.
#[derive(Debug, Clone)]
pub struct SanityConfig {
    /// Project id (subdomain of the API host)
    pub project_id: String,
    /// Dataset name (e.g. production)
    pub dataset: String,
    /// API version date
    pub api_version: String,
    /// Write token (secret)
    pub token: SecretString,
}

/// Stripe configuration.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// API secret key
    pub secret_key: SecretString,
    /// Webhook endpoint signing secret
    pub webhook_secret: SecretString,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = get_env_or_default("ECOMETAL_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("ECOMETAL_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("ECOMETAL_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("ECOMETAL_PORT".to_string(), e.to_string()))?;
        let base_url = get_required_env("ECOMETAL_BASE_URL")?;

        let sanity = SanityConfig {
            project_id: get_required_env("SANITY_PROJECT_ID")?,
            dataset: get_required_env("SANITY_DATASET")?,
            api_version: get_env_or_default("SANITY_API_VERSION", "2021-10-21"),
            token: get_required_secret("SANITY_API_TOKEN")?,
        };

        let stripe = StripeConfig {
            secret_key: get_required_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_required_secret("STRIPE_WEBHOOK_SECRET")?,
        };

        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            host,
            port,
            base_url,
            sanity,
            stripe,
            sentry_dsn,
        })
    }
}

fn get_required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn get_required_secret(name: &str) -> Result<SecretString, ConfigError> {
    get_required_env(name).map(SecretString::from)
}

fn get_env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn get_optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
