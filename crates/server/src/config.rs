//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ZC_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `ZC_BASE_URL` - Public URL of the website, used for checkout return URLs
//! - `STRIPE_SECRET_KEY` - Stripe secret API key
//!
//! ## Optional
//! - `ZC_HOST` - Bind address (default: 127.0.0.1)
//! - `ZC_PORT` - Listen port (default: 3000)
//! - `ZC_ALLOWED_ORIGINS` - Comma-separated origins allowed by CORS
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret (`whsec_...`). Without it
//!   the webhook endpoint rejects every delivery.
//! - `STRIPE_API_BASE` - API base URL (default: `https://api.stripe.com`)
//! - `STRIPE_CHECKOUT_HOST` - Host checkout redirects must point at
//!   (default: `checkout.stripe.com`)
//! - `PAYPAL_CLIENT_ID` / `PAYPAL_CLIENT_SECRET` - Enables the PayPal order flow
//! - `PAYPAL_API_BASE` - PayPal REST base (default: sandbox)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_STRIPE_CHECKOUT_HOST: &str = "checkout.stripe.com";
const DEFAULT_PAYPAL_API_BASE: &str = "https://api-m.sandbox.paypal.com";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of the website (no trailing slash)
    pub base_url: String,
    /// Origins allowed to call the API from a browser
    pub allowed_origins: Vec<String>,
    /// Stripe configuration
    pub stripe: StripeConfig,
    /// PayPal configuration, if the PayPal flow is enabled
    pub paypal: Option<PayPalConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name (e.g. production, staging)
    pub sentry_environment: Option<String>,
}

/// Stripe configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_live_...` / `sk_test_...`)
    pub secret_key: SecretString,
    /// Webhook signing secret
    pub webhook_secret: Option<SecretString>,
    /// API base URL
    pub api_base: String,
    /// Host that hosted checkout sessions live on
    pub checkout_host: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_base", &self.api_base)
            .field("checkout_host", &self.checkout_host)
            .finish()
    }
}

/// PayPal REST configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PayPalConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: SecretString,
    /// REST API base URL
    pub api_base: String,
}

impl std::fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("ZC_DATABASE_URL")?;
        let host = get_env_or_default("ZC_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("ZC_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("ZC_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("ZC_PORT".to_string(), e.to_string()))?;
        let base_url = parse_base_url("ZC_BASE_URL", &get_required_env("ZC_BASE_URL")?)?;
        let allowed_origins = parse_origins(&get_env_or_default("ZC_ALLOWED_ORIGINS", ""));

        let stripe = StripeConfig::from_env()?;
        let paypal = PayPalConfig::from_env()?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            allowed_origins,
            stripe,
            paypal,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl StripeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let webhook_secret = match get_optional_env("STRIPE_WEBHOOK_SECRET") {
            Some(value) => {
                validate_secret_strength(&value, "STRIPE_WEBHOOK_SECRET")?;
                Some(SecretString::from(value))
            }
            None => None,
        };

        Ok(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret,
            api_base: parse_base_url(
                "STRIPE_API_BASE",
                &get_env_or_default("STRIPE_API_BASE", DEFAULT_STRIPE_API_BASE),
            )?,
            checkout_host: get_env_or_default("STRIPE_CHECKOUT_HOST", DEFAULT_STRIPE_CHECKOUT_HOST),
        })
    }
}

impl PayPalConfig {
    /// PayPal is enabled only when both credentials are present.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let client_id = get_optional_env("PAYPAL_CLIENT_ID");
        let has_secret = std::env::var("PAYPAL_CLIENT_SECRET").is_ok();

        match (client_id, has_secret) {
            (None, false) => Ok(None),
            (Some(client_id), true) => Ok(Some(Self {
                client_id,
                client_secret: get_validated_secret("PAYPAL_CLIENT_SECRET")?,
                api_base: parse_base_url(
                    "PAYPAL_API_BASE",
                    &get_env_or_default("PAYPAL_API_BASE", DEFAULT_PAYPAL_API_BASE),
                )?,
            })),
            (None, true) => Err(ConfigError::MissingEnvVar("PAYPAL_CLIENT_ID".to_string())),
            (Some(_), false) => Err(ConfigError::MissingEnvVar(
                "PAYPAL_CLIENT_SECRET".to_string(),
            )),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to the generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional, non-empty environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an absolute http(s) URL and strip any trailing slash.
fn parse_base_url(key: &str, value: &str) -> Result<String, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Split a comma-separated origin list, dropping blanks and trailing slashes.
fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the provider dashboard."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
impl ServerConfig {
    /// Configuration pointing at local fakes, for router and service tests.
    pub(crate) fn for_tests() -> Self {
        Self {
            database_url: SecretString::from("postgres://localhost/zero_cost_test"),
            host: "127.0.0.1".parse().unwrap_or(IpAddr::from([127, 0, 0, 1])),
            port: 3000,
            base_url: "https://zerocost.test".to_string(),
            allowed_origins: vec!["https://zerocost.test".to_string()],
            stripe: StripeConfig {
                secret_key: SecretString::from("sk_test_4eC39HqLyjWDarjtT1zdp7dc"),
                webhook_secret: Some(SecretString::from("whsec_test_9fK2mQ7xL1pZ4vB8")),
                api_base: DEFAULT_STRIPE_API_BASE.to_string(),
                checkout_host: DEFAULT_STRIPE_CHECKOUT_HOST.to_string(),
            },
            paypal: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}
