//! Service configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. Selects the PostgreSQL backend.
    pub database_url: Option<String>,

    /// `RocksDB` data directory. Selects the `RocksDB` backend when no
    /// database URL is set and the `rocksdb-backend` feature is enabled.
    pub data_dir: Option<String>,

    /// Maximum pooled PostgreSQL connections.
    pub database_max_connections: u32,

    /// Bound on every store call, in milliseconds.
    pub store_timeout_ms: u64,

    /// JWT issuer base URL; JWKS is fetched from `<base>/.well-known/jwks.json`.
    pub auth_base_url: String,

    /// Expected JWT audience.
    pub auth_audience: String,

    /// Service API key for the generation pipeline and other backends.
    pub service_api_key: Option<String>,

    /// Admin API key for reconciliation endpoints.
    pub admin_api_key: Option<String>,

    /// Stripe webhook signing secret.
    pub stripe_webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Seconds between background reconciliation sweeps (0 disables).
    pub reconcile_interval_seconds: u64,

    /// Ledger keys fetched per sweep page.
    pub reconcile_batch_size: usize,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            data_dir: std::env::var("DATA_DIR").ok(),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            store_timeout_ms: env_parse("STORE_TIMEOUT_MS").unwrap_or(defaults.store_timeout_ms),
            auth_base_url: std::env::var("AUTH_BASE_URL").unwrap_or(defaults.auth_base_url),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            stripe_webhook_secret: load_stripe_webhook_secret(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            reconcile_interval_seconds: env_parse("RECONCILE_INTERVAL_SECONDS")
                .unwrap_or(defaults.reconcile_interval_seconds),
            reconcile_batch_size: env_parse("RECONCILE_BATCH_SIZE")
                .unwrap_or(defaults.reconcile_batch_size),
        }
    }

    /// Bound on every store call.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Interval of the background sweep, if enabled.
    #[must_use]
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_seconds > 0)
            .then(|| Duration::from_secs(self.reconcile_interval_seconds))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Load the Stripe webhook secret from file or environment.
fn load_stripe_webhook_secret() -> Option<String> {
    let secret_paths = [
        ".secrets/stripe.json",
        "songgate/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            if secrets.webhook_secret.is_some() {
                return secrets.webhook_secret;
            }
        }
    }

    // Fall back to environment variables
    tracing::debug!("Stripe secrets file not found, using environment variables");
    std::env::var("STRIPE_WEBHOOK_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            data_dir: None,
            database_max_connections: 10,
            store_timeout_ms: 5000,
            auth_base_url: "http://localhost:9999".into(),
            auth_audience: "authenticated".into(),
            service_api_key: None,
            admin_api_key: None,
            stripe_webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            reconcile_interval_seconds: 0,
            reconcile_batch_size: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_interval_zero_disables_sweeper() {
        let config = ServiceConfig::default();
        assert!(config.reconcile_interval().is_none());

        let config = ServiceConfig {
            reconcile_interval_seconds: 60,
            ..ServiceConfig::default()
        };
        assert_eq!(config.reconcile_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn store_timeout_defaults_to_five_seconds() {
        assert_eq!(ServiceConfig::default().store_timeout(), Duration::from_secs(5));
    }
}
