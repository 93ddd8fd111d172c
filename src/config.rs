// =============================================================================
// Client Configuration — credentials, environment, and product parameters
// =============================================================================
//
// All fields carry serde defaults so a partial JSON file (or none at all) is
// enough to build a public-data-only client. Credentials are optional: when
// any of key, secret or passphrase is missing the session can only reach
// public market-data endpoints.
//
// SECURITY: secrets never appear in `Debug` output or log lines.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::session::ProductParams;
use crate::types::{Environment, MarginMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_base_url() -> String {
    "https://api.bitget.com".to_string()
}

fn default_product_type() -> String {
    "USDT-FUTURES".to_string()
}

fn default_margin_coin() -> String {
    "USDT".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_min_request_interval_ms() -> u64 {
    50
}

// =============================================================================
// Credentials
// =============================================================================

/// A complete API key triple.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing)]
    pub api_secret: Option<String>,

    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,

    /// Live funds or Bitget paper trading.
    #[serde(default)]
    pub environment: Environment,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bitget `productType` attached to every futures request.
    #[serde(default = "default_product_type")]
    pub product_type: String,

    /// Bitget `marginCoin` attached to position and account requests.
    #[serde(default = "default_margin_coin")]
    pub margin_coin: String,

    /// Margin mode stated on new orders.
    #[serde(default)]
    pub default_margin_mode: MarginMode,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum spacing between two outbound requests.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            passphrase: None,
            environment: Environment::Live,
            base_url: default_base_url(),
            product_type: default_product_type(),
            margin_coin: default_margin_coin(),
            default_margin_mode: MarginMode::Cross,
            request_timeout_secs: default_request_timeout_secs(),
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `BITGET_*` environment variables.
    ///
    /// * `BITGET_API_KEY`, `BITGET_API_SECRET`, `BITGET_API_PASSPHRASE`
    /// * `BITGET_DEMO`: `1`/`true`/`yes` selects paper trading
    /// * `BITGET_MARGIN_MODE`: `isolated` or `cross`
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            api_key: non_empty_env("BITGET_API_KEY"),
            api_secret: non_empty_env("BITGET_API_SECRET"),
            passphrase: non_empty_env("BITGET_API_PASSPHRASE"),
            ..Self::default()
        };

        if let Some(flag) = non_empty_env("BITGET_DEMO") {
            if matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                config.environment = Environment::Demo;
            }
        }
        if let Some(mode) = non_empty_env("BITGET_MARGIN_MODE") {
            config.default_margin_mode = mode
                .parse()
                .context("invalid BITGET_MARGIN_MODE")?;
        }

        Ok(config)
    }

    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read client config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse client config from {}", path.display()))?;

        info!(
            path = %path.display(),
            environment = %config.environment,
            product_type = %config.product_type,
            authenticated = config.credentials().is_some(),
            "client config loaded"
        );

        Ok(config)
    }

    /// The full credential triple, if every part is present.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.api_key, &self.api_secret, &self.passphrase) {
            (Some(api_key), Some(secret), Some(passphrase)) => Some(Credentials {
                api_key: api_key.clone(),
                secret: secret.clone(),
                passphrase: passphrase.clone(),
            }),
            _ => None,
        }
    }

    pub fn product(&self) -> ProductParams {
        ProductParams {
            product_type: self.product_type.clone(),
            margin_coin: self.margin_coin.clone(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("product_type", &self.product_type)
            .field("margin_coin", &self.margin_coin)
            .field("default_margin_mode", &self.default_margin_mode)
            .finish()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
