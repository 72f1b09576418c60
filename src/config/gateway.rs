//! Broker gateway settings.
//!
//! Simulated fills are a sandbox-only testing aid. `GatewayConfig` keeps its
//! fields private and only its constructors can turn fallback on, so a
//! production gateway with simulation enabled cannot be built.

use super::Config;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const PRODUCTION_URL: &str = "https://api.tradier.com/v1";
const SANDBOX_URL: &str = "https://sandbox.tradier.com/v1";

/// Which brokerage environment the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Production,
    Sandbox,
}

impl Endpoint {
    pub fn default_url(&self) -> &'static str {
        match self {
            Endpoint::Production => PRODUCTION_URL,
            Endpoint::Sandbox => SANDBOX_URL,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Endpoint::Production)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Production => write!(f, "production"),
            Endpoint::Sandbox => write!(f, "sandbox"),
        }
    }
}

/// Rejected gateway configurations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("simulated fills cannot be enabled against the production endpoint")]
    FallbackInProduction,

    #[error("max_retries must be at least 1")]
    NoAttempts,
}

/// Immutable settings for one `BrokerGateway`.
#[derive(Clone)]
pub struct GatewayConfig {
    endpoint: Endpoint,
    base_url: String,
    api_key: String,
    account_id: String,
    sandbox_fallback: bool,
    max_retries: u32,
    base_delay: Duration,
    request_timeout: Duration,
    overall_deadline: Duration,
}

impl GatewayConfig {
    fn new(endpoint: Endpoint, api_key: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            endpoint,
            base_url: endpoint.default_url().to_string(),
            api_key: api_key.into(),
            account_id: account_id.into(),
            sandbox_fallback: false,
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            overall_deadline: Duration::from_secs(90),
        }
    }

    pub fn production(api_key: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self::new(Endpoint::Production, api_key, account_id)
    }

    pub fn sandbox(api_key: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self::new(Endpoint::Sandbox, api_key, account_id)
    }

    /// Enable simulated fills. Fails for production endpoints.
    pub fn with_sandbox_fallback(mut self) -> Result<Self, ConfigError> {
        if self.endpoint.is_production() {
            return Err(ConfigError::FallbackInProduction);
        }
        self.sandbox_fallback = true;
        Ok(self)
    }

    /// Point at a different URL without changing the endpoint kind.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(
        mut self,
        max_retries: u32,
        base_delay: Duration,
        overall_deadline: Duration,
    ) -> Result<Self, ConfigError> {
        if max_retries == 0 {
            return Err(ConfigError::NoAttempts);
        }
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self.overall_deadline = overall_deadline;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build from the application configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let broker = &config.broker;
        let mut gateway = if broker.sandbox {
            Self::sandbox(&broker.api_key, &broker.account_id)
        } else {
            Self::production(&broker.api_key, &broker.account_id)
        };
        if let Some(url) = &broker.base_url {
            gateway = gateway.with_base_url(url);
        }
        if broker.enable_sandbox_fallback {
            gateway = gateway.with_sandbox_fallback()?;
        }
        Ok(gateway
            .with_retry(
                config.retry.max_retries,
                config.retry.base_delay(),
                config.retry.overall_deadline(),
            )?
            .with_request_timeout(config.retry.request_timeout()))
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn overall_deadline(&self) -> Duration {
        self.overall_deadline
    }

    /// True only for a sandbox endpoint with fallback switched on.
    pub fn allows_simulation(&self) -> bool {
        self.sandbox_fallback && !self.endpoint.is_production()
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("endpoint", &self.endpoint)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("sandbox_fallback", &self.sandbox_fallback)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("overall_deadline", &self.overall_deadline)
            .finish()
    }
}
