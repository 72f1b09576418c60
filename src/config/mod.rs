//! Configuration management for the options autotrader.
//!
//! Loads settings from environment variables and config files.

mod gateway;

pub use gateway::{ConfigError, Endpoint, GatewayConfig};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Brokerage credentials and endpoint selection
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Retry and deadline settings for broker calls
    #[serde(default)]
    pub retry: RetryConfig,
    /// Pattern day trader rules and ledger storage
    #[serde(default)]
    pub compliance: ComplianceConfig,
    /// Signal handling parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bearer token for the brokerage API
    #[serde(default)]
    pub api_key: String,
    /// Brokerage account identifier
    #[serde(default)]
    pub account_id: String,
    /// Use the sandbox endpoint instead of production
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    /// Override the endpoint URL (tests, proxies)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Allow simulated fills when the sandbox cannot confirm one
    #[serde(default)]
    pub enable_sandbox_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base; attempt n waits base * 2^n
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Budget for a whole retry sequence
    #[serde(default = "default_overall_deadline")]
    pub overall_deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Day trades allowed inside the rolling window
    #[serde(default = "default_max_day_trades")]
    pub max_day_trades: u32,
    /// Rolling window in calendar days (approximates 5 business days)
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Accounts below this equity are subject to the PDT limit
    #[serde(default = "default_pdt_equity_threshold")]
    pub pdt_equity_threshold: Decimal,
    /// Ledger snapshot file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
    /// IANA timezone whose calendar date defines a trading day
    #[serde(default = "default_trading_timezone")]
    pub trading_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Signals below this confidence are skipped
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Decimal,
    /// SQLite trade journal
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
    /// Let signals through while the regular session is closed
    #[serde(default)]
    pub pre_market_eligible: bool,
}

/// Longest day-trade window accepted, in calendar days.
pub const MAX_WINDOW_DAYS: u32 = 366;

fn default_sandbox() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_overall_deadline() -> u64 {
    90
}

fn default_max_day_trades() -> u32 {
    3
}

fn default_window_days() -> u32 {
    7 // 5 business days, rounded up to a calendar week
}

fn default_pdt_equity_threshold() -> Decimal {
    Decimal::new(25_000, 0)
}

fn default_ledger_path() -> String {
    "data/ledger.json".to_string()
}

fn default_trading_timezone() -> String {
    "US/Eastern".to_string()
}

fn default_min_confidence() -> Decimal {
    Decimal::new(70, 2) // 0.70
}

fn default_journal_path() -> String {
    "data/journal.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .prefix("OPTRADER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.retry.max_retries >= 1, "max_retries must be >= 1");

        anyhow::ensure!(
            self.compliance.max_day_trades >= 1,
            "max_day_trades must be >= 1"
        );

        anyhow::ensure!(
            (1..=MAX_WINDOW_DAYS).contains(&self.compliance.window_days),
            "window_days must be between 1 and {MAX_WINDOW_DAYS}"
        );

        anyhow::ensure!(
            self.execution.min_confidence >= Decimal::ZERO
                && self.execution.min_confidence <= Decimal::ONE,
            "min_confidence must be between 0 and 1"
        );

        self.trading_tz()?;

        anyhow::ensure!(
            self.broker.sandbox || !self.broker.enable_sandbox_fallback,
            "enable_sandbox_fallback requires sandbox = true"
        );

        Ok(())
    }

    /// Parsed trading timezone.
    pub fn trading_tz(&self) -> Result<Tz> {
        self.compliance
            .trading_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("unknown trading_timezone: {e}"))
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.overall_deadline_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            retry: RetryConfig::default(),
            compliance: ComplianceConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            account_id: String::new(),
            sandbox: default_sandbox(),
            base_url: None,
            enable_sandbox_fallback: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_secs: default_request_timeout(),
            overall_deadline_secs: default_overall_deadline(),
        }
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            max_day_trades: default_max_day_trades(),
            window_days: default_window_days(),
            pdt_equity_threshold: default_pdt_equity_threshold(),
            ledger_path: default_ledger_path(),
            trading_timezone: default_trading_timezone(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            journal_path: default_journal_path(),
            pre_market_eligible: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading_tz().unwrap(), chrono_tz::US::Eastern);
    }

    #[test]
    fn test_fallback_requires_sandbox() {
        let mut config = Config::default();
        config.broker.sandbox = false;
        config.broker.enable_sandbox_fallback = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_retries_and_window() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.compliance.window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_days_upper_bound() {
        let mut config = Config::default();
        config.compliance.window_days = MAX_WINDOW_DAYS;
        assert!(config.validate().is_ok());

        config.compliance.window_days = u32::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let mut config = Config::default();
        config.compliance.trading_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "broker": { "api_key": "k", "account_id": "VA1" }, "compliance": { "window_days": 5 } }"#,
        )
        .unwrap();

        assert!(config.broker.sandbox);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.compliance.window_days, 5);
        assert_eq!(config.compliance.max_day_trades, 3);
    }
}
