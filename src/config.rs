//! Configuration management for the Tesseract Deployer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::PollPolicy;

/// Environment variable pointing at the settings file
pub const CONFIG_ENV_VAR: &str = "TESSERACT_DEPLOYER_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub deployer: DeployerConfig,
    #[serde(default)]
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// Live networks never receive dev-only instructions such as `evm_mine`
    #[serde(default)]
    pub live: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub receipt_backoff_multiplier: f64,
    #[serde(default)]
    pub receipt_max_interval_ms: Option<u64>,
    #[serde(default)]
    pub receipt_timeout_secs: Option<u64>,
    #[serde(default)]
    pub dev_force_mine: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GasConfig {
    /// Fixed gas price in wei; the node's `eth_gasPrice` is used when unset
    pub gas_price_wei: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            receipt_poll_interval_ms: default_poll_interval_ms(),
            receipt_backoff_multiplier: default_backoff_multiplier(),
            receipt_max_interval_ms: None,
            receipt_timeout_secs: None,
            dev_force_mine: false,
        }
    }
}

impl NetworkConfig {
    /// `localhost` and the in-process dev network are not live unless configured otherwise
    pub fn is_live(&self) -> bool {
        self.live
            .unwrap_or(!matches!(self.name.as_str(), "localhost" | "hardhat" | "buidlerevm"))
    }
}

impl DeployerConfig {
    /// Receipt polling policy described by this configuration
    pub fn poll_policy(&self) -> PollPolicy {
        let interval = Duration::from_millis(self.receipt_poll_interval_ms);
        PollPolicy {
            interval,
            backoff_multiplier: self.receipt_backoff_multiplier,
            max_interval: self
                .receipt_max_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(interval),
            deadline: self.receipt_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.is_empty() {
            anyhow::bail!("Network {} has no RPC URLs configured", self.network.name);
        }

        if self.deployer.receipt_poll_interval_ms == 0 {
            anyhow::bail!("receipt_poll_interval_ms must be positive");
        }

        if self.deployer.receipt_backoff_multiplier < 1.0 {
            anyhow::bail!("receipt_backoff_multiplier must be at least 1.0");
        }

        if self.deployer.dev_force_mine && self.network.is_live() {
            tracing::warn!(
                "dev_force_mine is enabled for live network {} - evm_mine calls will likely fail",
                self.network.name
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .context("Invalid substitution pattern")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}
