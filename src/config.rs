//! Configuration for the dicepay service.
//!
//! Settings come from a TOML file, can be overridden through `DICEPAY_*`
//! environment variables, and are validated before use. A missing API token
//! is not a load failure: the gateway client reports it when the first
//! operation is attempted.

use crate::errors::{ConfigurationError, DicepayResult};
use crate::gateway::DEFAULT_API_URL;
use crate::withdraw::WithdrawalConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub withdrawal: WithdrawalConfig,
    pub audit: AuditConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Chat channel the transport layer posts results to
    pub results_channel_id: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            results_channel_id: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Loader combining file, environment and validation
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    pub fn load(&self) -> DicepayResult<AppConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            AppConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> DicepayResult<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConfigurationError::LoadFailed(format!("failed to parse TOML: {}", e)).into()
        })
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) -> DicepayResult<()> {
        if let Ok(url) = env::var("DICEPAY_GATEWAY_API_URL") {
            config.gateway.api_url = url;
        }
        if let Ok(token) = env::var("DICEPAY_GATEWAY_TOKEN") {
            config.gateway.api_token = Some(token);
        }
        if let Ok(timeout) = env::var("DICEPAY_GATEWAY_TIMEOUT_MS") {
            config.gateway.request_timeout_ms = timeout.parse().map_err(|_| {
                ConfigurationError::InvalidValue {
                    field: "DICEPAY_GATEWAY_TIMEOUT_MS".to_string(),
                    value: timeout,
                    reason: "invalid millisecond value".to_string(),
                }
            })?;
        }
        if let Ok(fee) = env::var("DICEPAY_WITHDRAWAL_FEE") {
            config.withdrawal.external_fee =
                fee.parse::<Decimal>()
                    .map_err(|_| ConfigurationError::InvalidValue {
                        field: "DICEPAY_WITHDRAWAL_FEE".to_string(),
                        value: fee,
                        reason: "invalid decimal amount".to_string(),
                    })?;
        }
        if let Ok(channel) = env::var("DICEPAY_RESULTS_CHANNEL_ID") {
            config.audit.results_channel_id =
                channel
                    .parse()
                    .map_err(|_| ConfigurationError::InvalidValue {
                        field: "DICEPAY_RESULTS_CHANNEL_ID".to_string(),
                        value: channel,
                        reason: "invalid channel id".to_string(),
                    })?;
        }
        if let Ok(port) = env::var("DICEPAY_SERVER_PORT") {
            config.server.port = port.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "DICEPAY_SERVER_PORT".to_string(),
                value: port,
                reason: "invalid port number".to_string(),
            })?;
        }

        Ok(())
    }

    fn validate(&self, config: &AppConfig) -> DicepayResult<()> {
        if config.gateway.api_url.is_empty() {
            return Err(ConfigurationError::MissingRequired("gateway.api_url".to_string()).into());
        }

        if config.gateway.request_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "gateway.request_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "timeout cannot be zero".to_string(),
            }
            .into());
        }

        if config.withdrawal.asset.is_empty() {
            return Err(
                ConfigurationError::MissingRequired("withdrawal.asset".to_string()).into(),
            );
        }

        if config.withdrawal.external_fee < Decimal::ZERO {
            return Err(ConfigurationError::InvalidValue {
                field: "withdrawal.external_fee".to_string(),
                value: config.withdrawal.external_fee.to_string(),
                reason: "fee cannot be negative".to_string(),
            }
            .into());
        }

        if config.server.port == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "server.port".to_string(),
                value: "0".to_string(),
                reason: "port cannot be zero".to_string(),
            }
            .into());
        }

        Ok(())
    }

    pub fn save(&self, config: &AppConfig, path: &str) -> DicepayResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("failed to write {}: {}", path, e)).into()
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
