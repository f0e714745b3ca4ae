use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use crate::{
    types::{Address, ChainId},
    Error, RelayError,
};

pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 2;
pub const DEFAULT_MESSAGE_TIMEOUT_SECS: u64 = 60 * 60;
/// 1 个原生代币单位（18 位精度）
pub const DEFAULT_MIN_RELAY_STAKE: u128 = 1_000_000_000_000_000_000;

pub const MAX_MIN_CONFIRMATIONS: u32 = 64;
pub const MIN_MESSAGE_TIMEOUT_SECS: u64 = 60;
pub const MAX_MESSAGE_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// 引擎运行参数，管理员可在边界内调整
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineParams {
    pub min_confirmations: u32,
    pub message_timeout: u64,
    pub min_relay_stake: u128,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT_SECS,
            min_relay_stake: DEFAULT_MIN_RELAY_STAKE,
        }
    }
}

impl EngineParams {
    pub fn check_min_confirmations(value: u32) -> Result<(), RelayError> {
        if value == 0 || value > MAX_MIN_CONFIRMATIONS {
            return Err(RelayError::InvalidParameter(format!(
                "min_confirmations must be within 1..={}, got {}",
                MAX_MIN_CONFIRMATIONS, value
            )));
        }
        Ok(())
    }

    pub fn check_message_timeout(value: u64) -> Result<(), RelayError> {
        if !(MIN_MESSAGE_TIMEOUT_SECS..=MAX_MESSAGE_TIMEOUT_SECS).contains(&value) {
            return Err(RelayError::InvalidParameter(format!(
                "message_timeout must be within {}..={} seconds, got {}",
                MIN_MESSAGE_TIMEOUT_SECS, MAX_MESSAGE_TIMEOUT_SECS, value
            )));
        }
        Ok(())
    }

    pub fn check_min_relay_stake(value: u128) -> Result<(), RelayError> {
        if value == 0 {
            return Err(RelayError::InvalidParameter("min_relay_stake must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        Self::check_min_confirmations(self.min_confirmations)?;
        Self::check_message_timeout(self.message_timeout)?;
        Self::check_min_relay_stake(self.min_relay_stake)
    }
}

fn default_min_confirmations() -> u32 {
    DEFAULT_MIN_CONFIRMATIONS
}

fn default_message_timeout() -> u64 {
    DEFAULT_MESSAGE_TIMEOUT_SECS
}

fn default_min_relay_stake() -> u64 {
    DEFAULT_MIN_RELAY_STAKE as u64
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub local_chain_id: ChainId,
    pub admin: Address,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,
    #[serde(default = "default_message_timeout")]
    pub message_timeout_secs: u64,
    /// 最小质押（基础单位）
    #[serde(default = "default_min_relay_stake")]
    pub min_relay_stake: u64,
}

impl EngineConfig {
    pub fn params(&self) -> EngineParams {
        EngineParams {
            min_confirmations: self.min_confirmations,
            message_timeout: self.message_timeout_secs,
            min_relay_stake: self.min_relay_stake as u128,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainSettings {
    pub id: ChainId,
    pub name: String,
    pub confirmation_blocks: u64,
    pub bridge_reference: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    pub rpc_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub chains: Vec<ChainSettings>,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
}

impl Config {
    /// 加载配置文件；`.toml` 按 TOML 解析，其余按 JSON 解析
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let is_toml = path.extension().map(|ext| ext == "toml").unwrap_or(false);
        let config = if is_toml {
            Self::from_toml_str(&config_str)?
        } else {
            Self::from_json_str(&config_str)?
        };
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let config: Config = serde_json::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        // 引擎参数
        if self.engine.admin.is_empty() {
            return Err(Error::Config("Admin identity must not be empty".to_string()));
        }
        self.engine
            .params()
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        // 链配置
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.id == self.engine.local_chain_id {
                return Err(Error::Config(format!(
                    "Chain {} is the local chain and cannot be registered as remote",
                    chain.id
                )));
            }
            if !seen.insert(chain.id) {
                return Err(Error::Config(format!("Duplicate chain ID: {}", chain.id)));
            }
        }

        // 决策登记配置
        if let Some(registry) = &self.registry {
            if registry.rpc_url.is_empty() {
                return Err(Error::Config("Registry rpc_url must not be empty".to_string()));
            }
            if registry.max_retries == 0 {
                return Err(Error::Config("Registry max retries must be greater than 0".to_string()));
            }
        }

        Ok(())
    }

    pub fn get_chain_config(&self, chain_id: ChainId) -> Option<&ChainSettings> {
        self.chains.iter().find(|c| c.id == chain_id)
    }
}
