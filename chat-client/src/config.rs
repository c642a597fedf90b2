//! Session configuration.
//!
//! Configuration is loaded from a TOML file (default: `talk2me.toml`). Every
//! field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use talk2me_chat_core::{ChainDefinition, NativeCurrency, RetryPolicy};
use talk2me_chat_types::Contract;

/// Placeholder address left in templates before deployment.
pub const PLACEHOLDER_ADDRESS: &str = "0x...";

/// Smallest settle delay the tracker accepts.
pub const MIN_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Root configuration for a chat session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Contract addresses.
    #[serde(default)]
    pub contracts: ContractsConfig,
    /// Target network.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Read cache windows.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Delays, deadlines and retry budget.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Message paging.
    #[serde(default)]
    pub messages: MessagesConfig,
    /// Identity registration.
    #[serde(default)]
    pub registration: RegistrationConfig,
}

/// Contract addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    /// Identity registry address.
    #[serde(default = "default_identity_registry")]
    pub identity_registry: String,
    /// Chat registry address.
    #[serde(default = "default_chat_registry")]
    pub chat_registry: String,
}

/// Target network.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Chain id the contracts are deployed on (default: 4202).
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Chain name shown by wallets.
    #[serde(default = "default_chain_name")]
    pub chain_name: String,
    /// RPC endpoints handed to wallets.
    #[serde(default = "default_rpc_urls")]
    pub rpc_urls: Vec<String>,
    /// Native currency name.
    #[serde(default = "default_currency_name")]
    pub currency_name: String,
    /// Native currency symbol.
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    /// Native currency decimals.
    #[serde(default = "default_currency_decimals")]
    pub currency_decimals: u8,
    /// Block explorers.
    #[serde(default = "default_explorer_urls")]
    pub explorer_urls: Vec<String>,
}

/// Read cache windows.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL for volatile reads in milliseconds (default: 5000).
    #[serde(default = "default_volatile_ttl_ms")]
    pub volatile_ttl_ms: u64,
    /// TTL for near-constant reads such as the global room id, in seconds
    /// (default: 1 day).
    #[serde(default = "default_permanent_ttl_secs")]
    pub permanent_ttl_secs: u64,
}

/// Delays, deadlines and retry budget.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Wait after confirmation before trusting reads (default: 1000, minimum 1000).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Deadline for a join to confirm, in seconds (default: 45).
    #[serde(default = "default_join_deadline_secs")]
    pub join_deadline_secs: u64,
    /// Spacing between consecutive initialization reads (default: 150, 100-500).
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    /// Pause before retrying a throttled read (default: 2000).
    #[serde(default = "default_rate_limit_retry_delay_ms")]
    pub rate_limit_retry_delay_ms: u64,
    /// Retries for throttled reads (default: 1).
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

/// Message paging.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// Page size for message loads (default: 50).
    #[serde(default = "default_page_limit")]
    pub page_limit: u64,
}

/// Identity registration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Suffix appended to registered names (default: `.Talk2me`).
    #[serde(default = "default_name_suffix")]
    pub name_suffix: String,
    /// Largest accepted profile image in bytes (default: 5 MiB).
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

// Default value functions
fn default_identity_registry() -> String {
    "0xe635F635540F09eec503376A170Fc4bad928EBb7".to_string()
}

fn default_chat_registry() -> String {
    "0x013b2134021F8166240f345e635085847086b252".to_string()
}

fn default_chain_id() -> u64 {
    4202
}

fn default_chain_name() -> String {
    "Lisk Sepolia".to_string()
}

fn default_rpc_urls() -> Vec<String> {
    vec!["https://rpc.sepolia-api.lisk.com".to_string()]
}

fn default_currency_name() -> String {
    "Sepolia Ether".to_string()
}

fn default_currency_symbol() -> String {
    "ETH".to_string()
}

fn default_currency_decimals() -> u8 {
    18
}

fn default_explorer_urls() -> Vec<String> {
    vec!["https://sepolia-blockscout.lisk.com".to_string()]
}

fn default_volatile_ttl_ms() -> u64 {
    5000
}

fn default_permanent_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_join_deadline_secs() -> u64 {
    45
}

fn default_step_delay_ms() -> u64 {
    150
}

fn default_rate_limit_retry_delay_ms() -> u64 {
    2000
}

fn default_rate_limit_retries() -> u32 {
    1
}

fn default_page_limit() -> u64 {
    50
}

fn default_name_suffix() -> String {
    ".Talk2me".to_string()
}

fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024 // 5MB
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            identity_registry: default_identity_registry(),
            chat_registry: default_chat_registry(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            chain_name: default_chain_name(),
            rpc_urls: default_rpc_urls(),
            currency_name: default_currency_name(),
            currency_symbol: default_currency_symbol(),
            currency_decimals: default_currency_decimals(),
            explorer_urls: default_explorer_urls(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            volatile_ttl_ms: default_volatile_ttl_ms(),
            permanent_ttl_secs: default_permanent_ttl_secs(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            join_deadline_secs: default_join_deadline_secs(),
            step_delay_ms: default_step_delay_ms(),
            rate_limit_retry_delay_ms: default_rate_limit_retry_delay_ms(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            name_suffix: default_name_suffix(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            contracts: ContractsConfig::default(),
            network: NetworkConfig::default(),
            cache: CacheConfig::default(),
            timing: TimingConfig::default(),
            messages: MessagesConfig::default(),
            registration: RegistrationConfig::default(),
        }
    }
}

impl ContractsConfig {
    /// Address configured for `contract`.
    pub fn address(&self, contract: Contract) -> &str {
        match contract {
            Contract::IdentityRegistry => &self.identity_registry,
            Contract::ChatRegistry => &self.chat_registry,
        }
    }

    /// Whether `contract` has a real address (not empty, not the placeholder).
    pub fn is_configured(&self, contract: Contract) -> bool {
        let address = self.address(contract).trim();
        !address.is_empty() && address != PLACEHOLDER_ADDRESS
    }
}

impl NetworkConfig {
    /// Chain definition handed to wallets when adding the network.
    pub fn chain_definition(&self) -> ChainDefinition {
        ChainDefinition {
            chain_id: self.chain_id,
            chain_name: self.chain_name.clone(),
            rpc_urls: self.rpc_urls.clone(),
            native_currency: NativeCurrency {
                name: self.currency_name.clone(),
                symbol: self.currency_symbol.clone(),
                decimals: self.currency_decimals,
            },
            block_explorer_urls: self.explorer_urls.clone(),
        }
    }
}

impl CacheConfig {
    /// TTL for volatile reads.
    pub fn volatile_ttl(&self) -> Duration {
        Duration::from_millis(self.volatile_ttl_ms)
    }

    /// TTL for near-constant reads.
    pub fn permanent_ttl(&self) -> Duration {
        Duration::from_secs(self.permanent_ttl_secs)
    }
}

impl TimingConfig {
    /// Settle delay, never below [`MIN_SETTLE_DELAY`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms).max(MIN_SETTLE_DELAY)
    }

    /// Join confirmation deadline.
    pub fn join_deadline(&self) -> Duration {
        Duration::from_secs(self.join_deadline_secs)
    }

    /// Spacing between initialization reads.
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    /// Retry policy for throttled reads.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.rate_limit_retries,
            Duration::from_millis(self.rate_limit_retry_delay_ms),
        )
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.settle_delay_ms < MIN_SETTLE_DELAY.as_millis() as u64 {
            return Err(ConfigError::Invalid(format!(
                "timing.settle_delay_ms must be at least {}",
                MIN_SETTLE_DELAY.as_millis()
            )));
        }
        if !(100..=500).contains(&self.timing.step_delay_ms) {
            return Err(ConfigError::Invalid(
                "timing.step_delay_ms must be between 100 and 500".to_string(),
            ));
        }
        if self.timing.join_deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "timing.join_deadline_secs must be > 0".to_string(),
            ));
        }
        if self.messages.page_limit == 0 {
            return Err(ConfigError::Invalid(
                "messages.page_limit must be > 0".to_string(),
            ));
        }
        if self.registration.max_image_bytes == 0 {
            return Err(ConfigError::Invalid(
                "registration.max_image_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
