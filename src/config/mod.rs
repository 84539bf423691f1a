use alloy::primitives::Address;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub valkey: ValkeyConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub wagers: WagersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the chain hosting the escrow.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Escrow contract address, hex.
    #[serde(default)]
    pub escrow_address: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    /// Manager wallet private key used for `createMatch`. Env only.
    #[serde(skip)]
    pub manager_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValkeyConfig {
    #[serde(default = "default_valkey_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the chat relay that renders messages and prompts.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Shared HMAC secret for both webhook directions. Env only.
    #[serde(skip)]
    pub secret: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Inbound events older than this are rejected.
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WagersConfig {
    #[serde(default = "default_intent_ttl_secs")]
    pub intent_ttl_secs: i64,
    #[serde(default = "default_lookback_days")]
    pub reconcile_lookback_days: i64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_chain_id() -> u64 {
    84532
}
fn default_rpc_timeout_secs() -> u64 {
    15
}
fn default_receipt_timeout_secs() -> u64 {
    120
}
fn default_receipt_poll_ms() -> u64 {
    2000
}
fn default_valkey_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    "wagerline".to_string()
}
fn default_relay_url() -> String {
    "http://127.0.0.1:8787".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_clock_skew_secs() -> i64 {
    300
}
fn default_intent_ttl_secs() -> i64 {
    300
}
fn default_lookback_days() -> i64 {
    7
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            escrow_address: String::new(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            receipt_poll_ms: default_receipt_poll_ms(),
            manager_key: None,
        }
    }
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            url: default_valkey_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            secret: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
        }
    }
}

impl Default for WagersConfig {
    fn default() -> Self {
        Self {
            intent_ttl_secs: default_intent_ttl_secs(),
            reconcile_lookback_days: default_lookback_days(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ChainConfig {
    pub fn escrow_address(&self) -> Result<Address, ConfigError> {
        if self.escrow_address.is_empty() {
            return Err(ConfigError::MissingEnv("WAGERLINE_ESCROW_ADDRESS".into()));
        }
        Address::from_str(&self.escrow_address).map_err(|e| ConfigError::Invalid {
            field: "chain.escrow_address",
            reason: e.to_string(),
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

impl WagersConfig {
    pub fn intent_ttl(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.intent_ttl_secs).unwrap_or_default())
    }

    pub fn reconcile_lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.reconcile_lookback_days)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Load a default config with env-only settings (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    // Secrets are never read from the config file.
    fn apply_env(&mut self) {
        self.chain.manager_key = std::env::var("WAGERLINE_MANAGER_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if let Ok(secret) = std::env::var("WAGERLINE_BOT_SECRET") {
            self.transport.secret = secret;
        }
        if let Ok(url) = std::env::var("WAGERLINE_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(address) = std::env::var("WAGERLINE_ESCROW_ADDRESS") {
            self.chain.escrow_address = address;
        }
        if let Ok(url) = std::env::var("WAGERLINE_VALKEY_URL") {
            self.valkey.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chain.escrow_address()?;
        if self.transport.secret.is_empty() {
            return Err(ConfigError::MissingEnv("WAGERLINE_BOT_SECRET".into()));
        }
        if self.wagers.intent_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                field: "wagers.intent_ttl_secs",
                reason: "must be positive".into(),
            });
        }
        if self.wagers.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "wagers.sweep_interval_secs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}
