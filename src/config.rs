use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; without it the in-memory store is used (single process only)
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Shared secret expected in `X-Internal-Secret` from webhook glue
    pub internal_secret: String,
    #[serde(default)]
    pub purchase: PurchaseConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub qris: Option<QrisConfig>,
    #[serde(default)]
    pub crypto: Option<CryptoConfig>,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PurchaseConfig {
    /// Transaction TTL; pending transactions expire after this
    pub ttl_secs: u64,
    /// Upper bound for a single rail `check` call
    pub check_timeout_ms: u64,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            check_timeout_ms: 4_000,
        }
    }
}

impl PurchaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub batch_size: usize,
    /// Also poll rails for pending transactions the client stopped polling
    pub poll_pending: bool,
    /// Minimum age before the sweep polls a pending transaction
    pub poll_min_age_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            batch_size: 100,
            poll_pending: true,
            poll_min_age_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QrisConfig {
    pub base_url: String,
    pub server_key: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CryptoConfig {
    /// EIP-155 chain id (Base mainnet = 8453)
    pub chain_id: u64,
    pub rpc_url: String,
    /// Address that receives purchase payments
    pub receiver_address: String,
    pub required_confirmations: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub credit_packages: Vec<CreditPackageConfig>,
    #[serde(default)]
    pub items: Vec<CatalogItemConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreditPackageConfig {
    pub package_id: String,
    pub credits: i64,
    #[serde(default)]
    pub price_idr: Option<u64>,
    /// Decimal string; wei amounts exceed the YAML integer range
    #[serde(default)]
    pub price_wei: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CatalogItemConfig {
    pub item_ref: String,
    pub name: String,
    #[serde(default)]
    pub price_credits: Option<i64>,
    #[serde(default)]
    pub price_idr: Option<u64>,
    #[serde(default)]
    pub price_wei: Option<String>,
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        if config.internal_secret.trim().is_empty() {
            anyhow::bail!("internal_secret must not be empty");
        }
        Ok(config)
    }
}
