use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub paper_trading: PaperTradingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub dry_run: bool,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_top_traders_count")]
    pub top_traders_count: usize,
    #[serde(default = "default_min_profit_threshold")]
    pub min_profit_threshold: f64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_leaderboard_interval")]
    pub leaderboard_interval_secs: u64,
    #[serde(default = "default_time_period")]
    pub leaderboard_time_period: String,
    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_multiplier")]
    pub copy_trade_multiplier: f64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_sweep_interval")]
    pub outbox_sweep_interval_secs: u64,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub vault_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_ctf_exchange")]
    pub ctf_exchange: String,
    #[serde(default = "default_neg_risk_exchange")]
    pub neg_risk_exchange: String,
    #[serde(default = "default_backfill_interval")]
    pub backfill_interval_secs: u64,
    #[serde(default = "default_backfill_window")]
    pub backfill_window_blocks: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub resubscribe_initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub resubscribe_max_backoff_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub resubscribe_max_attempts: u32,
    /// A subscription silent for this long is dropped and rebuilt.
    #[serde(default = "default_head_idle_timeout")]
    pub head_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub csv_logging: bool,
    #[serde(default = "default_csv_log_path")]
    pub csv_log_path: String,
    #[serde(default = "default_market_cache_ttl")]
    pub market_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperTradingConfig {
    #[serde(default = "default_fill_rate")]
    pub fill_rate: f64,
    #[serde(default = "default_slippage")]
    pub slippage_pct: f64,
    #[serde(default = "default_balance")]
    pub initial_balance_usd: f64,
}

fn default_database_path() -> String { "./data/copy_trader.db".to_string() }
fn default_top_traders_count() -> usize { 10 }
fn default_min_profit_threshold() -> f64 { 1000.0 }
fn default_refresh_interval() -> u64 { 300 }
fn default_leaderboard_interval() -> u64 { 600 }
fn default_time_period() -> String { "week".to_string() }
fn default_leaderboard_limit() -> usize { 20 }
fn default_multiplier() -> f64 { 0.1 }
fn default_queue_capacity() -> usize { 256 }
fn default_sweep_interval() -> u64 { 15 }
fn default_confirm_timeout() -> u64 { 120 }
fn default_chain_id() -> u64 { 137 }
fn default_ctf_exchange() -> String { "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".to_string() }
fn default_neg_risk_exchange() -> String { "0xC5d563A36AE78145C45a50134d48A1215220f80a".to_string() }
fn default_backfill_interval() -> u64 { 30 }
fn default_backfill_window() -> u64 { 50 }
fn default_initial_backoff_ms() -> u64 { 500 }
fn default_max_backoff_secs() -> u64 { 30 }
fn default_max_attempts() -> u32 { 10 }
fn default_head_idle_timeout() -> u64 { 60 }
fn default_csv_log_path() -> String { "./data/trades.csv".to_string() }
fn default_market_cache_ttl() -> u64 { 3600 }
fn default_fill_rate() -> f64 { 0.70 }
fn default_slippage() -> f64 { 0.005 }
fn default_balance() -> f64 { 2000.0 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            top_traders_count: default_top_traders_count(),
            min_profit_threshold: default_min_profit_threshold(),
            refresh_interval_secs: default_refresh_interval(),
            leaderboard_interval_secs: default_leaderboard_interval(),
            leaderboard_time_period: default_time_period(),
            leaderboard_limit: default_leaderboard_limit(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            copy_trade_multiplier: default_multiplier(),
            queue_capacity: default_queue_capacity(),
            outbox_sweep_interval_secs: default_sweep_interval(),
            confirm_timeout_secs: default_confirm_timeout(),
            chain_id: default_chain_id(),
            vault_address: None,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            ctf_exchange: default_ctf_exchange(),
            neg_risk_exchange: default_neg_risk_exchange(),
            backfill_interval_secs: default_backfill_interval(),
            backfill_window_blocks: default_backfill_window(),
            resubscribe_initial_backoff_ms: default_initial_backoff_ms(),
            resubscribe_max_backoff_secs: default_max_backoff_secs(),
            resubscribe_max_attempts: default_max_attempts(),
            head_idle_timeout_secs: default_head_idle_timeout(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            csv_logging: false,
            csv_log_path: default_csv_log_path(),
            market_cache_ttl_secs: default_market_cache_ttl(),
        }
    }
}

impl Default for PaperTradingConfig {
    fn default() -> Self {
        Self {
            fill_rate: default_fill_rate(),
            slippage_pct: default_slippage(),
            initial_balance_usd: default_balance(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("copy_trade_multiplier must be in (0, 1], got {0}")]
    Multiplier(f64),

    #[error("top_traders_count must be positive")]
    TopTradersCount,

    #[error("queue_capacity must be positive")]
    QueueCapacity,

    #[error("backfill_window_blocks must be positive")]
    BackfillWindow,

    #[error("resubscribe_max_attempts must be positive")]
    MaxAttempts,

    #[error("head_idle_timeout_secs must be positive")]
    HeadIdleTimeout,

    #[error("fill_rate must be in [0, 1], got {0}")]
    FillRate(f64),

    #[error("vault_address is required when dry_run is off")]
    MissingVault,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let multiplier = self.execution.copy_trade_multiplier;
        if !(multiplier > 0.0 && multiplier <= 1.0) {
            return Err(ConfigError::Multiplier(multiplier));
        }
        if self.tracking.top_traders_count == 0 {
            return Err(ConfigError::TopTradersCount);
        }
        if self.execution.queue_capacity == 0 {
            return Err(ConfigError::QueueCapacity);
        }
        if self.chain.backfill_window_blocks == 0 {
            return Err(ConfigError::BackfillWindow);
        }
        if self.chain.resubscribe_max_attempts == 0 {
            return Err(ConfigError::MaxAttempts);
        }
        if self.chain.head_idle_timeout_secs == 0 {
            return Err(ConfigError::HeadIdleTimeout);
        }
        let fill_rate = self.paper_trading.fill_rate;
        if !(0.0..=1.0).contains(&fill_rate) {
            return Err(ConfigError::FillRate(fill_rate));
        }
        if !self.system.dry_run && self.execution.vault_address.is_none() {
            return Err(ConfigError::MissingVault);
        }
        Ok(())
    }
}

impl ChainConfig {
    pub fn backfill_interval(&self) -> Duration {
        Duration::from_secs(self.backfill_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.resubscribe_initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.resubscribe_max_backoff_secs)
    }

    pub fn head_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.head_idle_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub polygon_ws_url: String,
    pub polygon_rpc_url: String,
    pub polygon_wallet_private_key: Option<String>,
    pub polymarket_gamma_url: String,
    pub polymarket_data_url: String,
    pub dry_run: bool,
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            polygon_ws_url: std::env::var("POLYGON_WS_URL")
                .context("POLYGON_WS_URL not set")?,
            polygon_rpc_url: std::env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| "https://polygon-rpc.com".to_string()),
            polygon_wallet_private_key: std::env::var("POLYGON_WALLET_PRIVATE_KEY").ok(),
            polymarket_gamma_url: std::env::var("POLYMARKET_GAMMA_URL")
                .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string()),
            polymarket_data_url: std::env::var("POLYMARKET_DATA_URL")
                .unwrap_or_else(|_| "https://data-api.polymarket.com".to_string()),
            dry_run: std::env::var("DRY_RUN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }
}
