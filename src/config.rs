use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::backtest::BacktestConfig;
use crate::execution::{Credentials, RetryPolicy};
use crate::live::StrategyInstance;
use crate::models::Timeframe;
use crate::risk::RiskPolicy;
use crate::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const DEFAULT_CONFIG_FILE: &str = "config/default.toml";
pub const CONFIG_PATH_ENV: &str = "QUANTDESK_CONFIG";
pub const ENV_PREFIX: &str = "QUANTDESK";

/// Application settings.
///
/// Layered, later wins: `config/default.toml`, the file named by
/// `QUANTDESK_CONFIG`, then `QUANTDESK__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange_id: String,
    /// No URL means in-memory storage
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub risk: RiskConfig,
    pub collector: CollectorConfig,
    pub backtest: BacktestConfig,
    pub live: LiveConfig,
    pub paper: PaperConfig,
    pub strategies: Vec<StrategyInstance>,
    /// Account id -> exchange API keys
    pub credentials: HashMap<String, Credentials>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchange_id: "bithumb".to_string(),
            database_url: None,
            redis_url: None,
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            risk: RiskConfig::default(),
            collector: CollectorConfig::default(),
            backtest: BacktestConfig::default(),
            live: LiveConfig::default(),
            paper: PaperConfig::default(),
            strategies: Vec::new(),
            credentials: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub order_workers: usize,
    pub backfill_workers: usize,
    pub capacity: usize,
    /// Settled task statuses remembered per queue
    pub keep_settled: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            order_workers: 4,
            backfill_workers: 1,
            capacity: 1024,
            keep_settled: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Used for accounts without a stored policy
    pub policy: RiskPolicy,
    pub cache_ttl_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            policy: RiskPolicy::default(),
            cache_ttl_secs: 30,
        }
    }
}

impl RiskConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// A polling collector for one timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub timeframe: Timeframe,
    pub every_secs: u64,
    pub limit: usize,
}

impl TriggerConfig {
    pub fn every(&self) -> Duration {
        Duration::from_secs(self.every_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub symbols: Vec<String>,
    pub triggers: Vec<TriggerConfig>,
    pub backfill_batch_size: usize,
    pub backfill_requests_per_second: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTC/KRW".to_string(),
                "ETH/KRW".to_string(),
                "XRP/KRW".to_string(),
            ],
            triggers: vec![
                TriggerConfig {
                    timeframe: Timeframe::M1,
                    every_secs: 60,
                    limit: 5,
                },
                TriggerConfig {
                    timeframe: Timeframe::M5,
                    every_secs: 300,
                    limit: 5,
                },
            ],
            backfill_batch_size: 200,
            backfill_requests_per_second: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub interval_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl LiveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Simulated market behind the paper exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub seed: u64,
    /// Candles per series when starting without stored history
    pub history: usize,
    pub tick_secs: u64,
    pub fee_rate: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            history: 200,
            tick_secs: 10,
            fee_rate: dec!(0.0025),
        }
    }
}

impl PaperConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

impl AppConfig {
    /// Load from the default file, `QUANTDESK_CONFIG` and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        tracing::debug!(exchange = %config.exchange_id, strategies = config.strategies.len(), "Configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
