// =============================================================================
// Bot Configuration — YAML file with serde defaults throughout
// =============================================================================
//
// Every field carries a serde default so that a partial config file (or an
// older one missing newly added keys) still deserialises. API credentials may
// also arrive via environment variables (`BINANCE_API_KEY`,
// `BINANCE_API_SECRET`, `LLM_API_KEY`), which take precedence over the file.
// =============================================================================

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BotError, BotResult};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "SOLUSDT".to_string()]
}

fn default_timeframes() -> Vec<String> {
    vec![
        "1m".to_string(),
        "15m".to_string(),
        "1h".to_string(),
        "1d".to_string(),
        "1M".to_string(),
    ]
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_llm_model() -> String {
    "deepseek-reasoner".to_string()
}

fn default_leverage() -> u32 {
    3
}

fn default_max_position_size() -> f64 {
    1.0
}

fn default_stop_loss_percent() -> f64 {
    0.05
}

fn default_take_profit_percent() -> f64 {
    0.15
}

fn default_min_confidence() -> f64 {
    60.0
}

fn default_order_type() -> String {
    "MARKET".to_string()
}

fn default_min_notional_usdt() -> f64 {
    5.0
}

fn default_max_wait_time() -> u64 {
    300
}

fn default_max_runtime() -> u64 {
    86_400
}

fn default_analysis_interval() -> u64 {
    900
}

fn default_snapshot_concurrency() -> usize {
    8
}

fn default_snapshot_deadline() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_dir() -> String {
    ".".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

// =============================================================================
// API credentials
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeApiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Trade against the futures testnet instead of the live exchange.
    #[serde(default = "default_true")]
    pub testnet: bool,
}

impl Default for ExchangeApiConfig {
    fn default() -> Self {
        Self { api_key: String::new(), api_secret: String::new(), testnet: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmApiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApisConfig {
    #[serde(default)]
    pub exchange: ExchangeApiConfig,
    #[serde(default)]
    pub llm: LlmApiConfig,
}

// =============================================================================
// Trading
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesConfig {
    #[serde(default = "default_leverage")]
    pub default_leverage: u32,
}

impl Default for FuturesConfig {
    fn default() -> Self {
        Self { default_leverage: default_leverage() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionManagementConfig {
    /// Upper bound on the USDT committed to a single new position.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    /// Base stop-loss distance as a fraction of entry (scaled down by
    /// leverage when the AI omits an explicit level).
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: f64,
    /// Base take-profit distance as a fraction of entry.
    #[serde(default = "default_take_profit_percent")]
    pub take_profit_percent: f64,
}

impl Default for PositionManagementConfig {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            stop_loss_percent: default_stop_loss_percent(),
            take_profit_percent: default_take_profit_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreTradeChecks {
    #[serde(default = "default_true")]
    pub check_balance: bool,
    #[serde(default = "default_true")]
    pub check_price_anomaly: bool,
    #[serde(default = "default_true")]
    pub check_liquidity: bool,
}

impl Default for PreTradeChecks {
    fn default() -> Self {
        Self { check_balance: true, check_price_anomaly: true, check_liquidity: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Master switch — live orders are refused unless this is `true`.
    #[serde(default)]
    pub real_trading_enabled: bool,
    /// Decisions below this confidence never execute.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default)]
    pub pre_trade_checks: PreTradeChecks,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            real_trading_enabled: false,
            min_confidence: default_min_confidence(),
            pre_trade_checks: PreTradeChecks::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderConfig {
    /// Seconds to wait for a LIMIT entry to fill before cancelling it.
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time: u64,
}

impl Default for LimitOrderConfig {
    fn default() -> Self {
        Self { max_wait_time: default_max_wait_time() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSettingsConfig {
    /// Fallback order type when the AI does not express a preference.
    #[serde(default = "default_order_type")]
    pub default_order_type: String,
    #[serde(default = "default_min_notional_usdt")]
    pub min_notional_usdt: f64,
    #[serde(default)]
    pub limit_order: LimitOrderConfig,
}

impl Default for OrderSettingsConfig {
    fn default() -> Self {
        Self {
            default_order_type: default_order_type(),
            min_notional_usdt: default_min_notional_usdt(),
            limit_order: LimitOrderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeConfig {
    /// When set, every order is simulated locally and nothing reaches the
    /// exchange.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Timeframes fed into the multi-timeframe indicator bundle.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
    #[serde(default)]
    pub futures: FuturesConfig,
    #[serde(default)]
    pub position_management: PositionManagementConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub order_settings: OrderSettingsConfig,
    #[serde(default)]
    pub mode: ModeConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            timeframes: default_timeframes(),
            futures: FuturesConfig::default(),
            position_management: PositionManagementConfig::default(),
            safety: SafetyConfig::default(),
            order_settings: OrderSettingsConfig::default(),
            mode: ModeConfig::default(),
        }
    }
}

// =============================================================================
// Runtime / logging
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds after which the scheduler stops starting new cycles.
    #[serde(default = "default_max_runtime")]
    pub max_runtime: u64,
    /// Seconds between analysis cycles.
    #[serde(default = "default_analysis_interval")]
    pub analysis_interval: u64,
    /// Maximum in-flight exchange requests during snapshot assembly.
    #[serde(default = "default_snapshot_concurrency")]
    pub snapshot_concurrency: usize,
    /// Global deadline (seconds) for one snapshot assembly pass.
    #[serde(default = "default_snapshot_deadline")]
    pub snapshot_deadline: u64,
    /// Bind address for the read-only status API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_runtime: default_max_runtime(),
            analysis_interval: default_analysis_interval(),
            snapshot_concurrency: default_snapshot_concurrency(),
            snapshot_deadline: default_snapshot_deadline(),
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty means log to stdout.
    #[serde(default)]
    pub file: String,
    /// Base directory for the append-only audit streams.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
            audit_dir: default_audit_dir(),
        }
    }
}

// =============================================================================
// Top-level config
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub apis: ApisConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BotConfig {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.trading.symbols,
            testnet = config.apis.exchange.testnet,
            dry_run = config.trading.mode.dry_run,
            "config loaded"
        );

        Ok(config)
    }

    /// Override credentials from the environment when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("BINANCE_API_KEY") {
            if !key.is_empty() {
                self.apis.exchange.api_key = key;
            }
        }
        if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
            if !secret.is_empty() {
                self.apis.exchange.api_secret = secret;
            }
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            if !key.is_empty() {
                self.apis.llm.api_key = key;
            }
        }
    }

    /// Validate the parts that cannot be defaulted away.
    ///
    /// Placeholder keys ("your_api_key_here") are rejected outright; missing
    /// exchange keys are only fatal when live trading is enabled, since
    /// dry-run cycles still need public market data but no signatures.
    pub fn validate(&self) -> BotResult<()> {
        if self.trading.symbols.is_empty() {
            return Err(BotError::ConfigInvalid("trading.symbols is empty".into()));
        }

        let ex = &self.apis.exchange;
        if ex.api_key.contains("your_") || ex.api_secret.contains("your_") {
            return Err(BotError::ConfigInvalid(
                "exchange API keys are still placeholders".into(),
            ));
        }

        if self.trading.safety.real_trading_enabled
            && (ex.api_key.len() < 20 || ex.api_secret.len() < 20)
        {
            return Err(BotError::ConfigInvalid(
                "real trading enabled but exchange API keys are missing or too short".into(),
            ));
        }

        if self.apis.llm.api_key.is_empty() {
            return Err(BotError::ConfigInvalid("apis.llm.api_key is not set".into()));
        }

        if self.trading.futures.default_leverage == 0
            || self.trading.futures.default_leverage > 125
        {
            return Err(BotError::ConfigInvalid(
                "trading.futures.default_leverage must be in 1..=125".into(),
            ));
        }

        Ok(())
    }
}
