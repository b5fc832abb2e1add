//! Configuration types for tradegate

use crate::error::EngineError;
use crate::execution::{BrokerKind, TradingMode};
use crate::market::Market;
use crate::portfolio::CLOSED_HISTORY;
use crate::risk::RiskProfile;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub risk: RiskProfile,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub bracket: BracketConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub brokers: Vec<BrokerConfig>,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub simulated: SimulatedConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Position sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub method: SizingMethod,
    /// Currency amount per trade for `fixed`
    pub fixed_amount: Decimal,
    /// Fraction of equity per trade for `percentage` (and the Kelly fallback)
    pub percentage: Decimal,
    /// Fraction of equity risked between entry and stop for `risk_based`
    pub risk_per_trade: Decimal,
    /// Multiplier on the full Kelly fraction
    pub kelly_fraction: Decimal,
    /// Closed trades considered for win rate and payoff
    pub kelly_lookback: usize,
    /// Closed trades required before Kelly is used
    pub kelly_min_trades: usize,
    /// Decimal places for crypto quantities
    pub crypto_precision: u32,
}

/// Sizing method for position sizing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    Fixed,
    #[default]
    Percentage,
    RiskBased,
    Kelly,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            method: SizingMethod::Percentage,
            fixed_amount: dec!(1000),
            percentage: dec!(0.02),
            risk_per_trade: dec!(0.01),
            kelly_fraction: dec!(0.25),
            kelly_lookback: 50,
            kelly_min_trades: 20,
            crypto_precision: 4,
        }
    }
}

/// Bracket (stop-loss / take-profit) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BracketConfig {
    /// Attach brackets to filled entries
    pub enabled: bool,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    /// Trail the stop behind favorable moves
    pub trailing: bool,
    /// Stop distance behind price once trailing
    pub trailing_pct: Decimal,
    /// Profit required before trailing starts
    pub trailing_activation_pct: Decimal,
    /// Favorable move from the last ratchet point that triggers a new ratchet
    pub trailing_step_pct: Decimal,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stop_loss_pct: dec!(0.02),
            take_profit_pct: dec!(0.04),
            trailing: false,
            trailing_pct: dec!(0.02),
            trailing_activation_pct: dec!(0.03),
            trailing_step_pct: dec!(0.005),
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub enabled: bool,
    /// High/low range within the window, relative to the low
    pub max_move_pct: Decimal,
    pub move_window_secs: u64,
    /// Bid-ask spread relative to the mid
    pub max_spread_pct: Decimal,
    /// Symbol whose price is read as the volatility proxy
    pub volatility_symbol: String,
    pub volatility_threshold: Decimal,
    /// Quiet period after the last abnormal reading before resuming
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_move_pct: dec!(0.10),
            move_window_secs: 3600,
            max_spread_pct: dec!(0.02),
            volatility_symbol: "^VIX".to_string(),
            volatility_threshold: dec!(35),
            cooldown_secs: 900,
        }
    }
}

/// Execution pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: TradingMode,
    /// First live confirmation
    pub live_trading_approved: bool,
    /// Second, independent live confirmation
    pub live_trading_confirmed: bool,
    /// Completed paper trades required before going live
    pub min_paper_trades: u32,
    /// Allow SELL decisions to open shorts
    pub allow_short: bool,
    pub submit_timeout_ms: u64,
    pub fill_timeout_ms: u64,
    pub max_submit_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            live_trading_approved: false,
            live_trading_confirmed: false,
            min_paper_trades: 10,
            allow_short: false,
            submit_timeout_ms: 5_000,
            fill_timeout_ms: 10_000,
            max_submit_attempts: 3,
            retry_initial_delay_ms: 200,
            retry_max_delay_ms: 5_000,
        }
    }
}

/// A configured broker account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    /// Credentials for this broker are cleared for real money
    #[serde(default)]
    pub live_approved: bool,
    /// Markets routed here instead of the market's default broker
    #[serde(default)]
    pub markets: Vec<Market>,
}

/// Outer control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub watchlist: Vec<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Decimal,
    #[serde(default = "default_advisor_timeout_secs")]
    pub advisor_timeout_secs: u64,
    /// Outcomes kept in memory for the audit view
    #[serde(default = "default_outcome_history")]
    pub outcome_history: usize,
    /// Skip evaluation while the symbol's market is closed
    #[serde(default = "default_market_hours")]
    pub market_hours: bool,
}

fn default_interval_secs() -> u64 {
    300
}
fn default_min_confidence() -> Decimal {
    dec!(0.65)
}
fn default_advisor_timeout_secs() -> u64 {
    30
}
fn default_outcome_history() -> usize {
    500
}
fn default_market_hours() -> bool {
    true
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            watchlist: vec![],
            interval_secs: default_interval_secs(),
            min_confidence: default_min_confidence(),
            advisor_timeout_secs: default_advisor_timeout_secs(),
            outcome_history: default_outcome_history(),
            market_hours: default_market_hours(),
        }
    }
}

/// Simulated broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub initial_cash: Decimal,
    pub fee_rate: Decimal,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(100000),
            fee_rate: dec!(0.001),
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("data/tradegate.json"),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Prometheus scrape port; metrics are not exported when unset
    pub metrics_port: Option<u16>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject invalid combinations before anything trades
    pub fn validate(&self) -> Result<(), EngineError> {
        let risk = &self.risk;
        check_fraction("risk.max_position_size", risk.max_position_size)?;
        check_fraction("risk.max_daily_loss", risk.max_daily_loss)?;
        check_fraction("risk.max_portfolio_risk", risk.max_portfolio_risk)?;
        check_fraction("risk.max_concentration", risk.max_concentration)?;
        check_fraction("risk.min_balance_required", risk.min_balance_required)?;
        if risk.max_daily_trades == 0 {
            return Err(invalid("risk.max_daily_trades must be at least 1"));
        }

        let sizing = &self.sizing;
        match sizing.method {
            SizingMethod::Fixed if sizing.fixed_amount <= dec!(0) => {
                return Err(invalid("sizing.fixed_amount must be positive"));
            }
            SizingMethod::RiskBased => {
                check_fraction("sizing.risk_per_trade", sizing.risk_per_trade)?;
                if !self.bracket.enabled {
                    return Err(invalid(
                        "risk_based sizing needs a stop distance: enable [bracket]",
                    ));
                }
            }
            SizingMethod::Kelly => {
                check_fraction("sizing.kelly_fraction", sizing.kelly_fraction)?;
                check_fraction("sizing.percentage", sizing.percentage)?;
            }
            _ => check_fraction("sizing.percentage", sizing.percentage)?,
        }

        if sizing.kelly_lookback == 0 || sizing.kelly_lookback > CLOSED_HISTORY {
            return Err(invalid(&format!(
                "sizing.kelly_lookback must be within [1, {CLOSED_HISTORY}]"
            )));
        }

        let breaker = &self.breaker;
        if breaker.max_move_pct <= dec!(0) {
            return Err(invalid("breaker.max_move_pct must be positive"));
        }
        if breaker.move_window_secs == 0 {
            return Err(invalid("breaker.move_window_secs must be positive"));
        }

        let bracket = &self.bracket;
        if bracket.enabled {
            check_fraction("bracket.stop_loss_pct", bracket.stop_loss_pct)?;
            check_fraction("bracket.take_profit_pct", bracket.take_profit_pct)?;
            if bracket.trailing {
                check_fraction("bracket.trailing_pct", bracket.trailing_pct)?;
                if bracket.trailing_activation_pct < dec!(0) || bracket.trailing_step_pct < dec!(0)
                {
                    return Err(invalid("bracket trailing thresholds must not be negative"));
                }
            }
        }

        let automation = &self.automation;
        if automation.min_confidence < dec!(0) || automation.min_confidence > dec!(1) {
            return Err(invalid("automation.min_confidence must be within [0, 1]"));
        }
        if automation.watchlist.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("automation.watchlist contains an empty symbol"));
        }
        if automation.interval_secs == 0 {
            return Err(invalid("automation.interval_secs must be positive"));
        }

        if self.execution.max_submit_attempts == 0 {
            return Err(invalid("execution.max_submit_attempts must be at least 1"));
        }

        if self.execution.mode == TradingMode::Live {
            self.validate_live()?;
        }
        Ok(())
    }

    fn validate_live(&self) -> Result<(), EngineError> {
        let execution = &self.execution;
        if !(execution.live_trading_approved && execution.live_trading_confirmed) {
            return Err(invalid(
                "live mode requires both live_trading_approved and live_trading_confirmed",
            ));
        }

        for symbol in &self.automation.watchlist {
            let market = Market::detect(symbol);
            let kind = self.broker_for(market);
            let approved = self
                .brokers
                .iter()
                .any(|b| b.kind == kind && b.live_approved && kind != BrokerKind::Simulated);
            if !approved {
                return Err(invalid(&format!(
                    "live mode: no live-approved {kind} broker configured for {symbol} ({market})"
                )));
            }
        }
        Ok(())
    }

    /// Broker that serves a market: an explicit route, else the market default
    pub fn broker_for(&self, market: Market) -> BrokerKind {
        self.brokers
            .iter()
            .find(|b| b.markets.contains(&market))
            .map(|b| b.kind)
            .unwrap_or_else(|| market.default_broker())
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::Configuration(message.to_string())
}

fn check_fraction(name: &str, value: Decimal) -> Result<(), EngineError> {
    if value <= dec!(0) || value > dec!(1) {
        return Err(invalid(&format!("{name} must be within (0, 1], got {value}")));
    }
    Ok(())
}
