//! Risk evaluation types

use crate::breaker::BreakerState;
use crate::market::Market;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Why a trade was refused, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    DailyTrades,
    DailyLoss,
    PositionSize,
    PortfolioRisk,
    Concentration,
    MinBalance,
    CircuitBreaker,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::DailyTrades => "daily-trades",
            DenyReason::DailyLoss => "daily-loss",
            DenyReason::PositionSize => "position-size",
            DenyReason::PortfolioRisk => "portfolio-risk",
            DenyReason::Concentration => "concentration",
            DenyReason::MinBalance => "min-balance",
            DenyReason::CircuitBreaker => "circuit-breaker",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a risk evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "lowercase")]
pub enum RiskVerdict {
    Allow,
    Deny(DenyReason),
}

impl RiskVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskVerdict::Allow)
    }
}

/// A sized entry awaiting approval
#[derive(Debug, Clone)]
pub struct TradeProposal {
    pub symbol: String,
    pub market: Market,
    /// Unsigned quantity
    pub quantity: Decimal,
    pub price: Decimal,
}

impl TradeProposal {
    pub fn notional(&self) -> Decimal {
        (self.quantity * self.price).abs()
    }
}

/// Point-in-time market view supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    /// Latest mark per symbol
    pub prices: HashMap<String, Decimal>,
    /// Circuit breaker state at snapshot time
    pub breaker: BreakerState,
}

/// Aggregate risk figures for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub daily_trades: u32,
    pub max_daily_trades: u32,
    /// Realized today plus unrealized at current marks
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    pub exposure_by_market: HashMap<Market, Decimal>,
    pub total_exposure: Decimal,
    pub total_exposure_pct: Decimal,
    pub open_positions: usize,
    pub breaker: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reason_codes_match_serde() {
        for reason in [
            DenyReason::DailyTrades,
            DenyReason::PortfolioRisk,
            DenyReason::CircuitBreaker,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_proposal_notional() {
        let proposal = TradeProposal {
            symbol: "AAPL".into(),
            market: Market::Nasdaq,
            quantity: dec!(13),
            price: dec!(150),
        };
        assert_eq!(proposal.notional(), dec!(1950));
    }
}
