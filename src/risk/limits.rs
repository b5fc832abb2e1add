//! Risk limits and the pre-trade gate

use super::{DenyReason, MarketSnapshot, RiskSummary, RiskVerdict, TradeProposal};
use crate::portfolio::{Account, PositionBook};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configured risk thresholds, as fractions of equity unless noted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskProfile {
    /// Maximum single position notional
    pub max_position_size: Decimal,
    /// Maximum completed orders per UTC day (count)
    pub max_daily_trades: u32,
    /// Maximum realized plus unrealized loss for the day
    pub max_daily_loss: Decimal,
    /// Maximum capital at risk across all open positions
    pub max_portfolio_risk: Decimal,
    /// Maximum exposure to a single market
    pub max_concentration: Decimal,
    /// Minimum free cash left after a trade
    pub min_balance_required: Decimal,
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            max_position_size: dec!(0.10),
            max_daily_trades: 10,
            max_daily_loss: dec!(0.05),
            max_portfolio_risk: dec!(0.20),
            max_concentration: dec!(0.30),
            min_balance_required: dec!(0.10),
        }
    }
}

/// Pre-trade risk gate
///
/// Evaluation is pure: it reads the supplied snapshots and never mutates them.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    profile: RiskProfile,
}

impl RiskLimits {
    pub fn new(profile: RiskProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &RiskProfile {
        &self.profile
    }

    /// Decide whether a sized entry may be submitted
    ///
    /// Checks run in a fixed order and stop at the first failure.
    pub fn can_trade(
        &self,
        proposal: &TradeProposal,
        account: &Account,
        positions: &PositionBook,
        snapshot: &MarketSnapshot,
    ) -> RiskVerdict {
        let p = &self.profile;
        let equity = account.equity;
        let notional = proposal.notional();

        if account.daily_trades >= p.max_daily_trades {
            return RiskVerdict::Deny(DenyReason::DailyTrades);
        }

        let daily_pnl = account.daily_realized_pnl + positions.unrealized_pnl(&snapshot.prices);
        if -daily_pnl > p.max_daily_loss * equity {
            return RiskVerdict::Deny(DenyReason::DailyLoss);
        }

        if notional > p.max_position_size * equity {
            return RiskVerdict::Deny(DenyReason::PositionSize);
        }

        if positions.total_at_risk() + notional > p.max_portfolio_risk * equity {
            return RiskVerdict::Deny(DenyReason::PortfolioRisk);
        }

        if account.exposure(proposal.market) + notional > p.max_concentration * equity {
            return RiskVerdict::Deny(DenyReason::Concentration);
        }

        if account.cash - notional < p.min_balance_required * equity {
            return RiskVerdict::Deny(DenyReason::MinBalance);
        }

        if snapshot.breaker.is_halted() {
            return RiskVerdict::Deny(DenyReason::CircuitBreaker);
        }

        RiskVerdict::Allow
    }

    /// Aggregate view of today's risk usage
    pub fn summary(
        &self,
        account: &Account,
        positions: &PositionBook,
        snapshot: &MarketSnapshot,
    ) -> RiskSummary {
        let daily_pnl = account.daily_realized_pnl + positions.unrealized_pnl(&snapshot.prices);
        let total_exposure = positions.total_at_risk();
        let pct = |amount: Decimal| {
            if account.equity.is_zero() {
                Decimal::ZERO
            } else {
                (amount / account.equity).round_dp(4)
            }
        };

        RiskSummary {
            daily_trades: account.daily_trades,
            max_daily_trades: self.profile.max_daily_trades,
            daily_pnl,
            daily_pnl_pct: pct(daily_pnl),
            exposure_by_market: account.market_exposure.clone(),
            total_exposure,
            total_exposure_pct: pct(total_exposure),
            open_positions: positions.open_count(),
            breaker: snapshot.breaker.to_string(),
        }
    }
}
