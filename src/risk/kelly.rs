//! Kelly criterion from realized trade history

use crate::portfolio::TradeStats;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Kelly criterion calculator over historical win rate and payoff
#[derive(Debug, Clone)]
pub struct KellyCalculator {
    /// Kelly fraction (e.g., 0.25 for quarter Kelly)
    pub fraction: Decimal,
    /// Closed trades needed before the estimate is trusted
    pub min_trades: usize,
}

impl KellyCalculator {
    pub fn new(fraction: Decimal, min_trades: usize) -> Self {
        Self {
            fraction,
            min_trades,
        }
    }

    /// Fraction of equity to commit, before any cap
    ///
    /// f* = p − (1 − p) / b, scaled by the Kelly fraction and floored at zero.
    /// Returns `None` when history is too thin or has no losses to form a
    /// payoff ratio.
    pub fn equity_fraction(&self, stats: &TradeStats) -> Option<Decimal> {
        if stats.trades < self.min_trades {
            return None;
        }
        let payoff = stats.payoff_ratio()?;
        if payoff <= dec!(0) {
            return None;
        }

        let win_rate = stats.win_rate();
        let kelly = win_rate - (Decimal::ONE - win_rate) / payoff;
        Some((kelly * self.fraction).max(dec!(0)))
    }
}

impl Default for KellyCalculator {
    fn default() -> Self {
        Self::new(dec!(0.25), 20)
    }
}
