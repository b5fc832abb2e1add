//! Account ledger

use crate::error::EngineError;
use crate::execution::TradingMode;
use crate::market::Market;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Capital state of the trading account
///
/// Positions are carried at cost, so `equity == cash + committed` holds after
/// every mutation. Cash can never go below zero; an operation that would do so
/// is refused and leaves the account untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Cash plus capital committed to open positions
    pub equity: Decimal,
    /// Free cash balance
    pub cash: Decimal,
    /// Capital committed to open positions (at cost)
    pub committed: Decimal,
    /// Mode the account trades in
    pub mode: TradingMode,
    /// Committed capital per market
    #[serde(default)]
    pub market_exposure: HashMap<Market, Decimal>,
    /// UTC date the daily counters belong to
    pub trading_day: NaiveDate,
    /// Orders completed today
    pub daily_trades: u32,
    /// Realized P&L booked today (net of fees)
    pub daily_realized_pnl: Decimal,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a flat account holding only cash
    pub fn new(initial_cash: Decimal, mode: TradingMode) -> Self {
        let now = Utc::now();
        Self {
            equity: initial_cash,
            cash: initial_cash,
            committed: Decimal::ZERO,
            mode,
            market_exposure: HashMap::new(),
            trading_day: now.date_naive(),
            daily_trades: 0,
            daily_realized_pnl: Decimal::ZERO,
            updated_at: now,
        }
    }

    /// Reset daily counters when the UTC date has moved on
    ///
    /// Returns true if a roll happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today <= self.trading_day {
            return false;
        }
        tracing::info!(
            previous = %self.trading_day,
            trades = self.daily_trades,
            pnl = %self.daily_realized_pnl,
            "Rolling daily counters"
        );
        self.trading_day = today;
        self.daily_trades = 0;
        self.daily_realized_pnl = Decimal::ZERO;
        true
    }

    /// Committed capital in one market
    pub fn exposure(&self, market: Market) -> Decimal {
        self.market_exposure
            .get(&market)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Book capital for a new or increased position
    pub fn commit(
        &mut self,
        market: Market,
        notional: Decimal,
        fees: Decimal,
    ) -> Result<(), EngineError> {
        let required = notional + fees;
        if required > self.cash {
            return Err(EngineError::InsufficientCapital {
                required,
                available: self.cash,
            });
        }

        self.cash -= required;
        self.committed += notional;
        self.equity -= fees;
        *self.market_exposure.entry(market).or_insert(Decimal::ZERO) += notional;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release capital for a reduced or closed position and book its P&L
    ///
    /// `basis` is the cost of the quantity being closed.
    pub fn release(
        &mut self,
        market: Market,
        basis: Decimal,
        pnl: Decimal,
        fees: Decimal,
    ) -> Result<(), EngineError> {
        let new_cash = self.cash + basis + pnl - fees;
        if new_cash < Decimal::ZERO {
            return Err(EngineError::InsufficientCapital {
                required: fees - basis - pnl,
                available: self.cash,
            });
        }

        self.cash = new_cash;
        self.committed = (self.committed - basis).max(Decimal::ZERO);
        self.equity = self.cash + self.committed;
        self.daily_realized_pnl += pnl - fees;

        let exposure = self.market_exposure.entry(market).or_insert(Decimal::ZERO);
        *exposure = (*exposure - basis).max(Decimal::ZERO);
        if exposure.is_zero() {
            self.market_exposure.remove(&market);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Count a completed order toward the daily limit
    pub fn record_trade(&mut self) {
        self.daily_trades += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_account_is_flat() {
        let account = Account::new(dec!(100000), TradingMode::Paper);
        assert_eq!(account.equity, dec!(100000));
        assert_eq!(account.cash, dec!(100000));
        assert_eq!(account.committed, dec!(0));
        assert_eq!(account.daily_trades, 0);
    }

    #[test]
    fn test_commit_and_release_keep_equity_identity() {
        let mut account = Account::new(dec!(10000), TradingMode::Paper);

        account.commit(Market::Nasdaq, dec!(1950), dec!(1)).unwrap();
        assert_eq!(account.cash, dec!(8049));
        assert_eq!(account.committed, dec!(1950));
        assert_eq!(account.equity, dec!(9999));
        assert_eq!(account.exposure(Market::Nasdaq), dec!(1950));

        // Close at a 100 profit with 1 fee
        account
            .release(Market::Nasdaq, dec!(1950), dec!(100), dec!(1))
            .unwrap();
        assert_eq!(account.cash, dec!(10098));
        assert_eq!(account.committed, dec!(0));
        assert_eq!(account.equity, account.cash + account.committed);
        assert_eq!(account.daily_realized_pnl, dec!(99));
        assert_eq!(account.exposure(Market::Nasdaq), dec!(0));
    }

    #[test]
    fn test_commit_refuses_overdraw() {
        let mut account = Account::new(dec!(1000), TradingMode::Paper);
        let before = account.clone();

        let err = account.commit(Market::Crypto, dec!(1000), dec!(1)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCapital { .. }));
        assert_eq!(account, before);
    }

    #[test]
    fn test_release_refuses_negative_cash() {
        let mut account = Account::new(dec!(100), TradingMode::Paper);
        account.commit(Market::Crypto, dec!(100), dec!(0)).unwrap();
        let before = account.clone();

        // A short squeezed far past its collateral
        let err = account
            .release(Market::Crypto, dec!(100), dec!(-250), dec!(0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCapital { .. }));
        assert_eq!(account, before);
    }

    #[test]
    fn test_roll_day_resets_counters() {
        let mut account = Account::new(dec!(1000), TradingMode::Paper);
        account.record_trade();
        account.daily_realized_pnl = dec!(-20);

        let today = account.trading_day;
        assert!(!account.roll_day(today));
        assert_eq!(account.daily_trades, 1);

        assert!(account.roll_day(today.succ_opt().unwrap()));
        assert_eq!(account.daily_trades, 0);
        assert_eq!(account.daily_realized_pnl, dec!(0));
    }
}
