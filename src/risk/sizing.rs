//! Position sizing implementations
//!
//! Every sizer turns an approved decision into a unit quantity, capped at the
//! profile's maximum position size and rounded down to the asset class's
//! tradeable unit. A result of zero means "do not trade".

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::KellyCalculator;
use crate::config::{SizingConfig, SizingMethod};
use crate::error::EngineError;
use crate::market::AssetClass;
use crate::portfolio::TradeStats;

/// Inputs for one sizing computation
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub equity: Decimal,
    pub cash: Decimal,
    pub price: Decimal,
    /// Distance from entry to the protective stop, in price units
    pub stop_distance: Option<Decimal>,
    /// Cap as a fraction of equity (the profile's max position size)
    pub max_position_pct: Decimal,
    pub asset_class: AssetClass,
    pub crypto_precision: u32,
    /// Recent closed-trade statistics, when the store has them
    pub history: Option<TradeStats>,
}

impl SizingRequest {
    fn max_notional(&self) -> Decimal {
        self.max_position_pct * self.equity
    }

    fn check_capital(&self) -> Result<(), EngineError> {
        if self.equity <= dec!(0) || self.cash <= dec!(0) {
            return Err(EngineError::InsufficientCapital {
                required: self.price,
                available: self.cash.max(dec!(0)),
            });
        }
        Ok(())
    }

    /// Convert a notional budget to a rounded quantity, never above the cap
    fn quantity_for(&self, notional: Decimal) -> Decimal {
        if self.price <= dec!(0) {
            return dec!(0);
        }
        let notional = notional.min(self.max_notional()).max(dec!(0));
        self.asset_class
            .round_quantity(notional / self.price, self.crypto_precision)
    }
}

/// Trait for position sizing implementations
pub trait PositionSizer: Send + Sync {
    /// Quantity to trade; zero when the size rounds away
    fn size(&self, request: &SizingRequest) -> Result<Decimal, EngineError>;

    /// Sizing method name
    fn method_name(&self) -> &'static str;
}

/// Constant currency amount per trade
#[derive(Debug, Clone)]
pub struct FixedSizer {
    pub amount: Decimal,
}

impl PositionSizer for FixedSizer {
    fn size(&self, request: &SizingRequest) -> Result<Decimal, EngineError> {
        request.check_capital()?;
        Ok(request.quantity_for(self.amount))
    }

    fn method_name(&self) -> &'static str {
        "fixed"
    }
}

/// Fixed fraction of equity per trade
#[derive(Debug, Clone)]
pub struct PercentageSizer {
    pub percentage: Decimal,
}

impl PositionSizer for PercentageSizer {
    fn size(&self, request: &SizingRequest) -> Result<Decimal, EngineError> {
        request.check_capital()?;
        Ok(request.quantity_for(self.percentage * request.equity))
    }

    fn method_name(&self) -> &'static str {
        "percentage"
    }
}

/// Risk a fixed fraction of equity between entry and stop
#[derive(Debug, Clone)]
pub struct RiskBasedSizer {
    pub risk_per_trade: Decimal,
}

impl PositionSizer for RiskBasedSizer {
    fn size(&self, request: &SizingRequest) -> Result<Decimal, EngineError> {
        request.check_capital()?;
        let stop_distance = request
            .stop_distance
            .filter(|d| *d > dec!(0))
            .ok_or_else(|| {
                EngineError::Configuration("risk-based sizing requires a stop distance".into())
            })?;

        let units = self.risk_per_trade * request.equity / stop_distance;
        Ok(request.quantity_for(units * request.price))
    }

    fn method_name(&self) -> &'static str {
        "risk_based"
    }
}

/// Kelly criterion over realized history, percentage sizing until history suffices
#[derive(Debug, Clone)]
pub struct KellySizer {
    pub calculator: KellyCalculator,
    pub fallback: PercentageSizer,
}

impl PositionSizer for KellySizer {
    fn size(&self, request: &SizingRequest) -> Result<Decimal, EngineError> {
        request.check_capital()?;
        let fraction = request
            .history
            .as_ref()
            .and_then(|stats| self.calculator.equity_fraction(stats));

        match fraction {
            Some(fraction) => Ok(request.quantity_for(fraction * request.equity)),
            None => {
                tracing::debug!("Insufficient trade history for Kelly, using percentage sizing");
                self.fallback.size(request)
            }
        }
    }

    fn method_name(&self) -> &'static str {
        "kelly"
    }
}

/// Create a position sizer based on configuration
pub fn create_sizer(config: &SizingConfig) -> Box<dyn PositionSizer> {
    let percentage = PercentageSizer {
        percentage: config.percentage,
    };
    match config.method {
        SizingMethod::Fixed => Box::new(FixedSizer {
            amount: config.fixed_amount,
        }),
        SizingMethod::Percentage => Box::new(percentage),
        SizingMethod::RiskBased => Box::new(RiskBasedSizer {
            risk_per_trade: config.risk_per_trade,
        }),
        SizingMethod::Kelly => Box::new(KellySizer {
            calculator: KellyCalculator::new(config.kelly_fraction, config.kelly_min_trades),
            fallback: percentage,
        }),
    }
}
