//! Market classification module
//!
//! Maps symbols to the venue they trade on, the rounding rules of their
//! asset class and the hours the venue is open

mod detector;
pub mod hours;

pub use detector::detect_market;
pub use hours::is_market_open;

use crate::execution::BrokerKind;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue a symbol trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    /// National Stock Exchange of India
    Nse,
    /// Bombay Stock Exchange
    Bse,
    /// New York Stock Exchange
    Nyse,
    /// NASDAQ
    Nasdaq,
    /// NYSE American
    Amex,
    /// Cryptocurrency venues (24/7)
    Crypto,
}

/// Asset class, which decides the tradeable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Whole shares only
    Equity,
    /// Fractional units at a configured precision
    Crypto,
}

impl Market {
    /// Detect the market for a symbol
    pub fn detect(symbol: &str) -> Self {
        detect_market(symbol)
    }

    /// Asset class traded on this market
    pub fn asset_class(&self) -> AssetClass {
        match self {
            Market::Crypto => AssetClass::Crypto,
            _ => AssetClass::Equity,
        }
    }

    /// Broker that serves this market when no explicit route is configured
    pub fn default_broker(&self) -> BrokerKind {
        match self {
            Market::Nse | Market::Bse => BrokerKind::Zerodha,
            Market::Nyse | Market::Nasdaq | Market::Amex => BrokerKind::Alpaca,
            Market::Crypto => BrokerKind::Binance,
        }
    }

    /// Exchange code
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Nse => "NSE",
            Market::Bse => "BSE",
            Market::Nyse => "NYSE",
            Market::Nasdaq => "NASDAQ",
            Market::Amex => "AMEX",
            Market::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AssetClass {
    /// Round a raw quantity down to the nearest tradeable unit
    ///
    /// Equities trade in whole shares; crypto keeps `crypto_precision` decimals.
    /// Rounding is always toward zero so sizing never exceeds its budget.
    pub fn round_quantity(&self, quantity: Decimal, crypto_precision: u32) -> Decimal {
        let dp = match self {
            AssetClass::Equity => 0,
            AssetClass::Crypto => crypto_precision,
        };
        quantity
            .round_dp_with_strategy(dp, RoundingStrategy::ToZero)
            .normalize()
    }
}
