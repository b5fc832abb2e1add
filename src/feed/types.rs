//! Price feed types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price observation for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Trading symbol (e.g., "AAPL", "BTC-USD", "^VIX")
    pub symbol: String,
    /// Last trade or index price
    pub price: Decimal,
    /// Best bid, when the source quotes one
    #[serde(default)]
    pub bid: Option<Decimal>,
    /// Best ask, when the source quotes one
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Observation time
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            bid: None,
            ask: None,
            timestamp,
        }
    }

    /// Attach a bid/ask quote
    pub fn with_quote(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Relative bid-ask spread against the mid, if quoted
    pub fn spread_pct(&self) -> Option<Decimal> {
        let (bid, ask) = (self.bid?, self.ask?);
        let mid = (bid + ask) / Decimal::TWO;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some((ask - bid) / mid)
    }
}
