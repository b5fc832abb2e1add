//! Execution types

use crate::error::EngineError;
use crate::market::Market;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order identifier
pub type OrderId = Uuid;

/// Simulated or real money
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker implementations behind the uniform [`super::Broker`] interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Alpaca,
    Binance,
    Coinbase,
    Zerodha,
    Upstox,
    Simulated,
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrokerKind::Alpaca => "alpaca",
            BrokerKind::Binance => "binance",
            BrokerKind::Coinbase => "coinbase",
            BrokerKind::Zerodha => "zerodha",
            BrokerKind::Upstox => "upstox",
            BrokerKind::Simulated => "simulated",
        };
        f.write_str(name)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    /// Immediate execution at the market
    Market,
    /// Executes at the limit price or better
    Limit,
    /// Becomes a market order once the stop price trades
    Stop,
    /// Becomes a limit order once the stop price trades
    StopLimit,
}

/// Why the engine placed the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRole {
    Entry,
    Exit,
    StopLoss,
    TakeProfit,
}

/// Order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal lifecycle step
    pub fn can_transition(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Filled)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Submitted, Filled)
                | (Submitted, Rejected)
                | (Submitted, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Filled => "filled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// An order tracked by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Decision that produced the order (entries and exits only)
    pub decision_id: Option<Uuid>,
    pub symbol: String,
    pub market: Market,
    pub side: Side,
    /// Unsigned quantity
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub bracket_id: Option<Uuid>,
    pub role: OrderRole,
    pub broker: BrokerKind,
    pub status: OrderStatus,
    /// Rejection or cancellation detail
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    fn new(
        symbol: &str,
        market: Market,
        side: Side,
        quantity: Decimal,
        order_type: OrderType,
        role: OrderRole,
        broker: BrokerKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new_v4(),
            decision_id: None,
            symbol: symbol.to_string(),
            market,
            side,
            quantity,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            order_type,
            limit_price: None,
            stop_price: None,
            bracket_id: None,
            role,
            broker,
            status: OrderStatus::Pending,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Market order for an entry or exit
    pub fn market(
        symbol: &str,
        market: Market,
        side: Side,
        quantity: Decimal,
        role: OrderRole,
        broker: BrokerKind,
    ) -> Self {
        Self::new(symbol, market, side, quantity, OrderType::Market, role, broker)
    }

    /// Protective stop leg
    pub fn stop(
        symbol: &str,
        market: Market,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
        broker: BrokerKind,
    ) -> Self {
        let mut order = Self::new(
            symbol,
            market,
            side,
            quantity,
            OrderType::Stop,
            OrderRole::StopLoss,
            broker,
        );
        order.stop_price = Some(stop_price);
        order
    }

    /// Profit-taking limit leg
    pub fn take_profit(
        symbol: &str,
        market: Market,
        side: Side,
        quantity: Decimal,
        limit_price: Decimal,
        broker: BrokerKind,
    ) -> Self {
        let mut order = Self::new(
            symbol,
            market,
            side,
            quantity,
            OrderType::Limit,
            OrderRole::TakeProfit,
            broker,
        );
        order.limit_price = Some(limit_price);
        order
    }

    pub fn with_decision(mut self, decision_id: Uuid) -> Self {
        self.decision_id = Some(decision_id);
        self
    }

    pub fn with_bracket(mut self, bracket_id: Uuid) -> Self {
        self.bracket_id = Some(bracket_id);
        self
    }

    pub fn remaining(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    /// Move to `next`, refusing illegal lifecycle steps
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), EngineError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition(next) {
            return Err(EngineError::ReconciliationRequired {
                symbol: self.symbol.clone(),
                reason: format!("order {} cannot go {} -> {}", self.id, self.status, next),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record an execution; returns true once nothing remains
    pub fn record_fill(&mut self, quantity: Decimal, price: Decimal) -> bool {
        let prior_value = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_quantity;
        self.filled_quantity += quantity;
        if !self.filled_quantity.is_zero() {
            self.avg_fill_price = Some((prior_value + price * quantity) / self.filled_quantity);
        }
        self.updated_at = Utc::now();
        self.remaining().is_zero()
    }
}

/// Broker acknowledgement of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    /// Identifier assigned by the venue
    pub broker_order_id: String,
    pub accepted_at: DateTime<Utc>,
}

impl OrderAck {
    /// Ack for an order the venue reported as already held
    pub fn recovered(order_id: OrderId) -> Self {
        Self {
            order_id,
            broker_order_id: order_id.simple().to_string(),
            accepted_at: Utc::now(),
        }
    }
}

/// An execution reported by a broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fees: Decimal,
    /// Quantity still open on the order after this fill
    pub leaves_quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}
