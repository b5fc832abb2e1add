//! Position tracking

use crate::market::Market;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Position identifier
    pub id: Uuid,
    /// Traded symbol
    pub symbol: String,
    /// Market the symbol trades on
    pub market: Market,
    /// Signed quantity: positive long, negative short
    pub quantity: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Current protective stop
    pub stop_price: Option<Decimal>,
    /// Current profit target
    pub target_price: Option<Decimal>,
    /// Entry timestamp
    pub opened_at: DateTime<Utc>,
    /// Attached bracket group
    pub bracket_id: Option<Uuid>,
    /// Set when broker state may have diverged; blocks automated bracket actions
    #[serde(default)]
    pub needs_reconciliation: bool,
}

impl Position {
    /// Open a new position
    pub fn new(
        symbol: impl Into<String>,
        market: Market,
        quantity: Decimal,
        entry_price: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            market,
            quantity,
            entry_price,
            stop_price: None,
            target_price: None,
            opened_at,
            bracket_id: None,
            needs_reconciliation: false,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Capital at risk: |quantity × entry|
    pub fn notional(&self) -> Decimal {
        (self.quantity * self.entry_price).abs()
    }

    /// Mark-to-market P&L at the given price
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        (mark - self.entry_price) * self.quantity
    }
}

/// A closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    /// Position as it was before the closing fill
    pub position: Position,
    /// Exit price
    pub exit_price: Decimal,
    /// Exit timestamp
    pub closed_at: DateTime<Utc>,
    /// Realized P&L net of exit fees
    pub realized_pnl: Decimal,
    /// Fees paid on the exit
    pub fees: Decimal,
}

/// Rolling win/loss statistics over closed positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    /// Closed positions considered
    pub trades: usize,
    /// Positions closed with positive P&L
    pub wins: usize,
    /// Mean winning P&L
    pub avg_win: Decimal,
    /// Mean losing P&L as a positive amount
    pub avg_loss: Decimal,
}

impl TradeStats {
    /// Compute stats over the most recent `lookback` closed positions
    pub fn from_closed(closed: &[ClosedPosition], lookback: usize) -> Self {
        let start = closed.len().saturating_sub(lookback);
        let window = &closed[start..];

        let (wins, losses): (Vec<Decimal>, Vec<Decimal>) = window
            .iter()
            .map(|c| c.realized_pnl)
            .partition(|pnl| *pnl > Decimal::ZERO);

        let mean = |values: &[Decimal]| {
            if values.is_empty() {
                Decimal::ZERO
            } else {
                values.iter().sum::<Decimal>() / Decimal::from(values.len())
            }
        };

        Self {
            trades: window.len(),
            wins: wins.len(),
            avg_win: mean(&wins),
            avg_loss: mean(&losses).abs(),
        }
    }

    /// Fraction of winning trades
    pub fn win_rate(&self) -> Decimal {
        if self.trades == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.trades)
    }

    /// Average win over average loss; `None` without any losses
    pub fn payoff_ratio(&self) -> Option<Decimal> {
        if self.avg_loss.is_zero() {
            return None;
        }
        Some(self.avg_win / self.avg_loss)
    }
}

/// Closed positions retained in memory and in persisted state
pub const CLOSED_HISTORY: usize = 1000;

/// Drop the oldest closed positions beyond [`CLOSED_HISTORY`]
pub(crate) fn trim_closed(closed: &mut Vec<ClosedPosition>) {
    let excess = closed.len().saturating_sub(CLOSED_HISTORY);
    closed.drain(..excess);
}

/// Open positions keyed by symbol, plus the most recent closed history
#[derive(Debug, Default, Clone)]
pub struct PositionBook {
    open: HashMap<String, Position>,
    closed: Vec<ClosedPosition>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state
    pub fn from_parts(open: Vec<Position>, mut closed: Vec<ClosedPosition>) -> Self {
        trim_closed(&mut closed);
        Self {
            open: open.into_iter().map(|p| (p.symbol.clone(), p)).collect(),
            closed,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.open.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.open.get_mut(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn closed(&self) -> &[ClosedPosition] {
        &self.closed
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Sum of |quantity × entry| over open positions
    pub fn total_at_risk(&self) -> Decimal {
        self.open.values().map(Position::notional).sum()
    }

    /// Unrealized P&L at the given marks; positions without a mark count as flat
    pub fn unrealized_pnl(&self, marks: &HashMap<String, Decimal>) -> Decimal {
        self.open
            .values()
            .filter_map(|p| marks.get(&p.symbol).map(|mark| p.unrealized_pnl(*mark)))
            .sum()
    }

    /// Win/loss stats over the last `lookback` closed positions
    pub fn trade_stats(&self, lookback: usize) -> TradeStats {
        TradeStats::from_closed(&self.closed, lookback)
    }

    pub(crate) fn insert(&mut self, position: Position) {
        self.open.insert(position.symbol.clone(), position);
    }

    /// Add to an existing position, averaging the entry price
    pub(crate) fn increase(&mut self, symbol: &str, quantity: Decimal, price: Decimal) {
        if let Some(position) = self.open.get_mut(symbol) {
            let total = position.quantity + quantity;
            if !total.is_zero() {
                position.entry_price =
                    (position.entry_price * position.quantity + price * quantity) / total;
            }
            position.quantity = total;
        }
    }

    /// Reduce a position by `closing` units; closes it when nothing remains
    pub(crate) fn reduce(
        &mut self,
        symbol: &str,
        closing: Decimal,
        price: Decimal,
        realized_pnl: Decimal,
        fees: Decimal,
        at: DateTime<Utc>,
    ) -> Option<ClosedPosition> {
        let position = self.open.get_mut(symbol)?;
        let direction = position.quantity.signum();
        position.quantity -= closing * direction;

        if !position.quantity.is_zero() {
            return None;
        }

        let position = self.open.remove(symbol)?;
        let closed = ClosedPosition {
            position,
            exit_price: price,
            closed_at: at,
            realized_pnl,
            fees,
        };
        self.closed.push(closed.clone());
        trim_closed(&mut self.closed);
        Some(closed)
    }
}
