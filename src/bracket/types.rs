//! Bracket types

use crate::execution::{BrokerKind, Order, OrderId, OrderStatus};
use crate::market::Market;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bracket lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BracketStatus {
    /// Both legs resting
    Active,
    /// One leg filled and the sibling was cancelled, or the position exited
    Closed,
    /// Broker state is unknown; no further automated action
    NeedsReconciliation,
}

/// Which side of the bracket an order is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    StopLoss,
    TakeProfit,
}

/// Stop-loss and take-profit pair protecting one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketGroup {
    pub id: Uuid,
    pub symbol: String,
    pub market: Market,
    pub broker: BrokerKind,
    pub entry_order_id: OrderId,
    pub entry_price: Decimal,
    /// Signed quantity of the protected position
    pub position_quantity: Decimal,
    pub stop_order: Order,
    pub target_order: Order,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub trailing: bool,
    pub trailing_pct: Decimal,
    /// Price at the last trailing adjustment; `None` until trailing activates
    pub ratchet_price: Option<Decimal>,
    pub status: BracketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BracketGroup {
    pub fn is_long(&self) -> bool {
        self.position_quantity > Decimal::ZERO
    }

    pub fn is_active(&self) -> bool {
        self.status == BracketStatus::Active
    }

    /// Which leg `order_id` is, if it belongs to this group
    pub fn leg_of(&self, order_id: OrderId) -> Option<Leg> {
        if self.stop_order.id == order_id {
            Some(Leg::StopLoss)
        } else if self.target_order.id == order_id {
            Some(Leg::TakeProfit)
        } else {
            None
        }
    }

    pub fn leg(&self, leg: Leg) -> &Order {
        match leg {
            Leg::StopLoss => &self.stop_order,
            Leg::TakeProfit => &self.target_order,
        }
    }

    pub(crate) fn leg_mut(&mut self, leg: Leg) -> &mut Order {
        match leg {
            Leg::StopLoss => &mut self.stop_order,
            Leg::TakeProfit => &mut self.target_order,
        }
    }

    /// Legs still working at the broker
    pub fn open_legs(&self) -> Vec<&Order> {
        [&self.stop_order, &self.target_order]
            .into_iter()
            .filter(|o| !o.status.is_terminal())
            .collect()
    }

    pub(crate) fn mark_leg(&mut self, leg: Leg, status: OrderStatus) {
        let order = self.leg_mut(leg);
        // Terminal legs stay as they are
        if order.transition(status).is_err() {
            tracing::debug!(order_id = %order.id, %status, "Ignoring leg transition");
        }
        self.updated_at = Utc::now();
    }
}

/// Running totals across all brackets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketStats {
    pub created: u64,
    pub stop_losses_hit: u64,
    pub take_profits_hit: u64,
    pub trailing_updates: u64,
    pub reconciliation_flags: u64,
}

/// Result of a bracket leg execution
#[derive(Debug, Clone)]
pub struct LegFill {
    pub group: BracketGroup,
    pub leg: Leg,
    /// Whether the leg has no quantity left
    pub complete: bool,
    /// Set when the sibling could not be cancelled
    pub reconciliation: Option<String>,
}
