//! Bracket order manager

use super::{BracketGroup, BracketStats, BracketStatus, Leg, LegFill};
use crate::config::BracketConfig;
use crate::error::{BrokerError, EngineError};
use crate::execution::{Broker, Order, OrderId, OrderStatus, Side};
use crate::portfolio::Position;
use crate::telemetry::{increment_counter, CounterMetric};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    /// Latest bracket per symbol
    groups: HashMap<String, BracketGroup>,
    stats: BracketStats,
}

/// Owns every bracket group and all broker traffic for bracket legs
///
/// Mutations are serialized through one lock, so a trailing replacement and
/// a leg execution for the same group never interleave.
pub struct BracketOrderManager {
    config: BracketConfig,
    inner: Mutex<Inner>,
}

impl BracketOrderManager {
    pub fn new(config: BracketConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &BracketConfig {
        &self.config
    }

    /// Reload groups persisted before a restart
    pub async fn restore(&self, groups: Vec<BracketGroup>) {
        let mut inner = self.inner.lock().await;
        for group in groups {
            inner.groups.insert(group.symbol.clone(), group);
        }
    }

    pub async fn group(&self, symbol: &str) -> Option<BracketGroup> {
        self.inner.lock().await.groups.get(symbol).cloned()
    }

    pub async fn groups(&self) -> Vec<BracketGroup> {
        self.inner.lock().await.groups.values().cloned().collect()
    }

    pub async fn stats(&self) -> BracketStats {
        self.inner.lock().await.stats
    }

    /// Whether `order_id` is a leg of any known bracket
    pub async fn is_leg(&self, order_id: OrderId) -> bool {
        self.inner
            .lock()
            .await
            .groups
            .values()
            .any(|g| g.leg_of(order_id).is_some())
    }

    /// Stop and target prices for an entry
    pub fn bracket_prices(&self, entry_price: Decimal, long: bool) -> (Decimal, Decimal) {
        let sl = self.config.stop_loss_pct;
        let tp = self.config.take_profit_pct;
        if long {
            (
                entry_price * (Decimal::ONE - sl),
                entry_price * (Decimal::ONE + tp),
            )
        } else {
            (
                entry_price * (Decimal::ONE + sl),
                entry_price * (Decimal::ONE - tp),
            )
        }
    }

    /// Place stop-loss and take-profit legs around a filled position
    ///
    /// Any active bracket for the symbol is replaced so the legs always cover
    /// the whole position. If the target cannot be placed the stop is pulled
    /// again and the error returned.
    pub async fn attach(
        &self,
        position: &Position,
        entry_order_id: OrderId,
        broker: &dyn Broker,
    ) -> Result<BracketGroup, EngineError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.groups.get(&position.symbol).cloned() {
            if existing.is_active() {
                let mut existing = existing;
                if let Err(reason) = cancel_open_legs(&mut existing, broker).await {
                    return Err(flag(&mut inner, existing, reason));
                }
                existing.status = BracketStatus::Closed;
                inner.groups.insert(existing.symbol.clone(), existing);
            }
        }

        let long = position.is_long();
        let (stop_price, target_price) = self.bracket_prices(position.entry_price, long);
        let exit_side = if long { Side::Sell } else { Side::Buy };
        let quantity = position.quantity.abs();
        let id = Uuid::new_v4();
        let kind = broker.kind();

        let stop_order = Order::stop(
            &position.symbol,
            position.market,
            exit_side,
            quantity,
            stop_price,
            kind,
        )
        .with_bracket(id);
        let target_order = Order::take_profit(
            &position.symbol,
            position.market,
            exit_side,
            quantity,
            target_price,
            kind,
        )
        .with_bracket(id);

        let (stop_order, target_order) =
            submit_legs(&position.symbol, stop_order, target_order, broker).await?;

        let now = Utc::now();
        let group = BracketGroup {
            id,
            symbol: position.symbol.clone(),
            market: position.market,
            broker: kind,
            entry_order_id,
            entry_price: position.entry_price,
            position_quantity: position.quantity,
            stop_order,
            target_order,
            stop_price,
            target_price,
            trailing: self.config.trailing,
            trailing_pct: self.config.trailing_pct,
            ratchet_price: None,
            status: BracketStatus::Active,
            created_at: now,
            updated_at: now,
        };

        tracing::info!(
            symbol = %group.symbol,
            bracket_id = %group.id,
            %stop_price,
            %target_price,
            trailing = group.trailing,
            "Bracket attached"
        );
        inner.stats.created += 1;
        increment_counter(CounterMetric::BracketsAttached);
        inner.groups.insert(group.symbol.clone(), group.clone());
        Ok(group)
    }

    /// Evaluate the trailing stop for `symbol` at `price`
    ///
    /// Returns the new stop price when the stop was moved. The stop only
    /// ever tightens.
    pub async fn on_price(
        &self,
        symbol: &str,
        price: Decimal,
        broker: &dyn Broker,
    ) -> Result<Option<Decimal>, EngineError> {
        let mut inner = self.inner.lock().await;
        let Some(group) = inner.groups.get(symbol) else {
            return Ok(None);
        };
        if !group.is_active() || !group.trailing || group.entry_price <= Decimal::ZERO {
            return Ok(None);
        }

        let long = group.is_long();
        let favorable = |from: Decimal| {
            if long {
                (price - from) / from
            } else {
                (from - price) / from
            }
        };

        let should_move = match group.ratchet_price {
            None => favorable(group.entry_price) >= self.config.trailing_activation_pct,
            Some(ratchet) if ratchet > Decimal::ZERO => {
                favorable(ratchet) > self.config.trailing_step_pct
            }
            Some(_) => false,
        };
        if !should_move {
            return Ok(None);
        }

        let candidate = if long {
            price * (Decimal::ONE - group.trailing_pct)
        } else {
            price * (Decimal::ONE + group.trailing_pct)
        };
        let tighter = if long {
            candidate > group.stop_price
        } else {
            candidate < group.stop_price
        };
        if !tighter {
            return Ok(None);
        }

        let mut group = group.clone();
        let old_stop = group.stop_order.id;
        match broker.cancel_order(old_stop).await {
            Ok(()) => {}
            Err(BrokerError::NotFound(_)) => {
                // Stop executed at the broker; its fill is on the way
                tracing::debug!(symbol, %old_stop, "Stop no longer resting, skipping trail");
                return Ok(None);
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(symbol, error = %e, "Trailing cancel failed, keeping current stop");
                return Ok(None);
            }
            Err(e) => {
                let reason = format!("trailing cancel of stop {old_stop} failed: {e}");
                return Err(flag(&mut inner, group, reason));
            }
        }
        group.mark_leg(Leg::StopLoss, OrderStatus::Cancelled);

        let mut replacement = Order::stop(
            &group.symbol,
            group.market,
            group.stop_order.side,
            group.stop_order.remaining(),
            candidate,
            group.broker,
        )
        .with_bracket(group.id);

        if let Err(e) = broker.submit_order(&replacement).await {
            let reason = format!("replacement stop could not be placed, position unprotected: {e}");
            return Err(flag(&mut inner, group, reason));
        }
        replacement.transition(OrderStatus::Submitted)?;

        tracing::info!(
            symbol,
            old_stop = %group.stop_price,
            new_stop = %candidate,
            %price,
            "Trailing stop raised"
        );
        group.stop_order = replacement;
        group.stop_price = candidate;
        group.ratchet_price = Some(price);
        group.updated_at = Utc::now();
        inner.stats.trailing_updates += 1;
        increment_counter(CounterMetric::TrailingUpdates);
        inner.groups.insert(group.symbol.clone(), group);
        Ok(Some(candidate))
    }

    /// Record an execution on a bracket leg
    ///
    /// Once the leg is complete its sibling is cancelled. When that cancel
    /// fails the group is flagged for reconciliation and the reason is
    /// returned in [`LegFill::reconciliation`].
    pub async fn on_leg_filled(
        &self,
        order_id: OrderId,
        quantity: Decimal,
        price: Decimal,
        leaves: Decimal,
        broker: &dyn Broker,
    ) -> Option<LegFill> {
        let mut inner = self.inner.lock().await;
        let (symbol, leg) = inner
            .groups
            .values()
            .find_map(|g| g.leg_of(order_id).map(|leg| (g.symbol.clone(), leg)))?;
        let mut group = inner.groups.get(&symbol)?.clone();

        group.leg_mut(leg).record_fill(quantity, price);
        let complete = leaves.is_zero();
        if !complete {
            inner.groups.insert(symbol, group.clone());
            return Some(LegFill {
                group,
                leg,
                complete,
                reconciliation: None,
            });
        }

        group.mark_leg(leg, OrderStatus::Filled);
        match leg {
            Leg::StopLoss => inner.stats.stop_losses_hit += 1,
            Leg::TakeProfit => inner.stats.take_profits_hit += 1,
        }

        let sibling = match leg {
            Leg::StopLoss => Leg::TakeProfit,
            Leg::TakeProfit => Leg::StopLoss,
        };
        let sibling_id = group.leg(sibling).id;
        let mut reconciliation = None;

        if !group.leg(sibling).status.is_terminal() {
            match broker.cancel_order(sibling_id).await {
                Ok(()) => {
                    group.mark_leg(sibling, OrderStatus::Cancelled);
                    tracing::info!(%symbol, ?leg, %sibling_id, "Bracket leg filled, sibling cancelled");
                }
                Err(e) => {
                    reconciliation = Some(format!("sibling {sibling_id} cancel failed: {e}"));
                }
            }
        }

        let group = match reconciliation.clone() {
            Some(reason) => {
                flag(&mut inner, group.clone(), reason);
                inner.groups.get(&symbol).cloned().unwrap_or(group)
            }
            None => {
                group.status = BracketStatus::Closed;
                inner.groups.insert(symbol, group.clone());
                group
            }
        };

        Some(LegFill {
            group,
            leg,
            complete,
            reconciliation,
        })
    }

    /// Cancel both legs ahead of a discretionary exit
    pub async fn detach(
        &self,
        symbol: &str,
        broker: &dyn Broker,
    ) -> Result<Option<BracketGroup>, EngineError> {
        let mut inner = self.inner.lock().await;
        let Some(mut group) = inner.groups.get(symbol).cloned() else {
            return Ok(None);
        };
        match group.status {
            BracketStatus::Closed => return Ok(None),
            BracketStatus::NeedsReconciliation => {
                return Err(EngineError::ReconciliationRequired {
                    symbol: symbol.to_string(),
                    reason: "bracket awaiting reconciliation".into(),
                })
            }
            BracketStatus::Active => {}
        }

        if let Err(reason) = cancel_open_legs(&mut group, broker).await {
            return Err(flag(&mut inner, group, reason));
        }
        group.status = BracketStatus::Closed;
        tracing::info!(symbol, bracket_id = %group.id, "Bracket detached for exit");
        inner.groups.insert(symbol.to_string(), group.clone());
        Ok(Some(group))
    }

    /// Put a detached group's legs back at the broker
    ///
    /// Used when the exit that detached them was never placed. Stop and
    /// target keep their last prices, so trailing progress survives.
    pub async fn reinstate(
        &self,
        detached: &BracketGroup,
        broker: &dyn Broker,
    ) -> Result<BracketGroup, EngineError> {
        let mut inner = self.inner.lock().await;
        let exit_side = if detached.is_long() { Side::Sell } else { Side::Buy };
        let quantity = detached.position_quantity.abs();
        let id = Uuid::new_v4();
        let kind = broker.kind();

        let stop_order = Order::stop(
            &detached.symbol,
            detached.market,
            exit_side,
            quantity,
            detached.stop_price,
            kind,
        )
        .with_bracket(id);
        let target_order = Order::take_profit(
            &detached.symbol,
            detached.market,
            exit_side,
            quantity,
            detached.target_price,
            kind,
        )
        .with_bracket(id);
        let (stop_order, target_order) =
            submit_legs(&detached.symbol, stop_order, target_order, broker).await?;

        let now = Utc::now();
        let group = BracketGroup {
            id,
            broker: kind,
            stop_order,
            target_order,
            status: BracketStatus::Active,
            created_at: now,
            updated_at: now,
            ..detached.clone()
        };
        tracing::info!(
            symbol = %group.symbol,
            bracket_id = %group.id,
            stop_price = %group.stop_price,
            target_price = %group.target_price,
            "Bracket reinstated"
        );
        inner.groups.insert(group.symbol.clone(), group.clone());
        Ok(group)
    }

    /// Try again to cancel the legs of a flagged group
    ///
    /// Legs the broker no longer knows are treated as gone. Returns true when
    /// the group is clear.
    pub async fn retry_reconciliation(
        &self,
        symbol: &str,
        broker: &dyn Broker,
    ) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().await;
        let Some(mut group) = inner.groups.get(symbol).cloned() else {
            return Ok(false);
        };
        if group.status != BracketStatus::NeedsReconciliation {
            return Ok(group.status == BracketStatus::Closed);
        }

        for leg in [Leg::StopLoss, Leg::TakeProfit] {
            if group.leg(leg).status.is_terminal() {
                continue;
            }
            match broker.cancel_order(group.leg(leg).id).await {
                Ok(()) | Err(BrokerError::NotFound(_)) => {
                    group.mark_leg(leg, OrderStatus::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(symbol, error = %e, "Reconciliation retry failed");
                    inner.groups.insert(symbol.to_string(), group);
                    return Ok(false);
                }
            }
        }

        group.status = BracketStatus::Closed;
        tracing::info!(symbol, "Bracket reconciled");
        inner.groups.insert(symbol.to_string(), group);
        Ok(true)
    }

    /// Operator confirmation that broker state was fixed by hand
    pub async fn mark_reconciled(&self, symbol: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.groups.get_mut(symbol) {
            Some(group) if group.status == BracketStatus::NeedsReconciliation => {
                group.status = BracketStatus::Closed;
                group.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

/// Place stop then target; pull the stop again when the target fails
async fn submit_legs(
    symbol: &str,
    mut stop_order: Order,
    mut target_order: Order,
    broker: &dyn Broker,
) -> Result<(Order, Order), EngineError> {
    broker.submit_order(&stop_order).await?;
    stop_order.transition(OrderStatus::Submitted)?;

    if let Err(e) = broker.submit_order(&target_order).await {
        tracing::warn!(symbol, error = %e, "Take-profit leg failed, pulling stop-loss");
        if let Err(cancel_err) = broker.cancel_order(stop_order.id).await {
            return Err(EngineError::ReconciliationRequired {
                symbol: symbol.to_string(),
                reason: format!(
                    "target leg failed ({e}) and stop {} could not be cancelled: {cancel_err}",
                    stop_order.id
                ),
            });
        }
        return Err(e.into());
    }
    target_order.transition(OrderStatus::Submitted)?;
    Ok((stop_order, target_order))
}

async fn cancel_open_legs(group: &mut BracketGroup, broker: &dyn Broker) -> Result<(), String> {
    for leg in [Leg::StopLoss, Leg::TakeProfit] {
        let order = group.leg(leg);
        if order.status.is_terminal() {
            continue;
        }
        let id = order.id;
        match broker.cancel_order(id).await {
            Ok(()) => group.mark_leg(leg, OrderStatus::Cancelled),
            Err(BrokerError::NotFound(_)) => {
                return Err(format!("{leg:?} leg {id} is no longer resting"));
            }
            Err(e) => return Err(format!("cancel of {leg:?} leg {id} failed: {e}")),
        }
    }
    Ok(())
}

fn flag(inner: &mut Inner, mut group: BracketGroup, reason: String) -> EngineError {
    tracing::error!(symbol = %group.symbol, bracket_id = %group.id, %reason, "Bracket needs reconciliation");
    group.status = BracketStatus::NeedsReconciliation;
    group.updated_at = Utc::now();
    inner.stats.reconciliation_flags += 1;
    increment_counter(CounterMetric::ReconciliationFlags);
    let symbol = group.symbol.clone();
    inner.groups.insert(symbol.clone(), group);
    EngineError::ReconciliationRequired { symbol, reason }
}
