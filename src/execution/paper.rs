//! Simulated broker for paper trading

use super::{Broker, BrokerKind, FillEvent, Order, OrderAck, OrderId, OrderType, Side, TradingMode};
use crate::error::BrokerError;
use crate::feed::PriceTick;
use crate::portfolio::{Account, Ledger, PositionBook};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Injected failures for exercising the engine's error paths
#[derive(Debug, Default)]
struct Faults {
    transient_submits: u32,
    rejected_submits: u32,
    failing_cancels: u32,
    rejected_symbols: HashSet<String>,
    submit_delay: Option<Duration>,
    /// Held after the order is accepted, once
    ack_delay: Option<Duration>,
    split_fills: bool,
}

struct SimState {
    /// Virtual account the simulated venue books fills against
    ledger: Ledger,
    marks: HashMap<String, Decimal>,
    /// Stop and limit orders waiting for their trigger
    resting: HashMap<OrderId, Order>,
    accepted: Vec<Order>,
    fill_tx: Option<mpsc::UnboundedSender<FillEvent>>,
    /// Fills produced while no stream was connected
    undelivered: Vec<FillEvent>,
}

/// Paper broker: market orders fill at the current mark, stops and limits
/// rest until a price update crosses them
pub struct SimulatedBroker {
    kind: BrokerKind,
    fee_rate: Decimal,
    state: Mutex<SimState>,
    faults: Mutex<Faults>,
}

impl SimulatedBroker {
    /// Create a simulated broker with a virtual cash balance
    pub fn new(initial_cash: Decimal, fee_rate: Decimal) -> Self {
        Self {
            kind: BrokerKind::Simulated,
            fee_rate,
            state: Mutex::new(SimState {
                ledger: Ledger::new(
                    Account::new(initial_cash, TradingMode::Paper),
                    PositionBook::new(),
                ),
                marks: HashMap::new(),
                resting: HashMap::new(),
                accepted: vec![],
                fill_tx: None,
                undelivered: vec![],
            }),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Report a different broker kind (sandbox stand-in for a venue)
    pub fn with_kind(mut self, kind: BrokerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Update the mark for a symbol and trigger any crossed resting orders
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.lock().await;
        state.marks.insert(symbol.to_string(), price);

        let triggered: Vec<OrderId> = state
            .resting
            .values()
            .filter(|o| o.symbol == symbol && crosses(o, price))
            .map(|o| o.id)
            .collect();

        for id in triggered {
            let Some(order) = state.resting.remove(&id) else {
                continue;
            };
            let fill_price = match order.order_type {
                OrderType::Limit | OrderType::StopLimit => order.limit_price.unwrap_or(price),
                _ => price,
            };
            if let Err(e) = self.execute(&mut state, &order, order.quantity, fill_price) {
                tracing::warn!(order_id = %order.id, error = %e, "Triggered order could not fill");
            }
        }
    }

    /// Convenience for feeding ticks straight from a price feed
    pub async fn on_tick(&self, tick: &PriceTick) {
        self.set_price(&tick.symbol, tick.price).await;
    }

    /// Fail the next `count` submissions with a transient error
    pub async fn fail_next_submits(&self, count: u32) {
        self.faults.lock().await.transient_submits = count;
    }

    /// Reject the next `count` submissions
    pub async fn reject_next_submits(&self, count: u32) {
        self.faults.lock().await.rejected_submits = count;
    }

    /// Fail the next `count` cancellations
    pub async fn fail_next_cancels(&self, count: u32) {
        self.faults.lock().await.failing_cancels = count;
    }

    /// Reject every order for a symbol
    pub async fn reject_symbol(&self, symbol: &str) {
        self.faults
            .lock()
            .await
            .rejected_symbols
            .insert(symbol.to_string());
    }

    /// Delay every submission acknowledgement
    pub async fn set_submit_delay(&self, delay: Option<Duration>) {
        self.faults.lock().await.submit_delay = delay;
    }

    /// Accept the next order but hold its acknowledgement for `delay`
    pub async fn delay_next_ack(&self, delay: Duration) {
        self.faults.lock().await.ack_delay = Some(delay);
    }

    /// Fill market orders in two halves
    pub async fn set_split_fills(&self, split: bool) {
        self.faults.lock().await.split_fills = split;
    }

    /// Drop the current fill stream; later fills are buffered until reconnect
    pub async fn disconnect(&self) {
        self.state.lock().await.fill_tx = None;
    }

    /// Orders accepted so far
    pub async fn accepted_orders(&self) -> Vec<Order> {
        self.state.lock().await.accepted.clone()
    }

    /// Resting stop and limit orders
    pub async fn resting_orders(&self) -> Vec<Order> {
        self.state.lock().await.resting.values().cloned().collect()
    }

    fn execute(
        &self,
        state: &mut SimState,
        order: &Order,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), BrokerError> {
        let fees = (quantity * price * self.fee_rate).round_dp(8);
        let held = state
            .ledger
            .book
            .get(&order.symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let signed = quantity * order.side.sign();
        // The venue books against its own ledger; opposite fills beyond the
        // held quantity are not modelled
        if held.is_zero() || held.signum() == signed.signum() || quantity <= held.abs() {
            state
                .ledger
                .apply_fill(&order.symbol, order.market, signed, price, fees, Utc::now())
                .map_err(|_| BrokerError::Rejected("insufficient buying power".into()))?;
        }

        let already = state
            .accepted
            .iter()
            .find(|o| o.id == order.id)
            .map(|o| o.filled_quantity)
            .unwrap_or(Decimal::ZERO);
        let filled = already + quantity;
        if let Some(accepted) = state.accepted.iter_mut().find(|o| o.id == order.id) {
            accepted.filled_quantity = filled;
        }

        let fill = FillEvent {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            price,
            fees,
            leaves_quantity: (order.quantity - filled).max(Decimal::ZERO),
            timestamp: Utc::now(),
        };
        tracing::info!(order_id = %order.id, symbol = %order.symbol, %quantity, %price, "Paper order filled");
        deliver(state, fill);
        Ok(())
    }
}

fn crosses(order: &Order, price: Decimal) -> bool {
    match (order.order_type, order.side) {
        (OrderType::Stop | OrderType::StopLimit, Side::Sell) => {
            order.stop_price.is_some_and(|stop| price <= stop)
        }
        (OrderType::Stop | OrderType::StopLimit, Side::Buy) => {
            order.stop_price.is_some_and(|stop| price >= stop)
        }
        (OrderType::Limit, Side::Sell) => order.limit_price.is_some_and(|limit| price >= limit),
        (OrderType::Limit, Side::Buy) => order.limit_price.is_some_and(|limit| price <= limit),
        (OrderType::Market, _) => true,
    }
}

fn deliver(state: &mut SimState, fill: FillEvent) {
    if let Some(tx) = &state.fill_tx {
        match tx.send(fill) {
            Ok(()) => return,
            Err(mpsc::error::SendError(fill)) => {
                state.fill_tx = None;
                state.undelivered.push(fill);
            }
        }
    } else {
        state.undelivered.push(fill);
    }
}

#[async_trait]
impl Broker for SimulatedBroker {
    fn kind(&self) -> BrokerKind {
        self.kind
    }

    async fn submit_order(&self, order: &Order) -> Result<OrderAck, BrokerError> {
        let (delay, split, ack_delay) = {
            let mut faults = self.faults.lock().await;
            if faults.transient_submits > 0 {
                faults.transient_submits -= 1;
                return Err(BrokerError::Transient("simulated connection reset".into()));
            }
            if faults.rejected_submits > 0 {
                faults.rejected_submits -= 1;
                return Err(BrokerError::Rejected("simulated venue rejection".into()));
            }
            if faults.rejected_symbols.contains(&order.symbol) {
                return Err(BrokerError::Rejected(format!(
                    "{} is not tradeable",
                    order.symbol
                )));
            }
            (faults.submit_delay, faults.split_fills, faults.ack_delay.take())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.accepted.iter().any(|o| o.id == order.id) {
            return Err(BrokerError::DuplicateOrder(order.id));
        }

        match order.order_type {
            OrderType::Market => {
                let price = state
                    .marks
                    .get(&order.symbol)
                    .copied()
                    .or(order.limit_price)
                    .ok_or_else(|| BrokerError::Rejected(format!("no price for {}", order.symbol)))?;
                state.accepted.push(order.clone());

                let result = if split && order.quantity > Decimal::ONE {
                    let first = (order.quantity / Decimal::TWO).floor();
                    self.execute(&mut state, order, first, price).and_then(|_| {
                        self.execute(&mut state, order, order.quantity - first, price)
                    })
                } else {
                    self.execute(&mut state, order, order.quantity, price)
                };
                if let Err(e) = result {
                    state.accepted.retain(|o| o.id != order.id);
                    return Err(e);
                }
            }
            _ => {
                state.accepted.push(order.clone());
                state.resting.insert(order.id, order.clone());
            }
        }

        drop(state);
        tracing::debug!(order_id = %order.id, symbol = %order.symbol, "Paper order accepted");
        if let Some(delay) = ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(OrderAck {
            order_id: order.id,
            broker_order_id: format!("SIM-{}", order.id.simple()),
            accepted_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        {
            let mut faults = self.faults.lock().await;
            if faults.failing_cancels > 0 {
                faults.failing_cancels -= 1;
                return Err(BrokerError::Transient("simulated cancel failure".into()));
            }
        }

        let mut state = self.state.lock().await;
        match state.resting.remove(&order_id) {
            Some(_) => {
                tracing::info!(%order_id, "Paper order cancelled");
                Ok(())
            }
            None => Err(BrokerError::NotFound(order_id)),
        }
    }

    async fn get_account_state(&self) -> Result<Account, BrokerError> {
        Ok(self.state.lock().await.ledger.account.clone())
    }

    async fn stream_fills(&self) -> Result<BoxStream<'static, FillEvent>, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        for fill in state.undelivered.drain(..) {
            // Receiver is alive in this scope
            let _ = tx.send(fill);
        }
        state.fill_tx = Some(tx);

        let fills = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|fill| (fill, rx))
        });
        Ok(fills.boxed())
    }
}
