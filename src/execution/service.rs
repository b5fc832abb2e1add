//! Trade execution pipeline
//!
//! Decision -> mode/broker check -> size -> risk check -> durable submission
//! record -> broker submit -> fill -> ledger -> store -> bracket.

use super::{
    AbortSignal, Broker, BrokerRegistry, FillEvent, Order, OrderAck, OrderId, OrderRole,
    OrderStatus, OutcomeStatus, RetryPolicy, Side, Stage, TradeOutcome, TradingModeGate,
};
use crate::bracket::{BracketGroup, BracketOrderManager, BracketStats, BracketStatus};
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::Config;
use crate::decision::{Action, Decision};
use crate::error::{BrokerError, EngineError, StoreError};
use crate::feed::PriceTick;
use crate::market::Market;
use crate::portfolio::{Account, FillEffect, Ledger, Position, PositionBook};
use crate::risk::{
    create_sizer, MarketSnapshot, PositionSizer, RiskLimits, RiskSummary, RiskVerdict,
    SizingRequest, TradeProposal,
};
use crate::store::{Claim, StateDelta, Store};
use crate::telemetry::{
    increment_counter, record_denial, record_latency, set_gauge, CounterMetric, GaugeMetric,
    LatencyMetric,
};
use chrono::Utc;
use futures_util::StreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tunables for the pipeline, derived from [`Config`]
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub allow_short: bool,
    /// How long `process` waits for a fill before reporting `Pending`
    pub fill_timeout: Duration,
    pub retry: RetryPolicy,
    pub crypto_precision: u32,
    pub kelly_lookback: usize,
    /// Store write attempts after a fill
    pub persist_attempts: u32,
}

impl ExecutionSettings {
    pub fn from_config(config: &Config) -> Self {
        let exec = &config.execution;
        Self {
            allow_short: exec.allow_short,
            fill_timeout: Duration::from_millis(exec.fill_timeout_ms),
            retry: RetryPolicy::new(
                exec.max_submit_attempts,
                Duration::from_millis(exec.retry_initial_delay_ms),
                Duration::from_millis(exec.retry_max_delay_ms),
            )
            .with_timeout(Duration::from_millis(exec.submit_timeout_ms)),
            crypto_precision: config.sizing.crypto_precision,
            kelly_lookback: config.sizing.kelly_lookback,
            persist_attempts: 3,
        }
    }
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub account: Account,
    pub positions: Vec<Position>,
    pub open_orders: Vec<Order>,
    pub risk: RiskSummary,
    pub breaker: BreakerState,
    pub brackets: BracketStats,
}

/// Account, positions and orders; one writer at a time
struct EngineState {
    ledger: Ledger,
    orders: HashMap<OrderId, Order>,
}

type FillWaiter = oneshot::Sender<Result<Order, EngineError>>;

enum Intent {
    Entry(Side),
    Exit(Position),
}

/// Orchestrates risk, sizing, submission, fills and brackets
pub struct TradeExecutionService {
    settings: ExecutionSettings,
    limits: RiskLimits,
    sizer: Box<dyn PositionSizer>,
    registry: BrokerRegistry,
    breaker: Arc<CircuitBreaker>,
    brackets: BracketOrderManager,
    store: Arc<dyn Store>,
    state: Mutex<EngineState>,
    marks: RwLock<HashMap<String, Decimal>>,
    symbol_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    waiters: Mutex<HashMap<OrderId, FillWaiter>>,
    shutdown: CancellationToken,
}

impl TradeExecutionService {
    pub fn new(
        config: &Config,
        registry: BrokerRegistry,
        breaker: Arc<CircuitBreaker>,
        store: Arc<dyn Store>,
        account: Account,
    ) -> Self {
        Self {
            settings: ExecutionSettings::from_config(config),
            limits: RiskLimits::new(config.risk.clone()),
            sizer: create_sizer(&config.sizing),
            registry,
            breaker,
            brackets: BracketOrderManager::new(config.bracket.clone()),
            store,
            state: Mutex::new(EngineState {
                ledger: Ledger::new(account, PositionBook::new()),
                orders: HashMap::new(),
            }),
            marks: RwLock::new(HashMap::new()),
            symbol_locks: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Override the derived settings
    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Reload account, positions, working orders and brackets from the store
    ///
    /// Returns false when the store had no account yet.
    pub async fn restore(&self) -> Result<bool, EngineError> {
        let persisted = self.store.load_state().await?;
        let Some(account) = persisted.account else {
            return Ok(false);
        };

        let mut state = self.state.lock().await;
        state.ledger = Ledger::new(
            account,
            PositionBook::from_parts(persisted.positions.into_values().collect(), persisted.closed),
        );
        state.orders.clear();
        for (id, order) in persisted.orders {
            match order.status {
                OrderStatus::Submitted => {
                    state.orders.insert(id, order);
                }
                OrderStatus::Pending => {
                    // Blocks the symbol until reconcile clears it
                    tracing::warn!(
                        order_id = %id,
                        symbol = %order.symbol,
                        "Order was never acknowledged before restart, broker state unknown"
                    );
                    state.orders.insert(id, order);
                }
                _ => {}
            }
        }
        let positions = state.ledger.book.open_count();
        drop(state);

        let brackets: Vec<_> = persisted
            .brackets
            .into_values()
            .filter(|g| g.status != BracketStatus::Closed)
            .collect();
        self.brackets.restore(brackets).await;

        tracing::info!(positions, "Engine state restored");
        Ok(true)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn brackets(&self) -> &BracketOrderManager {
        &self.brackets
    }

    pub fn registry(&self) -> &BrokerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Token cancelled on operator stop; aborts evaluations before submission
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn account(&self) -> Account {
        self.state.lock().await.ledger.account.clone()
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.state.lock().await.ledger.book.get(symbol).cloned()
    }

    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.marks.read().await.get(symbol).copied()
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let market = MarketSnapshot {
            prices: self.marks.read().await.clone(),
            breaker: self.breaker.state(),
        };
        let state = self.state.lock().await;
        let risk = self
            .limits
            .summary(&state.ledger.account, &state.ledger.book, &market);
        let account = state.ledger.account.clone();
        let positions = state.ledger.book.positions().cloned().collect();
        let open_orders = state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        drop(state);

        EngineSnapshot {
            account,
            positions,
            open_orders,
            risk,
            breaker: market.breaker,
            brackets: self.brackets.stats().await,
        }
    }

    /// Run one decision through the pipeline
    ///
    /// Denials, skips and broker failures are reported in the outcome. Only
    /// fatal configuration errors are returned as `Err`.
    pub async fn process(
        &self,
        decision: &Decision,
        gate: &TradingModeGate,
    ) -> Result<TradeOutcome, EngineError> {
        let mode = gate.mode();
        let mut outcome = TradeOutcome::new(decision, mode);
        increment_counter(CounterMetric::DecisionsEvaluated);

        if decision.action == Action::Hold {
            return Ok(outcome.skipped("hold"));
        }
        if self.shutdown.is_cancelled() {
            return Ok(outcome.skipped("stopped"));
        }

        let symbol = decision.symbol.as_str();
        let market = Market::detect(symbol);
        let broker = self.registry.resolve(market, mode)?;

        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        match self.store.find_submission(decision.id).await {
            Ok(Some(record)) => {
                tracing::info!(symbol, decision_id = %decision.id, "Decision already submitted");
                outcome.order_id = Some(record.order_id);
                return Ok(outcome.with_status(OutcomeStatus::Duplicate));
            }
            Ok(None) => {}
            Err(e) => return Ok(outcome.failed(&e.into())),
        }

        let Some(price) = self.mark(symbol).await else {
            return Ok(outcome.skipped("no-price"));
        };
        outcome.price = Some(price);

        let history = self.store.trade_stats(self.settings.kelly_lookback).await.ok();
        let prices = self.marks.read().await.clone();

        let (intent, quantity) = {
            let mut state = self.state.lock().await;
            let in_flight = state.orders.values().any(|o| {
                o.symbol == symbol
                    && matches!(o.role, OrderRole::Entry | OrderRole::Exit)
                    && !o.status.is_terminal()
            });
            if in_flight {
                return Ok(outcome.skipped("order-in-flight"));
            }

            let position = state.ledger.book.get(symbol).cloned();
            if position.as_ref().is_some_and(|p| p.needs_reconciliation) {
                return Ok(outcome.skipped("reconciliation-required"));
            }

            let intent = match (decision.action, position) {
                (Action::Buy, Some(p)) if !p.is_long() => Intent::Exit(p),
                (Action::Sell, Some(p)) if p.is_long() => Intent::Exit(p),
                (Action::Buy, _) => Intent::Entry(Side::Buy),
                (Action::Sell, Some(_)) => Intent::Entry(Side::Sell),
                (Action::Sell, None) if self.settings.allow_short => Intent::Entry(Side::Sell),
                (Action::Sell, None) => return Ok(outcome.skipped("no-position")),
                (Action::Hold, _) => return Ok(outcome.skipped("hold")),
            };

            let quantity = match &intent {
                Intent::Exit(position) => {
                    outcome = outcome.at_stage(Stage::Sized);
                    position.quantity.abs()
                }
                Intent::Entry(_) => {
                    state.ledger.account.roll_day(Utc::now().date_naive());

                    let bracket = self.brackets.config();
                    let request = SizingRequest {
                        equity: state.ledger.account.equity,
                        cash: state.ledger.account.cash,
                        price,
                        stop_distance: bracket.enabled.then(|| price * bracket.stop_loss_pct),
                        max_position_pct: self.limits.profile().max_position_size,
                        asset_class: market.asset_class(),
                        crypto_precision: self.settings.crypto_precision,
                        history,
                    };
                    let quantity = match self.sizer.size(&request) {
                        Ok(q) => q,
                        Err(EngineError::InsufficientCapital { .. }) => {
                            return Ok(outcome.at_stage(Stage::Sized).skipped("insufficient-capital"));
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => return Ok(outcome.failed(&e)),
                    };
                    outcome.quantity = Some(quantity);
                    outcome = outcome.at_stage(Stage::Sized);
                    if quantity.is_zero() {
                        return Ok(outcome.skipped("zero-quantity"));
                    }

                    let snapshot = MarketSnapshot {
                        prices,
                        breaker: self.breaker.state(),
                    };
                    let proposal = TradeProposal {
                        symbol: symbol.to_string(),
                        market,
                        quantity,
                        price,
                    };
                    match self.limits.can_trade(
                        &proposal,
                        &state.ledger.account,
                        &state.ledger.book,
                        &snapshot,
                    ) {
                        RiskVerdict::Deny(reason) => {
                            record_denial(reason);
                            tracing::info!(symbol, %quantity, %reason, "Trade denied by risk limits");
                            return Ok(outcome.denied(reason));
                        }
                        RiskVerdict::Allow => {
                            outcome.risk = Some(RiskVerdict::Allow);
                            outcome = outcome.at_stage(Stage::RiskChecked);
                        }
                    }
                    quantity
                }
            };
            (intent, quantity)
        };
        outcome.quantity = Some(quantity);

        if self.shutdown.is_cancelled() {
            return Ok(outcome.skipped("stopped"));
        }

        let (side, role, detached) = match &intent {
            Intent::Entry(side) => {
                if let BreakerState::Halted { reason, .. } = self.breaker.state() {
                    return Ok(outcome.skipped(format!("halted: {reason}")));
                }
                (*side, OrderRole::Entry, None)
            }
            Intent::Exit(position) => {
                let side = if position.is_long() { Side::Sell } else { Side::Buy };
                let detached = match self.brackets.detach(symbol, broker.as_ref()).await {
                    Ok(Some(group)) => {
                        self.persist_best_effort(StateDelta {
                            brackets: vec![group.clone()],
                            ..Default::default()
                        })
                        .await;
                        Some(group)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        self.flag_position(symbol).await;
                        return Ok(outcome.failed(&e));
                    }
                };
                (side, OrderRole::Exit, detached)
            }
        };

        let order = Order::market(symbol, market, side, quantity, role, broker.kind())
            .with_decision(decision.id);

        match self.store.get_or_create_submission(decision.id, &order).await {
            Ok(Claim::Created(_)) => {}
            Ok(Claim::Existing(record)) => {
                self.restore_protection(symbol, detached, broker.as_ref()).await;
                outcome.order_id = Some(record.order_id);
                return Ok(outcome.with_status(OutcomeStatus::Duplicate));
            }
            Err(e) => {
                self.restore_protection(symbol, detached, broker.as_ref()).await;
                return Ok(outcome.failed(&e.into()));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.state
            .lock()
            .await
            .orders
            .insert(order.id, order.clone());
        self.waiters.lock().await.insert(order.id, tx);

        // Exits still go out during a halt; only a stop abandons them
        let abort = match role {
            OrderRole::Exit => AbortSignal::new(self.shutdown.clone()),
            _ => AbortSignal::new(self.shutdown.clone()).with_breaker(self.breaker.subscribe()),
        };
        let started = Instant::now();
        let broker_ref: &dyn Broker = broker.as_ref();
        let order_ref = &order;
        let submitted = self
            .settings
            .retry
            .run("submit_order", &abort, move || async move {
                match broker_ref.submit_order(order_ref).await {
                    // An earlier attempt reached the venue after all
                    Err(BrokerError::DuplicateOrder(order_id)) => {
                        tracing::info!(%order_id, "Broker already holds order, treating as acknowledged");
                        Ok(OrderAck::recovered(order_id))
                    }
                    other => other,
                }
            })
            .await;
        record_latency(LatencyMetric::OrderSubmission, started.elapsed());

        let ack = match submitted {
            Ok(ack) => ack,
            Err(e) if e.is_uncertain() => {
                // The venue may hold the order; keep it working so a late fill is booked
                self.waiters.lock().await.remove(&order.id);
                tracing::warn!(symbol, order_id = %order.id, error = %e, "Submission unconfirmed, order left working");
                if detached.is_some() {
                    self.flag_position(symbol).await;
                }
                outcome.reason = Some("submission-unconfirmed".into());
                return Ok(outcome
                    .with_order(order.id, OrderStatus::Pending)
                    .with_status(OutcomeStatus::Pending));
            }
            Err(BrokerError::Aborted { reason, .. }) => {
                self.waiters.lock().await.remove(&order.id);
                tracing::info!(symbol, order_id = %order.id, %reason, "Submission abandoned");
                if let Some(cancelled) = self
                    .close_order(order.id, OrderStatus::Cancelled, reason.clone())
                    .await
                {
                    self.persist_best_effort(StateDelta {
                        orders: vec![cancelled],
                        ..Default::default()
                    })
                    .await;
                }
                self.restore_protection(symbol, detached, broker.as_ref()).await;
                return Ok(outcome
                    .at_stage(Stage::Cancelled)
                    .with_order(order.id, OrderStatus::Cancelled)
                    .skipped(reason));
            }
            Err(e) => {
                increment_counter(CounterMetric::OrdersRejected);
                self.waiters.lock().await.remove(&order.id);
                let error = EngineError::from(e);
                tracing::warn!(symbol, order_id = %order.id, error = %error, "Order rejected");
                if let Some(rejected) = self
                    .close_order(order.id, OrderStatus::Rejected, error.to_string())
                    .await
                {
                    self.persist_best_effort(StateDelta {
                        orders: vec![rejected],
                        ..Default::default()
                    })
                    .await;
                }
                self.restore_protection(symbol, detached, broker.as_ref()).await;
                return Ok(outcome
                    .failed(&error)
                    .at_stage(Stage::Rejected)
                    .with_order(order.id, OrderStatus::Rejected));
            }
        };

        increment_counter(CounterMetric::OrdersSubmitted);
        tracing::info!(
            symbol,
            order_id = %order.id,
            broker_order_id = %ack.broker_order_id,
            ?side,
            %quantity,
            "Order submitted"
        );
        if let Some(acknowledged) = self.acknowledge_order(order.id).await {
            self.persist_best_effort(StateDelta {
                orders: vec![acknowledged],
                ..Default::default()
            })
            .await;
        }
        outcome = outcome
            .at_stage(Stage::Submitted)
            .with_order(order.id, OrderStatus::Submitted);

        match tokio::time::timeout(self.settings.fill_timeout, rx).await {
            Ok(Ok(Ok(filled))) => {
                record_latency(LatencyMetric::FillConfirmation, started.elapsed());
                outcome.price = filled.avg_fill_price.or(outcome.price);
                Ok(outcome
                    .at_stage(Stage::Filled)
                    .with_order(filled.id, OrderStatus::Filled)
                    .with_status(OutcomeStatus::Executed))
            }
            Ok(Ok(Err(error))) => Ok(outcome.failed(&error)),
            Ok(Err(_)) | Err(_) => {
                self.waiters.lock().await.remove(&order.id);
                tracing::warn!(symbol, order_id = %order.id, "Fill not confirmed within timeout");
                outcome.reason = Some("fill-not-confirmed".into());
                Ok(outcome.with_status(OutcomeStatus::Pending))
            }
        }
    }

    /// Apply a broker execution to the ledger, the store and brackets
    pub async fn handle_fill(&self, fill: &FillEvent, broker: &dyn Broker) -> Result<(), EngineError> {
        increment_counter(CounterMetric::Fills);
        if self.brackets.is_leg(fill.order_id).await {
            return self.handle_leg_fill(fill, broker).await;
        }

        let mut state = self.state.lock().await;
        let Some(mut order) = state.orders.get(&fill.order_id).cloned() else {
            tracing::debug!(order_id = %fill.order_id, "Fill for unknown order ignored");
            return Ok(());
        };
        if order.status.is_terminal() {
            tracing::warn!(order_id = %order.id, status = %order.status, "Fill for closed order ignored");
            return Ok(());
        }

        let signed = fill.quantity * fill.side.sign();
        let effect = match state.ledger.apply_fill(
            &fill.symbol,
            order.market,
            signed,
            fill.price,
            fill.fees,
            fill.timestamp,
        ) {
            Ok(effect) => effect,
            Err(e) => {
                let error = EngineError::ReconciliationRequired {
                    symbol: fill.symbol.clone(),
                    reason: format!("fill on order {} refused by ledger: {e}", order.id),
                };
                let flagged = state.ledger.book.get_mut(&fill.symbol).map(|p| {
                    p.needs_reconciliation = true;
                    p.clone()
                });
                drop(state);
                increment_counter(CounterMetric::ReconciliationFlags);
                tracing::error!(symbol = %fill.symbol, error = %error, "Fill could not be booked");
                if let Some(position) = flagged {
                    self.persist_best_effort(StateDelta {
                        positions: vec![position],
                        ..Default::default()
                    })
                    .await;
                }
                self.notify(order.id, Err(EngineError::ReconciliationRequired {
                    symbol: fill.symbol.clone(),
                    reason: "fill refused by ledger".into(),
                }))
                .await;
                return Err(error);
            }
        };

        let complete = order.record_fill(fill.quantity, fill.price) || fill.leaves_quantity.is_zero();
        if complete {
            order.transition(OrderStatus::Filled)?;
            state.ledger.account.record_trade();
        }
        state.orders.insert(order.id, order.clone());
        tracing::info!(
            symbol = %fill.symbol,
            order_id = %order.id,
            quantity = %fill.quantity,
            price = %fill.price,
            complete,
            "Fill booked"
        );

        let delta = ledger_delta(&state.ledger, &fill.symbol, effect, vec![order.clone()]);
        let to_protect = (complete
            && order.role == OrderRole::Entry
            && self.brackets.config().enabled)
            .then(|| state.ledger.book.get(&fill.symbol).cloned())
            .flatten()
            .filter(|p| !p.needs_reconciliation);
        publish_gauges(&state.ledger);
        drop(state);

        if let Err(e) = self.persist(&delta).await {
            let message = format!("fill on order {} not persisted: {e}", order.id);
            self.notify(order.id, Err(EngineError::Store(StoreError::Unavailable(message))))
                .await;
            return Err(e.into());
        }

        if complete {
            if let Some(position) = to_protect {
                self.protect(position, order.id, broker).await;
            }
            self.notify(order.id, Ok(order)).await;
        }
        Ok(())
    }

    /// Feed a price update to marks, the breaker and trailing stops
    pub async fn on_tick(&self, tick: &PriceTick) {
        self.marks
            .write()
            .await
            .insert(tick.symbol.clone(), tick.price);
        self.breaker.on_tick(tick).await;

        let Some(group) = self.brackets.group(&tick.symbol).await else {
            return;
        };
        if !group.is_active() || !group.trailing {
            return;
        }
        let Some(broker) = self.registry.get(group.broker) else {
            return;
        };

        let lock = self.symbol_lock(&tick.symbol).await;
        let Ok(_guard) = lock.try_lock() else {
            tracing::debug!(symbol = %tick.symbol, "Symbol busy, trailing deferred");
            return;
        };

        match self
            .brackets
            .on_price(&tick.symbol, tick.price, broker.as_ref())
            .await
        {
            Ok(Some(stop)) => {
                let mut state = self.state.lock().await;
                let position = state.ledger.book.get_mut(&tick.symbol).map(|p| {
                    p.stop_price = Some(stop);
                    p.clone()
                });
                drop(state);
                let brackets = self.brackets.group(&tick.symbol).await.into_iter().collect();
                self.persist_best_effort(StateDelta {
                    positions: position.into_iter().collect(),
                    brackets,
                    ..Default::default()
                })
                .await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(symbol = %tick.symbol, error = %e, "Trailing stop update failed");
                self.flag_position(&tick.symbol).await;
            }
        }
    }

    /// Consume a broker's fill stream until shutdown, reconnecting when it ends
    ///
    /// After a stop the router keeps booking fills while entry or exit orders
    /// are still working, for at most one fill timeout.
    pub fn spawn_fill_router(self: &Arc<Self>, broker: Arc<dyn Broker>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let initial = Duration::from_millis(100);
            let max = Duration::from_secs(30);
            let mut backoff = initial;
            let kind = broker.kind();
            let mut drain_until: Option<tokio::time::Instant> = None;

            'connect: loop {
                if engine.shutdown.is_cancelled() && drain_until.is_none() {
                    if !engine.has_working_orders().await {
                        break;
                    }
                    tracing::info!(broker = %kind, "Stop requested, draining fills for working orders");
                    drain_until = Some(tokio::time::Instant::now() + engine.settings.fill_timeout);
                }
                if drain_until.is_some_and(|until| tokio::time::Instant::now() >= until) {
                    tracing::warn!(broker = %kind, "Working orders unsettled at shutdown");
                    break;
                }
                match broker.stream_fills().await {
                    Ok(mut fills) => {
                        tracing::info!(broker = %kind, "Fill stream connected");
                        backoff = initial;
                        loop {
                            let deadline = drain_until.unwrap_or_else(tokio::time::Instant::now);
                            tokio::select! {
                                _ = engine.shutdown.cancelled(), if drain_until.is_none() => {
                                    if !engine.has_working_orders().await {
                                        break 'connect;
                                    }
                                    tracing::info!(broker = %kind, "Stop requested, draining fills for working orders");
                                    drain_until = Some(tokio::time::Instant::now() + engine.settings.fill_timeout);
                                }
                                _ = tokio::time::sleep_until(deadline), if drain_until.is_some() => {
                                    tracing::warn!(broker = %kind, "Working orders unsettled at shutdown");
                                    break 'connect;
                                }
                                next = fills.next() => match next {
                                    Some(fill) => {
                                        if let Err(e) = engine.handle_fill(&fill, broker.as_ref()).await {
                                            tracing::error!(broker = %kind, order_id = %fill.order_id, error = %e, "Fill handling failed");
                                        }
                                        if drain_until.is_some() && !engine.has_working_orders().await {
                                            break 'connect;
                                        }
                                    }
                                    None => {
                                        tracing::warn!(broker = %kind, "Fill stream ended, reconnecting");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(broker = %kind, error = %e, "Fill stream unavailable");
                    }
                }

                let wake = tokio::time::Instant::now() + backoff;
                let wake = drain_until.map_or(wake, |until| wake.min(until));
                tokio::select! {
                    // Re-checked at the top of the loop
                    _ = engine.shutdown.cancelled(), if drain_until.is_none() => {}
                    _ = tokio::time::sleep_until(wake) => {}
                }
                backoff = (backoff * 2).min(max);
            }
            tracing::info!(broker = %kind, "Fill router stopped");
        })
    }

    /// Whether any entry or exit order still awaits its fill
    pub async fn has_working_orders(&self) -> bool {
        self.state.lock().await.orders.values().any(|o| {
            matches!(o.role, OrderRole::Entry | OrderRole::Exit) && !o.status.is_terminal()
        })
    }

    /// Retry a flagged bracket and clear the position flag when it succeeds
    ///
    /// Entry and exit orders whose submission was never confirmed are
    /// cancelled at the broker first, which unblocks new decisions for the
    /// symbol.
    pub async fn reconcile(&self, symbol: &str) -> Result<bool, EngineError> {
        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        if !self.clear_unconfirmed(symbol).await? {
            return Ok(false);
        }
        let cleared = match self.brackets.group(symbol).await {
            Some(group) => match self.registry.get(group.broker) {
                Some(broker) => self.brackets.retry_reconciliation(symbol, broker.as_ref()).await?,
                None => false,
            },
            None => true,
        };
        if !cleared {
            return Ok(false);
        }

        let mut state = self.state.lock().await;
        let position = state.ledger.book.get_mut(symbol).map(|p| {
            p.needs_reconciliation = false;
            p.clone()
        });
        drop(state);
        let brackets = self.brackets.group(symbol).await.into_iter().collect();
        self.persist(&StateDelta {
            positions: position.into_iter().collect(),
            brackets,
            ..Default::default()
        })
        .await?;
        tracing::info!(symbol, "Position reconciled");
        Ok(true)
    }

    async fn clear_unconfirmed(&self, symbol: &str) -> Result<bool, EngineError> {
        let unconfirmed: Vec<Order> = self
            .state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| {
                o.symbol == symbol
                    && o.status == OrderStatus::Pending
                    && matches!(o.role, OrderRole::Entry | OrderRole::Exit)
            })
            .cloned()
            .collect();

        for order in unconfirmed {
            let Some(broker) = self.registry.get(order.broker) else {
                return Ok(false);
            };
            match broker.cancel_order(order.id).await {
                Ok(()) | Err(BrokerError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(symbol, order_id = %order.id, error = %e, "Unconfirmed order not cleared");
                    return Ok(false);
                }
            }
            if let Some(cancelled) = self
                .close_order(order.id, OrderStatus::Cancelled, "unconfirmed, cleared by reconcile".into())
                .await
            {
                self.persist(&StateDelta {
                    orders: vec![cancelled],
                    ..Default::default()
                })
                .await?;
            }
            tracing::info!(symbol, order_id = %order.id, "Unconfirmed order cleared");
        }
        Ok(true)
    }

    async fn handle_leg_fill(&self, fill: &FillEvent, broker: &dyn Broker) -> Result<(), EngineError> {
        let Some(leg_fill) = self
            .brackets
            .on_leg_filled(
                fill.order_id,
                fill.quantity,
                fill.price,
                fill.leaves_quantity,
                broker,
            )
            .await
        else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.ledger.book.get(&fill.symbol).is_none() {
            drop(state);
            tracing::warn!(symbol = %fill.symbol, order_id = %fill.order_id, "Bracket leg filled with no open position");
            self.persist_best_effort(StateDelta {
                brackets: vec![leg_fill.group],
                ..Default::default()
            })
            .await;
            return Ok(());
        }

        let signed = fill.quantity * fill.side.sign();
        let effect = match state.ledger.apply_fill(
            &fill.symbol,
            leg_fill.group.market,
            signed,
            fill.price,
            fill.fees,
            fill.timestamp,
        ) {
            Ok(effect) => effect,
            Err(e) => {
                if let Some(p) = state.ledger.book.get_mut(&fill.symbol) {
                    p.needs_reconciliation = true;
                }
                return Err(EngineError::ReconciliationRequired {
                    symbol: fill.symbol.clone(),
                    reason: format!("bracket fill refused by ledger: {e}"),
                });
            }
        };

        if leg_fill.reconciliation.is_some() {
            if let Some(p) = state.ledger.book.get_mut(&fill.symbol) {
                p.needs_reconciliation = true;
            }
        }
        tracing::info!(
            symbol = %fill.symbol,
            leg = ?leg_fill.leg,
            quantity = %fill.quantity,
            price = %fill.price,
            "Bracket leg fill booked"
        );

        let mut delta = ledger_delta(&state.ledger, &fill.symbol, effect, vec![]);
        delta.brackets.push(leg_fill.group);
        publish_gauges(&state.ledger);
        drop(state);

        self.persist(&delta).await?;
        Ok(())
    }

    async fn protect(&self, position: Position, entry_order_id: OrderId, broker: &dyn Broker) {
        match self.brackets.attach(&position, entry_order_id, broker).await {
            Ok(group) => self.record_protection(group).await,
            Err(e @ EngineError::ReconciliationRequired { .. }) => {
                tracing::error!(symbol = %position.symbol, error = %e, "Bracket attach left broker state unknown");
                self.flag_position(&position.symbol).await;
            }
            Err(e) => {
                tracing::error!(symbol = %position.symbol, error = %e, "Bracket attach failed, position unprotected");
                self.flag_position(&position.symbol).await;
            }
        }
    }

    /// Put back legs pulled for an exit that never reached the broker
    async fn restore_protection(
        &self,
        symbol: &str,
        detached: Option<BracketGroup>,
        broker: &dyn Broker,
    ) {
        let Some(detached) = detached else {
            return;
        };
        match self.brackets.reinstate(&detached, broker).await {
            Ok(group) => self.record_protection(group).await,
            Err(e) => {
                tracing::error!(symbol, error = %e, "Bracket not reinstated, position unprotected");
                self.flag_position(symbol).await;
            }
        }
    }

    async fn record_protection(&self, group: BracketGroup) {
        let mut state = self.state.lock().await;
        let updated = state.ledger.book.get_mut(&group.symbol).map(|p| {
            p.stop_price = Some(group.stop_price);
            p.target_price = Some(group.target_price);
            p.bracket_id = Some(group.id);
            p.clone()
        });
        drop(state);
        self.persist_best_effort(StateDelta {
            positions: updated.into_iter().collect(),
            brackets: vec![group],
            ..Default::default()
        })
        .await;
    }

    async fn flag_position(&self, symbol: &str) {
        let mut state = self.state.lock().await;
        let flagged = state.ledger.book.get_mut(symbol).map(|p| {
            p.needs_reconciliation = true;
            p.clone()
        });
        drop(state);
        if let Some(position) = flagged {
            self.persist_best_effort(StateDelta {
                positions: vec![position],
                ..Default::default()
            })
            .await;
        }
    }

    async fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.symbol_locks.lock().await;
        Arc::clone(locks.entry(symbol.to_string()).or_default())
    }

    async fn acknowledge_order(&self, order_id: OrderId) -> Option<Order> {
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id)?;
        // The fill may already have been booked
        if order.status != OrderStatus::Pending {
            return None;
        }
        order.transition(OrderStatus::Submitted).ok()?;
        Some(order.clone())
    }

    async fn close_order(&self, order_id: OrderId, status: OrderStatus, reason: String) -> Option<Order> {
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id)?;
        order.transition(status).ok()?;
        order.reason = Some(reason);
        Some(order.clone())
    }

    async fn notify(&self, order_id: OrderId, result: Result<Order, EngineError>) {
        if let Some(waiter) = self.waiters.lock().await.remove(&order_id) {
            // The waiter may have timed out already
            let _ = waiter.send(result);
        }
    }

    /// Write with bounded retries
    async fn persist(&self, delta: &StateDelta) -> Result<(), StoreError> {
        let attempts = self.settings.persist_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.apply(delta).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    let delay = self.settings.retry.delay_for(attempt);
                    tracing::warn!(attempt, error = %e, "Store write failed, retrying...");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Store write failed");
                    return Err(e);
                }
            }
        }
    }

    async fn persist_best_effort(&self, delta: StateDelta) {
        if let Err(e) = self.persist(&delta).await {
            tracing::error!(error = %e, "State change not persisted");
        }
    }
}

fn ledger_delta(ledger: &Ledger, symbol: &str, effect: FillEffect, orders: Vec<Order>) -> StateDelta {
    let mut delta = StateDelta {
        account: Some(ledger.account.clone()),
        orders,
        ..Default::default()
    };
    match effect {
        FillEffect::Closed(closed) => {
            delta.removed_positions.push(symbol.to_string());
            delta.closed.push(*closed);
        }
        FillEffect::Opened | FillEffect::Increased | FillEffect::Reduced { .. } => {
            delta.positions.extend(ledger.book.get(symbol).cloned());
        }
    }
    delta
}

fn publish_gauges(ledger: &Ledger) {
    let account = &ledger.account;
    set_gauge(GaugeMetric::Equity, account.equity.to_f64().unwrap_or_default());
    set_gauge(GaugeMetric::Cash, account.cash.to_f64().unwrap_or_default());
    set_gauge(GaugeMetric::Committed, account.committed.to_f64().unwrap_or_default());
    set_gauge(
        GaugeMetric::DailyRealizedPnl,
        account.daily_realized_pnl.to_f64().unwrap_or_default(),
    );
    set_gauge(GaugeMetric::OpenPositions, ledger.book.open_count() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::execution::{SimulatedBroker, TradingMode};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    struct Harness {
        engine: Arc<TradeExecutionService>,
        broker: Arc<SimulatedBroker>,
        store: Arc<MemoryStore>,
        gate: TradingModeGate,
    }

    async fn harness(config: Config) -> Harness {
        let broker = Arc::new(SimulatedBroker::new(dec!(100000), dec!(0)));
        let mut registry = BrokerRegistry::new();
        registry.register(broker.clone(), false);
        let store = Arc::new(MemoryStore::new());
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let engine = Arc::new(TradeExecutionService::new(
            &config,
            registry,
            breaker,
            store.clone(),
            Account::new(dec!(100000), TradingMode::Paper),
        ));
        engine.spawn_fill_router(broker.clone());
        Harness {
            engine,
            broker,
            store,
            gate: TradingModeGate::new(10),
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.risk.max_position_size = dec!(0.05);
        config.risk.max_daily_loss = dec!(0.03);
        config.bracket.enabled = false;
        config
    }

    async fn tick(h: &Harness, symbol: &str, price: Decimal) {
        let tick = PriceTick::new(symbol, price, Utc::now());
        h.broker.on_tick(&tick).await;
        h.engine.on_tick(&tick).await;
    }

    #[tokio::test]
    async fn test_hold_has_no_side_effects() {
        let h = harness(config()).await;
        let outcome = h
            .engine
            .process(&Decision::hold("AAPL"), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(h.broker.accepted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_buy_is_sized_filled_and_persisted() {
        let h = harness(config()).await;
        tick(&h, "AAPL", dec!(150)).await;

        let decision = Decision::new("AAPL", Action::Buy, dec!(0.8));
        let outcome = h.engine.process(&decision, &h.gate).await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Executed);
        assert_eq!(outcome.quantity, Some(dec!(13)));
        assert_eq!(outcome.risk, Some(RiskVerdict::Allow));

        let account = h.engine.account().await;
        assert_eq!(account.cash, dec!(98050));
        assert_eq!(account.daily_trades, 1);

        let state = h.store.load_state().await.unwrap();
        assert_eq!(state.positions["AAPL"].quantity, dec!(13));
        assert_eq!(state.account.unwrap().cash, dec!(98050));
    }

    #[tokio::test]
    async fn test_sell_without_position_is_skipped() {
        let h = harness(config()).await;
        tick(&h, "AAPL", dec!(150)).await;
        let decision = Decision::new("AAPL", Action::Sell, dec!(0.9));
        let outcome = h.engine.process(&decision, &h.gate).await.unwrap();
        assert_eq!(outcome.reason.as_deref(), Some("no-position"));
    }

    #[tokio::test]
    async fn test_sell_exits_whole_position() {
        let h = harness(config()).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();

        tick(&h, "AAPL", dec!(160)).await;
        let outcome = h
            .engine
            .process(&Decision::new("AAPL", Action::Sell, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Executed);
        assert_eq!(outcome.quantity, Some(dec!(13)));
        assert!(h.engine.position("AAPL").await.is_none());

        let account = h.engine.account().await;
        assert_eq!(account.cash, dec!(100130));
        assert_eq!(account.daily_trades, 2);
    }

    #[tokio::test]
    async fn test_no_price_is_skipped() {
        let h = harness(config()).await;
        let outcome = h
            .engine
            .process(&Decision::new("MSFT", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.reason.as_deref(), Some("no-price"));
    }

    #[tokio::test]
    async fn test_broker_rejection_is_terminal() {
        let h = harness(config()).await;
        tick(&h, "GME", dec!(20)).await;
        h.broker.reject_symbol("GME").await;

        let outcome = h
            .engine
            .process(&Decision::new("GME", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.stage, Stage::Rejected);
        assert_eq!(outcome.order_status, Some(OrderStatus::Rejected));
        assert_eq!(h.broker.accepted_orders().await.len(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut cfg = config();
        cfg.execution.retry_initial_delay_ms = 1;
        cfg.execution.retry_max_delay_ms = 2;
        let h = harness(cfg).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.broker.fail_next_submits(2).await;

        let outcome = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Executed);
        assert_eq!(h.broker.accepted_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_never_reports_executed() {
        let mut cfg = config();
        cfg.execution.retry_initial_delay_ms = 1;
        cfg.execution.retry_max_delay_ms = 2;
        let h = harness(cfg).await;
        tick(&h, "AAPL", dec!(150)).await;

        let decision = Decision::new("AAPL", Action::Buy, dec!(0.8));
        // The submission record is written before the broker call; every
        // write after it fails
        h.broker.set_submit_delay(Some(Duration::from_millis(20))).await;
        let engine = h.engine.clone();
        let gate = h.gate.clone();
        let task = tokio::spawn(async move { engine.process(&decision, &gate).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.store.fail_writes(10);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.reason.unwrap().starts_with("store"));
    }

    #[tokio::test]
    async fn test_slow_store_read_does_not_block_engine_state() {
        let h = harness(config()).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.store.delay_stats(Duration::from_millis(400));

        let engine = h.engine.clone();
        let gate = h.gate.clone();
        let task = tokio::spawn(async move {
            engine
                .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &gate)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The decision is parked on the store read; the ledger stays reachable
        let account = tokio::time::timeout(Duration::from_millis(100), h.engine.account())
            .await
            .expect("ledger locked during store read");
        assert_eq!(account.cash, dec!(100000));

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Executed);
    }

    fn slow_retry_config() -> Config {
        let mut cfg = config();
        cfg.execution.retry_initial_delay_ms = 300;
        cfg.execution.retry_max_delay_ms = 300;
        cfg
    }

    #[tokio::test]
    async fn test_stop_during_backoff_abandons_submission() {
        let h = harness(slow_retry_config()).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.broker.fail_next_submits(1).await;

        let token = h.engine.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let outcome = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(outcome.reason.as_deref(), Some("stopped"));
        assert_eq!(outcome.order_status, Some(OrderStatus::Cancelled));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(h.broker.accepted_orders().await.is_empty());
        assert!(!h.engine.has_working_orders().await);
    }

    #[tokio::test]
    async fn test_stop_while_disconnected_still_books_pending_fill() {
        let mut cfg = config();
        cfg.execution.fill_timeout_ms = 2_000;
        let h = harness(cfg).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.broker.disconnect().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let engine = h.engine.clone();
        let gate = h.gate.clone();
        let task = tokio::spawn(async move {
            engine
                .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &gate)
                .await
        });
        // Submitted, fill buffered at the venue, router waiting to reconnect
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.engine.shutdown_token().cancel();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Executed);
        assert_eq!(h.engine.position("AAPL").await.unwrap().quantity, dec!(13));
        assert!(!h.engine.has_working_orders().await);
    }

    #[tokio::test]
    async fn test_halt_during_backoff_abandons_entry() {
        let h = harness(slow_retry_config()).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.broker.fail_next_submits(1).await;

        let breaker = h.engine.breaker().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            breaker.halt("news event", Utc::now()).await;
        });

        let outcome = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(outcome.reason.unwrap().starts_with("halted"));
        assert!(h.broker.accepted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_fill_timeout_reports_pending_and_books_late_fill() {
        let mut cfg = config();
        cfg.execution.fill_timeout_ms = 30;
        let h = harness(cfg).await;
        tick(&h, "AAPL", dec!(150)).await;
        // Fills are buffered until the router reconnects
        h.broker.disconnect().await;

        let outcome = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Pending);
        assert_eq!(outcome.reason.as_deref(), Some("fill-not-confirmed"));
        assert_eq!(outcome.order_status, Some(OrderStatus::Submitted));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.engine.position("AAPL").await.unwrap().quantity, dec!(13));
        assert!(!h.engine.has_working_orders().await);
    }

    #[tokio::test]
    async fn test_ack_timeout_after_acceptance_books_fill() {
        let mut cfg = config();
        cfg.execution.retry_initial_delay_ms = 1;
        cfg.execution.retry_max_delay_ms = 2;
        cfg.execution.submit_timeout_ms = 50;
        let h = harness(cfg).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.broker.delay_next_ack(Duration::from_millis(200)).await;

        let outcome = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Executed);
        assert_eq!(h.broker.accepted_orders().await.len(), 1);

        let order = h.engine.order(outcome.order_id.unwrap()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(h.engine.position("AAPL").await.unwrap().quantity, dec!(13));
    }

    #[tokio::test]
    async fn test_unconfirmed_submission_blocks_until_reconciled() {
        let mut cfg = config();
        cfg.execution.retry_initial_delay_ms = 1;
        cfg.execution.retry_max_delay_ms = 2;
        cfg.execution.submit_timeout_ms = 30;
        cfg.execution.max_submit_attempts = 2;
        let h = harness(cfg).await;
        tick(&h, "AAPL", dec!(150)).await;
        h.broker.set_submit_delay(Some(Duration::from_millis(200))).await;

        let outcome = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Pending);
        assert_eq!(outcome.reason.as_deref(), Some("submission-unconfirmed"));
        assert!(h.engine.has_working_orders().await);

        h.broker.set_submit_delay(None).await;
        let blocked = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(blocked.reason.as_deref(), Some("order-in-flight"));

        assert!(h.engine.reconcile("AAPL").await.unwrap());
        let order = h.engine.order(outcome.order_id.unwrap()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);

        let retried = h
            .engine
            .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &h.gate)
            .await
            .unwrap();
        assert_eq!(retried.status, OutcomeStatus::Executed);
    }
}
