//! Per-symbol evaluation loops

use super::ControlHandle;
use crate::config::AutomationConfig;
use crate::decision::{Action, Advisor, Decision, DecisionContext};
use crate::error::EngineError;
use crate::execution::{TradeExecutionService, TradeOutcome, TradingMode, TradingModeGate};
use crate::market::{is_market_open, Market};
use crate::telemetry::{increment_counter, record_latency, CounterMetric, LatencyMetric};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Operational view of the loops
#[derive(Debug, Clone, Serialize)]
pub struct AutomationStatus {
    pub running: bool,
    pub paused: bool,
    pub mode: TradingMode,
    pub symbols: Vec<String>,
    pub evaluations: u64,
    pub executions: u64,
    pub errors: u64,
    pub completed_paper_trades: u32,
    pub last_evaluation: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    evaluations: u64,
    executions: u64,
    errors: u64,
    last_evaluation: HashMap<String, DateTime<Utc>>,
}

/// Polls the advisor for every watchlist symbol and executes approved decisions
pub struct AutomationService {
    config: AutomationConfig,
    advisor: Arc<dyn Advisor>,
    engine: Arc<TradeExecutionService>,
    gate: RwLock<TradingModeGate>,
    control: ControlHandle,
    counters: Mutex<Counters>,
    outcomes: Mutex<VecDeque<TradeOutcome>>,
    running: AtomicBool,
}

impl AutomationService {
    pub fn new(
        config: AutomationConfig,
        advisor: Arc<dyn Advisor>,
        engine: Arc<TradeExecutionService>,
        gate: TradingModeGate,
    ) -> Self {
        let control = ControlHandle::new(engine.breaker().clone(), engine.shutdown_token());
        Self {
            config,
            advisor,
            engine,
            gate: RwLock::new(gate),
            control,
            counters: Mutex::new(Counters::default()),
            outcomes: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn engine(&self) -> &Arc<TradeExecutionService> {
        &self.engine
    }

    pub async fn gate(&self) -> TradingModeGate {
        self.gate.read().await.clone()
    }

    pub async fn set_live_approval(&self, approved: bool) {
        self.gate.write().await.set_live_approval(approved);
    }

    pub async fn set_live_confirmation(&self, confirmed: bool) {
        self.gate.write().await.set_live_confirmation(confirmed);
    }

    /// Ask the gate to go live
    ///
    /// Every watchlist market must also resolve to a live-approved broker.
    pub async fn request_live(&self) -> Result<TradingMode, EngineError> {
        for symbol in &self.config.watchlist {
            self.engine
                .registry()
                .resolve(Market::detect(symbol), TradingMode::Live)?;
        }
        self.gate.write().await.request_live()
    }

    pub async fn revert_to_paper(&self) {
        self.gate.write().await.revert_to_paper();
    }

    /// Evaluate every watchlist symbol once, concurrently
    pub async fn run_once(&self) -> Vec<TradeOutcome> {
        if self.control.is_paused() || self.control.is_stopped() {
            return vec![];
        }
        join_all(
            self.config
                .watchlist
                .iter()
                .map(|symbol| self.evaluate_symbol(symbol)),
        )
        .await
    }

    /// Run one loop per symbol until stopped
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            symbols = self.config.watchlist.len(),
            interval_secs = self.config.interval_secs,
            "Automation started"
        );

        let mut tasks = JoinSet::new();
        for symbol in self.config.watchlist.clone() {
            let service = Arc::clone(&self);
            tasks.spawn(async move { service.symbol_loop(symbol).await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Symbol loop aborted");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Automation stopped");
    }

    async fn symbol_loop(&self, symbol: String) {
        let shutdown = self.control.shutdown_token();
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if self.control.is_paused() {
                tracing::debug!(%symbol, "Paused, skipping evaluation");
                continue;
            }
            let outcome = self.evaluate_symbol(&symbol).await;
            tracing::debug!(%symbol, status = ?outcome.status, reason = ?outcome.reason, "Evaluation done");
        }
    }

    /// Fetch a decision for `symbol` and execute it if it clears the bar
    ///
    /// Advisor failures and timeouts count as HOLD. The outcome is recorded
    /// whatever happens.
    pub async fn evaluate_symbol(&self, symbol: &str) -> TradeOutcome {
        self.evaluate_symbol_at(symbol, Utc::now()).await
    }

    /// [`Self::evaluate_symbol`] as of `now`
    ///
    /// Symbols whose market is closed are skipped with `market-closed`
    /// before the advisor is asked.
    pub async fn evaluate_symbol_at(&self, symbol: &str, now: DateTime<Utc>) -> TradeOutcome {
        self.engine.breaker().refresh(now).await;
        let gate = self.gate.read().await.clone();

        let market = Market::detect(symbol);
        if self.config.market_hours && !is_market_open(market, now) {
            tracing::debug!(symbol, %market, "Market closed, skipping evaluation");
            let outcome =
                TradeOutcome::new(&Decision::hold(symbol), gate.mode()).skipped("market-closed");
            self.record(symbol, &outcome).await;
            return outcome;
        }

        let context = DecisionContext {
            as_of: now,
            mode: gate.mode(),
            position: self.engine.position(symbol).await,
        };

        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.advisor_timeout_secs);
        let decision =
            match tokio::time::timeout(timeout, self.advisor.get_decision(symbol, &context)).await {
                Ok(Ok(Some(decision))) => decision,
                Ok(Ok(None)) => Decision::hold(symbol),
                Ok(Err(e)) => {
                    tracing::warn!(symbol, error = %e, "Advisor failed, treating as HOLD");
                    self.count_error().await;
                    Decision::hold(symbol)
                }
                Err(_) => {
                    tracing::warn!(symbol, timeout_secs = timeout.as_secs(), "Advisor timed out, treating as HOLD");
                    self.count_error().await;
                    Decision::hold(symbol)
                }
            };
        record_latency(LatencyMetric::AdvisorCall, started.elapsed());

        let outcome = if decision.action != Action::Hold
            && decision.confidence < self.config.min_confidence
        {
            tracing::debug!(symbol, confidence = %decision.confidence, "Below minimum confidence");
            TradeOutcome::new(&decision, gate.mode()).skipped("low-confidence")
        } else {
            match self.engine.process(&decision, &gate).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(symbol, error = %e, "Execution aborted");
                    self.count_error().await;
                    TradeOutcome::new(&decision, gate.mode()).failed(&e)
                }
            }
        };

        if outcome.is_executed() && gate.mode() == TradingMode::Paper {
            self.gate.write().await.record_paper_trade();
        }
        self.record(symbol, &outcome).await;
        outcome
    }

    /// Most recent outcomes, newest last
    pub async fn recent_outcomes(&self, limit: usize) -> Vec<TradeOutcome> {
        let outcomes = self.outcomes.lock().await;
        let skip = outcomes.len().saturating_sub(limit);
        outcomes.iter().skip(skip).cloned().collect()
    }

    pub async fn status(&self) -> AutomationStatus {
        let gate = self.gate.read().await.clone();
        let counters = self.counters.lock().await;
        AutomationStatus {
            running: self.running.load(Ordering::SeqCst),
            paused: self.control.is_paused(),
            mode: gate.mode(),
            symbols: self.config.watchlist.clone(),
            evaluations: counters.evaluations,
            executions: counters.executions,
            errors: counters.errors,
            completed_paper_trades: gate.completed_paper_trades(),
            last_evaluation: counters.last_evaluation.clone(),
        }
    }

    async fn record(&self, symbol: &str, outcome: &TradeOutcome) {
        if let Err(e) = self.engine.store().record_outcome(outcome).await {
            tracing::error!(symbol, error = %e, "Outcome not persisted");
            self.count_error().await;
        }

        {
            let mut outcomes = self.outcomes.lock().await;
            outcomes.push_back(outcome.clone());
            while outcomes.len() > self.config.outcome_history.max(1) {
                outcomes.pop_front();
            }
        }

        let mut counters = self.counters.lock().await;
        counters.evaluations += 1;
        if outcome.is_executed() {
            counters.executions += 1;
        }
        counters
            .last_evaluation
            .insert(symbol.to_string(), outcome.at);
    }

    async fn count_error(&self) {
        increment_counter(CounterMetric::SymbolErrors);
        self.counters.lock().await.errors += 1;
    }
}
