//! Circuit breaker state machine

use super::{BreakerState, Trip};
use crate::config::BreakerConfig;
use crate::feed::PriceTick;
use crate::telemetry::{increment_counter, set_gauge, CounterMetric, GaugeMetric};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::{watch, Mutex};

/// An abnormal reading and when it was last observed
#[derive(Debug, Clone)]
struct Reading {
    reason: String,
    at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    /// Rolling price window per symbol, stamped on arrival
    windows: HashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
    /// Currently abnormal sources
    trips: BTreeMap<Trip, Reading>,
    /// Last time any abnormality was observed
    last_abnormal: Option<DateTime<Utc>>,
    /// Operator halt; sticky until resumed
    manual: Option<String>,
}

/// Global halt driven by abnormal market readings
///
/// `Normal -> Halted` on the first abnormal reading or an operator halt.
/// `Halted -> Normal` only once every abnormality has cleared and the
/// cool-down has elapsed since the last abnormal reading.
///
/// All timing runs on the caller's wall clock: ticks are stamped when they
/// arrive, not with their feed timestamp. A symbol that goes quiet has its
/// window aged out by [`CircuitBreaker::refresh`], and spread or volatility
/// readings older than one window no longer count.
pub struct CircuitBreaker {
    config: BreakerConfig,
    window: Duration,
    cooldown: Duration,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let window = Duration::seconds(config.move_window_secs as i64);
        let cooldown = Duration::seconds(config.cooldown_secs as i64);
        let (state_tx, _) = watch::channel(BreakerState::Normal);
        Self {
            config,
            window,
            cooldown,
            inner: Mutex::new(Inner::default()),
            state_tx,
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.state_tx.borrow().clone()
    }

    pub fn is_halted(&self) -> bool {
        self.state_tx.borrow().is_halted()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<BreakerState> {
        self.state_tx.subscribe()
    }

    /// Feed one tick through the abnormality checks
    pub async fn on_tick(&self, tick: &PriceTick) -> BreakerState {
        self.on_tick_at(tick, Utc::now()).await
    }

    /// Feed one tick that arrived at `now`
    pub async fn on_tick_at(&self, tick: &PriceTick, now: DateTime<Utc>) -> BreakerState {
        let mut inner = self.inner.lock().await;
        if self.config.enabled {
            self.expire(&mut inner, now);
            self.evaluate(&mut inner, tick, now);
        }
        self.settle(&mut inner, now)
    }

    /// Age out stale readings and re-check the cool-down without a new tick
    pub async fn refresh(&self, now: DateTime<Utc>) -> BreakerState {
        let mut inner = self.inner.lock().await;
        self.expire(&mut inner, now);
        self.settle(&mut inner, now)
    }

    /// Operator halt
    pub async fn halt(&self, reason: impl Into<String>, now: DateTime<Utc>) -> BreakerState {
        let mut inner = self.inner.lock().await;
        inner.manual = Some(reason.into());
        self.settle(&mut inner, now)
    }

    /// Lift an operator halt
    ///
    /// Skips the cool-down but stays halted while any market abnormality is
    /// still active.
    pub async fn resume(&self, now: DateTime<Utc>) -> BreakerState {
        let mut inner = self.inner.lock().await;
        inner.manual = None;
        self.expire(&mut inner, now);
        if inner.trips.is_empty() {
            inner.last_abnormal = None;
        }
        self.settle(&mut inner, now)
    }

    /// Abnormal sources currently active
    pub async fn active_trips(&self) -> Vec<Trip> {
        self.inner.lock().await.trips.keys().cloned().collect()
    }

    fn evaluate(&self, inner: &mut Inner, tick: &PriceTick, now: DateTime<Utc>) {
        if tick.symbol == self.config.volatility_symbol {
            let trip = (tick.price > self.config.volatility_threshold).then(|| {
                format!(
                    "volatility index {} above {}",
                    tick.price, self.config.volatility_threshold
                )
            });
            set_trip(inner, Trip::Volatility, trip, now);
            return;
        }

        let window = inner.windows.entry(tick.symbol.clone()).or_default();
        window.push_back((now, tick.price));
        prune(window, now - self.window);
        let move_trip = self.move_reason(&tick.symbol, window);
        set_trip(inner, Trip::Move(tick.symbol.clone()), move_trip, now);

        let spread_trip = tick
            .spread_pct()
            .filter(|spread| *spread > self.config.max_spread_pct)
            .map(|spread| {
                format!(
                    "{} spread {}% above limit",
                    tick.symbol,
                    (spread * Decimal::ONE_HUNDRED).round_dp(2)
                )
            });
        set_trip(inner, Trip::Spread(tick.symbol.clone()), spread_trip, now);
    }

    /// Drop window entries and readings older than one window
    fn expire(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        for window in inner.windows.values_mut() {
            prune(window, cutoff);
        }
        inner.windows.retain(|_, window| !window.is_empty());

        let windows = &inner.windows;
        inner.trips.retain(|trip, reading| match trip {
            Trip::Move(symbol) => windows
                .get(symbol)
                .and_then(|window| self.move_reason(symbol, window))
                .is_some(),
            Trip::Spread(_) | Trip::Volatility => reading.at >= cutoff,
        });
    }

    /// High/low range over the window when it exceeds the limit
    fn move_reason(
        &self,
        symbol: &str,
        window: &VecDeque<(DateTime<Utc>, Decimal)>,
    ) -> Option<String> {
        let low = window.iter().map(|(_, p)| *p).min()?;
        let high = window.iter().map(|(_, p)| *p).max()?;
        if low <= Decimal::ZERO {
            return None;
        }
        let move_pct = (high - low) / low;
        (move_pct > self.config.max_move_pct).then(|| {
            format!(
                "{} moved {}% within {}s",
                symbol,
                (move_pct * Decimal::ONE_HUNDRED).round_dp(2),
                self.config.move_window_secs
            )
        })
    }

    fn settle(&self, inner: &mut Inner, now: DateTime<Utc>) -> BreakerState {
        let current = self.state();

        let active_reason = inner
            .manual
            .as_ref()
            .map(|reason| format!("operator: {reason}"))
            .or_else(|| inner.trips.values().next().map(|r| r.reason.clone()));

        if let Some(reason) = active_reason {
            if inner.manual.is_none() {
                inner.last_abnormal = Some(now);
            }
            if !current.is_halted() {
                tracing::warn!(%reason, "Circuit breaker tripped");
                increment_counter(CounterMetric::BreakerTrips);
                set_gauge(GaugeMetric::BreakerHalted, 1.0);
                let halted = BreakerState::Halted { reason, since: now };
                self.state_tx.send_replace(halted.clone());
                return halted;
            }
            return current;
        }

        if current.is_halted() {
            let cooled = inner
                .last_abnormal
                .map_or(true, |last| now - last >= self.cooldown);
            if cooled {
                tracing::info!("Circuit breaker cleared");
                set_gauge(GaugeMetric::BreakerHalted, 0.0);
                self.state_tx.send_replace(BreakerState::Normal);
                return BreakerState::Normal;
            }
        }
        current
    }
}

fn prune(window: &mut VecDeque<(DateTime<Utc>, Decimal)>, cutoff: DateTime<Utc>) {
    while let Some((ts, _)) = window.front() {
        if *ts < cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn set_trip(inner: &mut Inner, trip: Trip, reason: Option<String>, at: DateTime<Utc>) {
    match reason {
        Some(reason) => {
            inner.trips.insert(trip, Reading { reason, at });
        }
        None => {
            inner.trips.remove(&trip);
        }
    }
}
