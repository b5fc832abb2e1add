//! In-memory store

use super::{Claim, PersistedState, StateDelta, Store, SubmissionRecord};
use crate::error::StoreError;
use crate::execution::{Order, TradeOutcome};
use crate::portfolio::TradeStats;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Volatile store for paper sessions and tests
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    failing_writes: AtomicU32,
    stats_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with previously persisted state
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Fail the next `count` writes
    pub fn fail_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Answer trade statistics reads only after `delay`
    pub fn delay_stats(&self, delay: Duration) {
        self.stats_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_submission(
        &self,
        decision_id: Uuid,
        order: &Order,
    ) -> Result<Claim, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.submissions.get(&decision_id) {
            return Ok(Claim::Existing(existing.clone()));
        }
        self.check_write()?;
        Ok(state.claim(decision_id, order))
    }

    async fn find_submission(
        &self,
        decision_id: Uuid,
    ) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(self.state.lock().await.submissions.get(&decision_id).cloned())
    }

    async fn apply(&self, delta: &StateDelta) -> Result<(), StoreError> {
        self.check_write()?;
        self.state.lock().await.apply(delta);
        Ok(())
    }

    async fn record_outcome(&self, outcome: &TradeOutcome) -> Result<(), StoreError> {
        self.check_write()?;
        self.state.lock().await.push_outcome(outcome);
        Ok(())
    }

    async fn trade_stats(&self, lookback: usize) -> Result<TradeStats, StoreError> {
        let delay = self.stats_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.state.lock().await.trade_stats(lookback))
    }

    async fn completed_paper_trades(&self) -> Result<u32, StoreError> {
        Ok(self.state.lock().await.paper_trades)
    }

    async fn load_state(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Action, Decision};
    use crate::execution::{BrokerKind, OrderRole, OutcomeStatus, Side, TradingMode};
    use crate::market::Market;
    use crate::portfolio::{ClosedPosition, Position, CLOSED_HISTORY};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::market(
            "AAPL",
            Market::Nasdaq,
            Side::Buy,
            dec!(13),
            OrderRole::Entry,
            BrokerKind::Simulated,
        )
    }

    #[tokio::test]
    async fn test_submission_claimed_once() {
        let store = MemoryStore::new();
        let decision_id = Uuid::new_v4();

        let first = store
            .get_or_create_submission(decision_id, &order())
            .await
            .unwrap();
        assert!(first.is_created());

        let second = store
            .get_or_create_submission(decision_id, &order())
            .await
            .unwrap();
        assert!(!second.is_created());
        assert_eq!(second.record().order_id, first.record().order_id);

        let state = store.load_state().await.unwrap();
        assert_eq!(state.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_state_untouched() {
        let store = MemoryStore::new();
        store.fail_writes(1);
        let decision_id = Uuid::new_v4();
        assert!(store
            .get_or_create_submission(decision_id, &order())
            .await
            .is_err());
        assert!(store.find_submission(decision_id).await.unwrap().is_none());

        // Only one failure was injected
        assert!(store
            .get_or_create_submission(decision_id, &order())
            .await
            .unwrap()
            .is_created());
    }

    #[tokio::test]
    async fn test_closed_history_is_capped() {
        let store = MemoryStore::new();
        let closed = |pnl: Decimal| ClosedPosition {
            position: Position::new("AAPL", Market::Nasdaq, dec!(1), dec!(100), Utc::now()),
            exit_price: dec!(101),
            closed_at: Utc::now(),
            realized_pnl: pnl,
            fees: dec!(0),
        };
        for i in 0..(CLOSED_HISTORY + 10) {
            let delta = StateDelta {
                closed: vec![closed(Decimal::from(i))],
                ..StateDelta::default()
            };
            store.apply(&delta).await.unwrap();
        }

        let state = store.load_state().await.unwrap();
        assert_eq!(state.closed.len(), CLOSED_HISTORY);
        assert_eq!(state.closed[0].realized_pnl, dec!(10));
        assert_eq!(store.trade_stats(50).await.unwrap().trades, 50);
    }

    #[tokio::test]
    async fn test_paper_trades_counted_from_outcomes() {
        let store = MemoryStore::new();
        let decision = Decision::new("AAPL", Action::Buy, dec!(0.8));

        let executed = TradeOutcome::new(&decision, TradingMode::Paper)
            .with_status(OutcomeStatus::Executed);
        let skipped = TradeOutcome::new(&decision, TradingMode::Paper)
            .skipped("low-confidence");
        store.record_outcome(&executed).await.unwrap();
        store.record_outcome(&skipped).await.unwrap();

        assert_eq!(store.completed_paper_trades().await.unwrap(), 1);
        assert_eq!(store.load_state().await.unwrap().outcomes.len(), 2);
    }
}
