//! Durable state
//!
//! The engine writes every account, position, order and bracket change
//! through a [`Store`] before reporting a trade as complete. Submission
//! records keyed by decision id make retries after a crash idempotent.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::bracket::BracketGroup;
use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::execution::{Order, OrderId, OutcomeStatus, TradeOutcome, TradingMode};
use crate::portfolio::{trim_closed, Account, ClosedPosition, Position, TradeStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Audit records kept per store
const MAX_OUTCOMES: usize = 5000;

/// Proof that a decision was handed to a broker (or is about to be)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub decision_id: Uuid,
    pub order_id: OrderId,
    pub symbol: String,
    pub created_at: DateTime<Utc>,
}

/// Result of [`Store::get_or_create_submission`]
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// This caller created the record and may submit
    Created(SubmissionRecord),
    /// A record already existed; the decision was handled before
    Existing(SubmissionRecord),
}

impl Claim {
    pub fn is_created(&self) -> bool {
        matches!(self, Claim::Created(_))
    }

    pub fn record(&self) -> &SubmissionRecord {
        match self {
            Claim::Created(r) | Claim::Existing(r) => r,
        }
    }
}

/// One atomic batch of state changes
#[derive(Debug, Clone, Default)]
pub struct StateDelta {
    pub account: Option<Account>,
    pub positions: Vec<Position>,
    pub removed_positions: Vec<String>,
    pub closed: Vec<ClosedPosition>,
    pub orders: Vec<Order>,
    pub brackets: Vec<BracketGroup>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.account.is_none()
            && self.positions.is_empty()
            && self.removed_positions.is_empty()
            && self.closed.is_empty()
            && self.orders.is_empty()
            && self.brackets.is_empty()
    }
}

/// Everything a store holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub account: Option<Account>,
    pub positions: HashMap<String, Position>,
    pub closed: Vec<ClosedPosition>,
    pub orders: HashMap<OrderId, Order>,
    pub brackets: HashMap<String, BracketGroup>,
    pub submissions: HashMap<Uuid, SubmissionRecord>,
    pub outcomes: VecDeque<TradeOutcome>,
    /// Executed paper-mode trades, counted toward live eligibility
    pub paper_trades: u32,
}

impl PersistedState {
    fn claim(&mut self, decision_id: Uuid, order: &Order) -> Claim {
        if let Some(existing) = self.submissions.get(&decision_id) {
            return Claim::Existing(existing.clone());
        }
        let record = SubmissionRecord {
            decision_id,
            order_id: order.id,
            symbol: order.symbol.clone(),
            created_at: Utc::now(),
        };
        self.submissions.insert(decision_id, record.clone());
        self.orders.insert(order.id, order.clone());
        Claim::Created(record)
    }

    fn apply(&mut self, delta: &StateDelta) {
        if let Some(account) = &delta.account {
            self.account = Some(account.clone());
        }
        for symbol in &delta.removed_positions {
            self.positions.remove(symbol);
        }
        for position in &delta.positions {
            self.positions
                .insert(position.symbol.clone(), position.clone());
        }
        self.closed.extend(delta.closed.iter().cloned());
        trim_closed(&mut self.closed);
        for order in &delta.orders {
            self.orders.insert(order.id, order.clone());
        }
        for group in &delta.brackets {
            self.brackets.insert(group.symbol.clone(), group.clone());
        }
    }

    fn push_outcome(&mut self, outcome: &TradeOutcome) {
        if outcome.status == OutcomeStatus::Executed && outcome.mode == TradingMode::Paper {
            self.paper_trades += 1;
        }
        self.outcomes.push_back(outcome.clone());
        while self.outcomes.len() > MAX_OUTCOMES {
            self.outcomes.pop_front();
        }
    }

    /// Closed positions in close order
    fn trade_stats(&self, lookback: usize) -> TradeStats {
        TradeStats::from_closed(&self.closed, lookback)
    }
}

/// Trait for persistence backends
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically look up or create the submission record for a decision
    async fn get_or_create_submission(
        &self,
        decision_id: Uuid,
        order: &Order,
    ) -> Result<Claim, StoreError>;

    async fn find_submission(&self, decision_id: Uuid)
        -> Result<Option<SubmissionRecord>, StoreError>;

    /// Durably apply a batch of changes; all or nothing
    async fn apply(&self, delta: &StateDelta) -> Result<(), StoreError>;

    async fn record_outcome(&self, outcome: &TradeOutcome) -> Result<(), StoreError>;

    /// Win rate and payoff over the most recent `lookback` closed positions
    async fn trade_stats(&self, lookback: usize) -> Result<TradeStats, StoreError>;

    async fn completed_paper_trades(&self) -> Result<u32, StoreError>;

    async fn load_state(&self) -> Result<PersistedState, StoreError>;

    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        self.apply(&StateDelta {
            orders: vec![order.clone()],
            ..Default::default()
        })
        .await
    }

    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        self.apply(&StateDelta {
            account: Some(account.clone()),
            ..Default::default()
        })
        .await
    }

    async fn save_bracket(&self, group: &BracketGroup) -> Result<(), StoreError> {
        self.apply(&StateDelta {
            brackets: vec![group.clone()],
            ..Default::default()
        })
        .await
    }
}

/// Open the configured backend
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => Ok(Arc::new(JsonFileStore::open(&config.path).await?)),
    }
}
