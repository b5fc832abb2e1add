//! Advisory decision module
//!
//! Decisions come from an external advisory process. The engine treats them
//! as opaque signals carrying an action and a confidence.

mod replay;

pub use replay::ReplayAdvisor;

use crate::execution::TradingMode;
use crate::portfolio::Position;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Advisory action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision produced by the advisory collaborator
///
/// Immutable and consumed once; `id` is the idempotence key for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Symbol the decision is about
    pub symbol: String,
    /// Proposed action
    pub action: Action,
    /// Confidence in [0, 1]
    pub confidence: Decimal,
    /// When the advisor proposed it
    #[serde(default = "Utc::now")]
    pub proposed_at: DateTime<Utc>,
}

impl Decision {
    /// Create a new decision
    pub fn new(symbol: impl Into<String>, action: Action, confidence: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            action,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            proposed_at: Utc::now(),
        }
    }

    /// Decision standing in for a missing or failed advisory call
    pub fn hold(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Action::Hold, Decimal::ZERO)
    }
}

/// Context handed to the advisor alongside the symbol
#[derive(Debug, Clone)]
pub struct DecisionContext {
    /// Evaluation time
    pub as_of: DateTime<Utc>,
    /// Current trading mode
    pub mode: TradingMode,
    /// Open position in the symbol, if any
    pub position: Option<Position>,
}

/// Trait for advisory collaborators
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Latest decision for a symbol; `None` means no opinion (treated as HOLD)
    async fn get_decision(
        &self,
        symbol: &str,
        context: &DecisionContext,
    ) -> anyhow::Result<Option<Decision>>;
}
