//! Structured per-attempt trade outcomes

use super::{OrderId, OrderStatus, TradingMode};
use crate::decision::{Action, Decision};
use crate::error::EngineError;
use crate::risk::{DenyReason, RiskVerdict};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Furthest pipeline stage an attempt reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Proposed,
    Sized,
    RiskChecked,
    Submitted,
    Filled,
    Rejected,
    Cancelled,
}

/// Overall result of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Nothing to do (HOLD, low confidence, zero size, ...)
    Skipped,
    /// Refused by risk limits
    Denied,
    /// Filled and durably recorded
    Executed,
    /// Fill not confirmed within the timeout, or the submission timed out
    /// and the venue may still hold the order
    ///
    /// A timeout is reported here rather than as `Failed`: the order stays
    /// working and a late fill is still booked, so a failed outcome would
    /// contradict the ledger.
    Pending,
    /// Broker, store or configuration failure
    Failed,
    /// Decision already had a submission record
    Duplicate,
}

/// Audit record for one decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub decision_id: Uuid,
    pub symbol: String,
    pub action: Action,
    pub confidence: Decimal,
    pub mode: TradingMode,
    pub stage: Stage,
    pub status: OutcomeStatus,
    pub risk: Option<RiskVerdict>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub order_id: Option<OrderId>,
    pub order_status: Option<OrderStatus>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl TradeOutcome {
    pub fn new(decision: &Decision, mode: TradingMode) -> Self {
        Self {
            decision_id: decision.id,
            symbol: decision.symbol.clone(),
            action: decision.action,
            confidence: decision.confidence,
            mode,
            stage: Stage::Proposed,
            status: OutcomeStatus::Skipped,
            risk: None,
            quantity: None,
            price: None,
            order_id: None,
            order_status: None,
            reason: None,
            at: Utc::now(),
        }
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = OutcomeStatus::Skipped;
        self.reason = Some(reason.into());
        self
    }

    pub fn denied(mut self, reason: DenyReason) -> Self {
        self.stage = Stage::RiskChecked;
        self.status = OutcomeStatus::Denied;
        self.risk = Some(RiskVerdict::Deny(reason));
        self.reason = Some(reason.as_str().to_string());
        self
    }

    pub fn failed(mut self, error: &EngineError) -> Self {
        self.status = OutcomeStatus::Failed;
        self.reason = Some(format!("{}: {}", error.code(), error));
        self
    }

    pub fn with_status(mut self, status: OutcomeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_order(mut self, order_id: OrderId, status: OrderStatus) -> Self {
        self.order_id = Some(order_id);
        self.order_status = Some(status);
        self
    }

    pub fn is_executed(&self) -> bool {
        self.status == OutcomeStatus::Executed
    }
}
