//! Error taxonomy for the execution engine
//!
//! Denials and zero-size outcomes are ordinary results carried in
//! [`crate::execution::TradeOutcome`]; the variants here are what flows through
//! `Result` when an operation cannot complete.

use crate::risk::DenyReason;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal configuration problem (aborts startup or the submission path)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Trade refused by risk limits
    #[error("risk denied: {0}")]
    RiskDenied(DenyReason),

    /// Not enough capital to size or book the trade
    #[error("insufficient capital: need {required}, have {available}")]
    InsufficientCapital {
        required: Decimal,
        available: Decimal,
    },

    /// Broker failed transiently and retries were exhausted
    #[error("broker unavailable: {0}")]
    BrokerTransient(String),

    /// Broker refused the order; terminal for that order
    #[error("broker rejected order: {0}")]
    BrokerRejection(String),

    /// Position state diverged from the broker and needs reconciling
    #[error("reconciliation required for {symbol}: {reason}")]
    ReconciliationRequired { symbol: String, reason: String },

    /// Trading mode gate refused a transition
    #[error("trading mode gate: {0}")]
    Gate(String),

    /// Global halt or operator stop aborted the evaluation
    #[error("trading halted: {0}")]
    Halted(String),

    /// Durable persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Short machine-readable code used in outcome records and metrics
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration",
            EngineError::RiskDenied(reason) => reason.as_str(),
            EngineError::InsufficientCapital { .. } => "insufficient-capital",
            EngineError::BrokerTransient(_) => "broker-transient",
            EngineError::BrokerRejection(_) => "broker-rejection",
            EngineError::ReconciliationRequired { .. } => "reconciliation-required",
            EngineError::Gate(_) => "mode-gate",
            EngineError::Halted(_) => "halted",
            EngineError::Store(_) => "store",
        }
    }

    /// Whether this error should stop the calling loop rather than just the trade
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Configuration(_))
    }
}

impl From<BrokerError> for EngineError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Rejected(reason) => EngineError::BrokerRejection(reason),
            BrokerError::Aborted { reason, .. } => EngineError::Halted(reason),
            other => EngineError::BrokerTransient(other.to_string()),
        }
    }
}

/// Errors returned by broker adapters
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Network or venue hiccup; safe to retry
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Call did not complete within the configured timeout
    #[error("broker call timed out after {0}ms")]
    Timeout(u64),

    /// Venue refused the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// Order unknown to the broker (already filled, cancelled or never placed)
    #[error("order not found: {0}")]
    NotFound(Uuid),

    /// An order with this client order id was already accepted
    #[error("duplicate client order id {0}")]
    DuplicateOrder(Uuid),

    /// Transient failures persisted past the retry budget
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: String,
        /// An attempt timed out, so the venue may hold the order
        uncertain: bool,
    },

    /// Stop or halt arrived between attempts
    #[error("aborted before retry: {reason}")]
    Aborted { reason: String, uncertain: bool },
}

impl BrokerError {
    /// Whether the retry policy may try again
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_) | BrokerError::Timeout(_))
    }

    /// Whether the venue may have accepted the order despite the error
    pub fn is_uncertain(&self) -> bool {
        match self {
            BrokerError::Timeout(_) => true,
            BrokerError::RetriesExhausted { uncertain, .. }
            | BrokerError::Aborted { uncertain, .. } => *uncertain,
            _ => false,
        }
    }
}

/// Errors returned by store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_transience() {
        assert!(BrokerError::Transient("reset".into()).is_transient());
        assert!(BrokerError::Timeout(500).is_transient());
        assert!(!BrokerError::Rejected("bad symbol".into()).is_transient());
        assert!(!BrokerError::NotFound(Uuid::new_v4()).is_transient());
    }

    #[test]
    fn test_rejection_maps_to_terminal_variant() {
        let err: EngineError = BrokerError::Rejected("halted symbol".into()).into();
        assert!(matches!(err, EngineError::BrokerRejection(_)));
        assert_eq!(err.code(), "broker-rejection");

        let err: EngineError = BrokerError::Timeout(100).into();
        assert!(matches!(err, EngineError::BrokerTransient(_)));

        let err: EngineError = BrokerError::Aborted {
            reason: "stopped".into(),
            uncertain: false,
        }
        .into();
        assert_eq!(err.code(), "halted");
    }

    #[test]
    fn test_timeouts_leave_order_state_uncertain() {
        assert!(BrokerError::Timeout(100).is_uncertain());
        assert!(!BrokerError::Transient("reset".into()).is_uncertain());
        assert!(!BrokerError::DuplicateOrder(Uuid::new_v4()).is_transient());
        let exhausted = BrokerError::RetriesExhausted {
            attempts: 3,
            last: "timed out".into(),
            uncertain: true,
        };
        assert!(exhausted.is_uncertain());
    }

    #[test]
    fn test_risk_denied_code_is_reason() {
        let err = EngineError::RiskDenied(DenyReason::PositionSize);
        assert_eq!(err.code(), "position-size");
        assert!(!err.is_fatal());
        assert!(EngineError::Configuration("x".into()).is_fatal());
    }
}
