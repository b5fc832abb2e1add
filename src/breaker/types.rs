//! Circuit breaker types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Global trading state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum BreakerState {
    #[default]
    Normal,
    Halted {
        reason: String,
        since: DateTime<Utc>,
    },
}

impl BreakerState {
    pub fn is_halted(&self) -> bool {
        matches!(self, BreakerState::Halted { .. })
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Normal => f.write_str("normal"),
            BreakerState::Halted { reason, .. } => write!(f, "halted: {reason}"),
        }
    }
}

/// Source of an abnormal reading
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trip {
    /// Volatility index above its ceiling
    Volatility,
    /// Windowed price move on a symbol
    Move(String),
    /// Bid-ask spread on a symbol
    Spread(String),
}
