//! Bracket order management
//!
//! Stop-loss and take-profit legs for filled entries, trailing stop
//! ratchets, and one-cancels-other handling when a leg executes.

mod manager;
mod types;

pub use manager::BracketOrderManager;
pub use types::{BracketGroup, BracketStats, BracketStatus, Leg, LegFill};
