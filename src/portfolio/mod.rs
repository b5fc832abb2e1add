//! Portfolio module
//!
//! Account capital, open positions and closed-trade history

mod account;
mod ledger;
mod position;

pub use account::Account;
pub use ledger::{FillEffect, Ledger};
pub use position::{ClosedPosition, Position, PositionBook, TradeStats, CLOSED_HISTORY};

pub(crate) use position::trim_closed;
