//! Risk management module
//!
//! Pre-trade limits, position sizing and Kelly estimation

mod kelly;
mod limits;
mod sizing;
mod types;

pub use kelly::KellyCalculator;
pub use limits::{RiskLimits, RiskProfile};
pub use sizing::{
    create_sizer, FixedSizer, KellySizer, PercentageSizer, PositionSizer, RiskBasedSizer,
    SizingRequest,
};
pub use types::{DenyReason, MarketSnapshot, RiskSummary, RiskVerdict, TradeProposal};
