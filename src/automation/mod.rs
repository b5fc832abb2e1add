//! Automation module
//!
//! Outer control loop: one independent schedule per watchlist symbol that
//! asks the advisor for a decision and hands it to the execution engine.

mod control;
mod service;

pub use control::ControlHandle;
pub use service::{AutomationService, AutomationStatus};
