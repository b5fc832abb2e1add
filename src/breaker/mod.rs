//! Circuit breaker module
//!
//! Watches price ticks for abnormal conditions and holds a global halt until
//! they clear and a cool-down elapses

mod monitor;
mod types;

pub use monitor::CircuitBreaker;
pub use types::{BreakerState, Trip};
