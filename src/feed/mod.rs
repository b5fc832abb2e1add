//! Price feed module
//!
//! Price ticks drive trailing stops, resting bracket legs in the simulated
//! broker and the circuit breaker

mod replay;
mod types;

pub use replay::ReplayFeed;
pub use types::PriceTick;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for price feed implementations
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Subscribe to price updates
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<PriceTick>>;
}
