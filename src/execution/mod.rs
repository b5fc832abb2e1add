//! Execution module
//!
//! Uniform broker interface, order lifecycle and the trade execution
//! pipeline that turns decisions into risk-checked orders.

mod gate;
mod outcome;
mod paper;
mod registry;
mod retry;
mod service;
mod types;

pub use gate::TradingModeGate;
pub use outcome::{OutcomeStatus, Stage, TradeOutcome};
pub use paper::SimulatedBroker;
pub use registry::BrokerRegistry;
pub use retry::{AbortSignal, RetryPolicy};
pub use service::{EngineSnapshot, ExecutionSettings, TradeExecutionService};
pub use types::{
    BrokerKind, FillEvent, Order, OrderAck, OrderId, OrderRole, OrderStatus, OrderType, Side,
    TradingMode,
};

use crate::error::BrokerError;
use crate::portfolio::Account;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Trait for broker implementations
#[async_trait]
pub trait Broker: Send + Sync {
    /// Which venue this is
    fn kind(&self) -> BrokerKind;
    /// Submit an order; the order id doubles as the client order id
    async fn submit_order(&self, order: &Order) -> Result<OrderAck, BrokerError>;
    /// Cancel a resting order
    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError>;
    /// Balances as the venue sees them
    async fn get_account_state(&self) -> Result<Account, BrokerError>;
    /// Stream of executions; each call starts a fresh subscription
    async fn stream_fills(&self) -> Result<BoxStream<'static, FillEvent>, BrokerError>;
}
