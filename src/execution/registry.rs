//! Broker routing

use super::{Broker, BrokerKind, TradingMode};
use crate::error::EngineError;
use crate::market::Market;
use std::collections::HashMap;
use std::sync::Arc;

struct Registered {
    broker: Arc<dyn Broker>,
    live_approved: bool,
}

/// Registered brokers and the market routes between them
///
/// Paper mode routes every market to the simulated broker. Live mode needs the
/// routed broker to be registered and live-approved; anything else is a
/// configuration error.
#[derive(Default)]
pub struct BrokerRegistry {
    brokers: HashMap<BrokerKind, Registered>,
    routes: HashMap<Market, BrokerKind>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a broker; live approval is ignored for the simulated broker
    pub fn register(&mut self, broker: Arc<dyn Broker>, live_approved: bool) {
        let kind = broker.kind();
        let live_approved = live_approved && kind != BrokerKind::Simulated;
        self.brokers.insert(
            kind,
            Registered {
                broker,
                live_approved,
            },
        );
    }

    /// Route a market to a broker other than its default
    pub fn route(&mut self, market: Market, kind: BrokerKind) {
        self.routes.insert(market, kind);
    }

    /// Broker configured for a market, before paper substitution
    pub fn route_for(&self, market: Market) -> BrokerKind {
        self.routes
            .get(&market)
            .copied()
            .unwrap_or_else(|| market.default_broker())
    }

    /// Broker to submit to for a market in the given mode
    pub fn resolve(&self, market: Market, mode: TradingMode) -> Result<Arc<dyn Broker>, EngineError> {
        let routed = self.route_for(market);
        match mode {
            TradingMode::Paper => {
                let simulated = self.brokers.get(&BrokerKind::Simulated).ok_or_else(|| {
                    EngineError::Configuration("paper mode requires the simulated broker".into())
                })?;
                if routed != BrokerKind::Simulated {
                    tracing::debug!(%market, broker = %routed, "Paper mode: routing to simulated broker");
                }
                Ok(Arc::clone(&simulated.broker))
            }
            TradingMode::Live => match self.brokers.get(&routed) {
                Some(entry) if entry.live_approved => Ok(Arc::clone(&entry.broker)),
                Some(_) => Err(EngineError::Configuration(format!(
                    "{routed} broker for {market} is not live-approved"
                ))),
                None => Err(EngineError::Configuration(format!(
                    "no {routed} broker registered for {market}"
                ))),
            },
        }
    }

    /// Look up a broker by kind
    pub fn get(&self, kind: BrokerKind) -> Option<Arc<dyn Broker>> {
        self.brokers.get(&kind).map(|entry| Arc::clone(&entry.broker))
    }

    /// Every registered broker
    pub fn all(&self) -> Vec<Arc<dyn Broker>> {
        self.brokers
            .values()
            .map(|entry| Arc::clone(&entry.broker))
            .collect()
    }
}
