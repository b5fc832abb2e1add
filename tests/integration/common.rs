//! Shared fixtures

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tradegate::cli::Runtime;
use tradegate::config::Config;
use tradegate::feed::PriceTick;
use tradegate::store::{MemoryStore, Store};

/// Paper config with no fees and short retry delays
pub fn paper_config() -> Config {
    let mut config = Config::default();
    config.simulated.initial_cash = dec!(100000);
    config.simulated.fee_rate = dec!(0);
    config.execution.retry_initial_delay_ms = 1;
    config.execution.retry_max_delay_ms = 2;
    config.execution.fill_timeout_ms = 2_000;
    config.automation.advisor_timeout_secs = 2;
    config.automation.min_confidence = dec!(0.5);
    // Tests run at any hour
    config.automation.market_hours = false;
    config
}

pub async fn runtime(config: &Config) -> Runtime {
    runtime_with_store(config, Arc::new(MemoryStore::new())).await
}

pub async fn runtime_with_store(config: &Config, store: Arc<dyn Store>) -> Runtime {
    Runtime::with_store(config, store).await.unwrap()
}

/// Feed one tick to the simulated venue and the engine
pub async fn tick(runtime: &Runtime, symbol: &str, price: Decimal) {
    let tick = PriceTick::new(symbol, price, Utc::now());
    runtime.broker.on_tick(&tick).await;
    runtime.engine.on_tick(&tick).await;
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
