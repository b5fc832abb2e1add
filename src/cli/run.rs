//! Run command implementation

use crate::automation::AutomationService;
use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::decision::{Advisor, ReplayAdvisor};
use crate::execution::{
    Broker, BrokerKind, BrokerRegistry, SimulatedBroker, TradeExecutionService, TradingMode,
    TradingModeGate,
};
use crate::feed::{PriceFeed, ReplayFeed};
use crate::market::Market;
use crate::store::{open_store, Store};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON array of advisor decisions to replay
    #[arg(long)]
    pub decisions: PathBuf,

    /// JSON array of price ticks to replay
    #[arg(long)]
    pub ticks: Option<PathBuf>,

    /// Milliseconds between replayed ticks
    #[arg(long)]
    pub tick_pacing_ms: Option<u64>,

    /// Evaluate the watchlist once after replaying all ticks, then exit
    #[arg(long)]
    pub once: bool,

    /// Override the configured watchlist
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

impl RunArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if !self.symbols.is_empty() {
            config.automation.watchlist = self.symbols.iter().map(|s| s.to_uppercase()).collect();
        }
        if config.automation.watchlist.is_empty() {
            anyhow::bail!("watchlist is empty: set automation.watchlist or pass --symbols");
        }

        let runtime = Runtime::build(&config).await?;
        let advisor: Arc<dyn Advisor> = Arc::new(ReplayAdvisor::from_file(&self.decisions).await?);
        let automation = Arc::new(AutomationService::new(
            config.automation.clone(),
            advisor,
            runtime.engine.clone(),
            runtime.gate.clone(),
        ));
        let control = automation.control();

        let feed = match &self.ticks {
            Some(path) => {
                let mut feed = ReplayFeed::from_file(path).await?;
                if let Some(ms) = self.tick_pacing_ms {
                    feed = feed.with_pacing(Duration::from_millis(ms));
                }
                tracing::info!(ticks = feed.len(), "Replaying price ticks");
                Some(runtime.spawn_feed(feed).await?)
            }
            None => None,
        };

        if self.once {
            if let Some(feed) = feed {
                feed.await?;
            }
            let outcomes = automation.run_once().await;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        } else {
            let loops = tokio::spawn(automation.clone().run());
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, stopping");
                }
                result = async {
                    match feed {
                        Some(feed) => feed.await,
                        None => std::future::pending().await,
                    }
                } => {
                    result?;
                    tracing::info!("Tick replay finished, stopping");
                }
            }
            control.stop();
            loops.await?;
        }

        let status = automation.status().await;
        tracing::info!(
            evaluations = status.evaluations,
            executions = status.executions,
            errors = status.errors,
            paper_trades = status.completed_paper_trades,
            "Run finished"
        );
        let snapshot = runtime.engine.snapshot().await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);

        runtime.shutdown().await;
        Ok(())
    }
}

/// Assembled engine with the simulated venue and a running fill router
pub struct Runtime {
    pub broker: Arc<SimulatedBroker>,
    pub engine: Arc<TradeExecutionService>,
    pub store: Arc<dyn Store>,
    pub gate: TradingModeGate,
    router: JoinHandle<()>,
}

impl Runtime {
    /// Wire the engine from configuration and restore persisted state
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let store = open_store(&config.store).await?;
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let broker = Arc::new(SimulatedBroker::new(
            config.simulated.initial_cash,
            config.simulated.fee_rate,
        ));

        let mut registry = BrokerRegistry::new();
        registry.register(broker.clone(), false);
        for entry in &config.brokers {
            for market in &entry.markets {
                registry.route(*market, entry.kind);
            }
            if entry.kind != BrokerKind::Simulated {
                tracing::warn!(broker = %entry.kind, "No adapter compiled in; only paper routing is available");
            }
        }

        let persisted = store.load_state().await?;
        let account = match persisted.account {
            Some(account) => account,
            None => {
                let mut account = broker.get_account_state().await?;
                account.mode = config.execution.mode;
                account
            }
        };

        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        let engine = Arc::new(TradeExecutionService::new(
            config,
            registry,
            breaker,
            store.clone(),
            account,
        ));
        if engine.restore().await? {
            tracing::info!("Restored persisted engine state");
        }

        let gate =
            TradingModeGate::from_config(&config.execution, store.completed_paper_trades().await?)?;
        if gate.mode() == TradingMode::Live {
            for symbol in &config.automation.watchlist {
                engine
                    .registry()
                    .resolve(Market::detect(symbol), TradingMode::Live)?;
            }
        }

        let router = engine.spawn_fill_router(broker.clone());
        Ok(Self {
            broker,
            engine,
            store,
            gate,
            router,
        })
    }

    /// Forward every tick to the simulated venue and the engine
    pub async fn spawn_feed(&self, feed: impl PriceFeed) -> anyhow::Result<JoinHandle<()>> {
        let mut rx = feed.subscribe().await?;
        let broker = self.broker.clone();
        let engine = self.engine.clone();
        Ok(tokio::spawn(async move {
            while let Some(tick) = rx.recv().await {
                broker.on_tick(&tick).await;
                engine.on_tick(&tick).await;
            }
        }))
    }

    /// Cancel the engine's token and wait for the fill router to exit
    pub async fn shutdown(self) {
        self.engine.shutdown_token().cancel();
        if let Err(e) = self.router.await {
            tracing::warn!(error = %e, "Fill router ended abnormally");
        }
    }
}
