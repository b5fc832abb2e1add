//! Risk limits and circuit breaker through the engine

use crate::common::{paper_config, runtime, runtime_with_store, tick};
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tradegate::config::{Config, SizingMethod};
use tradegate::decision::{Action, Decision};
use tradegate::execution::{OutcomeStatus, TradingMode};
use tradegate::market::Market;
use tradegate::portfolio::{Account, Ledger, PositionBook};
use tradegate::risk::{DenyReason, RiskVerdict};
use tradegate::store::{MemoryStore, PersistedState};

fn fixed_size_config() -> Config {
    let mut config = paper_config();
    config.bracket.enabled = false;
    config.sizing.method = SizingMethod::Fixed;
    config.sizing.fixed_amount = dec!(6000);
    config
}

#[tokio::test]
async fn test_portfolio_risk_caps_new_entries() {
    let config = fixed_size_config();
    let rt = runtime(&config).await;

    for symbol in ["AAPL", "MSFT", "GOOGL"] {
        tick(&rt, symbol, dec!(100)).await;
        let outcome = rt
            .engine
            .process(&Decision::new(symbol, Action::Buy, dec!(0.8)), &rt.gate)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Executed, "{symbol}");
        assert_eq!(outcome.quantity, Some(dec!(60)));
    }

    // 18k already at risk; another 6k breaches the 20% portfolio limit
    tick(&rt, "AMZN", dec!(100)).await;
    let outcome = rt
        .engine
        .process(&Decision::new("AMZN", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Denied);
    assert_eq!(outcome.risk, Some(RiskVerdict::Deny(DenyReason::PortfolioRisk)));
    assert_eq!(outcome.reason.as_deref(), Some("portfolio-risk"));
    assert_eq!(rt.broker.accepted_orders().await.len(), 3);

    let snapshot = rt.engine.snapshot().await;
    assert_eq!(snapshot.risk.open_positions, 3);
    assert_eq!(snapshot.risk.total_exposure, dec!(18000));
}

#[tokio::test]
async fn test_restored_book_over_portfolio_cap_denies_entry() {
    let mut ledger = Ledger::new(
        Account::new(dec!(100000), TradingMode::Paper),
        PositionBook::new(),
    );
    for (symbol, market, qty, price) in [
        ("AAPL", Market::Nasdaq, dec!(40), dec!(150)),
        ("JPM", Market::Nyse, dec!(30), dec!(200)),
        ("BTC-USD", Market::Crypto, dec!(0.1), dec!(60000)),
    ] {
        ledger
            .apply_fill(symbol, market, qty, price, dec!(0), Utc::now())
            .unwrap();
    }
    let state = PersistedState {
        account: Some(ledger.account.clone()),
        positions: ledger
            .book
            .positions()
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect(),
        ..PersistedState::default()
    };

    let mut config = fixed_size_config();
    config.risk.max_portfolio_risk = dec!(0.10);
    let rt = runtime_with_store(&config, Arc::new(MemoryStore::with_state(state))).await;
    assert_eq!(rt.engine.snapshot().await.risk.total_exposure, dec!(18000));

    tick(&rt, "KO", dec!(60)).await;
    let outcome = rt
        .engine
        .process(&Decision::new("KO", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Denied);
    assert_eq!(outcome.risk, Some(RiskVerdict::Deny(DenyReason::PortfolioRisk)));
    assert_eq!(outcome.reason.as_deref(), Some("portfolio-risk"));
    assert!(rt.broker.accepted_orders().await.is_empty());
    assert!(rt.engine.position("KO").await.is_none());
}

#[tokio::test]
async fn test_daily_trade_cap_counts_exits() {
    let mut config = fixed_size_config();
    config.risk.max_daily_trades = 2;
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(100)).await;

    for action in [Action::Buy, Action::Sell] {
        let outcome = rt
            .engine
            .process(&Decision::new("AAPL", action, dec!(0.8)), &rt.gate)
            .await
            .unwrap();
        assert!(outcome.is_executed());
    }

    let outcome = rt
        .engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(outcome.reason.as_deref(), Some("daily-trades"));
}

#[tokio::test]
async fn test_breaker_blocks_entries_but_not_exits() {
    let config = fixed_size_config();
    let rt = runtime(&config).await;

    tick(&rt, "MSFT", dec!(100)).await;
    rt.engine
        .process(&Decision::new("MSFT", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();

    // 12% inside the window
    tick(&rt, "AAPL", dec!(100)).await;
    tick(&rt, "AAPL", dec!(112)).await;
    assert!(rt.engine.breaker().is_halted());

    let entry = rt
        .engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(entry.status, OutcomeStatus::Denied);
    assert_eq!(entry.reason.as_deref(), Some("circuit-breaker"));

    let exit = rt
        .engine
        .process(&Decision::new("MSFT", Action::Sell, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(exit.status, OutcomeStatus::Executed);
    assert!(rt.engine.position("MSFT").await.is_none());
}

#[tokio::test]
async fn test_operator_resume_keeps_market_trip() {
    let config = fixed_size_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(100)).await;
    tick(&rt, "AAPL", dec!(115)).await;

    let state = rt
        .engine
        .breaker()
        .resume(chrono::Utc::now())
        .await;
    assert!(state.is_halted());
}

fn aggressive_config() -> Config {
    let mut config = paper_config();
    config.sizing.percentage = dec!(0.5);
    config.risk.max_position_size = dec!(1);
    config.risk.max_portfolio_risk = dec!(1);
    config.risk.max_concentration = dec!(1);
    config.risk.min_balance_required = dec!(0.0001);
    config.risk.max_daily_loss = dec!(1);
    config.risk.max_daily_trades = 1000;
    config.breaker.enabled = false;
    config.execution.fill_timeout_ms = 500;
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_cash_never_negative(
        steps in prop::collection::vec((0usize..3, 1u32..500, any::<bool>()), 1..12)
    ) {
        let runtime_rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime_rt.block_on(async {
            let config = aggressive_config();
            let rt = runtime(&config).await;
            let symbols = ["AAPL", "BTC-USD", "RELIANCE.NS"];

            for (index, price, buy) in steps {
                let symbol = symbols[index];
                tick(&rt, symbol, Decimal::from(price)).await;
                let action = if buy { Action::Buy } else { Action::Sell };
                rt.engine
                    .process(&Decision::new(symbol, action, dec!(0.9)), &rt.gate)
                    .await
                    .unwrap();

                let account = rt.engine.account().await;
                assert!(account.cash >= Decimal::ZERO, "cash went negative: {}", account.cash);
                assert!(account.committed >= Decimal::ZERO);
            }
            rt.shutdown().await;
        });
    }
}
