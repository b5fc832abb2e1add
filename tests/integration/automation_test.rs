//! Automation loop and trading mode gate

use crate::common::{paper_config, runtime, tick};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tradegate::automation::AutomationService;
use tradegate::decision::{Action, Decision, ReplayAdvisor};
use tradegate::error::EngineError;
use tradegate::execution::{OutcomeStatus, TradingMode, TradingModeGate};

#[tokio::test]
async fn test_replayed_decisions_drive_paper_trades() {
    let mut config = paper_config();
    config.bracket.enabled = false;
    config.execution.min_paper_trades = 2;
    config.automation.watchlist = vec!["AAPL".into(), "MSFT".into()];
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(150)).await;
    tick(&rt, "MSFT", dec!(400)).await;

    let advisor = ReplayAdvisor::new(vec![
        Decision::new("AAPL", Action::Buy, dec!(0.8)),
        Decision::new("AAPL", Action::Sell, dec!(0.9)),
        Decision::new("MSFT", Action::Buy, dec!(0.3)),
    ]);
    let service = AutomationService::new(
        config.automation.clone(),
        Arc::new(advisor),
        rt.engine.clone(),
        rt.gate.clone(),
    );

    let first = service.run_once().await;
    assert_eq!(first[0].status, OutcomeStatus::Executed);
    assert_eq!(first[1].reason.as_deref(), Some("low-confidence"));

    let second = service.run_once().await;
    assert_eq!(second[0].status, OutcomeStatus::Executed);
    assert_eq!(second[1].reason.as_deref(), Some("hold"));
    assert!(rt.engine.position("AAPL").await.is_none());

    let status = service.status().await;
    assert_eq!(status.evaluations, 4);
    assert_eq!(status.executions, 2);
    assert_eq!(status.completed_paper_trades, 2);
    assert_eq!(rt.store.completed_paper_trades().await.unwrap(), 2);
    assert_eq!(rt.store.load_state().await.unwrap().outcomes.len(), 4);

    // Enough paper trades and both confirmations, but no live broker
    service.set_live_approval(true).await;
    service.set_live_confirmation(true).await;
    let err = service.request_live().await.unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert_eq!(service.gate().await.mode(), TradingMode::Paper);
}

#[tokio::test]
async fn test_live_gate_never_falls_back_to_paper() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(150)).await;

    let mut gate = TradingModeGate::new(0);
    gate.set_live_approval(true);
    gate.set_live_confirmation(true);
    assert_eq!(gate.request_live().unwrap(), TradingMode::Live);

    let err = rt
        .engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &gate)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(rt.broker.accepted_orders().await.is_empty());
}

#[tokio::test]
async fn test_gate_counts_only_paper_executions() {
    let mut gate = TradingModeGate::new(1);
    gate.set_live_approval(true);
    assert!(matches!(gate.request_live(), Err(EngineError::Gate(_))));

    gate.set_live_confirmation(true);
    assert!(gate.request_live().is_err());

    gate.record_paper_trade();
    assert_eq!(gate.request_live().unwrap(), TradingMode::Live);

    gate.record_paper_trade();
    assert_eq!(gate.completed_paper_trades(), 1);

    gate.revert_to_paper();
    assert_eq!(gate.mode(), TradingMode::Paper);
}
