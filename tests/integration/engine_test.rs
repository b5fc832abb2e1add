//! End-to-end execution through the assembled runtime

use crate::common::{paper_config, runtime, runtime_with_store, tick};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;
use tradegate::decision::{Action, Decision};
use tradegate::execution::{OrderStatus, OutcomeStatus, Stage, TradingModeGate};
use tradegate::store::{JsonFileStore, Store};

#[tokio::test]
async fn test_buy_is_sized_bracketed_and_persisted() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(150)).await;

    let decision = Decision::new("AAPL", Action::Buy, dec!(0.8));
    let outcome = rt.engine.process(&decision, &rt.gate).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Executed);
    assert_eq!(outcome.stage, Stage::Filled);
    assert_eq!(outcome.quantity, Some(dec!(13)));
    assert_eq!(outcome.order_status, Some(OrderStatus::Filled));

    let position = rt.engine.position("AAPL").await.unwrap();
    assert_eq!(position.quantity, dec!(13));
    assert_eq!(position.stop_price, Some(dec!(147)));
    assert_eq!(position.target_price, Some(dec!(156)));
    assert!(position.bracket_id.is_some());

    // Stop and target rest at the venue
    assert_eq!(rt.broker.resting_orders().await.len(), 2);

    let account = rt.engine.account().await;
    assert_eq!(account.cash, dec!(98050));
    assert_eq!(account.daily_trades, 1);

    let state = rt.store.load_state().await.unwrap();
    assert_eq!(state.positions["AAPL"].quantity, dec!(13));
    assert_eq!(state.brackets["AAPL"].stop_price, dec!(147));
    assert!(state.submissions.contains_key(&decision.id));
}

#[tokio::test]
async fn test_same_decision_submits_once() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "MSFT", dec!(400)).await;

    let decision = Decision::new("MSFT", Action::Buy, dec!(0.9));
    let (first, second) = tokio::join!(
        rt.engine.process(&decision, &rt.gate),
        rt.engine.process(&decision, &rt.gate)
    );
    let mut statuses = vec![first.unwrap().status, second.unwrap().status];
    statuses.sort_by_key(|s| format!("{s:?}"));
    assert_eq!(statuses, vec![OutcomeStatus::Duplicate, OutcomeStatus::Executed]);

    let third = rt.engine.process(&decision, &rt.gate).await.unwrap();
    assert_eq!(third.status, OutcomeStatus::Duplicate);

    let entries: Vec<_> = rt
        .broker
        .accepted_orders()
        .await
        .into_iter()
        .filter(|o| o.bracket_id.is_none())
        .collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_exit_cancels_bracket_and_books_pnl() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(150)).await;
    rt.engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();

    tick(&rt, "AAPL", dec!(152)).await;
    let outcome = rt
        .engine
        .process(&Decision::new("AAPL", Action::Sell, dec!(0.8)), &rt.gate)
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Executed);
    assert_eq!(outcome.quantity, Some(dec!(13)));
    assert!(rt.engine.position("AAPL").await.is_none());
    assert!(rt.broker.resting_orders().await.is_empty());

    let account = rt.engine.account().await;
    assert_eq!(account.cash, dec!(100026));
    assert_eq!(account.daily_realized_pnl, dec!(26));
    assert_eq!(account.daily_trades, 2);
}

#[tokio::test]
async fn test_restart_restores_state_and_idempotence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let config = paper_config();
    let decision = Decision::new("AAPL", Action::Buy, dec!(0.8));

    {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let rt = runtime_with_store(&config, store).await;
        tick(&rt, "AAPL", dec!(150)).await;
        let outcome = rt.engine.process(&decision, &rt.gate).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Executed);
        rt.shutdown().await;
    }

    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let rt = runtime_with_store(&config, store).await;
    tick(&rt, "AAPL", dec!(150)).await;

    let position = rt.engine.position("AAPL").await.unwrap();
    assert_eq!(position.quantity, dec!(13));
    assert_eq!(rt.engine.account().await.cash, dec!(98050));
    assert!(rt.engine.brackets().group("AAPL").await.is_some());

    let replay = rt.engine.process(&decision, &rt.gate).await.unwrap();
    assert_eq!(replay.status, OutcomeStatus::Duplicate);
    assert!(rt.broker.accepted_orders().await.is_empty());
}

#[tokio::test]
async fn test_stop_aborts_before_submission() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(150)).await;
    rt.engine.shutdown_token().cancel();

    let outcome = rt
        .engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &TradingModeGate::new(10))
        .await
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Skipped);
    assert_eq!(outcome.reason.as_deref(), Some("stopped"));
    assert!(rt.broker.accepted_orders().await.is_empty());
}
