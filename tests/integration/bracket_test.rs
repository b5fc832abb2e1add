//! Bracket legs, OCO and trailing stops

use crate::common::{eventually, paper_config, runtime, tick};
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tradegate::bracket::{BracketOrderManager, BracketStatus};
use tradegate::config::{BracketConfig, Config};
use tradegate::decision::{Action, Decision};
use tradegate::execution::{OutcomeStatus, SimulatedBroker};
use tradegate::market::Market;
use tradegate::portfolio::Position;
use uuid::Uuid;

fn trailing_config() -> Config {
    let mut config = paper_config();
    config.bracket.trailing = true;
    config.bracket.take_profit_pct = dec!(0.20);
    config
}

#[tokio::test]
async fn test_target_fill_cancels_stop() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(100)).await;
    let outcome = rt
        .engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(outcome.quantity, Some(dec!(20)));

    // Target rests at 104
    tick(&rt, "AAPL", dec!(105)).await;
    assert!(eventually(|| async { rt.engine.position("AAPL").await.is_none() }).await);
    assert!(eventually(|| async { rt.broker.resting_orders().await.is_empty() }).await);

    let account = rt.engine.account().await;
    assert_eq!(account.cash, dec!(100080));
    assert_eq!(account.daily_realized_pnl, dec!(80));
    assert_eq!(account.daily_trades, 1);

    let group = rt.engine.brackets().group("AAPL").await.unwrap();
    assert_eq!(group.status, BracketStatus::Closed);
    assert_eq!(rt.engine.brackets().stats().await.take_profits_hit, 1);
}

#[tokio::test]
async fn test_trailing_stop_ratchets_then_exits() {
    let config = trailing_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(100)).await;
    rt.engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(
        rt.engine.position("AAPL").await.unwrap().stop_price,
        Some(dec!(98))
    );

    tick(&rt, "AAPL", dec!(102)).await;
    assert_eq!(
        rt.engine.position("AAPL").await.unwrap().stop_price,
        Some(dec!(98))
    );

    tick(&rt, "AAPL", dec!(104)).await;
    assert_eq!(
        rt.engine.position("AAPL").await.unwrap().stop_price,
        Some(dec!(101.92))
    );

    tick(&rt, "AAPL", dec!(105)).await;
    assert_eq!(
        rt.engine.position("AAPL").await.unwrap().stop_price,
        Some(dec!(102.90))
    );

    // Pullback does not loosen the stop
    tick(&rt, "AAPL", dec!(103.5)).await;
    assert_eq!(
        rt.engine.position("AAPL").await.unwrap().stop_price,
        Some(dec!(102.90))
    );

    tick(&rt, "AAPL", dec!(102)).await;
    assert!(eventually(|| async { rt.engine.position("AAPL").await.is_none() }).await);
    assert!(eventually(|| async { rt.broker.resting_orders().await.is_empty() }).await);

    let account = rt.engine.account().await;
    assert_eq!(account.daily_realized_pnl, dec!(40));
    let stats = rt.engine.brackets().stats().await;
    assert_eq!(stats.trailing_updates, 2);
    assert_eq!(stats.stop_losses_hit, 1);
}

#[tokio::test]
async fn test_failed_sibling_cancel_flags_position() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(100)).await;
    rt.engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();

    rt.broker.fail_next_cancels(10).await;
    tick(&rt, "AAPL", dec!(105)).await;
    assert!(
        eventually(|| async {
            rt.engine
                .brackets()
                .group("AAPL")
                .await
                .is_some_and(|g| g.status == BracketStatus::NeedsReconciliation)
        })
        .await
    );
    assert_eq!(rt.engine.brackets().stats().await.reconciliation_flags, 1);

    // Stop still rests at the venue; retrying clears it once cancels work again
    rt.broker.fail_next_cancels(0).await;
    assert!(rt.engine.reconcile("AAPL").await.unwrap());
    assert!(rt.broker.resting_orders().await.is_empty());

    tick(&rt, "AAPL", dec!(105)).await;
    let outcome = rt
        .engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Executed);
}

#[tokio::test]
async fn test_rejected_exit_reinstates_bracket() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(100)).await;
    rt.engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(rt.broker.resting_orders().await.len(), 2);

    rt.broker.reject_next_submits(1).await;
    let exit = rt
        .engine
        .process(&Decision::new("AAPL", Action::Sell, dec!(0.9)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(exit.status, OutcomeStatus::Failed);
    assert!(exit.reason.unwrap().starts_with("broker-rejection"));

    // Still open and protected at the same prices
    let position = rt.engine.position("AAPL").await.unwrap();
    assert_eq!(position.quantity, dec!(20));
    assert!(!position.needs_reconciliation);
    assert_eq!(rt.broker.resting_orders().await.len(), 2);
    let group = rt.engine.brackets().group("AAPL").await.unwrap();
    assert_eq!(group.status, BracketStatus::Active);
    assert_eq!(group.stop_price, dec!(98));
    assert_eq!(position.bracket_id, Some(group.id));

    tick(&rt, "AAPL", dec!(97)).await;
    assert!(eventually(|| async { rt.engine.position("AAPL").await.is_none() }).await);
    assert_eq!(rt.engine.brackets().stats().await.stop_losses_hit, 1);
}

#[tokio::test]
async fn test_exit_left_unprotected_is_flagged() {
    let config = paper_config();
    let rt = runtime(&config).await;
    tick(&rt, "AAPL", dec!(100)).await;
    rt.engine
        .process(&Decision::new("AAPL", Action::Buy, dec!(0.8)), &rt.gate)
        .await
        .unwrap();

    // Exit and the replacement legs are all refused
    rt.broker.reject_symbol("AAPL").await;
    let exit = rt
        .engine
        .process(&Decision::new("AAPL", Action::Sell, dec!(0.9)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(exit.status, OutcomeStatus::Failed);

    let position = rt.engine.position("AAPL").await.unwrap();
    assert!(position.needs_reconciliation);
    assert!(rt.broker.resting_orders().await.is_empty());

    let next = rt
        .engine
        .process(&Decision::new("AAPL", Action::Sell, dec!(0.9)), &rt.gate)
        .await
        .unwrap();
    assert_eq!(next.reason.as_deref(), Some("reconciliation-required"));
}

fn bracket_config() -> BracketConfig {
    BracketConfig {
        enabled: true,
        stop_loss_pct: dec!(0.02),
        take_profit_pct: dec!(0.50),
        trailing: true,
        trailing_pct: dec!(0.02),
        trailing_activation_pct: dec!(0.01),
        trailing_step_pct: dec!(0.005),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_trailing_stop_never_loosens(
        moves in prop::collection::vec(5000u32..20000, 1..40)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let broker = SimulatedBroker::new(dec!(100000), dec!(0));
            let manager = BracketOrderManager::new(bracket_config());
            let position = Position::new("AAPL", Market::Nasdaq, dec!(10), dec!(100), Utc::now());
            let group = manager.attach(&position, Uuid::new_v4(), &broker).await.unwrap();
            let mut stop = group.stop_price;

            for cents in moves {
                let price = Decimal::from(cents) / dec!(100);
                let moved = manager.on_price("AAPL", price, &broker).await.unwrap();
                let current = manager.group("AAPL").await.unwrap().stop_price;

                assert!(current >= stop, "stop loosened from {stop} to {current}");
                if let Some(new_stop) = moved {
                    assert_eq!(new_stop, current);
                    assert!(new_stop < price);
                }
                stop = current;
            }
        });
    }
}
