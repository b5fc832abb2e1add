//! JSON file store

use super::{Claim, PersistedState, StateDelta, Store, SubmissionRecord};
use crate::error::StoreError;
use crate::execution::{Order, TradeOutcome};
use crate::portfolio::TradeStats;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Whole-state JSON snapshot rewritten on every change
///
/// Each write goes to a sibling temp file which is synced and renamed over
/// the target, so a crash leaves either the old or the new snapshot. A
/// failed write rolls the in-memory copy back.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), "Opened state file");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(state)?;
        let temp_path = self.path.with_extension("tmp");

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Mutate under the lock and persist, restoring the prior state on failure
    async fn write<T>(
        &self,
        mutate: impl FnOnce(&mut PersistedState) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.clone();
        let value = mutate(&mut state);
        if let Err(e) = self.flush(&state).await {
            tracing::error!(path = %self.path.display(), error = %e, "State write failed");
            *state = before;
            return Err(e);
        }
        Ok(value)
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn get_or_create_submission(
        &self,
        decision_id: Uuid,
        order: &Order,
    ) -> Result<Claim, StoreError> {
        if let Some(existing) = self.find_submission(decision_id).await? {
            return Ok(Claim::Existing(existing));
        }
        self.write(|state| state.claim(decision_id, order)).await
    }

    async fn find_submission(
        &self,
        decision_id: Uuid,
    ) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(self.state.lock().await.submissions.get(&decision_id).cloned())
    }

    async fn apply(&self, delta: &StateDelta) -> Result<(), StoreError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.write(|state| state.apply(delta)).await
    }

    async fn record_outcome(&self, outcome: &TradeOutcome) -> Result<(), StoreError> {
        self.write(|state| state.push_outcome(outcome)).await
    }

    async fn trade_stats(&self, lookback: usize) -> Result<TradeStats, StoreError> {
        Ok(self.state.lock().await.trade_stats(lookback))
    }

    async fn completed_paper_trades(&self) -> Result<u32, StoreError> {
        Ok(self.state.lock().await.paper_trades)
    }

    async fn load_state(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{BrokerKind, OrderRole, Side, TradingMode};
    use crate::market::Market;
    use crate::portfolio::{Account, Position};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("tradegate.json");

        let decision_id = Uuid::new_v4();
        let order = Order::market(
            "AAPL",
            Market::Nasdaq,
            Side::Buy,
            dec!(13),
            OrderRole::Entry,
            BrokerKind::Simulated,
        );
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            assert!(store
                .get_or_create_submission(decision_id, &order)
                .await
                .unwrap()
                .is_created());

            let mut account = Account::new(dec!(100000), TradingMode::Paper);
            account.cash = dec!(98050);
            store
                .apply(&StateDelta {
                    account: Some(account),
                    positions: vec![Position::new(
                        "AAPL",
                        Market::Nasdaq,
                        dec!(13),
                        dec!(150),
                        Utc::now(),
                    )],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let claim = reopened
            .get_or_create_submission(decision_id, &order)
            .await
            .unwrap();
        assert!(!claim.is_created());

        let state = reopened.load_state().await.unwrap();
        assert_eq!(state.account.unwrap().cash, dec!(98050));
        assert_eq!(state.positions["AAPL"].quantity, dec!(13));
        assert!(state.orders.contains_key(&order.id));
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("none.json")).await.unwrap();
        let state = store.load_state().await.unwrap();
        assert!(state.account.is_none());
        assert_eq!(state.paper_trades, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(StoreError::Serde(_))
        ));
    }
}
