//! Replays recorded price ticks from a JSON file

use super::{PriceFeed, PriceTick};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 1024;

/// Feed that replays a fixed list of ticks in timestamp order
pub struct ReplayFeed {
    ticks: Vec<PriceTick>,
    pacing: Option<Duration>,
}

impl ReplayFeed {
    pub fn new(mut ticks: Vec<PriceTick>) -> Self {
        ticks.sort_by_key(|t| t.timestamp);
        Self {
            ticks,
            pacing: None,
        }
    }

    /// Load ticks from a JSON array file
    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let ticks: Vec<PriceTick> = serde_json::from_str(&content)?;
        Ok(Self::new(ticks))
    }

    /// Sleep between ticks instead of replaying as fast as possible
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<PriceTick>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let ticks = self.ticks.clone();
        let pacing = self.pacing;

        tokio::spawn(async move {
            for tick in ticks {
                if tx.send(tick).await.is_err() {
                    tracing::debug!("Replay feed receiver dropped");
                    return;
                }
                if let Some(delay) = pacing {
                    tokio::time::sleep(delay).await;
                }
            }
            tracing::info!("Replay feed exhausted");
        });

        Ok(rx)
    }
}
