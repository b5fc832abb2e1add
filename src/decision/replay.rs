//! File-driven advisor replaying recorded decisions

use super::{Advisor, Decision, DecisionContext};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tokio::sync::Mutex;

/// Replays decisions loaded from a JSON array, one per request, per symbol
pub struct ReplayAdvisor {
    queues: Mutex<HashMap<String, VecDeque<Decision>>>,
}

impl ReplayAdvisor {
    /// Build from an in-memory list of decisions
    pub fn new(decisions: Vec<Decision>) -> Self {
        let mut queues: HashMap<String, VecDeque<Decision>> = HashMap::new();
        for decision in decisions {
            queues
                .entry(decision.symbol.to_uppercase())
                .or_default()
                .push_back(decision);
        }
        Self {
            queues: Mutex::new(queues),
        }
    }

    /// Load decisions from a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let decisions: Vec<Decision> = serde_json::from_str(&content)?;
        Ok(Self::new(decisions))
    }

    /// Number of decisions not yet handed out
    pub async fn remaining(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl Advisor for ReplayAdvisor {
    async fn get_decision(
        &self,
        symbol: &str,
        _context: &DecisionContext,
    ) -> anyhow::Result<Option<Decision>> {
        let mut queues = self.queues.lock().await;
        Ok(queues
            .get_mut(&symbol.to_uppercase())
            .and_then(VecDeque::pop_front))
    }
}
