//! Paper/live trading mode gate

use super::TradingMode;
use crate::config::ExecutionConfig;
use crate::error::EngineError;
use serde::Serialize;

/// Explicit paper/live boundary passed through the execution pipeline
///
/// Going live needs two independent confirmations and a track record of
/// completed paper trades. A refused transition leaves the mode unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradingModeGate {
    mode: TradingMode,
    live_approved: bool,
    live_confirmed: bool,
    completed_paper_trades: u32,
    min_paper_trades: u32,
}

impl TradingModeGate {
    /// A paper gate with no confirmations
    pub fn new(min_paper_trades: u32) -> Self {
        Self {
            mode: TradingMode::Paper,
            live_approved: false,
            live_confirmed: false,
            completed_paper_trades: 0,
            min_paper_trades,
        }
    }

    /// Build the gate configured for startup
    ///
    /// A configured live mode that the gate refuses is a fatal configuration
    /// error, never a silent downgrade to paper.
    pub fn from_config(
        config: &ExecutionConfig,
        completed_paper_trades: u32,
    ) -> Result<Self, EngineError> {
        let mut gate = Self::new(config.min_paper_trades);
        gate.completed_paper_trades = completed_paper_trades;
        gate.set_live_approval(config.live_trading_approved);
        gate.set_live_confirmation(config.live_trading_confirmed);

        if config.mode == TradingMode::Live {
            gate.request_live().map_err(|e| {
                EngineError::Configuration(format!("live mode configured but refused: {e}"))
            })?;
        }
        Ok(gate)
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == TradingMode::Live
    }

    pub fn completed_paper_trades(&self) -> u32 {
        self.completed_paper_trades
    }

    pub fn min_paper_trades(&self) -> u32 {
        self.min_paper_trades
    }

    /// First confirmation
    pub fn set_live_approval(&mut self, approved: bool) {
        self.live_approved = approved;
    }

    /// Second confirmation
    pub fn set_live_confirmation(&mut self, confirmed: bool) {
        self.live_confirmed = confirmed;
    }

    /// Count a completed paper trade toward live eligibility
    pub fn record_paper_trade(&mut self) {
        if self.mode == TradingMode::Paper {
            self.completed_paper_trades += 1;
        }
    }

    /// Attempt the paper -> live transition
    pub fn request_live(&mut self) -> Result<TradingMode, EngineError> {
        if self.mode == TradingMode::Live {
            return Ok(self.mode);
        }
        if !self.live_approved || !self.live_confirmed {
            return Err(EngineError::Gate(format!(
                "live trading needs both confirmations (approved: {}, confirmed: {})",
                self.live_approved, self.live_confirmed
            )));
        }
        if self.completed_paper_trades < self.min_paper_trades {
            return Err(EngineError::Gate(format!(
                "{} of {} required paper trades completed",
                self.completed_paper_trades, self.min_paper_trades
            )));
        }

        tracing::warn!(
            paper_trades = self.completed_paper_trades,
            "Trading mode switched to LIVE"
        );
        self.mode = TradingMode::Live;
        Ok(self.mode)
    }

    /// Drop back to paper; always allowed
    pub fn revert_to_paper(&mut self) {
        if self.mode == TradingMode::Live {
            tracing::info!("Trading mode switched to paper");
        }
        self.mode = TradingMode::Paper;
    }
}
