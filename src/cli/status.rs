//! Status command implementation

use crate::config::Config;
use crate::store::open_store;
use clap::Args;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Recent outcomes to show
    #[arg(long, default_value = "10")]
    pub outcomes: usize,

    /// Print the persisted state as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = open_store(&config.store).await?;
        let state = store.load_state().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&state)?);
            return Ok(());
        }

        println!("tradegate status");
        println!("  Mode: {:?}", config.execution.mode);
        println!(
            "  Paper trades: {}/{}",
            state.paper_trades, config.execution.min_paper_trades
        );
        match &state.account {
            Some(account) => {
                println!("  Equity: {}", account.equity);
                println!("  Cash: {}", account.cash);
                println!("  Committed: {}", account.committed);
                println!(
                    "  Today: {} trades, realized {}",
                    account.daily_trades, account.daily_realized_pnl
                );
            }
            None => println!("  Account: no persisted state"),
        }

        println!("  Positions: {}", state.positions.len());
        for position in state.positions.values() {
            let flag = if position.needs_reconciliation {
                " [needs reconciliation]"
            } else {
                ""
            };
            println!(
                "    {} {} @ {} stop={:?} target={:?}{}",
                position.symbol,
                position.quantity,
                position.entry_price,
                position.stop_price,
                position.target_price,
                flag
            );
        }

        println!("  Brackets: {}", state.brackets.len());
        for group in state.brackets.values() {
            println!(
                "    {} {:?} stop={} target={}",
                group.symbol, group.status, group.stop_price, group.target_price
            );
        }

        let skip = state.outcomes.len().saturating_sub(self.outcomes);
        println!("  Recent outcomes:");
        for outcome in state.outcomes.iter().skip(skip) {
            println!(
                "    {} {} {} {:?} {}",
                outcome.at.format("%Y-%m-%d %H:%M:%S"),
                outcome.symbol,
                outcome.action,
                outcome.status,
                outcome.reason.as_deref().unwrap_or("-")
            );
        }
        Ok(())
    }
}
