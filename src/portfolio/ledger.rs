//! Combined account and position ledger
//!
//! Every fill goes through [`Ledger::apply_fill`], which validates the cash
//! movement before touching either the account or the position book.

use super::{Account, ClosedPosition, Position, PositionBook};
use crate::error::EngineError;
use crate::market::Market;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;

/// What a fill did to the book
#[derive(Debug, Clone, PartialEq)]
pub enum FillEffect {
    /// A new position was created
    Opened,
    /// An existing position grew
    Increased,
    /// A position shrank but stays open
    Reduced { realized_pnl: Decimal },
    /// A position was closed
    Closed(Box<ClosedPosition>),
}

/// Account plus positions, mutated together under one writer
#[derive(Debug, Clone)]
pub struct Ledger {
    pub account: Account,
    pub book: PositionBook,
}

impl Ledger {
    pub fn new(account: Account, book: PositionBook) -> Self {
        Self { account, book }
    }

    /// Apply a fill of `quantity` (signed: positive buys, negative sells)
    ///
    /// The opposite-side portion larger than the open position is ignored;
    /// exits are always sized to the position.
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        market: Market,
        quantity: Decimal,
        price: Decimal,
        fees: Decimal,
        at: DateTime<Utc>,
    ) -> Result<FillEffect, EngineError> {
        let existing = self.book.get(symbol).map(|p| (p.quantity, p.entry_price));

        match existing {
            None => {
                self.account.commit(market, quantity.abs() * price, fees)?;
                self.book
                    .insert(Position::new(symbol, market, quantity, price, at));
                Ok(FillEffect::Opened)
            }
            Some((held, _)) if held.signum() == quantity.signum() => {
                self.account.commit(market, quantity.abs() * price, fees)?;
                self.book.increase(symbol, quantity, price);
                Ok(FillEffect::Increased)
            }
            Some((held, entry)) => {
                let closing = quantity.abs().min(held.abs());
                if quantity.abs() > held.abs() {
                    tracing::warn!(
                        symbol,
                        %held,
                        %quantity,
                        "Fill exceeds open position, excess ignored"
                    );
                }
                let basis = closing * entry;
                let pnl = (price - entry) * closing * held.signum();

                self.account.release(market, basis, pnl, fees)?;
                match self.book.reduce(symbol, closing, price, pnl - fees, fees, at) {
                    Some(closed) => Ok(FillEffect::Closed(Box::new(closed))),
                    None => Ok(FillEffect::Reduced {
                        realized_pnl: pnl - fees,
                    }),
                }
            }
        }
    }
}
