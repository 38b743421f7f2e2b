//! Budget guard: protects the remaining base-currency capital.
//!
//! Reads the base-currency balance every tick. Falling under the floor is
//! fatal for the run: no further orders are placed.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::exchange::{Exchange, ExchangeError};

pub struct BudgetGuard {
    exchange: Arc<dyn Exchange>,
    account_id: String,
    floor: Decimal,
}

impl BudgetGuard {
    pub fn new(exchange: Arc<dyn Exchange>, account_id: String, floor: Decimal) -> Self {
        Self {
            exchange,
            account_id,
            floor,
        }
    }

    /// Find the account holding `currency` and guard it.
    pub async fn for_currency(
        exchange: Arc<dyn Exchange>,
        currency: &str,
        floor: Decimal,
    ) -> Result<Self, ExchangeError> {
        let account = exchange
            .accounts()
            .await?
            .into_iter()
            .find(|a| a.currency == currency)
            .ok_or_else(|| ExchangeError::NotFound(format!("{currency} account")))?;

        info!(currency, account_id = %account.id, balance = %account.balance, "Base currency account");
        Ok(Self::new(exchange, account.id, floor))
    }

    pub fn floor(&self) -> Decimal {
        self.floor
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Current base-currency balance.
    pub async fn remaining(&self) -> Result<Decimal, ExchangeError> {
        self.exchange.account_balance(&self.account_id).await
    }

    /// Whether `remaining` has dropped under the floor.
    pub fn is_breached(&self, remaining: Decimal) -> bool {
        let breached = remaining < self.floor;
        if breached {
            warn!(remaining = %remaining, floor = %self.floor, "Base currency below floor");
        }
        breached
    }
}
