//! Simulated venue for dry runs.
//!
//! Market data (server time, order books, products) comes from a wrapped
//! venue, usually the live public API. Orders never leave the process:
//! placements get sequential `sim-N` ids, stay `open` until `fill_after`
//! has elapsed on the venue clock, then report `done` once, debit a
//! synthetic base-currency balance and are forgotten. Cancelled or
//! already reported ids fail lookups with `NotFound`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{Exchange, ExchangeError};
use crate::types::{Account, LimitBuy, OrderAck, OrderBook, OrderStatus, Product};

const ACCOUNT_PREFIX: &str = "sim-account-";

#[derive(Debug, Clone)]
struct SimOrder {
    request: LimitBuy,
    placed_at_ms: i64,
}

#[derive(Debug, Default)]
struct Book {
    next_id: u64,
    balance: Decimal,
    orders: HashMap<String, SimOrder>,
}

pub struct SimulatedExchange {
    market_data: Arc<dyn Exchange>,
    base_currency: String,
    fill_after_ms: i64,
    book: Mutex<Book>,
}

impl SimulatedExchange {
    pub fn new(
        market_data: Arc<dyn Exchange>,
        base_currency: &str,
        starting_balance: Decimal,
        fill_after_ms: i64,
    ) -> Self {
        info!(
            base_currency,
            starting_balance = %starting_balance,
            fill_after_ms,
            "Simulated venue enabled: no real orders will be placed"
        );
        Self {
            market_data,
            base_currency: base_currency.to_string(),
            fill_after_ms,
            book: Mutex::new(Book {
                balance: starting_balance,
                ..Book::default()
            }),
        }
    }

    fn account_id(&self) -> String {
        format!("{ACCOUNT_PREFIX}{}", self.base_currency)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Book>, ExchangeError> {
        self.book
            .lock()
            .map_err(|_| ExchangeError::Request("simulated book poisoned".into()))
    }
}

#[async_trait]
impl Exchange for SimulatedExchange {
    async fn server_time_ms(&self) -> Result<i64, ExchangeError> {
        self.market_data.server_time_ms().await
    }

    async fn order_book(&self, market: &str) -> Result<OrderBook, ExchangeError> {
        self.market_data.order_book(market).await
    }

    async fn products(&self) -> Result<Vec<Product>, ExchangeError> {
        self.market_data.products().await
    }

    async fn accounts(&self) -> Result<Vec<Account>, ExchangeError> {
        let balance = self.lock()?.balance;
        Ok(vec![Account {
            id: self.account_id(),
            currency: self.base_currency.clone(),
            balance,
        }])
    }

    async fn account_balance(&self, account_id: &str) -> Result<Decimal, ExchangeError> {
        if account_id != self.account_id() {
            return Err(ExchangeError::NotFound(format!("account {account_id}")));
        }
        Ok(self.lock()?.balance)
    }

    async fn place_limit_buy(&self, order: &LimitBuy) -> Result<OrderAck, ExchangeError> {
        let now = self.market_data.server_time_ms().await?;
        let mut book = self.lock()?;
        book.next_id += 1;
        let id = format!("sim-{}", book.next_id);
        book.orders.insert(
            id.clone(),
            SimOrder {
                request: order.clone(),
                placed_at_ms: now,
            },
        );
        info!(order_id = %id, order = %order, "[SIMULATED] Order accepted");
        Ok(OrderAck {
            id,
            market: order.market.clone(),
            status: OrderStatus::Pending,
            price: order.price,
            size: order.size,
            filled_size: Decimal::ZERO,
            reject_reason: None,
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderAck, ExchangeError> {
        let now = self.market_data.server_time_ms().await?;
        let mut book = self.lock()?;
        let order = book
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id}")))?;

        let filled = now - order.placed_at_ms >= self.fill_after_ms;
        if filled {
            // Reported `done` exactly once, then dropped.
            book.orders.remove(order_id);
            book.balance -= order.request.notional();
            info!(order_id, "[SIMULATED] Order filled");
        }

        Ok(OrderAck {
            id: order_id.to_string(),
            market: order.request.market.clone(),
            status: if filled { OrderStatus::Done } else { OrderStatus::Open },
            price: order.request.price,
            size: order.request.size,
            filled_size: if filled { order.request.size } else { Decimal::ZERO },
            reject_reason: None,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        match self.lock()?.orders.remove(order_id) {
            Some(_) => Ok(()),
            None => Err(ExchangeError::NotFound(format!("order {order_id}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
