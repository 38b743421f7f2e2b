//! Exchange integrations.
//!
//! Defines the `Exchange` trait consumed by the engine and provides:
//! - Coinbase (REST): live venue
//! - Simulated: wraps a live venue's public data and fills orders
//!   synthetically, for dry runs

pub mod coinbase;
pub mod simulated;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Account, LimitBuy, OrderAck, OrderBook, Product};

/// Errors raised by an exchange adapter.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Exchange API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Credentials required for {0}")]
    MissingCredentials(&'static str),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else {
            ExchangeError::Request(e.to_string())
        }
    }
}

/// Abstraction over a spot exchange.
///
/// All calls are single request/response round-trips. Implementors hold
/// no state the engine depends on, so a single instance is shared by
/// every component.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Venue server time in ms since epoch.
    async fn server_time_ms(&self) -> Result<i64, ExchangeError>;

    /// Aggregated order book for a market, best levels first.
    async fn order_book(&self, market: &str) -> Result<OrderBook, ExchangeError>;

    /// All tradable products with their size constraints.
    async fn products(&self) -> Result<Vec<Product>, ExchangeError>;

    /// All accounts of the authenticated user.
    async fn accounts(&self) -> Result<Vec<Account>, ExchangeError>;

    /// Balance of a single account.
    async fn account_balance(&self, account_id: &str) -> Result<Decimal, ExchangeError>;

    /// Submit a limit buy.
    async fn place_limit_buy(&self, order: &LimitBuy) -> Result<OrderAck, ExchangeError>;

    /// Look up an order. Fails with `NotFound` once the venue has
    /// forgotten it (cancelled without fills, or never existed).
    async fn get_order(&self, order_id: &str) -> Result<OrderAck, ExchangeError>;

    /// Cancel a resting order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;
}
