//! Shared types for the DCA bot.
//!
//! These types form the data model used across all modules.
//! Exchange adapters translate their wire formats into these, so the
//! engine never sees venue-specific JSON.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market metadata
// ---------------------------------------------------------------------------

/// Trading constraints for a single market (e.g. `BTC-EUR`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    /// Smallest order size accepted by the venue, in base asset units.
    pub base_min_size: Decimal,
    /// Largest order size accepted by the venue. Some venues no longer
    /// publish this, in which case sizes are only floored.
    pub base_max_size: Option<Decimal>,
}

impl Product {
    /// Clamp a size into `[base_min_size, base_max_size]`.
    ///
    /// Undersized orders are raised to the minimum rather than skipped.
    pub fn clamp_size(&self, size: Decimal) -> Decimal {
        let floored = size.max(self.base_min_size);
        match self.base_max_size {
            Some(max) => floored.min(max),
            None => floored,
        }
    }
}

/// A currency account held at the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub currency: String,
    pub balance: Decimal,
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Aggregated order book, best levels first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Highest bid, if the bid side is non-empty.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// How long a good-till-time order rests before the venue cancels it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelAfter {
    Min,
    Hour,
    Day,
}

impl CancelAfter {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelAfter::Min => "min",
            CancelAfter::Hour => "hour",
            CancelAfter::Day => "day",
        }
    }
}

impl fmt::Display for CancelAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post-only, good-till-time limit buy ready to submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitBuy {
    /// Market id, `<asset>-<base currency>`.
    pub market: String,
    pub price: Decimal,
    pub size: Decimal,
    pub post_only: bool,
    pub cancel_after: CancelAfter,
    pub client_oid: String,
}

impl LimitBuy {
    /// Quote-currency value of the order (`price * size`).
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

impl fmt::Display for LimitBuy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BUY {} {} @ {} (post-only, GTT {})",
            self.size, self.market, self.price, self.cancel_after,
        )
    }
}

/// Order lifecycle status as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Active,
    Done,
    Settled,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Whether the order is accepted and resting (or about to rest).
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Open | OrderStatus::Active)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::Active => "active",
            OrderStatus::Done => "done",
            OrderStatus::Settled => "settled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Venue acknowledgement for a placement or an order lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub market: String,
    pub status: OrderStatus,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default)]
    pub filled_size: Decimal,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

impl fmt::Display for OrderAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} @ {} ({})",
            self.id, self.market, self.size, self.price, self.status,
        )
    }
}

/// An order the scheduler is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub asset: String,
    /// Exchange time (ms since epoch) at which the order was placed.
    pub placed_at_ms: i64,
}

/// Convert a timestamp in ms since epoch to `DateTime<Utc>`.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
