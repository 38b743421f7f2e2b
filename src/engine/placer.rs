//! Order placer.
//!
//! Turns "buy this asset" into a venue-compliant post-only limit buy at
//! the current best bid and submits it.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::InvestmentPlan;
use crate::exchange::{Exchange, ExchangeError};
use crate::types::{LimitBuy, OrderAck, Product};

/// Why an order could not be placed. The scheduler retries all of these.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("Market not listed by the venue: {0}")]
    UnknownMarket(String),

    #[error("Asset not in the investment plan: {0}")]
    UnknownAsset(String),

    #[error("No usable bid in the {0} order book")]
    EmptyBook(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// A submitted order together with the request that produced it.
#[derive(Debug, Clone)]
pub struct Placement {
    pub request: LimitBuy,
    pub ack: OrderAck,
}

pub struct OrderPlacer {
    exchange: Arc<dyn Exchange>,
    plan: Arc<InvestmentPlan>,
    /// Product constraints keyed by market id, loaded once at startup.
    products: HashMap<String, Product>,
}

impl OrderPlacer {
    pub fn new(exchange: Arc<dyn Exchange>, plan: Arc<InvestmentPlan>, products: Vec<Product>) -> Self {
        let products = products.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            exchange,
            plan,
            products,
        }
    }

    /// Build the limit buy for `asset` from the live order book.
    pub async fn quote(&self, asset: &str) -> Result<LimitBuy, PlacementError> {
        let market = self.plan.market(asset);
        let product = self
            .products
            .get(&market)
            .ok_or_else(|| PlacementError::UnknownMarket(market.clone()))?;
        let spend = self
            .plan
            .amount(asset)
            .ok_or_else(|| PlacementError::UnknownAsset(asset.to_string()))?;

        let book = self.exchange.order_book(&market).await?;
        let bid = book
            .best_bid()
            .filter(|b| *b > Decimal::ZERO)
            .ok_or_else(|| PlacementError::EmptyBook(market.clone()))?;

        let price = round_half_up(bid, self.plan.price_decimals);
        let raw_size = spend
            .checked_div(bid)
            .ok_or_else(|| PlacementError::EmptyBook(market.clone()))?;
        let size = product.clamp_size(round_half_up(raw_size, self.plan.size_decimals));

        debug!(
            market = %market,
            bid = %bid,
            price = %price,
            raw_size = %raw_size,
            size = %size,
            "Quoted limit buy"
        );

        Ok(LimitBuy {
            market,
            price,
            size,
            post_only: true,
            cancel_after: self.plan.cancel_after,
            client_oid: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Submit a quoted order.
    pub async fn submit(&self, request: LimitBuy) -> Result<Placement, PlacementError> {
        info!(order = %request, value = %request.notional(), "Placing order");
        let ack = self.exchange.place_limit_buy(&request).await?;
        Ok(Placement { request, ack })
    }
}

fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
