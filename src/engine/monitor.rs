//! Order monitor.
//!
//! Classifies each pending order as still open, filled, or gone. A failed
//! lookup is reported as `CancelledOrUnknown`: the venue forgets orders
//! that were cancelled without fills, and a transient lookup error is
//! treated the same way, so the asset is bought again either way.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::exchange::Exchange;
use crate::types::{OrderAck, PendingOrder};

#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    StillOpen,
    Filled(OrderAck),
    CancelledOrUnknown(String),
}

pub struct OrderMonitor {
    exchange: Arc<dyn Exchange>,
}

impl OrderMonitor {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    pub async fn check(&self, order: &PendingOrder) -> OrderOutcome {
        match self.exchange.get_order(&order.order_id).await {
            Ok(ack) if ack.status.is_live() => {
                debug!(order_id = %order.order_id, status = %ack.status, "Order still open");
                OrderOutcome::StillOpen
            }
            Ok(ack) => {
                info!(order_id = %order.order_id, asset = %order.asset, status = %ack.status, "Order filled");
                OrderOutcome::Filled(ack)
            }
            Err(e) => {
                warn!(
                    order_id = %order.order_id,
                    asset = %order.asset,
                    error = %e,
                    "Order lookup failed, treating as cancelled"
                );
                OrderOutcome::CancelledOrUnknown(e.to_string())
            }
        }
    }
}
