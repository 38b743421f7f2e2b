//! Cancellation manager: best-effort sweep of resting orders.
//!
//! Every order gets one cancel request. A failure is logged and the
//! sweep moves on; there is no retry.

use std::sync::Arc;
use tracing::{info, warn};

use super::journal::{EventKind, Journal};
use crate::exchange::Exchange;
use crate::types::PendingOrder;

/// Result of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelSweep {
    pub cancelled: usize,
    pub failed: usize,
}

pub struct CancellationManager {
    exchange: Arc<dyn Exchange>,
    journal: Arc<Journal>,
}

impl CancellationManager {
    pub fn new(exchange: Arc<dyn Exchange>, journal: Arc<Journal>) -> Self {
        Self { exchange, journal }
    }

    /// Request cancellation of every order; `at_ms` stamps the journal entries.
    pub async fn cancel_all(&self, orders: &[PendingOrder], at_ms: i64) -> CancelSweep {
        info!(count = orders.len(), "Cancelling pending orders");
        let mut sweep = CancelSweep::default();

        for order in orders {
            match self.exchange.cancel_order(&order.order_id).await {
                Ok(()) => {
                    sweep.cancelled += 1;
                    self.journal
                        .record(
                            at_ms,
                            EventKind::CancelOrder {
                                asset: order.asset.clone(),
                                order_id: order.order_id.clone(),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    sweep.failed += 1;
                    warn!(order_id = %order.order_id, error = %e, "Cancel failed");
                    self.journal
                        .record(
                            at_ms,
                            EventKind::CancelFailed {
                                asset: order.asset.clone(),
                                order_id: order.order_id.clone(),
                                reason: e.to_string(),
                            },
                        )
                        .await;
                }
            }
        }

        sweep
    }
}
