//! Journal — append-only event log and the latest run snapshot.
//!
//! The scheduler is the only writer. The dashboard and the history file
//! only ever read from here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::{ms_to_datetime, LimitBuy, OrderAck, PendingOrder};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventKind {
    PlaceOrder {
        asset: String,
        request: LimitBuy,
        value: Decimal,
    },
    PlaceOrderResult {
        asset: String,
        ack: OrderAck,
    },
    RejectedOrder {
        asset: String,
        reason: String,
    },
    FilledOrder {
        asset: String,
        order_id: String,
        #[serde(default)]
        ack: Option<OrderAck>,
    },
    CancelledExternally {
        asset: String,
        order_id: String,
        reason: String,
    },
    CancelOrder {
        asset: String,
        order_id: String,
    },
    CancelFailed {
        asset: String,
        order_id: String,
        reason: String,
    },
    RoundEnqueued {
        assets: Vec<String>,
        next_deadline: DateTime<Utc>,
    },
    BudgetHalt {
        remaining: Decimal,
        floor: Decimal,
    },
    ExceptionCaught {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of the scheduler's state after the last tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub next_deadline: DateTime<Utc>,
    pub ms_remaining: i64,
    pub pending_orders: Vec<PendingOrder>,
    pub assets_to_buy: Vec<String>,
    pub investment_rounds: u64,
    pub max_investment_rounds: u64,
    pub simulation: bool,
    pub terminal_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Journal {
    events: RwLock<Vec<Event>>,
    snapshot: RwLock<RunSnapshot>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously persisted history.
    pub fn with_history(events: Vec<Event>) -> Self {
        Self {
            events: RwLock::new(events),
            snapshot: RwLock::new(RunSnapshot::default()),
        }
    }

    /// Append an event stamped with venue time `at_ms`.
    pub async fn record(&self, at_ms: i64, kind: EventKind) {
        self.events.write().await.push(Event {
            time: ms_to_datetime(at_ms),
            kind,
        });
    }

    pub async fn publish(&self, snapshot: RunSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    /// The `limit` most recent events, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Event> {
        self.events.read().await.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}
