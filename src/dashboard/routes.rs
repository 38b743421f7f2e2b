//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`
//! and is strictly read-only.

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::InvestmentPlan;
use crate::engine::journal::{Event, Journal, RunSnapshot};
use crate::types::CancelAfter;

/// Maximum number of events returned by `/api/log`.
const LOG_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub journal: Arc<Journal>,
    pub plan: Arc<InvestmentPlan>,
}

impl DashboardState {
    pub fn new(journal: Arc<Journal>, plan: Arc<InvestmentPlan>) -> Self {
        Self { journal, plan }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Countdown {
    /// Split a remaining duration; past deadlines read as zero.
    pub fn from_ms(ms: i64) -> Self {
        let total_secs = ms.max(0) / 1000;
        Self {
            days: total_secs / 86_400,
            hours: (total_secs / 3_600) % 24,
            minutes: (total_secs / 60) % 60,
            seconds: total_secs % 60,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: RunSnapshot,
    pub countdown: Countdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub base_currency: String,
    pub amounts: BTreeMap<String, Decimal>,
    pub spend_per_round: Decimal,
    pub period_ms: i64,
    pub cancel_after: CancelAfter,
    pub min_base_balance: Decimal,
    pub max_investment_rounds: u64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.journal.snapshot().await;
    let countdown = Countdown::from_ms(snapshot.ms_remaining);
    Json(StatusResponse { snapshot, countdown })
}

/// GET /api/log
pub async fn get_log(State(state): State<AppState>) -> Json<Vec<Event>> {
    Json(state.journal.recent(LOG_LIMIT).await)
}

/// GET /api/plan
pub async fn get_plan(State(state): State<AppState>) -> Json<PlanResponse> {
    let plan = &state.plan;
    Json(PlanResponse {
        base_currency: plan.base_currency.clone(),
        amounts: plan.amounts.clone(),
        spend_per_round: plan.amounts.values().copied().sum(),
        period_ms: plan.calendar.period_ms(),
        cancel_after: plan.cancel_after,
        min_base_balance: plan.min_base_balance,
        max_investment_rounds: plan.max_investment_rounds,
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
