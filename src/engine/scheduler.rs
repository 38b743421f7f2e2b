//! Scheduler — the tick loop that drives every other component.
//!
//! One tick, in order:
//! 1. read venue time
//! 2. read the base balance; under the floor the run halts
//! 3. re-check pending orders (filled → drop, gone → re-queue the asset)
//! 4. count a completed round once nothing is pending or queued
//! 5. place an order for every queued asset
//! 6. when idle and past the deadline, queue the whole plan and move the
//!    deadline to the boundary after now
//!
//! `RunState` is owned here and only mutated inside `tick`. Ticks never
//! overlap, so there is no locking.

use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::budget::BudgetGuard;
use super::canceller::CancellationManager;
use super::journal::{EventKind, Journal, RunSnapshot};
use super::monitor::{OrderMonitor, OrderOutcome};
use super::placer::OrderPlacer;
use crate::clock::Clock;
use crate::config::InvestmentPlan;
use crate::exchange::{Exchange, ExchangeError};
use crate::types::{ms_to_datetime, PendingOrder, Product};

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Boundary at which the next round becomes due (ms since epoch).
    pub next_deadline_ms: i64,
    pub pending_orders: Vec<PendingOrder>,
    pub assets_to_buy: BTreeSet<String>,
    /// Completed rounds; only counted while a round cap is configured.
    pub investment_rounds: u64,
    pub terminal_error: Option<String>,
}

impl RunState {
    pub fn new(next_deadline_ms: i64) -> Self {
        Self {
            next_deadline_ms,
            pending_orders: Vec::new(),
            assets_to_buy: BTreeSet::new(),
            investment_rounds: 0,
            terminal_error: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending_orders.is_empty() && self.assets_to_buy.is_empty()
    }

    pub fn is_pending(&self, asset: &str) -> bool {
        self.pending_orders.iter().any(|o| o.asset == asset)
    }

    /// Queue an asset for purchase. Refused while it has a pending order.
    pub fn enqueue(&mut self, asset: &str) -> bool {
        if self.is_pending(asset) {
            return false;
        }
        self.assets_to_buy.insert(asset.to_string())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    BudgetFloor { remaining: Decimal, floor: Decimal },
}

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    RoundCapReached,
    BudgetFloor { remaining: Decimal, floor: Decimal },
}

impl RunExit {
    /// Process exit code: only a floor breach is abnormal.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunExit::Shutdown | RunExit::RoundCapReached => 0,
            RunExit::BudgetFloor { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub simulation: bool,
    /// Log a state summary every N ticks (0 disables).
    pub log_state_every: u64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            simulation: false,
            log_state_every: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    plan: Arc<InvestmentPlan>,
    clock: Clock,
    budget: BudgetGuard,
    placer: OrderPlacer,
    monitor: OrderMonitor,
    canceller: CancellationManager,
    journal: Arc<Journal>,
    options: SchedulerOptions,
    state: RunState,
    ticks: u64,
}

impl Scheduler {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        plan: Arc<InvestmentPlan>,
        products: Vec<Product>,
        budget: BudgetGuard,
        journal: Arc<Journal>,
        options: SchedulerOptions,
        state: RunState,
    ) -> Self {
        Self {
            clock: Clock::new(exchange.clone()),
            placer: OrderPlacer::new(exchange.clone(), plan.clone(), products),
            monitor: OrderMonitor::new(exchange.clone()),
            canceller: CancellationManager::new(exchange, journal.clone()),
            plan,
            budget,
            journal,
            options,
            state,
            ticks: 0,
        }
    }

    /// Load products, resolve the base account and compute the first
    /// deadline from the current venue time.
    pub async fn bootstrap(
        exchange: Arc<dyn Exchange>,
        plan: Arc<InvestmentPlan>,
        journal: Arc<Journal>,
        options: SchedulerOptions,
    ) -> Result<Self, ExchangeError> {
        let products = exchange.products().await?;
        let budget =
            BudgetGuard::for_currency(exchange.clone(), &plan.base_currency, plan.min_base_balance)
                .await?;
        let now = exchange.server_time_ms().await?;
        let state = RunState::new(plan.calendar.next_deadline(now));

        info!(
            products = products.len(),
            next_deadline = %ms_to_datetime(state.next_deadline_ms),
            "Scheduler ready"
        );

        let scheduler = Self::new(exchange, plan, products, budget, journal, options, state);
        scheduler.publish(now).await;
        Ok(scheduler)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn round_cap_reached(&self) -> bool {
        self.plan.round_cap_active() && self.state.investment_rounds >= self.plan.max_investment_rounds
    }

    /// Run ticks until the budget floor is breached, the round cap is
    /// exhausted, or `shutdown` resolves. `shutdown` is only observed
    /// between ticks. Pending orders are cancelled on every exit path.
    pub async fn run<F>(&mut self, shutdown: F) -> RunExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            loop_interval_ms = self.plan.loop_interval.as_millis() as u64,
            "Entering main loop. Press Ctrl+C to stop."
        );

        let exit = loop {
            match self.tick().await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::BudgetFloor { remaining, floor }) => {
                    break RunExit::BudgetFloor { remaining, floor };
                }
                Err(e) => {
                    error!(error = %e, "Tick failed, continuing to next");
                    self.journal
                        .record(
                            chrono::Utc::now().timestamp_millis(),
                            EventKind::ExceptionCaught { message: e.to_string() },
                        )
                        .await;
                }
            }

            if self.round_cap_reached() && self.state.is_idle() {
                info!(rounds = self.state.investment_rounds, "Investment round cap reached");
                break RunExit::RoundCapReached;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.plan.loop_interval) => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break RunExit::Shutdown;
                }
            }
        };

        self.wind_down().await;
        exit
    }

    /// Execute one tick. Errors are returned before any state change.
    pub async fn tick(&mut self) -> Result<TickOutcome, ExchangeError> {
        let tick_no = self.ticks;
        self.ticks += 1;

        let now = self.clock.now_ms().await?;
        let ms_remaining = self.state.next_deadline_ms - now;
        let remaining = self.budget.remaining().await?;

        if self.options.log_state_every > 0 && tick_no % self.options.log_state_every == 0 {
            self.log_state(remaining, ms_remaining);
        }

        if self.budget.is_breached(remaining) {
            let floor = self.budget.floor();
            let message = format!(
                "Remaining {} balance {remaining} is below the floor {floor}",
                self.plan.base_currency
            );
            error!(%message, "Stopping purchases");
            self.state.terminal_error = Some(message);
            self.journal
                .record(now, EventKind::BudgetHalt { remaining, floor })
                .await;
            self.publish(now).await;
            return Ok(TickOutcome::BudgetFloor { remaining, floor });
        }

        self.review_pending(now).await;
        self.place_queued(now).await;
        self.roll_period(now, ms_remaining).await;

        self.publish(now).await;
        Ok(TickOutcome::Continue)
    }

    /// Steps 3 and 4: resolve every pending order before any placement.
    async fn review_pending(&mut self, now: i64) {
        if self.state.pending_orders.is_empty() {
            return;
        }

        let mut outcomes = Vec::with_capacity(self.state.pending_orders.len());
        for order in &self.state.pending_orders {
            outcomes.push(self.monitor.check(order).await);
        }

        let orders = std::mem::take(&mut self.state.pending_orders);
        let mut requeue = Vec::new();

        for (order, outcome) in orders.into_iter().zip(outcomes) {
            match outcome {
                OrderOutcome::StillOpen => self.state.pending_orders.push(order),
                OrderOutcome::Filled(ack) => {
                    self.journal
                        .record(
                            now,
                            EventKind::FilledOrder {
                                asset: order.asset,
                                order_id: order.order_id,
                                ack: Some(ack),
                            },
                        )
                        .await;
                }
                OrderOutcome::CancelledOrUnknown(reason) => {
                    info!(order_id = %order.order_id, asset = %order.asset, "Order cancelled, trying again");
                    self.journal
                        .record(
                            now,
                            EventKind::CancelledExternally {
                                asset: order.asset.clone(),
                                order_id: order.order_id,
                                reason,
                            },
                        )
                        .await;
                    requeue.push(order.asset);
                }
            }
        }

        for asset in requeue {
            self.state.enqueue(&asset);
        }

        if self.state.is_idle() && self.plan.round_cap_active() {
            self.state.investment_rounds += 1;
            info!(
                rounds = self.state.investment_rounds,
                cap = self.plan.max_investment_rounds,
                "Investment round complete"
            );
        }
    }

    /// Step 5: one placement attempt per queued asset.
    async fn place_queued(&mut self, now: i64) {
        let queued: Vec<String> = self.state.assets_to_buy.iter().cloned().collect();

        for asset in queued {
            let request = match self.placer.quote(&asset).await {
                Ok(request) => request,
                Err(e) => {
                    warn!(asset = %asset, error = %e, "Could not quote order");
                    self.journal
                        .record(now, EventKind::RejectedOrder { asset, reason: e.to_string() })
                        .await;
                    continue;
                }
            };

            self.journal
                .record(
                    now,
                    EventKind::PlaceOrder {
                        asset: asset.clone(),
                        value: request.notional(),
                        request: request.clone(),
                    },
                )
                .await;

            match self.placer.submit(request).await {
                Ok(placement) if placement.ack.status.is_live() => {
                    info!(asset = %asset, ack = %placement.ack, "Order placed");
                    self.state.assets_to_buy.remove(&asset);
                    self.state.pending_orders.push(PendingOrder {
                        order_id: placement.ack.id.clone(),
                        asset: asset.clone(),
                        placed_at_ms: now,
                    });
                    self.journal
                        .record(now, EventKind::PlaceOrderResult { asset, ack: placement.ack })
                        .await;
                }
                Ok(placement) => {
                    let reason = match &placement.ack.reject_reason {
                        Some(r) => format!("status {}: {r}", placement.ack.status),
                        None => format!("status {}", placement.ack.status),
                    };
                    warn!(asset = %asset, %reason, "Order not accepted, will retry");
                    self.journal
                        .record(now, EventKind::RejectedOrder { asset, reason })
                        .await;
                }
                Err(e) => {
                    warn!(asset = %asset, error = %e, "Order rejected, will retry");
                    self.journal
                        .record(now, EventKind::RejectedOrder { asset, reason: e.to_string() })
                        .await;
                }
            }
        }
    }

    /// Step 6: start a new round when idle and past the deadline.
    async fn roll_period(&mut self, now: i64, ms_remaining: i64) {
        if !self.state.is_idle() || ms_remaining >= 0 || self.round_cap_reached() {
            return;
        }

        for asset in self.plan.assets() {
            self.state.enqueue(asset);
        }
        self.state.next_deadline_ms = self.plan.calendar.next_deadline(now);

        let assets: Vec<String> = self.state.assets_to_buy.iter().cloned().collect();
        let next_deadline = ms_to_datetime(self.state.next_deadline_ms);
        info!(assets = ?assets, next_deadline = %next_deadline, "New investment round");
        self.journal
            .record(now, EventKind::RoundEnqueued { assets, next_deadline })
            .await;
    }

    /// Cancel whatever is still resting and publish the final snapshot.
    async fn wind_down(&mut self) {
        let at = match self.clock.now_ms().await {
            Ok(t) => t,
            Err(_) => chrono::Utc::now().timestamp_millis(),
        };

        let orders = std::mem::take(&mut self.state.pending_orders);
        if !orders.is_empty() {
            let sweep = self.canceller.cancel_all(&orders, at).await;
            info!(cancelled = sweep.cancelled, failed = sweep.failed, "Pending orders swept");
        }

        self.publish(at).await;
    }

    async fn publish(&self, now: i64) {
        self.journal
            .publish(RunSnapshot {
                next_deadline: ms_to_datetime(self.state.next_deadline_ms),
                ms_remaining: self.state.next_deadline_ms - now,
                pending_orders: self.state.pending_orders.clone(),
                assets_to_buy: self.state.assets_to_buy.iter().cloned().collect(),
                investment_rounds: self.state.investment_rounds,
                max_investment_rounds: self.plan.max_investment_rounds,
                simulation: self.options.simulation,
                terminal_error: self.state.terminal_error.clone(),
                updated_at: ms_to_datetime(now),
            })
            .await;
    }

    fn log_state(&self, remaining: Decimal, ms_remaining: i64) {
        let pending: Vec<&str> = self
            .state
            .pending_orders
            .iter()
            .map(|o| o.order_id.as_str())
            .collect();
        info!(
            assets_to_buy = ?self.state.assets_to_buy,
            pending_orders = ?pending,
            remaining_base = %remaining,
            next_deadline = %ms_to_datetime(self.state.next_deadline_ms),
            secs_remaining = ms_remaining as f64 / 1000.0,
            "State"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
