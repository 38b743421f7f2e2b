//! End-to-end scheduler scenarios against the in-memory venue.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dca_bot::clock::PeriodCalendar;
use dca_bot::config::InvestmentPlan;
use dca_bot::engine::budget::BudgetGuard;
use dca_bot::engine::journal::{EventKind, Journal};
use dca_bot::engine::scheduler::{
    RunExit, RunState, Scheduler, SchedulerOptions, TickOutcome,
};
use dca_bot::exchange::simulated::SimulatedExchange;
use dca_bot::exchange::Exchange;
use dca_bot::types::{CancelAfter, OrderStatus, PendingOrder};

use crate::mock_venue::{MockVenue, DAY_MS, EUR_ACCOUNT, HOUR_MS};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn plan(amounts: &[(&str, Decimal)], max_rounds: u64) -> Arc<InvestmentPlan> {
    let amounts: BTreeMap<String, Decimal> =
        amounts.iter().map(|(a, v)| (a.to_string(), *v)).collect();
    Arc::new(InvestmentPlan {
        amounts,
        base_currency: "EUR".into(),
        calendar: PeriodCalendar::new(0, DAY_MS),
        loop_interval: Duration::from_millis(10),
        cancel_after: CancelAfter::Hour,
        min_base_balance: dec!(100),
        max_investment_rounds: max_rounds,
        price_decimals: 2,
        size_decimals: 8,
    })
}

fn btc_plan() -> Arc<InvestmentPlan> {
    plan(&[("BTC", dec!(100))], 0)
}

async fn scheduler(
    venue: &Arc<MockVenue>,
    plan: Arc<InvestmentPlan>,
    state: RunState,
) -> (Scheduler, Arc<Journal>) {
    let exchange: Arc<dyn Exchange> = venue.clone();
    let products = exchange.products().await.unwrap();
    let budget = BudgetGuard::new(exchange.clone(), EUR_ACCOUNT.into(), plan.min_base_balance);
    let journal = Arc::new(Journal::new());
    let scheduler = Scheduler::new(
        exchange,
        plan,
        products,
        budget,
        journal.clone(),
        SchedulerOptions::default(),
        state,
    );
    (scheduler, journal)
}

fn queued(assets: &[&str], deadline_ms: i64) -> RunState {
    let mut state = RunState::new(deadline_ms);
    for asset in assets {
        state.enqueue(asset);
    }
    state
}

/// An asset is never both pending and queued.
fn assert_no_duplicates(state: &RunState) {
    for order in &state.pending_orders {
        assert!(
            !state.assets_to_buy.contains(&order.asset),
            "{} is pending and queued at once",
            order.asset
        );
    }
    let mut assets: Vec<&str> = state.pending_orders.iter().map(|o| o.asset.as_str()).collect();
    assets.sort_unstable();
    let before = assets.len();
    assets.dedup();
    assert_eq!(before, assets.len(), "two pending orders for one asset");
}

async fn count_events(journal: &Journal, pred: impl Fn(&EventKind) -> bool) -> usize {
    journal.events().await.iter().filter(|e| pred(&e.kind)).count()
}

// ---------------------------------------------------------------------------
// Period rollover
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_catch_up_round_after_missed_deadline() {
    let venue = Arc::new(MockVenue::new(25 * HOUR_MS, dec!(1000)));
    let (mut sched, journal) = scheduler(&venue, btc_plan(), RunState::new(DAY_MS)).await;

    let outcome = sched.tick().await.unwrap();
    assert_eq!(outcome, TickOutcome::Continue);
    assert_eq!(sched.state().assets_to_buy.iter().collect::<Vec<_>>(), vec!["BTC"]);
    assert_eq!(sched.state().next_deadline_ms, 2 * DAY_MS);
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::RoundEnqueued { .. })).await,
        1
    );

    // The queued asset is bought on the following tick.
    venue.advance(10_000);
    sched.tick().await.unwrap();
    assert!(sched.state().assets_to_buy.is_empty());
    assert_eq!(sched.state().pending_orders.len(), 1);
    assert_eq!(sched.state().pending_orders[0].asset, "BTC");

    let placed = venue.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].market, "BTC-EUR");
    assert_eq!(placed[0].price, dec!(50000));
    assert_eq!(placed[0].size, dec!(0.002));
    assert!(placed[0].post_only);
    assert_eq!(placed[0].cancel_after, CancelAfter::Hour);
}

#[tokio::test]
async fn test_stall_over_many_periods_enqueues_once() {
    let venue = Arc::new(MockVenue::new(5 * DAY_MS + HOUR_MS, dec!(1000)));
    let (mut sched, journal) = scheduler(&venue, btc_plan(), RunState::new(DAY_MS)).await;

    sched.tick().await.unwrap();
    assert_eq!(sched.state().next_deadline_ms, 6 * DAY_MS);
    assert_eq!(sched.state().assets_to_buy.len(), 1);

    venue.advance(10_000);
    sched.tick().await.unwrap();
    assert_eq!(venue.placed().len(), 1);
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::RoundEnqueued { .. })).await,
        1
    );
}

#[tokio::test]
async fn test_no_round_before_deadline() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    let (mut sched, _journal) = scheduler(&venue, btc_plan(), RunState::new(DAY_MS)).await;

    sched.tick().await.unwrap();
    assert!(sched.state().is_idle());
    assert_eq!(sched.state().next_deadline_ms, DAY_MS);
    assert!(venue.placed().is_empty());
}

#[tokio::test]
async fn test_deadline_is_monotonic_and_on_boundaries() {
    let venue = Arc::new(MockVenue::new(0, dec!(100000)));
    let plan = plan(&[("BTC", dec!(100)), ("ETH", dec!(50))], 0);
    let calendar = plan.calendar;
    let (mut sched, _journal) = scheduler(&venue, plan, RunState::new(DAY_MS)).await;

    let mut last_deadline = sched.state().next_deadline_ms;
    for _ in 0..40 {
        venue.advance(7 * HOUR_MS);
        sched.tick().await.unwrap();

        let deadline = sched.state().next_deadline_ms;
        assert!(deadline >= last_deadline, "deadline moved backwards");
        assert!(calendar.is_boundary(deadline));
        assert_no_duplicates(sched.state());
        last_deadline = deadline;

        for order in sched.state().pending_orders.clone() {
            venue.fill(&order.order_id);
        }
    }
    assert!(last_deadline > DAY_MS);
}

// ---------------------------------------------------------------------------
// Order lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rejected_placement_keeps_asset_queued() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    venue.set_placement_status(OrderStatus::Rejected);
    let (mut sched, journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    sched.tick().await.unwrap();
    assert!(sched.state().assets_to_buy.contains("BTC"));
    assert!(sched.state().pending_orders.is_empty());
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::RejectedOrder { .. })).await,
        1
    );

    // Next tick retries and this time the venue accepts.
    venue.set_placement_status(OrderStatus::Pending);
    venue.advance(10_000);
    sched.tick().await.unwrap();
    assert_eq!(venue.placed().len(), 2);
    assert!(sched.state().assets_to_buy.is_empty());
    assert!(sched.state().is_pending("BTC"));
}

#[tokio::test]
async fn test_placement_error_keeps_asset_queued_and_retries() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    venue.set_placement_error(Some("Insufficient funds"));
    let (mut sched, journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    assert_eq!(sched.tick().await.unwrap(), TickOutcome::Continue);
    assert!(sched.state().assets_to_buy.contains("BTC"));
    assert!(sched.state().pending_orders.is_empty());
    assert_eq!(venue.placement_attempts(), 1);

    let events = journal.events().await;
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::RejectedOrder { asset, reason } if asset == "BTC" && reason.contains("Insufficient funds")
    )));

    venue.set_placement_error(None);
    venue.advance(10_000);
    sched.tick().await.unwrap();
    assert_eq!(venue.placement_attempts(), 2);
    assert!(sched.state().assets_to_buy.is_empty());
    assert!(sched.state().is_pending("BTC"));
}

#[tokio::test]
async fn test_unreachable_venue_on_placement_retries_next_tick() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    venue.set_placement_unreachable(true);
    let (mut sched, journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    for _ in 0..3 {
        assert_eq!(sched.tick().await.unwrap(), TickOutcome::Continue);
        assert!(sched.state().assets_to_buy.contains("BTC"));
        venue.advance(10_000);
    }
    assert_eq!(venue.placement_attempts(), 3);
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::RejectedOrder { .. })).await,
        3
    );

    venue.set_placement_unreachable(false);
    sched.tick().await.unwrap();
    assert!(sched.state().is_pending("BTC"));
    assert!(sched.state().assets_to_buy.is_empty());
}

#[tokio::test]
async fn test_unlisted_market_does_not_block_other_assets() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    let plan = plan(&[("BTC", dec!(100)), ("DOGE", dec!(20))], 0);
    let (mut sched, journal) = scheduler(&venue, plan, queued(&["BTC", "DOGE"], DAY_MS)).await;

    sched.tick().await.unwrap();
    assert!(sched.state().is_pending("BTC"));
    assert!(sched.state().assets_to_buy.contains("DOGE"));
    assert_eq!(venue.placed().len(), 1);
    assert_eq!(venue.placed()[0].market, "BTC-EUR");
    assert_no_duplicates(sched.state());

    let events = journal.events().await;
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::RejectedOrder { asset, reason } if asset == "DOGE" && reason.contains("DOGE-EUR")
    )));

    // Still queued and retried on the next tick, still without reaching the venue.
    venue.advance(10_000);
    sched.tick().await.unwrap();
    assert!(sched.state().assets_to_buy.contains("DOGE"));
    assert_eq!(venue.placement_attempts(), 1);
    assert_eq!(
        count_events(&journal, |k| matches!(
            k,
            EventKind::RejectedOrder { asset, .. } if asset == "DOGE"
        ))
        .await,
        2
    );
}

#[tokio::test]
async fn test_lost_order_is_requeued() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    let (mut sched, journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    sched.tick().await.unwrap();
    let order_id = sched.state().pending_orders[0].order_id.clone();

    venue.expire(&order_id);
    // Keep the re-placement from succeeding so the re-queue is visible.
    venue.set_placement_status(OrderStatus::Rejected);
    venue.advance(10_000);
    sched.tick().await.unwrap();

    assert!(sched.state().pending_orders.is_empty());
    assert!(sched.state().assets_to_buy.contains("BTC"));
    assert_no_duplicates(sched.state());

    let events = journal.events().await;
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::CancelledExternally { order_id: id, asset, .. } if *id == order_id && asset == "BTC"
    )));
}

#[tokio::test]
async fn test_lost_order_is_replaced_in_same_tick() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    let (mut sched, _journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    sched.tick().await.unwrap();
    let first = sched.state().pending_orders[0].order_id.clone();

    venue.expire(&first);
    venue.advance(10_000);
    sched.tick().await.unwrap();

    assert_eq!(sched.state().pending_orders.len(), 1);
    assert_ne!(sched.state().pending_orders[0].order_id, first);
    assert!(sched.state().assets_to_buy.is_empty());
}

#[tokio::test]
async fn test_open_order_stays_pending_and_is_not_rebought() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    let (mut sched, _journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    for _ in 0..5 {
        sched.tick().await.unwrap();
        venue.advance(10_000);
        assert_no_duplicates(sched.state());
    }
    assert_eq!(venue.placed().len(), 1);
    assert_eq!(sched.state().pending_orders.len(), 1);
    assert_eq!(venue.order_lookups(), 4);
}

#[tokio::test]
async fn test_filled_order_leaves_pending() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    let (mut sched, journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    sched.tick().await.unwrap();
    let order_id = sched.state().pending_orders[0].order_id.clone();
    venue.fill(&order_id);

    venue.advance(10_000);
    sched.tick().await.unwrap();
    assert!(sched.state().is_idle());
    assert_eq!(venue.placed().len(), 1);
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::FilledOrder { .. })).await,
        1
    );
    // No round cap configured, so rounds are not counted.
    assert_eq!(sched.state().investment_rounds, 0);
}

// ---------------------------------------------------------------------------
// Round cap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_round_cap_stops_new_rounds() {
    let venue = Arc::new(MockVenue::new(DAY_MS + 1, dec!(1000)));
    let (mut sched, _journal) =
        scheduler(&venue, plan(&[("BTC", dec!(100))], 1), RunState::new(DAY_MS)).await;

    sched.tick().await.unwrap(); // enqueue
    venue.advance(10_000);
    sched.tick().await.unwrap(); // place
    let order_id = sched.state().pending_orders[0].order_id.clone();
    venue.fill(&order_id);
    venue.advance(10_000);
    sched.tick().await.unwrap(); // fill → round complete

    assert_eq!(sched.state().investment_rounds, 1);
    assert!(sched.round_cap_reached());

    // Well past the next deadline: nothing is queued any more.
    venue.set_time(3 * DAY_MS + HOUR_MS);
    sched.tick().await.unwrap();
    assert!(sched.state().is_idle());
    assert_eq!(sched.state().next_deadline_ms, 2 * DAY_MS);
    assert_eq!(venue.placed().len(), 1);
}

#[tokio::test]
async fn test_run_exits_cleanly_once_cap_reached() {
    let venue = Arc::new(MockVenue::new(DAY_MS + 1, dec!(1000)));
    let mut state = RunState::new(2 * DAY_MS);
    state.investment_rounds = 2;
    let (mut sched, _journal) =
        scheduler(&venue, plan(&[("BTC", dec!(100))], 2), state).await;

    let exit = sched.run(std::future::pending()).await;
    assert_eq!(exit, RunExit::RoundCapReached);
    assert_eq!(exit.exit_code(), 0);
}

// ---------------------------------------------------------------------------
// Budget floor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_budget_floor_halts_and_cancels() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(90)));
    let mut state = queued(&["ETH"], DAY_MS);
    state.pending_orders.push(PendingOrder {
        order_id: "mock-resting".into(),
        asset: "BTC".into(),
        placed_at_ms: 0,
    });
    let plan = plan(&[("BTC", dec!(100)), ("ETH", dec!(50))], 0);
    let (mut sched, journal) = scheduler(&venue, plan, state).await;

    let exit = sched.run(std::future::pending()).await;

    assert_eq!(exit, RunExit::BudgetFloor { remaining: dec!(90), floor: dec!(100) });
    assert_ne!(exit.exit_code(), 0);
    assert!(venue.placed().is_empty(), "no order may be placed under the floor");
    assert_eq!(venue.cancelled(), vec!["mock-resting".to_string()]);
    assert!(sched.state().pending_orders.is_empty());
    assert!(sched.state().terminal_error.is_some());
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::BudgetHalt { .. })).await,
        1
    );
    assert!(journal.snapshot().await.terminal_error.is_some());
}

#[tokio::test]
async fn test_balance_exactly_at_floor_keeps_buying() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(100)));
    let (mut sched, _journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    assert_eq!(sched.tick().await.unwrap(), TickOutcome::Continue);
    assert_eq!(venue.placed().len(), 1);
}

// ---------------------------------------------------------------------------
// Shutdown and errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_cancels_pending_orders() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    let (mut sched, journal) = scheduler(&venue, btc_plan(), queued(&["BTC"], DAY_MS)).await;

    let exit = sched.run(async {}).await;

    assert_eq!(exit, RunExit::Shutdown);
    assert_eq!(exit.exit_code(), 0);
    assert_eq!(venue.placed().len(), 1);
    assert_eq!(venue.cancelled(), vec!["mock-1".to_string()]);
    assert!(sched.state().pending_orders.is_empty());
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::CancelOrder { .. })).await,
        1
    );
}

#[tokio::test]
async fn test_tick_error_leaves_state_unchanged() {
    let venue = Arc::new(MockVenue::new(25 * HOUR_MS, dec!(1000)));
    let (mut sched, _journal) = scheduler(&venue, btc_plan(), queued(&["ETH"], DAY_MS)).await;
    let before = sched.state().clone();

    venue.set_time_error(Some("connection reset"));
    assert!(sched.tick().await.is_err());
    assert_eq!(sched.state(), &before);
    assert!(venue.placed().is_empty());

    venue.set_time_error(None);
    assert!(sched.tick().await.is_ok());
}

#[tokio::test]
async fn test_run_survives_failed_tick() {
    let venue = Arc::new(MockVenue::new(HOUR_MS, dec!(1000)));
    venue.set_time_error(Some("timeout"));
    let (mut sched, journal) = scheduler(&venue, btc_plan(), RunState::new(DAY_MS)).await;

    let exit = sched.run(async {}).await;

    assert_eq!(exit, RunExit::Shutdown);
    assert_eq!(
        count_events(&journal, |k| matches!(k, EventKind::ExceptionCaught { .. })).await,
        1
    );
}

// ---------------------------------------------------------------------------
// Bootstrap and simulation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bootstrap_sets_first_deadline() {
    let venue = Arc::new(MockVenue::new(DAY_MS + 5 * HOUR_MS, dec!(1000)));
    let journal = Arc::new(Journal::new());

    let sched = Scheduler::bootstrap(
        venue.clone(),
        btc_plan(),
        journal.clone(),
        SchedulerOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(sched.state().next_deadline_ms, 2 * DAY_MS);
    assert!(sched.state().is_idle());

    let snapshot = journal.snapshot().await;
    assert_eq!(snapshot.ms_remaining, 19 * HOUR_MS);
    assert!(!snapshot.simulation);
}

#[tokio::test]
async fn test_simulated_round_fills_and_debits() {
    let venue = Arc::new(MockVenue::new(DAY_MS + 1, dec!(0)));
    let sim: Arc<dyn Exchange> = Arc::new(SimulatedExchange::new(
        venue.clone(),
        "EUR",
        dec!(1000),
        60_000,
    ));
    let journal = Arc::new(Journal::new());
    let options = SchedulerOptions { simulation: true, log_state_every: 0 };

    // Bootstrap at the boundary's first millisecond: next deadline is day 2.
    let mut sched = Scheduler::bootstrap(sim.clone(), btc_plan(), journal.clone(), options)
        .await
        .unwrap();
    venue.set_time(2 * DAY_MS);
    sched.tick().await.unwrap(); // exactly on the deadline: not yet due
    assert!(sched.state().is_idle());

    venue.advance(1);
    sched.tick().await.unwrap(); // past the deadline → enqueue
    assert!(sched.state().assets_to_buy.contains("BTC"));

    venue.advance(10_000);
    sched.tick().await.unwrap(); // place
    assert!(sched.state().is_pending("BTC"));
    assert!(venue.placed().is_empty(), "simulated orders never reach the venue");

    venue.advance(10_000);
    sched.tick().await.unwrap(); // still open
    assert!(sched.state().is_pending("BTC"));

    venue.advance(60_000);
    sched.tick().await.unwrap(); // filled
    assert!(sched.state().is_idle());

    let balance = sim.account_balance("sim-account-EUR").await.unwrap();
    assert_eq!(balance, dec!(900));
    assert!(journal.snapshot().await.simulation);
}
