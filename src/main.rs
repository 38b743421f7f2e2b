//! DCA bot — recurring limit-buy scheduler
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the event history from disk, and runs the scheduler loop
//! with graceful shutdown.

use anyhow::{bail, Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use dca_bot::config;
use dca_bot::dashboard;
use dca_bot::dashboard::routes::DashboardState;
use dca_bot::engine::journal::Journal;
use dca_bot::engine::scheduler::{RunExit, Scheduler, SchedulerOptions};
use dca_bot::exchange::coinbase::CoinbaseClient;
use dca_bot::exchange::simulated::SimulatedExchange;
use dca_bot::exchange::Exchange;
use dca_bot::storage;

const BANNER: &str = r#"
 ____   ____    _
|  _ \ / ___|  / \
| | | | |     / _ \
| |_| | |___ / ___ \
|____/ \____/_/   \_\

  Dollar-Cost Averaging limit-buy scheduler
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");

    let plan = Arc::new(cfg.plan()?);
    info!(
        agent_name = %cfg.agent.name,
        base_currency = %plan.base_currency,
        assets = ?plan.amounts,
        period_ms = plan.calendar.period_ms(),
        cancel_after = %plan.cancel_after,
        min_base_balance = %plan.min_base_balance,
        max_investment_rounds = plan.max_investment_rounds,
        simulation = cfg.agent.simulation,
        "DCA bot starting up"
    );

    // -- Venue -----------------------------------------------------------

    let credentials = cfg.credentials();
    if credentials.is_none() {
        if cfg.agent.simulation {
            warn!("No venue credentials configured, using public market data only");
        } else {
            bail!(
                "Venue credentials missing: set {}, {} and {}",
                cfg.exchange.api_key_env,
                cfg.exchange.api_secret_env,
                cfg.exchange.passphrase_env
            );
        }
    }

    let live: Arc<dyn Exchange> =
        Arc::new(CoinbaseClient::new(cfg.exchange.api_url.clone(), credentials)?);

    let exchange: Arc<dyn Exchange> = if cfg.agent.simulation {
        Arc::new(SimulatedExchange::new(
            live,
            &plan.base_currency,
            cfg.simulation.starting_balance,
            cfg.simulated_fill_after_ms()?,
        ))
    } else {
        live
    };

    // -- Event history ---------------------------------------------------

    let journal = match cfg.agent.history_file.as_deref() {
        Some(path) => match storage::load_history(path)? {
            Some(events) => Arc::new(Journal::with_history(events)),
            None => Arc::new(Journal::new()),
        },
        None => Arc::new(Journal::new()),
    };

    // -- Scheduler -------------------------------------------------------

    let options = SchedulerOptions {
        simulation: cfg.agent.simulation,
        log_state_every: cfg.agent.log_state_every,
    };
    let mut scheduler = Scheduler::bootstrap(exchange, plan.clone(), journal.clone(), options)
        .await
        .context("Failed to initialise scheduler")?;

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(journal.clone(), plan.clone()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port);
    }

    // Register the signal handler before the first tick.
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });
    let shutdown = async move {
        if shutdown_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let exit = scheduler.run(shutdown).await;

    if let Some(path) = cfg.agent.history_file.as_deref() {
        if let Err(e) = storage::save_history(&journal.events().await, path) {
            error!(error = %e, "Failed to save history");
        }
    }

    match exit {
        RunExit::BudgetFloor { remaining, floor } => {
            error!(
                remaining = %remaining,
                floor = %floor,
                "Budget floor breached. DCA bot stopped."
            );
        }
        RunExit::RoundCapReached | RunExit::Shutdown => {
            info!(
                rounds = scheduler.state().investment_rounds,
                events = journal.len().await,
                "DCA bot shut down cleanly."
            );
        }
    }

    Ok(ExitCode::from(exit.exit_code()))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dca_bot=info"));

    let json_logging = std::env::var("DCA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
