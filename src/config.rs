//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. Duration strings ("1d",
//! "10s") are resolved once, when the `InvestmentPlan` is built.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use crate::clock::PeriodCalendar;
use crate::exchange::coinbase::Credentials;
use crate::types::CancelAfter;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub exchange: ExchangeConfig,
    pub plan: PlanConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Fill orders synthetically instead of sending them to the venue.
    #[serde(default)]
    pub simulation: bool,
    /// Log a state summary every N ticks (0 disables).
    #[serde(default = "default_log_state_every")]
    pub log_state_every: u64,
    /// Where the event log is persisted between runs.
    #[serde(default)]
    pub history_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    pub api_key_env: String,
    pub api_secret_env: String,
    pub passphrase_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlanConfig {
    pub base_currency: String,
    /// Anchor of the period calendar (RFC 3339).
    pub origin: DateTime<Utc>,
    /// Investment period, e.g. "1d", "4h", "1w".
    pub period: String,
    /// Sleep between ticks, e.g. "10s".
    pub loop_interval: String,
    pub cancel_after: CancelAfter,
    /// Base-currency balance under which the bot stops for good.
    pub min_base_balance: Decimal,
    /// Number of completed rounds after which no new round starts (0 = unlimited).
    #[serde(default)]
    pub max_investment_rounds: u64,
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,
    #[serde(default = "default_size_decimals")]
    pub size_decimals: u32,
    /// Asset symbol → spend per round, in base currency.
    pub amounts: BTreeMap<String, Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    #[serde(default = "default_fill_after")]
    pub fill_after: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            fill_after: default_fill_after(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 3000,
        }
    }
}

fn default_log_state_every() -> u64 {
    10
}

fn default_price_decimals() -> u32 {
    2
}

fn default_size_decimals() -> u32 {
    8
}

fn default_starting_balance() -> Decimal {
    Decimal::from(1000)
}

fn default_fill_after() -> String {
    "10s".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Venue credentials, if all three variables are set.
    pub fn credentials(&self) -> Option<Credentials> {
        let api_key = Self::resolve_env(&self.exchange.api_key_env).ok()?;
        let api_secret = Self::resolve_env(&self.exchange.api_secret_env).ok()?;
        let passphrase = Self::resolve_env(&self.exchange.passphrase_env).ok()?;
        Some(Credentials {
            api_key,
            api_secret: SecretString::new(api_secret),
            passphrase: SecretString::new(passphrase),
        })
    }

    /// Validate the `[plan]` section and resolve it into an `InvestmentPlan`.
    pub fn plan(&self) -> Result<InvestmentPlan> {
        let p = &self.plan;

        if p.amounts.is_empty() {
            bail!("plan.amounts must name at least one asset");
        }
        if let Some((asset, amount)) = p.amounts.iter().find(|(_, a)| **a <= Decimal::ZERO) {
            bail!("plan.amounts.{asset} must be positive, got {amount}");
        }
        if p.min_base_balance < Decimal::ZERO {
            bail!("plan.min_base_balance must not be negative");
        }
        if p.base_currency.trim().is_empty() {
            bail!("plan.base_currency must not be empty");
        }

        let period = parse_duration(&p.period).context("plan.period")?;
        let loop_interval = parse_duration(&p.loop_interval).context("plan.loop_interval")?;

        Ok(InvestmentPlan {
            amounts: p.amounts.clone(),
            base_currency: p.base_currency.clone(),
            calendar: PeriodCalendar::new(p.origin.timestamp_millis(), duration_ms(period)),
            loop_interval,
            cancel_after: p.cancel_after,
            min_base_balance: p.min_base_balance,
            max_investment_rounds: p.max_investment_rounds,
            price_decimals: p.price_decimals,
            size_decimals: p.size_decimals,
        })
    }

    /// Simulated fill delay in ms.
    pub fn simulated_fill_after_ms(&self) -> Result<i64> {
        let d = parse_duration(&self.simulation.fill_after).context("simulation.fill_after")?;
        Ok(duration_ms(d))
    }
}

/// Upper bound for any configured duration: 100 years.
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Parse `<positive integer><unit>` where unit is one of s, m, h, d, w.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let Some(unit) = raw.chars().last() else {
        bail!("empty duration");
    };
    let number = &raw[..raw.len() - unit.len_utf8()];

    let unit_secs: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        'w' => 7 * 24 * 60 * 60,
        other => bail!("{other} not recognized as a duration unit in {raw:?}"),
    };
    let count: u64 = number
        .parse()
        .with_context(|| format!("invalid duration {raw:?}"))?;
    if count == 0 {
        bail!("duration {raw:?} must be positive");
    }

    let secs = count
        .checked_mul(unit_secs)
        .filter(|s| *s <= MAX_DURATION_SECS)
        .with_context(|| format!("duration {raw:?} exceeds 100 years"))?;

    Ok(Duration::from_secs(secs))
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Investment plan
// ---------------------------------------------------------------------------

/// Immutable, validated plan for the whole run.
#[derive(Debug, Clone)]
pub struct InvestmentPlan {
    pub amounts: BTreeMap<String, Decimal>,
    pub base_currency: String,
    pub calendar: PeriodCalendar,
    pub loop_interval: Duration,
    pub cancel_after: CancelAfter,
    pub min_base_balance: Decimal,
    pub max_investment_rounds: u64,
    pub price_decimals: u32,
    pub size_decimals: u32,
}

impl InvestmentPlan {
    /// Market id for an asset, e.g. `BTC` → `BTC-EUR`.
    pub fn market(&self, asset: &str) -> String {
        format!("{asset}-{}", self.base_currency)
    }

    pub fn amount(&self, asset: &str) -> Option<Decimal> {
        self.amounts.get(asset).copied()
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.amounts.keys().map(String::as_str)
    }

    pub fn round_cap_active(&self) -> bool {
        self.max_investment_rounds > 0
    }
}
