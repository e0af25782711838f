//! Configuration management for the arbitrage engine.
//!
//! Loads settings from a `config` file and environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logical symbol this strategy instance trades (quoted on all venues)
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Signal derivation parameters
    #[serde(default)]
    pub signal: SignalConfig,
    /// Opportunity thresholds and risk limits
    #[serde(default)]
    pub opportunity: OpportunityConfig,
    /// Execution strategy parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Hedge / risk manager parameters
    #[serde(default)]
    pub hedge: HedgeConfig,
    /// State machine parameters
    #[serde(default)]
    pub engine: EngineConfig,
    /// Context snapshot persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Signal engine parameters.
///
/// `divergence_threshold` and `pressure_confidence_scale` are heuristics
/// inherited from the strategy's research notebook, kept configurable so
/// they can be recalibrated empirically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Book levels considered for OFI (3-5 is sensible)
    #[serde(default = "default_depth_levels")]
    pub depth_levels: usize,
    /// |OFI| above this classifies as strong pressure
    #[serde(default = "default_strong_pressure_threshold")]
    pub strong_pressure_threshold: Decimal,
    /// Multiplier mapping |OFI| to pressure confidence (clamped to 1)
    #[serde(default = "default_pressure_confidence_scale")]
    pub pressure_confidence_scale: Decimal,
    /// |OFI gap| between venues above this flags a divergence
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: Decimal,
    /// Top-of-book notional that maps to full microprice confidence
    #[serde(default = "default_reference_notional")]
    pub reference_notional: Decimal,
}

/// Opportunity evaluation thresholds. All checks fail closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityConfig {
    /// Minimum cross-venue spread after fees, as a rate on mid
    #[serde(default = "default_min_spread_after_fees")]
    pub min_spread_after_fees: Decimal,
    /// Taker fee rate charged per leg
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: Decimal,
    /// Maximum order size as a fraction of top-level liquidity
    #[serde(default = "default_max_book_fraction")]
    pub max_book_fraction: Decimal,
    /// Absolute per-symbol position cap in quote currency
    #[serde(default = "default_max_symbol_notional")]
    pub max_symbol_notional: Decimal,
    /// Snapshots older than this are treated as missing
    #[serde(default = "default_max_snapshot_age_ms")]
    pub max_snapshot_age_ms: i64,
}

/// Execution strategy selection and order placement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Opportunity confidence above this runs both legs simultaneously
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: Decimal,
    /// Hedge protection level above this allows sequential execution
    #[serde(default = "default_protected_hedge_threshold")]
    pub protected_hedge_threshold: Decimal,
    /// Bounded wait for an improved secondary price (sequential strategy)
    #[serde(default = "default_secondary_wait_secs")]
    pub secondary_wait_secs: u64,
    /// Plans above this notional halve the secondary wait
    #[serde(default = "default_size_pressure_notional")]
    pub size_pressure_notional: Decimal,
    /// Interval between improved-price attempts
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Price improvement per attempt, as a rate on the limit price
    #[serde(default = "default_price_improvement_step")]
    pub price_improvement_step: Decimal,
}

/// Hedge / risk manager parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeConfig {
    /// Net delta (quote value) tolerated outside an uncovered window
    #[serde(default = "default_neutrality_tolerance")]
    pub neutrality_tolerance: Decimal,
    /// Uncovered notional above this opens a temporary hedge ticket
    #[serde(default = "default_hedge_notional_threshold")]
    pub hedge_notional_threshold: Decimal,
    /// Hard bound on uncovered time before permanent-hedge conversion
    #[serde(default = "default_max_uncovered_time_ms")]
    pub max_uncovered_time_ms: u64,
    /// Background delta monitoring interval
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// Interval between rescue re-pricing attempts
    #[serde(default = "default_rescue_retry_interval_ms")]
    pub rescue_retry_interval_ms: u64,
    /// Fraction of the wait budget before the delayed market order fires
    #[serde(default = "default_market_fallback_fraction")]
    pub market_fallback_fraction: Decimal,
    /// Base price improvement per rescue retry (doubles each attempt)
    #[serde(default = "default_rescue_improvement_step")]
    pub rescue_improvement_step: Decimal,
    /// Floor for the volatility estimate (per-tick return stddev)
    #[serde(default = "default_volatility_floor")]
    pub volatility_floor: Decimal,
    /// Mid-price samples kept for the volatility estimate
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
    /// Net exposure (quote value) that raises a position size alert
    #[serde(default = "default_exposure_alert_notional")]
    pub exposure_alert_notional: Decimal,
    /// Risk score boundaries for the Medium / High / Critical bands
    #[serde(default = "default_risk_medium_score")]
    pub risk_medium_score: Decimal,
    #[serde(default = "default_risk_high_score")]
    pub risk_high_score: Decimal,
    #[serde(default = "default_risk_critical_score")]
    pub risk_critical_score: Decimal,
}

/// State machine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pause between decision loop iterations while monitoring
    #[serde(default = "default_decision_interval_ms")]
    pub decision_interval_ms: u64,
    /// Maximum ErrorRecovery attempts before shutting down
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    /// Cadence of periodic context persistence
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
    /// Cadence of the status summary log line
    #[serde(default = "default_status_log_interval_secs")]
    pub status_log_interval_secs: u64,
}

/// Context snapshot persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_depth_levels() -> usize {
    5
}
fn default_strong_pressure_threshold() -> Decimal {
    dec!(0.5)
}
fn default_pressure_confidence_scale() -> Decimal {
    dec!(2)
}
fn default_divergence_threshold() -> Decimal {
    dec!(0.4)
}
fn default_reference_notional() -> Decimal {
    dec!(50000)
}

fn default_min_spread_after_fees() -> Decimal {
    dec!(0.0005)
}
fn default_taker_fee_rate() -> Decimal {
    dec!(0.001)
}
fn default_max_book_fraction() -> Decimal {
    dec!(0.25)
}
fn default_max_symbol_notional() -> Decimal {
    dec!(50000)
}
fn default_max_snapshot_age_ms() -> i64 {
    500
}

fn default_high_confidence_threshold() -> Decimal {
    dec!(0.8)
}
fn default_protected_hedge_threshold() -> Decimal {
    dec!(0.8)
}
fn default_secondary_wait_secs() -> u64 {
    30
}
fn default_size_pressure_notional() -> Decimal {
    dec!(25000)
}
fn default_retry_interval_ms() -> u64 {
    500
}
fn default_price_improvement_step() -> Decimal {
    dec!(0.0002)
}

fn default_neutrality_tolerance() -> Decimal {
    dec!(100)
}
fn default_hedge_notional_threshold() -> Decimal {
    dec!(1000)
}
fn default_max_uncovered_time_ms() -> u64 {
    10_000
}
fn default_monitor_interval_ms() -> u64 {
    100
}
fn default_rescue_retry_interval_ms() -> u64 {
    1_000
}
fn default_market_fallback_fraction() -> Decimal {
    dec!(0.5)
}
fn default_rescue_improvement_step() -> Decimal {
    dec!(0.0002)
}
fn default_volatility_floor() -> Decimal {
    dec!(0.0005)
}
fn default_volatility_window() -> usize {
    120
}
fn default_exposure_alert_notional() -> Decimal {
    dec!(20000)
}
fn default_risk_medium_score() -> Decimal {
    dec!(5)
}
fn default_risk_high_score() -> Decimal {
    dec!(20)
}
fn default_risk_critical_score() -> Decimal {
    dec!(50)
}

fn default_decision_interval_ms() -> u64 {
    100
}
fn default_max_recovery_attempts() -> u32 {
    3
}
fn default_persist_interval_secs() -> u64 {
    30
}
fn default_status_log_interval_secs() -> u64 {
    300
}

fn default_db_path() -> String {
    "data/context.db".to_string()
}

impl Config {
    /// Load configuration from `config.{toml,yaml,...}` and `DARB`-prefixed
    /// environment variables (e.g. `DARB__HEDGE__MONITOR_INTERVAL_MS`).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("DARB"))
            .build()
            .context("Failed to build configuration")?;

        let config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (3..=5).contains(&self.signal.depth_levels),
            "depth_levels must be between 3 and 5"
        );

        anyhow::ensure!(
            self.signal.strong_pressure_threshold > Decimal::ZERO
                && self.signal.strong_pressure_threshold < Decimal::ONE,
            "strong_pressure_threshold must be in (0, 1)"
        );

        anyhow::ensure!(
            self.signal.divergence_threshold > Decimal::ZERO
                && self.signal.divergence_threshold < Decimal::TWO,
            "divergence_threshold must be in (0, 2)"
        );

        anyhow::ensure!(
            self.opportunity.max_book_fraction > Decimal::ZERO
                && self.opportunity.max_book_fraction <= Decimal::ONE,
            "max_book_fraction must be in (0, 1]"
        );

        anyhow::ensure!(
            self.hedge.market_fallback_fraction > Decimal::ZERO
                && self.hedge.market_fallback_fraction < Decimal::ONE,
            "market_fallback_fraction must be in (0, 1)"
        );

        anyhow::ensure!(
            self.hedge.risk_medium_score < self.hedge.risk_high_score
                && self.hedge.risk_high_score < self.hedge.risk_critical_score,
            "risk band scores must be strictly increasing"
        );

        anyhow::ensure!(
            self.hedge.monitor_interval_ms > 0
                && self.hedge.monitor_interval_ms < self.hedge.max_uncovered_time_ms,
            "monitor_interval_ms must be positive and below max_uncovered_time_ms"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            signal: SignalConfig::default(),
            opportunity: OpportunityConfig::default(),
            execution: ExecutionConfig::default(),
            hedge: HedgeConfig::default(),
            engine: EngineConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            depth_levels: default_depth_levels(),
            strong_pressure_threshold: default_strong_pressure_threshold(),
            pressure_confidence_scale: default_pressure_confidence_scale(),
            divergence_threshold: default_divergence_threshold(),
            reference_notional: default_reference_notional(),
        }
    }
}

impl Default for OpportunityConfig {
    fn default() -> Self {
        Self {
            min_spread_after_fees: default_min_spread_after_fees(),
            taker_fee_rate: default_taker_fee_rate(),
            max_book_fraction: default_max_book_fraction(),
            max_symbol_notional: default_max_symbol_notional(),
            max_snapshot_age_ms: default_max_snapshot_age_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: default_high_confidence_threshold(),
            protected_hedge_threshold: default_protected_hedge_threshold(),
            secondary_wait_secs: default_secondary_wait_secs(),
            size_pressure_notional: default_size_pressure_notional(),
            retry_interval_ms: default_retry_interval_ms(),
            price_improvement_step: default_price_improvement_step(),
        }
    }
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            neutrality_tolerance: default_neutrality_tolerance(),
            hedge_notional_threshold: default_hedge_notional_threshold(),
            max_uncovered_time_ms: default_max_uncovered_time_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
            rescue_retry_interval_ms: default_rescue_retry_interval_ms(),
            market_fallback_fraction: default_market_fallback_fraction(),
            rescue_improvement_step: default_rescue_improvement_step(),
            volatility_floor: default_volatility_floor(),
            volatility_window: default_volatility_window(),
            exposure_alert_notional: default_exposure_alert_notional(),
            risk_medium_score: default_risk_medium_score(),
            risk_high_score: default_risk_high_score(),
            risk_critical_score: default_risk_critical_score(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_interval_ms: default_decision_interval_ms(),
            max_recovery_attempts: default_max_recovery_attempts(),
            persist_interval_secs: default_persist_interval_secs(),
            status_log_interval_secs: default_status_log_interval_secs(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
