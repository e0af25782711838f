//! The arbitrage state machine.
//!
//! Top-level controller: one async handler per state, pure transition
//! decisions, immutable context published through a watch channel. The
//! components it drives are constructed independently and injected here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Config, EngineConfig};
use crate::persistence::ContextSink;
use crate::risk::{HedgeRiskManager, RemediationOutcome};
use crate::signal::{DivergenceDetector, DivergenceSignal, Signal, SignalEngine};
use crate::strategy::{
    ExecutionPlan, ExecutionStatus, ExecutionStrategySelector, Opportunity, OpportunityEvaluator,
    OrderExecutor,
};
use crate::venue::{BalanceOracle, MarketSnapshot, OrderIntent, SnapshotSource, Venue};

use super::alerts::{publish, AlertBus, AlertEvent};
use super::context::{StrategyContext, StrategySnapshot};
use super::state::ArbState;

/// How an uncovered window was resolved, from the machine's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeResolution {
    Rescued,
    Converted,
    Emergency,
    Escalated,
}

/// Events produced by the state handlers and fed to the transition table.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started,
    DeltaNeutralConfirmed,
    SnapshotsReady,
    OpportunityFound,
    NoOpportunity,
    PlanReady,
    PlanRejected,
    ExecutionDone {
        status: ExecutionStatus,
        realized_edge: Decimal,
    },
    HedgeResolved(HedgeResolution),
    NeutralityDrift,
    RecoverySucceeded,
    RecoveryFailed,
    FatalError,
    ShutdownRequested,
}

/// The pure transition function: `(context, event) -> (context, state)`.
///
/// No clock, no I/O; applying the same pair twice produces the same result,
/// which is what makes crash-recovery replay safe.
pub fn transition(
    config: &EngineConfig,
    context: &StrategyContext,
    event: &Event,
) -> (StrategyContext, ArbState) {
    use ArbState::*;

    // Rules that apply from any state.
    match event {
        Event::ShutdownRequested => {
            return (context.with_state(Shutdown), Shutdown);
        }
        Event::FatalError => {
            let updated = context.with_error().with_state(ErrorRecovery);
            return (updated, ErrorRecovery);
        }
        _ => {}
    }

    let next = match (context.state, event) {
        (Initializing, Event::Started) => EstablishingDeltaNeutral,
        (EstablishingDeltaNeutral, Event::DeltaNeutralConfirmed) => DeltaNeutralActive,
        (DeltaNeutralActive, Event::SnapshotsReady) => MonitoringSpreads,
        (DeltaNeutralActive, Event::NoOpportunity) => DeltaNeutralActive,
        (MonitoringSpreads, Event::NoOpportunity) => MonitoringSpreads,
        (MonitoringSpreads, Event::NeutralityDrift) => DeltaNeutralActive,
        (MonitoringSpreads, Event::OpportunityFound) => PreparingArbitrage,
        (PreparingArbitrage, Event::PlanReady) => ExecutingArbitrage,
        (PreparingArbitrage, Event::PlanRejected) => MonitoringSpreads,
        (ExecutingArbitrage, Event::ExecutionDone { status, .. }) => match status {
            ExecutionStatus::PartialUncovered => RebalancingDelta,
            ExecutionStatus::Completed | ExecutionStatus::Aborted => MonitoringSpreads,
        },
        (RebalancingDelta, Event::HedgeResolved(resolution)) => match resolution {
            HedgeResolution::Escalated => ErrorRecovery,
            _ => MonitoringSpreads,
        },
        (RebalancingDelta, Event::NoOpportunity) => MonitoringSpreads,
        (ErrorRecovery, Event::RecoverySucceeded) => DeltaNeutralActive,
        (ErrorRecovery, Event::RecoveryFailed) => {
            if context.recovery_attempts + 1 >= config.max_recovery_attempts {
                Shutdown
            } else {
                ErrorRecovery
            }
        }
        (state, event) => {
            warn!(%state, ?event, "Unhandled event for state, staying put");
            state
        }
    };

    let updated = match event {
        Event::OpportunityFound => context.with_opportunity(),
        Event::ExecutionDone {
            status: ExecutionStatus::Completed,
            realized_edge,
        } => context.with_trade(*realized_edge),
        Event::HedgeResolved(HedgeResolution::Rescued) => context.with_rescue(),
        Event::HedgeResolved(HedgeResolution::Converted | HedgeResolution::Emergency) => {
            context.with_hedge_conversion()
        }
        Event::HedgeResolved(HedgeResolution::Escalated) => context.with_error(),
        Event::RecoveryFailed => context.with_recovery_attempt(),
        Event::RecoverySucceeded => context.with_recovery_reset(),
        _ => context.clone(),
    };

    (updated.with_state(next), next)
}

/// Requests a cooperative shutdown of the machine loop.
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        let _ = self.tx.send(true);
    }
}

/// Top-level controller owning the session context.
pub struct ArbitrageStateMachine {
    config: Config,
    signal_engine: SignalEngine,
    detector: DivergenceDetector,
    evaluator: OpportunityEvaluator,
    selector: ExecutionStrategySelector,
    executor: OrderExecutor,
    risk: Arc<HedgeRiskManager>,
    sources: HashMap<Venue, Arc<dyn SnapshotSource>>,
    oracles: HashMap<Venue, Arc<dyn BalanceOracle>>,
    sink: Arc<dyn ContextSink>,
    alerts: AlertBus,

    context_tx: watch::Sender<StrategyContext>,
    context_rx: watch::Receiver<StrategyContext>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,

    streams: HashMap<Venue, mpsc::Receiver<MarketSnapshot>>,
    books: HashMap<Venue, MarketSnapshot>,
    signals: HashMap<Venue, Signal>,
    pending_opportunity: Option<Opportunity>,
    pending_plan: Option<ExecutionPlan>,
    pending_missing: Option<(OrderIntent, Decimal)>,
    last_persist: Instant,
    last_status_log: Instant,
}

impl ArbitrageStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        signal_engine: SignalEngine,
        detector: DivergenceDetector,
        evaluator: OpportunityEvaluator,
        selector: ExecutionStrategySelector,
        executor: OrderExecutor,
        risk: Arc<HedgeRiskManager>,
        sources: HashMap<Venue, Arc<dyn SnapshotSource>>,
        oracles: HashMap<Venue, Arc<dyn BalanceOracle>>,
        sink: Arc<dyn ContextSink>,
        alerts: AlertBus,
    ) -> Self {
        let (context_tx, context_rx) = watch::channel(StrategyContext::new(&config.symbol));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            signal_engine,
            detector,
            evaluator,
            selector,
            executor,
            risk,
            sources,
            oracles,
            sink,
            alerts,
            context_tx,
            context_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            streams: HashMap::new(),
            books: HashMap::new(),
            signals: HashMap::new(),
            pending_opportunity: None,
            pending_plan: None,
            pending_missing: None,
            last_persist: Instant::now(),
            last_status_log: Instant::now(),
        }
    }

    /// Current status; safe to poll concurrently with the running loop.
    pub fn status(&self) -> StrategySnapshot {
        StrategySnapshot::from(&*self.context_rx.borrow())
    }

    /// Watch the full session context.
    pub fn context_watch(&self) -> watch::Receiver<StrategyContext> {
        self.context_rx.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Drive the machine until `Shutdown` completes.
    pub async fn run(&mut self) -> Result<()> {
        let mut context = self.context_rx.borrow().clone();
        info!(symbol = %self.config.symbol, "State machine starting");

        loop {
            if *self.shutdown_rx.borrow() && context.state != ArbState::Shutdown {
                context = self.apply(context, Event::ShutdownRequested);
            }

            if context.state == ArbState::Shutdown {
                self.finish_shutdown(&mut context).await;
                break;
            }

            let event = match context.state {
                ArbState::Initializing => self.handle_initializing().await,
                ArbState::EstablishingDeltaNeutral => self.handle_establishing().await,
                ArbState::DeltaNeutralActive => self.handle_active().await,
                ArbState::MonitoringSpreads => self.handle_monitoring().await,
                ArbState::PreparingArbitrage => self.handle_preparing().await,
                ArbState::ExecutingArbitrage => self.handle_executing().await,
                ArbState::RebalancingDelta => self.handle_rebalancing().await,
                ArbState::ErrorRecovery => self.handle_recovery().await,
                ArbState::Shutdown => unreachable!("shutdown handled above"),
            };

            context = self.apply(context, event);
            context = context
                .with_positions(self.risk.snapshot())
                .touched(Utc::now());
            let _ = self.context_tx.send(context.clone());

            self.maybe_persist(&context);
            self.maybe_log_status(&context);
        }

        info!("State machine stopped");
        Ok(())
    }

    /// The <5ms decision step: pure transition plus transition reporting.
    fn apply(&self, context: StrategyContext, event: Event) -> StrategyContext {
        let (new_context, next) = transition(&self.config.engine, &context, &event);
        if next != context.state {
            info!(from = %context.state, to = %next, event = ?event, "State transition");
            publish(
                &self.alerts,
                AlertEvent::StateTransition {
                    from: context.state,
                    to: next,
                    at: Utc::now(),
                },
            );
        }
        new_context
    }

    async fn handle_initializing(&mut self) -> Event {
        for (venue, source) in &self.sources {
            match source.subscribe(&self.config.symbol).await {
                Ok(rx) => {
                    self.streams.insert(*venue, rx);
                    debug!(%venue, "Subscribed to snapshot feed");
                }
                Err(e) => {
                    error!(%venue, error = %e, "Snapshot subscription failed");
                    return Event::FatalError;
                }
            }
        }
        Event::Started
    }

    /// Fresh balance probes and a derivatives-leg adjustment if the book
    /// starts off-neutral (e.g. restored from a crashed session).
    async fn handle_establishing(&mut self) -> Event {
        let quote = quote_asset(&self.config.symbol);
        for (venue, oracle) in &self.oracles {
            match oracle.get_balance(*venue, quote).await {
                Ok(balance) => {
                    debug!(%venue, asset = quote, free = %balance.free, "Balance probe")
                }
                Err(e) => {
                    error!(%venue, error = %e, "Balance probe failed");
                    return Event::FatalError;
                }
            }
        }

        self.pump_snapshots();
        let snapshot = self.risk.snapshot();
        if snapshot.net_delta_value.abs() <= self.config.hedge.neutrality_tolerance {
            return Event::DeltaNeutralConfirmed;
        }

        let Some(mark) = self.reference_mid() else {
            error!("Off-neutral with no mark price available");
            return Event::FatalError;
        };
        match self.risk.restore_neutrality(mark).await {
            Ok(()) => Event::DeltaNeutralConfirmed,
            Err(e) => {
                error!(error = %e, "Failed to restore neutrality");
                Event::FatalError
            }
        }
    }

    /// Wait for books on every venue before trading.
    async fn handle_active(&mut self) -> Event {
        self.pump_snapshots();
        let ready = Venue::spot_venues()
            .iter()
            .all(|v| self.books.contains_key(v));
        if ready {
            Event::SnapshotsReady
        } else {
            sleep(self.decision_interval()).await;
            Event::NoOpportunity
        }
    }

    async fn handle_monitoring(&mut self) -> Event {
        self.pump_snapshots();

        let snapshot = self.risk.snapshot();
        if !snapshot.uncovered
            && snapshot.net_delta_value.abs() > self.config.hedge.neutrality_tolerance
        {
            warn!(
                net_delta_value = %snapshot.net_delta_value,
                "Delta drift detected while monitoring"
            );
            return Event::NeutralityDrift;
        }

        let [venue_a, venue_b] = Venue::spot_venues();
        if let (Some(sig_a), Some(sig_b)) = (self.signals.get(&venue_a), self.signals.get(&venue_b))
        {
            match self.detector.evaluate(sig_a, sig_b) {
                Ok(DivergenceSignal::None) => {}
                Ok(divergence @ DivergenceSignal::Directional { .. }) => {
                    let current_notional = self
                        .reference_mid()
                        .map(|mid| snapshot.symbol_notional(&self.config.symbol, mid))
                        .unwrap_or(Decimal::ZERO);
                    if let Some(opportunity) = self.evaluator.evaluate(
                        &divergence,
                        &self.books,
                        current_notional,
                        Utc::now(),
                    ) {
                        info!(
                            symbol = %opportunity.symbol,
                            buy = %opportunity.buy_venue,
                            sell = %opportunity.sell_venue,
                            expected_profit = %opportunity.expected_profit,
                            confidence = %opportunity.confidence,
                            "Opportunity detected"
                        );
                        self.pending_opportunity = Some(opportunity);
                        // Signals are consumed with the opportunity; a new
                        // one needs fresh snapshots.
                        self.signals.clear();
                        return Event::OpportunityFound;
                    }
                }
                Err(e) => {
                    // Mismatched signal pair is a wiring bug, not noise.
                    error!(error = %e, "Divergence evaluation failed");
                    return Event::FatalError;
                }
            }
        }

        sleep(self.decision_interval()).await;
        Event::NoOpportunity
    }

    async fn handle_preparing(&mut self) -> Event {
        match self.pending_opportunity.take() {
            Some(opportunity) => {
                let protection = self.risk.snapshot().hedge_protection_level;
                let plan = self.selector.select(&opportunity, protection);
                self.pending_plan = Some(plan);
                Event::PlanReady
            }
            None => Event::PlanRejected,
        }
    }

    async fn handle_executing(&mut self) -> Event {
        let Some(plan) = self.pending_plan.take() else {
            return Event::ExecutionDone {
                status: ExecutionStatus::Aborted,
                realized_edge: Decimal::ZERO,
            };
        };

        match self.executor.execute(&plan).await {
            Ok(outcome) => {
                for fill in &outcome.fills {
                    self.risk.apply_fill(fill);
                }
                if let Some(missing) = outcome.missing_leg {
                    let reference = outcome
                        .fills
                        .first()
                        .map(|f| f.price)
                        .or(missing.price)
                        .unwrap_or(Decimal::ZERO);
                    self.pending_missing = Some((missing, reference));
                }
                Event::ExecutionDone {
                    status: outcome.status,
                    realized_edge: outcome.realized_edge,
                }
            }
            Err(e) => {
                error!(error = %e, "Execution failed fatally");
                Event::FatalError
            }
        }
    }

    async fn handle_rebalancing(&mut self) -> Event {
        let Some((missing, reference_price)) = self.pending_missing.take() else {
            return Event::NoOpportunity;
        };

        let outcome = self.risk.handle_uncovered(missing, reference_price).await;
        let resolution = match outcome {
            RemediationOutcome::Rescued { .. } => HedgeResolution::Rescued,
            RemediationOutcome::ConvertedToPermanent { .. } => HedgeResolution::Converted,
            RemediationOutcome::EmergencyHedged { .. } => HedgeResolution::Emergency,
            RemediationOutcome::Escalated { .. } => HedgeResolution::Escalated,
        };
        Event::HedgeResolved(resolution)
    }

    /// Probe every venue with fresh balance calls before resuming.
    async fn handle_recovery(&mut self) -> Event {
        let quote = quote_asset(&self.config.symbol);
        for (venue, oracle) in &self.oracles {
            if let Err(e) = oracle.get_balance(*venue, quote).await {
                warn!(%venue, error = %e, "Venue still unreachable during recovery");
                sleep(self.decision_interval()).await;
                return Event::RecoveryFailed;
            }
        }
        info!("All venues reachable again");
        Event::RecoverySucceeded
    }

    async fn finish_shutdown(&mut self, context: &mut StrategyContext) {
        info!("Shutting down: resolving hedge tickets");
        let escalated = self.risk.shutdown().await;
        if !escalated.is_empty() {
            warn!(
                count = escalated.len(),
                "Tickets escalated to manual intervention at shutdown"
            );
        }

        *context = context
            .with_positions(self.risk.snapshot())
            .touched(Utc::now());
        let _ = self.context_tx.send(context.clone());
        if let Err(e) = self.sink.persist_context(context) {
            warn!(error = %e, "Failed to persist final context");
        }
    }

    /// Drain all snapshot streams, dropping out-of-order updates and
    /// recomputing signals per venue.
    fn pump_snapshots(&mut self) {
        let mut incoming: Vec<MarketSnapshot> = Vec::new();
        for rx in self.streams.values_mut() {
            while let Ok(snapshot) = rx.try_recv() {
                incoming.push(snapshot);
            }
        }
        for snapshot in incoming {
            self.ingest(snapshot);
        }
    }

    fn ingest(&mut self, snapshot: MarketSnapshot) {
        let venue = snapshot.venue;
        if let Some(current) = self.books.get(&venue) {
            if snapshot.sequence <= current.sequence {
                debug!(
                    %venue,
                    current = current.sequence,
                    incoming = snapshot.sequence,
                    "Dropping out-of-order snapshot"
                );
                return;
            }
            match self.signal_engine.compute_signals(&snapshot, current) {
                Ok(signal) => {
                    self.signals.insert(venue, signal);
                }
                Err(e) => {
                    // Fail closed: no signal for this venue this round.
                    warn!(%venue, error = %e, "Signal computation failed");
                    self.signals.remove(&venue);
                }
            }
        }
        if let Some(mid) = snapshot.mid_price() {
            self.risk.mark_price(&snapshot.symbol, mid);
        }
        self.books.insert(venue, snapshot);
    }

    /// A reference mid price: the hedge venue's book if present, else any.
    fn reference_mid(&self) -> Option<Decimal> {
        self.books
            .get(&Venue::hedge_venue())
            .and_then(MarketSnapshot::mid_price)
            .or_else(|| self.books.values().find_map(MarketSnapshot::mid_price))
    }

    fn decision_interval(&self) -> Duration {
        Duration::from_millis(self.config.engine.decision_interval_ms)
    }

    fn maybe_persist(&mut self, context: &StrategyContext) {
        let interval = Duration::from_secs(self.config.engine.persist_interval_secs);
        if self.last_persist.elapsed() >= interval {
            if let Err(e) = self.sink.persist_context(context) {
                warn!(error = %e, "Context persistence failed");
            }
            self.last_persist = Instant::now();
        }
    }

    fn maybe_log_status(&mut self, context: &StrategyContext) {
        let interval = Duration::from_secs(self.config.engine.status_log_interval_secs);
        if self.last_status_log.elapsed() >= interval {
            info!(
                state = %context.state,
                trades = context.total_trades,
                opportunities = context.opportunities_seen,
                rescues = context.rescues,
                conversions = context.hedge_conversions,
                errors = context.errors,
                realized_pnl = %context.realized_pnl,
                net_delta_value = %context.positions.net_delta_value,
                "Session status"
            );
            self.last_status_log = Instant::now();
        }
    }
}

fn quote_asset(symbol: &str) -> &str {
    symbol
        .rfind("USDT")
        .filter(|idx| idx + 4 == symbol.len())
        .map(|_| "USDT")
        .unwrap_or("USD")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ctx(state: ArbState) -> StrategyContext {
        StrategyContext::new("BTCUSDT").with_state(state)
    }

    fn engine_config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_happy_path_transitions() {
        let config = engine_config();
        let steps = [
            (ArbState::Initializing, Event::Started, ArbState::EstablishingDeltaNeutral),
            (
                ArbState::EstablishingDeltaNeutral,
                Event::DeltaNeutralConfirmed,
                ArbState::DeltaNeutralActive,
            ),
            (
                ArbState::DeltaNeutralActive,
                Event::SnapshotsReady,
                ArbState::MonitoringSpreads,
            ),
            (
                ArbState::MonitoringSpreads,
                Event::OpportunityFound,
                ArbState::PreparingArbitrage,
            ),
            (ArbState::PreparingArbitrage, Event::PlanReady, ArbState::ExecutingArbitrage),
        ];
        for (state, event, expected) in steps {
            let (_, next) = transition(&config, &ctx(state), &event);
            assert_eq!(next, expected, "from {state} on {event:?}");
        }
    }

    #[test]
    fn test_completed_execution_counts_trade() {
        let config = engine_config();
        let event = Event::ExecutionDone {
            status: ExecutionStatus::Completed,
            realized_edge: dec!(2.5),
        };
        let (context, next) = transition(&config, &ctx(ArbState::ExecutingArbitrage), &event);
        assert_eq!(next, ArbState::MonitoringSpreads);
        assert_eq!(context.total_trades, 1);
        assert_eq!(context.realized_pnl, dec!(2.5));
    }

    #[test]
    fn test_partial_execution_goes_to_rebalancing() {
        let config = engine_config();
        let event = Event::ExecutionDone {
            status: ExecutionStatus::PartialUncovered,
            realized_edge: Decimal::ZERO,
        };
        let (context, next) = transition(&config, &ctx(ArbState::ExecutingArbitrage), &event);
        assert_eq!(next, ArbState::RebalancingDelta);
        assert_eq!(context.total_trades, 0);
    }

    #[test]
    fn test_fatal_error_from_any_state() {
        let config = engine_config();
        for state in [
            ArbState::Initializing,
            ArbState::DeltaNeutralActive,
            ArbState::MonitoringSpreads,
            ArbState::ExecutingArbitrage,
            ArbState::RebalancingDelta,
        ] {
            let (context, next) = transition(&config, &ctx(state), &Event::FatalError);
            assert_eq!(next, ArbState::ErrorRecovery);
            assert_eq!(context.errors, 1);
        }
    }

    #[test]
    fn test_shutdown_from_any_state() {
        let config = engine_config();
        for state in [
            ArbState::Initializing,
            ArbState::MonitoringSpreads,
            ArbState::ErrorRecovery,
        ] {
            let (_, next) = transition(&config, &ctx(state), &Event::ShutdownRequested);
            assert_eq!(next, ArbState::Shutdown);
        }
    }

    #[test]
    fn test_recovery_exhaustion_shuts_down() {
        let config = engine_config();
        let mut context = ctx(ArbState::ErrorRecovery);

        for _ in 0..config.max_recovery_attempts - 1 {
            let (updated, next) = transition(&config, &context, &Event::RecoveryFailed);
            assert_eq!(next, ArbState::ErrorRecovery);
            context = updated;
        }
        let (_, next) = transition(&config, &context, &Event::RecoveryFailed);
        assert_eq!(next, ArbState::Shutdown);
    }

    #[test]
    fn test_recovery_success_resets_attempts() {
        let config = engine_config();
        let context = ctx(ArbState::ErrorRecovery).with_recovery_attempt();
        let (updated, next) = transition(&config, &context, &Event::RecoverySucceeded);
        assert_eq!(next, ArbState::DeltaNeutralActive);
        assert_eq!(updated.recovery_attempts, 0);
    }

    #[test]
    fn test_transition_is_idempotent() {
        // Replaying the same (context, event) after crash recovery must
        // land in the same place.
        let config = engine_config();
        let context = ctx(ArbState::ExecutingArbitrage).with_opportunity();
        let event = Event::ExecutionDone {
            status: ExecutionStatus::Completed,
            realized_edge: dec!(1.25),
        };

        let (first_ctx, first_state) = transition(&config, &context, &event);
        let (second_ctx, second_state) = transition(&config, &context, &event);

        assert_eq!(first_state, second_state);
        assert_eq!(first_ctx, second_ctx);
    }

    #[test]
    fn test_escalated_hedge_goes_to_recovery() {
        let config = engine_config();
        let (context, next) = transition(
            &config,
            &ctx(ArbState::RebalancingDelta),
            &Event::HedgeResolved(HedgeResolution::Escalated),
        );
        assert_eq!(next, ArbState::ErrorRecovery);
        assert_eq!(context.errors, 1);
    }

    #[test]
    fn test_unknown_pair_stays_put() {
        let config = engine_config();
        let (_, next) = transition(&config, &ctx(ArbState::MonitoringSpreads), &Event::PlanReady);
        assert_eq!(next, ArbState::MonitoringSpreads);
    }

    #[test]
    fn test_quote_asset_extraction() {
        assert_eq!(quote_asset("BTCUSDT"), "USDT");
        assert_eq!(quote_asset("ETHUSDT"), "USDT");
        assert_eq!(quote_asset("BTCUSD"), "USD");
    }

    mod scenarios {
        use super::*;
        use crate::config::{EngineConfig, HedgeConfig};
        use crate::persistence::ContextStore;
        use crate::venue::{BookLevel, FillBehavior, OrderGateway, OrderSide, PaperVenue};

        struct Rig {
            machine: ArbitrageStateMachine,
            risk: Arc<HedgeRiskManager>,
            binance: Arc<PaperVenue>,
            kraken: Arc<PaperVenue>,
            hyperliquid: Arc<PaperVenue>,
        }

        fn rig() -> Rig {
            let config = Config {
                engine: EngineConfig {
                    decision_interval_ms: 10,
                    persist_interval_secs: 3600,
                    status_log_interval_secs: 3600,
                    ..EngineConfig::default()
                },
                hedge: HedgeConfig {
                    monitor_interval_ms: 20,
                    max_uncovered_time_ms: 500,
                    rescue_retry_interval_ms: 10,
                    ..HedgeConfig::default()
                },
                execution: crate::config::ExecutionConfig {
                    retry_interval_ms: 10,
                    ..crate::config::ExecutionConfig::default()
                },
                ..Config::default()
            };

            let binance = Arc::new(PaperVenue::new(Venue::Binance));
            let kraken = Arc::new(PaperVenue::new(Venue::Kraken));
            let hyperliquid = Arc::new(PaperVenue::new(Venue::Hyperliquid));

            let mut gateways: HashMap<Venue, Arc<dyn OrderGateway>> = HashMap::new();
            gateways.insert(Venue::Binance, binance.clone());
            gateways.insert(Venue::Kraken, kraken.clone());
            gateways.insert(Venue::Hyperliquid, hyperliquid.clone());

            let mut sources: HashMap<Venue, Arc<dyn SnapshotSource>> = HashMap::new();
            sources.insert(Venue::Binance, binance.clone());
            sources.insert(Venue::Kraken, kraken.clone());
            sources.insert(Venue::Hyperliquid, hyperliquid.clone());

            let mut oracles: HashMap<Venue, Arc<dyn BalanceOracle>> = HashMap::new();
            oracles.insert(Venue::Binance, binance.clone());
            oracles.insert(Venue::Kraken, kraken.clone());
            oracles.insert(Venue::Hyperliquid, hyperliquid.clone());

            let (alerts, _alert_rx) = crate::engine::alert_channel(256);
            let risk = Arc::new(HedgeRiskManager::new(
                config.hedge.clone(),
                &config.symbol,
                gateways.clone(),
                alerts.clone(),
            ));
            let executor = OrderExecutor::new(config.execution.clone(), gateways);

            let machine = ArbitrageStateMachine::new(
                config.clone(),
                SignalEngine::new(config.signal.clone()),
                DivergenceDetector::new(config.signal.clone()),
                OpportunityEvaluator::new(config.opportunity.clone()),
                ExecutionStrategySelector::new(config.execution.clone()),
                executor,
                risk.clone(),
                sources,
                oracles,
                Arc::new(ContextStore::in_memory().unwrap()),
                alerts,
            );

            Rig {
                machine,
                risk,
                binance,
                kraken,
                hyperliquid,
            }
        }

        fn book(
            venue: Venue,
            sequence: u64,
            bid: (Decimal, Decimal),
            ask: (Decimal, Decimal),
        ) -> MarketSnapshot {
            MarketSnapshot {
                venue,
                symbol: "BTCUSDT".to_string(),
                sequence,
                captured_at: Utc::now(),
                bids: vec![BookLevel::new(bid.0, bid.1)],
                asks: vec![BookLevel::new(ask.0, ask.1)],
            }
        }

        /// Push two snapshot rounds: the second shows strong bid pressure on
        /// Binance while Kraken stays flat, with a cross-venue price gap a
        /// simultaneous plan can capture.
        async fn feed_opportunity(
            binance: &PaperVenue,
            kraken: &PaperVenue,
            hyperliquid: &PaperVenue,
        ) {
            binance
                .push_snapshot(book(
                    Venue::Binance,
                    1,
                    (dec!(101), dec!(100)),
                    (dec!(101.2), dec!(300)),
                ))
                .await;
            kraken
                .push_snapshot(book(
                    Venue::Kraken,
                    1,
                    (dec!(99.8), dec!(300)),
                    (dec!(100), dec!(300)),
                ))
                .await;
            hyperliquid
                .push_snapshot(book(
                    Venue::Hyperliquid,
                    1,
                    (dec!(100.4), dec!(300)),
                    (dec!(100.6), dec!(300)),
                ))
                .await;

            tokio::time::sleep(Duration::from_millis(50)).await;

            binance
                .push_snapshot(book(
                    Venue::Binance,
                    2,
                    (dec!(101), dec!(200)),
                    (dec!(101.2), dec!(250)),
                ))
                .await;
            kraken
                .push_snapshot(book(
                    Venue::Kraken,
                    2,
                    (dec!(99.8), dec!(300)),
                    (dec!(100), dec!(300)),
                ))
                .await;
        }

        async fn wait_for(
            watch: &mut watch::Receiver<StrategyContext>,
            predicate: impl Fn(&StrategyContext) -> bool,
        ) {
            tokio::time::timeout(Duration::from_secs(3), async {
                loop {
                    if predicate(&watch.borrow()) {
                        return;
                    }
                    watch.changed().await.expect("machine dropped context");
                }
            })
            .await
            .expect("timed out waiting for context condition");
        }

        #[tokio::test]
        async fn test_simultaneous_arbitrage_round_trip() {
            let Rig {
                mut machine,
                risk: _risk,
                binance,
                kraken,
                hyperliquid,
            } = rig();
            let shutdown = machine.shutdown_handle();
            let mut watch = machine.context_watch();

            let handle = tokio::spawn(async move { machine.run().await });

            tokio::time::sleep(Duration::from_millis(50)).await;
            feed_opportunity(&binance, &kraken, &hyperliquid).await;

            wait_for(&mut watch, |ctx| ctx.total_trades >= 1).await;

            shutdown.request();
            handle.await.unwrap().unwrap();

            let context = watch.borrow().clone();
            assert_eq!(context.state, ArbState::Shutdown);
            assert_eq!(context.total_trades, 1);
            assert_eq!(context.opportunities_seen, 1);
            // Sold at 101, bought at 100, 50 units: the edge is realized.
            assert!(context.realized_pnl > Decimal::ZERO);
            // Both legs offset: net delta unchanged by the trade.
            assert!(
                context.positions.net_delta_value.abs()
                    <= Config::default().hedge.neutrality_tolerance
            );
            assert!(!context.positions.uncovered);
        }

        #[tokio::test]
        async fn test_partial_fill_is_rescued_on_alternate_venue() {
            let Rig {
                mut machine,
                risk,
                binance,
                kraken,
                hyperliquid,
            } = rig();
            // The buy leg's venue never fills orders.
            kraken.set_behavior(FillBehavior::FillNone).await;

            let shutdown = machine.shutdown_handle();
            let mut watch = machine.context_watch();

            let handle = tokio::spawn(async move { machine.run().await });

            tokio::time::sleep(Duration::from_millis(50)).await;
            feed_opportunity(&binance, &kraken, &hyperliquid).await;

            wait_for(&mut watch, |ctx| ctx.rescues >= 1).await;

            // Exactly one accepted fill for the missing buy leg, on the
            // alternate venue; and a hedge ticket opened then cancelled.
            let binance_buys = binance
                .fills()
                .await
                .into_iter()
                .filter(|f| f.side == OrderSide::Buy)
                .count();
            assert_eq!(binance_buys, 1);
            assert!(kraken.fills().await.is_empty());

            let tickets = risk.tickets().await;
            assert_eq!(tickets.len(), 1);
            assert_eq!(tickets[0].status, crate::risk::TicketStatus::Cancelled);

            shutdown.request();
            handle.await.unwrap().unwrap();

            let context = watch.borrow().clone();
            assert_eq!(context.total_trades, 0);
            assert_eq!(context.rescues, 1);
            assert!(!context.positions.uncovered);
            assert!(
                context.positions.net_delta_value.abs()
                    <= Config::default().hedge.neutrality_tolerance
            );
        }
    }
}
