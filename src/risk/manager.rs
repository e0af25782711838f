//! The hedge/risk manager.
//!
//! Single owner of truth for "are we currently delta-neutral". All position
//! mutations are serialized through one writer task fed by a command queue
//! (a single-writer queue, not a lock); every other component reads the
//! immutable snapshots it publishes.
//!
//! Per trade attempt the manager detects uncovered exposure, caps the
//! worst case with a temporary hedge ticket, races up to three rescue
//! attempts for the missing leg, and converts the hedge into a permanent
//! adjustment when the bounded uncovered window runs out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HedgeConfig;
use crate::engine::alerts::{publish, AlertBus, AlertEvent};
use crate::venue::{
    Fill, GatewayError, InstrumentKind, OrderGateway, OrderIntent, OrderSide, Venue,
};

use super::hedge::{HedgeTicket, PositionBook, PositionSnapshot, TicketStatus, UncoveredPosition};
use super::score::{RiskBand, RiskScorer, VolatilityEstimator};

/// How an uncovered window ended.
#[derive(Debug, Clone)]
pub enum RemediationOutcome {
    /// A rescue attempt obtained the missing leg.
    Rescued { fill: Fill },
    /// The temporary hedge became a permanent position adjustment.
    ConvertedToPermanent { ticket_id: u64 },
    /// Critical risk: market-hedged immediately, bypassing rescue.
    EmergencyHedged { fill: Fill },
    /// Nothing worked; a manual-intervention ticket is open.
    Escalated { ticket_id: u64 },
}

enum PositionCommand {
    ApplyFill(Fill),
    MarkPrice { symbol: String, mid: Decimal },
    OpenUncovered {
        uncovered: UncoveredPosition,
        ticket: Option<HedgeTicket>,
    },
    ResolveUncovered {
        kind: ResolveKind,
        ticket_id: Option<u64>,
    },
    OpenEscalation(HedgeTicket),
    QueryTickets(oneshot::Sender<Vec<HedgeTicket>>),
    Shutdown(oneshot::Sender<Vec<HedgeTicket>>),
}

#[derive(Debug, Clone, Copy)]
enum ResolveKind {
    Rescued,
    Converted,
    Emergency,
}

/// Handle to the risk manager. Cheap to share; all mutation goes through
/// the writer task.
pub struct HedgeRiskManager {
    config: HedgeConfig,
    symbol: String,
    scorer: RiskScorer,
    gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
    alerts: AlertBus,
    cmd_tx: mpsc::UnboundedSender<PositionCommand>,
    snapshot_rx: watch::Receiver<PositionSnapshot>,
    writer: Mutex<Option<JoinHandle<()>>>,
    ticket_seq: AtomicU64,
}

impl HedgeRiskManager {
    pub fn new(
        config: HedgeConfig,
        symbol: &str,
        gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
        alerts: AlertBus,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PositionSnapshot::default());

        let writer = Writer {
            config: config.clone(),
            symbol: symbol.to_string(),
            scorer: RiskScorer::new(config.clone()),
            book: PositionBook::default(),
            marks: HashMap::new(),
            vol: VolatilityEstimator::new(config.volatility_window, config.volatility_floor),
            uncovered: None,
            tickets: Vec::new(),
            snapshot_tx,
            alerts: alerts.clone(),
            last_band: RiskBand::Low,
            exposure_alerted: false,
            time_alerted: false,
        };
        let handle = tokio::spawn(writer.run(cmd_rx));

        Self {
            scorer: RiskScorer::new(config.clone()),
            config,
            symbol: symbol.to_string(),
            gateways,
            alerts,
            cmd_tx,
            snapshot_rx,
            writer: Mutex::new(Some(handle)),
            ticket_seq: AtomicU64::new(1),
        }
    }

    /// Subscribe to position snapshots.
    pub fn subscribe(&self) -> watch::Receiver<PositionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> PositionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Record an executed fill against the position book.
    pub fn apply_fill(&self, fill: &Fill) {
        let _ = self.cmd_tx.send(PositionCommand::ApplyFill(fill.clone()));
    }

    /// Feed a fresh mid price for marking and volatility estimation.
    pub fn mark_price(&self, symbol: &str, mid: Decimal) {
        let _ = self.cmd_tx.send(PositionCommand::MarkPrice {
            symbol: symbol.to_string(),
            mid,
        });
    }

    /// All tickets ever opened this session.
    pub async fn tickets(&self) -> Vec<HedgeTicket> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(PositionCommand::QueryTickets(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    fn gateway(&self, venue: Venue) -> Result<&Arc<dyn OrderGateway>, GatewayError> {
        self.gateways
            .get(&venue)
            .ok_or(GatewayError::VenueUnreachable(venue))
    }

    /// Remediate a leg that filled without its counterpart.
    ///
    /// The caller has already applied the filled leg to the book. This
    /// drives the full uncovered-position lifecycle and returns once the
    /// window is closed one way or another.
    pub async fn handle_uncovered(
        &self,
        missing: OrderIntent,
        reference_price: Decimal,
    ) -> RemediationOutcome {
        let uncovered = UncoveredPosition::new(&missing.symbol, missing.clone(), reference_price);
        let notional = uncovered.notional();
        let started = Instant::now();

        warn!(
            symbol = %missing.symbol,
            venue = %missing.venue,
            side = ?missing.side,
            qty = %missing.quantity,
            %notional,
            "Uncovered position opened"
        );

        // Cap the worst case first: a temporary hedge on the derivatives
        // leg sized to exactly offset the uncovered amount.
        let ticket = if notional > self.config.hedge_notional_threshold {
            self.open_temporary_hedge(&missing).await
        } else {
            None
        };

        let _ = self.cmd_tx.send(PositionCommand::OpenUncovered {
            uncovered,
            ticket: ticket.clone(),
        });

        let volatility = self.snapshot().volatility.max(self.config.volatility_floor);
        let (score, band) = self.scorer.score(notional, volatility, Duration::ZERO);
        publish(&self.alerts, AlertEvent::RiskLevel { band, score });

        if band == RiskBand::Critical {
            // Bypass rescue entirely: neutralize at whatever the market
            // charges. The loss is accepted to guarantee bounded downside.
            if let Some(fill) = self.emergency_hedge(&missing).await {
                self.apply_fill(&fill);
                if let Some(ticket) = &ticket {
                    self.close_temporary_hedge(ticket).await;
                }
                let _ = self.cmd_tx.send(PositionCommand::ResolveUncovered {
                    kind: ResolveKind::Emergency,
                    ticket_id: ticket.as_ref().map(|t| t.id),
                });
                return RemediationOutcome::EmergencyHedged { fill };
            }
            return self.escalate(&missing, "emergency hedge failed").await;
        }

        let budget = self
            .scorer
            .effective_budget(band)
            .saturating_sub(started.elapsed());

        match self.run_rescue(&missing, budget, band).await {
            Some(rescue_fill) => {
                info!(
                    symbol = %missing.symbol,
                    venue = %rescue_fill.venue,
                    price = %rescue_fill.price,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Rescue filled the missing leg"
                );
                self.apply_fill(&rescue_fill);
                if let Some(ticket) = &ticket {
                    self.close_temporary_hedge(ticket).await;
                }
                let _ = self.cmd_tx.send(PositionCommand::ResolveUncovered {
                    kind: ResolveKind::Rescued,
                    ticket_id: ticket.as_ref().map(|t| t.id),
                });
                RemediationOutcome::Rescued { fill: rescue_fill }
            }
            None => {
                if let Some(ticket) = ticket {
                    // The temporary hedge already offsets the exposure;
                    // keeping it is a known, bounded cost.
                    warn!(
                        symbol = %missing.symbol,
                        ticket_id = ticket.id,
                        "Rescue window exhausted, converting hedge to permanent"
                    );
                    let _ = self.cmd_tx.send(PositionCommand::ResolveUncovered {
                        kind: ResolveKind::Converted,
                        ticket_id: Some(ticket.id),
                    });
                    RemediationOutcome::ConvertedToPermanent { ticket_id: ticket.id }
                } else if let Some(fill) = self.emergency_hedge(&missing).await {
                    self.apply_fill(&fill);
                    let _ = self.cmd_tx.send(PositionCommand::ResolveUncovered {
                        kind: ResolveKind::Emergency,
                        ticket_id: None,
                    });
                    RemediationOutcome::EmergencyHedged { fill }
                } else {
                    self.escalate(&missing, "rescue and emergency hedge both failed")
                        .await
                }
            }
        }
    }

    /// Bring net delta back inside tolerance by adjusting the derivatives
    /// leg. Used when establishing neutrality and after drift.
    pub async fn restore_neutrality(&self, mark: Decimal) -> Result<(), GatewayError> {
        let snapshot = self.snapshot();
        if snapshot.net_delta_value.abs() <= self.config.neutrality_tolerance {
            return Ok(());
        }
        if mark <= Decimal::ZERO {
            return Err(GatewayError::Rejected {
                venue: Venue::hedge_venue(),
                reason: "no mark price to size the neutrality hedge".to_string(),
            });
        }

        let quantity = (snapshot.net_delta_value.abs() / mark).round_dp(8);
        let side = if snapshot.net_delta_value > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let intent = OrderIntent::market(Venue::hedge_venue(), &self.symbol, side, quantity);

        info!(
            net_delta_value = %snapshot.net_delta_value,
            %quantity,
            side = ?side,
            "Restoring delta neutrality via derivatives leg"
        );

        let fill = self.gateway(Venue::hedge_venue())?.place(&intent).await?;
        if !fill.is_filled() {
            return Err(GatewayError::Rejected {
                venue: Venue::hedge_venue(),
                reason: "neutrality hedge did not fill".to_string(),
            });
        }
        self.apply_fill(&fill);
        Ok(())
    }

    /// Place the temporary hedge and open its ticket.
    async fn open_temporary_hedge(&self, missing: &OrderIntent) -> Option<HedgeTicket> {
        let venue = Venue::hedge_venue();
        let intent = OrderIntent::market(venue, &missing.symbol, missing.side, missing.quantity);

        let gateway = match self.gateway(venue) {
            Ok(gw) => gw,
            Err(e) => {
                error!(error = %e, "Hedge venue unavailable for temporary hedge");
                return None;
            }
        };

        match gateway.place(&intent).await {
            Ok(fill) if fill.is_filled() => {
                self.apply_fill(&fill);
                let ticket = HedgeTicket {
                    id: self.ticket_seq.fetch_add(1, Ordering::SeqCst),
                    venue,
                    instrument: InstrumentKind::Perpetual,
                    symbol: missing.symbol.clone(),
                    side: missing.side,
                    quantity: missing.quantity,
                    created_at: Utc::now(),
                    status: TicketStatus::Filled,
                };
                info!(
                    ticket_id = ticket.id,
                    symbol = %ticket.symbol,
                    side = ?ticket.side,
                    qty = %ticket.quantity,
                    "Temporary hedge ticket opened"
                );
                Some(ticket)
            }
            Ok(_) => {
                warn!(symbol = %missing.symbol, "Temporary hedge order did not fill");
                None
            }
            Err(e) => {
                error!(symbol = %missing.symbol, error = %e, "Temporary hedge order failed");
                None
            }
        }
    }

    /// Unwind a temporary hedge after a successful rescue.
    async fn close_temporary_hedge(&self, ticket: &HedgeTicket) {
        let close = OrderIntent::market(
            ticket.venue,
            &ticket.symbol,
            ticket.side.opposite(),
            ticket.quantity,
        );
        match self.gateway(ticket.venue) {
            Ok(gateway) => match gateway.place(&close).await {
                Ok(fill) if fill.is_filled() => {
                    self.apply_fill(&fill);
                    debug!(ticket_id = ticket.id, "Temporary hedge closed");
                }
                Ok(_) | Err(_) => {
                    warn!(
                        ticket_id = ticket.id,
                        "Failed to close temporary hedge, residual perp exposure remains"
                    );
                }
            },
            Err(e) => error!(error = %e, "Hedge venue unavailable while closing ticket"),
        }
    }

    /// Market order for the missing leg itself, at any price.
    async fn emergency_hedge(&self, missing: &OrderIntent) -> Option<Fill> {
        let intent = OrderIntent::market(
            missing.venue,
            &missing.symbol,
            missing.side,
            missing.quantity,
        );
        publish(
            &self.alerts,
            AlertEvent::EmergencyHedge {
                venue: intent.venue,
                symbol: intent.symbol.clone(),
                side: intent.side,
                quantity: intent.quantity,
            },
        );
        let gateway = self.gateway(missing.venue).ok()?;
        match gateway.place(&intent).await {
            Ok(fill) if fill.is_filled() => Some(fill),
            Ok(_) => None,
            Err(e) => {
                error!(symbol = %missing.symbol, error = %e, "Emergency hedge failed");
                None
            }
        }
    }

    /// Last resort: open a manual-intervention ticket that blocks shutdown.
    async fn escalate(&self, missing: &OrderIntent, reason: &str) -> RemediationOutcome {
        let ticket = HedgeTicket {
            id: self.ticket_seq.fetch_add(1, Ordering::SeqCst),
            venue: missing.venue,
            instrument: missing.venue.instrument_kind(),
            symbol: missing.symbol.clone(),
            side: missing.side,
            quantity: missing.quantity,
            created_at: Utc::now(),
            status: TicketStatus::Pending,
        };
        error!(
            ticket_id = ticket.id,
            symbol = %ticket.symbol,
            reason,
            "Uncovered exposure requires manual intervention"
        );
        publish(
            &self.alerts,
            AlertEvent::ManualInterventionRequired {
                ticket: ticket.clone(),
                reason: reason.to_string(),
            },
        );
        let id = ticket.id;
        let _ = self.cmd_tx.send(PositionCommand::OpenEscalation(ticket));
        RemediationOutcome::Escalated { ticket_id: id }
    }

    /// Race up to three concurrent rescue attempts; first fill wins, the
    /// losers are aborted and their venue orders cancelled.
    async fn run_rescue(
        &self,
        missing: &OrderIntent,
        budget: Duration,
        band: RiskBand,
    ) -> Option<Fill> {
        if budget.is_zero() {
            return None;
        }

        // Aggressive bands take larger price improvement steps.
        let step = if band >= RiskBand::High {
            self.config.rescue_improvement_step * dec!(2)
        } else {
            self.config.rescue_improvement_step
        };
        let retry = Duration::from_millis(self.config.rescue_retry_interval_ms);
        let board: Arc<Mutex<Vec<(Venue, u64)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles: Vec<JoinHandle<Option<Fill>>> = Vec::new();

        // (a) aggressive re-pricing on the original venue
        if let Ok(gateway) = self.gateway(missing.venue) {
            handles.push(tokio::spawn(reprice_loop(
                gateway.clone(),
                missing.clone(),
                step,
                retry,
                board.clone(),
            )));
        }

        // (b) delayed market order after a fraction of the budget
        if let Ok(gateway) = self.gateway(missing.venue) {
            let delay = budget.mul_f64(
                rust_decimal::prelude::ToPrimitive::to_f64(&self.config.market_fallback_fraction)
                    .unwrap_or(0.5),
            );
            handles.push(tokio::spawn(delayed_market(
                gateway.clone(),
                missing.clone(),
                delay,
            )));
        }

        // (c) the alternate spot venue, when one exists for this leg
        if let Some(alt) = missing.venue.alternate_spot() {
            if let Ok(gateway) = self.gateway(alt) {
                let mut alt_intent = missing.clone();
                alt_intent.venue = alt;
                handles.push(tokio::spawn(reprice_loop(
                    gateway.clone(),
                    alt_intent,
                    step,
                    retry,
                    board.clone(),
                )));
            }
        }

        if handles.is_empty() {
            return None;
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let winner = timeout(budget, async move {
            let mut remaining = handles;
            loop {
                let (result, _idx, rest) = futures_util::future::select_all(remaining).await;
                if let Ok(Some(fill)) = result {
                    return Some(fill);
                }
                if rest.is_empty() {
                    return None;
                }
                remaining = rest;
            }
        })
        .await
        .ok()
        .flatten();

        // Actively cancel the losers, not merely ignore them.
        for abort in &aborts {
            abort.abort();
        }
        let winner_id = winner.as_ref().map(|f| f.order_id);
        for (venue, order_id) in board.lock().await.drain(..) {
            if Some(order_id) == winner_id {
                continue;
            }
            if let Ok(gateway) = self.gateway(venue) {
                let _ = gateway.cancel(order_id).await;
            }
        }

        winner
    }

    /// Block until all tickets are resolved or escalated, then stop the
    /// writer. Returns the tickets escalated to manual intervention.
    pub async fn shutdown(&self) -> Vec<HedgeTicket> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(PositionCommand::Shutdown(tx)).is_err() {
            return Vec::new();
        }
        let escalated = rx.await.unwrap_or_default();

        if let Some(handle) = self.writer.lock().await.take() {
            let _ = handle.await;
        }
        escalated
    }
}

/// Rescue attempt (a)/(c): IOC limit orders with exponentially increasing
/// price improvement per retry. Runs until aborted by the race.
async fn reprice_loop(
    gateway: Arc<dyn OrderGateway>,
    template: OrderIntent,
    step: Decimal,
    retry: Duration,
    board: Arc<Mutex<Vec<(Venue, u64)>>>,
) -> Option<Fill> {
    let base = match template.price {
        Some(price) if price > Decimal::ZERO => price,
        _ => return delayed_market(gateway, template, Duration::ZERO).await,
    };

    let mut attempt: u32 = 0;
    loop {
        // Improvement doubles each retry; the cap keeps the factor sane if
        // the race somehow runs long.
        let factor = step * Decimal::from(1u64 << attempt.min(10));
        let price = match template.side {
            OrderSide::Buy => base * (Decimal::ONE + factor),
            OrderSide::Sell => base * (Decimal::ONE - factor),
        };
        let intent = OrderIntent::limit(
            template.venue,
            &template.symbol,
            template.side,
            price,
            template.quantity,
            crate::venue::TimeInForce::ImmediateOrCancel,
        );

        match gateway.place(&intent).await {
            Ok(fill) if fill.is_filled() => return Some(fill),
            Ok(fill) => {
                board.lock().await.push((fill.venue, fill.order_id));
            }
            Err(e) => {
                debug!(venue = %template.venue, error = %e, "Rescue re-price attempt failed");
            }
        }

        attempt += 1;
        sleep(retry).await;
    }
}

/// Rescue attempt (b): a market order after a fraction of the wait budget.
async fn delayed_market(
    gateway: Arc<dyn OrderGateway>,
    template: OrderIntent,
    delay: Duration,
) -> Option<Fill> {
    sleep(delay).await;
    let intent = OrderIntent::market(
        template.venue,
        &template.symbol,
        template.side,
        template.quantity,
    );
    match gateway.place(&intent).await {
        Ok(fill) if fill.is_filled() => Some(fill),
        Ok(_) => None,
        Err(e) => {
            debug!(venue = %template.venue, error = %e, "Delayed market rescue failed");
            None
        }
    }
}

/// The single writer owning the position book and ticket registry.
struct Writer {
    config: HedgeConfig,
    symbol: String,
    scorer: RiskScorer,
    book: PositionBook,
    marks: HashMap<String, Decimal>,
    vol: VolatilityEstimator,
    uncovered: Option<UncoveredPosition>,
    tickets: Vec<HedgeTicket>,
    snapshot_tx: watch::Sender<PositionSnapshot>,
    alerts: AlertBus,
    last_band: RiskBand,
    exposure_alerted: bool,
    time_alerted: bool,
}

impl Writer {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<PositionCommand>) {
        let mut ticker = interval(Duration::from_millis(self.config.monitor_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.monitor_tick(),
            }
        }
    }

    /// Apply one command. Returns true on shutdown.
    fn handle(&mut self, cmd: PositionCommand) -> bool {
        match cmd {
            PositionCommand::ApplyFill(fill) => {
                self.book.apply_fill(&fill);
                if fill.price > Decimal::ZERO {
                    self.marks.insert(fill.symbol.clone(), fill.price);
                }
                self.publish_snapshot();
            }
            PositionCommand::MarkPrice { symbol, mid } => {
                self.vol.sample(mid);
                self.marks.insert(symbol, mid);
                self.publish_snapshot();
            }
            PositionCommand::OpenUncovered { uncovered, ticket } => {
                if let Some(ticket) = ticket {
                    publish(&self.alerts, AlertEvent::TicketOpened(ticket.clone()));
                    self.tickets.push(ticket);
                }
                self.uncovered = Some(uncovered);
                self.time_alerted = false;
                self.publish_snapshot();
            }
            PositionCommand::ResolveUncovered { kind, ticket_id } => {
                self.uncovered = None;
                if let Some(id) = ticket_id {
                    let status = match kind {
                        ResolveKind::Rescued => TicketStatus::Cancelled,
                        ResolveKind::Converted => TicketStatus::Converted,
                        ResolveKind::Emergency => TicketStatus::Cancelled,
                    };
                    if let Some(ticket) = self.tickets.iter_mut().find(|t| t.id == id) {
                        ticket.status = status;
                        publish(&self.alerts, AlertEvent::TicketResolved(ticket.clone()));
                    }
                }
                self.last_band = RiskBand::Low;
                self.publish_snapshot();
            }
            PositionCommand::OpenEscalation(ticket) => {
                self.tickets.push(ticket);
                self.uncovered = None;
                self.publish_snapshot();
            }
            PositionCommand::QueryTickets(reply) => {
                let _ = reply.send(self.tickets.clone());
            }
            PositionCommand::Shutdown(reply) => {
                let escalated = self.escalate_open_tickets();
                let _ = reply.send(escalated);
                return true;
            }
        }
        false
    }

    /// Shutdown path: open tickets are never abandoned, they become
    /// manual-intervention alerts.
    fn escalate_open_tickets(&mut self) -> Vec<HedgeTicket> {
        let mut escalated = Vec::new();
        for ticket in self.tickets.iter_mut().filter(|t| t.is_open()) {
            publish(
                &self.alerts,
                AlertEvent::ManualInterventionRequired {
                    ticket: ticket.clone(),
                    reason: "shutdown with open hedge ticket".to_string(),
                },
            );
            escalated.push(ticket.clone());
        }
        escalated
    }

    /// Background delta check, independent of any trade lifecycle. Catches
    /// drift the per-trade logic can miss (external fills, funding events).
    fn monitor_tick(&mut self) {
        let net = self.book.net_delta_value(&self.marks);

        let over = net.abs() > self.config.exposure_alert_notional;
        if over && !self.exposure_alerted {
            warn!(net_delta_value = %net, "Net exposure above alert threshold");
            publish(
                &self.alerts,
                AlertEvent::PositionSizeAlert {
                    net_delta_value: net,
                    threshold: self.config.exposure_alert_notional,
                },
            );
        }
        self.exposure_alerted = over;

        if let Some(uncovered) = &self.uncovered {
            let elapsed_ms = uncovered.uncovered_ms(Utc::now()).max(0) as u64;

            if elapsed_ms > self.config.max_uncovered_time_ms && !self.time_alerted {
                publish(
                    &self.alerts,
                    AlertEvent::TimeAlert {
                        symbol: uncovered.symbol.clone(),
                        uncovered_ms: elapsed_ms as i64,
                        bound_ms: self.config.max_uncovered_time_ms,
                    },
                );
                self.time_alerted = true;
            }

            let (score, band) = self.scorer.score(
                uncovered.notional(),
                self.vol.estimate(),
                Duration::from_millis(elapsed_ms),
            );
            if band != self.last_band {
                publish(&self.alerts, AlertEvent::RiskLevel { band, score });
                self.last_band = band;
            }
        }

        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let snapshot = PositionSnapshot {
            entries: self.book.entries(),
            net_delta_value: self.book.net_delta_value(&self.marks),
            uncovered: self.uncovered.is_some(),
            hedge_protection_level: self.book.hedge_protection_level(&self.symbol),
            open_tickets: self.tickets.iter().filter(|t| t.is_open()).count(),
            volatility: self.vol.estimate(),
            taken_at: Utc::now(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}
