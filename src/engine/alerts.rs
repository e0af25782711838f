//! Structured alert stream.
//!
//! Every state transition and every hedge-ticket lifecycle event is
//! reported here; nothing fails silently. Consumed by an external alerting
//! collaborator via `broadcast` subscription.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::risk::{HedgeTicket, RiskBand};
use crate::venue::{OrderSide, Venue};

use super::state::ArbState;

/// Structured events for the external alerting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertEvent {
    StateTransition {
        from: ArbState,
        to: ArbState,
        at: DateTime<Utc>,
    },
    /// Absolute net exposure exceeded the configured notional threshold.
    PositionSizeAlert {
        net_delta_value: Decimal,
        threshold: Decimal,
    },
    /// An uncovered window exceeded its time bound.
    TimeAlert {
        symbol: String,
        uncovered_ms: i64,
        bound_ms: u64,
    },
    /// The risk band changed.
    RiskLevel { band: RiskBand, score: Decimal },
    TicketOpened(HedgeTicket),
    TicketResolved(HedgeTicket),
    /// A ticket could not be resolved automatically; a human has to act.
    ManualInterventionRequired {
        ticket: HedgeTicket,
        reason: String,
    },
    /// Loss-accepting market hedge taken to guarantee bounded downside.
    EmergencyHedge {
        venue: Venue,
        symbol: String,
        side: OrderSide,
        quantity: Decimal,
    },
}

/// Sender half of the alert stream.
pub type AlertBus = broadcast::Sender<AlertEvent>;

/// Create the alert stream. Slow consumers lag rather than block the core.
pub fn alert_channel(capacity: usize) -> (AlertBus, broadcast::Receiver<AlertEvent>) {
    broadcast::channel(capacity)
}

/// Fire-and-forget publish; an alert with no subscribers is not an error.
pub fn publish(bus: &AlertBus, event: AlertEvent) {
    let _ = bus.send(event);
}
