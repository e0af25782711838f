//! Risk management for the arbitrage core.
//!
//! The single owner of truth for "are we currently delta-neutral":
//! - Position book behind a single-writer command queue
//! - Uncovered-position detection and bounded-time remediation
//! - Hedge ticket lifecycle (temporary hedge, rescue, conversion)
//! - Risk scoring with band-driven escalation
//! - Background delta monitoring independent of trade lifecycles

mod hedge;
mod manager;
mod score;

pub use hedge::{
    HedgeTicket, PositionBook, PositionEntry, PositionSnapshot, TicketStatus, UncoveredPosition,
};
pub use manager::{HedgeRiskManager, RemediationOutcome};
pub use score::{RiskBand, RiskScorer, VolatilityEstimator};
