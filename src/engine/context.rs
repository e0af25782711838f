//! Session context with immutable-update discipline.
//!
//! Every transition produces a new `StrategyContext` value; nothing mutates
//! fields in place. Concurrent readers (status polling, persistence) can
//! therefore never observe a torn state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::risk::PositionSnapshot;

use super::state::ArbState;

/// The state machine's session-scoped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyContext {
    pub state: ArbState,
    pub symbol: String,
    pub positions: PositionSnapshot,
    /// Realized edge accumulated over completed round trips.
    pub realized_pnl: Decimal,
    pub total_trades: u64,
    pub opportunities_seen: u64,
    pub rescues: u64,
    pub hedge_conversions: u64,
    pub errors: u64,
    pub recovery_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyContext {
    pub fn new(symbol: &str) -> Self {
        let now = Utc::now();
        Self {
            state: ArbState::Initializing,
            symbol: symbol.to_string(),
            positions: PositionSnapshot::default(),
            realized_pnl: Decimal::ZERO,
            total_trades: 0,
            opportunities_seen: 0,
            rescues: 0,
            hedge_conversions: 0,
            errors: 0,
            recovery_attempts: 0,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn with_state(&self, state: ArbState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    pub fn with_positions(&self, positions: PositionSnapshot) -> Self {
        Self {
            positions,
            ..self.clone()
        }
    }

    pub fn with_trade(&self, realized_edge: Decimal) -> Self {
        Self {
            total_trades: self.total_trades + 1,
            realized_pnl: self.realized_pnl + realized_edge,
            ..self.clone()
        }
    }

    pub fn with_opportunity(&self) -> Self {
        Self {
            opportunities_seen: self.opportunities_seen + 1,
            ..self.clone()
        }
    }

    pub fn with_rescue(&self) -> Self {
        Self {
            rescues: self.rescues + 1,
            ..self.clone()
        }
    }

    pub fn with_hedge_conversion(&self) -> Self {
        Self {
            hedge_conversions: self.hedge_conversions + 1,
            ..self.clone()
        }
    }

    pub fn with_error(&self) -> Self {
        Self {
            errors: self.errors + 1,
            ..self.clone()
        }
    }

    pub fn with_recovery_attempt(&self) -> Self {
        Self {
            recovery_attempts: self.recovery_attempts + 1,
            ..self.clone()
        }
    }

    pub fn with_recovery_reset(&self) -> Self {
        Self {
            recovery_attempts: 0,
            ..self.clone()
        }
    }

    /// Stamp the context; called by the machine loop when publishing, never
    /// inside the pure transition function.
    pub fn touched(&self, at: DateTime<Utc>) -> Self {
        Self {
            updated_at: at,
            ..self.clone()
        }
    }
}

/// Lightweight status view, safe to poll concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub state: ArbState,
    pub symbol: String,
    pub positions: Vec<crate::risk::PositionEntry>,
    pub net_delta_value: Decimal,
    pub realized_pnl: Decimal,
    pub total_trades: u64,
    pub uncovered_exposure: bool,
    pub open_tickets: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&StrategyContext> for StrategySnapshot {
    fn from(context: &StrategyContext) -> Self {
        Self {
            state: context.state,
            symbol: context.symbol.clone(),
            positions: context.positions.entries.clone(),
            net_delta_value: context.positions.net_delta_value,
            realized_pnl: context.realized_pnl,
            total_trades: context.total_trades,
            uncovered_exposure: context.positions.uncovered,
            open_tickets: context.positions.open_tickets,
            updated_at: context.updated_at,
        }
    }
}
