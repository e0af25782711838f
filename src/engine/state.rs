//! Arbitrage state machine states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// States of the top-level controller.
///
/// Path: `Initializing → EstablishingDeltaNeutral → DeltaNeutralActive ⇄
/// MonitoringSpreads → PreparingArbitrage → ExecutingArbitrage →
/// (RebalancingDelta | MonitoringSpreads) → … → Shutdown`, with
/// `ErrorRecovery` reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArbState {
    Initializing,
    EstablishingDeltaNeutral,
    DeltaNeutralActive,
    MonitoringSpreads,
    PreparingArbitrage,
    ExecutingArbitrage,
    RebalancingDelta,
    ErrorRecovery,
    Shutdown,
}

impl ArbState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArbState::Shutdown)
    }
}

impl fmt::Display for ArbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArbState::Initializing => "Initializing",
            ArbState::EstablishingDeltaNeutral => "EstablishingDeltaNeutral",
            ArbState::DeltaNeutralActive => "DeltaNeutralActive",
            ArbState::MonitoringSpreads => "MonitoringSpreads",
            ArbState::PreparingArbitrage => "PreparingArbitrage",
            ArbState::ExecutingArbitrage => "ExecutingArbitrage",
            ArbState::RebalancingDelta => "RebalancingDelta",
            ArbState::ErrorRecovery => "ErrorRecovery",
            ArbState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}
