//! The arbitrage state machine and session context.
//!
//! - `ArbState` and the pure transition table
//! - `StrategyContext`, updated immutably and published through a watch
//!   channel for concurrent readers
//! - The structured alert stream
//! - `ArbitrageStateMachine`, which drives the injected components

pub mod alerts;
mod context;
mod machine;
mod state;

pub use alerts::{alert_channel, publish, AlertBus, AlertEvent};
pub use context::{StrategyContext, StrategySnapshot};
pub use machine::{transition, ArbitrageStateMachine, Event, HedgeResolution, ShutdownHandle};
pub use state::ArbState;
