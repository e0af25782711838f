//! Signal derivation from streaming order-book snapshots.
//!
//! Converts raw snapshots into:
//! - Order-flow imbalance (OFI) and book-pressure classification
//! - Microprice with a liquidity-derived confidence
//! - Cross-venue divergence for the same logical symbol
//!
//! Signals are ephemeral: always a pure function of the latest snapshot
//! pair, recomputed on every update, never persisted as mutable state.

mod divergence;
mod engine;

pub use divergence::{DivergenceDetector, DivergenceSignal};
pub use engine::{BookPressure, PressureDirection, Signal, SignalEngine, SignalError};
