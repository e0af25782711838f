//! Venue model and collaborator interfaces.
//!
//! Venues are a closed, tagged set resolved once at construction. Wire
//! protocols, authentication, and transport live behind the trait seams in
//! `traits`; this crate only ever sees normalized snapshots, order intents,
//! and balances.

mod mock;
mod traits;
mod types;

use std::fmt;

pub use mock::{FillBehavior, PaperVenue};
pub use traits::{BalanceOracle, OrderGateway, SnapshotSource};
pub use types::*;

/// Identifier for a supported trading venue.
///
/// Two spot books and one perpetuals book. Carried alongside every snapshot,
/// order intent, and hedge ticket; never parsed from a symbol or object name
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Venue {
    Binance,
    Kraken,
    Hyperliquid,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Binance => write!(f, "Binance"),
            Venue::Kraken => write!(f, "Kraken"),
            Venue::Hyperliquid => write!(f, "Hyperliquid"),
        }
    }
}

impl Venue {
    /// Short code for display (2 chars).
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::Binance => "BN",
            Venue::Kraken => "KR",
            Venue::Hyperliquid => "HL",
        }
    }

    /// The kind of instrument this venue trades.
    pub fn instrument_kind(&self) -> InstrumentKind {
        match self {
            Venue::Binance | Venue::Kraken => InstrumentKind::Spot,
            Venue::Hyperliquid => InstrumentKind::Perpetual,
        }
    }

    /// Both spot venues, in preference order.
    pub fn spot_venues() -> [Venue; 2] {
        [Venue::Binance, Venue::Kraken]
    }

    /// The perpetuals venue carrying the standing hedge leg.
    pub fn hedge_venue() -> Venue {
        Venue::Hyperliquid
    }

    /// The other spot venue, used as the alternate for rescue execution.
    /// Returns `None` for the perpetuals venue, which has no alternate.
    pub fn alternate_spot(&self) -> Option<Venue> {
        match self {
            Venue::Binance => Some(Venue::Kraken),
            Venue::Kraken => Some(Venue::Binance),
            Venue::Hyperliquid => None,
        }
    }
}

/// Instrument kind traded on a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum InstrumentKind {
    Spot,
    Perpetual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_display() {
        assert_eq!(Venue::Binance.to_string(), "Binance");
        assert_eq!(Venue::Hyperliquid.short_code(), "HL");
    }

    #[test]
    fn test_instrument_kinds() {
        assert_eq!(Venue::Binance.instrument_kind(), InstrumentKind::Spot);
        assert_eq!(Venue::Kraken.instrument_kind(), InstrumentKind::Spot);
        assert_eq!(
            Venue::Hyperliquid.instrument_kind(),
            InstrumentKind::Perpetual
        );
    }

    #[test]
    fn test_alternate_spot() {
        assert_eq!(Venue::Binance.alternate_spot(), Some(Venue::Kraken));
        assert_eq!(Venue::Kraken.alternate_spot(), Some(Venue::Binance));
        assert_eq!(Venue::Hyperliquid.alternate_spot(), None);
    }
}
