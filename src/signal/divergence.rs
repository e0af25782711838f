//! Cross-venue divergence detection.
//!
//! Compares OFI between two venues quoting the same logical symbol. A large
//! imbalance gap suggests pressure on the leading book will propagate to the
//! lagging one.

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::SignalConfig;
use crate::venue::Venue;

use super::engine::{PressureDirection, Signal, SignalError};

/// Magnitudes closer than this are treated as equal when checking for the
/// ambiguous equal-and-opposite case.
const TIE_EPSILON: Decimal = dec!(0.000001);

/// Outcome of comparing two venues' signals.
#[derive(Debug, Clone, PartialEq)]
pub enum DivergenceSignal {
    /// No actionable divergence (below threshold, or ambiguous).
    None,
    /// Pressure on `leader` is expected to propagate to `follower`.
    Directional {
        symbol: String,
        leader: Venue,
        follower: Venue,
        /// Direction the follower's price is expected to move.
        expected_move: PressureDirection,
        /// Signed OFI gap (leader-relative), magnitude in (threshold, 2].
        divergence: Decimal,
        /// Min of the two books' liquidity confidences.
        confidence: Decimal,
    },
}

/// Applies the divergence threshold and ambiguity tie-break.
#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    config: SignalConfig,
}

impl DivergenceDetector {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Compare two venues' signals for the same logical symbol.
    ///
    /// The signals must come from different venues and share a symbol;
    /// anything else is a wiring error, fatal to the caller.
    pub fn evaluate(&self, a: &Signal, b: &Signal) -> Result<DivergenceSignal, SignalError> {
        if a.venue == b.venue || a.symbol != b.symbol {
            return Err(SignalError::MismatchedPair {
                current_venue: a.venue,
                current_symbol: a.symbol.clone(),
                previous_venue: b.venue,
                previous_symbol: b.symbol.clone(),
            });
        }

        let divergence = a.ofi - b.ofi;
        if divergence.abs() <= self.config.divergence_threshold {
            return Ok(DivergenceSignal::None);
        }

        // Equal-magnitude opposite pressure is ambiguous: both books shove
        // in opposite directions with the same force. Do not guess.
        let opposite_signs = a.ofi.signum() * b.ofi.signum() == Decimal::NEGATIVE_ONE;
        if opposite_signs && (a.ofi.abs() - b.ofi.abs()).abs() <= TIE_EPSILON {
            debug!(
                symbol = %a.symbol,
                ofi_a = %a.ofi,
                ofi_b = %b.ofi,
                "Equal-and-opposite pressure, no divergence direction"
            );
            return Ok(DivergenceSignal::None);
        }

        // The stronger book leads; the weaker one is predicted to follow.
        let (leader, follower) = if a.ofi.abs() >= b.ofi.abs() {
            (a, b)
        } else {
            (b, a)
        };
        let expected_move = if leader.ofi > Decimal::ZERO {
            PressureDirection::Bid
        } else {
            PressureDirection::Ask
        };

        debug!(
            symbol = %a.symbol,
            leader = %leader.venue,
            follower = %follower.venue,
            %divergence,
            "Directional divergence detected"
        );

        Ok(DivergenceSignal::Directional {
            symbol: a.symbol.clone(),
            leader: leader.venue,
            follower: follower.venue,
            expected_move,
            divergence,
            confidence: a.confidence.min(b.confidence),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::BookPressure;
    use chrono::Utc;

    fn signal(venue: Venue, ofi: Decimal, confidence: Decimal) -> Signal {
        Signal {
            venue,
            symbol: "BTCUSDT".to_string(),
            sequence: 1,
            computed_at: Utc::now(),
            ofi,
            pressure: BookPressure::Neutral,
            microprice: dec!(100),
            confidence,
        }
    }

    fn detector() -> DivergenceDetector {
        DivergenceDetector::new(SignalConfig::default())
    }

    #[test]
    fn test_below_threshold_is_no_divergence() {
        let a = signal(Venue::Binance, dec!(0.2), dec!(1));
        let b = signal(Venue::Kraken, dec!(0.0), dec!(1));
        assert_eq!(detector().evaluate(&a, &b).unwrap(), DivergenceSignal::None);
    }

    #[test]
    fn test_equal_opposite_pressure_is_ambiguous() {
        // |divergence| = 0.9 > 0.4, but direction is a coin flip.
        let a = signal(Venue::Binance, dec!(0.45), dec!(1));
        let b = signal(Venue::Kraken, dec!(-0.45), dec!(1));
        assert_eq!(detector().evaluate(&a, &b).unwrap(), DivergenceSignal::None);
    }

    #[test]
    fn test_stronger_book_leads() {
        let a = signal(Venue::Binance, dec!(0.8), dec!(0.9));
        let b = signal(Venue::Kraken, dec!(0.1), dec!(0.6));

        match detector().evaluate(&a, &b).unwrap() {
            DivergenceSignal::Directional {
                leader,
                follower,
                expected_move,
                confidence,
                ..
            } => {
                assert_eq!(leader, Venue::Binance);
                assert_eq!(follower, Venue::Kraken);
                assert_eq!(expected_move, PressureDirection::Bid);
                assert_eq!(confidence, dec!(0.6));
            }
            other => panic!("expected directional divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_leader_predicts_ask_move() {
        let a = signal(Venue::Binance, dec!(-0.7), dec!(1));
        let b = signal(Venue::Kraken, dec!(0.05), dec!(1));

        match detector().evaluate(&a, &b).unwrap() {
            DivergenceSignal::Directional {
                leader,
                expected_move,
                ..
            } => {
                assert_eq!(leader, Venue::Binance);
                assert_eq!(expected_move, PressureDirection::Ask);
            }
            other => panic!("expected directional divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_same_venue_pair_is_rejected() {
        let a = signal(Venue::Binance, dec!(0.8), dec!(1));
        let b = signal(Venue::Binance, dec!(0.1), dec!(1));
        assert!(detector().evaluate(&a, &b).is_err());
    }
}
