//! Order-flow imbalance and microprice computation.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use tracing::trace;

use crate::config::SignalConfig;
use crate::venue::{BookLevel, MarketSnapshot, Venue};

/// Errors from signal computation.
///
/// All of these fail closed: the caller emits no opportunity and does not
/// retry. A mismatched pair is a wiring bug and fatal to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalError {
    #[error("snapshot pair mismatch: {current_venue}/{current_symbol} vs {previous_venue}/{previous_symbol}")]
    MismatchedPair {
        current_venue: Venue,
        current_symbol: String,
        previous_venue: Venue,
        previous_symbol: String,
    },

    #[error("out-of-order snapshot: sequence {current} after {previous}")]
    OutOfOrder { previous: u64, current: u64 },

    #[error("empty book for {venue}/{symbol}")]
    EmptyBook { venue: Venue, symbol: String },
}

/// Direction of dominant book pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PressureDirection {
    /// Net buying pressure: bids being added / asks consumed.
    Bid,
    /// Net selling pressure.
    Ask,
}

/// Classification of the OFI score.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BookPressure {
    Neutral,
    Strong {
        direction: PressureDirection,
        confidence: Decimal,
    },
}

/// Derived, ephemeral market signal for one (venue, symbol).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Signal {
    pub venue: Venue,
    pub symbol: String,
    pub sequence: u64,
    pub computed_at: DateTime<Utc>,
    /// Order-flow imbalance, bounded [-1, 1]; positive = bid pressure.
    pub ofi: Decimal,
    pub pressure: BookPressure,
    pub microprice: Decimal,
    /// Liquidity-derived confidence in [0, 1].
    pub confidence: Decimal,
}

/// Computes OFI, microprice, and pressure classification from consecutive
/// snapshots of the same (venue, symbol).
#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Compute the signal for `current` given its predecessor.
    ///
    /// The snapshots must share (venue, symbol) and be in sequence order.
    pub fn compute_signals(
        &self,
        current: &MarketSnapshot,
        previous: &MarketSnapshot,
    ) -> Result<Signal, SignalError> {
        if current.venue != previous.venue || current.symbol != previous.symbol {
            return Err(SignalError::MismatchedPair {
                current_venue: current.venue,
                current_symbol: current.symbol.clone(),
                previous_venue: previous.venue,
                previous_symbol: previous.symbol.clone(),
            });
        }
        if current.sequence <= previous.sequence {
            return Err(SignalError::OutOfOrder {
                previous: previous.sequence,
                current: current.sequence,
            });
        }

        let (best_bid, best_ask) = match (current.best_bid(), current.best_ask()) {
            (Some(bid), Some(ask)) => (bid, ask),
            _ => {
                return Err(SignalError::EmptyBook {
                    venue: current.venue,
                    symbol: current.symbol.clone(),
                })
            }
        };

        let depth = self.config.depth_levels;
        let bid_flow = side_flow(&current.bids, &previous.bids, true, depth);
        let ask_flow = side_flow(&current.asks, &previous.asks, false, depth);

        let magnitude = bid_flow.abs() + ask_flow.abs();
        let ofi = if magnitude == Decimal::ZERO {
            Decimal::ZERO
        } else {
            (bid_flow - ask_flow) / magnitude
        };

        let pressure = self.classify(ofi);
        let microprice = microprice(best_bid, best_ask);

        let confidence = (current.top_of_book_notional() / self.config.reference_notional)
            .min(Decimal::ONE);

        trace!(
            venue = %current.venue,
            symbol = %current.symbol,
            sequence = current.sequence,
            %ofi,
            %microprice,
            %confidence,
            "Computed signal"
        );

        Ok(Signal {
            venue: current.venue,
            symbol: current.symbol.clone(),
            sequence: current.sequence,
            computed_at: Utc::now(),
            ofi,
            pressure,
            microprice,
            confidence,
        })
    }

    fn classify(&self, ofi: Decimal) -> BookPressure {
        if ofi.abs() <= self.config.strong_pressure_threshold {
            return BookPressure::Neutral;
        }
        let direction = if ofi > Decimal::ZERO {
            PressureDirection::Bid
        } else {
            PressureDirection::Ask
        };
        // Heuristic clamp carried from the reference strategy; tune
        // `pressure_confidence_scale` empirically rather than trusting it.
        let confidence = (ofi.abs() * self.config.pressure_confidence_scale).min(Decimal::ONE);
        BookPressure::Strong {
            direction,
            confidence,
        }
    }
}

/// Depth-weighted order flow for one side of the book between consecutive
/// snapshots.
///
/// Per level the flow follows price movement: a price improvement counts the
/// whole new level as added liquidity, a retreat counts the old level as
/// removed, an unchanged price contributes the size delta. Each level is
/// weighted `1/(level_index + 1)` to suppress likely-phantom deep liquidity.
fn side_flow(current: &[BookLevel], previous: &[BookLevel], is_bid: bool, depth: usize) -> Decimal {
    let mut flow = Decimal::ZERO;
    for i in 0..depth {
        let weight = Decimal::ONE / Decimal::from(i as u64 + 1);
        match (current.get(i), previous.get(i)) {
            (Some(cur), Some(prev)) => {
                let improved = if is_bid {
                    cur.price > prev.price
                } else {
                    cur.price < prev.price
                };
                let delta = if improved {
                    cur.size
                } else if cur.price == prev.price {
                    cur.size - prev.size
                } else {
                    -prev.size
                };
                flow += weight * delta;
            }
            (Some(cur), None) => flow += weight * cur.size,
            (None, Some(prev)) => flow -= weight * prev.size,
            (None, None) => break,
        }
    }
    flow
}

/// Size-weighted blend of the best bid/ask using the square root of each
/// side's size as the weight. The square root dampens the outsized influence
/// a single large order has in a thin book.
fn microprice(best_bid: &BookLevel, best_ask: &BookLevel) -> Decimal {
    let bid_weight = best_bid.size.max(Decimal::ZERO).sqrt().unwrap_or_default();
    let ask_weight = best_ask.size.max(Decimal::ZERO).sqrt().unwrap_or_default();
    let total = bid_weight + ask_weight;
    if total == Decimal::ZERO {
        return (best_bid.price + best_ask.price) / Decimal::TWO;
    }
    // Price is pulled toward the thinner side: weight each price by the
    // opposite side's (rooted) size.
    (best_bid.price * ask_weight + best_ask.price * bid_weight) / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(
        venue: Venue,
        sequence: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    ) -> MarketSnapshot {
        MarketSnapshot {
            venue,
            symbol: "BTCUSDT".to_string(),
            sequence,
            captured_at: Utc::now(),
            bids: bids.into_iter().map(|(p, s)| BookLevel::new(p, s)).collect(),
            asks: asks.into_iter().map(|(p, s)| BookLevel::new(p, s)).collect(),
        }
    }

    fn engine() -> SignalEngine {
        SignalEngine::new(SignalConfig::default())
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let prev = snapshot(Venue::Binance, 1, vec![(dec!(100), dec!(1))], vec![(dec!(101), dec!(1))]);
        let mut cur = snapshot(Venue::Kraken, 2, vec![(dec!(100), dec!(1))], vec![(dec!(101), dec!(1))]);
        assert!(matches!(
            engine().compute_signals(&cur, &prev),
            Err(SignalError::MismatchedPair { .. })
        ));

        cur.venue = Venue::Binance;
        cur.symbol = "ETHUSDT".to_string();
        assert!(matches!(
            engine().compute_signals(&cur, &prev),
            Err(SignalError::MismatchedPair { .. })
        ));
    }

    #[test]
    fn test_out_of_order_sequence_is_rejected() {
        let prev = snapshot(Venue::Binance, 5, vec![(dec!(100), dec!(1))], vec![(dec!(101), dec!(1))]);
        let cur = snapshot(Venue::Binance, 5, vec![(dec!(100), dec!(1))], vec![(dec!(101), dec!(1))]);
        assert!(matches!(
            engine().compute_signals(&cur, &prev),
            Err(SignalError::OutOfOrder { previous: 5, current: 5 })
        ));
    }

    #[test]
    fn test_unchanged_book_is_neutral() {
        let prev = snapshot(
            Venue::Binance,
            1,
            vec![(dec!(100), dec!(2)), (dec!(99), dec!(3))],
            vec![(dec!(101), dec!(2)), (dec!(102), dec!(3))],
        );
        let mut cur = prev.clone();
        cur.sequence = 2;

        let signal = engine().compute_signals(&cur, &prev).unwrap();
        assert_eq!(signal.ofi, Decimal::ZERO);
        assert_eq!(signal.pressure, BookPressure::Neutral);
    }

    #[test]
    fn test_bid_side_add_produces_strong_pressure() {
        let prev = snapshot(
            Venue::Binance,
            1,
            vec![(dec!(100), dec!(2))],
            vec![(dec!(101), dec!(2))],
        );
        // Bids grow, asks shrink: pure buying pressure.
        let cur = snapshot(
            Venue::Binance,
            2,
            vec![(dec!(100), dec!(6))],
            vec![(dec!(101), dec!(1))],
        );

        let signal = engine().compute_signals(&cur, &prev).unwrap();
        // bid_flow = +4, ask_flow = -1 -> ofi = 5/5 = 1
        assert_eq!(signal.ofi, Decimal::ONE);
        match signal.pressure {
            BookPressure::Strong { direction, confidence } => {
                assert_eq!(direction, PressureDirection::Bid);
                assert_eq!(confidence, Decimal::ONE);
            }
            other => panic!("expected strong pressure, got {:?}", other),
        }
    }

    #[test]
    fn test_price_improvement_counts_whole_level() {
        let prev = snapshot(
            Venue::Binance,
            1,
            vec![(dec!(100), dec!(2))],
            vec![(dec!(101), dec!(2))],
        );
        // Best bid steps up a tick: the full new size counts as added flow.
        let cur = snapshot(
            Venue::Binance,
            2,
            vec![(dec!(100.5), dec!(3))],
            vec![(dec!(101), dec!(2))],
        );

        let signal = engine().compute_signals(&cur, &prev).unwrap();
        assert!(signal.ofi > Decimal::ZERO);
    }

    #[test]
    fn test_deep_levels_are_downweighted() {
        let prev = snapshot(
            Venue::Binance,
            1,
            vec![(dec!(100), dec!(1)), (dec!(99), dec!(1))],
            vec![(dec!(101), dec!(1))],
        );
        // +2 at level 1 (weight 1/2) vs +1 at the ask touch (weight 1).
        let cur = snapshot(
            Venue::Binance,
            2,
            vec![(dec!(100), dec!(1)), (dec!(99), dec!(3))],
            vec![(dec!(101), dec!(2))],
        );

        let signal = engine().compute_signals(&cur, &prev).unwrap();
        // Deep bid add (weighted to 1.0) equals touch ask add (1.0): net zero.
        assert_eq!(signal.ofi, Decimal::ZERO);
    }

    #[test]
    fn test_microprice_pulls_toward_thin_side() {
        let prev = snapshot(
            Venue::Binance,
            1,
            vec![(dec!(100), dec!(4))],
            vec![(dec!(102), dec!(1))],
        );
        let mut cur = prev.clone();
        cur.sequence = 2;

        let signal = engine().compute_signals(&cur, &prev).unwrap();
        // Heavy bid, thin ask: fair value sits above the midpoint.
        let mid = dec!(101);
        assert!(signal.microprice > mid);
        assert!(signal.microprice < dec!(102));
    }

    #[test]
    fn test_confidence_clamped_by_reference_notional() {
        let config = SignalConfig {
            reference_notional: dec!(1000),
            ..SignalConfig::default()
        };
        let engine = SignalEngine::new(config);

        let prev = snapshot(
            Venue::Binance,
            1,
            vec![(dec!(100), dec!(100))],
            vec![(dec!(101), dec!(100))],
        );
        let mut cur = prev.clone();
        cur.sequence = 2;

        let signal = engine.compute_signals(&cur, &prev).unwrap();
        assert_eq!(signal.confidence, Decimal::ONE);
    }
}
