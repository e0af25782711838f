//! Opportunity evaluation.
//!
//! Applies, in order: the spread-after-fees threshold, the
//! top-level-liquidity fraction cap, and the per-symbol position cap.
//! Missing or stale snapshots yield no opportunity rather than a
//! best-effort guess.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::config::OpportunityConfig;
use crate::signal::DivergenceSignal;
use crate::venue::{MarketSnapshot, Venue};

/// A proposed cross-venue trade. Created here, consumed once by the
/// strategy selector, then discarded.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub symbol: String,
    /// Venue with the cheaper ask (we buy here).
    pub buy_venue: Venue,
    /// Venue with the richer bid (we sell here).
    pub sell_venue: Venue,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub quantity: Decimal,
    /// Expected profit in quote currency after both legs' taker fees.
    pub expected_profit: Decimal,
    pub confidence: Decimal,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    /// Notional of the larger leg in quote currency.
    pub fn notional(&self) -> Decimal {
        self.sell_price.max(self.buy_price) * self.quantity
    }
}

/// Threshold gate from divergence signal to opportunity.
#[derive(Debug, Clone)]
pub struct OpportunityEvaluator {
    config: OpportunityConfig,
}

impl OpportunityEvaluator {
    pub fn new(config: OpportunityConfig) -> Self {
        Self { config }
    }

    /// Evaluate a divergence against the current books and position.
    ///
    /// `current_symbol_notional` is the absolute quote value already held in
    /// this symbol across venues (read from the risk manager's snapshot).
    pub fn evaluate(
        &self,
        divergence: &DivergenceSignal,
        books: &HashMap<Venue, MarketSnapshot>,
        current_symbol_notional: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Opportunity> {
        let (symbol, venue_a, venue_b, confidence) = match divergence {
            DivergenceSignal::Directional {
                symbol,
                leader,
                follower,
                confidence,
                ..
            } => (symbol, *leader, *follower, *confidence),
            DivergenceSignal::None => return None,
        };

        let book_a = self.fresh_book(books, venue_a, now)?;
        let book_b = self.fresh_book(books, venue_b, now)?;

        // Buy where the ask is cheap, sell where the bid is rich.
        let (buy_book, sell_book) = {
            let ask_a = book_a.best_ask()?;
            let ask_b = book_b.best_ask()?;
            if ask_a.price <= ask_b.price {
                (book_a, book_b)
            } else {
                (book_b, book_a)
            }
        };

        let buy_touch = buy_book.best_ask()?;
        let sell_touch = sell_book.best_bid()?;

        let mid = (buy_touch.price + sell_touch.price) / Decimal::TWO;
        if mid <= Decimal::ZERO {
            return None;
        }

        // (1) Spread after fees, as a rate on mid.
        let fee_per_unit =
            self.config.taker_fee_rate * (buy_touch.price + sell_touch.price);
        let edge_per_unit = sell_touch.price - buy_touch.price - fee_per_unit;
        let spread_after_fees = edge_per_unit / mid;

        if spread_after_fees < self.config.min_spread_after_fees {
            debug!(
                %symbol,
                %spread_after_fees,
                threshold = %self.config.min_spread_after_fees,
                "Spread after fees below threshold"
            );
            return None;
        }

        // (2) Size at most a fraction of the thinner top level.
        let top_liquidity = buy_touch.size.min(sell_touch.size);
        let quantity = top_liquidity * self.config.max_book_fraction;
        if quantity <= Decimal::ZERO {
            return None;
        }

        // (3) Absolute per-symbol position cap.
        let new_notional = quantity * mid;
        if current_symbol_notional + new_notional > self.config.max_symbol_notional {
            debug!(
                %symbol,
                current = %current_symbol_notional,
                additional = %new_notional,
                cap = %self.config.max_symbol_notional,
                "Per-symbol position cap reached"
            );
            return None;
        }

        let expected_profit = edge_per_unit * quantity;

        Some(Opportunity {
            symbol: symbol.clone(),
            buy_venue: buy_book.venue,
            sell_venue: sell_book.venue,
            buy_price: buy_touch.price,
            sell_price: sell_touch.price,
            quantity,
            expected_profit,
            confidence,
            detected_at: now,
        })
    }

    /// A snapshot is usable only if present and fresh. Fails closed.
    fn fresh_book<'a>(
        &self,
        books: &'a HashMap<Venue, MarketSnapshot>,
        venue: Venue,
        now: DateTime<Utc>,
    ) -> Option<&'a MarketSnapshot> {
        let book = match books.get(&venue) {
            Some(book) => book,
            None => {
                debug!(%venue, "No snapshot for venue, failing closed");
                return None;
            }
        };
        if book.age_ms(now) > self.config.max_snapshot_age_ms {
            debug!(
                %venue,
                age_ms = book.age_ms(now),
                "Stale snapshot, failing closed"
            );
            return None;
        }
        Some(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::PressureDirection;
    use crate::venue::BookLevel;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn snapshot(venue: Venue, bid: (Decimal, Decimal), ask: (Decimal, Decimal), at: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot {
            venue,
            symbol: "BTCUSDT".to_string(),
            sequence: 1,
            captured_at: at,
            bids: vec![BookLevel::new(bid.0, bid.1)],
            asks: vec![BookLevel::new(ask.0, ask.1)],
        }
    }

    fn divergence() -> DivergenceSignal {
        DivergenceSignal::Directional {
            symbol: "BTCUSDT".to_string(),
            leader: Venue::Binance,
            follower: Venue::Kraken,
            expected_move: PressureDirection::Bid,
            divergence: dec!(0.6),
            confidence: dec!(0.9),
        }
    }

    fn books(now: DateTime<Utc>) -> HashMap<Venue, MarketSnapshot> {
        let mut books = HashMap::new();
        // Kraken asks 100, Binance bids 101: a 1% gross edge.
        books.insert(
            Venue::Kraken,
            snapshot(Venue::Kraken, (dec!(99.8), dec!(4)), (dec!(100), dec!(4)), now),
        );
        books.insert(
            Venue::Binance,
            snapshot(Venue::Binance, (dec!(101), dec!(8)), (dec!(101.2), dec!(8)), now),
        );
        books
    }

    #[test]
    fn test_profitable_divergence_yields_opportunity() {
        let evaluator = OpportunityEvaluator::new(OpportunityConfig::default());
        let now = Utc::now();

        let opp = evaluator
            .evaluate(&divergence(), &books(now), Decimal::ZERO, now)
            .expect("expected an opportunity");

        assert_eq!(opp.buy_venue, Venue::Kraken);
        assert_eq!(opp.sell_venue, Venue::Binance);
        assert_eq!(opp.buy_price, dec!(100));
        assert_eq!(opp.sell_price, dec!(101));
        // 25% of the thinner (4) top level.
        assert_eq!(opp.quantity, dec!(1));
        assert!(opp.expected_profit > Decimal::ZERO);
    }

    #[test]
    fn test_no_divergence_yields_nothing() {
        let evaluator = OpportunityEvaluator::new(OpportunityConfig::default());
        let now = Utc::now();
        assert!(evaluator
            .evaluate(&DivergenceSignal::None, &books(now), Decimal::ZERO, now)
            .is_none());
    }

    #[test]
    fn test_stale_snapshot_fails_closed() {
        let evaluator = OpportunityEvaluator::new(OpportunityConfig::default());
        let now = Utc::now();
        let mut stale = books(now - Duration::seconds(5));
        // One venue fresh, one stale: still no opportunity.
        stale.insert(
            Venue::Binance,
            snapshot(Venue::Binance, (dec!(101), dec!(8)), (dec!(101.2), dec!(8)), now),
        );

        assert!(evaluator
            .evaluate(&divergence(), &stale, Decimal::ZERO, now)
            .is_none());
    }

    #[test]
    fn test_missing_snapshot_fails_closed() {
        let evaluator = OpportunityEvaluator::new(OpportunityConfig::default());
        let now = Utc::now();
        let mut partial = books(now);
        partial.remove(&Venue::Kraken);

        assert!(evaluator
            .evaluate(&divergence(), &partial, Decimal::ZERO, now)
            .is_none());
    }

    #[test]
    fn test_thin_spread_is_rejected() {
        let evaluator = OpportunityEvaluator::new(OpportunityConfig::default());
        let now = Utc::now();
        let mut thin = HashMap::new();
        // 0.05% gross edge, eaten by two 0.1% fee legs.
        thin.insert(
            Venue::Kraken,
            snapshot(Venue::Kraken, (dec!(99.9), dec!(4)), (dec!(100), dec!(4)), now),
        );
        thin.insert(
            Venue::Binance,
            snapshot(Venue::Binance, (dec!(100.05), dec!(8)), (dec!(100.1), dec!(8)), now),
        );

        assert!(evaluator
            .evaluate(&divergence(), &thin, Decimal::ZERO, now)
            .is_none());
    }

    #[test]
    fn test_position_cap_blocks_new_exposure() {
        let evaluator = OpportunityEvaluator::new(OpportunityConfig::default());
        let now = Utc::now();

        let near_cap = OpportunityConfig::default().max_symbol_notional - dec!(10);
        assert!(evaluator
            .evaluate(&divergence(), &books(now), near_cap, now)
            .is_none());
    }
}
