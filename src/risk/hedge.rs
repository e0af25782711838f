//! Hedge tickets, uncovered positions, and the position book.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::venue::{Fill, InstrumentKind, OrderIntent, OrderSide, Venue};

/// Lifecycle of a hedge ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Hedge order submitted, not yet confirmed.
    Pending,
    /// Temporary hedge is on; waiting for the rescue to resolve.
    Filled,
    /// Rescue failed inside the bound; the hedge is now a permanent
    /// position adjustment with a known, bounded cost.
    Converted,
    /// Rescue succeeded; the temporary hedge was closed out.
    Cancelled,
}

/// An open remediation action against the standing derivatives leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeTicket {
    pub id: u64,
    pub venue: Venue,
    pub instrument: InstrumentKind,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub status: TicketStatus,
}

impl HedgeTicket {
    /// Open tickets block shutdown until resolved or escalated.
    pub fn is_open(&self) -> bool {
        matches!(self.status, TicketStatus::Pending | TicketStatus::Filled)
    }
}

/// A filled leg whose offsetting leg has not yet filled.
#[derive(Debug, Clone)]
pub struct UncoveredPosition {
    pub symbol: String,
    /// The missing leg that rescue execution must obtain.
    pub missing: OrderIntent,
    /// Reference price for notional and risk computations.
    pub reference_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl UncoveredPosition {
    pub fn new(symbol: &str, missing: OrderIntent, reference_price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            missing,
            reference_price,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn notional(&self) -> Decimal {
        self.missing.quantity * self.reference_price
    }

    pub fn uncovered_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.resolved_at.unwrap_or(now) - self.created_at).num_milliseconds()
    }
}

/// Signed per-(venue, symbol) quantity. Positive = long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub venue: Venue,
    pub symbol: String,
    pub quantity: Decimal,
}

/// The single source of truth for positions. Owned exclusively by the risk
/// manager's writer task; everyone else sees immutable snapshots.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: HashMap<(Venue, String), Decimal>,
}

impl PositionBook {
    pub fn apply_fill(&mut self, fill: &Fill) {
        if fill.executed_qty == Decimal::ZERO {
            return;
        }
        let delta = fill.side.sign() * fill.executed_qty;
        let entry = self
            .positions
            .entry((fill.venue, fill.symbol.clone()))
            .or_insert(Decimal::ZERO);
        *entry += delta;
        if *entry == Decimal::ZERO {
            self.positions.remove(&(fill.venue, fill.symbol.clone()));
        }
    }

    pub fn quantity(&self, venue: Venue, symbol: &str) -> Decimal {
        self.positions
            .get(&(venue, symbol.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Net base quantity for a symbol across the spot venues only.
    pub fn spot_net(&self, symbol: &str) -> Decimal {
        Venue::spot_venues()
            .iter()
            .map(|v| self.quantity(*v, symbol))
            .sum()
    }

    /// Net delta in quote-currency terms across all venues, using the
    /// supplied mark prices. Symbols with no mark contribute nothing (and
    /// are the monitor's problem to flag, not to guess at).
    pub fn net_delta_value(&self, marks: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .iter()
            .map(|((_, symbol), qty)| {
                marks
                    .get(symbol)
                    .map(|mark| qty * mark)
                    .unwrap_or(Decimal::ZERO)
            })
            .sum()
    }

    /// Fraction of current spot exposure offset by the derivatives leg,
    /// in [0, 1]. With no spot exposure there is nothing to protect and
    /// the level is 1.
    pub fn hedge_protection_level(&self, symbol: &str) -> Decimal {
        let spot_net = self.spot_net(symbol);
        if spot_net == Decimal::ZERO {
            return Decimal::ONE;
        }
        let perp = self.quantity(Venue::hedge_venue(), symbol);
        // A protecting hedge points against the spot exposure.
        if perp.signum() == spot_net.signum() {
            return Decimal::ZERO;
        }
        (perp.abs() / spot_net.abs()).min(Decimal::ONE)
    }

    pub fn entries(&self) -> Vec<PositionEntry> {
        let mut entries: Vec<PositionEntry> = self
            .positions
            .iter()
            .map(|((venue, symbol), qty)| PositionEntry {
                venue: *venue,
                symbol: symbol.clone(),
                quantity: *qty,
            })
            .collect();
        entries.sort_by(|a, b| (a.venue.short_code(), &a.symbol).cmp(&(b.venue.short_code(), &b.symbol)));
        entries
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Immutable view published by the risk manager after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub entries: Vec<PositionEntry>,
    pub net_delta_value: Decimal,
    /// True while an uncovered window is active.
    pub uncovered: bool,
    pub hedge_protection_level: Decimal,
    pub open_tickets: usize,
    /// Current rolling volatility estimate (per-tick return RMS).
    pub volatility: Decimal,
    pub taken_at: DateTime<Utc>,
}

impl Default for PositionSnapshot {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            net_delta_value: Decimal::ZERO,
            uncovered: false,
            hedge_protection_level: Decimal::ONE,
            open_tickets: 0,
            volatility: Decimal::ZERO,
            taken_at: Utc::now(),
        }
    }
}

impl PositionSnapshot {
    /// Absolute quote value held in a symbol across venues.
    pub fn symbol_notional(&self, symbol: &str, mark: Decimal) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.symbol == symbol)
            .map(|e| (e.quantity * mark).abs())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::OrderStatus;
    use rust_decimal_macros::dec;

    fn fill(venue: Venue, side: OrderSide, qty: Decimal, price: Decimal) -> Fill {
        Fill {
            order_id: 1,
            venue,
            symbol: "BTCUSDT".to_string(),
            side,
            status: OrderStatus::Filled,
            price,
            executed_qty: qty,
            filled_at: Utc::now(),
        }
    }

    #[test]
    fn test_fills_accumulate_signed() {
        let mut book = PositionBook::default();
        book.apply_fill(&fill(Venue::Binance, OrderSide::Buy, dec!(2), dec!(100)));
        book.apply_fill(&fill(Venue::Binance, OrderSide::Sell, dec!(0.5), dec!(100)));

        assert_eq!(book.quantity(Venue::Binance, "BTCUSDT"), dec!(1.5));
    }

    #[test]
    fn test_flat_position_is_removed() {
        let mut book = PositionBook::default();
        book.apply_fill(&fill(Venue::Kraken, OrderSide::Buy, dec!(1), dec!(100)));
        book.apply_fill(&fill(Venue::Kraken, OrderSide::Sell, dec!(1), dec!(100)));

        assert!(book.is_flat());
    }

    #[test]
    fn test_net_delta_value_across_venues() {
        let mut book = PositionBook::default();
        book.apply_fill(&fill(Venue::Binance, OrderSide::Buy, dec!(2), dec!(100)));
        book.apply_fill(&fill(Venue::Hyperliquid, OrderSide::Sell, dec!(2), dec!(100)));

        let marks = HashMap::from([("BTCUSDT".to_string(), dec!(100))]);
        // Long 2 spot, short 2 perp: flat in quote terms.
        assert_eq!(book.net_delta_value(&marks), Decimal::ZERO);
    }

    #[test]
    fn test_hedge_protection_level() {
        let mut book = PositionBook::default();
        book.apply_fill(&fill(Venue::Binance, OrderSide::Buy, dec!(2), dec!(100)));
        assert_eq!(book.hedge_protection_level("BTCUSDT"), Decimal::ZERO);

        book.apply_fill(&fill(Venue::Hyperliquid, OrderSide::Sell, dec!(1), dec!(100)));
        assert_eq!(book.hedge_protection_level("BTCUSDT"), dec!(0.5));

        book.apply_fill(&fill(Venue::Hyperliquid, OrderSide::Sell, dec!(1), dec!(100)));
        assert_eq!(book.hedge_protection_level("BTCUSDT"), Decimal::ONE);
    }

    #[test]
    fn test_same_direction_perp_does_not_protect() {
        let mut book = PositionBook::default();
        book.apply_fill(&fill(Venue::Binance, OrderSide::Buy, dec!(2), dec!(100)));
        book.apply_fill(&fill(Venue::Hyperliquid, OrderSide::Buy, dec!(2), dec!(100)));

        assert_eq!(book.hedge_protection_level("BTCUSDT"), Decimal::ZERO);
    }

    #[test]
    fn test_flat_book_is_fully_protected() {
        let book = PositionBook::default();
        assert_eq!(book.hedge_protection_level("BTCUSDT"), Decimal::ONE);
    }

    #[test]
    fn test_ticket_open_states() {
        let mut ticket = HedgeTicket {
            id: 1,
            venue: Venue::Hyperliquid,
            instrument: InstrumentKind::Perpetual,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(1),
            created_at: Utc::now(),
            status: TicketStatus::Pending,
        };
        assert!(ticket.is_open());
        ticket.status = TicketStatus::Filled;
        assert!(ticket.is_open());
        ticket.status = TicketStatus::Converted;
        assert!(!ticket.is_open());
    }
}
