//! Normalized market data and order types shared across venues.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Venue;

/// A single price level of an order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Notional value of this level in quote currency.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Immutable per-(venue, symbol) order book snapshot.
///
/// Levels are sorted best-first: descending bids, ascending asks. A snapshot
/// is superseded by the next one for the same (venue, symbol); sequence
/// numbers are strictly increasing per feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub venue: Venue,
    pub symbol: String,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl MarketSnapshot {
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// Arithmetic midpoint of the best bid/ask, if both sides are present.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Total notional resting at the top of book (both sides).
    pub fn top_of_book_notional(&self) -> Decimal {
        let bid = self.best_bid().map(BookLevel::notional).unwrap_or_default();
        let ask = self.best_ask().map(BookLevel::notional).unwrap_or_default();
        bid + ask
    }

    /// Age of the snapshot relative to `now`.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.captured_at).num_milliseconds()
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Signed direction multiplier: +1 for buys, -1 for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Fill immediately to the extent possible, cancel the remainder.
    ImmediateOrCancel,
    GoodTilCancelled,
}

/// Terminal status of an order as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Unfilled,
    Cancelled,
}

/// A single order to be placed on one venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub venue: Venue,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Required for limit orders, ignored for market orders.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub time_in_force: TimeInForce,
}

impl OrderIntent {
    /// Convenience constructor for a market order.
    pub fn market(venue: Venue, symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            venue,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            time_in_force: TimeInForce::ImmediateOrCancel,
        }
    }

    /// Convenience constructor for a limit order.
    pub fn limit(
        venue: Venue,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            venue,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            time_in_force,
        }
    }
}

/// Execution report returned by a gateway for a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub venue: Venue,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Average execution price; the limit price for unfilled orders.
    pub price: Decimal,
    pub executed_qty: Decimal,
    pub filled_at: DateTime<Utc>,
}

impl Fill {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Executed notional in quote currency.
    pub fn notional(&self) -> Decimal {
        self.price * self.executed_qty
    }
}

/// Account balance for one asset on one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub venue: Venue,
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Errors surfaced by the order and balance gateways.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("order rejected by {venue}: {reason}")]
    Rejected { venue: Venue, reason: String },

    #[error("request to {0} timed out")]
    Timeout(Venue),

    #[error("venue {0} unreachable")]
    VenueUnreachable(Venue),

    #[error("unknown order id {0}")]
    UnknownOrder(u64),

    #[error("insufficient balance on {venue} for {asset}")]
    InsufficientBalance { venue: Venue, asset: String },
}

impl GatewayError {
    /// Connectivity failures are fatal while uncovered exposure is open;
    /// everything else stays inside the active strategy's retry policy.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_) | GatewayError::VenueUnreachable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> MarketSnapshot {
        MarketSnapshot {
            venue: Venue::Binance,
            symbol: "BTCUSDT".to_string(),
            sequence: 1,
            captured_at: Utc::now(),
            bids: bids.into_iter().map(|(p, s)| BookLevel::new(p, s)).collect(),
            asks: asks.into_iter().map(|(p, s)| BookLevel::new(p, s)).collect(),
        }
    }

    #[test]
    fn test_mid_price() {
        let snap = snapshot(vec![(dec!(100), dec!(1))], vec![(dec!(102), dec!(1))]);
        assert_eq!(snap.mid_price(), Some(dec!(101)));
    }

    #[test]
    fn test_mid_price_missing_side() {
        let snap = snapshot(vec![(dec!(100), dec!(1))], vec![]);
        assert_eq!(snap.mid_price(), None);
    }

    #[test]
    fn test_top_of_book_notional() {
        let snap = snapshot(vec![(dec!(100), dec!(2))], vec![(dec!(102), dec!(1))]);
        assert_eq!(snap.top_of_book_notional(), dec!(302));
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(OrderSide::Buy.sign(), Decimal::ONE);
        assert_eq!(OrderSide::Sell.sign(), Decimal::NEGATIVE_ONE);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }
}
