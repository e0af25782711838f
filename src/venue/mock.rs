//! In-process paper venue for paper trading and scenario tests.
//!
//! Implements all three collaborator seams against scripted books and
//! configurable fill behavior, so the whole decision core can run without a
//! single network call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::traits::{BalanceOracle, OrderGateway, SnapshotSource};
use super::types::{
    Balance, Fill, GatewayError, MarketSnapshot, OrderIntent, OrderStatus, OrderType, TimeInForce,
};
use super::Venue;

/// How the paper venue responds to placed orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillBehavior {
    /// Every order fills immediately at its price (or top of book).
    FillAll,
    /// Market orders fill, limit orders rest (or come back unfilled for IOC).
    FillMarketOnly,
    /// Nothing fills; GTC limit orders rest until cancelled.
    FillNone,
    /// Every order is rejected.
    RejectAll,
}

#[derive(Debug, Default)]
struct PaperState {
    books: HashMap<String, MarketSnapshot>,
    balances: HashMap<String, Decimal>,
    subscribers: HashMap<String, Vec<mpsc::Sender<MarketSnapshot>>>,
    open_orders: HashMap<u64, OrderIntent>,
    placed: Vec<(u64, OrderIntent)>,
    fills: Vec<Fill>,
    cancelled: Vec<u64>,
}

/// Paper implementation of one venue.
pub struct PaperVenue {
    venue: Venue,
    behavior: RwLock<FillBehavior>,
    state: Arc<RwLock<PaperState>>,
    order_seq: AtomicU64,
}

impl PaperVenue {
    /// Which venue this instance simulates. Inherent so callers don't need
    /// to pick between the trait `venue()` methods.
    pub fn venue_id(&self) -> Venue {
        self.venue
    }

    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            behavior: RwLock::new(FillBehavior::FillAll),
            state: Arc::new(RwLock::new(PaperState::default())),
            order_seq: AtomicU64::new(1),
        }
    }

    pub async fn set_behavior(&self, behavior: FillBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Install or replace the current book for a symbol and fan it out to
    /// all subscribers.
    pub async fn push_snapshot(&self, snapshot: MarketSnapshot) {
        let mut state = self.state.write().await;
        if let Some(senders) = state.subscribers.get_mut(&snapshot.symbol) {
            senders.retain(|tx| tx.try_send(snapshot.clone()).is_ok());
        }
        state.books.insert(snapshot.symbol.clone(), snapshot);
    }

    pub async fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_string(), amount);
    }

    /// All fills produced so far (successful executions only).
    pub async fn fills(&self) -> Vec<Fill> {
        self.state
            .read()
            .await
            .fills
            .iter()
            .filter(|f| f.executed_qty > Decimal::ZERO)
            .cloned()
            .collect()
    }

    /// Order ids that were explicitly cancelled.
    pub async fn cancelled_orders(&self) -> Vec<u64> {
        self.state.read().await.cancelled.clone()
    }

    /// Currently resting (placed, unfilled, uncancelled) orders.
    pub async fn open_orders(&self) -> Vec<(u64, OrderIntent)> {
        self.state
            .read()
            .await
            .open_orders
            .iter()
            .map(|(id, intent)| (*id, intent.clone()))
            .collect()
    }

    pub async fn placed_count(&self) -> usize {
        self.state.read().await.placed.len()
    }

    /// Execution price for a filled order: limit price when given, otherwise
    /// the touch on the scripted book.
    async fn execution_price(&self, intent: &OrderIntent) -> Decimal {
        if let Some(price) = intent.price {
            return price;
        }
        let state = self.state.read().await;
        let book = state.books.get(&intent.symbol);
        match intent.side {
            super::OrderSide::Buy => book
                .and_then(|b| b.best_ask().map(|l| l.price))
                .unwrap_or_default(),
            super::OrderSide::Sell => book
                .and_then(|b| b.best_bid().map(|l| l.price))
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SnapshotSource for PaperVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<MarketSnapshot>, GatewayError> {
        let (tx, rx) = mpsc::channel(256);
        let mut state = self.state.write().await;
        // Replay the current book so late subscribers start warm.
        if let Some(book) = state.books.get(symbol) {
            let _ = tx.try_send(book.clone());
        }
        state
            .subscribers
            .entry(symbol.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[async_trait]
impl OrderGateway for PaperVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn place(&self, intent: &OrderIntent) -> Result<Fill, GatewayError> {
        let behavior = *self.behavior.read().await;
        if behavior == FillBehavior::RejectAll {
            return Err(GatewayError::Rejected {
                venue: self.venue,
                reason: "paper venue rejecting all orders".to_string(),
            });
        }

        let order_id = self.order_seq.fetch_add(1, Ordering::SeqCst);
        let fills_now = match (behavior, intent.order_type) {
            (FillBehavior::FillAll, _) => true,
            (FillBehavior::FillMarketOnly, OrderType::Market) => true,
            _ => false,
        };

        let price = self.execution_price(intent).await;
        let mut state = self.state.write().await;
        state.placed.push((order_id, intent.clone()));

        let fill = if fills_now {
            Fill {
                order_id,
                venue: self.venue,
                symbol: intent.symbol.clone(),
                side: intent.side,
                status: OrderStatus::Filled,
                price,
                executed_qty: intent.quantity,
                filled_at: Utc::now(),
            }
        } else {
            if intent.time_in_force == TimeInForce::GoodTilCancelled {
                state.open_orders.insert(order_id, intent.clone());
            }
            Fill {
                order_id,
                venue: self.venue,
                symbol: intent.symbol.clone(),
                side: intent.side,
                status: OrderStatus::Unfilled,
                price,
                executed_qty: Decimal::ZERO,
                filled_at: Utc::now(),
            }
        };

        debug!(
            venue = %self.venue,
            symbol = %intent.symbol,
            side = ?intent.side,
            order_type = ?intent.order_type,
            status = ?fill.status,
            "Paper order placed"
        );

        state.fills.push(fill.clone());
        Ok(fill)
    }

    async fn cancel(&self, order_id: u64) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if state.open_orders.remove(&order_id).is_none() {
            // Cancelling an already-terminal order is a no-op for IOC flows,
            // but an id we never issued is a caller bug.
            if !state.placed.iter().any(|(id, _)| *id == order_id) {
                return Err(GatewayError::UnknownOrder(order_id));
            }
        }
        state.cancelled.push(order_id);
        Ok(())
    }
}

#[async_trait]
impl BalanceOracle for PaperVenue {
    async fn get_balance(&self, venue: Venue, asset: &str) -> Result<Balance, GatewayError> {
        if venue != self.venue {
            return Err(GatewayError::VenueUnreachable(venue));
        }
        let state = self.state.read().await;
        let free = state.balances.get(asset).copied().unwrap_or_default();
        Ok(Balance {
            venue,
            asset: asset.to_string(),
            free,
            locked: Decimal::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{BookLevel, OrderSide};
    use rust_decimal_macros::dec;

    fn book(venue: Venue, seq: u64, bid: Decimal, ask: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            venue,
            symbol: "BTCUSDT".to_string(),
            sequence: seq,
            captured_at: Utc::now(),
            bids: vec![BookLevel::new(bid, dec!(2))],
            asks: vec![BookLevel::new(ask, dec!(2))],
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_at_touch() {
        let venue = PaperVenue::new(Venue::Binance);
        venue
            .push_snapshot(book(Venue::Binance, 1, dec!(100), dec!(101)))
            .await;

        let intent = OrderIntent::market(Venue::Binance, "BTCUSDT", OrderSide::Buy, dec!(1));
        let fill = venue.place(&intent).await.unwrap();

        assert!(fill.is_filled());
        assert_eq!(fill.price, dec!(101));
        assert_eq!(fill.executed_qty, dec!(1));
    }

    #[tokio::test]
    async fn test_fill_market_only_rests_gtc_limits() {
        let venue = PaperVenue::new(Venue::Kraken);
        venue.set_behavior(FillBehavior::FillMarketOnly).await;
        venue
            .push_snapshot(book(Venue::Kraken, 1, dec!(100), dec!(101)))
            .await;

        let intent = OrderIntent::limit(
            Venue::Kraken,
            "BTCUSDT",
            OrderSide::Buy,
            dec!(100.5),
            dec!(1),
            TimeInForce::GoodTilCancelled,
        );
        let fill = venue.place(&intent).await.unwrap();

        assert_eq!(fill.status, OrderStatus::Unfilled);
        assert_eq!(venue.open_orders().await.len(), 1);

        venue.cancel(fill.order_id).await.unwrap();
        assert!(venue.open_orders().await.is_empty());
        assert_eq!(venue.cancelled_orders().await, vec![fill.order_id]);
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_is_an_error() {
        let venue = PaperVenue::new(Venue::Binance);
        assert!(matches!(
            venue.cancel(999).await,
            Err(GatewayError::UnknownOrder(999))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_replays_current_book() {
        let venue = PaperVenue::new(Venue::Binance);
        venue
            .push_snapshot(book(Venue::Binance, 7, dec!(100), dec!(101)))
            .await;

        let mut rx = venue.subscribe("BTCUSDT").await.unwrap();
        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.sequence, 7);

        venue
            .push_snapshot(book(Venue::Binance, 8, dec!(100.5), dec!(101.5)))
            .await;
        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.sequence, 8);
    }
}
