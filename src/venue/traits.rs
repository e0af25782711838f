//! Collaborator trait seams.
//!
//! Everything venue-specific (wire protocols, authentication, reconnection,
//! symbol translation) lives behind these traits. The core consumes
//! normalized snapshots and places normalized intents; implementations must
//! uphold the contracts documented per method.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{Balance, Fill, GatewayError, MarketSnapshot, OrderIntent};
use super::Venue;

/// Streaming source of normalized order-book snapshots for one venue.
///
/// Implementations must deliver snapshots for a given symbol with
/// monotonically increasing sequence numbers; the signal engine drops
/// out-of-order or duplicate updates rather than reprocessing them.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn venue(&self) -> Venue;

    /// Subscribe to snapshots for a symbol. The receiver yields each new
    /// snapshot as the venue's book evolves.
    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<MarketSnapshot>, GatewayError>;
}

/// Order placement and cancellation for one venue.
///
/// Must support immediate-or-cancel semantics: an IOC order either returns
/// a `Fill` with status `Filled`/`PartiallyFilled` or one with status
/// `Unfilled` after the unfilled remainder is cancelled venue-side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn venue(&self) -> Venue;

    async fn place(&self, intent: &OrderIntent) -> Result<Fill, GatewayError>;

    async fn cancel(&self, order_id: u64) -> Result<(), GatewayError>;
}

/// Fresh balance queries.
///
/// Results must never be cached by this core: a stale balance under real
/// exposure is a correctness bug, not a performance one.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn get_balance(&self, venue: Venue, asset: &str) -> Result<Balance, GatewayError>;
}
