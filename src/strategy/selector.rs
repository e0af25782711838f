//! Execution strategy selection.
//!
//! A state-free decision table: given an opportunity and the current hedge
//! protection level, produce an execution plan. No I/O, no retained state;
//! the same inputs always yield the same plan.

use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::venue::{OrderIntent, OrderSide, TimeInForce};

use super::evaluator::Opportunity;

/// The three execution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StrategyKind {
    /// Both legs placed in parallel with IOC semantics; a leg that fails to
    /// fill immediately aborts the plan.
    Simultaneous,
    /// Primary leg first; bounded wait for an improved secondary price with
    /// a market-order fallback. Safe only under a standing hedge.
    SequentialProtected,
    /// Shift existing inventory between venues instead of opening new net
    /// exposure; the hedge leg moves by the net change only.
    PortfolioRebalance,
}

/// One execution attempt's worth of orders plus selection metadata.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub strategy: StrategyKind,
    pub symbol: String,
    /// Sell leg on the rich venue. Placed first where ordering matters.
    pub primary: OrderIntent,
    /// Buy leg on the cheap venue.
    pub secondary: OrderIntent,
    /// Bounded wait for the secondary leg (sequential strategy only).
    pub secondary_wait: Duration,
    pub confidence: Decimal,
    pub expected_profit: Decimal,
}

/// State-free decision table over (opportunity, hedge protection).
#[derive(Debug, Clone)]
pub struct ExecutionStrategySelector {
    config: ExecutionConfig,
}

impl ExecutionStrategySelector {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Pick a strategy and materialize the plan.
    ///
    /// `hedge_protection_level` is in [0, 1]: the fraction of current spot
    /// exposure already offset by the standing derivatives leg.
    pub fn select(&self, opportunity: &Opportunity, hedge_protection_level: Decimal) -> ExecutionPlan {
        let strategy = if opportunity.confidence > self.config.high_confidence_threshold {
            StrategyKind::Simultaneous
        } else if hedge_protection_level > self.config.protected_hedge_threshold {
            StrategyKind::SequentialProtected
        } else {
            StrategyKind::PortfolioRebalance
        };

        debug!(
            symbol = %opportunity.symbol,
            ?strategy,
            confidence = %opportunity.confidence,
            %hedge_protection_level,
            "Selected execution strategy"
        );

        // Every strategy places immediate-or-cancel legs; the sequential
        // strategy chases its secondary with repeated IOC attempts rather
        // than a resting order.
        let tif = TimeInForce::ImmediateOrCancel;

        let primary = OrderIntent::limit(
            opportunity.sell_venue,
            &opportunity.symbol,
            OrderSide::Sell,
            opportunity.sell_price,
            opportunity.quantity,
            tif,
        );
        let secondary = OrderIntent::limit(
            opportunity.buy_venue,
            &opportunity.symbol,
            OrderSide::Buy,
            opportunity.buy_price,
            opportunity.quantity,
            tif,
        );

        ExecutionPlan {
            strategy,
            symbol: opportunity.symbol.clone(),
            primary,
            secondary,
            secondary_wait: self.secondary_wait(opportunity),
            confidence: opportunity.confidence,
            expected_profit: opportunity.expected_profit,
        }
    }

    /// The bounded secondary wait, halved under size pressure.
    fn secondary_wait(&self, opportunity: &Opportunity) -> Duration {
        let base = Duration::from_secs(self.config.secondary_wait_secs);
        if opportunity.notional() > self.config.size_pressure_notional {
            base / 2
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::Venue;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn opportunity(confidence: Decimal) -> Opportunity {
        Opportunity {
            symbol: "BTCUSDT".to_string(),
            buy_venue: Venue::Kraken,
            sell_venue: Venue::Binance,
            buy_price: dec!(100),
            sell_price: dec!(101),
            quantity: dec!(1),
            expected_profit: dec!(0.8),
            confidence,
            detected_at: Utc::now(),
        }
    }

    fn selector() -> ExecutionStrategySelector {
        ExecutionStrategySelector::new(ExecutionConfig::default())
    }

    #[test]
    fn test_high_confidence_runs_simultaneous() {
        let plan = selector().select(&opportunity(dec!(0.9)), Decimal::ZERO);
        assert_eq!(plan.strategy, StrategyKind::Simultaneous);
        assert_eq!(plan.primary.side, OrderSide::Sell);
        assert_eq!(plan.primary.venue, Venue::Binance);
        assert_eq!(plan.secondary.side, OrderSide::Buy);
        assert_eq!(plan.secondary.venue, Venue::Kraken);
    }

    #[test]
    fn test_protected_hedge_runs_sequential() {
        let plan = selector().select(&opportunity(dec!(0.5)), dec!(0.9));
        assert_eq!(plan.strategy, StrategyKind::SequentialProtected);
        assert_eq!(plan.secondary_wait, Duration::from_secs(30));
    }

    #[test]
    fn test_fallback_is_portfolio_rebalance() {
        let plan = selector().select(&opportunity(dec!(0.5)), dec!(0.2));
        assert_eq!(plan.strategy, StrategyKind::PortfolioRebalance);
    }

    #[test]
    fn test_confidence_wins_over_protection() {
        // Decision table order: confidence is checked first.
        let plan = selector().select(&opportunity(dec!(0.95)), dec!(0.95));
        assert_eq!(plan.strategy, StrategyKind::Simultaneous);
    }

    #[test]
    fn test_size_pressure_halves_secondary_wait() {
        let mut opp = opportunity(dec!(0.5));
        opp.quantity = dec!(1000); // ~101k notional > 25k threshold
        let plan = selector().select(&opp, dec!(0.9));
        assert_eq!(plan.secondary_wait, Duration::from_secs(15));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let opp = opportunity(dec!(0.6));
        let a = selector().select(&opp, dec!(0.5));
        let b = selector().select(&opp, dec!(0.5));
        assert_eq!(a.strategy, b.strategy);
        assert_eq!(a.primary, b.primary);
        assert_eq!(a.secondary, b.secondary);
    }
}
