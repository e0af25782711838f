//! Order execution against the venue gateways.
//!
//! Carries out one `ExecutionPlan`. Every path is careful about partial
//! failure: a leg that fills without its counterpart is reported as an
//! uncovered position for the risk manager to remediate, never silently
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::venue::{
    Fill, GatewayError, OrderGateway, OrderIntent, OrderSide, Venue,
};

use super::selector::{ExecutionPlan, StrategyKind};

/// Terminal status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// All legs filled (after hedge netting, for the rebalance strategy).
    Completed,
    /// Nothing filled; no position change.
    Aborted,
    /// Exactly one leg filled; the missing leg needs rescue.
    PartialUncovered,
}

/// Result of executing a plan.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub strategy: StrategyKind,
    pub symbol: String,
    pub status: ExecutionStatus,
    /// Legs that actually executed (non-zero quantity).
    pub fills: Vec<Fill>,
    /// The leg that did not fill, when `status` is `PartialUncovered`.
    pub missing_leg: Option<OrderIntent>,
    /// Sell-minus-buy notional across filled legs; meaningful when
    /// `Completed`.
    pub realized_edge: Decimal,
    pub error: Option<GatewayError>,
}

impl ExecutionOutcome {
    fn aborted(plan: &ExecutionPlan, error: Option<GatewayError>) -> Self {
        Self {
            strategy: plan.strategy,
            symbol: plan.symbol.clone(),
            status: ExecutionStatus::Aborted,
            fills: Vec::new(),
            missing_leg: None,
            realized_edge: Decimal::ZERO,
            error,
        }
    }
}

/// Thin wrapper over the order gateways implementing the three strategies.
pub struct OrderExecutor {
    config: ExecutionConfig,
    gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
}

impl OrderExecutor {
    pub fn new(config: ExecutionConfig, gateways: HashMap<Venue, Arc<dyn OrderGateway>>) -> Self {
        Self { config, gateways }
    }

    fn gateway(&self, venue: Venue) -> Result<&Arc<dyn OrderGateway>, GatewayError> {
        self.gateways
            .get(&venue)
            .ok_or(GatewayError::VenueUnreachable(venue))
    }

    /// Execute a plan to completion, abort, or partial-uncovered.
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        info!(
            symbol = %plan.symbol,
            strategy = ?plan.strategy,
            expected_profit = %plan.expected_profit,
            "Executing plan"
        );

        let outcome = match plan.strategy {
            StrategyKind::Simultaneous => self.execute_simultaneous(plan).await?,
            StrategyKind::SequentialProtected => self.execute_sequential(plan).await?,
            StrategyKind::PortfolioRebalance => self.execute_rebalance(plan).await?,
        };

        info!(
            symbol = %outcome.symbol,
            status = ?outcome.status,
            fills = outcome.fills.len(),
            realized_edge = %outcome.realized_edge,
            "Execution finished"
        );
        Ok(outcome)
    }

    /// Both legs in parallel with IOC semantics. A leg that fails to fill
    /// immediately cancels the other side's remainder and aborts; a leg
    /// that fills while its counterpart does not becomes an uncovered
    /// position for the risk manager.
    async fn execute_simultaneous(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        let primary_gw = self.gateway(plan.primary.venue)?;
        let secondary_gw = self.gateway(plan.secondary.venue)?;

        let (primary_res, secondary_res) = tokio::join!(
            primary_gw.place(&plan.primary),
            secondary_gw.place(&plan.secondary)
        );

        let (primary_fill, primary_err) = split(primary_res);
        let (secondary_fill, secondary_err) = split(secondary_res);
        let error = primary_err.or(secondary_err);

        // Confirm cancellation of any leg that came back without a full
        // fill; IOC remainders are cancelled venue-side, this makes the
        // cancellation observable on our side as well.
        for fill in [&primary_fill, &secondary_fill].into_iter().flatten() {
            if !fill.is_filled() {
                let _ = self.gateway(fill.venue)?.cancel(fill.order_id).await;
            }
        }

        let primary_done = primary_fill.as_ref().is_some_and(Fill::is_filled);
        let secondary_done = secondary_fill.as_ref().is_some_and(Fill::is_filled);

        let outcome = match (primary_done, secondary_done) {
            (true, true) => {
                let fills = vec![primary_fill.unwrap(), secondary_fill.unwrap()];
                let realized_edge = edge(&fills);
                ExecutionOutcome {
                    strategy: plan.strategy,
                    symbol: plan.symbol.clone(),
                    status: ExecutionStatus::Completed,
                    fills,
                    missing_leg: None,
                    realized_edge,
                    error,
                }
            }
            (true, false) => {
                warn!(symbol = %plan.symbol, "Primary leg filled without secondary");
                ExecutionOutcome {
                    strategy: plan.strategy,
                    symbol: plan.symbol.clone(),
                    status: ExecutionStatus::PartialUncovered,
                    fills: vec![primary_fill.unwrap()],
                    missing_leg: Some(plan.secondary.clone()),
                    realized_edge: Decimal::ZERO,
                    error,
                }
            }
            (false, true) => {
                warn!(symbol = %plan.symbol, "Secondary leg filled without primary");
                ExecutionOutcome {
                    strategy: plan.strategy,
                    symbol: plan.symbol.clone(),
                    status: ExecutionStatus::PartialUncovered,
                    fills: vec![secondary_fill.unwrap()],
                    missing_leg: Some(plan.primary.clone()),
                    realized_edge: Decimal::ZERO,
                    error,
                }
            }
            (false, false) => ExecutionOutcome::aborted(plan, error),
        };
        Ok(outcome)
    }

    /// Primary leg first; then a bounded wait for an improved secondary
    /// price, falling back to a market order at timeout. Safe because the
    /// standing derivatives hedge caps directional risk during the wait.
    async fn execute_sequential(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        let primary_gw = self.gateway(plan.primary.venue)?;

        let primary_fill = match primary_gw.place(&plan.primary).await {
            Ok(fill) if fill.is_filled() => fill,
            Ok(fill) => {
                let _ = primary_gw.cancel(fill.order_id).await;
                return Ok(ExecutionOutcome::aborted(plan, None));
            }
            Err(e) => return Ok(ExecutionOutcome::aborted(plan, Some(e))),
        };

        let secondary_gw = self.gateway(plan.secondary.venue)?;
        let deadline = Instant::now() + plan.secondary_wait;
        let retry_interval = Duration::from_millis(self.config.retry_interval_ms);

        // Improved price: a buy bids below the touch, a sell offers above.
        let base_price = plan.secondary.price.unwrap_or_default();
        let improvement = base_price * self.config.price_improvement_step;
        let improved_price = match plan.secondary.side {
            OrderSide::Buy => base_price - improvement,
            OrderSide::Sell => base_price + improvement,
        };

        let mut improved = plan.secondary.clone();
        improved.price = Some(improved_price);

        while Instant::now() < deadline {
            match secondary_gw.place(&improved).await {
                Ok(fill) if fill.is_filled() => {
                    debug!(symbol = %plan.symbol, price = %fill.price, "Secondary filled at improved price");
                    let fills = vec![primary_fill, fill];
                    let realized_edge = edge(&fills);
                    return Ok(ExecutionOutcome {
                        strategy: plan.strategy,
                        symbol: plan.symbol.clone(),
                        status: ExecutionStatus::Completed,
                        fills,
                        missing_leg: None,
                        realized_edge,
                        error: None,
                    });
                }
                Ok(fill) => {
                    let _ = secondary_gw.cancel(fill.order_id).await;
                }
                Err(e) if e.is_connectivity() => {
                    return Ok(ExecutionOutcome {
                        strategy: plan.strategy,
                        symbol: plan.symbol.clone(),
                        status: ExecutionStatus::PartialUncovered,
                        fills: vec![primary_fill],
                        missing_leg: Some(plan.secondary.clone()),
                        realized_edge: Decimal::ZERO,
                        error: Some(e),
                    });
                }
                Err(e) => {
                    debug!(symbol = %plan.symbol, error = %e, "Improved-price attempt rejected");
                }
            }
            sleep(retry_interval.min(deadline - Instant::now())).await;
        }

        // Timeout: take the market.
        let market = OrderIntent::market(
            plan.secondary.venue,
            &plan.secondary.symbol,
            plan.secondary.side,
            plan.secondary.quantity,
        );
        match secondary_gw.place(&market).await {
            Ok(fill) if fill.is_filled() => {
                let fills = vec![primary_fill, fill];
                let realized_edge = edge(&fills);
                Ok(ExecutionOutcome {
                    strategy: plan.strategy,
                    symbol: plan.symbol.clone(),
                    status: ExecutionStatus::Completed,
                    fills,
                    missing_leg: None,
                    realized_edge,
                    error: None,
                })
            }
            Ok(_) | Err(_) => {
                warn!(symbol = %plan.symbol, "Market fallback failed, leg uncovered");
                Ok(ExecutionOutcome {
                    strategy: plan.strategy,
                    symbol: plan.symbol.clone(),
                    status: ExecutionStatus::PartialUncovered,
                    fills: vec![primary_fill],
                    missing_leg: Some(plan.secondary.clone()),
                    realized_edge: Decimal::ZERO,
                    error: None,
                })
            }
        }
    }

    /// Shift inventory: sell on the rich venue, buy on the cheap venue,
    /// then move the hedge leg by the net change only (often zero).
    async fn execute_rebalance(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        let sell_gw = self.gateway(plan.primary.venue)?;
        let buy_gw = self.gateway(plan.secondary.venue)?;

        let sell_fill = match sell_gw.place(&plan.primary).await {
            Ok(fill) => fill,
            Err(e) => return Ok(ExecutionOutcome::aborted(plan, Some(e))),
        };
        let buy_fill = match buy_gw.place(&plan.secondary).await {
            Ok(fill) => fill,
            Err(e) => {
                // Sell may have gone through; fall through to netting with
                // an empty buy so the hedge covers the difference.
                warn!(symbol = %plan.symbol, error = %e, "Buy leg failed during rebalance");
                let mut f = sell_fill.clone();
                f.executed_qty = Decimal::ZERO;
                f
            }
        };

        let fills: Vec<Fill> = [sell_fill, buy_fill]
            .into_iter()
            .filter(|f| f.executed_qty > Decimal::ZERO)
            .collect();

        // Signed net base-quantity change across both legs.
        let net: Decimal = fills
            .iter()
            .map(|f| f.side.sign() * f.executed_qty)
            .sum();

        if net != Decimal::ZERO {
            // Offset the net change on the derivatives leg.
            let hedge_side = if net > Decimal::ZERO {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let hedge = OrderIntent::market(
                Venue::hedge_venue(),
                &plan.symbol,
                hedge_side,
                net.abs(),
            );
            let hedge_gw = self.gateway(Venue::hedge_venue())?;
            match hedge_gw.place(&hedge).await {
                Ok(fill) if fill.is_filled() => {
                    info!(symbol = %plan.symbol, qty = %net.abs(), side = ?hedge_side, "Hedge adjusted by net change");
                    let mut fills = fills;
                    fills.push(fill);
                    let realized_edge = edge(&fills);
                    return Ok(ExecutionOutcome {
                        strategy: plan.strategy,
                        symbol: plan.symbol.clone(),
                        status: ExecutionStatus::Completed,
                        fills,
                        missing_leg: None,
                        realized_edge,
                        error: None,
                    });
                }
                Ok(_) | Err(_) => {
                    warn!(symbol = %plan.symbol, "Hedge adjustment failed, net change uncovered");
                    let missing = if net > Decimal::ZERO {
                        plan.primary.clone()
                    } else {
                        plan.secondary.clone()
                    };
                    return Ok(ExecutionOutcome {
                        strategy: plan.strategy,
                        symbol: plan.symbol.clone(),
                        status: ExecutionStatus::PartialUncovered,
                        fills,
                        missing_leg: Some(missing),
                        realized_edge: Decimal::ZERO,
                        error: None,
                    });
                }
            }
        }

        let status = if fills.is_empty() {
            ExecutionStatus::Aborted
        } else {
            ExecutionStatus::Completed
        };
        let realized_edge = edge(&fills);
        Ok(ExecutionOutcome {
            strategy: plan.strategy,
            symbol: plan.symbol.clone(),
            status,
            fills,
            missing_leg: None,
            realized_edge,
            error: None,
        })
    }
}

fn split(result: Result<Fill, GatewayError>) -> (Option<Fill>, Option<GatewayError>) {
    match result {
        Ok(fill) => (Some(fill), None),
        Err(e) => (None, Some(e)),
    }
}

/// Sell-minus-buy notional over a set of fills.
fn edge(fills: &[Fill]) -> Decimal {
    fills
        .iter()
        .map(|f| -f.side.sign() * f.notional())
        .sum()
}
