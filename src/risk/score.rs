//! Risk scoring for uncovered exposure.
//!
//! `score = |uncovered_notional| * volatility_estimate * time_decay`, where
//! the decay multiplier grows with elapsed uncovered time. Bands map the
//! score to a required remediation posture.

use std::collections::VecDeque;
use std::time::Duration;

use rust_decimal::{Decimal, MathematicalOps};

use crate::config::HedgeConfig;

/// Remediation posture required by the current risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum RiskBand {
    /// Normal execution.
    Low,
    /// Accelerated rescue (shortened wait budget).
    Medium,
    /// Aggressive execution (larger price improvement steps).
    High,
    /// Immediate emergency hedge via market order, bypassing rescue.
    Critical,
}

/// Maps uncovered exposure to a score and band.
#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: HedgeConfig,
}

impl RiskScorer {
    pub fn new(config: HedgeConfig) -> Self {
        Self { config }
    }

    /// Score uncovered exposure. The decay multiplier is 1 at creation and
    /// 2 once the full uncovered bound has elapsed.
    pub fn score(
        &self,
        uncovered_notional: Decimal,
        volatility: Decimal,
        uncovered_for: Duration,
    ) -> (Decimal, RiskBand) {
        let elapsed_ms = Decimal::from(uncovered_for.as_millis() as u64);
        let bound_ms = Decimal::from(self.config.max_uncovered_time_ms.max(1));
        let time_decay = Decimal::ONE + elapsed_ms / bound_ms;

        let score = uncovered_notional.abs() * volatility * time_decay;
        (score, self.band(score))
    }

    pub fn band(&self, score: Decimal) -> RiskBand {
        if score >= self.config.risk_critical_score {
            RiskBand::Critical
        } else if score >= self.config.risk_high_score {
            RiskBand::High
        } else if score >= self.config.risk_medium_score {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    /// Uncovered wait budget after band tightening. Rising risk shortens
    /// the time we are willing to stay uncovered.
    pub fn effective_budget(&self, band: RiskBand) -> Duration {
        let full = Duration::from_millis(self.config.max_uncovered_time_ms);
        match band {
            RiskBand::Low => full,
            RiskBand::Medium => full.mul_f64(0.6),
            RiskBand::High => full.mul_f64(0.4),
            RiskBand::Critical => Duration::ZERO,
        }
    }
}

/// Rolling volatility estimate from mid-price samples.
///
/// Root-mean-square of per-sample returns over a bounded window, floored so
/// an empty or flat window never zeroes the risk score.
#[derive(Debug, Clone)]
pub struct VolatilityEstimator {
    returns: VecDeque<Decimal>,
    capacity: usize,
    floor: Decimal,
    last_mid: Option<Decimal>,
}

impl VolatilityEstimator {
    pub fn new(capacity: usize, floor: Decimal) -> Self {
        Self {
            returns: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            floor,
            last_mid: None,
        }
    }

    /// Record a mid-price observation.
    pub fn sample(&mut self, mid: Decimal) {
        if mid <= Decimal::ZERO {
            return;
        }
        if let Some(last) = self.last_mid {
            if last > Decimal::ZERO {
                let ret = mid / last - Decimal::ONE;
                if self.returns.len() == self.capacity {
                    self.returns.pop_front();
                }
                self.returns.push_back(ret);
            }
        }
        self.last_mid = Some(mid);
    }

    /// Current estimate, never below the configured floor.
    pub fn estimate(&self) -> Decimal {
        if self.returns.is_empty() {
            return self.floor;
        }
        let sum_sq: Decimal = self.returns.iter().map(|r| r * r).sum();
        let mean = sum_sq / Decimal::from(self.returns.len() as u64);
        let rms = mean.sqrt().unwrap_or(Decimal::ZERO);
        rms.max(self.floor)
    }
}
