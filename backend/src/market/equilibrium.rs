//! Liquidity-pool equilibrium
//!
//! Supply not parked in the stability reserve sits in the liquidity pool,
//! `L = S − SP`. Next-period demand for it is `L' = L · drift · (1 + ζ)`, and
//! the isoelastic demand identity clears at
//!
//! ```text
//! P_t = P_{t-1} · (L / L')^(1/δ),   δ ≤ −1
//! ```
//!
//! Inverting the identity gives the supply that would clear at a given price,
//! which is what the stabilizers use to size their interventions.

use crate::ledger::Ledger;
use crate::orchestrator::SimulationError;
use crate::price::process::{growth_factor, normal};
use crate::rng::{SeedSchedule, Stream};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Liquidity-demand parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityConfig {
    pub volatility: f64,
    pub drift: f64,
    /// Price elasticity of demand `δ`; must be ≤ −1
    pub elasticity: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            volatility: 0.001,
            drift: 1.0,
            elasticity: -20.0,
        }
    }
}

/// Market-clearing price for pool `pool` facing demand `pool_next`.
///
/// Non-positive pools carry the previous price over.
///
/// # Example
/// ```
/// use cdp_simulator_core_rs::market::solve_price;
///
/// // no demand shock: price unchanged
/// assert_eq!(solve_price(1.02, 5_000.0, 5_000.0, -20.0), 1.02);
/// // more supply than demand: price falls
/// assert!(solve_price(1.0, 5_100.0, 5_000.0, -20.0) < 1.0);
/// ```
pub fn solve_price(previous: f64, pool: f64, pool_next: f64, elasticity: f64) -> f64 {
    if !(pool > 0.0 && pool_next > 0.0) {
        return previous;
    }
    previous * (pool / pool_next).powf(1.0 / elasticity)
}

/// Total supply at which the market would clear at `target`.
pub fn supply_for_price(
    reserve: f64,
    pool_next: f64,
    target: f64,
    previous: f64,
    elasticity: f64,
) -> f64 {
    reserve + pool_next * (target / previous).powf(elasticity)
}

/// One period's clearing before any stabilizer acts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equilibrium {
    pub reserve: f64,
    pub supply: f64,
    pub pool: f64,
    pub pool_next: f64,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct LiquidityMarket {
    config: LiquidityConfig,
    shock: Normal<f64>,
}

impl LiquidityMarket {
    pub fn new(config: &LiquidityConfig) -> Result<Self, SimulationError> {
        if !(config.elasticity <= -1.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "liquidity.elasticity must be <= -1, got {}",
                config.elasticity
            )));
        }
        if !(config.drift > 0.0) {
            return Err(SimulationError::InvalidConfig(
                "liquidity.drift must be positive".to_string(),
            ));
        }
        Ok(Self {
            config: config.clone(),
            shock: normal(config.volatility, "liquidity.volatility")?,
        })
    }

    pub fn elasticity(&self) -> f64 {
        self.config.elasticity
    }

    /// Demand for the pool next period.
    pub fn pool_next(&self, pool: f64, schedule: &SeedSchedule, period: usize) -> f64 {
        let mut rng = schedule.rng(Stream::LiquidityShock, period, 0);
        let zeta = self.shock.sample(&mut rng);
        pool * self.config.drift * growth_factor(zeta)
    }

    /// Clear the market from the ledger's current supply and reserve.
    pub fn clear<L: Ledger>(
        &self,
        ledger: &L,
        previous_price: f64,
        schedule: &SeedSchedule,
        period: usize,
    ) -> Equilibrium {
        let reserve = ledger.reserve_balance();
        let supply = ledger.total_supply();
        let pool = supply - reserve;
        let pool_next = self.pool_next(pool, schedule, period);
        Equilibrium {
            reserve,
            supply,
            pool,
            pool_next,
            price: solve_price(previous_price, pool, pool_next, self.config.elasticity),
        }
    }
}
