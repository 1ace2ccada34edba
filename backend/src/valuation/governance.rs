//! Governance-token valuation
//!
//! During the first month the token trades on an exogenous bootstrap path and
//! earnings are a placeholder draw scaled by `sqrt(t / month)`. Afterwards the
//! price is a P/E multiple of trailing-month fee revenue, annualized and
//! discounted linearly by `t / horizon`:
//!
//! ```text
//! E_t = (365/30) · Σ_{τ ∈ [t-month, t)} (issuance_fee_τ + redemption_fee_τ)
//! P_t = (t / horizon) · PE · E_t / total_supply
//! ```

use crate::core::time::PeriodClock;
use crate::models::{MarketSeries, SeriesKind};
use crate::orchestrator::SimulationError;
use crate::price::process::{growth_factor, normal};
use crate::rng::{SeedSchedule, Stream};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Governance-token parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub initial_price: f64,
    pub volatility: f64,
    /// Per-period drift of the bootstrap path
    pub drift: f64,
    pub pe_ratio: f64,
    pub total_supply: f64,
    pub bootstrap_earnings_mean: f64,
    pub bootstrap_earnings_sd: f64,
    /// Tokens airdropped to reserve depositors each period
    pub airdrop_quantity: f64,
    /// Valuation discount reaches 1 after this many days
    pub horizon_days: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            initial_price: 0.4,
            volatility: 0.005,
            drift: 0.0035,
            pe_ratio: 50.0,
            total_supply: 1e8,
            bootstrap_earnings_mean: 2e8,
            bootstrap_earnings_sd: 5e5,
            airdrop_quantity: 0.0,
            horizon_days: 365,
        }
    }
}

/// Price and earnings for one period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valuation {
    pub price: f64,
    pub annualized_earnings: f64,
}

/// Governance-token pricer with its precomputed bootstrap path.
#[derive(Debug, Clone)]
pub struct GovernanceValuation {
    config: GovernanceConfig,
    bootstrap: Vec<f64>,
    earnings_shock: Normal<f64>,
    month: usize,
    horizon: usize,
}

impl GovernanceValuation {
    pub fn new(
        config: &GovernanceConfig,
        schedule: &SeedSchedule,
        clock: &PeriodClock,
    ) -> Result<Self, SimulationError> {
        if !(config.total_supply > 0.0) || config.horizon_days == 0 {
            return Err(SimulationError::InvalidConfig(
                "governance.total_supply and governance.horizon_days must be positive"
                    .to_string(),
            ));
        }
        let shock = normal(config.volatility, "governance.volatility")?;
        let earnings_shock = Normal::new(config.bootstrap_earnings_mean, config.bootstrap_earnings_sd)
            .map_err(|e| {
                SimulationError::InvalidConfig(format!("governance.bootstrap_earnings_sd: {:?}", e))
            })?;

        let month = clock.month();
        let mut bootstrap = Vec::with_capacity(month);
        bootstrap.push(config.initial_price);
        for t in 1..month {
            let mut rng = schedule.rng(Stream::GovernanceBootstrap, t, 0);
            let zeta = shock.sample(&mut rng);
            bootstrap.push(bootstrap[t - 1] * growth_factor(zeta) * (1.0 + config.drift));
        }

        Ok(Self {
            config: config.clone(),
            bootstrap,
            earnings_shock,
            month,
            horizon: config.horizon_days * clock.periods_per_day(),
        })
    }

    pub fn initial_price(&self) -> f64 {
        self.config.initial_price
    }

    /// Bootstrap price at `period`, clamped to the path.
    pub fn bootstrap_price(&self, period: usize) -> f64 {
        let idx = period.min(self.bootstrap.len() - 1);
        self.bootstrap[idx]
    }

    /// Airdrop gain for reserve depositors at governance price `price`.
    pub fn airdrop_gain(&self, price: f64) -> f64 {
        price * self.config.airdrop_quantity
    }

    /// Value the token at `period` from the revenue recorded before it.
    pub fn value(&self, period: usize, series: &MarketSeries, schedule: &SeedSchedule) -> Valuation {
        if period <= self.month {
            let mut rng = schedule.rng(Stream::GovernanceEarnings, period, 0);
            let scale = (period as f64 / self.month as f64).sqrt();
            return Valuation {
                price: self.bootstrap_price(period.saturating_sub(1)),
                annualized_earnings: scale * self.earnings_shock.sample(&mut rng),
            };
        }

        let revenue = series.window_sum(SeriesKind::IssuanceFee, period, self.month)
            + series.window_sum(SeriesKind::RedemptionFee, period, self.month);
        let annualized_earnings = 365.0 * revenue / 30.0;
        let discount = period as f64 / self.horizon as f64;
        Valuation {
            price: discount * self.config.pe_ratio * annualized_earnings / self.config.total_supply,
            annualized_earnings,
        }
    }
}
