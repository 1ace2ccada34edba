//! Exogenous price paths
//!
//! The collateral price follows a multiplicative random walk whose drift
//! switches at fixed regime boundaries:
//!
//! ```text
//! P_t = P_{t-1} · (1 + ζ_t) · (1 + drift(t)),   ζ_t ~ N(0, σ)
//! ```
//!
//! The natural rate is the same walk without drift. Both paths are generated
//! up front, one generator per period, so a period's value never depends on
//! how many draws other components took.

use crate::core::time::PeriodClock;
use crate::orchestrator::SimulationError;
use crate::rng::{SeedSchedule, Stream};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// One drift regime, active until `end_day` (exclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRegime {
    pub end_day: usize,
    pub drift: f64,
}

/// Collateral price process parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollateralPriceConfig {
    pub initial: f64,
    pub volatility: f64,
    /// Regimes in chronological order. Periods past the last boundary keep
    /// the last regime's drift.
    pub regimes: Vec<PriceRegime>,
}

impl Default for CollateralPriceConfig {
    fn default() -> Self {
        Self {
            initial: 2000.0,
            volatility: 0.02,
            regimes: vec![
                // growth
                PriceRegime {
                    end_day: 60,
                    drift: 0.001,
                },
                // crash
                PriceRegime {
                    end_day: 67,
                    drift: -0.02,
                },
                // recovery
                PriceRegime {
                    end_day: 180,
                    drift: 0.0013,
                },
                // slow decline
                PriceRegime {
                    end_day: 365,
                    drift: -0.0002,
                },
            ],
        }
    }
}

impl CollateralPriceConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.initial > 0.0) {
            return Err(SimulationError::InvalidConfig(
                "collateral_price.initial must be positive".to_string(),
            ));
        }
        if !(self.volatility >= 0.0) {
            return Err(SimulationError::InvalidConfig(
                "collateral_price.volatility must be non-negative".to_string(),
            ));
        }
        if self.regimes.is_empty() {
            return Err(SimulationError::InvalidConfig(
                "collateral_price.regimes must not be empty".to_string(),
            ));
        }
        if self
            .regimes
            .windows(2)
            .any(|w| w[0].end_day >= w[1].end_day)
        {
            return Err(SimulationError::InvalidConfig(
                "collateral_price.regimes boundaries must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    /// Drift in effect at `period`.
    pub fn drift_at(&self, period: usize, periods_per_day: usize) -> f64 {
        self.regimes
            .iter()
            .find(|r| period < r.end_day * periods_per_day)
            .or(self.regimes.last())
            .map(|r| r.drift)
            .unwrap_or(0.0)
    }
}

/// Natural-rate process parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NaturalRateConfig {
    pub initial: f64,
    pub volatility: f64,
}

impl Default for NaturalRateConfig {
    fn default() -> Self {
        Self {
            initial: 0.2,
            volatility: 0.002,
        }
    }
}

/// Multiplicative step factor, kept strictly positive.
pub(crate) fn growth_factor(shock: f64) -> f64 {
    (1.0 + shock).max(f64::MIN_POSITIVE)
}

pub(crate) fn normal(sd: f64, what: &str) -> Result<Normal<f64>, SimulationError> {
    Normal::new(0.0, sd)
        .map_err(|e| SimulationError::InvalidConfig(format!("{}: {:?}", what, e)))
}

/// Precomputed exogenous inputs for one run.
///
/// # Example
/// ```
/// use cdp_simulator_core_rs::price::{CollateralPriceConfig, NaturalRateConfig, PricePaths};
/// use cdp_simulator_core_rs::rng::SeedSchedule;
/// use cdp_simulator_core_rs::PeriodClock;
///
/// let paths = PricePaths::generate(
///     &CollateralPriceConfig::default(),
///     &NaturalRateConfig::default(),
///     &SeedSchedule::new(1),
///     &PeriodClock::default(),
///     48,
/// )
/// .unwrap();
/// assert_eq!(paths.collateral_price(0), 2000.0);
/// assert!(paths.collateral_price(48) > 0.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePaths {
    collateral: Vec<f64>,
    natural_rate: Vec<f64>,
}

impl PricePaths {
    /// Generate periods `0..=periods`.
    pub fn generate(
        collateral: &CollateralPriceConfig,
        natural_rate: &NaturalRateConfig,
        schedule: &SeedSchedule,
        clock: &PeriodClock,
        periods: usize,
    ) -> Result<Self, SimulationError> {
        collateral.validate()?;
        let price_shock = normal(collateral.volatility, "collateral_price.volatility")?;
        let rate_shock = normal(natural_rate.volatility, "natural_rate.volatility")?;
        let ppd = clock.periods_per_day();

        let mut prices = Vec::with_capacity(periods + 1);
        let mut rates = Vec::with_capacity(periods + 1);
        prices.push(collateral.initial);
        rates.push(natural_rate.initial);

        for t in 1..=periods {
            let mut rng = schedule.rng(Stream::CollateralPrice, t, 0);
            let zeta = price_shock.sample(&mut rng);
            let drift = collateral.drift_at(t, ppd);
            prices.push(prices[t - 1] * growth_factor(zeta) * (1.0 + drift));

            let mut rng = schedule.rng(Stream::NaturalRate, t, 0);
            let zeta = rate_shock.sample(&mut rng);
            // no floor: a negative rate can only come from the shock itself
            rates.push(rates[t - 1] * (1.0 + zeta));
        }

        Ok(Self {
            collateral: prices,
            natural_rate: rates,
        })
    }

    /// Last generated period.
    pub fn last_period(&self) -> usize {
        self.collateral.len().saturating_sub(1)
    }

    /// Collateral price at `period`; periods past the end hold the last value.
    pub fn collateral_price(&self, period: usize) -> f64 {
        let idx = period.min(self.last_period());
        self.collateral[idx]
    }

    pub fn natural_rate(&self, period: usize) -> f64 {
        let idx = period.min(self.last_period());
        self.natural_rate[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(seed: u64, periods: usize) -> PricePaths {
        PricePaths::generate(
            &CollateralPriceConfig::default(),
            &NaturalRateConfig::default(),
            &SeedSchedule::new(seed),
            &PeriodClock::default(),
            periods,
        )
        .unwrap()
    }

    #[test]
    fn test_same_seed_same_path() {
        assert_eq!(generate(9, 500), generate(9, 500));
    }

    #[test]
    fn test_longer_run_extends_shorter_run() {
        let short = generate(3, 100);
        let long = generate(3, 200);
        for t in 0..=100 {
            assert_eq!(short.collateral_price(t), long.collateral_price(t));
            assert_eq!(short.natural_rate(t), long.natural_rate(t));
        }
    }

    #[test]
    fn test_regime_lookup() {
        let config = CollateralPriceConfig::default();
        assert_eq!(config.drift_at(0, 24), 0.001);
        assert_eq!(config.drift_at(60 * 24, 24), -0.02);
        assert_eq!(config.drift_at(67 * 24 - 1, 24), -0.02);
        assert_eq!(config.drift_at(67 * 24, 24), 0.0013);
        assert_eq!(config.drift_at(400 * 24, 24), -0.0002);
    }

    #[test]
    fn test_prices_positive_over_a_year() {
        let paths = generate(2019375, 8760);
        assert!((0..=8760).all(|t| paths.collateral_price(t) > 0.0));
    }

    #[test]
    fn test_crash_regime_lowers_price() {
        let mut config = CollateralPriceConfig::default();
        config.volatility = 0.0;
        let paths = PricePaths::generate(
            &config,
            &NaturalRateConfig::default(),
            &SeedSchedule::new(1),
            &PeriodClock::default(),
            67 * 24,
        )
        .unwrap();
        assert!(paths.collateral_price(67 * 24) < paths.collateral_price(60 * 24));
    }

    #[test]
    fn test_rejects_unsorted_regimes() {
        let mut config = CollateralPriceConfig::default();
        config.regimes.swap(0, 1);
        assert!(matches!(
            config.validate(),
            Err(SimulationError::InvalidConfig(_))
        ));
    }
}
