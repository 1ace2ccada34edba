//! Stability-reserve demand
//!
//! With dynamics enabled, the target reserve follows
//!
//! ```text
//! D_t = D_{t-1} · drift · (1 + ζ) · (1 + R^s_{t-1} − R^n_t)^θ    t ≤ month
//! D_t = D_{t-1} ·         (1 + ζ) · (1 + R^s_{t-1} − R^n_t)^θ    otherwise
//! ```
//!
//! starting from `initial` whenever the reserve is empty, and never above the
//! total supply. Increases are deposited by active agents in registry order
//! from their own balances; decreases are withdrawn from the whale's deposit.

use crate::decisions::{fatal, PeriodContext};
use crate::ledger::{Ledger, WHALE};
use crate::models::{AgentRegistry, Event, EventLog};
use crate::orchestrator::{SimulationError, Stage};
use crate::price::process::{growth_factor, normal};
use crate::rng::Stream;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DUST: f64 = 1e-9;

/// Stability-reserve parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReserveConfig {
    /// Deposit made by the whale at setup
    pub initial: f64,
    /// Run the demand process each period
    pub dynamics: bool,
    pub volatility: f64,
    /// Extra growth factor applied during the first month
    pub drift_first_month: f64,
    /// Sensitivity `θ` to the return spread
    pub theta: f64,
    /// Return assumed before any history exists
    pub initial_return: f64,
}

impl Default for ReserveConfig {
    fn default() -> Self {
        Self {
            initial: 1000.0,
            dynamics: false,
            volatility: 0.001,
            drift_first_month: 1.002,
            theta: 0.001,
            initial_return: 0.2,
        }
    }
}

/// Result of one reserve update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReserveOutcome {
    pub previous: f64,
    pub target: f64,
    pub deposited: f64,
    pub withdrawn: f64,
}

#[derive(Debug, Clone)]
pub struct ReserveDemand {
    config: ReserveConfig,
    shock: Normal<f64>,
}

impl ReserveDemand {
    pub fn new(config: &ReserveConfig) -> Result<Self, SimulationError> {
        if !(config.initial >= 0.0) {
            return Err(SimulationError::InvalidConfig(
                "reserve.initial must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            config: config.clone(),
            shock: normal(config.volatility, "reserve.volatility")?,
        })
    }

    pub fn config(&self) -> &ReserveConfig {
        &self.config
    }

    /// Target reserve for this period, before the supply cap.
    pub fn target(
        &self,
        previous: f64,
        stability_return: f64,
        natural_rate: f64,
        month: usize,
        ctx: &PeriodContext<'_>,
    ) -> f64 {
        if previous <= 0.0 {
            return self.config.initial;
        }
        let mut rng = ctx.schedule.rng(Stream::ReserveShock, ctx.period, 0);
        let zeta = self.shock.sample(&mut rng);
        let spread = (1.0 + stability_return - natural_rate).max(0.0);
        let target = previous * growth_factor(zeta) * spread.powf(self.config.theta);
        if ctx.period <= month {
            target * self.config.drift_first_month
        } else {
            target
        }
    }

    /// Move the reserve toward its target. A no-op unless dynamics are enabled.
    #[allow(clippy::too_many_arguments)]
    pub fn update<L: Ledger>(
        &self,
        ledger: &mut L,
        registry: &AgentRegistry,
        events: &mut EventLog,
        stability_return: f64,
        natural_rate: f64,
        month: usize,
        ctx: &PeriodContext<'_>,
    ) -> Result<ReserveOutcome, SimulationError> {
        let previous = ledger.reserve_balance();
        let mut outcome = ReserveOutcome {
            previous,
            target: previous,
            ..Default::default()
        };
        if !self.config.dynamics {
            return Ok(outcome);
        }

        let mut target = self.target(previous, stability_return, natural_rate, month, ctx);
        let supply = ledger.total_supply();
        if target > supply {
            warn!(period = ctx.period, target, supply, "reserve demand exceeds supply, capping");
            target = supply;
        }
        outcome.target = target;

        if target > previous {
            let mut remaining = target - previous;
            for entry in registry.active() {
                if remaining <= DUST {
                    break;
                }
                let deposit = ledger.balance_of(entry.agent).min(remaining);
                if deposit > 0.0 {
                    ledger
                        .provide_to_reserve(entry.agent, deposit)
                        .map_err(fatal(ctx.period, Stage::Reserve))?;
                    remaining -= deposit;
                    outcome.deposited += deposit;
                }
            }
        } else if target < previous {
            outcome.withdrawn = ledger
                .withdraw_from_reserve(WHALE, previous - target)
                .map_err(fatal(ctx.period, Stage::Reserve))?;
        }

        debug!(
            period = ctx.period,
            previous,
            target,
            deposited = outcome.deposited,
            withdrawn = outcome.withdrawn,
            "reserve updated"
        );
        events.log(Event::ReserveAdjusted {
            period: ctx.period,
            previous,
            target,
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InsertHints, LedgerParams, MemoryLedger};
    use crate::rng::SeedSchedule;

    fn ctx<'a>(schedule: &'a SeedSchedule, params: &'a LedgerParams, period: usize) -> PeriodContext<'a> {
        PeriodContext {
            period,
            collateral_price: 2000.0,
            synthetic_price: 1.0,
            schedule,
            params,
        }
    }

    #[test]
    fn test_empty_reserve_restarts_from_initial() {
        let demand = ReserveDemand::new(&ReserveConfig::default()).unwrap();
        let schedule = SeedSchedule::new(1);
        let params = LedgerParams::default();
        assert_eq!(demand.target(0.0, 0.2, 0.2, 720, &ctx(&schedule, &params, 50)), 1000.0);
    }

    #[test]
    fn test_first_month_applies_drift() {
        let config = ReserveConfig {
            volatility: 1e-12,
            ..Default::default()
        };
        let demand = ReserveDemand::new(&config).unwrap();
        let schedule = SeedSchedule::new(1);
        let params = LedgerParams::default();
        let early = demand.target(1000.0, 0.2, 0.2, 720, &ctx(&schedule, &params, 10));
        let late = demand.target(1000.0, 0.2, 0.2, 720, &ctx(&schedule, &params, 800));
        assert!((early - 1002.0).abs() < 1e-6);
        assert!((late - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_dynamics_leave_reserve_alone() {
        let demand = ReserveDemand::new(&ReserveConfig::default()).unwrap();
        let schedule = SeedSchedule::new(1);
        let params = LedgerParams::default();
        let mut ledger = MemoryLedger::new(params.clone(), 2000.0);
        ledger
            .open_position(WHALE, 1_000_000.0, InsertHints::default(), 3000.0)
            .unwrap();
        ledger.provide_to_reserve(WHALE, 1000.0).unwrap();
        let registry = AgentRegistry::new(2);
        let mut events = EventLog::new();
        let outcome = demand
            .update(&mut ledger, &registry, &mut events, 0.5, 0.2, 720, &ctx(&schedule, &params, 3))
            .unwrap();
        assert_eq!(outcome.target, 1000.0);
        assert_eq!(ledger.reserve_balance(), 1000.0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_decrease_withdraws_from_whale() {
        let config = ReserveConfig {
            dynamics: true,
            volatility: 1e-12,
            theta: 1.0,
            ..Default::default()
        };
        let demand = ReserveDemand::new(&config).unwrap();
        let schedule = SeedSchedule::new(1);
        let params = LedgerParams::default();
        let mut ledger = MemoryLedger::new(params.clone(), 2000.0);
        ledger
            .open_position(WHALE, 1_000_000.0, InsertHints::default(), 3000.0)
            .unwrap();
        ledger.provide_to_reserve(WHALE, 1000.0).unwrap();
        let registry = AgentRegistry::new(2);
        let mut events = EventLog::new();
        // return 10% below the natural rate with θ = 1 → target ≈ 900
        let outcome = demand
            .update(&mut ledger, &registry, &mut events, 0.1, 0.2, 720, &ctx(&schedule, &params, 1000))
            .unwrap();
        assert!((outcome.target - 900.0).abs() < 1e-6);
        assert!((ledger.reserve_balance() - 900.0).abs() < 1e-6);
        assert!((outcome.withdrawn - 100.0).abs() < 1e-6);
    }
}
