//! Close model
//!
//! Number of positions closed in period `t`:
//!
//! ```text
//! N_t = U(0, 1)                                        t ≤ warm-up
//!     = max(0, n · (1 + ζ_t))                          P_{t-1} ≥ 1
//!     = max(0, n · (1 + ζ_t)) + β (1 − P_{t-1}) M_t     otherwise
//! ```
//!
//! rounded and capped so one active position always remains, where `M_t` is
//! the ledger's position count. The positions to close are a uniform sample
//! without replacement from the active list.
//!
//! An agent whose balance does not cover its debt sources the shortfall, in
//! order, from its own reserve deposit, the whale, other active agents and
//! finally inactive agents. A position whose shortfall cannot be covered stays
//! open.

use super::{fatal, round_count, stays_above_critical, ActionError, PeriodContext};
use crate::ledger::{AccountId, Ledger, PositionId, WHALE};
use crate::models::{AgentRegistry, Event, EventLog};
use crate::orchestrator::{SimulationError, Stage};
use crate::rng::Stream;
use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Amounts below this count as fully sourced.
const SHORTFALL_EPSILON: f64 = 1e-9;

/// Close model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseConfig {
    /// Steady-state closes per period
    pub steady_rate: f64,
    pub volatility: f64,
    /// Sensitivity `β` to the synthetic price below peg
    pub price_sensitivity: f64,
    /// Periods during which the count is drawn from `U(0, 1)`
    pub warmup_periods: usize,
}

impl Default for CloseConfig {
    fn default() -> Self {
        Self {
            steady_rate: 0.5,
            volatility: 0.5,
            price_sensitivity: 0.2,
            warmup_periods: 240,
        }
    }
}

/// Positions chosen for closing, resolved to ids before any is removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosePlan {
    pub count: usize,
    pub positions: Vec<PositionId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CloseOutcome {
    pub planned: usize,
    pub closed: usize,
    pub shortfalls: usize,
}

#[derive(Debug, Clone)]
pub struct CloseModel {
    config: CloseConfig,
    count_shock: Normal<f64>,
}

impl CloseModel {
    pub fn new(config: &CloseConfig) -> Result<Self, SimulationError> {
        let count_shock = Normal::new(0.0, config.volatility).map_err(|e| {
            SimulationError::InvalidConfig(format!("close.volatility: {:?}", e))
        })?;
        Ok(Self {
            config: config.clone(),
            count_shock,
        })
    }

    /// Number of positions to close, before the keep-one cap.
    pub fn raw_count(&self, ctx: &PeriodContext<'_>, position_count: usize) -> f64 {
        let mut rng = ctx.schedule.rng(Stream::CloseCount, ctx.period, 0);
        let zeta = self.count_shock.sample(&mut rng);
        if ctx.period <= self.config.warmup_periods {
            return rng.gen_range(0.0..1.0);
        }
        let base = (self.config.steady_rate * (1.0 + zeta)).max(0.0);
        if ctx.synthetic_price >= 1.0 {
            base
        } else {
            base + self.config.price_sensitivity
                * (1.0 - ctx.synthetic_price)
                * position_count as f64
        }
    }

    /// Decide which positions close this period.
    pub fn plan(
        &self,
        ctx: &PeriodContext<'_>,
        registry: &AgentRegistry,
        position_count: usize,
    ) -> Result<ClosePlan, ActionError> {
        let active = registry.active_len();
        if active == 0 {
            return Err(ActionError::NoEligibleAgents("close"));
        }
        let count = round_count(self.raw_count(ctx, position_count)).min(active - 1);
        let mut rng = ctx.schedule.rng(Stream::CloseSample, ctx.period, 0);
        let positions = index::sample(&mut rng, active, count)
            .iter()
            .map(|i| registry.active()[i].position_id)
            .collect();
        Ok(ClosePlan { count, positions })
    }

    /// Close the planned positions whose debt can be sourced.
    ///
    /// Stops as soon as the system is in recovery mode, where the ledger
    /// refuses closes.
    pub fn execute<L: Ledger>(
        &self,
        plan: &ClosePlan,
        ledger: &mut L,
        registry: &mut AgentRegistry,
        events: &mut EventLog,
        ctx: &PeriodContext<'_>,
    ) -> Result<CloseOutcome, SimulationError> {
        let mut outcome = CloseOutcome {
            planned: plan.count,
            ..Default::default()
        };
        let price = ctx.collateral_price;

        for &position_id in &plan.positions {
            if ledger.is_recovery_mode(price) {
                debug!(period = ctx.period, "recovery mode, stopping closes");
                break;
            }
            let Some(agent) = registry.find_by_position(position_id).map(|e| e.agent) else {
                warn!(period = ctx.period, position = %position_id, "planned close not in registry");
                continue;
            };
            let amounts = ledger
                .synced_debt_and_collateral(position_id)
                .map_err(fatal(ctx.period, Stage::Close))?;

            match source_repayment(ledger, registry, agent, amounts.debt, ctx) {
                Ok(()) => {
                    if stays_above_critical(ledger, ctx, -amounts.collateral, -amounts.debt) {
                        ledger
                            .close_position(agent, position_id)
                            .map_err(fatal(ctx.period, Stage::Close))?;
                        registry.remove_by_position(position_id);
                        outcome.closed += 1;
                        debug!(period = ctx.period, agent, position = %position_id, "position closed");
                        events.log(Event::PositionClosed {
                            period: ctx.period,
                            agent,
                            position_id,
                            debt: amounts.debt,
                        });
                    }
                }
                Err(ActionError::InsufficientBalance { shortfall, .. }) => {
                    warn!(
                        period = ctx.period,
                        agent,
                        position = %position_id,
                        shortfall,
                        "not enough synthetic asset to close"
                    );
                    outcome.shortfalls += 1;
                    events.log(Event::ShortfallUnresolved {
                        period: ctx.period,
                        agent,
                        position_id,
                        shortfall,
                    });
                }
                Err(other) => warn!(period = ctx.period, error = %other, "close skipped"),
            }

        }
        Ok(outcome)
    }
}

/// Move up to `amount` from `from` to `to`; returns what is still missing.
fn transfer_toward<L: Ledger>(
    ledger: &mut L,
    from: AccountId,
    to: AccountId,
    amount: f64,
) -> Result<f64, ActionError> {
    if from == to {
        return Ok(amount);
    }
    let moved = ledger.balance_of(from).min(amount);
    if moved <= 0.0 {
        return Ok(amount);
    }
    ledger
        .transfer(from, to, moved)
        .map_err(|_| ActionError::InsufficientBalance {
            agent: to,
            required: amount,
            shortfall: amount,
        })?;
    Ok(amount - moved)
}

/// Make sure `agent` holds `required` synthetic asset.
pub fn source_repayment<L: Ledger>(
    ledger: &mut L,
    registry: &AgentRegistry,
    agent: AccountId,
    required: f64,
    ctx: &PeriodContext<'_>,
) -> Result<(), ActionError> {
    let balance = ledger.balance_of(agent);
    if required <= balance {
        return Ok(());
    }
    let mut pending = required - balance;

    if ledger.reserve_deposit_of(agent) > 0.0 {
        // a failed withdrawal just leaves the shortfall to the other sources
        if ledger.withdraw_from_reserve(agent, pending).is_ok() {
            pending = required - ledger.balance_of(agent);
        }
    }

    if pending > SHORTFALL_EPSILON {
        pending = transfer_toward(ledger, WHALE, agent, pending)?;
    }
    let lenders: Vec<AccountId> = registry
        .active()
        .iter()
        .map(|e| e.agent)
        .chain(registry.inactive())
        .collect();
    for lender in lenders {
        if pending <= SHORTFALL_EPSILON {
            break;
        }
        pending = transfer_toward(ledger, lender, agent, pending)?;
    }

    if pending > SHORTFALL_EPSILON {
        debug!(period = ctx.period, agent, pending, "repayment sourcing exhausted");
        return Err(ActionError::InsufficientBalance {
            agent,
            required,
            shortfall: pending,
        });
    }
    Ok(())
}
