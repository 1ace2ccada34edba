//! Open model
//!
//! Number of positions opened in period `t`:
//!
//! ```text
//! N_0 = 0                                              seed period
//! N_t = max(0, n · (1 + ζ_t))                          P_{t-1} ≤ 1 + f
//!     = max(0, n · (1 + ζ_t)) + α (P_{t-1} − 1 − f) A_t otherwise
//! ```
//!
//! rounded and capped at the inactive pool, where `f` is the issuance rate and
//! `A_t` the number of active positions. Each new position draws
//! collateral `Q ~ Γ(k, θ)`, target ratio `CR* = a + b·χ²_df` and tolerance
//! `τ ~ Γ(k', θ')`, and borrows `P^e · Q / CR*` (at least the minimum debt).

use super::{fatal, round_count, stays_above_critical, ActionError, PeriodContext};
use crate::ledger::{amount_from_net_debt, nominal_ratio, AccountId, Ledger, PositionId};
use crate::models::{AgentRegistry, Event, EventLog};
use crate::orchestrator::{SimulationError, Stage};
use crate::rng::Stream;
use rand_distr::{ChiSquared, Distribution, Gamma, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Open model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenConfig {
    /// Steady-state opens per period
    pub steady_rate: f64,
    pub volatility: f64,
    /// Sensitivity `α` to the synthetic price above `1 + fee`
    pub price_sensitivity: f64,
    pub collateral_shape: f64,
    pub collateral_scale: f64,
    pub target_ratio_base: f64,
    pub target_ratio_scale: f64,
    pub target_ratio_df: f64,
    pub inattention_shape: f64,
    pub inattention_scale: f64,
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            steady_rate: 0.5,
            volatility: 0.5,
            price_sensitivity: 0.3,
            collateral_shape: 10.0,
            collateral_scale: 500.0,
            target_ratio_base: 1.1,
            target_ratio_scale: 0.03,
            target_ratio_df: 16.0,
            inattention_shape: 4.0,
            inattention_scale: 0.08,
        }
    }
}

/// Terms of one position to open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenCandidate {
    pub collateral: f64,
    pub target_ratio: f64,
    pub inattention: f64,
    /// Debt including the issuance fee
    pub net_debt: f64,
}

/// Draws for one period.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPlan {
    pub count: usize,
    pub candidates: Vec<OpenCandidate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpenOutcome {
    pub opened: usize,
    pub collateral_added: f64,
    /// Issuance fee charged, in synthetic units
    pub issuance_fee: f64,
}

/// Analytic moments of the opening distributions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenExpectations {
    pub collateral_mean: f64,
    pub collateral_sd: f64,
    pub target_ratio_mean: f64,
    pub target_ratio_sd: f64,
    pub inattention_mean: f64,
    pub inattention_sd: f64,
}

/// A position opened on behalf of the next inactive agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OpenedPosition {
    pub agent: AccountId,
    pub position_id: PositionId,
    pub fee: f64,
}

/// Open decision model with its distributions built once.
#[derive(Debug, Clone)]
pub struct OpenModel {
    config: OpenConfig,
    count_shock: Normal<f64>,
    collateral: Gamma<f64>,
    target_ratio: ChiSquared<f64>,
    inattention: Gamma<f64>,
}

impl OpenModel {
    pub fn new(config: &OpenConfig) -> Result<Self, SimulationError> {
        let invalid = |what: &str, e: &dyn std::fmt::Debug| {
            SimulationError::InvalidConfig(format!("open.{}: {:?}", what, e))
        };
        Ok(Self {
            config: config.clone(),
            count_shock: Normal::new(0.0, config.volatility)
                .map_err(|e| invalid("volatility", &e))?,
            collateral: Gamma::new(config.collateral_shape, config.collateral_scale)
                .map_err(|e| invalid("collateral", &e))?,
            target_ratio: ChiSquared::new(config.target_ratio_df)
                .map_err(|e| invalid("target_ratio_df", &e))?,
            inattention: Gamma::new(config.inattention_shape, config.inattention_scale)
                .map_err(|e| invalid("inattention", &e))?,
        })
    }

    pub fn config(&self) -> &OpenConfig {
        &self.config
    }

    pub fn expectations(&self) -> OpenExpectations {
        let c = &self.config;
        OpenExpectations {
            collateral_mean: c.collateral_shape * c.collateral_scale,
            collateral_sd: c.collateral_shape.sqrt() * c.collateral_scale,
            target_ratio_mean: c.target_ratio_base + c.target_ratio_scale * c.target_ratio_df,
            target_ratio_sd: c.target_ratio_scale * (2.0 * c.target_ratio_df).sqrt(),
            inattention_mean: c.inattention_shape * c.inattention_scale,
            inattention_sd: c.inattention_shape.sqrt() * c.inattention_scale,
        }
    }

    /// Number of positions to open, before the inactive-pool cap.
    pub fn raw_count(&self, ctx: &PeriodContext<'_>, issuance_rate: f64, active: usize) -> f64 {
        if ctx.period == 0 {
            return 0.0;
        }
        let mut rng = ctx.schedule.rng(Stream::OpenCount, ctx.period, 0);
        let zeta = self.count_shock.sample(&mut rng);
        let base = (self.config.steady_rate * (1.0 + zeta)).max(0.0);
        let threshold = 1.0 + issuance_rate;
        if ctx.synthetic_price <= threshold {
            base
        } else {
            base + self.config.price_sensitivity * (ctx.synthetic_price - threshold) * active as f64
        }
    }

    /// Terms for the `item`-th opening of the period.
    pub fn draw_candidate(&self, ctx: &PeriodContext<'_>, item: usize) -> OpenCandidate {
        let c = &self.config;
        let mut rng = ctx.schedule.rng(Stream::OpenTargetRatio, ctx.period, item);
        let target_ratio = c.target_ratio_base + c.target_ratio_scale * self.target_ratio.sample(&mut rng);
        let mut rng = ctx.schedule.rng(Stream::OpenCollateral, ctx.period, item);
        let mut collateral = self.collateral.sample(&mut rng);
        let mut rng = ctx.schedule.rng(Stream::OpenInattention, ctx.period, item);
        let inattention = self.inattention.sample(&mut rng);

        let price = ctx.collateral_price;
        let mut net_debt = price * collateral / target_ratio;
        if net_debt < ctx.params.min_debt {
            net_debt = ctx.params.min_debt;
            collateral = target_ratio * net_debt / price;
        }
        OpenCandidate {
            collateral,
            target_ratio,
            inattention,
            net_debt,
        }
    }

    /// Decide this period's openings. Pure: reads only its arguments.
    pub fn plan(
        &self,
        ctx: &PeriodContext<'_>,
        issuance_rate: f64,
        active: usize,
        inactive: usize,
    ) -> Result<OpenPlan, ActionError> {
        if inactive == 0 {
            return Err(ActionError::NoEligibleAgents("open"));
        }
        let count = round_count(self.raw_count(ctx, issuance_rate, active)).min(inactive);
        let candidates = (0..count).map(|i| self.draw_candidate(ctx, i)).collect();
        Ok(OpenPlan { count, candidates })
    }

    /// Open every planned position the ledger and recovery rules allow.
    pub fn execute<L: Ledger>(
        &self,
        plan: &OpenPlan,
        ledger: &mut L,
        registry: &mut AgentRegistry,
        events: &mut EventLog,
        ctx: &PeriodContext<'_>,
    ) -> Result<OpenOutcome, SimulationError> {
        let mut outcome = OpenOutcome::default();
        for candidate in &plan.candidates {
            let Some(opened) = open_for_next_agent(ledger, registry, ctx, Stage::Open, candidate)?
            else {
                continue;
            };
            debug!(
                period = ctx.period,
                agent = opened.agent,
                position = %opened.position_id,
                debt = candidate.net_debt,
                target_ratio = candidate.target_ratio,
                "position opened"
            );
            events.log(Event::PositionOpened {
                period: ctx.period,
                agent: opened.agent,
                position_id: opened.position_id,
                debt: candidate.net_debt,
                collateral: candidate.collateral,
                target_ratio: candidate.target_ratio,
                inattention: candidate.inattention,
            });
            outcome.opened += 1;
            outcome.collateral_added += candidate.collateral;
            outcome.issuance_fee += opened.fee;
        }
        Ok(outcome)
    }
}

/// Open `terms` for the next inactive agent.
///
/// Returns `Ok(None)` without touching the ledger when no agent is available,
/// when recovery mode forbids a target below the critical ratio, or when the
/// new position would pull the system below the critical ratio.
pub(crate) fn open_for_next_agent<L: Ledger>(
    ledger: &mut L,
    registry: &mut AgentRegistry,
    ctx: &PeriodContext<'_>,
    stage: Stage,
    terms: &OpenCandidate,
) -> Result<Option<OpenedPosition>, SimulationError> {
    let Some(agent) = registry.next_inactive() else {
        return Ok(None);
    };
    if ledger.is_recovery_mode(ctx.collateral_price) {
        if terms.target_ratio < ctx.params.critical_collateral_ratio {
            return Ok(None);
        }
    } else if !stays_above_critical(ledger, ctx, terms.collateral, terms.net_debt) {
        return Ok(None);
    }

    let candidates = registry.hint_candidates(terms.target_ratio);
    let hints = ledger.insertion_hints(
        nominal_ratio(terms.collateral, terms.net_debt),
        candidates.upper,
        candidates.lower,
    );
    let amount = amount_from_net_debt(terms.net_debt, ledger.issuance_rate());
    let position_id = ledger
        .open_position(agent, amount, hints, terms.collateral)
        .map_err(fatal(ctx.period, stage))?;
    registry.activate(terms.target_ratio, terms.inattention, position_id);

    Ok(Some(OpenedPosition {
        agent,
        position_id,
        fee: terms.net_debt - amount,
    }))
}
