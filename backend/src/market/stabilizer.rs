//! Price stabilizers
//!
//! Applied after the market clears, with both fee rates read before either
//! stabilizer touches the ledger.
//!
//! **Ceiling** (`P > ceiling_base + f^i`): an arbitrageur opens one position
//! at `CR* = 110%`, `τ = 10%` minting the supply that would bring the price to
//! the ceiling, capped at `ceiling_mint_cap`. On success the price is clamped
//! to the ceiling.
//!
//! **Floor** (`P < floor_base − f^r`): a redemption ratio
//! `χ = max(ratio_floor, base · (1 + ζ))` caps the budget at `χ · L`. If the
//! supply reduction that reaches the floor fits in the cap it is redeemed and
//! the price is clamped; otherwise the capped budget is redeemed and the
//! clearing price stands. Holders of the synthetic asset hand their balance to
//! the whale, which redeems against the riskiest positions.
//!
//! Redemption fee revenue is convex in the amount redeemed:
//! `R^r = D^r · (f^r + D^r / S)`.

use super::equilibrium::{solve_price, supply_for_price, Equilibrium};
use crate::decisions::open::open_for_next_agent;
use crate::decisions::{fatal, OpenCandidate, PeriodContext};
use crate::ledger::{Ledger, RedemptionRequest, WHALE};
use crate::models::{AgentRegistry, Event, EventLog};
use crate::orchestrator::{SimulationError, Stage};
use crate::price::process::normal;
use crate::rng::Stream;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DUST: f64 = 1e-9;

/// Stabilizer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Ceiling is `ceiling_base + issuance_rate`
    pub ceiling_base: f64,
    /// Floor is `floor_base − redemption_rate`
    pub floor_base: f64,
    pub ceiling_target_ratio: f64,
    pub ceiling_inattention: f64,
    /// Largest debt one ceiling position mints; `None` uses the ledger's minimum debt
    pub ceiling_mint_cap: Option<f64>,
    pub redemption_volatility: f64,
    pub redemption_base_ratio: f64,
    pub redemption_ratio_floor: f64,
    /// Passed to every `redeem` call
    pub max_redemption_iterations: usize,
    pub max_fee_fraction: f64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            ceiling_base: 1.1,
            floor_base: 1.0,
            ceiling_target_ratio: 1.1,
            ceiling_inattention: 0.1,
            ceiling_mint_cap: None,
            redemption_volatility: 0.001,
            redemption_base_ratio: 0.8,
            redemption_ratio_floor: 1.0,
            max_redemption_iterations: 70,
            max_fee_fraction: 1.0,
        }
    }
}

/// What the stabilizers did in one period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StabilizerOutcome {
    /// Synthetic price after stabilization
    pub price: f64,
    /// Effective liquidity pool after stabilization
    pub pool: f64,
    pub ceiling_triggered: bool,
    pub floor_triggered: bool,
    /// Debt minted by the ceiling position, fee included
    pub minted: f64,
    /// Issuance fee on the ceiling position, in synthetic units
    pub issuance_fee: f64,
    pub redemption_budget: f64,
    pub redeemed: f64,
    /// `redeemed · (f^r + redeemed / S)`
    pub redemption_fee: f64,
    pub positions_redeemed: usize,
}

#[derive(Debug, Clone)]
pub struct PriceStabilizer {
    config: StabilizerConfig,
    redemption_shock: Normal<f64>,
}

impl PriceStabilizer {
    pub fn new(config: &StabilizerConfig) -> Result<Self, SimulationError> {
        if !(config.ceiling_base > config.floor_base) {
            return Err(SimulationError::InvalidConfig(
                "stabilizer.ceiling_base must exceed stabilizer.floor_base".to_string(),
            ));
        }
        if !(config.ceiling_target_ratio > 0.0) || config.ceiling_mint_cap.is_some_and(|c| c <= 0.0) {
            return Err(SimulationError::InvalidConfig(
                "stabilizer ceiling position terms must be positive".to_string(),
            ));
        }
        Ok(Self {
            config: config.clone(),
            redemption_shock: normal(config.redemption_volatility, "stabilizer.redemption_volatility")?,
        })
    }

    pub fn ceiling(&self, issuance_rate: f64) -> f64 {
        self.config.ceiling_base + issuance_rate
    }

    pub fn floor(&self, redemption_rate: f64) -> f64 {
        self.config.floor_base - redemption_rate
    }

    /// Share `χ` of the liquidity pool that may be redeemed this period.
    pub fn redemption_ratio(&self, ctx: &PeriodContext<'_>) -> f64 {
        let mut rng = ctx.schedule.rng(Stream::RedemptionShock, ctx.period, 0);
        let zeta = self.redemption_shock.sample(&mut rng);
        (self.config.redemption_base_ratio * (1.0 + zeta)).max(self.config.redemption_ratio_floor)
    }

    /// Apply the ceiling then the floor to a cleared market.
    pub fn apply<L: Ledger>(
        &self,
        equilibrium: &Equilibrium,
        elasticity: f64,
        ledger: &mut L,
        registry: &mut AgentRegistry,
        events: &mut EventLog,
        ctx: &PeriodContext<'_>,
    ) -> Result<StabilizerOutcome, SimulationError> {
        let previous = ctx.synthetic_price;
        let issuance_rate = ledger.issuance_rate();
        let redemption_rate = ledger.redemption_rate();
        let mut outcome = StabilizerOutcome {
            price: equilibrium.price,
            pool: equilibrium.pool,
            ..Default::default()
        };

        let ceiling = self.ceiling(issuance_rate);
        if outcome.price > ceiling {
            outcome.ceiling_triggered = true;
            let wanted = supply_for_price(
                equilibrium.reserve,
                equilibrium.pool_next,
                ceiling,
                previous,
                elasticity,
            );
            let cap = self.config.ceiling_mint_cap.unwrap_or(ctx.params.min_debt);
            // the ledger rejects anything below its minimum debt
            let mint = (wanted - equilibrium.supply).min(cap).max(ctx.params.min_debt);
            let terms = OpenCandidate {
                collateral: mint * self.config.ceiling_target_ratio / ctx.collateral_price,
                target_ratio: self.config.ceiling_target_ratio,
                inattention: self.config.ceiling_inattention,
                net_debt: mint,
            };
            match open_for_next_agent(ledger, registry, ctx, Stage::Stabilizer, &terms)? {
                Some(opened) => {
                    debug!(
                        period = ctx.period,
                        agent = opened.agent,
                        minted = mint,
                        price = outcome.price,
                        ceiling,
                        "ceiling arbitrage"
                    );
                    events.log(Event::CeilingArbitrage {
                        period: ctx.period,
                        position_id: opened.position_id,
                        minted: mint,
                        price_before: outcome.price,
                        price_after: ceiling,
                    });
                    outcome.price = ceiling;
                    outcome.pool = wanted - equilibrium.reserve;
                    outcome.minted = mint;
                    outcome.issuance_fee = opened.fee;
                }
                None => debug!(period = ctx.period, price = outcome.price, "ceiling arbitrage not possible"),
            }
        }

        let floor = self.floor(redemption_rate);
        if outcome.price < floor {
            outcome.floor_triggered = true;
            let ratio = self.redemption_ratio(ctx);
            let supply_target = supply_for_price(
                equilibrium.reserve,
                equilibrium.pool_next,
                floor,
                previous,
                elasticity,
            );
            let reduction = equilibrium.supply - supply_target;
            let cap = ratio * outcome.pool;
            let price_before = outcome.price;
            if reduction < cap {
                outcome.redemption_budget = reduction;
                outcome.price = floor;
            } else {
                outcome.redemption_budget = cap;
                outcome.price = solve_price(previous, outcome.pool, equilibrium.pool_next, elasticity);
            }
            debug!(
                period = ctx.period,
                ratio,
                budget = outcome.redemption_budget,
                price_before,
                price_after = outcome.price,
                "floor arbitrage"
            );
            events.log(Event::FloorArbitrage {
                period: ctx.period,
                budget: outcome.redemption_budget,
                price_before,
                price_after: outcome.price,
            });

            let (redeemed, positions) =
                self.redeem_budget(outcome.redemption_budget, ledger, registry, events, ctx)?;
            outcome.redeemed = redeemed;
            outcome.positions_redeemed = positions;
            if equilibrium.supply > 0.0 {
                outcome.redemption_fee =
                    redeemed * (redemption_rate + redeemed / equilibrium.supply);
            }
        }

        Ok(outcome)
    }

    /// Walk active agents in registry order; each hands up to the remaining
    /// budget to the whale, which redeems it. Returns the amount redeemed and
    /// the number of positions fully redeemed.
    fn redeem_budget<L: Ledger>(
        &self,
        budget: f64,
        ledger: &mut L,
        registry: &mut AgentRegistry,
        events: &mut EventLog,
        ctx: &PeriodContext<'_>,
    ) -> Result<(f64, usize), SimulationError> {
        let holders: Vec<_> = registry.active().iter().map(|e| e.agent).collect();
        let mut remaining = budget;
        let mut redeemed = 0.0;
        let mut closed = 0;

        for agent in holders {
            if remaining <= DUST {
                break;
            }
            let amount = ledger.balance_of(agent).min(remaining);
            if amount <= DUST {
                continue;
            }
            let hints = ledger.redemption_hints(
                amount,
                ctx.collateral_price,
                self.config.max_redemption_iterations,
            );
            if hints.truncated_amount <= DUST {
                continue;
            }
            ledger
                .transfer(agent, WHALE, hints.truncated_amount)
                .map_err(fatal(ctx.period, Stage::Stabilizer))?;
            let candidates = registry.hint_candidates(hints.partial_nominal_ratio * ctx.collateral_price);
            let insert_hints = ledger.insertion_hints(
                hints.partial_nominal_ratio,
                candidates.upper,
                candidates.lower,
            );
            let request = RedemptionRequest {
                amount: hints.truncated_amount,
                first_hint: hints.first,
                insert_hints,
                partial_nominal_ratio: hints.partial_nominal_ratio,
                max_iterations: self.config.max_redemption_iterations,
                max_fee_fraction: self.config.max_fee_fraction,
            };
            let result = ledger
                .redeem(WHALE, &request)
                .map_err(fatal(ctx.period, Stage::Stabilizer))?;

            let mut fully_redeemed = Vec::new();
            for update in result.fully_redeemed() {
                if registry.remove_by_position(update.position_id).is_none() {
                    warn!(
                        period = ctx.period,
                        position = %update.position_id,
                        owner = update.owner,
                        "redeemed position not found among active agents"
                    );
                }
                fully_redeemed.push(update.position_id);
            }
            closed += fully_redeemed.len();
            redeemed += result.redeemed;
            remaining -= result.redeemed;
            events.log(Event::Redemption {
                period: ctx.period,
                redeemed: result.redeemed,
                collateral_drawn: result.collateral_drawn,
                fully_redeemed,
            });
        }

        if remaining > DUST {
            debug!(period = ctx.period, remaining, "redemption budget not exhausted");
        }
        Ok((redeemed, closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InsertHints, LedgerParams, MemoryLedger};
    use crate::rng::SeedSchedule;

    #[test]
    fn test_redemption_ratio_never_below_floor() {
        let stabilizer = PriceStabilizer::new(&StabilizerConfig::default()).unwrap();
        let schedule = SeedSchedule::new(4);
        let params = LedgerParams::default();
        for period in 0..50 {
            let ctx = PeriodContext {
                period,
                collateral_price: 2000.0,
                synthetic_price: 1.0,
                schedule: &schedule,
                params: &params,
            };
            assert_eq!(stabilizer.redemption_ratio(&ctx), 1.0);
        }
    }

    #[test]
    fn test_band_edges_follow_fee_rates() {
        let stabilizer = PriceStabilizer::new(&StabilizerConfig::default()).unwrap();
        assert!((stabilizer.ceiling(0.005) - 1.105).abs() < 1e-12);
        assert!((stabilizer.floor(0.005) - 0.995).abs() < 1e-12);
    }

    #[test]
    fn test_price_inside_band_is_untouched() {
        let stabilizer = PriceStabilizer::new(&StabilizerConfig::default()).unwrap();
        let schedule = SeedSchedule::new(4);
        let params = LedgerParams::default();
        let mut ledger = MemoryLedger::new(params.clone(), 2000.0);
        ledger
            .open_position(WHALE, 1_000_000.0, InsertHints::default(), 3000.0)
            .unwrap();
        let mut registry = AgentRegistry::new(3);
        let mut events = EventLog::new();
        let equilibrium = Equilibrium {
            reserve: 0.0,
            supply: 1_005_000.0,
            pool: 1_005_000.0,
            pool_next: 1_005_000.0,
            price: 1.0,
        };
        let ctx = PeriodContext {
            period: 2,
            collateral_price: 2000.0,
            synthetic_price: 1.0,
            schedule: &schedule,
            params: &params,
        };
        let outcome = stabilizer
            .apply(&equilibrium, -20.0, &mut ledger, &mut registry, &mut events, &ctx)
            .unwrap();
        assert_eq!(outcome.price, 1.0);
        assert!(!outcome.ceiling_triggered && !outcome.floor_triggered);
        assert!(events.is_empty());
        assert_eq!(ledger.position_count(), 1);
    }
}
