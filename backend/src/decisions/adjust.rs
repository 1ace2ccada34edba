//! Adjust model
//!
//! A position whose ratio left its tolerance band `[CR* − τ, CR* + 2τ]` is
//! brought back to `CR*` exactly. Which side of the balance sheet moves is
//! decided in two stages:
//!
//! 1. one period-wide draw `ratio ~ U(0, 1)`
//! 2. one draw `p ~ U(0, 1)` per position: `p ≥ ratio` adjusts debt,
//!    otherwise collateral
//!
//! Debt side: repay when under-collateralized (own balance only), borrow when
//! over-collateralized. Collateral side: deposit when under-collateralized,
//! withdraw when over-collateralized. Borrowing and withdrawing are skipped in
//! recovery mode or when the system would fall below the critical ratio.

use super::{fatal, stays_above_critical, ActionError, PeriodContext};
use crate::ledger::{amount_from_net_debt, nominal_ratio, AccountId, Ledger, PositionId};
use crate::models::{ActiveEntry, AdjustAction, AgentRegistry, Event, EventLog};
use crate::orchestrator::{SimulationError, Stage};
use crate::rng::Stream;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tolerance band, in multiples of `τ` around `CR*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustConfig {
    pub lower_band: f64,
    pub upper_band: f64,
}

impl Default for AdjustConfig {
    fn default() -> Self {
        Self {
            lower_band: 1.0,
            upper_band: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdjustOutcome {
    pub adjusted: usize,
    pub collateral_added: f64,
    /// Issuance fee charged on new borrowing, in synthetic units
    pub issuance_fee: f64,
}

#[derive(Debug, Clone)]
pub struct AdjustModel {
    config: AdjustConfig,
}

impl AdjustModel {
    pub fn new(config: &AdjustConfig) -> Result<Self, SimulationError> {
        if !(config.lower_band >= 0.0 && config.upper_band >= 0.0) {
            return Err(SimulationError::InvalidConfig(
                "adjust bands must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            config: config.clone(),
        })
    }

    /// Distance from target in units of `τ`.
    pub fn band_position(ratio: f64, target: f64, inattention: f64) -> f64 {
        let gap = ratio - target;
        if inattention > 0.0 {
            gap / inattention
        } else if gap > 0.0 {
            f64::INFINITY
        } else if gap < 0.0 {
            f64::NEG_INFINITY
        } else {
            0.0
        }
    }

    pub fn within_band(&self, check: f64) -> bool {
        -self.config.lower_band <= check && check <= self.config.upper_band
    }

    /// Period-wide split between debt and collateral adjustments.
    pub fn split_ratio(ctx: &PeriodContext<'_>) -> f64 {
        ctx.schedule
            .rng(Stream::AdjustSplit, ctx.period, 0)
            .gen_range(0.0..1.0)
    }

    /// Per-position draw compared against the split ratio.
    pub fn position_draw(ctx: &PeriodContext<'_>, item: usize) -> f64 {
        ctx.schedule
            .rng(Stream::AdjustPosition, ctx.period, item)
            .gen_range(0.0..1.0)
    }

    pub fn execute<L: Ledger>(
        &self,
        ledger: &mut L,
        registry: &AgentRegistry,
        events: &mut EventLog,
        ctx: &PeriodContext<'_>,
    ) -> Result<AdjustOutcome, SimulationError> {
        let mut outcome = AdjustOutcome::default();
        if registry.active_len() == 0 {
            return Ok(outcome);
        }
        let ratio = Self::split_ratio(ctx);
        let entries: Vec<ActiveEntry> = registry.active().to_vec();

        for (i, entry) in entries.iter().enumerate() {
            let price = ctx.collateral_price;
            let id = entry.position_id;
            let current = ledger
                .current_collateral_ratio(id, price)
                .map_err(fatal(ctx.period, Stage::Adjust))?;
            let amounts = ledger
                .synced_debt_and_collateral(id)
                .map_err(fatal(ctx.period, Stage::Adjust))?;
            let p = Self::position_draw(ctx, i);
            let check = Self::band_position(current, entry.target_ratio, entry.inattention);
            if self.within_band(check) {
                continue;
            }
            let under = check < -self.config.lower_band;

            let action = if p >= ratio {
                let debt_new = price * amounts.collateral / entry.target_ratio;
                if debt_new < ctx.params.min_debt {
                    continue;
                }
                if under {
                    let repay = amounts.debt - debt_new;
                    match repay_from_own_balance(ledger, entry.agent, repay) {
                        Ok(()) => {}
                        Err(ActionError::InsufficientBalance { shortfall, .. }) => {
                            warn!(period = ctx.period, agent = entry.agent, shortfall, "cannot repay");
                            events.log(Event::ShortfallUnresolved {
                                period: ctx.period,
                                agent: entry.agent,
                                position_id: id,
                                shortfall,
                            });
                            continue;
                        }
                        Err(other) => {
                            warn!(period = ctx.period, error = %other, "repay skipped");
                            continue;
                        }
                    }
                    let hints = hints_for(ledger, registry, amounts.collateral, debt_new, price);
                    ledger
                        .repay_debt(entry.agent, id, repay, hints)
                        .map_err(fatal(ctx.period, Stage::Adjust))?;
                    Some((AdjustAction::RepayDebt, repay))
                } else if !ledger.is_recovery_mode(price) {
                    let increase = debt_new - amounts.debt;
                    if !stays_above_critical(ledger, ctx, 0.0, increase) {
                        continue;
                    }
                    let rate = ledger.issuance_rate();
                    let amount = amount_from_net_debt(increase, rate);
                    let hints = hints_for(ledger, registry, amounts.collateral, debt_new, price);
                    ledger
                        .withdraw_debt(entry.agent, id, amount, hints)
                        .map_err(fatal(ctx.period, Stage::Adjust))?;
                    outcome.issuance_fee += increase - amount;
                    Some((AdjustAction::WithdrawDebt, amount))
                } else {
                    None
                }
            } else {
                let collateral_new = entry.target_ratio * amounts.debt / price;
                let hints = hints_for(ledger, registry, collateral_new, amounts.debt, price);
                if under {
                    let added = collateral_new - amounts.collateral;
                    ledger
                        .add_collateral(entry.agent, id, hints, added)
                        .map_err(fatal(ctx.period, Stage::Adjust))?;
                    outcome.collateral_added += added;
                    Some((AdjustAction::AddCollateral, added))
                } else if !ledger.is_recovery_mode(price) {
                    let withdrawn = amounts.collateral - collateral_new;
                    if !stays_above_critical(ledger, ctx, -withdrawn, 0.0) {
                        continue;
                    }
                    ledger
                        .withdraw_collateral(entry.agent, id, hints, withdrawn)
                        .map_err(fatal(ctx.period, Stage::Adjust))?;
                    Some((AdjustAction::WithdrawCollateral, withdrawn))
                } else {
                    None
                }
            };

            if let Some((action, amount)) = action {
                debug!(period = ctx.period, agent = entry.agent, position = %id, ?action, amount, "position adjusted");
                events.log(Event::PositionAdjusted {
                    period: ctx.period,
                    agent: entry.agent,
                    position_id: id,
                    action,
                    amount,
                });
                outcome.adjusted += 1;
            }
        }
        Ok(outcome)
    }
}

fn repay_from_own_balance<L: Ledger>(
    ledger: &L,
    agent: AccountId,
    amount: f64,
) -> Result<(), ActionError> {
    let balance = ledger.balance_of(agent);
    if balance < amount {
        return Err(ActionError::InsufficientBalance {
            agent,
            required: amount,
            shortfall: amount - balance,
        });
    }
    Ok(())
}

fn hints_for<L: Ledger>(
    ledger: &L,
    registry: &AgentRegistry,
    collateral: f64,
    debt: f64,
    price: f64,
) -> crate::ledger::InsertHints {
    let candidates = registry.hint_candidates(price * collateral / debt);
    ledger.insertion_hints(
        nominal_ratio(collateral, debt),
        candidates.upper,
        candidates.lower,
    )
}
