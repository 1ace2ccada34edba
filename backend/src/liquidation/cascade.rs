//! Liquidation cascade
//!
//! Runs first in every period, right after the price update. While the
//! riskiest position is liquidatable, submit a batch to the ledger and move
//! the owners of liquidated positions back to the inactive pool.
//!
//! ```text
//! pending ⇔ registry non-empty ∧ worst < CCR ∧ (worst < MCR ∨ recovery-coverable)
//! ```
//!
//! where *recovery-coverable* means recovery mode is active and, scanning up
//! to one batch from the worst position, the reserve covers the cumulative
//! debt before a position at or above CCR is reached.
//!
//! Every batch must shrink the ledger; a batch that does not, or a cascade
//! longer than `max_iterations`, is reported as a stalled cascade.

use crate::decisions::{fatal, PeriodContext};
use crate::ledger::{Ledger, LedgerResult, WHALE};
use crate::models::{AgentRegistry, Event, EventLog};
use crate::orchestrator::{SimulationError, Stage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Cascade parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Positions per `liquidate_batch` call
    pub batch_size: usize,
    /// Upper bound on batches per period
    pub max_iterations: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_iterations: 10_000,
        }
    }
}

/// What one period's cascade did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CascadeOutcome {
    pub batches: usize,
    pub positions_liquidated: usize,
    /// Collateral held by the liquidated positions
    pub collateral_liquidated: f64,
    /// Synthetic asset burned from the reserve
    pub reserve_debt_absorbed: f64,
    /// Collateral credited to the reserve
    pub reserve_collateral_gained: f64,
    /// `gained · P^e − absorbed · P^s`
    pub liquidation_gain: f64,
    /// Reserve balance before the cascade
    pub reserve_before: f64,
}

/// Is there at least one liquidation the ledger would accept?
pub fn pending_liquidations<L: Ledger>(
    ledger: &L,
    ctx: &PeriodContext<'_>,
    batch_size: usize,
) -> LedgerResult<bool> {
    let Some(worst) = ledger.worst_ranked_position() else {
        return Ok(false);
    };
    // the ledger never liquidates its last position
    if ledger.position_count() <= 1 {
        return Ok(false);
    }
    let price = ctx.collateral_price;
    let mcr = ctx.params.minimum_collateral_ratio;
    let ccr = ctx.params.critical_collateral_ratio;

    let icr = ledger.current_collateral_ratio(worst, price)?;
    if icr >= ccr {
        return Ok(false);
    }
    if icr < mcr {
        return Ok(true);
    }
    if !ledger.is_recovery_mode(price) {
        return Ok(false);
    }

    let reserve = ledger.reserve_balance();
    let mut cumulative = 0.0;
    let mut current = worst;
    for _ in 0..batch_size {
        cumulative += ledger.synced_debt_and_collateral(current)?.debt;
        if reserve >= cumulative {
            return Ok(true);
        }
        let Some(next) = ledger.next_ranked(current) else {
            return Ok(false);
        };
        if ledger.current_collateral_ratio(next, price)? >= ccr {
            return Ok(false);
        }
        current = next;
    }
    Ok(false)
}

/// Liquidate until nothing is pending.
pub fn run_cascade<L: Ledger>(
    ledger: &mut L,
    registry: &mut AgentRegistry,
    events: &mut EventLog,
    ctx: &PeriodContext<'_>,
    config: &CascadeConfig,
) -> Result<CascadeOutcome, SimulationError> {
    let reserve_before = ledger.reserve_balance();
    let reserve_collateral_before = ledger.reserve_collateral();
    let mut outcome = CascadeOutcome {
        reserve_before,
        ..Default::default()
    };

    while pending_liquidations(ledger, ctx, config.batch_size)
        .map_err(fatal(ctx.period, Stage::Liquidation))?
    {
        if outcome.batches >= config.max_iterations {
            return Err(SimulationError::CascadeStalled {
                period: ctx.period,
                iterations: outcome.batches,
            });
        }
        outcome.batches += 1;

        let count_before = ledger.position_count();
        let batch = ledger
            .liquidate_batch(WHALE, config.batch_size)
            .map_err(fatal(ctx.period, Stage::Liquidation))?;
        if ledger.position_count() >= count_before || batch.liquidated.is_empty() {
            return Err(SimulationError::CascadeStalled {
                period: ctx.period,
                iterations: outcome.batches,
            });
        }

        let mut debt = 0.0;
        let mut collateral = 0.0;
        for position in &batch.liquidated {
            debt += position.debt;
            collateral += position.collateral;
            if registry.remove_by_position(position.position_id).is_none() && position.owner != WHALE {
                warn!(
                    period = ctx.period,
                    position = %position.position_id,
                    owner = position.owner,
                    "liquidated position not found among active agents"
                );
            }
        }
        debug!(
            period = ctx.period,
            count = batch.liquidated.len(),
            debt,
            collateral,
            "liquidation batch"
        );
        outcome.positions_liquidated += batch.liquidated.len();
        outcome.collateral_liquidated += collateral;
        events.log(Event::LiquidationBatch {
            period: ctx.period,
            positions: batch.liquidated.iter().map(|p| p.position_id).collect(),
            debt,
            collateral,
        });
    }

    outcome.reserve_debt_absorbed = (reserve_before - ledger.reserve_balance()).max(0.0);
    outcome.reserve_collateral_gained = ledger.reserve_collateral() - reserve_collateral_before;
    outcome.liquidation_gain = outcome.reserve_collateral_gained * ctx.collateral_price
        - outcome.reserve_debt_absorbed * ctx.synthetic_price;
    Ok(outcome)
}
