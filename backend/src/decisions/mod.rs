//! Position decision models
//!
//! Each model reads the period's market state, decides a set of actions and
//! pushes them to the ledger:
//!
//! - **open**: how many inactive agents open a position, and with what terms
//! - **close**: which active positions are repaid and closed
//! - **adjust**: which positions drifted outside their tolerance band, and how
//!   they are brought back to target
//!
//! Planning is separated from execution where the plan is random, so the same
//! period with the same seed schedule always yields the same plan.
//!
//! # Error policy
//!
//! [`ActionError`]s are recovered locally: the action is skipped and logged.
//! Any ledger error is fatal and surfaces as `SimulationError::Ledger`.

pub mod adjust;
pub mod close;
pub mod open;

pub use adjust::{AdjustConfig, AdjustModel, AdjustOutcome};
pub use close::{CloseConfig, CloseModel, CloseOutcome, ClosePlan};
pub use open::{OpenCandidate, OpenConfig, OpenExpectations, OpenModel, OpenOutcome, OpenPlan};

use crate::ledger::{AccountId, Ledger, LedgerError, LedgerParams};
use crate::orchestrator::{SimulationError, Stage};
use crate::rng::SeedSchedule;
use thiserror::Error;

/// Market state shared by the decision models during one period.
#[derive(Debug, Clone, Copy)]
pub struct PeriodContext<'a> {
    pub period: usize,
    pub collateral_price: f64,
    /// Synthetic-asset price from the previous period
    pub synthetic_price: f64,
    pub schedule: &'a SeedSchedule,
    pub params: &'a LedgerParams,
}

/// Locally recovered decision failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    #[error("Agent {agent} is short {shortfall} of {required} synthetic asset")]
    InsufficientBalance {
        agent: AccountId,
        required: f64,
        shortfall: f64,
    },

    #[error("No eligible agents for {0}")]
    NoEligibleAgents(&'static str),

    #[error("Stability reserve baseline is zero")]
    DegenerateReturn,
}

/// Wrap a ledger error as a fatal error for `stage` of `period`.
pub(crate) fn fatal(period: usize, stage: Stage) -> impl FnOnce(LedgerError) -> SimulationError {
    move |source| SimulationError::Ledger {
        period,
        stage,
        source,
    }
}

/// Would the system stay at or above the critical ratio after the change?
pub fn stays_above_critical<L: Ledger>(
    ledger: &L,
    ctx: &PeriodContext<'_>,
    collateral_change: f64,
    debt_change: f64,
) -> bool {
    ledger
        .system_totals()
        .ratio_after(ctx.collateral_price, collateral_change, debt_change)
        >= ctx.params.critical_collateral_ratio
}

/// Round a non-negative count to the nearest integer.
pub(crate) fn round_count(x: f64) -> usize {
    if x.is_finite() && x > 0.0 {
        x.round() as usize
    } else {
        0
    }
}
