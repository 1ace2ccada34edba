//! Ledger seam
//!
//! The simulation core never stores positions itself. It drives an external
//! ledger (position CRUD, risk-ordered registry, fee-rate queries, the
//! synthetic token and the stability reserve) through the [`Ledger`] trait.
//!
//! Every mutating call either completes or returns a [`LedgerError`]. The core
//! treats an error from liquidation, redemption or any unguarded mutation as
//! fatal for the run; see `orchestrator::SimulationError`.
//!
//! [`MemoryLedger`] is an in-process implementation used by the batch driver
//! and the tests.

pub mod memory;

pub use memory::{LedgerParams, MemoryLedger};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Index of an account (agent) on the ledger. Account 0 is the whale.
pub type AccountId = usize;

/// The whale: holds the seed position, the initial reserve deposit and acts as
/// liquidator and redeemer.
pub const WHALE: AccountId = 0;

/// Opaque position identifier handed out by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos#{}", self.0)
    }
}

/// Neighbour hints for placing a position in the risk-sorted registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertHints {
    pub upper: Option<PositionId>,
    pub lower: Option<PositionId>,
}

/// Debt and collateral of one position, with pending rewards applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAmounts {
    pub debt: f64,
    pub collateral: f64,
}

/// Aggregate collateral and debt across every open position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemTotals {
    pub collateral: f64,
    pub debt: f64,
}

impl SystemTotals {
    /// Total collateralization ratio at `price`.
    pub fn collateral_ratio(&self, price: f64) -> f64 {
        if self.debt <= 0.0 {
            return f64::INFINITY;
        }
        self.collateral * price / self.debt
    }

    /// Total collateralization ratio after a signed change to both sides.
    pub fn ratio_after(&self, price: f64, collateral_change: f64, debt_change: f64) -> f64 {
        SystemTotals {
            collateral: self.collateral + collateral_change,
            debt: self.debt + debt_change,
        }
        .collateral_ratio(price)
    }
}

/// A position removed by a liquidation batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidatedPosition {
    pub position_id: PositionId,
    pub owner: AccountId,
    pub debt: f64,
    pub collateral: f64,
}

/// Event payload of one `liquidate_batch` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiquidationOutcome {
    pub liquidated: Vec<LiquidatedPosition>,
}

/// Hints computed by the ledger for a redemption of `truncated_amount`.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionHints {
    pub first: Option<PositionId>,
    pub partial_nominal_ratio: f64,
    pub truncated_amount: f64,
}

/// Arguments of one `redeem` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionRequest {
    pub amount: f64,
    pub first_hint: Option<PositionId>,
    pub insert_hints: InsertHints,
    pub partial_nominal_ratio: f64,
    pub max_iterations: usize,
    /// Maximum acceptable fee as a fraction of the redeemed amount.
    pub max_fee_fraction: f64,
}

/// State of a position touched by a redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub position_id: PositionId,
    pub owner: AccountId,
    pub debt: f64,
    pub collateral: f64,
}

/// Event payload of one `redeem` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedemptionOutcome {
    pub redeemed: f64,
    pub collateral_drawn: f64,
    pub fee_collateral: f64,
    pub updates: Vec<PositionUpdate>,
}

impl RedemptionOutcome {
    /// Positions left with zero collateral, i.e. closed by the redemption.
    pub fn fully_redeemed(&self) -> impl Iterator<Item = &PositionUpdate> {
        self.updates.iter().filter(|u| u.collateral == 0.0)
    }
}

/// A reverted ledger call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("{operation} reverted: {reason}")]
    Reverted {
        operation: &'static str,
        reason: String,
    },

    #[error("Unknown position {0}")]
    UnknownPosition(PositionId),

    #[error("Account {account} does not own position {position}")]
    NotOwner {
        account: AccountId,
        position: PositionId,
    },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Debt {debt} below minimum {minimum}")]
    BelowMinimumDebt { debt: f64, minimum: f64 },

    #[error("{0} is not permitted in recovery mode")]
    RecoveryModeRestriction(&'static str),

    #[error("Fee rate {rate} exceeds maximum {max}")]
    FeeExceedsMaximum { rate: f64, max: f64 },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Nominal collateral ratio: collateral per unit of debt, price-free.
pub fn nominal_ratio(collateral: f64, debt: f64) -> f64 {
    if debt <= 0.0 {
        return f64::INFINITY;
    }
    collateral / debt
}

/// Borrow amount whose debt (amount plus issuance fee) equals `net_debt`.
pub fn amount_from_net_debt(net_debt: f64, issuance_rate: f64) -> f64 {
    net_debt / (1.0 + issuance_rate)
}

/// Operations the simulation core consumes from the position ledger.
pub trait Ledger {
    /// Price feed update, called once at the start of each period.
    fn set_price(&mut self, price: f64);

    fn price(&self) -> f64;

    fn open_position(
        &mut self,
        owner: AccountId,
        debt: f64,
        hints: InsertHints,
        collateral: f64,
    ) -> LedgerResult<PositionId>;

    fn close_position(&mut self, owner: AccountId, id: PositionId) -> LedgerResult<()>;

    fn repay_debt(
        &mut self,
        owner: AccountId,
        id: PositionId,
        amount: f64,
        hints: InsertHints,
    ) -> LedgerResult<()>;

    fn withdraw_debt(
        &mut self,
        owner: AccountId,
        id: PositionId,
        amount: f64,
        hints: InsertHints,
    ) -> LedgerResult<()>;

    fn add_collateral(
        &mut self,
        owner: AccountId,
        id: PositionId,
        hints: InsertHints,
        amount: f64,
    ) -> LedgerResult<()>;

    fn withdraw_collateral(
        &mut self,
        owner: AccountId,
        id: PositionId,
        hints: InsertHints,
        amount: f64,
    ) -> LedgerResult<()>;

    /// Liquidate up to `max_count` positions from the riskiest end.
    fn liquidate_batch(
        &mut self,
        liquidator: AccountId,
        max_count: usize,
    ) -> LedgerResult<LiquidationOutcome>;

    fn redeem(
        &mut self,
        redeemer: AccountId,
        request: &RedemptionRequest,
    ) -> LedgerResult<RedemptionOutcome>;

    fn current_collateral_ratio(&self, id: PositionId, price: f64) -> LedgerResult<f64>;

    fn synced_debt_and_collateral(&self, id: PositionId) -> LedgerResult<PositionAmounts>;

    fn is_recovery_mode(&self, price: f64) -> bool;

    fn issuance_rate(&self) -> f64;

    fn redemption_rate(&self) -> f64;

    fn insertion_hints(
        &self,
        nominal_ratio: f64,
        upper_candidate: Option<PositionId>,
        lower_candidate: Option<PositionId>,
    ) -> InsertHints;

    fn redemption_hints(&self, amount: f64, price: f64, max_iterations: usize) -> RedemptionHints;

    /// Position with the lowest collateral ratio.
    fn worst_ranked_position(&self) -> Option<PositionId>;

    /// Next position after `id`, walking from riskiest toward safest.
    fn next_ranked(&self, id: PositionId) -> Option<PositionId>;

    fn position_count(&self) -> usize;

    fn system_totals(&self) -> SystemTotals;

    fn total_supply(&self) -> f64;

    fn balance_of(&self, account: AccountId) -> f64;

    fn transfer(&mut self, from: AccountId, to: AccountId, amount: f64) -> LedgerResult<()>;

    fn reserve_balance(&self) -> f64;

    fn reserve_collateral(&self) -> f64;

    fn reserve_deposit_of(&self, account: AccountId) -> f64;

    fn provide_to_reserve(&mut self, account: AccountId, amount: f64) -> LedgerResult<()>;

    /// Withdraw up to `amount` of the account's deposit; returns the amount withdrawn.
    fn withdraw_from_reserve(&mut self, account: AccountId, amount: f64) -> LedgerResult<f64>;
}
