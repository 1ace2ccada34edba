//! In-memory reference ledger
//!
//! A deterministic, single-process stand-in for the on-chain position system:
//!
//! - positions ranked by nominal collateral ratio (riskiest first)
//! - minimum (110%) and critical (150%) collateral ratios, recovery mode
//! - a decaying base rate shared by the issuance and redemption fees
//! - the synthetic token (balances, fee pool) and the stability reserve
//!
//! # Critical Invariants
//!
//! 1. **Supply backing**: total token supply equals total position debt
//! 2. **Ranking**: `ranking` holds every open position exactly once, sorted by
//!    nominal ratio ascending
//! 3. **Minimum debt**: every open position carries at least `min_debt`
//!
//! Liquidated debt is absorbed by the reserve first, then by the liquidator's
//! balance. Whatever neither can cover is redistributed, with the matching
//! share of seized collateral, across the remaining positions pro rata to
//! their collateral.
//!
//! Hints passed to mutating calls are accepted and ignored; this ledger
//! re-ranks exactly on every change.
//!
//! All maps are ordered so aggregate sums are reproducible bit for bit.

use super::{
    nominal_ratio, AccountId, InsertHints, Ledger, LedgerError, LedgerResult,
    LiquidatedPosition, LiquidationOutcome, PositionAmounts, PositionId, PositionUpdate,
    RedemptionHints, RedemptionOutcome, RedemptionRequest, SystemTotals,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Amounts below this are treated as zero.
const DUST: f64 = 1e-9;

/// Slack on ratio checks so a position sized exactly at a threshold passes.
const RATIO_TOLERANCE: f64 = 1e-9;

/// Protocol constants of the reference ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerParams {
    /// Below this ratio a position is liquidatable in any mode (1.1 = 110%)
    pub minimum_collateral_ratio: f64,

    /// Total ratio below which the system is in recovery mode (1.5 = 150%)
    pub critical_collateral_ratio: f64,

    /// Smallest debt an open position may carry
    pub min_debt: f64,

    /// Fee floor added to the base rate (0.005 = 0.5%)
    pub fee_floor: f64,

    /// Issuance fee cap (0.05 = 5%)
    pub max_issuance_rate: f64,

    /// Redemption bumps the base rate by `redeemed / supply / beta`
    pub redemption_beta: f64,

    /// Multiplier applied to the base rate at each price update
    pub base_rate_decay: f64,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            minimum_collateral_ratio: 1.1,
            critical_collateral_ratio: 1.5,
            min_debt: 1800.0,
            fee_floor: 0.005,
            max_issuance_rate: 0.05,
            redemption_beta: 2.0,
            // 12-period half-life
            base_rate_decay: 0.5f64.powf(1.0 / 12.0),
        }
    }
}

#[derive(Debug, Clone)]
struct Position {
    owner: AccountId,
    debt: f64,
    collateral: f64,
}

impl Position {
    fn nominal_ratio(&self) -> f64 {
        nominal_ratio(self.collateral, self.debt)
    }

    fn collateral_ratio(&self, price: f64) -> f64 {
        if self.debt <= 0.0 {
            return f64::INFINITY;
        }
        self.collateral * price / self.debt
    }
}

/// Reference ledger held entirely in memory.
///
/// # Example
/// ```
/// use cdp_simulator_core_rs::ledger::{InsertHints, Ledger, LedgerParams, MemoryLedger};
///
/// let mut ledger = MemoryLedger::new(LedgerParams::default(), 2000.0);
/// let id = ledger
///     .open_position(1, 10_000.0, InsertHints::default(), 10.0)
///     .unwrap();
/// assert_eq!(ledger.position_count(), 1);
/// assert!((ledger.total_supply() - ledger.system_totals().debt).abs() < 1e-6);
/// assert!(ledger.current_collateral_ratio(id, 2000.0).unwrap() < 2.0);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    params: LedgerParams,
    price: f64,
    positions: BTreeMap<PositionId, Position>,
    ranking: Vec<PositionId>,
    next_id: u64,
    balances: BTreeMap<AccountId, f64>,
    fee_pool: f64,
    reserve_deposits: BTreeMap<AccountId, f64>,
    reserve_balance: f64,
    reserve_collateral: f64,
    base_rate: f64,
}

impl MemoryLedger {
    pub fn new(params: LedgerParams, price: f64) -> Self {
        Self {
            params,
            price,
            positions: BTreeMap::new(),
            ranking: Vec::new(),
            next_id: 1,
            balances: BTreeMap::new(),
            fee_pool: 0.0,
            reserve_deposits: BTreeMap::new(),
            reserve_balance: 0.0,
            reserve_collateral: 0.0,
            base_rate: 0.0,
        }
    }

    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    /// Position ids in risk order, riskiest first.
    pub fn ranking(&self) -> &[PositionId] {
        &self.ranking
    }

    /// Synthetic tokens collected as issuance fees.
    pub fn fee_pool(&self) -> f64 {
        self.fee_pool
    }

    fn position(&self, id: PositionId) -> LedgerResult<&Position> {
        self.positions.get(&id).ok_or(LedgerError::UnknownPosition(id))
    }

    fn owned_position_mut(
        &mut self,
        owner: AccountId,
        id: PositionId,
    ) -> LedgerResult<&mut Position> {
        let position = self
            .positions
            .get_mut(&id)
            .ok_or(LedgerError::UnknownPosition(id))?;
        if position.owner != owner {
            return Err(LedgerError::NotOwner {
                account: owner,
                position: id,
            });
        }
        Ok(position)
    }

    fn rank_insert(&mut self, id: PositionId) {
        let nicr = match self.positions.get(&id) {
            Some(p) => p.nominal_ratio(),
            None => return,
        };
        let positions = &self.positions;
        let idx = self
            .ranking
            .partition_point(|other| positions[other].nominal_ratio() < nicr);
        self.ranking.insert(idx, id);
    }

    fn rank_remove(&mut self, id: PositionId) {
        if let Some(idx) = self.ranking.iter().position(|p| *p == id) {
            self.ranking.remove(idx);
        }
    }

    fn rerank(&mut self, id: PositionId) {
        self.rank_remove(id);
        self.rank_insert(id);
    }

    fn credit(&mut self, account: AccountId, amount: f64) {
        *self.balances.entry(account).or_insert(0.0) += amount;
    }

    fn debit(&mut self, account: AccountId, amount: f64) -> LedgerResult<()> {
        let available = self.balance_of(account);
        if amount > available + DUST {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        self.balances.insert(account, (available - amount).max(0.0));
        Ok(())
    }

    /// Burn `amount` from the reserve, scaling every deposit pro rata.
    fn absorb_into_reserve(&mut self, amount: f64) {
        if amount <= 0.0 || self.reserve_balance <= 0.0 {
            return;
        }
        let keep = ((self.reserve_balance - amount) / self.reserve_balance).max(0.0);
        for deposit in self.reserve_deposits.values_mut() {
            *deposit *= keep;
        }
        self.reserve_balance = (self.reserve_balance - amount).max(0.0);
    }

    /// Spread debt and collateral over every open position pro rata to
    /// collateral, then re-sort the ranking.
    fn redistribute(&mut self, debt: f64, collateral: f64) {
        let total: f64 = self.positions.values().map(|p| p.collateral).sum();
        if total <= 0.0 {
            return;
        }
        for position in self.positions.values_mut() {
            let share = position.collateral / total;
            position.debt += debt * share;
            position.collateral += collateral * share;
        }
        let positions = &self.positions;
        self.ranking.sort_by(|a, b| {
            positions[a]
                .nominal_ratio()
                .total_cmp(&positions[b].nominal_ratio())
        });
    }

    fn tcr(&self, price: f64) -> f64 {
        self.system_totals().collateral_ratio(price)
    }

    /// Reject a change that would leave the position below MCR or the system
    /// below CCR.
    fn check_adjustment(
        &self,
        operation: &'static str,
        position: &Position,
        collateral_change: f64,
        debt_change: f64,
    ) -> LedgerResult<()> {
        let price = self.price;
        let after = Position {
            owner: position.owner,
            debt: position.debt + debt_change,
            collateral: position.collateral + collateral_change,
        };
        if after.collateral_ratio(price) + RATIO_TOLERANCE < self.params.minimum_collateral_ratio {
            return Err(LedgerError::Reverted {
                operation,
                reason: "position would fall below the minimum collateral ratio".to_string(),
            });
        }
        let tcr_after = self
            .system_totals()
            .ratio_after(price, collateral_change, debt_change);
        if tcr_after + RATIO_TOLERANCE < self.params.critical_collateral_ratio {
            return Err(LedgerError::Reverted {
                operation,
                reason: "system would enter recovery mode".to_string(),
            });
        }
        Ok(())
    }

    /// Walk the redemption path without mutating: (first, redeemable, partial nicr).
    fn plan_redemption(&self, amount: f64, price: f64, max_iterations: usize) -> RedemptionHints {
        let mut remaining = amount;
        let mut first = None;
        let mut partial_nominal_ratio = 0.0;
        let mut iterations = 0;
        for id in &self.ranking {
            if remaining <= DUST || (max_iterations > 0 && iterations >= max_iterations) {
                break;
            }
            let position = &self.positions[id];
            if position.collateral_ratio(price) < self.params.minimum_collateral_ratio {
                continue;
            }
            if first.is_none() {
                first = Some(*id);
            }
            let take = remaining.min(position.debt);
            let new_debt = position.debt - take;
            if new_debt > DUST && new_debt < self.params.min_debt {
                break;
            }
            if new_debt > DUST {
                partial_nominal_ratio =
                    nominal_ratio(position.collateral - take / price, new_debt);
            }
            remaining -= take;
            iterations += 1;
        }
        RedemptionHints {
            first,
            partial_nominal_ratio,
            truncated_amount: amount - remaining.max(0.0),
        }
    }
}

impl Ledger for MemoryLedger {
    fn set_price(&mut self, price: f64) {
        self.price = price;
        self.base_rate *= self.params.base_rate_decay;
    }

    fn price(&self) -> f64 {
        self.price
    }

    fn open_position(
        &mut self,
        owner: AccountId,
        debt: f64,
        _hints: InsertHints,
        collateral: f64,
    ) -> LedgerResult<PositionId> {
        const OP: &str = "open_position";
        if collateral <= 0.0 || debt <= 0.0 {
            return Err(LedgerError::Reverted {
                operation: OP,
                reason: "debt and collateral must be positive".to_string(),
            });
        }
        let rate = self.issuance_rate();
        let total_debt = debt * (1.0 + rate);
        if total_debt + DUST < self.params.min_debt {
            return Err(LedgerError::BelowMinimumDebt {
                debt: total_debt,
                minimum: self.params.min_debt,
            });
        }
        let candidate = Position {
            owner,
            debt: total_debt,
            collateral,
        };
        let icr = candidate.collateral_ratio(self.price);
        if self.is_recovery_mode(self.price) {
            if icr + RATIO_TOLERANCE < self.params.critical_collateral_ratio {
                return Err(LedgerError::RecoveryModeRestriction(
                    "opening below the critical ratio",
                ));
            }
        } else {
            if icr + RATIO_TOLERANCE < self.params.minimum_collateral_ratio {
                return Err(LedgerError::Reverted {
                    operation: OP,
                    reason: "collateral ratio below minimum".to_string(),
                });
            }
            let tcr_after = self.system_totals().ratio_after(self.price, collateral, total_debt);
            if tcr_after + RATIO_TOLERANCE < self.params.critical_collateral_ratio {
                return Err(LedgerError::Reverted {
                    operation: OP,
                    reason: "system would enter recovery mode".to_string(),
                });
            }
        }

        let id = PositionId(self.next_id);
        self.next_id += 1;
        self.positions.insert(id, candidate);
        self.rank_insert(id);
        self.credit(owner, debt);
        self.fee_pool += total_debt - debt;
        Ok(id)
    }

    fn close_position(&mut self, owner: AccountId, id: PositionId) -> LedgerResult<()> {
        if self.is_recovery_mode(self.price) {
            return Err(LedgerError::RecoveryModeRestriction("closing a position"));
        }
        if self.positions.len() <= 1 {
            return Err(LedgerError::Reverted {
                operation: "close_position",
                reason: "cannot close the only position".to_string(),
            });
        }
        let position = self.owned_position_mut(owner, id)?.clone();
        let tcr_after = self
            .system_totals()
            .ratio_after(self.price, -position.collateral, -position.debt);
        if tcr_after + RATIO_TOLERANCE < self.params.critical_collateral_ratio {
            return Err(LedgerError::Reverted {
                operation: "close_position",
                reason: "system would enter recovery mode".to_string(),
            });
        }
        self.debit(owner, position.debt)?;
        self.positions.remove(&id);
        self.rank_remove(id);
        Ok(())
    }

    fn repay_debt(
        &mut self,
        owner: AccountId,
        id: PositionId,
        amount: f64,
        _hints: InsertHints,
    ) -> LedgerResult<()> {
        let min_debt = self.params.min_debt;
        let debt = self.owned_position_mut(owner, id)?.debt;
        if debt - amount + DUST < min_debt {
            return Err(LedgerError::BelowMinimumDebt {
                debt: debt - amount,
                minimum: min_debt,
            });
        }
        self.debit(owner, amount)?;
        self.owned_position_mut(owner, id)?.debt -= amount;
        self.rerank(id);
        Ok(())
    }

    fn withdraw_debt(
        &mut self,
        owner: AccountId,
        id: PositionId,
        amount: f64,
        _hints: InsertHints,
    ) -> LedgerResult<()> {
        if self.is_recovery_mode(self.price) {
            return Err(LedgerError::RecoveryModeRestriction("withdrawing debt"));
        }
        let rate = self.issuance_rate();
        let total = amount * (1.0 + rate);
        let position = self.owned_position_mut(owner, id)?.clone();
        self.check_adjustment("withdraw_debt", &position, 0.0, total)?;
        self.owned_position_mut(owner, id)?.debt += total;
        self.credit(owner, amount);
        self.fee_pool += total - amount;
        self.rerank(id);
        Ok(())
    }

    fn add_collateral(
        &mut self,
        owner: AccountId,
        id: PositionId,
        _hints: InsertHints,
        amount: f64,
    ) -> LedgerResult<()> {
        if amount <= 0.0 {
            return Err(LedgerError::Reverted {
                operation: "add_collateral",
                reason: "amount must be positive".to_string(),
            });
        }
        self.owned_position_mut(owner, id)?.collateral += amount;
        self.rerank(id);
        Ok(())
    }

    fn withdraw_collateral(
        &mut self,
        owner: AccountId,
        id: PositionId,
        _hints: InsertHints,
        amount: f64,
    ) -> LedgerResult<()> {
        if self.is_recovery_mode(self.price) {
            return Err(LedgerError::RecoveryModeRestriction("withdrawing collateral"));
        }
        let position = self.owned_position_mut(owner, id)?.clone();
        if amount >= position.collateral {
            return Err(LedgerError::Reverted {
                operation: "withdraw_collateral",
                reason: "cannot withdraw all collateral".to_string(),
            });
        }
        self.check_adjustment("withdraw_collateral", &position, -amount, 0.0)?;
        self.owned_position_mut(owner, id)?.collateral -= amount;
        self.rerank(id);
        Ok(())
    }

    fn liquidate_batch(
        &mut self,
        liquidator: AccountId,
        max_count: usize,
    ) -> LedgerResult<LiquidationOutcome> {
        let price = self.price;
        let mcr = self.params.minimum_collateral_ratio;
        let ccr = self.params.critical_collateral_ratio;
        let mut outcome = LiquidationOutcome::default();

        while outcome.liquidated.len() < max_count && self.ranking.len() > 1 {
            let Some(&id) = self.ranking.first() else {
                break;
            };
            let position = self.positions[&id].clone();
            let icr = position.collateral_ratio(price);
            let recovery = self.tcr(price) < ccr;
            let eligible = icr < mcr
                || (recovery && icr < ccr && self.reserve_balance + DUST >= position.debt);
            if !eligible {
                break;
            }

            // Above MCR the seizure is capped at MCR worth of collateral; the
            // surplus goes back to the owner.
            let seized = if icr >= mcr {
                (position.debt * mcr / price).min(position.collateral)
            } else {
                position.collateral
            };
            let from_reserve = position.debt.min(self.reserve_balance);
            let mut remainder = position.debt - from_reserve;
            self.reserve_collateral += seized * from_reserve / position.debt;
            self.absorb_into_reserve(from_reserve);
            if remainder > DUST && self.balance_of(liquidator) + DUST >= remainder {
                self.debit(liquidator, remainder)?;
                remainder = 0.0;
            }

            self.positions.remove(&id);
            self.rank_remove(id);
            if remainder > DUST {
                self.redistribute(remainder, seized * remainder / position.debt);
            }
            outcome.liquidated.push(LiquidatedPosition {
                position_id: id,
                owner: position.owner,
                debt: position.debt,
                collateral: position.collateral,
            });
        }

        if outcome.liquidated.is_empty() {
            return Err(LedgerError::Reverted {
                operation: "liquidate_batch",
                reason: "nothing to liquidate".to_string(),
            });
        }
        Ok(outcome)
    }

    fn redeem(
        &mut self,
        redeemer: AccountId,
        request: &RedemptionRequest,
    ) -> LedgerResult<RedemptionOutcome> {
        const OP: &str = "redeem";
        if request.amount <= 0.0 {
            return Err(LedgerError::Reverted {
                operation: OP,
                reason: "amount must be positive".to_string(),
            });
        }
        let available = self.balance_of(redeemer);
        if request.amount > available + DUST {
            return Err(LedgerError::InsufficientBalance {
                required: request.amount,
                available,
            });
        }

        let supply = self.total_supply();
        let base_rate = (self.base_rate + request.amount / supply / self.params.redemption_beta)
            .min(1.0);
        let rate = (self.params.fee_floor + base_rate).min(1.0);
        if rate > request.max_fee_fraction {
            return Err(LedgerError::FeeExceedsMaximum {
                rate,
                max: request.max_fee_fraction,
            });
        }

        let price = self.price;
        let mcr = self.params.minimum_collateral_ratio;
        let min_debt = self.params.min_debt;
        let mut outcome = RedemptionOutcome::default();
        let mut remaining = request.amount;
        let mut idx = 0;
        let mut iterations = 0;

        while remaining > DUST
            && idx < self.ranking.len()
            && (request.max_iterations == 0 || iterations < request.max_iterations)
        {
            let id = self.ranking[idx];
            let position = self.positions[&id].clone();
            if position.collateral_ratio(price) < mcr {
                idx += 1;
                continue;
            }
            let take = remaining.min(position.debt);
            let new_debt = position.debt - take;
            if new_debt > DUST && new_debt < min_debt {
                // Partial redemption would leave dust debt: cancel it.
                break;
            }
            let drawn = take / price;
            remaining -= take;
            outcome.collateral_drawn += drawn;
            iterations += 1;

            if new_debt <= DUST {
                // Fully redeemed: close and return the surplus to the owner.
                self.positions.remove(&id);
                self.ranking.remove(idx);
                outcome.updates.push(PositionUpdate {
                    position_id: id,
                    owner: position.owner,
                    debt: 0.0,
                    collateral: 0.0,
                });
            } else {
                let collateral = position.collateral - drawn;
                if let Some(p) = self.positions.get_mut(&id) {
                    p.debt = new_debt;
                    p.collateral = collateral;
                }
                self.rerank(id);
                outcome.updates.push(PositionUpdate {
                    position_id: id,
                    owner: position.owner,
                    debt: new_debt,
                    collateral,
                });
            }
        }

        outcome.redeemed = request.amount - remaining.max(0.0);
        if outcome.redeemed <= DUST {
            return Err(LedgerError::Reverted {
                operation: OP,
                reason: "unable to redeem any amount".to_string(),
            });
        }
        self.debit(redeemer, outcome.redeemed)?;
        self.base_rate = base_rate;
        outcome.fee_collateral = outcome.collateral_drawn * rate;
        Ok(outcome)
    }

    fn current_collateral_ratio(&self, id: PositionId, price: f64) -> LedgerResult<f64> {
        Ok(self.position(id)?.collateral_ratio(price))
    }

    fn synced_debt_and_collateral(&self, id: PositionId) -> LedgerResult<PositionAmounts> {
        let position = self.position(id)?;
        Ok(PositionAmounts {
            debt: position.debt,
            collateral: position.collateral,
        })
    }

    fn is_recovery_mode(&self, price: f64) -> bool {
        self.tcr(price) < self.params.critical_collateral_ratio
    }

    fn issuance_rate(&self) -> f64 {
        (self.params.fee_floor + self.base_rate).min(self.params.max_issuance_rate)
    }

    fn redemption_rate(&self) -> f64 {
        (self.params.fee_floor + self.base_rate).min(1.0)
    }

    fn insertion_hints(
        &self,
        nominal_ratio: f64,
        _upper_candidate: Option<PositionId>,
        _lower_candidate: Option<PositionId>,
    ) -> InsertHints {
        let idx = self
            .ranking
            .partition_point(|id| self.positions[id].nominal_ratio() < nominal_ratio);
        InsertHints {
            upper: idx.checked_sub(1).map(|i| self.ranking[i]),
            lower: self.ranking.get(idx).copied(),
        }
    }

    fn redemption_hints(&self, amount: f64, price: f64, max_iterations: usize) -> RedemptionHints {
        self.plan_redemption(amount, price, max_iterations)
    }

    fn worst_ranked_position(&self) -> Option<PositionId> {
        self.ranking.first().copied()
    }

    fn next_ranked(&self, id: PositionId) -> Option<PositionId> {
        let idx = self.ranking.iter().position(|p| *p == id)?;
        self.ranking.get(idx + 1).copied()
    }

    fn position_count(&self) -> usize {
        self.positions.len()
    }

    fn system_totals(&self) -> SystemTotals {
        self.positions
            .values()
            .fold(SystemTotals::default(), |acc, p| SystemTotals {
                collateral: acc.collateral + p.collateral,
                debt: acc.debt + p.debt,
            })
    }

    fn total_supply(&self) -> f64 {
        self.balances.values().sum::<f64>() + self.fee_pool + self.reserve_balance
    }

    fn balance_of(&self, account: AccountId) -> f64 {
        self.balances.get(&account).copied().unwrap_or(0.0)
    }

    fn transfer(&mut self, from: AccountId, to: AccountId, amount: f64) -> LedgerResult<()> {
        if from == to || amount <= 0.0 {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.credit(to, amount);
        Ok(())
    }

    fn reserve_balance(&self) -> f64 {
        self.reserve_balance
    }

    fn reserve_collateral(&self) -> f64 {
        self.reserve_collateral
    }

    fn reserve_deposit_of(&self, account: AccountId) -> f64 {
        self.reserve_deposits.get(&account).copied().unwrap_or(0.0)
    }

    fn provide_to_reserve(&mut self, account: AccountId, amount: f64) -> LedgerResult<()> {
        if amount <= 0.0 {
            return Ok(());
        }
        self.debit(account, amount)?;
        *self.reserve_deposits.entry(account).or_insert(0.0) += amount;
        self.reserve_balance += amount;
        Ok(())
    }

    fn withdraw_from_reserve(&mut self, account: AccountId, amount: f64) -> LedgerResult<f64> {
        let deposit = self.reserve_deposit_of(account);
        let withdrawn = amount.min(deposit).min(self.reserve_balance).max(0.0);
        if withdrawn <= 0.0 {
            return Ok(0.0);
        }
        self.reserve_deposits.insert(account, deposit - withdrawn);
        self.reserve_balance -= withdrawn;
        self.credit(account, withdrawn);
        Ok(withdrawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHALE: AccountId = 0;

    fn ledger_with_whale() -> MemoryLedger {
        let mut ledger = MemoryLedger::new(LedgerParams::default(), 2000.0);
        ledger
            .open_position(WHALE, 1_000_000.0, InsertHints::default(), 3000.0)
            .unwrap();
        ledger
    }

    fn assert_supply_backed(ledger: &MemoryLedger) {
        let supply = ledger.total_supply();
        let debt = ledger.system_totals().debt;
        assert!(
            (supply - debt).abs() < 1e-6 * debt.max(1.0),
            "supply {} != debt {}",
            supply,
            debt
        );
    }

    #[test]
    fn test_open_charges_issuance_fee_into_debt() {
        let ledger = ledger_with_whale();
        let amounts = ledger
            .synced_debt_and_collateral(ledger.worst_ranked_position().unwrap())
            .unwrap();
        assert!((amounts.debt - 1_000_000.0 * 1.005).abs() < 1e-6);
        assert_eq!(ledger.balance_of(WHALE), 1_000_000.0);
        assert_supply_backed(&ledger);
    }

    #[test]
    fn test_open_below_min_debt_rejected() {
        let mut ledger = ledger_with_whale();
        let err = ledger
            .open_position(1, 100.0, InsertHints::default(), 1.0)
            .unwrap_err();
        assert!(matches!(err, LedgerError::BelowMinimumDebt { .. }));
    }

    #[test]
    fn test_ranking_orders_riskiest_first() {
        let mut ledger = ledger_with_whale();
        let safe = ledger
            .open_position(1, 10_000.0, InsertHints::default(), 20.0)
            .unwrap();
        let risky = ledger
            .open_position(2, 10_000.0, InsertHints::default(), 6.0)
            .unwrap();
        assert_eq!(ledger.worst_ranked_position(), Some(risky));
        assert_eq!(ledger.next_ranked(risky), Some(safe));
    }

    #[test]
    fn test_close_requires_full_debt_balance() {
        let mut ledger = ledger_with_whale();
        let id = ledger
            .open_position(1, 10_000.0, InsertHints::default(), 20.0)
            .unwrap();
        let err = ledger.close_position(1, id).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        ledger.transfer(WHALE, 1, 1_000.0).unwrap();
        ledger.close_position(1, id).unwrap();
        assert_eq!(ledger.position_count(), 1);
        assert_supply_backed(&ledger);
    }

    #[test]
    fn test_liquidation_uses_reserve_then_liquidator() {
        let mut ledger = ledger_with_whale();
        let id = ledger
            .open_position(1, 10_000.0, InsertHints::default(), 6.0)
            .unwrap();
        ledger.provide_to_reserve(WHALE, 4_000.0).unwrap();

        ledger.set_price(1500.0);
        let outcome = ledger.liquidate_batch(WHALE, 10).unwrap();
        assert_eq!(outcome.liquidated.len(), 1);
        assert_eq!(outcome.liquidated[0].position_id, id);
        assert_eq!(ledger.reserve_balance(), 0.0);
        assert!(ledger.reserve_collateral() > 0.0);
        assert_supply_backed(&ledger);
    }

    #[test]
    fn test_uncovered_liquidation_redistributes_to_survivors() {
        let mut ledger = ledger_with_whale();
        ledger
            .open_position(1, 10_000.0, InsertHints::default(), 6.0)
            .unwrap();
        let whale_debt_before = ledger.system_totals().debt - 10_050.0;
        // liquidator 5 holds nothing and the reserve is empty
        ledger.set_price(1500.0);
        let outcome = ledger.liquidate_batch(5, 10).unwrap();
        assert_eq!(outcome.liquidated.len(), 1);
        assert_eq!(ledger.position_count(), 1);
        let totals = ledger.system_totals();
        assert!((totals.debt - whale_debt_before - 10_050.0).abs() < 1e-6);
        assert!((totals.collateral - 3006.0).abs() < 1e-9);
        assert_supply_backed(&ledger);
    }

    #[test]
    fn test_last_position_is_never_liquidated() {
        let mut ledger = MemoryLedger::new(LedgerParams::default(), 2000.0);
        ledger
            .open_position(1, 10_000.0, InsertHints::default(), 6.0)
            .unwrap();
        ledger.set_price(1000.0);
        assert!(ledger.liquidate_batch(1, 10).is_err());
        assert_eq!(ledger.position_count(), 1);
    }

    #[test]
    fn test_liquidate_nothing_reverts() {
        let mut ledger = ledger_with_whale();
        let err = ledger.liquidate_batch(WHALE, 10).unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { .. }));
    }

    #[test]
    fn test_full_redemption_closes_riskiest_position() {
        let mut ledger = ledger_with_whale();
        let risky = ledger
            .open_position(1, 10_000.0, InsertHints::default(), 12.0)
            .unwrap();
        let debt = ledger.synced_debt_and_collateral(risky).unwrap().debt;

        let request = RedemptionRequest {
            amount: debt,
            first_hint: None,
            insert_hints: InsertHints::default(),
            partial_nominal_ratio: 0.0,
            max_iterations: 70,
            max_fee_fraction: 1.0,
        };
        let outcome = ledger.redeem(WHALE, &request).unwrap();
        assert!((outcome.redeemed - debt).abs() < 1e-6);
        assert_eq!(outcome.fully_redeemed().count(), 1);
        assert!(ledger.base_rate() > 0.0);
        assert_supply_backed(&ledger);
    }

    #[test]
    fn test_partial_redemption_leaving_dust_is_cancelled() {
        let mut ledger = ledger_with_whale();
        ledger
            .open_position(1, 2_000.0, InsertHints::default(), 3.0)
            .unwrap();
        let request = RedemptionRequest {
            amount: 1_000.0,
            first_hint: None,
            insert_hints: InsertHints::default(),
            partial_nominal_ratio: 0.0,
            max_iterations: 70,
            max_fee_fraction: 1.0,
        };
        let err = ledger.redeem(WHALE, &request).unwrap_err();
        assert!(matches!(err, LedgerError::Reverted { .. }));
    }

    #[test]
    fn test_base_rate_decays_on_price_update() {
        let mut ledger = ledger_with_whale();
        ledger.base_rate = 0.02;
        ledger.set_price(2000.0);
        assert!(ledger.base_rate() < 0.02);
    }

    #[test]
    fn test_recovery_mode_blocks_debt_withdrawal() {
        let mut ledger = MemoryLedger::new(LedgerParams::default(), 2000.0);
        let id = ledger
            .open_position(1, 10_000.0, InsertHints::default(), 8.0)
            .unwrap();
        ledger.set_price(1000.0);
        assert!(ledger.is_recovery_mode(1000.0));
        let err = ledger
            .withdraw_debt(1, id, 100.0, InsertHints::default())
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::RecoveryModeRestriction("withdrawing debt")
        );
    }

    #[test]
    fn test_reserve_withdrawal_capped_at_deposit() {
        let mut ledger = ledger_with_whale();
        ledger.provide_to_reserve(WHALE, 500.0).unwrap();
        let withdrawn = ledger.withdraw_from_reserve(WHALE, 800.0).unwrap();
        assert_eq!(withdrawn, 500.0);
        assert_eq!(ledger.reserve_deposit_of(WHALE), 0.0);
    }
}
