//! Liquidation cascade against the in-memory ledger
//!
//! Covers price crashes, multi-batch cascades, and a ledger that accepts
//! liquidation calls without ever removing a position.

use cdp_simulator_core_rs::ledger::{
    AccountId, InsertHints, Ledger, LedgerParams, LedgerResult, LiquidatedPosition,
    LiquidationOutcome, MemoryLedger, PositionAmounts, PositionId, RedemptionHints,
    RedemptionOutcome, RedemptionRequest, SystemTotals, WHALE,
};
use cdp_simulator_core_rs::liquidation::{pending_liquidations, run_cascade, CascadeConfig};
use cdp_simulator_core_rs::{AgentRegistry, EventLog, PeriodContext, SeedSchedule, SimulationError};

fn ctx<'a>(schedule: &'a SeedSchedule, params: &'a LedgerParams, price: f64) -> PeriodContext<'a> {
    PeriodContext {
        period: 100,
        collateral_price: price,
        synthetic_price: 1.0,
        schedule,
        params,
    }
}

/// Whale plus `count` agents each holding 10_000 debt against 6 collateral.
fn crowded_ledger(count: usize, reserve: f64) -> (MemoryLedger, AgentRegistry) {
    let mut ledger = MemoryLedger::new(LedgerParams::default(), 2000.0);
    let mut registry = AgentRegistry::new(count + 5);
    ledger
        .open_position(WHALE, 1_000_000.0, InsertHints::default(), 3000.0)
        .unwrap();
    ledger.provide_to_reserve(WHALE, reserve).unwrap();
    for _ in 0..count {
        let agent = registry.next_inactive().unwrap();
        let id = ledger
            .open_position(agent, 10_000.0, InsertHints::default(), 6.0)
            .unwrap();
        registry.activate(1.2, 0.1, id);
    }
    (ledger, registry)
}

// ============================================================================
// Price crash
// ============================================================================

#[test]
fn test_twenty_percent_crash_liquidates_risky_position() {
    let (mut ledger, mut registry) = crowded_ledger(1, 20_000.0);
    let schedule = SeedSchedule::new(1);
    let params = LedgerParams::default();
    let mut events = EventLog::new();

    let healthy = ctx(&schedule, &params, 2000.0);
    assert!(!pending_liquidations(&ledger, &healthy, 10).unwrap());

    ledger.set_price(1600.0);
    let crashed = ctx(&schedule, &params, 1600.0);
    assert!(pending_liquidations(&ledger, &crashed, 10).unwrap());

    let outcome = run_cascade(
        &mut ledger,
        &mut registry,
        &mut events,
        &crashed,
        &CascadeConfig::default(),
    )
    .unwrap();

    assert_eq!(outcome.positions_liquidated, 1);
    assert_eq!(outcome.batches, 1);
    assert_eq!(outcome.collateral_liquidated, 6.0);
    assert_eq!(outcome.reserve_before, 20_000.0);
    assert!((outcome.reserve_debt_absorbed - 10_050.0).abs() < 1e-6);
    assert!((outcome.reserve_collateral_gained - 6.0).abs() < 1e-9);
    // seized 6 at 1600 against 10_050 of absorbed debt at par
    assert!((outcome.liquidation_gain - (6.0 * 1600.0 - 10_050.0)).abs() < 1e-6);
    assert!(outcome.liquidation_gain != 0.0);

    assert_eq!(ledger.position_count(), 1);
    assert_eq!(registry.active_len(), 0);
    assert_eq!(registry.inactive_len(), 6);
    assert_eq!(events.events_of_type("LiquidationBatch").len(), 1);
    assert!(!pending_liquidations(&ledger, &crashed, 10).unwrap());
}

#[test]
fn test_cascade_runs_multiple_batches() {
    let (mut ledger, mut registry) = crowded_ledger(15, 200_000.0);
    let schedule = SeedSchedule::new(1);
    let params = LedgerParams::default();
    let mut events = EventLog::new();

    ledger.set_price(1500.0);
    let outcome = run_cascade(
        &mut ledger,
        &mut registry,
        &mut events,
        &ctx(&schedule, &params, 1500.0),
        &CascadeConfig::default(),
    )
    .unwrap();

    assert_eq!(outcome.batches, 2);
    assert_eq!(outcome.positions_liquidated, 15);
    assert_eq!(ledger.position_count(), 1);
    assert_eq!(registry.active_len(), 0);
    assert_eq!(events.events_of_type("LiquidationBatch").len(), 2);
}

#[test]
fn test_batch_ceiling_is_fatal() {
    let (mut ledger, mut registry) = crowded_ledger(15, 200_000.0);
    let schedule = SeedSchedule::new(1);
    let params = LedgerParams::default();
    let mut events = EventLog::new();

    ledger.set_price(1500.0);
    let err = run_cascade(
        &mut ledger,
        &mut registry,
        &mut events,
        &ctx(&schedule, &params, 1500.0),
        &CascadeConfig {
            batch_size: 10,
            max_iterations: 1,
        },
    )
    .unwrap_err();
    assert_eq!(
        err,
        SimulationError::CascadeStalled {
            period: 100,
            iterations: 1
        }
    );
}

// ============================================================================
// Ledger that never removes liquidated positions
// ============================================================================

/// Delegates everything to a [`MemoryLedger`] except `liquidate_batch`, which
/// reports the riskiest position as liquidated but leaves it open.
struct StuckLedger {
    inner: MemoryLedger,
}

impl Ledger for StuckLedger {
    fn set_price(&mut self, price: f64) {
        self.inner.set_price(price)
    }

    fn price(&self) -> f64 {
        self.inner.price()
    }

    fn open_position(
        &mut self,
        owner: AccountId,
        debt: f64,
        hints: InsertHints,
        collateral: f64,
    ) -> LedgerResult<PositionId> {
        self.inner.open_position(owner, debt, hints, collateral)
    }

    fn close_position(&mut self, owner: AccountId, id: PositionId) -> LedgerResult<()> {
        self.inner.close_position(owner, id)
    }

    fn repay_debt(
        &mut self,
        owner: AccountId,
        id: PositionId,
        amount: f64,
        hints: InsertHints,
    ) -> LedgerResult<()> {
        self.inner.repay_debt(owner, id, amount, hints)
    }

    fn withdraw_debt(
        &mut self,
        owner: AccountId,
        id: PositionId,
        amount: f64,
        hints: InsertHints,
    ) -> LedgerResult<()> {
        self.inner.withdraw_debt(owner, id, amount, hints)
    }

    fn add_collateral(
        &mut self,
        owner: AccountId,
        id: PositionId,
        hints: InsertHints,
        amount: f64,
    ) -> LedgerResult<()> {
        self.inner.add_collateral(owner, id, hints, amount)
    }

    fn withdraw_collateral(
        &mut self,
        owner: AccountId,
        id: PositionId,
        hints: InsertHints,
        amount: f64,
    ) -> LedgerResult<()> {
        self.inner.withdraw_collateral(owner, id, hints, amount)
    }

    fn liquidate_batch(
        &mut self,
        _liquidator: AccountId,
        _max_count: usize,
    ) -> LedgerResult<LiquidationOutcome> {
        let mut outcome = LiquidationOutcome::default();
        if let Some(id) = self.inner.worst_ranked_position() {
            let amounts = self.inner.synced_debt_and_collateral(id)?;
            outcome.liquidated.push(LiquidatedPosition {
                position_id: id,
                owner: 1,
                debt: amounts.debt,
                collateral: amounts.collateral,
            });
        }
        Ok(outcome)
    }

    fn redeem(
        &mut self,
        redeemer: AccountId,
        request: &RedemptionRequest,
    ) -> LedgerResult<RedemptionOutcome> {
        self.inner.redeem(redeemer, request)
    }

    fn current_collateral_ratio(&self, id: PositionId, price: f64) -> LedgerResult<f64> {
        self.inner.current_collateral_ratio(id, price)
    }

    fn synced_debt_and_collateral(&self, id: PositionId) -> LedgerResult<PositionAmounts> {
        self.inner.synced_debt_and_collateral(id)
    }

    fn is_recovery_mode(&self, price: f64) -> bool {
        self.inner.is_recovery_mode(price)
    }

    fn issuance_rate(&self) -> f64 {
        self.inner.issuance_rate()
    }

    fn redemption_rate(&self) -> f64 {
        self.inner.redemption_rate()
    }

    fn insertion_hints(
        &self,
        nominal_ratio: f64,
        upper_candidate: Option<PositionId>,
        lower_candidate: Option<PositionId>,
    ) -> InsertHints {
        self.inner
            .insertion_hints(nominal_ratio, upper_candidate, lower_candidate)
    }

    fn redemption_hints(&self, amount: f64, price: f64, max_iterations: usize) -> RedemptionHints {
        self.inner.redemption_hints(amount, price, max_iterations)
    }

    fn worst_ranked_position(&self) -> Option<PositionId> {
        self.inner.worst_ranked_position()
    }

    fn next_ranked(&self, id: PositionId) -> Option<PositionId> {
        self.inner.next_ranked(id)
    }

    fn position_count(&self) -> usize {
        self.inner.position_count()
    }

    fn system_totals(&self) -> SystemTotals {
        self.inner.system_totals()
    }

    fn total_supply(&self) -> f64 {
        self.inner.total_supply()
    }

    fn balance_of(&self, account: AccountId) -> f64 {
        self.inner.balance_of(account)
    }

    fn transfer(&mut self, from: AccountId, to: AccountId, amount: f64) -> LedgerResult<()> {
        self.inner.transfer(from, to, amount)
    }

    fn reserve_balance(&self) -> f64 {
        self.inner.reserve_balance()
    }

    fn reserve_collateral(&self) -> f64 {
        self.inner.reserve_collateral()
    }

    fn reserve_deposit_of(&self, account: AccountId) -> f64 {
        self.inner.reserve_deposit_of(account)
    }

    fn provide_to_reserve(&mut self, account: AccountId, amount: f64) -> LedgerResult<()> {
        self.inner.provide_to_reserve(account, amount)
    }

    fn withdraw_from_reserve(&mut self, account: AccountId, amount: f64) -> LedgerResult<f64> {
        self.inner.withdraw_from_reserve(account, amount)
    }
}

#[test]
fn test_non_shrinking_ledger_stalls_cascade() {
    let (inner, mut registry) = crowded_ledger(3, 50_000.0);
    let mut ledger = StuckLedger { inner };
    let schedule = SeedSchedule::new(1);
    let params = LedgerParams::default();
    let mut events = EventLog::new();

    ledger.set_price(1500.0);
    let context = ctx(&schedule, &params, 1500.0);
    assert!(pending_liquidations(&ledger, &context, 10).unwrap());

    let err = run_cascade(
        &mut ledger,
        &mut registry,
        &mut events,
        &context,
        &CascadeConfig::default(),
    )
    .unwrap_err();

    assert_eq!(
        err,
        SimulationError::CascadeStalled {
            period: 100,
            iterations: 1
        }
    );
    assert_eq!(ledger.position_count(), 4);
    assert!(events.is_empty());
}
