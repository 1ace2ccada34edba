//! Orchestrator Engine
//!
//! Main simulation loop integrating all components. Each call to
//! [`Orchestrator::step`] runs one period:
//!
//! ```text
//! For each period t:
//! 1. Exogenous collateral price input (ledger price feed)
//! 2. Liquidation cascade; record liquidation and airdrop gains
//! 3. Stability-reserve return from the gain history
//! 4. Close positions
//! 5. Adjust out-of-band positions
//! 6. Open new positions
//! 7. Stability-reserve demand update
//! 8. Market clearing, then ceiling / floor stabilizers
//! 9. Record issuance and redemption fee revenue
//! 10. Governance-token valuation
//! 11. Emit the period record
//! ```
//!
//! # Error policy
//!
//! Locally recoverable decision failures never leave a stage. A ledger error
//! or a stalled cascade ends the step with a [`SimulationError`]; the
//! orchestrator logs a [`Diagnostics`] dump first and leaves the decision to
//! abort (or keep the partial results) to the caller.
//!
//! # Example
//!
//! ```rust
//! use cdp_simulator_core_rs::ledger::MemoryLedger;
//! use cdp_simulator_core_rs::orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig {
//!     periods: 48,
//!     num_agents: 50,
//!     ..Default::default()
//! };
//! let ledger = MemoryLedger::new(config.ledger.clone(), config.collateral_price.initial);
//! let mut orchestrator = Orchestrator::new(config, ledger).unwrap();
//!
//! let results = orchestrator.run().unwrap();
//! assert_eq!(results.len(), 48);
//! assert!(results.records().iter().all(|r| r.synthetic_price > 0.0));
//! ```

use crate::core::time::PeriodClock;
use crate::decisions::{
    fatal, AdjustConfig, AdjustModel, CloseConfig, CloseModel, OpenConfig, OpenExpectations,
    OpenModel, PeriodContext,
};
use crate::ledger::{amount_from_net_debt, InsertHints, Ledger, LedgerError, LedgerParams, PositionId, WHALE};
use crate::liquidation::{run_cascade, stability_return_or_fallback, CascadeConfig, ReturnInputs};
use crate::market::{
    LiquidityConfig, LiquidityMarket, PriceStabilizer, ReserveConfig, ReserveDemand,
    StabilizerConfig,
};
use crate::models::{AgentRegistry, EventLog, MarketSeries, SeriesKind};
use crate::orchestrator::results::{compute_config_hash, PeriodRecord, ResultsTable};
use crate::price::{CollateralPriceConfig, NaturalRateConfig, PricePaths};
use crate::rng::SeedSchedule;
use crate::valuation::{GovernanceConfig, GovernanceValuation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info};

// ============================================================================
// Configuration
// ============================================================================

/// Seed position opened by the whale at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleConfig {
    pub collateral: f64,
    /// Debt including the issuance fee
    pub debt: f64,
}

impl Default for WhaleConfig {
    fn default() -> Self {
        Self {
            collateral: 30_000.0,
            debt: 1e7,
        }
    }
}

/// Complete orchestrator configuration
///
/// Every section falls back to its defaults, so a TOML file only needs the
/// keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of periods to simulate
    pub periods: usize,
    pub periods_per_day: usize,
    /// Size of the borrower population (the whale is extra)
    pub num_agents: usize,
    /// Master seed of the [`SeedSchedule`]
    pub rng_seed: u64,
    pub whale: WhaleConfig,
    pub ledger: LedgerParams,
    pub collateral_price: CollateralPriceConfig,
    pub natural_rate: NaturalRateConfig,
    pub governance: GovernanceConfig,
    pub liquidity: LiquidityConfig,
    pub open: OpenConfig,
    pub close: CloseConfig,
    pub adjust: AdjustConfig,
    pub cascade: CascadeConfig,
    pub stabilizer: StabilizerConfig,
    pub reserve: ReserveConfig,
    /// Emit an `info` summary every this many periods (0 disables)
    pub log_interval: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            periods: 365 * 24,
            periods_per_day: 24,
            num_agents: 1000,
            rng_seed: 12345,
            whale: WhaleConfig::default(),
            ledger: LedgerParams::default(),
            collateral_price: CollateralPriceConfig::default(),
            natural_rate: NaturalRateConfig::default(),
            governance: GovernanceConfig::default(),
            liquidity: LiquidityConfig::default(),
            open: OpenConfig::default(),
            close: CloseConfig::default(),
            adjust: AdjustConfig::default(),
            cascade: CascadeConfig::default(),
            stabilizer: StabilizerConfig::default(),
            reserve: ReserveConfig::default(),
            log_interval: 24,
        }
    }
}

impl OrchestratorConfig {
    /// Reject configurations no run could start from.
    ///
    /// Distribution parameters are checked again when the models are built.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |msg: &str| Err(SimulationError::InvalidConfig(msg.to_string()));
        if self.periods == 0 {
            return invalid("periods must be positive");
        }
        if self.periods_per_day == 0 {
            return invalid("periods_per_day must be positive");
        }
        if self.num_agents == 0 {
            return invalid("num_agents must be positive");
        }
        if !(self.whale.collateral > 0.0 && self.whale.debt > 0.0) {
            return invalid("whale collateral and debt must be positive");
        }
        if !(self.natural_rate.initial.is_finite()) {
            return invalid("natural_rate.initial must be finite");
        }
        if !(self.governance.initial_price > 0.0) {
            return invalid("governance.initial_price must be positive");
        }
        if self.cascade.batch_size == 0 || self.cascade.max_iterations == 0 {
            return invalid("cascade.batch_size and cascade.max_iterations must be positive");
        }
        let ledger = &self.ledger;
        if !(ledger.minimum_collateral_ratio > 0.0
            && ledger.critical_collateral_ratio >= ledger.minimum_collateral_ratio)
        {
            return invalid("ledger ratios must satisfy 0 < MCR <= CCR");
        }
        if !(ledger.min_debt > 0.0) {
            return invalid("ledger.min_debt must be positive");
        }
        self.collateral_price.validate()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Step of the period sequence in which a fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Setup,
    Liquidation,
    Close,
    Adjust,
    Open,
    Reserve,
    Stabilizer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Liquidation => "liquidation",
            Stage::Close => "close",
            Stage::Adjust => "adjust",
            Stage::Open => "open",
            Stage::Reserve => "reserve",
            Stage::Stabilizer => "stabilizer",
        };
        f.write_str(name)
    }
}

/// Fatal simulation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Ledger call failed during {stage} at period {period}: {source}")]
    Ledger {
        period: usize,
        stage: Stage,
        #[source]
        source: LedgerError,
    },

    #[error("Liquidation cascade stalled at period {period} after {iterations} batches")]
    CascadeStalled { period: usize, iterations: usize },

    #[error("Run already complete after {periods} periods")]
    RunComplete { periods: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// State dumped at `error` level before a fatal error is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub period: usize,
    pub collateral_price: f64,
    pub synthetic_price: f64,
    pub total_supply: f64,
    pub reserve_balance: f64,
    pub position_count: usize,
    pub active_agents: usize,
    pub inactive_agents: usize,
    pub recovery_mode: bool,
    /// Riskiest positions with their collateral ratio
    pub worst_positions: Vec<(PositionId, f64)>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Cumulative quantities reported in every period record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub collateral_added: f64,
    pub collateral_liquidated: f64,
    pub redeemed: f64,
}

/// Main orchestrator managing simulation state and the period loop
///
/// Owns the agent registry, the market series and the event log; drives the
/// ledger through the [`Ledger`] trait.
///
/// # Determinism
///
/// Every draw comes from a generator reseeded per (stream, period, item).
/// Same seed + same config = identical results.
pub struct Orchestrator<L: Ledger> {
    config: OrchestratorConfig,
    ledger: L,
    clock: PeriodClock,
    schedule: SeedSchedule,
    paths: PricePaths,
    governance: GovernanceValuation,
    open: OpenModel,
    close: CloseModel,
    adjust: AdjustModel,
    liquidity: LiquidityMarket,
    stabilizer: PriceStabilizer,
    reserve: ReserveDemand,
    registry: AgentRegistry,
    series: MarketSeries,
    events: EventLog,
    synthetic_price: f64,
    governance_price: f64,
    stability_return: f64,
    totals: RunTotals,
}

impl<L: Ledger> Orchestrator<L> {
    /// Build every model, precompute the exogenous paths and seed the ledger
    /// with the whale position and the initial reserve deposit.
    pub fn new(config: OrchestratorConfig, mut ledger: L) -> Result<Self, SimulationError> {
        config.validate()?;

        let clock = PeriodClock::new(config.periods_per_day);
        let schedule = SeedSchedule::new(config.rng_seed);
        let paths = PricePaths::generate(
            &config.collateral_price,
            &config.natural_rate,
            &schedule,
            &clock,
            config.periods,
        )?;
        let governance = GovernanceValuation::new(&config.governance, &schedule, &clock)?;

        let initial_price = paths.collateral_price(0);
        ledger.set_price(initial_price);
        let amount = amount_from_net_debt(config.whale.debt, ledger.issuance_rate());
        ledger
            .open_position(WHALE, amount, InsertHints::default(), config.whale.collateral)
            .map_err(fatal(0, Stage::Setup))?;
        if config.reserve.initial > 0.0 {
            ledger
                .provide_to_reserve(WHALE, config.reserve.initial)
                .map_err(fatal(0, Stage::Setup))?;
        }
        info!(
            agents = config.num_agents,
            periods = config.periods,
            seed = config.rng_seed,
            collateral_price = initial_price,
            "simulation initialized"
        );

        Ok(Self {
            open: OpenModel::new(&config.open)?,
            close: CloseModel::new(&config.close)?,
            adjust: AdjustModel::new(&config.adjust)?,
            liquidity: LiquidityMarket::new(&config.liquidity)?,
            stabilizer: PriceStabilizer::new(&config.stabilizer)?,
            reserve: ReserveDemand::new(&config.reserve)?,
            registry: AgentRegistry::new(config.num_agents),
            series: MarketSeries::new(),
            events: EventLog::new(),
            synthetic_price: 1.0,
            governance_price: governance.initial_price(),
            stability_return: config.reserve.initial_return,
            totals: RunTotals {
                collateral_added: config.whale.collateral,
                ..Default::default()
            },
            config,
            ledger,
            clock,
            schedule,
            paths,
            governance,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Mutable ledger access, for scenario setup between steps.
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn series(&self) -> &MarketSeries {
        &self.series
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn paths(&self) -> &PricePaths {
        &self.paths
    }

    pub fn totals(&self) -> RunTotals {
        self.totals
    }

    /// Last completed period (0 before the first step).
    pub fn current_period(&self) -> usize {
        self.clock.current_period()
    }

    pub fn is_complete(&self) -> bool {
        self.clock.current_period() >= self.config.periods
    }

    pub fn synthetic_price(&self) -> f64 {
        self.synthetic_price
    }

    pub fn governance_price(&self) -> f64 {
        self.governance_price
    }

    pub fn stability_return(&self) -> f64 {
        self.stability_return
    }

    pub fn expectations(&self) -> OpenExpectations {
        self.open.expectations()
    }

    pub fn config_hash(&self) -> Result<String, SimulationError> {
        compute_config_hash(&self.config)
    }

    // ========================================================================
    // Main loop
    // ========================================================================

    /// Run every remaining period.
    pub fn run(&mut self) -> Result<ResultsTable, SimulationError> {
        let mut table = ResultsTable::new(self.config_hash()?);
        while !self.is_complete() {
            table.push(self.step()?);
        }
        Ok(table)
    }

    /// Advance one period and return its record.
    pub fn step(&mut self) -> Result<PeriodRecord, SimulationError> {
        if self.is_complete() {
            return Err(SimulationError::RunComplete {
                periods: self.config.periods,
            });
        }
        self.clock.advance();
        let period = self.clock.current_period();
        match self.run_period(period) {
            Ok(record) => Ok(record),
            Err(err) => {
                let diagnostics = self.diagnostics(period);
                error!(error = %err, ?diagnostics, "simulation step failed");
                Err(err)
            }
        }
    }

    fn run_period(&mut self, period: usize) -> Result<PeriodRecord, SimulationError> {
        let collateral_price = self.paths.collateral_price(period);
        let natural_rate = self.paths.natural_rate(period);
        self.ledger.set_price(collateral_price);

        let schedule = self.schedule;
        let params = self.config.ledger.clone();
        let ctx = PeriodContext {
            period,
            collateral_price,
            synthetic_price: self.synthetic_price,
            schedule: &schedule,
            params: &params,
        };

        // Liquidation cascade and reserve return
        let cascade = run_cascade(
            &mut self.ledger,
            &mut self.registry,
            &mut self.events,
            &ctx,
            &self.config.cascade,
        )?;
        self.totals.collateral_liquidated += cascade.collateral_liquidated;
        self.series
            .record(SeriesKind::LiquidationGain, period, cascade.liquidation_gain);
        self.series.record(
            SeriesKind::AirdropGain,
            period,
            self.governance.airdrop_gain(self.governance_price),
        );
        self.stability_return = stability_return_or_fallback(
            &ReturnInputs {
                period,
                month: self.clock.month(),
                year: self.clock.year(),
                synthetic_price: self.synthetic_price,
                reserve_previous: cascade.reserve_before,
                initial_return: self.config.reserve.initial_return,
            },
            &self.series,
        );

        // Close
        match self.close.plan(&ctx, &self.registry, self.ledger.position_count()) {
            Ok(plan) => {
                let outcome = self.close.execute(
                    &plan,
                    &mut self.ledger,
                    &mut self.registry,
                    &mut self.events,
                    &ctx,
                )?;
                debug!(period, planned = outcome.planned, closed = outcome.closed, "close stage");
            }
            Err(skip) => debug!(period, reason = %skip, "close stage skipped"),
        }

        // Adjust
        let adjusted = self
            .adjust
            .execute(&mut self.ledger, &self.registry, &mut self.events, &ctx)?;

        // Open
        let opened = match self.open.plan(
            &ctx,
            self.ledger.issuance_rate(),
            self.registry.active_len(),
            self.registry.inactive_len(),
        ) {
            Ok(plan) => self.open.execute(
                &plan,
                &mut self.ledger,
                &mut self.registry,
                &mut self.events,
                &ctx,
            )?,
            Err(skip) => {
                debug!(period, reason = %skip, "open stage skipped");
                Default::default()
            }
        };
        self.totals.collateral_added += adjusted.collateral_added + opened.collateral_added;

        // Stability reserve
        self.reserve.update(
            &mut self.ledger,
            &self.registry,
            &mut self.events,
            self.stability_return,
            natural_rate,
            self.clock.month(),
            &ctx,
        )?;

        // Price equilibrium and stabilizers
        let equilibrium = self
            .liquidity
            .clear(&self.ledger, self.synthetic_price, &schedule, period);
        let stabilized = self.stabilizer.apply(
            &equilibrium,
            self.liquidity.elasticity(),
            &mut self.ledger,
            &mut self.registry,
            &mut self.events,
            &ctx,
        )?;
        self.synthetic_price = stabilized.price;
        self.totals.redeemed += stabilized.redeemed;

        // Fee revenue
        let issuance_fee = self.synthetic_price
            * (adjusted.issuance_fee + opened.issuance_fee + stabilized.issuance_fee);
        self.series.record(SeriesKind::IssuanceFee, period, issuance_fee);
        self.series
            .record(SeriesKind::RedemptionFee, period, stabilized.redemption_fee);

        // Governance token
        let valuation = self.governance.value(period, &self.series, &schedule);
        self.governance_price = valuation.price;

        let record = self.record(period, collateral_price, natural_rate);
        if self.config.log_interval > 0 && period % self.config.log_interval == 0 {
            info!(
                period,
                collateral_price,
                synthetic_price = record.synthetic_price,
                governance_price = record.governance_price,
                positions = record.position_count,
                tcr = record.total_collateral_ratio,
                recovery_mode = record.recovery_mode,
                "period summary"
            );
        }
        Ok(record)
    }

    fn record(&self, period: usize, collateral_price: f64, natural_rate: f64) -> PeriodRecord {
        let totals = self.ledger.system_totals();
        let worst_ratio = self
            .ledger
            .worst_ranked_position()
            .and_then(|id| self.ledger.current_collateral_ratio(id, collateral_price).ok());
        PeriodRecord {
            period,
            collateral_price,
            synthetic_price: self.synthetic_price,
            governance_price: self.governance_price,
            position_count: self.ledger.position_count(),
            total_collateral: totals.collateral,
            total_debt: totals.debt,
            total_collateral_ratio: totals.collateral_ratio(collateral_price),
            recovery_mode: self.ledger.is_recovery_mode(collateral_price),
            worst_ratio,
            reserve_balance: self.ledger.reserve_balance(),
            reserve_collateral: self.ledger.reserve_collateral(),
            total_collateral_added: self.totals.collateral_added,
            total_collateral_liquidated: self.totals.collateral_liquidated,
            total_redeemed: self.totals.redeemed,
            natural_rate,
            stability_return: self.stability_return,
        }
    }

    /// Snapshot of the state relevant to a failed step.
    pub fn diagnostics(&self, period: usize) -> Diagnostics {
        let price = self.paths.collateral_price(period);
        let mut worst_positions = Vec::new();
        let mut cursor = self.ledger.worst_ranked_position();
        while let Some(id) = cursor {
            if worst_positions.len() >= self.config.cascade.batch_size {
                break;
            }
            let ratio = self
                .ledger
                .current_collateral_ratio(id, price)
                .unwrap_or(f64::NAN);
            worst_positions.push((id, ratio));
            cursor = self.ledger.next_ranked(id);
        }
        Diagnostics {
            period,
            collateral_price: price,
            synthetic_price: self.synthetic_price,
            total_supply: self.ledger.total_supply(),
            reserve_balance: self.ledger.reserve_balance(),
            position_count: self.ledger.position_count(),
            active_agents: self.registry.active_len(),
            inactive_agents: self.registry.inactive_len(),
            recovery_mode: self.ledger.is_recovery_mode(price),
            worst_positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    fn small_config() -> OrchestratorConfig {
        OrchestratorConfig {
            periods: 30,
            num_agents: 40,
            ..Default::default()
        }
    }

    fn orchestrator(config: OrchestratorConfig) -> Orchestrator<MemoryLedger> {
        let ledger = MemoryLedger::new(config.ledger.clone(), config.collateral_price.initial);
        Orchestrator::new(config, ledger).unwrap()
    }

    #[test]
    fn test_setup_seeds_whale_and_reserve() {
        let orch = orchestrator(small_config());
        assert_eq!(orch.ledger().position_count(), 1);
        assert_eq!(orch.ledger().reserve_balance(), 1000.0);
        assert!((orch.ledger().system_totals().debt - 1e7).abs() < 1e-3);
        assert_eq!(orch.registry().inactive_len(), 40);
        assert_eq!(orch.totals().collateral_added, 30_000.0);
    }

    #[test]
    fn test_first_period_opens_at_steady_rate() {
        let mut orch = orchestrator(OrchestratorConfig {
            open: crate::decisions::OpenConfig {
                steady_rate: 3.0,
                volatility: 0.0,
                ..Default::default()
            },
            ..small_config()
        });
        let record = orch.step().unwrap();
        assert_eq!(record.period, 1);

        let opened = orch
            .events()
            .events_at_period(1)
            .into_iter()
            .filter(|e| e.event_type() == "PositionOpened")
            .count();
        assert_eq!(opened, 3);
        assert_eq!(record.position_count, orch.registry().active_len() + 1);
    }

    #[test]
    fn test_zero_steady_rate_opens_nothing_in_first_period() {
        let mut orch = orchestrator(OrchestratorConfig {
            open: crate::decisions::OpenConfig {
                steady_rate: 0.0,
                volatility: 0.0,
                ..Default::default()
            },
            ..small_config()
        });
        orch.step().unwrap();
        assert!(orch.events().events_of_type("PositionOpened").is_empty());
        let minted = orch.events().events_of_type("CeilingArbitrage").len();
        assert_eq!(orch.ledger().position_count(), 1 + minted);
    }

    #[test]
    fn test_step_after_completion_is_an_error() {
        let mut orch = orchestrator(OrchestratorConfig {
            periods: 2,
            num_agents: 5,
            ..Default::default()
        });
        orch.step().unwrap();
        orch.step().unwrap();
        assert_eq!(
            orch.step().unwrap_err(),
            SimulationError::RunComplete { periods: 2 }
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = OrchestratorConfig {
            num_agents: 0,
            ..Default::default()
        };
        let ledger = MemoryLedger::new(config.ledger.clone(), 2000.0);
        assert!(matches!(
            Orchestrator::new(config, ledger),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_registry_mirrors_ledger() {
        let mut orch = orchestrator(small_config());
        for _ in 0..30 {
            orch.step().unwrap();
            // whale is the only position outside the registry
            assert_eq!(
                orch.registry().active_len() + 1,
                orch.ledger().position_count()
            );
            assert_eq!(
                orch.registry().active_len() + orch.registry().inactive_len(),
                40
            );
        }
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Liquidation.to_string(), "liquidation");
        let err = SimulationError::Ledger {
            period: 3,
            stage: Stage::Open,
            source: LedgerError::UnknownPosition(PositionId(9)),
        };
        assert!(err.to_string().contains("during open at period 3"));
    }
}
