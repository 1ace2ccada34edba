//! CDP Simulator Core - Rust Engine
//!
//! Agent-based, discrete-time simulator of a collateralized synthetic-asset
//! market with deterministic execution.
//!
//! # Architecture
//!
//! - **core**: Period clock
//! - **rng**: Deterministic random number generation, reseeded per draw site
//! - **ledger**: Seam to the position ledger, plus an in-memory implementation
//! - **models**: Agent registry, market series, event log
//! - **price**: Exogenous collateral price and natural-rate paths
//! - **decisions**: Open, close and adjust rules
//! - **liquidation**: Liquidation cascade and reserve return
//! - **market**: Price equilibrium, stabilizers, stability-reserve demand
//! - **valuation**: Governance-token valuation
//! - **orchestrator**: Main simulation loop and results export
//!
//! # Critical Invariants
//!
//! 1. All randomness is deterministic (seeded per stream, period and item)
//! 2. Every active registry entry has exactly one open ledger position
//! 3. Synthetic and collateral prices stay strictly positive
//! 4. Ledger failures are returned as typed errors, never panics

pub mod core;
pub mod decisions;
pub mod ledger;
pub mod liquidation;
pub mod market;
pub mod models;
pub mod orchestrator;
pub mod price;
pub mod rng;
pub mod valuation;

// Re-exports for convenience
pub use crate::core::time::PeriodClock;
pub use decisions::{ActionError, PeriodContext};
pub use ledger::{Ledger, LedgerError, LedgerParams, MemoryLedger, PositionId};
pub use models::{AgentRegistry, Event, EventLog, MarketSeries, SeriesKind};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PeriodRecord, ResultsTable, SimulationError, Stage,
};
pub use rng::{RngManager, SeedSchedule, Stream};
