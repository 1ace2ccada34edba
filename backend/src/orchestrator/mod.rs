//! Orchestrator - main simulation loop
//!
//! Owns the run-wide state and drives one period at a time. See `engine.rs`
//! for the period sequence and `results.rs` for the exported table.

pub mod engine;
pub mod results;

pub use engine::{
    Diagnostics, Orchestrator, OrchestratorConfig, RunTotals, SimulationError, Stage, WhaleConfig,
};
pub use results::{compute_config_hash, PeriodRecord, ResultsTable, CSV_HEADER};
