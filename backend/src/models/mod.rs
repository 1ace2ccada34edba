//! Domain models for the simulator

pub mod event;
pub mod registry;
pub mod series;

// Re-exports
pub use event::{AdjustAction, Event, EventLog};
pub use registry::{ActiveEntry, AgentRegistry, HintCandidates};
pub use series::{MarketSeries, SeriesKind};
